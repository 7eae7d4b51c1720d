use std::{
    io::{Error, ErrorKind, Result},
    sync::{Mutex, MutexGuard},
};

use crate::disk::types::Lba;

/// 按扇区寻址的块设备
pub trait BlockDevice: Send + Sync {
    fn turn_on(&self) -> Result<()>;
    fn turn_off(&self) -> Result<()>;
    fn is_on(&self) -> bool;

    /// 读出一个完整扇区，长度恒为 `bytes_per_sector()`
    fn read_sector(&self, lba: Lba) -> Result<Vec<u8>>;
    /// `buf` 的长度必须恰好等于 `bytes_per_sector()`
    fn write_sector(&self, lba: Lba, buf: &[u8]) -> Result<()>;

    fn sector_count(&self) -> u32;
    fn bytes_per_sector(&self) -> usize;
}

/// 锁被毒化时转成 I/O 错误，而不是让调用方 panic
pub(crate) fn lock_state<T>(state: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    state
        .lock()
        .map_err(|_| Error::new(ErrorKind::Other, "disk state lock poisoned"))
}

/// 各个设备实现共用的参数检查
pub(crate) fn check_access(
    powered: bool,
    lba: Lba,
    sector_count: u32,
    buf_len: Option<usize>,
    bytes_per_sector: usize,
) -> Result<()> {
    if !powered {
        return Err(Error::new(ErrorKind::NotConnected, "disk is powered off"));
    }
    if lba >= sector_count {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("sector {} out of range (0..{})", lba, sector_count),
        ));
    }
    if let Some(len) = buf_len {
        if len != bytes_per_sector {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!(
                    "sector buffer must be {} bytes, got {}",
                    bytes_per_sector, len
                ),
            ));
        }
    }
    Ok(())
}
