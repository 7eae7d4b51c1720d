use std::{
    fs::{File, OpenOptions},
    io::{Read, Result, Seek, SeekFrom, Write},
    path::Path,
    sync::Mutex,
};

use crate::disk::{
    block_device::{check_access, lock_state, BlockDevice},
    types::{disk_size, Lba},
};

#[derive(Debug)]
struct FileDiskState {
    file: File,
    powered: bool,
}

/// 以宿主机上的镜像文件作为后备存储的持久化磁盘
#[derive(Debug)]
pub struct FileDisk {
    state: Mutex<FileDiskState>,
    sector_count: u32,
    bytes_per_sector: usize,
}

impl FileDisk {
    pub fn open<P: AsRef<Path>>(path: P, sector_count: u32, bytes_per_sector: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.as_ref())?;

        // 新建或过小的镜像补齐到完整大小，空洞读出来全是 0
        let size = disk_size(sector_count, bytes_per_sector);
        if file.metadata()?.len() < size {
            log::debug!(
                "growing disk image {} to {} bytes",
                path.as_ref().display(),
                size
            );
            file.set_len(size)?;
        }

        Ok(Self {
            state: Mutex::new(FileDiskState {
                file,
                powered: false,
            }),
            sector_count,
            bytes_per_sector,
        })
    }
}

impl BlockDevice for FileDisk {
    fn turn_on(&self) -> Result<()> {
        lock_state(&self.state)?.powered = true;
        Ok(())
    }

    fn turn_off(&self) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.file.sync_all()?;
        state.powered = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        lock_state(&self.state).map_or(false, |state| state.powered)
    }

    fn read_sector(&self, lba: Lba) -> Result<Vec<u8>> {
        let mut state = lock_state(&self.state)?;
        check_access(
            state.powered,
            lba,
            self.sector_count,
            None,
            self.bytes_per_sector,
        )?;
        let mut buf = vec![0u8; self.bytes_per_sector];
        state
            .file
            .seek(SeekFrom::Start(lba as u64 * self.bytes_per_sector as u64))?;
        state.file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_sector(&self, lba: Lba, buf: &[u8]) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        check_access(
            state.powered,
            lba,
            self.sector_count,
            Some(buf.len()),
            self.bytes_per_sector,
        )?;
        state
            .file
            .seek(SeekFrom::Start(lba as u64 * self.bytes_per_sector as u64))?;
        state.file.write_all(buf)?;
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn bytes_per_sector(&self) -> usize {
        self.bytes_per_sector
    }
}
