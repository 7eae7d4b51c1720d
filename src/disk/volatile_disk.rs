use std::{io::Result, sync::Mutex};

use crate::disk::{
    block_device::{check_access, lock_state, BlockDevice},
    types::Lba,
};

#[derive(Debug)]
struct VolatileState {
    sectors: Vec<u8>, // 扁平化存储
    powered: bool,
}

/// 纯内存磁盘，断电不丢数据，但进程退出后全部消失
#[derive(Debug)]
pub struct VolatileDisk {
    state: Mutex<VolatileState>,
    sector_count: u32,
    bytes_per_sector: usize,
}

impl VolatileDisk {
    pub fn new(sector_count: u32, bytes_per_sector: usize) -> Self {
        Self {
            state: Mutex::new(VolatileState {
                sectors: vec![0u8; sector_count as usize * bytes_per_sector],
                powered: false,
            }),
            sector_count,
            bytes_per_sector,
        }
    }

    fn range(&self, lba: Lba) -> std::ops::Range<usize> {
        let start = lba as usize * self.bytes_per_sector;
        start..start + self.bytes_per_sector
    }
}

impl BlockDevice for VolatileDisk {
    fn turn_on(&self) -> Result<()> {
        lock_state(&self.state)?.powered = true;
        Ok(())
    }

    fn turn_off(&self) -> Result<()> {
        lock_state(&self.state)?.powered = false;
        Ok(())
    }

    fn is_on(&self) -> bool {
        lock_state(&self.state).map_or(false, |state| state.powered)
    }

    fn read_sector(&self, lba: Lba) -> Result<Vec<u8>> {
        let state = lock_state(&self.state)?;
        check_access(
            state.powered,
            lba,
            self.sector_count,
            None,
            self.bytes_per_sector,
        )?;
        Ok(state.sectors[self.range(lba)].to_vec())
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
        let range = self.range(lba);
        state.sectors[range].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }

    fn bytes_per_sector(&self) -> usize {
        self.bytes_per_sector
    }
}
