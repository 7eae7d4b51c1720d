use std::{fmt, sync::Arc};

use crate::{
    disk::{BlockDevice, Lba},
    fs::{
        error::{FileSystemError, Result},
        sector::{DataSector, DriveInfo, Sector, SectorType},
    },
};

/// 一块已挂载的磁盘及其驱动器信息扇区
pub struct VirtualDrive {
    disk: Arc<dyn BlockDevice>,
    drive_info_sector: Lba,
    info: DriveInfo, // 暂时缓存整个扇区
    bytes_per_data_sector: usize,
}

impl VirtualDrive {
    pub fn new(disk: Arc<dyn BlockDevice>, drive_info_sector: Lba, info: DriveInfo) -> Self {
        let bytes_per_data_sector = DataSector::max_data_len(disk.bytes_per_sector());
        Self {
            disk,
            drive_info_sector,
            info,
            bytes_per_data_sector,
        }
    }

    pub fn disk(&self) -> &Arc<dyn BlockDevice> {
        &self.disk
    }

    pub fn info(&self) -> &DriveInfo {
        &self.info
    }

    pub fn drive_info_sector(&self) -> Lba {
        self.drive_info_sector
    }

    pub fn bytes_per_sector(&self) -> usize {
        self.disk.bytes_per_sector()
    }

    pub fn bytes_per_data_sector(&self) -> usize {
        self.bytes_per_data_sector
    }

    pub fn read_sector(&self, lba: Lba) -> Result<Sector> {
        Sector::decode(&self.disk.read_sector(lba)?)
    }

    pub fn write_sector(&self, lba: Lba, sector: &Sector) -> Result<()> {
        let raw = sector.encode(self.disk.bytes_per_sector())?;
        self.disk.write_sector(lba, &raw)?;
        Ok(())
    }

    pub fn free_sector(&self, lba: Lba) -> Result<()> {
        log::debug!("freeing sector {}", lba);
        self.write_sector(lba, &Sector::Free)
    }

    /// 从 0 号扇区开始线性扫描，按升序返回前 `count` 个空闲扇区地址
    ///
    /// 找不到足够的空闲扇区时返回 `OutOfSpace`，不会返回部分结果。
    pub fn get_next_free_sectors(&self, count: usize) -> Result<Vec<Lba>> {
        let mut found = Vec::with_capacity(count);
        if count == 0 {
            return Ok(found);
        }

        for lba in 0..self.disk.sector_count() {
            if SectorType::from_bytes(&self.disk.read_sector(lba)?)? == SectorType::Free {
                found.push(lba);
                if found.len() == count {
                    log::debug!("allocated free sectors {:?}", found);
                    return Ok(found);
                }
            }
        }

        log::warn!(
            "out of space: requested {} free sectors, found {}",
            count,
            found.len()
        );
        Err(FileSystemError::OutOfSpace {
            requested: count,
            available: found.len(),
        })
    }

    pub fn count_free_sectors(&self) -> Result<u32> {
        let mut free = 0;
        for lba in 0..self.disk.sector_count() {
            if SectorType::from_bytes(&self.disk.read_sector(lba)?)? == SectorType::Free {
                free += 1;
            }
        }
        Ok(free)
    }
}

impl fmt::Debug for VirtualDrive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualDrive")
            .field("sector_count", &self.disk.sector_count())
            .field("bytes_per_sector", &self.disk.bytes_per_sector())
            .field("drive_info_sector", &self.drive_info_sector)
            .field("info", &self.info)
            .field("bytes_per_data_sector", &self.bytes_per_data_sector)
            .finish()
    }
}
