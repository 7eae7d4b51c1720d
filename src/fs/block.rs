//! 文件内容的块缓存与跨块读写
//!
//! 文件数据存放在一条由 `next_sector_at` 串起来的数据扇区链上，每个扇区
//! 就是一个“块”，块大小等于驱动器的 `bytes_per_data_sector`。字节偏移
//! `o` 落在第 `o / block_size` 块的第 `o % block_size` 字节。

use crate::{
    disk::Lba,
    fs::{
        drive::VirtualDrive,
        error::{FileSystemError, Result},
        sector::{DataSector, Sector},
    },
};

/// 一个数据扇区的内存缓存
#[derive(Debug, Clone)]
pub struct VirtualBlock {
    sector_address: Lba,
    sector: DataSector,
    dirty: bool,
}

impl VirtualBlock {
    pub fn new(sector_address: Lba, sector: DataSector, dirty: bool) -> Self {
        Self {
            sector_address,
            sector,
            dirty,
        }
    }

    pub fn load(drive: &VirtualDrive, sector_address: Lba) -> Result<Self> {
        match drive.read_sector(sector_address)? {
            Sector::Data(sector) => Ok(Self::new(sector_address, sector, false)),
            other => Err(FileSystemError::corrupted_sector(
                sector_address,
                &format!("expected a data sector, found {:?}", other.sector_type()),
            )),
        }
    }

    pub fn sector_address(&self) -> Lba {
        self.sector_address
    }

    pub fn next_sector_at(&self) -> Lba {
        self.sector.next_sector_at
    }

    #[cfg(test)]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn data(&self) -> &[u8] {
        &self.sector.data
    }

    /// 拿到可写的载荷即视为已修改
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.sector.data
    }

    // 只改了链接字段也要写回
    fn link_to(&mut self, next_sector_at: Lba) {
        self.sector.next_sector_at = next_sector_at;
        self.dirty = true;
    }

    /// 脏块写回磁盘后清除标记，干净块什么都不做
    pub fn commit(&mut self, drive: &VirtualDrive) -> Result<()> {
        if self.dirty {
            drive.write_sector(self.sector_address, &Sector::Data(self.sector.clone()))?;
            self.dirty = false;
        }
        Ok(())
    }

    pub fn delete(&self, drive: &VirtualDrive) -> Result<()> {
        drive.free_sector(self.sector_address)
    }
}

/// 从 `first` 开始沿链读入所有块，`first == 0` 时返回空链
pub fn load_chain(drive: &VirtualDrive, first: Lba) -> Result<Vec<VirtualBlock>> {
    let mut blocks = Vec::new();
    let mut address = first;
    while address != 0 {
        // 链长不可能超过扇区总数，超过说明链上有环
        if blocks.len() >= drive.disk().sector_count() as usize {
            return Err(FileSystemError::corrupted_sector(first, "block chain loops"));
        }
        let block = VirtualBlock::load(drive, address)?;
        address = block.next_sector_at();
        blocks.push(block);
    }
    log::debug!("loaded {} blocks starting at sector {}", blocks.len(), first);
    Ok(blocks)
}

/// 容纳 `num_bytes` 字节需要的块数，至少 1 块
pub fn blocks_needed(block_size: usize, num_bytes: usize) -> usize {
    num_bytes.div_ceil(block_size).max(1)
}

fn block_at<'a>(blocks: &'a [VirtualBlock], index: usize, offset: usize) -> Result<&'a VirtualBlock> {
    blocks.get(index).ok_or_else(|| {
        FileSystemError::Corrupted(format!(
            "byte {} needs block {}, chain has {} blocks",
            offset,
            index,
            blocks.len()
        ))
    })
}

/// 从块链中读出 `[start, start + length)`，依次拷贝起始块尾部、中间整块和末尾块头部
pub fn read_block_data(
    blocks: &[VirtualBlock],
    block_size: usize,
    start: usize,
    length: usize,
) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(length);
    let end = start + length;
    let mut offset = start;

    while offset < end {
        let within = offset % block_size;
        let count = (block_size - within).min(end - offset);
        let block = block_at(blocks, offset / block_size, offset)?;
        result.extend_from_slice(&block.data()[within..within + count]);
        offset += count;
    }

    Ok(result)
}

/// 把 `data` 分散写入从 `start` 开始的各块，被写到的块都标记为脏
pub fn write_block_data(
    blocks: &mut [VirtualBlock],
    block_size: usize,
    start: usize,
    data: &[u8],
) -> Result<()> {
    let end = start + data.len();
    let mut offset = start;

    while offset < end {
        let index = offset / block_size;
        let within = offset % block_size;
        let count = (block_size - within).min(end - offset);
        block_at(blocks, index, offset)?;

        let from = offset - start;
        blocks[index].data_mut()[within..within + count]
            .copy_from_slice(&data[from..from + count]);
        offset += count;
    }

    Ok(())
}

/// 块链不够覆盖 `new_length` 时一次性分配缺少的扇区并接到链尾
///
/// 新块和被改写链接的前驱块都是脏的，由调用方负责提交。返回新增的块数。
pub fn extend_blocks(
    drive: &VirtualDrive,
    blocks: &mut Vec<VirtualBlock>,
    old_length: usize,
    new_length: usize,
) -> Result<usize> {
    let needed = blocks_needed(drive.bytes_per_data_sector(), new_length);
    if needed <= blocks.len() {
        return Ok(0);
    }

    let additional = needed - blocks.len();
    let free = drive.get_next_free_sectors(additional)?;
    log::debug!(
        "extending chain from {} to {} blocks ({} -> {} bytes)",
        blocks.len(),
        needed,
        old_length,
        new_length
    );

    for address in free {
        if let Some(prev) = blocks.last_mut() {
            prev.link_to(address);
        }
        blocks.push(VirtualBlock::new(
            address,
            DataSector::empty(drive.bytes_per_sector()),
            true,
        ));
    }

    Ok(additional)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{BlockDevice, VolatileDisk, BYTES_PER_SECTOR};
    use crate::fs::sector::DriveInfo;
    use crate::fs::test_support::random_bytes;
    use std::sync::Arc;

    const BLOCK_SIZE: usize = 240;

    fn drive() -> VirtualDrive {
        let disk = Arc::new(VolatileDisk::new(64, BYTES_PER_SECTOR));
        disk.turn_on().unwrap();
        VirtualDrive::new(disk, 0, DriveInfo { root_node_at: 1 })
    }

    fn memory_chain(count: usize) -> Vec<VirtualBlock> {
        (0..count)
            .map(|i| VirtualBlock::new(10 + i as Lba, DataSector::empty(BYTES_PER_SECTOR), false))
            .collect()
    }

    #[test]
    fn blocks_needed_rounds_up_with_minimum_one() {
        assert_eq!(blocks_needed(BLOCK_SIZE, 0), 1);
        assert_eq!(blocks_needed(BLOCK_SIZE, 1), 1);
        assert_eq!(blocks_needed(BLOCK_SIZE, 240), 1);
        assert_eq!(blocks_needed(BLOCK_SIZE, 241), 2);
        assert_eq!(blocks_needed(BLOCK_SIZE, 720), 3);
    }

    #[test]
    fn write_within_one_block_touches_only_it() {
        let mut blocks = memory_chain(3);
        let data = random_bytes(100);

        write_block_data(&mut blocks, BLOCK_SIZE, 20, &data).unwrap();

        assert!(blocks[0].is_dirty());
        assert!(!blocks[1].is_dirty());
        assert!(!blocks[2].is_dirty());
        assert_eq!(&blocks[0].data()[20..120], &data[..]);
        assert_eq!(read_block_data(&blocks, BLOCK_SIZE, 20, 100).unwrap(), data);
    }

    #[test]
    fn write_spanning_three_blocks_starts_mid_block() {
        let mut blocks = memory_chain(4);
        let data = random_bytes(500);

        write_block_data(&mut blocks, BLOCK_SIZE, 120, &data).unwrap();

        // 120..240 | 240..480 | 480..620
        assert_eq!(&blocks[0].data()[120..], &data[..120]);
        assert_eq!(blocks[1].data(), &data[120..360]);
        assert_eq!(&blocks[2].data()[..140], &data[360..]);
        assert!(!blocks[3].is_dirty());
        assert_eq!(read_block_data(&blocks, BLOCK_SIZE, 120, 500).unwrap(), data);
    }

    #[test]
    fn write_ending_on_block_boundary_leaves_next_block_clean() {
        let mut blocks = memory_chain(3);
        let data = random_bytes(2 * BLOCK_SIZE);

        write_block_data(&mut blocks, BLOCK_SIZE, 0, &data).unwrap();

        assert!(blocks[0].is_dirty() && blocks[1].is_dirty());
        assert!(!blocks[2].is_dirty());
    }

    #[test]
    fn short_chain_is_reported_not_panicked() {
        let mut blocks = memory_chain(1);
        assert!(matches!(
            read_block_data(&blocks, BLOCK_SIZE, 200, 100),
            Err(FileSystemError::Corrupted(_))
        ));
        assert!(write_block_data(&mut blocks, BLOCK_SIZE, 239, &[1, 2]).is_err());
    }

    #[test]
    fn zero_length_access_is_empty() {
        let mut blocks = memory_chain(1);
        write_block_data(&mut blocks, BLOCK_SIZE, 5, &[]).unwrap();
        assert!(!blocks[0].is_dirty());
        assert!(read_block_data(&blocks, BLOCK_SIZE, 5, 0).unwrap().is_empty());
    }

    #[test]
    fn extend_links_new_blocks_and_marks_predecessor_dirty() {
        let drive = drive();
        // 0 号地址表示链尾，先占住格式化时的固定扇区
        for lba in 0..3 {
            drive
                .write_sector(lba, &Sector::Data(DataSector::empty(BYTES_PER_SECTOR)))
                .unwrap();
        }
        let first = drive.get_next_free_sectors(1).unwrap()[0];
        assert_eq!(first, 3);
        drive
            .write_sector(first, &Sector::Data(DataSector::empty(BYTES_PER_SECTOR)))
            .unwrap();
        let mut blocks = load_chain(&drive, first).unwrap();
        assert_eq!(blocks.len(), 1);

        let added = extend_blocks(&drive, &mut blocks, 0, 3 * BLOCK_SIZE + 1).unwrap();
        assert_eq!(added, 3);
        assert_eq!(blocks.len(), 4);
        assert!(blocks.iter().all(|b| b.is_dirty()));
        for pair in blocks.windows(2) {
            assert_eq!(pair[0].next_sector_at(), pair[1].sector_address());
        }
        assert_eq!(blocks[3].next_sector_at(), 0);

        for block in blocks.iter_mut() {
            block.commit(&drive).unwrap();
        }
        let reloaded = load_chain(&drive, first).unwrap();
        let addresses: Vec<_> = reloaded.iter().map(|b| b.sector_address()).collect();
        let expected: Vec<_> = blocks.iter().map(|b| b.sector_address()).collect();
        assert_eq!(addresses, expected);
    }

    #[test]
    fn extend_is_noop_when_chain_is_long_enough() {
        let drive = drive();
        let mut blocks = memory_chain(2);
        assert_eq!(extend_blocks(&drive, &mut blocks, 100, 480).unwrap(), 0);
        assert!(blocks.iter().all(|b| !b.is_dirty()));
    }

    #[test]
    fn commit_writes_only_dirty_blocks() {
        let drive = drive();
        let mut block = VirtualBlock::new(5, DataSector::empty(BYTES_PER_SECTOR), false);

        // 干净块提交不会覆盖磁盘上的内容
        block.commit(&drive).unwrap();
        assert_eq!(drive.read_sector(5).unwrap(), Sector::Free);

        block.data_mut()[0] = 0xAB;
        block.commit(&drive).unwrap();
        assert!(!block.is_dirty());
        assert_eq!(VirtualBlock::load(&drive, 5).unwrap().data()[0], 0xAB);

        block.delete(&drive).unwrap();
        assert_eq!(drive.read_sector(5).unwrap(), Sector::Free);
    }

    #[test]
    fn loading_a_non_data_sector_is_corruption() {
        let drive = drive();
        drive.disk().write_sector(3, &Sector::Free.encode(BYTES_PER_SECTOR).unwrap()).unwrap();
        assert!(matches!(
            VirtualBlock::load(&drive, 3),
            Err(FileSystemError::Corrupted(_))
        ));
    }
}
