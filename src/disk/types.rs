/// 扇区的逻辑地址（LBA）
/// 节点所在扇区的地址同时也是它的身份（相当于 inode 编号）。
pub type Lba = u32;

/// 每个扇区的大小：256 字节
/// 磁盘以“扇区”为最小读写单位。
pub const BYTES_PER_SECTOR: usize = 256;

/// 默认磁盘包含的扇区总数：1024 个扇区，即 256KB
pub const SECTOR_COUNT: u32 = 1024;

/// 按给定几何参数计算磁盘镜像的总大小（单位：字节）
pub fn disk_size(sector_count: u32, bytes_per_sector: usize) -> u64 {
    sector_count as u64 * bytes_per_sector as u64
}
