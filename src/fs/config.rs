use crate::disk::Lba;

// 格式化时写入的三个固定扇区
pub const DRIVE_INFO_SECTOR: Lba = 0;
pub const ROOT_DIR_SECTOR: Lba = 1;
pub const ROOT_DATA_SECTOR: Lba = 2;

// 格式化后至少需要的扇区数
pub const MIN_SECTOR_COUNT: u32 = 3;

pub const PATH_SEPARATOR: char = '/';

// 节点名最大字节数（UTF-8）
pub const MAX_NAME_LEN: usize = 32;

// 目录数据扇区中每个子节点地址占 4 字节（小端）
pub const DIR_ENTRY_SIZE: usize = 4;
