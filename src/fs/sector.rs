//! 扇区记录的二进制格式
//!
//! 每个扇区都是 `bytes_per_sector` 字节的定长记录，用 bincode 编码一个
//! [`Sector`] 枚举，末尾补 0。bincode 把枚举变体下标编码成开头的 4 字节
//! 小端整数，因此只看扇区前 4 字节就能判断类型；全 0 的扇区就是 `Free`。

use serde::{Deserialize, Serialize};

use crate::{
    disk::Lba,
    fs::error::{FileSystemError, Result},
};

/// DataSector 的固定开销：变体标签(4) + next_sector_at(4) + Vec 长度前缀(8)
pub const DATA_SECTOR_OVERHEAD: usize = 16;

const TYPE_TAG_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorType {
    Free,
    DriveInfo,
    DirNode,
    FileNode,
    DataSector,
}

impl SectorType {
    /// 不解码整个记录，只读类型标签
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let tag = raw
            .get(..TYPE_TAG_LEN)
            .ok_or_else(|| FileSystemError::Codec(format!("sector too short: {} bytes", raw.len())))?;
        match u32::from_le_bytes([tag[0], tag[1], tag[2], tag[3]]) {
            0 => Ok(Self::Free),
            1 => Ok(Self::DriveInfo),
            2 => Ok(Self::DirNode),
            3 => Ok(Self::FileNode),
            4 => Ok(Self::DataSector),
            other => Err(FileSystemError::Codec(format!("unknown sector type tag {}", other))),
        }
    }
}

/// 驱动器信息，固定位于 0 号扇区
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriveInfo {
    pub root_node_at: Lba,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirNode {
    pub name: String,
    pub first_data_at: Lba,
    pub entry_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    pub name: String,
    pub first_data_at: Lba, // 0 表示还没有数据块
    pub file_size: u32,
}

/// 数据扇区：目录用它存放子节点地址表，文件用它串成数据块链
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSector {
    pub next_sector_at: Lba, // 0 表示链尾
    pub data: Vec<u8>,
}

impl DataSector {
    /// 一个扇区最多能容纳的有效载荷字节数
    pub fn max_data_len(bytes_per_sector: usize) -> usize {
        bytes_per_sector.saturating_sub(DATA_SECTOR_OVERHEAD)
    }

    /// 载荷总是补齐到满容量，超出部分截断
    pub fn new(bytes_per_sector: usize, next_sector_at: Lba, data: &[u8]) -> Self {
        let capacity = Self::max_data_len(bytes_per_sector);
        let mut payload = vec![0u8; capacity];
        let len = data.len().min(capacity);
        payload[..len].copy_from_slice(&data[..len]);
        Self {
            next_sector_at,
            data: payload,
        }
    }

    pub fn empty(bytes_per_sector: usize) -> Self {
        Self::new(bytes_per_sector, 0, &[])
    }
}

// 变体顺序即磁盘上的类型标签，不能调整
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sector {
    Free,
    DriveInfo(DriveInfo),
    DirNode(DirNode),
    FileNode(FileNode),
    Data(DataSector),
}

impl Sector {
    pub fn sector_type(&self) -> SectorType {
        match self {
            Self::Free => SectorType::Free,
            Self::DriveInfo(_) => SectorType::DriveInfo,
            Self::DirNode(_) => SectorType::DirNode,
            Self::FileNode(_) => SectorType::FileNode,
            Self::Data(_) => SectorType::DataSector,
        }
    }

    /// 编码成恰好 `bytes_per_sector` 字节
    pub fn encode(&self, bytes_per_sector: usize) -> Result<Vec<u8>> {
        let mut raw = bincode::serialize(self)?;
        if raw.len() > bytes_per_sector {
            return Err(FileSystemError::Codec(format!(
                "{:?} record needs {} bytes, sector holds {}",
                self.sector_type(),
                raw.len(),
                bytes_per_sector
            )));
        }
        raw.resize(bytes_per_sector, 0);
        Ok(raw)
    }

    pub fn decode(raw: &[u8]) -> Result<Self> {
        // 先校验标签，未知标签不交给 bincode 去猜
        SectorType::from_bytes(raw)?;
        let mut sector: Sector = bincode::deserialize(raw)?;
        if let Sector::Data(data) = &mut sector {
            data.data.resize(DataSector::max_data_len(raw.len()), 0);
        }
        Ok(sector)
    }
}
