use std::fmt;

use crate::disk::Lba;

/// 文件系统错误类型
#[derive(Debug)]
pub enum FileSystemError {
    Io(std::io::Error),              // 底层 I/O 错误
    Codec(String),                   // 扇区编解码失败
    InvalidMount(String),            // 挂载点使用不当
    NotMounted(String),              // 卸载一个不存在的挂载点
    OutOfSpace { requested: usize, available: usize }, // 空闲扇区不足
    NotADirectory(String),           // 期望目录，实际不是
    NotAFile(String),                // 期望文件，实际不是
    DestinationNotDirectory(String), // 移动目标不是目录
    OutOfRange { index: usize, length: usize, file_length: usize },
    InvalidOperation(String),        // 结构上不合理的请求
    AlreadyExists(String),           // 同名节点已存在
    InvalidName(String),             // 节点名非法
    DirectoryFull(String),           // 目录数据扇区已放不下更多地址
    NotFound(String),                // 路径解析失败，带路径
    Corrupted(String),               // 文件系统损坏
}

impl FileSystemError {
    pub(crate) fn corrupted_sector(lba: Lba, desc: &str) -> Self {
        FileSystemError::Corrupted(format!("sector {}: {}", lba, desc))
    }
}

impl From<std::io::Error> for FileSystemError {
    fn from(e: std::io::Error) -> Self {
        FileSystemError::Io(e)
    }
}

impl From<bincode::Error> for FileSystemError {
    fn from(e: bincode::Error) -> Self {
        FileSystemError::Codec(e.to_string())
    }
}

// 实现 Display trait，用于打印错误信息
impl fmt::Display for FileSystemError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Disk I/O error: {}", e),
            Self::Codec(desc) => write!(f, "Sector encoding error: {}", desc),
            Self::InvalidMount(desc) => write!(f, "Invalid mount: {}", desc),
            Self::NotMounted(point) => write!(f, "No drive mounted at {}", point),
            Self::OutOfSpace {
                requested,
                available,
            } => write!(
                f,
                "Disk space is full: requested {} free sectors, found {}",
                requested, available
            ),
            Self::NotADirectory(name) => write!(f, "Expected a directory, found a file: {}", name),
            Self::NotAFile(name) => write!(f, "Expected a file, found a directory: {}", name),
            Self::DestinationNotDirectory(name) => {
                write!(f, "Move destination must be a directory: {}", name)
            }
            Self::OutOfRange {
                index,
                length,
                file_length,
            } => write!(
                f,
                "Range {}..{} is beyond end of file (length {})",
                index,
                index.saturating_add(*length),
                file_length
            ),
            Self::InvalidOperation(desc) => write!(f, "Invalid operation: {}", desc),
            Self::AlreadyExists(name) => write!(f, "File or directory already exists: {}", name),
            Self::InvalidName(name) => write!(f, "Invalid name: {:?}", name),
            Self::DirectoryFull(name) => write!(f, "Directory is full: {}", name),
            Self::NotFound(path) => write!(f, "File or directory not found: {}", path),
            Self::Corrupted(desc) => write!(f, "File system corrupted: {}", desc),
        }
    }
}

// 支持链式错误，方便追踪底层原因
impl std::error::Error for FileSystemError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// 文件系统统一结果类型
pub type Result<T> = std::result::Result<T, FileSystemError>;
