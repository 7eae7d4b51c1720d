use std::path::PathBuf;

use log::LevelFilter;

use crate::disk::{BYTES_PER_SECTOR, SECTOR_COUNT};

const DEFAULT_DISK_PATH: &str = "disk.img";

/// 启动参数，全部来自环境变量
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub disk_path: PathBuf,      // MINIFS_DISK
    pub sector_count: u32,       // MINIFS_SECTORS
    pub bytes_per_sector: usize,
    pub volatile: bool,          // MINIFS_VOLATILE=1 时使用内存盘
    pub log_level: LevelFilter,  // MINIFS_LOG
}

impl Default for Config {
    fn default() -> Self {
        Self {
            disk_path: PathBuf::from(DEFAULT_DISK_PATH),
            sector_count: SECTOR_COUNT,
            bytes_per_sector: BYTES_PER_SECTOR,
            volatile: false,
            log_level: LevelFilter::Off,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 无法解析的值一律回退到默认值
    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            disk_path: lookup("MINIFS_DISK")
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.disk_path),
            sector_count: lookup("MINIFS_SECTORS")
                .and_then(|count| count.trim().parse().ok())
                .filter(|&count| count > 0)
                .unwrap_or(defaults.sector_count),
            bytes_per_sector: defaults.bytes_per_sector,
            volatile: lookup("MINIFS_VOLATILE")
                .map(|flag| matches!(flag.trim(), "1" | "true" | "yes"))
                .unwrap_or(defaults.volatile),
            log_level: lookup("MINIFS_LOG")
                .and_then(|level| level.trim().parse().ok())
                .unwrap_or(defaults.log_level),
        }
    }
}
