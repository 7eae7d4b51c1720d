pub mod block_device;
pub mod file_disk;
pub mod init;
pub mod types;
pub mod volatile_disk;

pub use block_device::BlockDevice;
pub use file_disk::FileDisk;
pub use types::{Lba, BYTES_PER_SECTOR, SECTOR_COUNT};
pub use volatile_disk::VolatileDisk;
