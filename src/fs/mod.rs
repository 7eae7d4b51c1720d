pub mod block;
pub mod config;
pub mod drive;
pub mod error;
pub mod logical;
pub mod node;
pub mod sector;
pub mod vfs;

pub use error::{FileSystemError, Result};
pub use logical::{FsEntry, SimpleFs};
