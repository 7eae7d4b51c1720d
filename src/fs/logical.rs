//! 基于路径的文件系统接口，供 shell 使用
//!
//! 路径必须以 `/` 开头。路径中间不允许出现空段（`//`），
//! 结尾的 `/` 只能跟在目录后面。

use std::sync::Arc;

use crate::{
    disk::{BlockDevice, Lba},
    fs::{
        config::PATH_SEPARATOR,
        error::{FileSystemError, Result},
        node::NodeId,
        vfs::VirtualFs,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// 某一时刻节点状态的快照，不随后续修改更新
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub node: NodeId,
    pub parent: Option<NodeId>, // 根目录没有父节点
    pub kind: EntryKind,
    pub name: String,
    pub full_path: String,
    pub length: usize,      // 文件字节数，目录为子项数
    pub sector: Lba,        // 节点扇区
    pub loaded: bool,       // 子节点表或块链是否已在内存
}

impl FsEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub free_sectors: u32,
    pub total_sectors: u32,
    pub bytes_per_sector: usize,
    pub drive_info_sector: Lba,
    pub root_node_at: Lba,
}

impl DiskUsage {
    pub fn used_sectors(&self) -> u32 {
        self.total_sectors - self.free_sectors
    }
}

#[derive(Debug, Default)]
pub struct SimpleFs {
    vfs: VirtualFs,
}

impl SimpleFs {
    pub fn new() -> Self {
        Self { vfs: VirtualFs::new() }
    }

    pub fn format(disk: &dyn BlockDevice) -> Result<()> {
        VirtualFs::format(disk)
    }

    pub fn format_with_progress<F: FnMut(u32, u32)>(disk: &dyn BlockDevice, on_progress: F) -> Result<()> {
        VirtualFs::format_with_progress(disk, on_progress)
    }

    pub fn mount(&mut self, disk: Arc<dyn BlockDevice>, mount_point: &str) -> Result<()> {
        self.vfs.mount(disk, mount_point)
    }

    pub fn unmount(&mut self, mount_point: &str) -> Result<()> {
        self.vfs.unmount(mount_point)
    }

    pub fn is_mounted(&self, mount_point: &str) -> bool {
        self.vfs.is_mounted(mount_point)
    }

    fn root(&self) -> Result<NodeId> {
        self.vfs
            .root_node()
            .ok_or_else(|| FileSystemError::NotMounted(PATH_SEPARATOR.to_string()))
    }

    // 找不到返回 Ok(None)，磁盘错误照常向上传
    fn resolve(&mut self, path: &str) -> Result<Option<NodeId>> {
        let root = self.root()?;
        let Some(rest) = path.strip_prefix(PATH_SEPARATOR) else {
            log::debug!("path {:?} is not absolute", path);
            return Ok(None);
        };

        let segments: Vec<&str> = rest.split(PATH_SEPARATOR).collect();
        let mut current = root;
        for (i, segment) in segments.iter().enumerate() {
            if self.vfs.tree().node(current)?.is_file() {
                log::debug!("path {:?} descends through a file", path);
                return Ok(None);
            }
            if segment.is_empty() {
                if i + 1 < segments.len() {
                    log::debug!("path {:?} has an empty segment", path);
                    return Ok(None);
                }
                continue;
            }
            match self.vfs.tree_mut().get_child(current, segment)? {
                Some(child) => current = child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    fn resolve_existing(&mut self, path: &str) -> Result<NodeId> {
        self.resolve(path)?
            .ok_or_else(|| FileSystemError::NotFound(path.to_string()))
    }

    fn resolve_directory(&mut self, path: &str) -> Result<NodeId> {
        let id = self.resolve_existing(path)?;
        if !self.vfs.tree().node(id)?.is_directory() {
            return Err(FileSystemError::NotADirectory(path.to_string()));
        }
        Ok(id)
    }

    pub fn find(&mut self, path: &str) -> Option<FsEntry> {
        match self.resolve(path).and_then(|id| id.map(|id| self.entry(id)).transpose()) {
            Ok(entry) => entry,
            Err(err) => {
                log::debug!("lookup of {:?} failed: {}", path, err);
                None
            }
        }
    }

    pub fn entry(&self, id: NodeId) -> Result<FsEntry> {
        let node = self.vfs.tree().node(id)?;
        let (kind, length) = if node.is_directory() {
            (EntryKind::Directory, node.child_count())
        } else {
            (EntryKind::File, node.file_length())
        };
        Ok(FsEntry {
            node: id,
            parent: node.parent(),
            kind,
            name: node.name().to_string(),
            full_path: self.full_path(id)?,
            length,
            sector: node.node_sector(),
            loaded: node.is_loaded(),
        })
    }

    /// 从根往下拼出节点的绝对路径
    pub fn full_path(&self, id: NodeId) -> Result<String> {
        let tree = self.vfs.tree();
        let mut names = Vec::new();
        let mut cursor = id;
        while let Some(parent) = tree.node(cursor)?.parent() {
            names.push(tree.node(cursor)?.name().to_string());
            cursor = parent;
        }
        names.reverse();
        let separator = PATH_SEPARATOR.to_string();
        Ok(format!("{}{}", separator, names.join(separator.as_str())))
    }

    pub fn root_directory(&mut self) -> Result<FsEntry> {
        let root = self.root()?;
        self.entry(root)
    }

    /// 所在目录；根目录返回 `None`
    pub fn parent(&mut self, path: &str) -> Result<Option<FsEntry>> {
        let id = self.resolve_existing(path)?;
        self.entry(id)?.parent.map(|parent| self.entry(parent)).transpose()
    }

    /// 目录内容：目录在前，各自按名字排序
    pub fn list(&mut self, path: &str) -> Result<Vec<FsEntry>> {
        let dir = self.resolve_directory(path)?;
        let mut entries = self
            .vfs
            .tree_mut()
            .get_children(dir)?
            .into_iter()
            .map(|id| self.entry(id))
            .collect::<Result<Vec<_>>>()?;
        entries.sort_by(|a, b| match (a.kind, b.kind) {
            (EntryKind::Directory, EntryKind::File) => std::cmp::Ordering::Less,
            (EntryKind::File, EntryKind::Directory) => std::cmp::Ordering::Greater,
            _ => a.name.cmp(&b.name),
        });
        Ok(entries)
    }

    pub fn sub_directories(&mut self, path: &str) -> Result<Vec<FsEntry>> {
        Ok(self.list(path)?.into_iter().filter(FsEntry::is_directory).collect())
    }

    pub fn files(&mut self, path: &str) -> Result<Vec<FsEntry>> {
        Ok(self.list(path)?.into_iter().filter(FsEntry::is_file).collect())
    }

    pub fn create_directory(&mut self, path: &str, name: &str) -> Result<FsEntry> {
        let dir = self.resolve_directory(path)?;
        let id = self.vfs.tree_mut().create_directory_node(dir, name)?;
        self.entry(id)
    }

    pub fn create_file(&mut self, path: &str, name: &str) -> Result<FsEntry> {
        let dir = self.resolve_directory(path)?;
        let id = self.vfs.tree_mut().create_file_node(dir, name)?;
        self.entry(id)
    }

    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<FsEntry> {
        let id = self.resolve_existing(path)?;
        self.vfs.tree_mut().rename(id, new_name)?;
        self.entry(id)
    }

    pub fn move_entry(&mut self, path: &str, destination: &str) -> Result<FsEntry> {
        let id = self.resolve_existing(path)?;
        let dest = self.resolve_existing(destination)?;
        self.vfs.tree_mut().move_to(id, dest)?;
        self.entry(id)
    }

    pub fn delete(&mut self, path: &str) -> Result<()> {
        let id = self.resolve_existing(path)?;
        self.vfs.tree_mut().delete(id)
    }

    pub fn open(&mut self, path: &str) -> Result<FileStream<'_>> {
        let id = self.resolve_existing(path)?;
        if !self.vfs.tree().node(id)?.is_file() {
            return Err(FileSystemError::NotAFile(path.to_string()));
        }
        Ok(FileStream { fs: self, node: id })
    }

    /// 文件块链所在的扇区
    pub fn blocks(&mut self, path: &str) -> Result<Vec<Lba>> {
        let id = self.resolve_existing(path)?;
        self.vfs.tree_mut().block_addresses(id)
    }

    /// 根所在磁盘的扇区使用情况
    pub fn usage(&self) -> Result<DiskUsage> {
        let drive = self
            .vfs
            .drive("/")
            .ok_or_else(|| FileSystemError::NotMounted(PATH_SEPARATOR.to_string()))?;
        Ok(DiskUsage {
            free_sectors: drive.count_free_sectors()?,
            total_sectors: drive.disk().sector_count(),
            bytes_per_sector: drive.bytes_per_sector(),
            drive_info_sector: drive.drive_info_sector(),
            root_node_at: drive.info().root_node_at,
        })
    }
}

/// 打开的文件；持有 `SimpleFs` 的可变借用直到关闭
#[derive(Debug)]
pub struct FileStream<'a> {
    fs: &'a mut SimpleFs,
    node: NodeId,
}

impl FileStream<'_> {
    pub fn len(&self) -> Result<usize> {
        Ok(self.fs.vfs.tree().node(self.node)?.file_length())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn read(&mut self, index: usize, length: usize) -> Result<Vec<u8>> {
        self.fs.vfs.tree_mut().read(self.node, index, length)
    }

    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let length = self.len()?;
        self.read(0, length)
    }

    pub fn write(&mut self, index: usize, data: &[u8]) -> Result<()> {
        self.fs.vfs.tree_mut().write(self.node, index, data)
    }

    /// 在文件末尾追加
    pub fn append(&mut self, data: &[u8]) -> Result<()> {
        let length = self.len()?;
        self.write(length, data)
    }

    // 每次写入都已落盘，关闭只是归还借用
    pub fn close(self) {}
}
