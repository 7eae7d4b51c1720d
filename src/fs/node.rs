//! 目录树：节点的懒加载缓存与增删改移
//!
//! 所有已加载的节点放在 [`NodeTree`] 这个 arena 里，用 [`NodeId`] 互相引用。
//! 父目录的 `children` 表是子节点唯一的“所有者”，子节点里的 `parent`
//! 只是回指的编号，不持有任何东西。节点的扇区地址就是它在磁盘上的身份，
//! 重命名和移动都不会改变它。

use std::{
    collections::{BTreeMap, HashSet},
    sync::Arc,
};

use crate::{
    disk::Lba,
    fs::{
        block::{self, VirtualBlock},
        config::{DIR_ENTRY_SIZE, MAX_NAME_LEN, PATH_SEPARATOR},
        drive::VirtualDrive,
        error::{FileSystemError, Result},
        sector::{DataSector, DirNode, FileNode, Sector},
    },
};

/// 已加载节点在 arena 中的编号，节点被释放后失效
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

// None 表示尚未加载，Some(空表) 表示已加载但确实为空
#[derive(Debug)]
enum NodeKind {
    Directory {
        sector: DirNode,
        children: Option<BTreeMap<String, NodeId>>, // 子节点名 -> 子节点
    },
    File {
        sector: FileNode,
        blocks: Option<Vec<VirtualBlock>>, // 文件数据块缓存
    },
}

#[derive(Clone, Copy)]
enum NewNode {
    Directory,
    File,
}

/// 一个目录或文件节点扇区的内存缓存
#[derive(Debug)]
pub struct VirtualNode {
    drive: Arc<VirtualDrive>,
    node_sector: Lba,
    parent: Option<NodeId>,
    kind: NodeKind,
}

impl VirtualNode {
    fn from_sector(
        drive: Arc<VirtualDrive>,
        node_sector: Lba,
        sector: Sector,
        parent: Option<NodeId>,
    ) -> Result<Self> {
        let kind = match sector {
            Sector::DirNode(sector) => NodeKind::Directory {
                sector,
                children: None,
            },
            Sector::FileNode(sector) => NodeKind::File {
                sector,
                blocks: None,
            },
            other => {
                return Err(FileSystemError::corrupted_sector(
                    node_sector,
                    &format!("expected a node, found {:?}", other.sector_type()),
                ))
            }
        };
        Ok(Self {
            drive,
            node_sector,
            parent,
            kind,
        })
    }

    pub fn drive(&self) -> &Arc<VirtualDrive> {
        &self.drive
    }

    pub fn node_sector(&self) -> Lba {
        self.node_sector
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Directory { sector, .. } => &sector.name,
            NodeKind::File { sector, .. } => &sector.name,
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, NodeKind::Directory { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File { .. })
    }

    /// 目录的 entry_count，文件恒为 0
    pub fn child_count(&self) -> usize {
        match &self.kind {
            NodeKind::Directory { sector, .. } => sector.entry_count as usize,
            NodeKind::File { .. } => 0,
        }
    }

    /// 文件的 file_size，目录恒为 0
    pub fn file_length(&self) -> usize {
        match &self.kind {
            NodeKind::File { sector, .. } => sector.file_size as usize,
            NodeKind::Directory { .. } => 0,
        }
    }

    /// 子节点表或块链是否已经读入内存
    pub fn is_loaded(&self) -> bool {
        match &self.kind {
            NodeKind::Directory { children, .. } => children.is_some(),
            NodeKind::File { blocks, .. } => blocks.is_some(),
        }
    }

    fn set_name(&mut self, name: &str) {
        match &mut self.kind {
            NodeKind::Directory { sector, .. } => sector.name = name.to_string(),
            NodeKind::File { sector, .. } => sector.name = name.to_string(),
        }
    }

    fn to_sector(&self) -> Sector {
        match &self.kind {
            NodeKind::Directory { sector, .. } => Sector::DirNode(sector.clone()),
            NodeKind::File { sector, .. } => Sector::FileNode(sector.clone()),
        }
    }

    fn commit_node(&self) -> Result<()> {
        self.drive.write_sector(self.node_sector, &self.to_sector())
    }
}

pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) || name.len() > MAX_NAME_LEN {
        return Err(FileSystemError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// 已加载节点的 arena
#[derive(Debug, Default)]
pub struct NodeTree {
    slots: Vec<Option<VirtualNode>>,
    vacant: Vec<usize>,
}

impl NodeTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, id: NodeId) -> Result<&VirtualNode> {
        self.slots
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or_else(|| FileSystemError::InvalidOperation(format!("stale node handle {:?}", id)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut VirtualNode> {
        self.slots
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or_else(|| FileSystemError::InvalidOperation(format!("stale node handle {:?}", id)))
    }

    /// 当前驻留内存的节点数
    #[cfg(test)]
    pub fn loaded_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    fn insert(&mut self, node: VirtualNode) -> NodeId {
        match self.vacant.pop() {
            Some(index) => {
                self.slots[index] = Some(node);
                NodeId(index)
            }
            None => {
                self.slots.push(Some(node));
                NodeId(self.slots.len() - 1)
            }
        }
    }

    pub(crate) fn insert_root(
        &mut self,
        drive: Arc<VirtualDrive>,
        node_sector: Lba,
        sector: DirNode,
    ) -> NodeId {
        self.insert(VirtualNode {
            drive,
            node_sector,
            parent: None,
            kind: NodeKind::Directory {
                sector,
                children: None,
            },
        })
    }

    /// 把节点及其已加载的子树移出内存，不碰磁盘
    pub(crate) fn release(&mut self, id: NodeId) {
        let Some(node) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return;
        };
        self.vacant.push(id.0);
        if let NodeKind::Directory {
            children: Some(children),
            ..
        } = node.kind
        {
            for child in children.into_values() {
                self.release(child);
            }
        }
    }

    fn children(&self, id: NodeId) -> Result<&BTreeMap<String, NodeId>> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Directory {
                children: Some(children),
                ..
            } => Ok(children),
            NodeKind::Directory { children: None, .. } => Err(FileSystemError::InvalidOperation(
                format!("children of {} are not loaded", node.name()),
            )),
            NodeKind::File { .. } => Err(FileSystemError::NotADirectory(node.name().to_string())),
        }
    }

    fn children_mut(&mut self, id: NodeId) -> Result<&mut BTreeMap<String, NodeId>> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Directory {
                children: Some(children),
                ..
            } => Ok(children),
            NodeKind::Directory {
                sector,
                children: None,
            } => Err(FileSystemError::InvalidOperation(format!(
                "children of {} are not loaded",
                sector.name
            ))),
            NodeKind::File { sector, .. } => Err(FileSystemError::NotADirectory(sector.name.clone())),
        }
    }

    pub fn get_children(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        self.load_children(id)?;
        Ok(self.children(id)?.values().copied().collect())
    }

    /// 找不到同名子节点时返回 `Ok(None)`
    pub fn get_child(&mut self, id: NodeId, name: &str) -> Result<Option<NodeId>> {
        self.load_children(id)?;
        Ok(self.children(id)?.get(name).copied())
    }

    // 读目录的数据扇区，按 entry_count 解出子节点地址并逐个读入
    fn load_children(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let (first_data_at, entry_count) = match &node.kind {
            NodeKind::Directory {
                children: Some(_), ..
            } => return Ok(()),
            NodeKind::Directory {
                sector,
                children: None,
            } => (sector.first_data_at, sector.entry_count as usize),
            NodeKind::File { sector, .. } => {
                return Err(FileSystemError::NotADirectory(sector.name.clone()))
            }
        };
        let drive = Arc::clone(&node.drive);

        let data = match drive.read_sector(first_data_at)? {
            Sector::Data(data) => data,
            other => {
                return Err(FileSystemError::corrupted_sector(
                    first_data_at,
                    &format!("expected directory entries, found {:?}", other.sector_type()),
                ))
            }
        };
        if entry_count * DIR_ENTRY_SIZE > data.data.len() {
            return Err(FileSystemError::corrupted_sector(
                first_data_at,
                &format!("entry count {} does not fit in one data sector", entry_count),
            ));
        }

        // 只信 entry_count，不找结束标记
        let mut seen = HashSet::new();
        let mut loaded: BTreeMap<String, VirtualNode> = BTreeMap::new();
        for entry in data.data.chunks_exact(DIR_ENTRY_SIZE).take(entry_count) {
            let address = Lba::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            if address == 0 {
                return Err(FileSystemError::corrupted_sector(
                    first_data_at,
                    "zero address inside directory entries",
                ));
            }
            if !seen.insert(address) {
                log::warn!(
                    "directory at sector {} lists sector {} twice, skipping",
                    first_data_at,
                    address
                );
                continue;
            }

            let child =
                VirtualNode::from_sector(Arc::clone(&drive), address, drive.read_sector(address)?, Some(id))?;
            let name = child.name().to_string();
            if loaded.insert(name.clone(), child).is_some() {
                return Err(FileSystemError::corrupted_sector(
                    first_data_at,
                    &format!("duplicate entry name {:?}", name),
                ));
            }
        }

        let children = loaded
            .into_iter()
            .map(|(name, child)| (name, self.insert(child)))
            .collect::<BTreeMap<_, _>>();
        log::debug!(
            "loaded {} children of directory at sector {}",
            children.len(),
            self.node(id)?.node_sector
        );

        if let NodeKind::Directory { children: slot, .. } = &mut self.node_mut(id)?.kind {
            *slot = Some(children);
        }
        Ok(())
    }

    // 按子节点表顺序打包地址写回数据扇区，再更新 entry_count
    fn commit_children(&mut self, id: NodeId) -> Result<()> {
        let child_ids: Vec<NodeId> = match &self.node(id)?.kind {
            NodeKind::Directory {
                children: Some(children),
                ..
            } => children.values().copied().collect(),
            NodeKind::Directory { children: None, .. } => return Ok(()),
            NodeKind::File { sector, .. } => {
                return Err(FileSystemError::NotADirectory(sector.name.clone()))
            }
        };
        let drive = Arc::clone(&self.node(id)?.drive);

        let mut payload = vec![0u8; drive.bytes_per_data_sector()];
        if child_ids.len() * DIR_ENTRY_SIZE > payload.len() {
            return Err(FileSystemError::DirectoryFull(self.node(id)?.name().to_string()));
        }
        for (slot, child) in payload.chunks_exact_mut(DIR_ENTRY_SIZE).zip(&child_ids) {
            slot.copy_from_slice(&self.node(*child)?.node_sector.to_le_bytes());
        }

        let VirtualNode {
            node_sector,
            kind: NodeKind::Directory { sector, .. },
            ..
        } = self.node_mut(id)?
        else {
            return Err(FileSystemError::InvalidOperation("node kind changed".to_string()));
        };
        drive.write_sector(
            sector.first_data_at,
            &Sector::Data(DataSector::new(drive.bytes_per_sector(), 0, &payload)),
        )?;
        sector.entry_count = child_ids.len() as u32;
        drive.write_sector(*node_sector, &Sector::DirNode(sector.clone()))?;

        log::debug!(
            "committed {} entries of directory {:?}",
            child_ids.len(),
            sector.name
        );
        Ok(())
    }

    // 子节点表必须已加载
    fn ensure_room(&self, dir: NodeId, name: &str) -> Result<()> {
        let children = self.children(dir)?;
        if children.contains_key(name) {
            return Err(FileSystemError::AlreadyExists(name.to_string()));
        }
        let capacity = self.node(dir)?.drive.bytes_per_data_sector() / DIR_ENTRY_SIZE;
        if children.len() >= capacity {
            return Err(FileSystemError::DirectoryFull(self.node(dir)?.name().to_string()));
        }
        Ok(())
    }

    pub fn create_directory_node(&mut self, id: NodeId, name: &str) -> Result<NodeId> {
        self.create_node(id, name, NewNode::Directory)
    }

    pub fn create_file_node(&mut self, id: NodeId, name: &str) -> Result<NodeId> {
        self.create_node(id, name, NewNode::File)
    }

    fn create_node(&mut self, id: NodeId, name: &str, kind: NewNode) -> Result<NodeId> {
        let parent = self.node(id)?;
        if !parent.is_directory() {
            return Err(FileSystemError::NotADirectory(parent.name().to_string()));
        }
        validate_name(name)?;
        self.load_children(id)?;
        self.ensure_room(id, name)?;

        // 节点扇区和它的第一个数据扇区必须来自同一次扫描
        let drive = Arc::clone(&self.node(id)?.drive);
        let free = drive.get_next_free_sectors(2)?;
        let (node_at, data_at) = (free[0], free[1]);

        let sector = match kind {
            NewNode::Directory => Sector::DirNode(DirNode {
                name: name.to_string(),
                first_data_at: data_at,
                entry_count: 0,
            }),
            NewNode::File => Sector::FileNode(FileNode {
                name: name.to_string(),
                first_data_at: data_at,
                file_size: 0,
            }),
        };
        drive.write_sector(node_at, &sector)?;
        drive.write_sector(data_at, &Sector::Data(DataSector::empty(drive.bytes_per_sector())))?;

        let child = self.insert(VirtualNode::from_sector(drive, node_at, sector, Some(id))?);
        self.children_mut(id)?.insert(name.to_string(), child);
        self.commit_children(id)?;

        log::debug!("created {:?} at sector {} (data at {})", name, node_at, data_at);
        Ok(child)
    }

    /// 改名只重写本节点扇区；父目录存的是地址，名字变化不影响它
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> Result<()> {
        validate_name(new_name)?;
        let node = self.node(id)?;
        let parent = node.parent.ok_or_else(|| {
            FileSystemError::InvalidOperation("cannot rename the root directory".to_string())
        })?;
        let old_name = node.name().to_string();
        if old_name == new_name {
            return Ok(());
        }

        // 父目录缓存已加载时，键要跟着改
        let parent_node = self.node_mut(parent)?;
        if let NodeKind::Directory {
            children: Some(children),
            ..
        } = &mut parent_node.kind
        {
            if children.contains_key(new_name) {
                return Err(FileSystemError::AlreadyExists(new_name.to_string()));
            }
            if let Some(child) = children.remove(&old_name) {
                children.insert(new_name.to_string(), child);
            }
        }

        let node = self.node_mut(id)?;
        node.set_name(new_name);
        node.commit_node()?;
        log::debug!("renamed {:?} to {:?}", old_name, new_name);
        Ok(())
    }

    /// 先加入新父目录再从旧父目录移除，中途出错时节点至少还挂在一个目录下
    pub fn move_to(&mut self, id: NodeId, destination: NodeId) -> Result<()> {
        let dest = self.node(destination)?;
        if !dest.is_directory() {
            return Err(FileSystemError::DestinationNotDirectory(dest.name().to_string()));
        }
        let node = self.node(id)?;
        let parent = node.parent.ok_or_else(|| {
            FileSystemError::InvalidOperation("cannot move the root directory".to_string())
        })?;
        if !Arc::ptr_eq(&node.drive, &dest.drive) {
            return Err(FileSystemError::InvalidOperation(
                "cannot move between drives".to_string(),
            ));
        }
        if parent == destination {
            return Ok(());
        }

        let mut cursor = Some(destination);
        while let Some(current) = cursor {
            if current == id {
                return Err(FileSystemError::InvalidOperation(format!(
                    "cannot move {} into itself",
                    self.node(id)?.name()
                )));
            }
            cursor = self.node(current)?.parent;
        }

        let name = self.node(id)?.name().to_string();
        self.load_children(destination)?;
        self.ensure_room(destination, &name)?;
        self.children_mut(destination)?.insert(name.clone(), id);
        self.commit_children(destination)?;

        self.load_children(parent)?;
        self.children_mut(parent)?.remove(&name);
        self.commit_children(parent)?;

        self.node_mut(id)?.parent = Some(destination);
        log::debug!("moved {:?} from {:?} to {:?}", name, parent, destination);
        Ok(())
    }

    /// 递归释放内容，再把自己从父目录摘掉并释放自己的扇区
    pub fn delete(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let name = node.name().to_string();
        let parent = node.parent.ok_or_else(|| {
            FileSystemError::InvalidOperation(format!("cannot delete {}: it has no parent", name))
        })?;
        self.node(parent)?;
        let drive = Arc::clone(&node.drive);
        let node_sector = node.node_sector;

        if node.is_file() {
            self.load_blocks(id)?;
            if let NodeKind::File { blocks, .. } = &mut self.node_mut(id)?.kind {
                for block in blocks.take().unwrap_or_default() {
                    block.delete(&drive)?;
                }
            }
        } else {
            for child in self.get_children(id)? {
                self.delete(child)?;
            }
            let first_data_at = match &mut self.node_mut(id)?.kind {
                NodeKind::Directory { sector, children } => {
                    *children = None;
                    sector.first_data_at
                }
                NodeKind::File { .. } => unreachable!("checked is_file above"),
            };
            drive.free_sector(first_data_at)?;
        }

        self.load_children(parent)?;
        self.children_mut(parent)?.remove(&name);
        self.commit_children(parent)?;

        drive.free_sector(node_sector)?;
        self.release(id);
        log::debug!("deleted {:?} at sector {}", name, node_sector);
        Ok(())
    }

    fn load_blocks(&mut self, id: NodeId) -> Result<()> {
        let node = self.node(id)?;
        let (first_data_at, file_size) = match &node.kind {
            NodeKind::File {
                blocks: Some(_), ..
            } => return Ok(()),
            NodeKind::File {
                sector,
                blocks: None,
            } => (sector.first_data_at, sector.file_size as usize),
            NodeKind::Directory { sector, .. } => {
                return Err(FileSystemError::NotAFile(sector.name.clone()))
            }
        };

        let blocks = block::load_chain(&node.drive, first_data_at)?;
        if blocks.len() * node.drive.bytes_per_data_sector() < file_size {
            return Err(FileSystemError::corrupted_sector(
                node.node_sector,
                &format!("{} blocks cannot hold {} bytes", blocks.len(), file_size),
            ));
        }

        if let NodeKind::File { blocks: slot, .. } = &mut self.node_mut(id)?.kind {
            *slot = Some(blocks);
        }
        Ok(())
    }

    /// 文件块链上各数据扇区的地址
    pub fn block_addresses(&mut self, id: NodeId) -> Result<Vec<Lba>> {
        self.load_blocks(id)?;
        match &self.node(id)?.kind {
            NodeKind::File {
                blocks: Some(blocks),
                ..
            } => Ok(blocks.iter().map(VirtualBlock::sector_address).collect()),
            _ => Ok(Vec::new()),
        }
    }

    pub fn read(&mut self, id: NodeId, index: usize, length: usize) -> Result<Vec<u8>> {
        let node = self.node(id)?;
        if !node.is_file() {
            return Err(FileSystemError::NotAFile(node.name().to_string()));
        }
        let file_length = node.file_length();
        if index.checked_add(length).map_or(true, |end| end > file_length) {
            return Err(FileSystemError::OutOfRange {
                index,
                length,
                file_length,
            });
        }
        let block_size = node.drive.bytes_per_data_sector();

        self.load_blocks(id)?;
        match &self.node(id)?.kind {
            NodeKind::File {
                blocks: Some(blocks),
                ..
            } => block::read_block_data(blocks, block_size, index, length),
            _ => Err(FileSystemError::InvalidOperation("blocks not loaded".to_string())),
        }
    }

    /// 写入 `[index, index + data.len())`，需要时先扩展块链；只有文件变长才更新 file_size
    pub fn write(&mut self, id: NodeId, index: usize, data: &[u8]) -> Result<()> {
        let node = self.node(id)?;
        if !node.is_file() {
            return Err(FileSystemError::NotAFile(node.name().to_string()));
        }
        let drive = Arc::clone(&node.drive);
        let file_length = node.file_length();
        let end = index
            .checked_add(data.len())
            .filter(|&end| end <= u32::MAX as usize)
            .ok_or(FileSystemError::OutOfRange {
                index,
                length: data.len(),
                file_length,
            })?;
        let new_length = file_length.max(end);

        self.load_blocks(id)?;
        let VirtualNode {
            node_sector,
            kind:
                NodeKind::File {
                    sector,
                    blocks: Some(blocks),
                },
            ..
        } = self.node_mut(id)?
        else {
            return Err(FileSystemError::InvalidOperation("blocks not loaded".to_string()));
        };

        let was_empty = blocks.is_empty();
        block::extend_blocks(&drive, blocks, file_length, new_length)?;
        block::write_block_data(blocks, drive.bytes_per_data_sector(), index, data)?;
        for block in blocks.iter_mut() {
            block.commit(&drive)?;
        }

        // 块全部落盘之后才更新节点
        let mut node_changed = false;
        if was_empty {
            if let Some(first) = blocks.first() {
                sector.first_data_at = first.sector_address();
                node_changed = true;
            }
        }
        if new_length > file_length {
            sector.file_size = new_length as u32;
            node_changed = true;
        }
        if node_changed {
            drive.write_sector(*node_sector, &Sector::FileNode(sector.clone()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::{BlockDevice, VolatileDisk};
    use crate::fs::test_support::{mounted, random_bytes};
    use crate::fs::vfs::VirtualFs;

    // 直接从磁盘校验：每个目录的 entry_count 等于能解出的子节点数
    fn assert_tree_consistent(disk: &VolatileDisk, dir_at: Lba) -> usize {
        let Sector::DirNode(dir) = Sector::decode(&disk.read_sector(dir_at).unwrap()).unwrap() else {
            panic!("sector {} is not a directory", dir_at);
        };
        let Sector::Data(data) = Sector::decode(&disk.read_sector(dir.first_data_at).unwrap()).unwrap()
        else {
            panic!("directory {:?} has no data sector", dir.name);
        };

        let mut count = 0;
        for entry in data.data.chunks_exact(4).take(dir.entry_count as usize) {
            let address = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            assert_ne!(address, 0);
            match Sector::decode(&disk.read_sector(address).unwrap()).unwrap() {
                Sector::DirNode(_) => {
                    assert_tree_consistent(disk, address);
                }
                Sector::FileNode(_) => {}
                other => panic!("entry {} is {:?}", address, other.sector_type()),
            }
            count += 1;
        }
        assert_eq!(count, dir.entry_count as usize);
        count
    }

    fn sector_is_free(disk: &VolatileDisk, lba: Lba) -> bool {
        Sector::decode(&disk.read_sector(lba).unwrap()).unwrap() == Sector::Free
    }

    fn root(vfs: &VirtualFs) -> NodeId {
        vfs.root_node().unwrap()
    }

    // 从磁盘统计能走到的扇区：节点扇区、目录数据扇区和文件块链
    fn reachable_sectors(disk: &VolatileDisk, dir_at: Lba) -> usize {
        let read = |lba: Lba| Sector::decode(&disk.read_sector(lba).unwrap()).unwrap();
        let Sector::DirNode(dir) = read(dir_at) else {
            panic!("sector {} is not a directory", dir_at);
        };
        let Sector::Data(data) = read(dir.first_data_at) else {
            panic!("directory {:?} has no data sector", dir.name);
        };

        let mut count = 2;
        for entry in data.data.chunks_exact(4).take(dir.entry_count as usize) {
            let address = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
            match read(address) {
                Sector::DirNode(_) => count += reachable_sectors(disk, address),
                Sector::FileNode(file) => {
                    count += 1;
                    let mut next = file.first_data_at;
                    while next != 0 {
                        let Sector::Data(block) = read(next) else {
                            panic!("file {:?} links to non-data sector {}", file.name, next);
                        };
                        count += 1;
                        next = block.next_sector_at;
                    }
                }
                other => panic!("entry {} is {:?}", address, other.sector_type()),
            }
        }
        count
    }

    fn free_sectors(disk: &VolatileDisk) -> usize {
        (0..disk.sector_count())
            .filter(|&lba| sector_is_free(disk, lba))
            .count()
    }

    fn is_within(tree: &NodeTree, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = tree.node(current).unwrap().parent();
        }
        false
    }

    #[test]
    fn new_file_is_found_with_zero_length() {
        let (_disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        let tree = vfs.tree_mut();

        tree.create_file_node(root, "x").unwrap();
        let found = tree.get_child(root, "x").unwrap().unwrap();

        let node = tree.node(found).unwrap();
        assert!(node.is_file());
        assert!(!node.is_directory());
        assert_eq!(node.file_length(), 0);
        assert_eq!(node.name(), "x");
        assert_eq!(tree.get_child(root, "y").unwrap(), None);
    }

    #[test]
    fn children_load_lazily_and_once() {
        let (disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        vfs.tree_mut().create_directory_node(root, "a").unwrap();
        vfs.unmount("/").unwrap();
        vfs.mount(disk, "/").unwrap();

        let root = vfs.root_node().unwrap();
        let tree = vfs.tree_mut();
        assert!(!tree.node(root).unwrap().is_loaded());
        assert_eq!(tree.loaded_count(), 1);

        let first = tree.get_children(root).unwrap();
        let second = tree.get_children(root).unwrap();
        assert!(tree.node(root).unwrap().is_loaded());
        assert_eq!(first, second);
        assert_eq!(tree.loaded_count(), 2);
    }

    #[test]
    fn create_uses_two_fresh_sectors() {
        let (disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        let tree = vfs.tree_mut();

        let dir = tree.create_directory_node(root, "dir1").unwrap();
        let node = tree.node(dir).unwrap();
        assert_eq!(node.node_sector(), 3);
        let Sector::DirNode(sector) = Sector::decode(&disk.read_sector(3).unwrap()).unwrap() else {
            panic!("expected a directory node");
        };
        assert_eq!(sector.first_data_at, 4);
        assert_eq!(sector.entry_count, 0);
        assert_eq!(tree.node(root).unwrap().child_count(), 1);
    }

    #[test]
    fn create_rejects_bad_requests() {
        let (_disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let file = tree.create_file_node(root, "file").unwrap();

        assert!(matches!(
            tree.create_file_node(file, "inner"),
            Err(FileSystemError::NotADirectory(_))
        ));
        assert!(matches!(
            tree.create_directory_node(root, "file"),
            Err(FileSystemError::AlreadyExists(_))
        ));
        let long = "n".repeat(MAX_NAME_LEN + 1);
        for bad in ["", "a/b", long.as_str()] {
            assert!(matches!(
                tree.create_file_node(root, bad),
                Err(FileSystemError::InvalidName(_))
            ));
        }
        assert_eq!(tree.get_children(root).unwrap().len(), 1);
    }

    #[test]
    fn create_fails_cleanly_when_disk_is_full() {
        let (disk, mut vfs) = mounted(4);
        let root = root(&vfs);

        assert!(matches!(
            vfs.tree_mut().create_file_node(root, "x"),
            Err(FileSystemError::OutOfSpace {
                requested: 2,
                available: 1
            })
        ));
        assert!(sector_is_free(&disk, 3));
        assert_eq!(assert_tree_consistent(&disk, 1), 0);
    }

    #[test]
    fn directory_full_is_reported() {
        let (_disk, mut vfs) = mounted(256);
        let root = root(&vfs);
        let tree = vfs.tree_mut();

        // 240 字节的数据扇区最多放 60 个地址
        for i in 0..60 {
            tree.create_file_node(root, &format!("f{}", i)).unwrap();
        }
        assert!(matches!(
            tree.create_file_node(root, "overflow"),
            Err(FileSystemError::DirectoryFull(_))
        ));
        assert_eq!(tree.node(root).unwrap().child_count(), 60);
    }

    #[test]
    fn write_then_read_spans_blocks() {
        let (_disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let file = tree.create_file_node(root, "file1").unwrap();
        let block_size = tree.node(file).unwrap().drive().bytes_per_data_sector();

        let cases = [
            (0, 100),                      // 单块
            (42, 77),                      // 单块中间
            (0, 2 * block_size),           // 恰好两块
            (block_size / 2, 2 * block_size), // 从块中间开始，跨过两个边界
            (275, 700),
        ];
        for (index, length) in cases {
            let data = random_bytes(length);
            tree.write(file, index, &data).unwrap();
            assert_eq!(tree.read(file, index, length).unwrap(), data, "{}+{}", index, length);
        }
        assert_eq!(tree.node(file).unwrap().file_length(), 975);
    }

    #[test]
    fn growth_allocates_exact_block_count() {
        let (disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let file = tree.create_file_node(root, "grow").unwrap();
        let block_size = tree.node(file).unwrap().drive().bytes_per_data_sector();

        tree.write(file, 0, &random_bytes(100)).unwrap();
        assert_eq!(tree.node(file).unwrap().file_length(), 100);
        assert_eq!(tree.block_addresses(file).unwrap().len(), 1);

        // 100 -> 600 字节：ceil(600/240) - ceil(100/240) = 2
        tree.write(file, 100, &random_bytes(500)).unwrap();
        assert_eq!(tree.node(file).unwrap().file_length(), 600);
        assert_eq!(tree.block_addresses(file).unwrap().len(), 3);

        // 完全落在现有长度内，长度和块数都不变
        tree.write(file, 10, &random_bytes(300)).unwrap();
        assert_eq!(tree.node(file).unwrap().file_length(), 600);
        assert_eq!(tree.block_addresses(file).unwrap().len(), 3);

        // 从文件末尾之后开始写，长度为 index + len
        tree.write(file, 3 * block_size + 5, &[7; 10]).unwrap();
        assert_eq!(tree.node(file).unwrap().file_length(), 3 * block_size + 15);
        assert_eq!(tree.block_addresses(file).unwrap().len(), 4);

        let on_disk = tree.node(file).unwrap().node_sector();
        let Sector::FileNode(sector) = Sector::decode(&disk.read_sector(on_disk).unwrap()).unwrap() else {
            panic!("expected a file node");
        };
        assert_eq!(sector.file_size as usize, 3 * block_size + 15);
    }

    #[test]
    fn read_checks_kind_and_range() {
        let (_disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let file = tree.create_file_node(root, "f").unwrap();
        tree.write(file, 0, b"hello").unwrap();

        assert!(matches!(tree.read(root, 0, 1), Err(FileSystemError::NotAFile(_))));
        assert!(matches!(tree.write(root, 0, b"x"), Err(FileSystemError::NotAFile(_))));
        assert!(matches!(
            tree.read(file, 3, 3),
            Err(FileSystemError::OutOfRange {
                index: 3,
                length: 3,
                file_length: 5
            })
        ));
        assert_eq!(tree.read(file, 0, 0).unwrap(), Vec::<u8>::new());
        assert_eq!(tree.read(file, 1, 4).unwrap(), b"ello".to_vec());
    }

    #[test]
    fn deleting_a_file_frees_blocks_and_node() {
        let (disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let free_before = vfs.drive("/").unwrap().count_free_sectors().unwrap();
        let tree = vfs.tree_mut();

        let file = tree.create_file_node(root, "file6").unwrap();
        tree.write(file, 0, &random_bytes(1000)).unwrap();
        let blocks = tree.block_addresses(file).unwrap();
        let node_sector = tree.node(file).unwrap().node_sector();
        assert_eq!(blocks.len(), 5);

        tree.delete(file).unwrap();
        assert!(tree.node(file).is_err());
        assert_eq!(tree.get_child(root, "file6").unwrap(), None);
        for lba in blocks.iter().chain([&node_sector]) {
            assert!(sector_is_free(&disk, *lba), "sector {} still used", lba);
        }
        assert_eq!(
            vfs.drive("/").unwrap().count_free_sectors().unwrap(),
            free_before
        );
        assert_eq!(assert_tree_consistent(&disk, 1), 0);
    }

    #[test]
    fn deleting_a_directory_frees_every_descendant() {
        let (disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let free_before = vfs.drive("/").unwrap().count_free_sectors().unwrap();
        let tree = vfs.tree_mut();

        let keep = tree.create_file_node(root, "keep").unwrap();
        let dir = tree.create_directory_node(root, "dir").unwrap();
        let sub = tree.create_directory_node(dir, "sub").unwrap();
        let a = tree.create_file_node(dir, "a").unwrap();
        let b = tree.create_file_node(sub, "b").unwrap();
        tree.write(a, 0, &random_bytes(700)).unwrap();
        tree.write(b, 0, &random_bytes(300)).unwrap();

        let mut used = vec![
            tree.node(dir).unwrap().node_sector(),
            tree.node(sub).unwrap().node_sector(),
            tree.node(a).unwrap().node_sector(),
            tree.node(b).unwrap().node_sector(),
        ];
        used.extend(tree.block_addresses(a).unwrap());
        used.extend(tree.block_addresses(b).unwrap());

        tree.delete(dir).unwrap();
        for lba in used {
            assert!(sector_is_free(&disk, lba), "sector {} still used", lba);
        }
        for stale in [dir, sub, a, b] {
            assert!(tree.node(stale).is_err());
        }
        assert_eq!(tree.get_children(root).unwrap(), vec![keep]);
        assert_eq!(assert_tree_consistent(&disk, 1), 1);

        tree.delete(keep).unwrap();
        assert_eq!(
            vfs.drive("/").unwrap().count_free_sectors().unwrap(),
            free_before
        );
    }

    #[test]
    fn deleting_the_root_is_invalid() {
        let (disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        vfs.tree_mut().create_file_node(root, "f").unwrap();

        assert!(matches!(
            vfs.tree_mut().delete(root),
            Err(FileSystemError::InvalidOperation(_))
        ));
        assert_eq!(assert_tree_consistent(&disk, 1), 1);
    }

    #[test]
    fn move_preserves_identity_and_content() {
        let (disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let a = tree.create_directory_node(root, "a").unwrap();
        let b = tree.create_directory_node(root, "b").unwrap();
        let file = tree.create_file_node(a, "data").unwrap();
        let content = random_bytes(600);
        tree.write(file, 0, &content).unwrap();
        let sector_before = tree.node(file).unwrap().node_sector();

        tree.move_to(file, b).unwrap();

        assert_eq!(tree.get_child(a, "data").unwrap(), None);
        assert_eq!(tree.get_child(b, "data").unwrap(), Some(file));
        assert_eq!(tree.node(file).unwrap().parent(), Some(b));
        assert_eq!(tree.node(file).unwrap().node_sector(), sector_before);
        assert_eq!(tree.read(file, 0, 600).unwrap(), content);
        assert_eq!(tree.node(a).unwrap().child_count(), 0);
        assert_eq!(tree.node(b).unwrap().child_count(), 1);
        assert_tree_consistent(&disk, 1);
    }

    #[test]
    fn move_rejects_bad_destinations() {
        let (_disk, mut vfs) = mounted(128);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let outer = tree.create_directory_node(root, "outer").unwrap();
        let inner = tree.create_directory_node(outer, "inner").unwrap();
        let file = tree.create_file_node(root, "f").unwrap();
        let clash = tree.create_file_node(outer, "f").unwrap();

        assert!(matches!(
            tree.move_to(outer, file),
            Err(FileSystemError::DestinationNotDirectory(_))
        ));
        assert!(matches!(
            tree.move_to(outer, inner),
            Err(FileSystemError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.move_to(outer, outer),
            Err(FileSystemError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.move_to(root, outer),
            Err(FileSystemError::InvalidOperation(_))
        ));
        assert!(matches!(
            tree.move_to(file, outer),
            Err(FileSystemError::AlreadyExists(_))
        ));
        assert_eq!(tree.get_child(outer, "f").unwrap(), Some(clash));

        // 移到当前父目录什么都不做
        tree.move_to(file, root).unwrap();
        assert_eq!(tree.get_child(root, "f").unwrap(), Some(file));
    }

    #[test]
    fn rename_then_find_by_new_name() {
        let (disk, mut vfs) = mounted(64);
        let root = root(&vfs);
        let tree = vfs.tree_mut();
        let dir = tree.create_directory_node(root, "dir1").unwrap();
        tree.create_file_node(root, "other").unwrap();

        tree.rename(dir, "newdir1").unwrap();
        assert_eq!(tree.get_child(root, "newdir1").unwrap(), Some(dir));
        assert_eq!(tree.get_child(root, "dir1").unwrap(), None);
        assert_eq!(tree.node(dir).unwrap().name(), "newdir1");

        assert!(matches!(
            tree.rename(dir, "other"),
            Err(FileSystemError::AlreadyExists(_))
        ));
        assert!(matches!(
            tree.rename(dir, "bad/name"),
            Err(FileSystemError::InvalidName(_))
        ));
        assert!(matches!(
            tree.rename(root, "x"),
            Err(FileSystemError::InvalidOperation(_))
        ));

        // 重新挂载后名字来自节点扇区
        vfs.unmount("/").unwrap();
        vfs.mount(disk.clone(), "/").unwrap();
        let root = vfs.root_node().unwrap();
        let tree = vfs.tree_mut();
        assert!(tree.get_child(root, "newdir1").unwrap().is_some());
        assert!(tree.get_child(root, "dir1").unwrap().is_none());
        assert_tree_consistent(&disk, 1);
    }

    #[test]
    fn mixed_operations_keep_entry_counts_consistent() {
        let (disk, mut vfs) = mounted(256);
        let root = root(&vfs);
        let tree = vfs.tree_mut();

        let dir1 = tree.create_directory_node(root, "dir1").unwrap();
        let dir2 = tree.create_directory_node(root, "dir2").unwrap();
        tree.create_directory_node(dir2, "dir3").unwrap();
        tree.create_directory_node(dir1, "dir4").unwrap();
        tree.create_directory_node(dir2, "dir5").unwrap();
        let file1 = tree.create_file_node(dir1, "file1").unwrap();
        tree.create_file_node(dir1, "file2").unwrap();
        let file3 = tree.create_file_node(dir2, "file3").unwrap();
        assert_tree_consistent(&disk, 1);

        tree.rename(dir1, "newdir1").unwrap();
        tree.move_to(dir1, dir2).unwrap();
        tree.move_to(file3, root).unwrap();
        tree.write(file1, 0, &random_bytes(300)).unwrap();
        assert_tree_consistent(&disk, 1);

        tree.delete(dir1).unwrap();
        assert_eq!(assert_tree_consistent(&disk, 1), 2);
        let names: Vec<_> = tree
            .get_children(dir2)
            .unwrap()
            .into_iter()
            .map(|id| tree.node(id).unwrap().name().to_string())
            .collect();
        assert_eq!(names, vec!["dir3", "dir5"]);
    }

    #[test]
    fn random_operation_sequences_keep_tree_consistent() {
        use rand::{seq::SliceRandom, Rng};

        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let (disk, mut vfs) = mounted(512);
            let total = disk.sector_count() as usize;
            let root = root(&vfs);
            let tree = vfs.tree_mut();
            let mut dirs = vec![root];
            let mut files = Vec::new();

            for step in 0..80 {
                let name = format!("n{}", step);
                let candidates: Vec<NodeId> = dirs[1..].iter().chain(&files).copied().collect();
                match rng.gen_range(0..8) {
                    0 | 1 => {
                        let parent = *dirs.choose(&mut rng).unwrap();
                        dirs.push(tree.create_directory_node(parent, &name).unwrap());
                    }
                    2 | 3 => {
                        let parent = *dirs.choose(&mut rng).unwrap();
                        files.push(tree.create_file_node(parent, &name).unwrap());
                    }
                    4 => {
                        if let Some(&file) = files.choose(&mut rng) {
                            let at = rng.gen_range(0..=tree.node(file).unwrap().file_length());
                            let data = random_bytes(rng.gen_range(1..600));
                            tree.write(file, at, &data).unwrap();
                            assert_eq!(tree.read(file, at, data.len()).unwrap(), data);
                        }
                    }
                    5 => {
                        if let Some(&id) = candidates.choose(&mut rng) {
                            tree.rename(id, &name).unwrap();
                            assert_eq!(tree.node(id).unwrap().name(), name);
                        }
                    }
                    6 => {
                        if let Some(&id) = candidates.choose(&mut rng) {
                            let destination = *dirs.choose(&mut rng).unwrap();
                            match tree.move_to(id, destination) {
                                Ok(()) => {
                                    let moved = tree.node(id).unwrap().name().to_string();
                                    assert_eq!(tree.get_child(destination, &moved).unwrap(), Some(id));
                                }
                                Err(FileSystemError::InvalidOperation(_)) => {
                                    assert!(is_within(tree, destination, id))
                                }
                                Err(err) => panic!("unexpected move error: {}", err),
                            }
                        }
                    }
                    _ => {
                        if let Some(&id) = candidates.choose(&mut rng) {
                            // 删除后子树里的编号会被回收，先从候选里去掉
                            dirs.retain(|&d| !is_within(tree, d, id));
                            files.retain(|&f| !is_within(tree, f, id));
                            tree.delete(id).unwrap();
                        }
                    }
                }

                assert_tree_consistent(&disk, 1);
                // 0 号扇区是驱动器信息，其余扇区要么可达要么空闲
                assert_eq!(1 + reachable_sectors(&disk, 1) + free_sectors(&disk), total);
            }
        }
    }
}
