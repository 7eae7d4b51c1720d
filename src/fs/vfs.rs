//! 格式化、挂载与卸载

use std::{collections::HashMap, sync::Arc};

use crate::{
    disk::BlockDevice,
    fs::{
        config::{DRIVE_INFO_SECTOR, MIN_SECTOR_COUNT, PATH_SEPARATOR, ROOT_DATA_SECTOR, ROOT_DIR_SECTOR},
        drive::VirtualDrive,
        error::{FileSystemError, Result},
        node::{NodeId, NodeTree},
        sector::{DataSector, DirNode, DriveInfo, Sector},
    },
};

/// 挂载点表和已加载的目录树；第一块挂载的磁盘必须挂在 `/`
#[derive(Debug, Default)]
pub struct VirtualFs {
    drives: HashMap<String, Arc<VirtualDrive>>,
    tree: NodeTree,
    root: Option<NodeId>,
}

impl VirtualFs {
    pub fn new() -> Self {
        Self {
            drives: HashMap::new(),
            tree: NodeTree::new(),
            root: None,
        }
    }

    pub fn format(disk: &dyn BlockDevice) -> Result<()> {
        Self::format_with_progress(disk, |_, _| {})
    }

    /// 清空所有扇区后写入驱动器信息、根目录节点和根目录数据扇区
    ///
    /// 每清空一个扇区回调一次 `(已完成, 总数)`。
    pub fn format_with_progress<F>(disk: &dyn BlockDevice, mut on_progress: F) -> Result<()>
    where
        F: FnMut(u32, u32),
    {
        let total = disk.sector_count();
        if total < MIN_SECTOR_COUNT {
            return Err(FileSystemError::InvalidOperation(format!(
                "a disk needs at least {} sectors, this one has {}",
                MIN_SECTOR_COUNT, total
            )));
        }
        let bytes_per_sector = disk.bytes_per_sector();
        log::info!("formatting disk: {} sectors of {} bytes", total, bytes_per_sector);

        let free = Sector::Free.encode(bytes_per_sector)?;
        for lba in 0..total {
            disk.write_sector(lba, &free)?;
            on_progress(lba + 1, total);
        }

        let layout = [
            (
                DRIVE_INFO_SECTOR,
                Sector::DriveInfo(DriveInfo {
                    root_node_at: ROOT_DIR_SECTOR,
                }),
            ),
            (
                ROOT_DIR_SECTOR,
                Sector::DirNode(DirNode {
                    name: PATH_SEPARATOR.to_string(),
                    first_data_at: ROOT_DATA_SECTOR,
                    entry_count: 0,
                }),
            ),
            (
                ROOT_DATA_SECTOR,
                Sector::Data(DataSector::empty(bytes_per_sector)),
            ),
        ];
        for (lba, sector) in &layout {
            disk.write_sector(*lba, &sector.encode(bytes_per_sector)?)?;
        }
        Ok(())
    }

    pub fn mount(&mut self, disk: Arc<dyn BlockDevice>, mount_point: &str) -> Result<()> {
        if self.drives.is_empty() && mount_point != "/" {
            return Err(FileSystemError::InvalidMount(format!(
                "the first disk must be mounted at /, not {}",
                mount_point
            )));
        }
        if self.drives.contains_key(mount_point) {
            return Err(FileSystemError::InvalidMount(format!(
                "{} is already mounted",
                mount_point
            )));
        }

        let info = match Sector::decode(&disk.read_sector(DRIVE_INFO_SECTOR)?)? {
            Sector::DriveInfo(info) => info,
            other => {
                return Err(FileSystemError::corrupted_sector(
                    DRIVE_INFO_SECTOR,
                    &format!("expected drive info, found {:?}; is the disk formatted?", other.sector_type()),
                ))
            }
        };
        let root_at = info.root_node_at;
        let drive = Arc::new(VirtualDrive::new(disk, DRIVE_INFO_SECTOR, info));
        let root_sector = match drive.read_sector(root_at)? {
            Sector::DirNode(dir) => dir,
            other => {
                return Err(FileSystemError::corrupted_sector(
                    root_at,
                    &format!("expected the root directory, found {:?}", other.sector_type()),
                ))
            }
        };

        if mount_point == "/" {
            self.root = Some(self.tree.insert_root(Arc::clone(&drive), root_at, root_sector));
        }
        self.drives.insert(mount_point.to_string(), drive);
        log::info!("mounted drive at {}", mount_point);
        Ok(())
    }

    /// 卸载挂载点；如果它就是根所在的磁盘，整棵已加载的树一并释放
    pub fn unmount(&mut self, mount_point: &str) -> Result<()> {
        let drive = self
            .drives
            .get(mount_point)
            .ok_or_else(|| FileSystemError::NotMounted(mount_point.to_string()))?;

        if let Some(root) = self.root {
            if Arc::ptr_eq(self.tree.node(root)?.drive(), drive) {
                self.tree.release(root);
                self.root = None;
            }
        }
        self.drives.remove(mount_point);
        log::info!("unmounted {}", mount_point);
        Ok(())
    }

    pub fn is_mounted(&self, mount_point: &str) -> bool {
        self.drives.contains_key(mount_point)
    }

    pub fn drive(&self, mount_point: &str) -> Option<&Arc<VirtualDrive>> {
        self.drives.get(mount_point)
    }

    pub fn root_node(&self) -> Option<NodeId> {
        self.root
    }

    pub fn tree(&self) -> &NodeTree {
        &self.tree
    }

    pub fn tree_mut(&mut self) -> &mut NodeTree {
        &mut self.tree
    }
}
