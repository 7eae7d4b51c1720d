use std::sync::{mpsc::Sender, Arc};

use crate::{
    config::Config,
    disk::{BlockDevice, FileDisk, VolatileDisk},
    fs::{Result, SimpleFs},
    shell::{BootProgress, Booted},
};

/// 在后台线程里打开磁盘、必要时格式化、挂载到 `/`，进度通过 `tx` 汇报
pub fn perform_disk_initialization(config: &Config, tx: Sender<BootProgress>) {
    let result = initialize(config, &tx);
    // 接收端已经退出时没有人需要结果
    let _ = tx.send(BootProgress::Finished(result));
}

fn initialize(config: &Config, tx: &Sender<BootProgress>) -> Result<Booted> {
    let step = |message: &'static str| {
        let _ = tx.send(BootProgress::Step(message));
    };

    step("🧠 Initializing virtual disk...");
    let (disk, fresh): (Arc<dyn BlockDevice>, bool) = if config.volatile {
        let disk = VolatileDisk::new(config.sector_count, config.bytes_per_sector);
        (Arc::new(disk), true)
    } else {
        let fresh = !config.disk_path.exists();
        let disk = FileDisk::open(&config.disk_path, config.sector_count, config.bytes_per_sector)?;
        (Arc::new(disk), fresh)
    };
    disk.turn_on()?;
    let _ = tx.send(BootProgress::Progress(10));

    // 内存盘每次都要格式化，格式化很快所以不逐扇区汇报；镜像文件只有新建时才格式化
    if config.volatile {
        step("🔧 Formatting volatile disk...");
        SimpleFs::format(disk.as_ref())?;
    } else if fresh {
        step("🔧 No disk found, formatting new file system...");
        let mut last = 10;
        SimpleFs::format_with_progress(disk.as_ref(), |done, total| {
            let percent = 10 + u64::from(done) * 80 / u64::from(total);
            if percent != last {
                last = percent;
                let _ = tx.send(BootProgress::Progress(percent));
            }
        })?;
    }

    step("⚙️  Mounting file system...");
    let mut fs = SimpleFs::new();
    fs.mount(Arc::clone(&disk), "/")?;
    let _ = tx.send(BootProgress::Progress(100));

    Ok(Booted { fs, disk })
}
