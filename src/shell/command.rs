use colored::*;
use dialoguer::Confirm;
use indicatif::{ProgressBar, ProgressStyle};
use std::{error::Error, sync::Arc};

use crate::{
    fs::{FileSystemError, FsEntry, SimpleFs},
    shell::{
        parse::{resolve_path, split_parent},
        Session,
    },
    utils::{format_bytes, preview},
};

const PREVIEW_BYTES: usize = 64;

#[derive(Debug)]
pub enum Command {
    Help,
    Ls(Option<String>),
    Pwd,
    Mkdir(String),
    Rmdir(String),
    Create(String),
    Rm(String),
    Cd(String),
    Read(String),
    Write(String, String),
    Stat(String),
    Mv(String, String),
    Rename(String, String),
    Tree(Option<String>),
    Df,
    Format,
    Exit,
}

pub fn execute_command(cmd: &Command, session: &mut Session) -> Result<(), Box<dyn Error>> {
    let path = |arg: &str| resolve_path(&session.current_dir, arg);

    match cmd {
        Command::Help => print_help(),
        Command::Ls(target) => {
            let target = target.as_deref().map_or_else(|| session.current_dir.clone(), path);
            let directories = session.fs.sub_directories(&target)?;
            let files = session.fs.files(&target)?;
            if directories.is_empty() && files.is_empty() {
                println!("{}", "(empty)".bright_black());
            }
            for entry in directories {
                println!("📁  {}/", entry.name.blue().bold());
            }
            for entry in files {
                println!(
                    "📄  {} {}",
                    entry.name,
                    format!("({})", format_bytes(entry.length as u64)).bright_black()
                );
            }
        }
        Command::Pwd => println!("📍 {}", session.current_dir.cyan()),
        Command::Mkdir(name) => {
            let (parent, name) = split_parent(&path(name));
            let entry = session.fs.create_directory(&parent, &name)?;
            println!("✅ Created directory: {}", entry.full_path.green());
        }
        Command::Rmdir(name) => {
            let target = path(name);
            let entry = expect_kind(&mut session.fs, &target, true)?;
            if entry.length > 0 {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "{} contains {} entries. Delete everything inside?",
                        entry.full_path, entry.length
                    ))
                    .default(false)
                    .interact()?;
                if !confirmed {
                    println!("{}", "Cancelled.".bright_black());
                    return Ok(());
                }
            }
            session.fs.delete(&target)?;
            // 当前目录被删掉时回到根目录
            if session.current_dir == entry.full_path
                || session.current_dir.starts_with(&format!("{}/", entry.full_path))
            {
                session.current_dir = String::from("/");
            }
            println!("🗑️  Removed directory: {}", entry.full_path.red());
        }
        Command::Create(name) => {
            let (parent, name) = split_parent(&path(name));
            let entry = session.fs.create_file(&parent, &name)?;
            println!("📝 Created file: {}", entry.full_path.green());
        }
        Command::Rm(name) => {
            let target = path(name);
            let entry = expect_kind(&mut session.fs, &target, false)?;
            session.fs.delete(&target)?;
            println!("❌ Deleted file: {}", entry.full_path.red());
        }
        Command::Cd(target) => {
            let entry = expect_kind(&mut session.fs, &path(target), true)?;
            session.current_dir = entry.full_path;
            println!("📂 Moved to {}", session.current_dir.blue());
        }
        Command::Read(file) => {
            let target = path(file);
            let mut stream = session.fs.open(&target)?;
            if stream.is_empty()? {
                stream.close();
                println!("📖 {} {}", target.cyan(), "(empty file)".bright_black());
                return Ok(());
            }
            let content = stream.read_to_end()?;
            stream.close();
            println!("📖 {} ({})", target.cyan(), format_bytes(content.len() as u64));
            println!("{}", preview(&content, PREVIEW_BYTES));
        }
        Command::Write(file, content) => {
            let target = path(file);
            if session.fs.find(&target).is_none() {
                let (parent, name) = split_parent(&target);
                session.fs.create_file(&parent, &name)?;
            }
            let mut stream = session.fs.open(&target)?;
            stream.append(content.as_bytes())?;
            let length = stream.len()?;
            stream.close();
            println!(
                "✏️  Wrote {} to {} (now {})",
                format_bytes(content.len() as u64),
                target.cyan(),
                format_bytes(length as u64)
            );
        }
        Command::Stat(target) => {
            let target = path(target);
            let entry = if target == "/" {
                session.fs.root_directory()?
            } else {
                session
                    .fs
                    .find(&target)
                    .ok_or_else(|| FileSystemError::NotFound(target.clone()))?
            };
            print_stat(&mut session.fs, &entry)?;
        }
        Command::Mv(source, destination) => {
            let entry = session.fs.move_entry(&path(source), &path(destination))?;
            println!("🚚 Moved to {}", entry.full_path.green());
            refresh_current_dir(session);
        }
        Command::Rename(target, new_name) => {
            let entry = session.fs.rename(&path(target), new_name)?;
            println!("🏷️  Renamed to {}", entry.full_path.green());
            refresh_current_dir(session);
        }
        Command::Tree(target) => {
            let target = target.as_deref().map_or_else(|| session.current_dir.clone(), path);
            let root = if target == "/" {
                session.fs.root_directory()?
            } else {
                expect_kind(&mut session.fs, &target, true)?
            };
            println!("{}", root.full_path.blue().bold());
            print_tree(&mut session.fs, &root.full_path, "")?;
        }
        Command::Df => {
            let usage = session.fs.usage()?;
            let sector = usage.bytes_per_sector as u64;
            println!("{}", "💽 Disk usage".bright_yellow().bold());
            println!(
                "{}: {} sectors x {} B = {}",
                "Total".blue(),
                usage.total_sectors,
                usage.bytes_per_sector,
                format_bytes(usage.total_sectors as u64 * sector)
            );
            println!(
                "{}: {} sectors ({})",
                "Used".blue(),
                usage.used_sectors(),
                format_bytes(usage.used_sectors() as u64 * sector)
            );
            println!(
                "{}: {} sectors ({})",
                "Free".blue(),
                usage.free_sectors,
                format_bytes(usage.free_sectors as u64 * sector)
            );
            println!(
                "{}: drive info at sector {}, root directory at sector {}",
                "Layout".blue(),
                usage.drive_info_sector,
                usage.root_node_at
            );
        }
        Command::Format => format_disk(session)?,
        Command::Exit => println!("{}", "👋 Exiting MiniFS shell...".yellow().bold()),
    }

    Ok(())
}

// 按目录或文件取条目，类型不符时报对应的错误
fn expect_kind(fs: &mut SimpleFs, path: &str, directory: bool) -> Result<FsEntry, FileSystemError> {
    let entry = fs
        .find(path)
        .ok_or_else(|| FileSystemError::NotFound(path.to_string()))?;
    if directory && !entry.is_directory() {
        return Err(FileSystemError::NotADirectory(path.to_string()));
    }
    if !directory && !entry.is_file() {
        return Err(FileSystemError::NotAFile(path.to_string()));
    }
    Ok(entry)
}

// 重命名或移动后当前目录的路径可能变了，无法解析时回到根目录
fn refresh_current_dir(session: &mut Session) {
    if session.fs.find(&session.current_dir).is_none() {
        session.current_dir = String::from("/");
    }
}

fn print_stat(fs: &mut SimpleFs, entry: &FsEntry) -> Result<(), FileSystemError> {
    println!("{}", "📊 Entry Info".bright_yellow().bold());
    println!("{}: {}", "Name".blue(), entry.name);
    println!("{}: {}", "Path".blue(), entry.full_path);
    println!("{}: {}", "Node sector".blue(), entry.sector);
    match fs.parent(&entry.full_path)? {
        Some(parent) => println!("{}: {}", "Parent".blue(), parent.full_path),
        None => println!("{}: {}", "Parent".blue(), "(none)".bright_black()),
    }
    println!(
        "{}: {}",
        "Loaded".blue(),
        if entry.loaded { "yes" } else { "no" }
    );
    if entry.is_directory() {
        println!("{}: Directory", "Type".blue());
        println!("{}: {}", "Entries".blue(), entry.length);
    } else {
        let blocks = fs.blocks(&entry.full_path)?;
        println!("{}: File", "Type".blue());
        println!(
            "{}: {} ({} bytes)",
            "Size".blue(),
            format_bytes(entry.length as u64),
            entry.length
        );
        println!("{}: {} {:?}", "Blocks".blue(), blocks.len(), blocks);
    }
    Ok(())
}

fn print_tree(fs: &mut SimpleFs, path: &str, prefix: &str) -> Result<(), FileSystemError> {
    let entries = fs.list(path)?;
    let count = entries.len();
    for (i, entry) in entries.into_iter().enumerate() {
        let last = i + 1 == count;
        let branch = if last { "└── " } else { "├── " };
        if entry.is_directory() {
            println!("{}{}{}/", prefix, branch, entry.name.blue().bold());
            let child_prefix = format!("{}{}", prefix, if last { "    " } else { "│   " });
            print_tree(fs, &entry.full_path, &child_prefix)?;
        } else {
            println!(
                "{}{}{} {}",
                prefix,
                branch,
                entry.name,
                format!("({})", format_bytes(entry.length as u64)).bright_black()
            );
        }
    }
    Ok(())
}

fn format_disk(session: &mut Session) -> Result<(), Box<dyn Error>> {
    let confirmed = Confirm::new()
        .with_prompt("Formatting erases every file on the disk. Continue?")
        .default(false)
        .interact()?;
    if !confirmed {
        println!("{}", "Cancelled.".bright_black());
        return Ok(());
    }

    println!("💾 Formatting virtual disk...");
    // 上次重新挂载失败时根已经不在了
    if session.fs.is_mounted("/") {
        session.fs.unmount("/")?;
    }

    let pb = ProgressBar::new(session.disk.sector_count() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.green/black}] {pos}/{len} sectors {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    let formatted = SimpleFs::format_with_progress(session.disk.as_ref(), |done, _| {
        pb.set_position(done as u64)
    });

    // 格式化失败也要重新挂载，shell 才能继续使用
    let mounted = session.fs.mount(Arc::clone(&session.disk), "/");
    session.current_dir = String::from("/");
    formatted?;
    mounted?;
    pb.finish_with_message("✅ Disk formatted successfully!");
    Ok(())
}

fn print_help() {
    println!("{}", "📘 MiniFS Commands".bright_cyan().bold());
    println!(
        "{}",
        "
  ls [dir]             List directory contents
  pwd                  Print current path
  mkdir <dir>          Create directory
  rmdir <dir>          Remove directory (asks if not empty)
  create <file>        Create empty file
  rm <file>            Remove file
  cd [dir]             Change directory (default /)
  read <file>          Read file content
  write <file> <str>   Append string to file, creating it if needed
  stat <path>          Show file or directory info
  mv <path> <dir>      Move file or directory into <dir>
  rename <path> <name> Rename file or directory
  tree [dir]           Show directory tree
  df                   Show disk usage
  format               Format virtual disk
  help                 Show this help message
  exit                 Quit the shell
"
        .bright_black()
    );
}
