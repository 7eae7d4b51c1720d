pub mod command;
pub mod parse;

use crate::{
    config::Config,
    disk::{init::perform_disk_initialization, BlockDevice},
    fs::{Result, SimpleFs},
    shell::{command::execute_command, parse::parse_command},
};
use colored::*;
use crossterm::{
    cursor, execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use indicatif::{ProgressBar, ProgressStyle};
use reedline::{
    DefaultCompleter, DefaultPrompt, DefaultPromptSegment, FileBackedHistory, Reedline, Signal,
};
use std::{
    io::stdout,
    path::PathBuf,
    sync::{mpsc, Arc},
    thread,
};

/// 启动线程发给 shell 的进度消息
pub enum BootProgress {
    Step(&'static str),
    Progress(u64),
    Finished(Result<Booted>),
}

/// 启动完成后交给 shell 的文件系统和底层磁盘
pub struct Booted {
    pub fs: SimpleFs,
    pub disk: Arc<dyn BlockDevice>,
}

/// 一次 shell 会话的状态
pub struct Session {
    pub fs: SimpleFs,
    pub disk: Arc<dyn BlockDevice>,
    pub current_dir: String,
}

pub const COMMANDS: [&str; 17] = [
    "help", "ls", "pwd", "mkdir", "rmdir", "create", "rm", "cd", "read", "write", "stat", "mv",
    "rename", "tree", "df", "format", "exit",
];

pub fn start_shell(config: Config) {
    let Some(booted) = boot(&config) else {
        return;
    };
    welcome();

    let mut session = Session {
        fs: booted.fs,
        disk: booted.disk,
        current_dir: String::from("/"),
    };
    let username = whoami::username();
    let hostname = whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_string());

    println!(
        "{}",
        "Type 'help' for available commands. Use ↑↓ for history, Tab for auto-completion.\n"
            .bright_black()
    );

    // 初始化 reedline
    let history_path = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".minifs_history");
    let mut line_editor = match FileBackedHistory::with_file(100, history_path) {
        Ok(history) => Reedline::create().with_history(Box::new(history)),
        Err(e) => {
            log::warn!("command history disabled: {}", e);
            Reedline::create()
        }
    };

    // 命令补全
    let completer =
        DefaultCompleter::new_with_wordlen(COMMANDS.iter().map(|c| c.to_string()).collect(), 2);
    line_editor = line_editor.with_completer(Box::new(completer));

    loop {
        let prompt = DefaultPrompt::new(
            DefaultPromptSegment::Basic(format!(
                "{}:{}",
                format!("{}@{}", username, hostname).green(),
                session.current_dir.blue()
            )),
            DefaultPromptSegment::Basic("MiniFS".bright_blue().bold().to_string()),
        );

        match line_editor.read_line(&prompt) {
            Ok(Signal::Success(buffer)) => {
                let trimmed = buffer.trim();
                if trimmed.is_empty() {
                    continue;
                }

                match parse_command(trimmed) {
                    Some(cmd) => {
                        if let Err(e) = execute_command(&cmd, &mut session) {
                            println!("{} {}", "❌ Error:".red().bold(), e);
                        }
                        if matches!(cmd, command::Command::Exit) {
                            break;
                        }
                    }
                    None => println!(
                        "{}",
                        "⚠️  Unknown command or missing argument. Type 'help' for command list."
                            .yellow()
                    ),
                }
            }
            Ok(Signal::CtrlC) => {
                println!();
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("{}", "Exiting MiniFS...".yellow());
                break;
            }
            Err(e) => {
                println!("Error reading line: {}", e);
                break;
            }
        }
    }

    // 关机时把镜像刷回宿主机磁盘
    if session.disk.is_on() {
        if let Err(e) = session.disk.turn_off() {
            println!("{} {}", "❌ Failed to flush disk:".red().bold(), e);
        }
    }
    println!("{}", "GoodBye!".bright_yellow());
}

/// 后台线程启动磁盘，前台渲染进度条
fn boot(config: &Config) -> Option<Booted> {
    let _ = execute!(stdout(), Clear(ClearType::All), cursor::MoveTo(0, 0));
    println!("{}", "[MiniFS Booting...]".bright_yellow().bold());

    let (tx, rx) = mpsc::channel();
    let worker_config = config.clone();
    thread::spawn(move || perform_disk_initialization(&worker_config, tx));

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("[{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );

    for message in rx {
        match message {
            BootProgress::Step(step) => pb.println(step),
            BootProgress::Progress(position) => pb.set_position(position),
            BootProgress::Finished(Ok(booted)) => {
                pb.finish_with_message("✅ Ready!");
                return Some(booted);
            }
            BootProgress::Finished(Err(e)) => {
                pb.abandon_with_message("boot failed");
                println!("{} {}", "❌ Error:".red().bold(), e);
                return None;
            }
        }
    }
    None
}

fn welcome() {
    let _ = execute!(
        stdout(),
        Clear(ClearType::All),
        cursor::MoveTo(0, 0),
        SetForegroundColor(Color::Cyan),
        Print(format!("Welcome to MiniFS v{}\n", env!("CARGO_PKG_VERSION"))),
        ResetColor
    );
}
