use chrono::Local;
use colored::*;
use log::{Level, LevelFilter, Log, Metadata, Record};

/// 输出到 stderr，避免和 shell 的 stdout 混在一起
struct ShellLogger;

impl Log for ShellLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level = match record.level() {
            Level::Error => "ERROR".red().bold(),
            Level::Warn => "WARN ".yellow().bold(),
            Level::Info => "INFO ".blue(),
            Level::Debug => "DEBUG".green(),
            Level::Trace => "TRACE".bright_black(),
        };
        eprintln!(
            "{} {} [{}] {}",
            Local::now().format("%H:%M:%S%.3f").to_string().bright_black(),
            level,
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) {
    static LOGGER: ShellLogger = ShellLogger;
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}
