use crate::{config::Config, shell::start_shell};

mod config;
mod disk;
mod fs;
mod logging;
mod shell;
mod utils;

fn main() {
    let config = Config::from_env();
    logging::init(config.log_level);
    start_shell(config);
}
