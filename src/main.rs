use anyhow::Result;
use clap::Parser;
use simplelog::{ColorChoice, Config, LevelFilter, TermLogger, TerminalMode};

use jackal::config::HostConfig;

fn main() -> Result<()> {
    let config = HostConfig::parse();

    let level = if config.trace {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if TermLogger::init(level, Config::default(), TerminalMode::Stderr, ColorChoice::Auto).is_err()
    {
        let _ = simplelog::SimpleLogger::init(level, Config::default());
    }

    jackal::host::run(config)
}
