//! Dual-sink structured logging for the proxy: human-readable lines to
//! stdout and to a rotated file under `--log-dir`, `fern` + `chrono` style.

use std::fs;
use std::path::Path;

use anyhow::Result;
use log::LevelFilter;

pub fn setup_logging(log_dir: &Path, debug: bool) -> Result<()> {
    fs::create_dir_all(log_dir)?;

    let log_file_name = format!("wampproxy_{}.log", chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"));
    let log_path = log_dir.join(log_file_name);
    let level = if debug { LevelFilter::Debug } else { LevelFilter::Info };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}
