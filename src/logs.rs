use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    {ContentLimit, FileRotate},
};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, TermLogger, TerminalMode, WriteLogger,
};

static INITIALIZED: AtomicBool = AtomicBool::new(false);

pub fn log_file_path(log_dir: &str) -> PathBuf {
    Path::new(log_dir).join("logs/main.log")
}

/// Everything from `Info` up goes to a rotating file under `log_dir`, warnings
/// and errors also go to stderr. Can only take effect once per process.
pub fn init(log_dir: &str) -> Result<()> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        warn!("[logs] logger already initialized, ignoring {}", log_dir);
        return Ok(());
    }
    let log = FileRotate::new(
        log_file_path(log_dir),
        AppendTimestamp::default(FileLimit::MaxFiles(3)),
        ContentLimit::Lines(1000),
        Compression::None,
        #[cfg(unix)]
        None,
    );
    let config = ConfigBuilder::new().set_time_format_rfc3339().build();
    let result = CombinedLogger::init(vec![
        WriteLogger::new(LevelFilter::Info, config.clone(), log),
        TermLogger::new(
            LevelFilter::Warn,
            config,
            TerminalMode::Stderr,
            ColorChoice::Never,
        ),
    ]);
    if let Err(e) = result {
        // someone else (e.g. a test harness) installed a logger first
        INITIALIZED.store(false, Ordering::SeqCst);
        bail!("failed to install logger: {}", e);
    }
    info!("[logs] logging to {}", log_file_path(log_dir).display());
    Ok(())
}
