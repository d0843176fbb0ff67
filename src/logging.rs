use std::path::PathBuf;

use anyhow::Context;
use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming};

use crate::config;
use crate::embeddings::cache::dirs_home;

pub fn init_logging() -> anyhow::Result<()> {
    let log_dir = log_dir()?;

    // File keeps everything at debug; stderr only sees warnings and errors.
    // stdout carries protocol frames and must never receive log output.
    Logger::try_with_str("debug")?
        .log_to_file(FileSpec::default().directory(log_dir).basename(config::logging::LOG_FILE_NAME))
        .rotate(
            Criterion::Size(config::logging::LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config::logging::LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(Duplicate::Warn)
        .format(flexi_logger::detailed_format)
        .start()
        .context("failed to start logger")?;

    log::info!("{}", "=".repeat(60));
    log::info!("Embedding helper starting");
    log::info!("Version: {}", config::HOST_VERSION);
    log::info!("Platform: {}", std::env::consts::OS);
    log::info!("{}", "=".repeat(60));

    Ok(())
}

fn log_dir() -> anyhow::Result<PathBuf> {
    let dir = match std::env::var(config::env::LOG_DIR).ok().filter(|v| !v.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => dirs_home()
            .context("cannot determine home directory for logs")?
            .join(config::logging::LOG_DIR_REL),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("failed creating log dir {}", dir.display()))?;
    Ok(dir)
}
