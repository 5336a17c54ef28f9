use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use once_cell::sync::OnceCell;
use std::path::PathBuf;

const LOG_FILE_BASENAME: &str = "gradebookd";
const MAX_LOG_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_LOG_FILES: usize = 3;

static LOGGER: OnceCell<LoggerHandle> = OnceCell::new();

/// Initializes file logging from GRADEBOOKD_LOG_DIR / GRADEBOOKD_LOG_LEVEL.
/// Logging is optional: when the directory is unset or setup fails the
/// process runs without it. stdout is reserved for responses, so nothing is
/// ever logged there.
pub fn init_from_env() {
    let Some(dir) = std::env::var_os("GRADEBOOKD_LOG_DIR") else {
        return;
    };
    let dir = PathBuf::from(dir);
    let level = std::env::var("GRADEBOOKD_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let result = LOGGER.get_or_try_init(|| {
        std::fs::create_dir_all(&dir)?;
        let handle = Logger::try_with_str(&level)?
            .log_to_file(FileSpec::default().directory(&dir).basename(LOG_FILE_BASENAME))
            .rotate(
                Criterion::Size(MAX_LOG_FILE_SIZE_BYTES),
                Naming::Numbers,
                Cleanup::KeepLogFiles(MAX_LOG_FILES),
            )
            .write_mode(WriteMode::BufferAndFlush)
            .append()
            .start()?;
        Ok::<_, anyhow::Error>(handle)
    });

    match result {
        Ok(_) => {
            log::info!(
                "gradebookd {} started, log_dir={}",
                env!("CARGO_PKG_VERSION"),
                dir.display()
            );
        }
        Err(e) => {
            eprintln!("gradebookd: logging disabled: {}", e);
        }
    }
}
