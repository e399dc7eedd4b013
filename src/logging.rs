use std::any::Any;
use std::path::Path;

pub const LOG_FILE_BASENAME: &str = "daytodo";
pub const LOG_FILE_SUFFIX: &str = "log";
pub const LOG_ROTATE_SIZE_BYTES: u64 = 100 * 1024 * 1024;
pub const LOG_ROTATE_KEEP_FILES: usize = 30;
pub const LOG_ENV: &str = "DAYTODO_LOG";

/// Picks the logger spec: `DAYTODO_LOG`, then `RUST_LOG`, then the build default.
fn log_spec(own: Option<String>, rust_log: Option<String>) -> String {
    let default_spec = if cfg!(debug_assertions) {
        "warn,daytodo_lib=debug"
    } else {
        "warn,daytodo_lib=info"
    };
    own.filter(|value| !value.trim().is_empty())
        .or_else(|| rust_log.filter(|value| !value.trim().is_empty()))
        .unwrap_or_else(|| default_spec.to_string())
}

/// File logging in the data directory. Stdout carries the host protocol, so
/// debug builds duplicate to stderr only.
pub fn init_logging(data_dir: &Path) -> Result<(), flexi_logger::FlexiLoggerError> {
    use flexi_logger::{
        detailed_format, Cleanup, Criterion, Duplicate, FileSpec, Logger, Naming, WriteMode,
    };

    std::fs::create_dir_all(data_dir)?;

    let spec = log_spec(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());

    Logger::try_with_str(spec)?
        .log_to_file(
            FileSpec::default()
                .directory(data_dir)
                .basename(LOG_FILE_BASENAME)
                .suffix(LOG_FILE_SUFFIX),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(LOG_ROTATE_SIZE_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(LOG_ROTATE_KEEP_FILES),
        )
        .duplicate_to_stderr(if cfg!(debug_assertions) {
            Duplicate::Info
        } else {
            Duplicate::None
        })
        .start()?;

    install_panic_hook();

    log::info!(
        "logger initialized dir={} rotate_size_bytes={} keep_files={}",
        data_dir.display(),
        LOG_ROTATE_SIZE_BYTES,
        LOG_ROTATE_KEEP_FILES
    );
    Ok(())
}

/// Routes panics into the log file before the default stderr report.
fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        let site = match info.location() {
            Some(loc) => format!("{}:{}", loc.file(), loc.line()),
            None => "?".to_string(),
        };
        // Honours RUST_BACKTRACE; disabled captures print a one-line note.
        let trace = std::backtrace::Backtrace::capture();
        log::error!(
            "panic: thread={} at={site} {}\n{trace}",
            thread.name().unwrap_or("unnamed"),
            panic_message(info.payload())
        );
        previous(info);
    }));
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(text) = payload.downcast_ref::<&'static str>() {
        text
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text
    } else {
        "opaque payload"
    }
}
