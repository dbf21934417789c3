use crate::domains::logger::{DomainLogger, DynLogger};
use chrono::Utc;
use std::sync::Arc;

/// Domain logger that writes through the `log` facade into a `fast_log`
/// file appender.
struct FileLogger {
    component: &'static str,
}

impl DomainLogger for FileLogger {
    fn info(&self, msg: &str) {
        log::info!("{} [{}] {}", Utc::now().to_rfc3339(), self.component, msg);
    }

    fn warn(&self, msg: &str) {
        log::warn!("{} [{}] {}", Utc::now().to_rfc3339(), self.component, msg);
    }

    fn error(&self, msg: &str) {
        log::error!("{} [{}] {}", Utc::now().to_rfc3339(), self.component, msg);
    }
}

/// Installs `fast_log` as the process-wide `log` backend writing to `path`
/// and returns a logger the application can inject. Can only succeed once
/// per process.
pub fn init_file_logger(path: &str, component: &'static str) -> Result<DynLogger, String> {
    fast_log::init(
        fast_log::config::Config::new()
            .file(path)
            .level(log::LevelFilter::Info),
    )
    .map_err(|e| format!("Failed to initialize fast_log: {}", e))?;
    Ok(Arc::new(FileLogger { component }))
}
