use crate::domains::logger::{DomainLogger, DynLogger};
use std::sync::Arc;
use tokio::sync::mpsc;

enum Level {
    Info,
    Warn,
    Error,
}

struct LogMessage {
    level: Level,
    msg: String,
}

struct BufferedLogger {
    sender: mpsc::Sender<LogMessage>,
}

impl BufferedLogger {
    fn push(&self, level: Level, msg: &str) {
        // Never blocks the caller; a full buffer drops the message.
        let _ = self.sender.try_send(LogMessage {
            level,
            msg: msg.to_string(),
        });
    }
}

impl DomainLogger for BufferedLogger {
    fn info(&self, msg: &str) {
        self.push(Level::Info, msg);
    }

    fn warn(&self, msg: &str) {
        self.push(Level::Warn, msg);
    }

    fn error(&self, msg: &str) {
        self.push(Level::Error, msg);
    }
}

/// Non-blocking logger for hot paths such as position ingestion. Messages
/// are forwarded to `bridge` from a background task; must be called inside a
/// Tokio runtime.
pub fn init_buffered_logger(bridge: DynLogger, capacity: usize) -> DynLogger {
    let (tx, mut rx) = mpsc::channel::<LogMessage>(capacity.max(1));

    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match message.level {
                Level::Info => bridge.info(&message.msg),
                Level::Warn => bridge.warn(&message.msg),
                Level::Error => bridge.error(&message.msg),
            }
        }
    });

    Arc::new(BufferedLogger { sender: tx })
}
