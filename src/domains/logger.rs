use std::sync::Arc;

/// Logging port handed to domain components that must report problems
/// without failing the operation that hit them (for example a best-effort
/// position publish).
pub trait DomainLogger: Send + Sync + 'static {
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
}

pub type DynLogger = Arc<dyn DomainLogger>;

/// Default adapter: forwards to the process-wide `tracing` subscriber.
pub struct TracingLogger {
    component: &'static str,
}

impl TracingLogger {
    pub fn new(component: &'static str) -> Self {
        Self { component }
    }

    pub fn shared(component: &'static str) -> DynLogger {
        Arc::new(Self::new(component))
    }
}

impl DomainLogger for TracingLogger {
    fn info(&self, msg: &str) {
        tracing::info!(component = self.component, "{}", msg);
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(component = self.component, "{}", msg);
    }

    fn error(&self, msg: &str) {
        tracing::error!(component = self.component, "{}", msg);
    }
}
