//! Event callbacks a connection can be configured with: error/message/
//! progress notifications plus a close hook, decoupled from how the host
//! application wants to surface them.

/// Sink for engine-originated notifications. The default,
/// [`TracingEventHandler`], forwards everything to `tracing`; a host
/// embedding this crate can supply its own to route events elsewhere
/// (a UI, a metrics system) without the engine knowing about either.
pub trait EventHandler: Send + Sync {
    fn on_error(&self, error_code: &str, message: &str) {
        let _ = (error_code, message);
    }

    fn on_message(&self, message: &str) {
        let _ = message;
    }

    /// Long-running operation progress (checkpoint, verify, salvage).
    fn on_progress(&self, operation: &str, counter: u64) {
        let _ = (operation, counter);
    }

    fn on_close(&self) {}
}

/// Forwards every callback to `tracing` at a level matching its severity.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

impl EventHandler for TracingEventHandler {
    fn on_error(&self, error_code: &str, message: &str) {
        tracing::error!(error_code, message, "engine error");
    }

    fn on_message(&self, message: &str) {
        tracing::info!(message, "engine message");
    }

    fn on_progress(&self, operation: &str, counter: u64) {
        tracing::debug!(operation, counter, "engine progress");
    }

    fn on_close(&self) {
        tracing::debug!("event handler closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracing_handler_does_not_panic() {
        let handler = TracingEventHandler;
        handler.on_message("hello");
        handler.on_progress("checkpoint", 3);
        handler.on_error("EIO", "disk full");
        handler.on_close();
    }
}
