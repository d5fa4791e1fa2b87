//! Injected logging context.
//!
//! Components never reach for a process-wide logger object. Each one is handed
//! a [`LogContext`] naming where it runs (tile, worker, collector) and emits
//! through the `log` facade with that scope prefixed. Installing a backend is
//! left to the binaries.

use std::fmt;
use std::sync::Arc;

use log::Level;

pub const TARGET: &str = "chipmap";

#[derive(Debug, Clone)]
pub struct LogContext {
    scope: Arc<str>,
}

impl LogContext {
    pub fn new(scope: impl Into<String>) -> Self {
        Self { scope: Arc::from(scope.into()) }
    }

    /// A nested context, e.g. `h05v02` → `h05v02/worker-3`.
    pub fn child(&self, name: impl fmt::Display) -> Self {
        Self::new(format!("{}/{}", self.scope, name))
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        log::log!(target: TARGET, level, "[{}] {}", self.scope, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Error, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_scopes_nest_with_slash() {
        let root = LogContext::new("h05v02");
        let worker = root.child("worker-3");
        assert_eq!(worker.scope(), "h05v02/worker-3");
        assert_eq!(root.scope(), "h05v02");
    }
}
