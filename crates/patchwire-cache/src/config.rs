use std::time::Duration;

/// Configuration for a [`ResultCache`](crate::ResultCache).
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Deadline applied to every pending read. Default: none.
    pub read_timeout: Option<Duration>,
    /// Cancel an operation once its last subscriber is withdrawn. Default: true.
    pub dispose_when_idle: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            read_timeout: None,
            dispose_when_idle: true,
        }
    }
}

impl CacheConfig {
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    pub fn with_dispose_when_idle(mut self, dispose: bool) -> Self {
        self.dispose_when_idle = dispose;
        self
    }
}
