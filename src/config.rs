use std::time::Duration;

/// Configuration for a packing run.
#[derive(Debug, Clone)]
pub struct PackConfig {
    /// How long the connection waits on a contended input before giving up
    /// (default: effectively forever).
    pub busy_timeout: Duration,

    /// Deflate compression level, 0-9 (default: 9)
    pub compression_level: u32,
}

impl Default for PackConfig {
    fn default() -> Self {
        Self {
            // Contention with a writer should wait, not fail.
            busy_timeout: Duration::from_millis(999_999_999),
            compression_level: 9,
        }
    }
}

impl PackConfig {
    /// Create a config with the default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the busy timeout for contended inputs.
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Set the deflate compression level.
    pub fn compression_level(mut self, level: u32) -> Self {
        self.compression_level = level;
        self
    }
}
