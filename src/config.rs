use std::time::Duration;

use crate::error::SqlMiddlewareDbError;

/// Default severity at or above which a server message aborts the batch.
pub const DEFAULT_SEVERITY_THRESHOLD: u8 = 11;

/// Options for a single connection.
///
/// The connection string is opaque to this crate: it is handed to the session backend as-is
/// and never changes once the connection is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub connection_string: String,
    /// Pin naive timestamps as UTC (default) or as local wall-clock time.
    pub use_utc: bool,
    /// Rewrite `?` placeholders to `@Pn` before submission.
    pub translate_placeholders: bool,
    /// Server messages at or above this severity are errors; below it they are info.
    pub error_severity_threshold: u8,
    /// Events buffered per query before the session waits for the consumer.
    pub event_buffer: usize,
    /// Abort a batch that runs longer than this.
    pub query_timeout: Option<Duration>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            connection_string: String::new(),
            use_utc: true,
            translate_placeholders: true,
            error_severity_threshold: DEFAULT_SEVERITY_THRESHOLD,
            event_buffer: 256,
            query_timeout: None,
        }
    }
}

impl ConnectionOptions {
    #[must_use]
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_use_utc(mut self, use_utc: bool) -> Self {
        self.use_utc = use_utc;
        self
    }

    #[must_use]
    pub fn with_translation(mut self, translate_placeholders: bool) -> Self {
        self.translate_placeholders = translate_placeholders;
        self
    }

    #[must_use]
    pub fn with_severity_threshold(mut self, threshold: u8) -> Self {
        self.error_severity_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer;
        self
    }

    #[must_use]
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Options for a [`Pool`](crate::pool::Pool).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub connection: ConnectionOptions,
    /// Maximum number of open sessions.
    pub ceiling: usize,
    /// Sessions opened eagerly by `open` and never reaped.
    pub floor: usize,
    /// Maximum number of logical requests waiting for a session; `None` is unbounded.
    pub max_pending: Option<usize>,
    pub acquire_timeout: Option<Duration>,
    /// Close idle sessions above `floor` after this long.
    pub inactivity_timeout: Option<Duration>,
    /// How often the idle reaper runs and a status event is published.
    pub scan_interval: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            connection: ConnectionOptions::default(),
            ceiling: 4,
            floor: 0,
            max_pending: Some(1024),
            acquire_timeout: None,
            inactivity_timeout: None,
            scan_interval: Duration::from_secs(5),
        }
    }
}

impl PoolOptions {
    #[must_use]
    pub fn new(connection: ConnectionOptions) -> Self {
        Self {
            connection,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_ceiling(mut self, ceiling: usize) -> Self {
        self.ceiling = ceiling;
        self
    }

    #[must_use]
    pub fn with_floor(mut self, floor: usize) -> Self {
        self.floor = floor;
        self
    }

    #[must_use]
    pub fn with_max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }

    #[must_use]
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_inactivity_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Check the options describe a usable pool.
    ///
    /// # Errors
    /// Returns `SqlMiddlewareDbError::ConfigError` for a zero ceiling, a floor above the
    /// ceiling, or a zero scan interval.
    pub fn validate(&self) -> Result<(), SqlMiddlewareDbError> {
        if self.ceiling == 0 {
            return Err(SqlMiddlewareDbError::ConfigError(
                "pool ceiling must be at least 1".to_string(),
            ));
        }
        if self.floor > self.ceiling {
            return Err(SqlMiddlewareDbError::ConfigError(format!(
                "pool floor {} exceeds ceiling {}",
                self.floor, self.ceiling
            )));
        }
        if self.scan_interval.is_zero() {
            return Err(SqlMiddlewareDbError::ConfigError(
                "scan interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let opts = PoolOptions::new(ConnectionOptions::new("Server=.;Database=master"));
        assert_eq!(opts.ceiling, 4);
        assert_eq!(opts.max_pending, Some(1024));
        assert!(opts.connection.use_utc);
        assert_eq!(opts.connection.error_severity_threshold, 11);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn floor_above_ceiling_is_rejected() {
        let opts = PoolOptions::default().with_ceiling(2).with_floor(3);
        assert!(matches!(opts.validate(), Err(SqlMiddlewareDbError::ConfigError(_))));
    }
}
