use std::time::Duration;

/// How long a receive or a correlated query may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Check once and return immediately.
    NonBlocking,
    /// Wait until an answer arrives or the connection closes.
    Blocking,
    /// Wait up to the given duration.
    After(Duration),
}

impl Timeout {
    /// Millisecond sentinel for [`Timeout::NonBlocking`].
    pub const NON_BLOCKING_MS: i64 = 0;
    /// Millisecond sentinel for [`Timeout::Blocking`].
    pub const BLOCKING_MS: i64 = -1;
    pub const DEFAULT: Timeout = Timeout::After(Duration::from_millis(1000));

    /// Maps a millisecond count with the bus sentinels: `0` does not wait,
    /// negative values wait forever.
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            0 => Self::NonBlocking,
            ms if ms < 0 => Self::Blocking,
            ms => Self::After(Duration::from_millis(ms.unsigned_abs())),
        }
    }

    pub fn millis(ms: u64) -> Self {
        Self::from(Duration::from_millis(ms))
    }

    /// Instant at which a wait gives up. `None` waits forever, including
    /// durations too large to represent as an instant.
    pub(crate) fn deadline(&self) -> Option<tokio::time::Instant> {
        match self {
            Self::After(d) => tokio::time::Instant::now().checked_add(*d),
            Self::NonBlocking | Self::Blocking => None,
        }
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        if d.is_zero() {
            Self::NonBlocking
        } else {
            Self::After(d)
        }
    }
}
