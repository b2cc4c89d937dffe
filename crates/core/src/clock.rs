//! Clock abstraction for determinism.
//!
//! Components that stamp events take a [`SharedClock`] at construction time
//! instead of reading the system time directly.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

/// Abstraction over system time.
pub trait Clock: Send + Sync {
    /// Returns the current time (UTC).
    fn now(&self) -> DateTime<Utc>;
}

/// Clock handle shared between components.
pub type SharedClock = Arc<dyn Clock>;

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that always returns a fixed point in time.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl FixedClock {
    /// Fixed clock at `millis` since the Unix epoch.
    ///
    /// Out-of-range values clamp to the epoch.
    pub fn at_millis(millis: i64) -> Self {
        let at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or_default();
        Self(at)
    }

    pub fn shared(self) -> SharedClock {
        Arc::new(self)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}
