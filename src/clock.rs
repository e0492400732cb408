//! Time source shared by the cache tiers
//!
//! Every expiration and freshness decision reads the current instant through a
//! [`Clock`], so tests can move time forward without sleeping.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};

/// Source of the current instant
pub trait Clock: Send + Sync + Debug {
    /// Returns the current time in UTC
    fn now(&self) -> DateTime<Utc>;
}

/// Clock handle shared between stores
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns the system clock as a shared handle
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// `at + by`, saturating at the representable range instead of panicking
pub fn saturating_add(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_add_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// `at - by`, saturating at the representable range instead of panicking
pub fn saturating_sub(at: DateTime<Utc>, by: Duration) -> DateTime<Utc> {
    at.checked_sub_signed(by).unwrap_or(if by < Duration::zero() {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

/// A clock that only moves when told to
///
/// Clones share the same instant, so a test can hand one clone to a store and
/// advance the other.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Creates a clock frozen at the current wall-clock time
    ///
    /// Truncated to whole milliseconds, the precision the local store keeps.
    pub fn starting_now() -> Self {
        Self::new(Utc::now().trunc_subsecs(3))
    }

    /// Moves the clock forward (or backward, for negative durations)
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }

    /// Pins the clock to an exact instant
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }

    /// Returns this clock as a shared handle
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
