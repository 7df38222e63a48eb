//! Time abstraction layer for testable time-dependent operations
//!
//! The device state machine, flap detection, and alert evaluation all reason
//! about wall-clock windows. This module provides a `TimeProvider` trait so
//! those paths can be driven with a fixed clock in tests while production
//! uses real time, without conditional compilation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::time::sleep as tokio_sleep;

/// Trait for providing time-related functionality
///
/// This allows for dependency injection of time behavior, enabling fast
/// deterministic tests without real-time delays.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Sleep for the specified duration
    async fn sleep(&self, duration: Duration);

    /// Get the current wall-clock time
    #[must_use]
    fn now_utc(&self) -> DateTime<Utc>;

    /// Get the current instant for measuring elapsed time
    #[must_use]
    fn instant(&self) -> Instant;
}

/// Real time provider for production use
#[derive(Debug, Clone, Default)]
pub struct RealTimeProvider;

impl RealTimeProvider {
    /// Creates a new real time provider
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for RealTimeProvider {
    async fn sleep(&self, duration: Duration) {
        tokio_sleep(duration).await;
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Fixed-clock provider for tests
///
/// Sleeps are skipped (capped at 1ms so async operations can still yield)
/// and `now_utc` returns a settable instant, which lets tests replay a
/// sequence of ping cycles at precise timestamps.
#[derive(Debug, Clone)]
pub struct FixedTimeProvider {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedTimeProvider {
    /// Creates a provider frozen at the given instant
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Moves the frozen clock to a new instant
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned, which only happens after a
    /// panic in another test thread holding it.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock mutex poisoned") = now;
    }

    /// Advances the frozen clock by a duration
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned.
    pub fn advance(&self, by: chrono::Duration) {
        let mut guard = self.now.lock().expect("clock mutex poisoned");
        *guard += by;
    }
}

#[async_trait]
impl TimeProvider for FixedTimeProvider {
    async fn sleep(&self, duration: Duration) {
        if duration > Duration::from_millis(1) {
            tokio_sleep(Duration::from_millis(1)).await;
        }
    }

    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock mutex poisoned")
    }

    fn instant(&self) -> Instant {
        Instant::now()
    }
}

/// Type alias for shared time provider
pub type SharedTimeProvider = Arc<dyn TimeProvider>;

/// Create a production time provider
#[must_use]
pub fn production_time_provider() -> SharedTimeProvider {
    Arc::new(RealTimeProvider::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_fixed_time_provider_skips_delays() {
        let provider = FixedTimeProvider::at(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let start = Instant::now();

        provider.sleep(Duration::from_secs(10)).await;

        let elapsed = start.elapsed();
        assert!(
            elapsed < Duration::from_millis(100),
            "Fixed sleep took too long: {elapsed:?}"
        );
    }

    #[test]
    fn test_fixed_time_provider_advances_clock() {
        let base = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let provider = FixedTimeProvider::at(base);
        provider.advance(chrono::Duration::minutes(5));
        assert_eq!(provider.now_utc(), base + chrono::Duration::minutes(5));
    }

    #[test]
    fn test_real_time_provider_reports_current_time() {
        let provider = RealTimeProvider::new();
        let before = Utc::now();
        let reported = provider.now_utc();
        assert!(reported >= before - chrono::Duration::seconds(1));
    }
}
