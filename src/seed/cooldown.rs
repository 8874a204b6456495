//! Rate limiting after failures.
//!
//! Remote sources tend to fail in bursts. After one failure the wrapped
//! source is left alone for a cooldown period; callers that check
//! [`SeedSource::is_worth_trying`] first can fall back or skip instead of
//! waiting on a request that will probably fail again.

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::{SeedError, SeedSource};

/// Default pause after a failed request.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(10);

/// Decorator that refuses requests for a while after the inner source fails.
pub struct CooldownSource<S: SeedSource> {
    inner: S,
    cooldown: Duration,
    earliest_next_attempt: Mutex<Option<Instant>>,
}

impl<S: SeedSource> CooldownSource<S> {
    /// Wraps `inner` with the default cooldown.
    pub fn new(inner: S) -> Self {
        Self::with_cooldown(inner, DEFAULT_COOLDOWN)
    }

    /// Wraps `inner` with a custom cooldown.
    pub fn with_cooldown(inner: S, cooldown: Duration) -> Self {
        Self {
            inner,
            cooldown,
            earliest_next_attempt: Mutex::new(None),
        }
    }

    /// Time left before the next attempt is allowed.
    pub fn remaining_cooldown(&self) -> Option<Duration> {
        let earliest = (*self
            .earliest_next_attempt
            .lock()
            .unwrap_or_else(PoisonError::into_inner))?;
        earliest.checked_duration_since(Instant::now())
    }

    /// Returns the wrapped source.
    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SeedSource> SeedSource for CooldownSource<S> {
    fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError> {
        if let Some(remaining) = self.remaining_cooldown() {
            return Err(SeedError::CoolingDown { remaining });
        }
        match self.inner.fill_seed(out) {
            Ok(()) => Ok(()),
            Err(e) => {
                *self
                    .earliest_next_attempt
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(Instant::now() + self.cooldown);
                tracing::warn!(
                    source = self.inner.name(),
                    cooldown_ms = self.cooldown.as_millis() as u64,
                    error = %e,
                    "Seed source failed; cooling down"
                );
                Err(e)
            }
        }
    }

    fn is_worth_trying(&self) -> bool {
        self.remaining_cooldown().is_none() && self.inner.is_worth_trying()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Flaky {
        failing: AtomicBool,
        calls: AtomicUsize,
    }

    impl SeedSource for Flaky {
        fn fill_seed(&self, out: &mut [u8]) -> Result<(), SeedError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(SeedError::GenerationFailed("unreachable".into()));
            }
            out.fill(1);
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[test]
    fn test_success_keeps_source_available() {
        let source = CooldownSource::new(Flaky::default());
        assert_eq!(source.generate_seed(4).unwrap(), vec![1u8; 4]);
        assert!(source.is_worth_trying());
    }

    #[test]
    fn test_failure_starts_cooldown() {
        let flaky = Flaky::default();
        flaky.failing.store(true, Ordering::SeqCst);
        let source = CooldownSource::with_cooldown(flaky, Duration::from_secs(60));

        assert!(matches!(
            source.generate_seed(4),
            Err(SeedError::GenerationFailed(_))
        ));
        assert!(!source.is_worth_trying());

        // Refused without touching the inner source.
        assert!(matches!(
            source.generate_seed(4),
            Err(SeedError::CoolingDown { .. })
        ));
        assert_eq!(source.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cooldown_expires() {
        let flaky = Flaky::default();
        flaky.failing.store(true, Ordering::SeqCst);
        let source = CooldownSource::with_cooldown(flaky, Duration::from_millis(20));
        assert!(source.generate_seed(4).is_err());

        source.inner().failing.store(false, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(40));
        assert!(source.is_worth_trying());
        assert!(source.generate_seed(4).is_ok());
    }
}
