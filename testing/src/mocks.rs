//! Deterministic stand-ins for the core's environment traits.

use chrono::{DateTime, Duration, Utc};
use prize_draw_core::environment::{
    Clock, EntropySource, NotifyError, WinnerNotice, WinnerNotifier,
};
use prize_draw_core::types::{ClaimCode, SEED_LEN, Seed};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Fixed clock for deterministic tests
///
/// Always returns the same time, making tests reproducible.
///
/// # Example
///
/// ```
/// use prize_draw_testing::mocks::FixedClock;
/// use prize_draw_core::environment::Clock;
/// use chrono::Utc;
///
/// let clock = FixedClock::new(Utc::now());
/// assert_eq!(clock.now(), clock.now());
/// ```
#[derive(Debug, Clone)]
pub struct FixedClock {
    time: DateTime<Utc>,
}

impl FixedClock {
    /// Create a new fixed clock with the given time
    #[must_use]
    pub const fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time
    }
}

/// The instant every test clock starts at: 2025-01-01 00:00:00 UTC.
#[must_use]
pub fn test_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
}

/// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
#[must_use]
pub fn test_clock() -> FixedClock {
    FixedClock::new(test_epoch())
}

/// Clock that only moves when told to.
///
/// Used to let reservations lapse without sleeping.
#[derive(Debug, Clone)]
pub struct MockClock {
    time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    /// Start at `time`.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Arc::new(Mutex::new(time)),
        }
    }

    /// Move forward.
    #[allow(clippy::unwrap_used)]
    pub fn advance(&self, by: Duration) {
        let mut time = self.time.lock().unwrap();
        *time += by;
    }

    /// Jump to an absolute time.
    #[allow(clippy::unwrap_used)]
    pub fn set(&self, to: DateTime<Utc>) {
        *self.time.lock().unwrap() = to;
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new(test_epoch())
    }
}

impl Clock for MockClock {
    #[allow(clippy::unwrap_used)]
    fn now(&self) -> DateTime<Utc> {
        *self.time.lock().unwrap()
    }
}

/// Entropy with a chosen seed and sequential claim codes.
///
/// Every draw gets the same seed unless [`FixedEntropy::sequential`] is used,
/// in which case the first seed byte counts up per draw.
#[derive(Debug)]
pub struct FixedEntropy {
    seed: [u8; SEED_LEN],
    sequential: bool,
    draws: AtomicU32,
    codes: AtomicU64,
}

impl FixedEntropy {
    /// Always hand out `seed`.
    #[must_use]
    pub const fn new(seed: [u8; SEED_LEN]) -> Self {
        Self {
            seed,
            sequential: false,
            draws: AtomicU32::new(0),
            codes: AtomicU64::new(0),
        }
    }

    /// Distinct seeds per draw, derived from `seed`.
    #[must_use]
    pub const fn sequential(seed: [u8; SEED_LEN]) -> Self {
        Self {
            seed,
            sequential: true,
            draws: AtomicU32::new(0),
            codes: AtomicU64::new(0),
        }
    }
}

impl Default for FixedEntropy {
    fn default() -> Self {
        Self::sequential([0x42; SEED_LEN])
    }
}

impl EntropySource for FixedEntropy {
    fn seed(&self) -> Seed {
        let mut bytes = self.seed;
        if self.sequential {
            let draw = self.draws.fetch_add(1, Ordering::SeqCst);
            bytes[0] = bytes[0].wrapping_add(draw.to_le_bytes()[0]);
        }
        Seed::from_bytes(bytes)
    }

    fn claim_code(&self) -> ClaimCode {
        let n = self.codes.fetch_add(1, Ordering::SeqCst) + 1;
        ClaimCode::new(format!("CLAIM{n:07}"))
    }
}

/// Notifier that records every notice and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<WinnerNotice>>,
    attempts: AtomicU32,
    failures_left: AtomicU32,
    delivered: Notify,
}

impl RecordingNotifier {
    /// Accept every notice.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the first `count` attempts.
    #[must_use]
    pub fn failing(count: u32) -> Self {
        let notifier = Self::default();
        notifier.failures_left.store(count, Ordering::SeqCst);
        notifier
    }

    /// Notices accepted so far.
    #[must_use]
    #[allow(clippy::unwrap_used)]
    pub fn notices(&self) -> Vec<WinnerNotice> {
        self.notices.lock().unwrap().clone()
    }

    /// Delivery attempts, including rejected ones.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` notices have been accepted.
    #[allow(clippy::unwrap_used)]
    pub async fn wait_for(&self, count: usize) -> Vec<WinnerNotice> {
        loop {
            let delivered = self.delivered.notified();
            {
                let notices = self.notices.lock().unwrap();
                if notices.len() >= count {
                    return notices.clone();
                }
            }
            delivered.await;
        }
    }
}

impl WinnerNotifier for RecordingNotifier {
    #[allow(clippy::unwrap_used)]
    fn notify_winner(
        &self,
        notice: WinnerNotice,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
                .is_ok();
            if failing {
                return Err(NotifyError("notification service unavailable".into()));
            }

            self.notices.lock().unwrap().push(notice);
            self.delivered.notify_waiters();
            Ok(())
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use prize_draw_core::types::{CompetitionId, TicketNumber};

    #[test]
    fn mock_clock_advances() {
        let clock = MockClock::default();
        let start = clock.now();
        clock.advance(Duration::minutes(15));
        assert_eq!(clock.now() - start, Duration::minutes(15));
        assert_eq!(test_clock().now(), start);
    }

    #[test]
    fn sequential_entropy_varies_seed_and_codes() {
        let entropy = FixedEntropy::default();
        assert_ne!(entropy.seed(), entropy.seed());
        assert_eq!(entropy.claim_code().as_str(), "CLAIM0000001");
        assert_eq!(entropy.claim_code().as_str(), "CLAIM0000002");

        let fixed = FixedEntropy::new([1; SEED_LEN]);
        assert_eq!(fixed.seed(), fixed.seed());
    }

    #[tokio::test]
    async fn recording_notifier_fails_then_records() {
        let notifier = RecordingNotifier::failing(1);
        let notice = WinnerNotice {
            owner_id: None,
            competition_id: CompetitionId::new(),
            ticket_number: TicketNumber::FIRST,
            claim_code: ClaimCode::new("CLAIM0000001"),
        };

        assert!(notifier.notify_winner(notice.clone()).await.is_err());
        assert!(notifier.notify_winner(notice.clone()).await.is_ok());
        assert_eq!(notifier.attempts(), 2);
        assert_eq!(notifier.wait_for(1).await, vec![notice]);
    }
}
