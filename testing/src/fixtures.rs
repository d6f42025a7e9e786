//! A fully wired core over the in-memory store, plus scenario helpers.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use crate::mocks::{FixedEntropy, MockClock, RecordingNotifier};
use crate::store::InMemoryTicketStore;
use chrono::Duration as ChronoDuration;
use prize_draw_core::allocator::ReservationPolicy;
use prize_draw_core::draw::NotificationPolicy;
use prize_draw_core::environment::{Clock, CoreEnvironment};
use prize_draw_core::retry::RetryPolicy;
use prize_draw_core::service::PrizeDrawCore;
use prize_draw_core::types::{
    Competition, CompetitionId, DrawMethod, OrderId, OwnerId, TicketLimit, TicketNumber, WinnerId,
};
use std::sync::Arc;
use std::time::Duration;

/// Notification retries short enough for tests.
#[must_use]
pub fn fast_notification_policy() -> NotificationPolicy {
    NotificationPolicy {
        retry: RetryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .jitter(false)
            .build(),
        notify_reserves: false,
    }
}

/// Core plus handles on every test double behind it.
#[derive(Debug, Clone)]
pub struct TestHarness {
    /// The store behind the core
    pub store: Arc<InMemoryTicketStore>,
    /// Controllable time
    pub clock: Arc<MockClock>,
    /// Captures winner notifications
    pub notifier: Arc<RecordingNotifier>,
    /// Seeds and claim codes
    pub entropy: Arc<FixedEntropy>,
    /// The core under test
    pub core: PrizeDrawCore,
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHarness {
    /// Default reservation policy, fast notification retries.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policies(ReservationPolicy::default(), fast_notification_policy())
    }

    /// Custom policies and an always-accepting notifier.
    #[must_use]
    pub fn with_policies(reservation: ReservationPolicy, notification: NotificationPolicy) -> Self {
        Self::build(reservation, notification, RecordingNotifier::new())
    }

    /// A notifier that rejects the first `failures` attempts.
    #[must_use]
    pub fn with_failing_notifier(failures: u32) -> Self {
        Self::build(
            ReservationPolicy::default(),
            fast_notification_policy(),
            RecordingNotifier::failing(failures),
        )
    }

    fn build(
        reservation: ReservationPolicy,
        notification: NotificationPolicy,
        notifier: RecordingNotifier,
    ) -> Self {
        let store = Arc::new(InMemoryTicketStore::new());
        let clock = Arc::new(MockClock::default());
        let notifier = Arc::new(notifier);
        let entropy = Arc::new(FixedEntropy::default());

        let env = CoreEnvironment::new(store.clone(), store.clone())
            .with_clock(clock.clone())
            .with_notifier(notifier.clone())
            .with_entropy(entropy.clone());

        Self {
            core: PrizeDrawCore::new(env, reservation, notification),
            store,
            clock,
            notifier,
            entropy,
        }
    }

    /// Seed a live, admin-drawn competition.
    pub async fn live_competition(&self, limit: TicketLimit) -> CompetitionId {
        let competition = Competition::live(limit);
        let id = competition.id;
        self.store.put_competition(competition).await;
        id
    }

    /// Seed a live competition the scheduler draws `draw_in` from now.
    pub async fn automatic_competition(
        &self,
        limit: TicketLimit,
        draw_in: ChronoDuration,
    ) -> CompetitionId {
        let mut competition = Competition::live(limit);
        competition.draw_mode = DrawMethod::Automatic;
        competition.draw_at = Some(self.clock.now() + draw_in);
        let id = competition.id;
        self.store.put_competition(competition).await;
        id
    }

    /// Reserve, bind and pay for `quantity` tickets. Returns the order and
    /// the numbers sold.
    pub async fn sell(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        quantity: u32,
    ) -> (OrderId, Vec<TicketNumber>) {
        let reservation = self
            .core
            .reserve(competition_id, quantity, Some(owner_id))
            .await
            .unwrap();
        let order_id = OrderId::new();
        self.core
            .bind_to_order(competition_id, owner_id, reservation.ticket_numbers, order_id)
            .await
            .unwrap();
        let numbers = self.core.confirm_payment(order_id).await.unwrap();
        (order_id, numbers)
    }

    /// Sell one ticket each to `buyers` distinct owners.
    pub async fn sell_to_many(&self, competition_id: CompetitionId, buyers: usize) -> Vec<OwnerId> {
        let mut owners = Vec::with_capacity(buyers);
        for _ in 0..buyers {
            let owner = OwnerId::new();
            self.sell(competition_id, owner, 1).await;
            owners.push(owner);
        }
        owners
    }

    /// Wait for the background dispatcher to stamp `notified_at`.
    ///
    /// Gives up after a second of wall time.
    pub async fn wait_until_notified(&self, draw_winner: WinnerId) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
        loop {
            let notified = self
                .store
                .winner(draw_winner)
                .await
                .is_some_and(|w| w.notified_at.is_some());
            if notified {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }
}

/// `TicketNumber` from a literal. Panics on zero.
#[must_use]
pub fn n(value: u32) -> TicketNumber {
    TicketNumber::new(value).unwrap()
}

/// `TicketNumber`s from literals.
#[must_use]
pub fn numbers(values: impl IntoIterator<Item = u32>) -> Vec<TicketNumber> {
    values.into_iter().map(n).collect()
}
