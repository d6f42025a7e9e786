//! Background maintenance: the reclamation sweep, automatic draws and
//! winner notification redelivery.
//!
//! The sweep and the draw poller are safe to run in several processes at
//! once. Reclamation is an idempotent delete, and a draw is recorded at most
//! once per competition by the store, so a losing worker sees `AlreadyDrawn`
//! and moves on. Redelivery may notify a winner twice if two processes pick
//! up the same row; the notifier must tolerate repeats.

use crate::config::SchedulerConfig;
use prize_draw_core::{DrawOrigin, Error, PrizeDrawCore};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Periodic jobs over a [`PrizeDrawCore`].
#[derive(Debug, Clone)]
pub struct Scheduler {
    core: PrizeDrawCore,
    config: SchedulerConfig,
}

impl Scheduler {
    /// Create a scheduler.
    #[must_use]
    pub const fn new(core: PrizeDrawCore, config: SchedulerConfig) -> Self {
        Self { core, config }
    }

    /// Spawn the three loops. Each stops when `shutdown` fires.
    #[must_use]
    pub fn spawn(self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let reclaim = {
            let scheduler = self.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { scheduler.reclaim_loop(shutdown).await })
        };
        let draws = {
            let scheduler = self.clone();
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { scheduler.draw_loop(shutdown).await })
        };
        let redeliver = {
            let shutdown = shutdown.subscribe();
            tokio::spawn(async move { self.redeliver_loop(shutdown).await })
        };
        vec![reclaim, draws, redeliver]
    }

    async fn reclaim_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = ticker(self.config.reclaim_interval_secs);
        info!(
            interval_secs = self.config.reclaim_interval_secs,
            "Reclamation sweep started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Reclamation sweep stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.reclaim_once().await;
                }
            }
        }
    }

    async fn draw_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = ticker(self.config.draw_poll_interval_secs);
        info!(
            interval_secs = self.config.draw_poll_interval_secs,
            "Automatic draw poller started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Automatic draw poller stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.draw_due_once().await;
                }
            }
        }
    }

    async fn redeliver_loop(self, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = ticker(self.config.notify_redeliver_interval_secs);
        info!(
            interval_secs = self.config.notify_redeliver_interval_secs,
            "Notification redelivery started"
        );
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Notification redelivery stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.redeliver_once().await;
                }
            }
        }
    }

    /// Delete every lapsed reservation. Returns the rows reclaimed.
    pub async fn reclaim_once(&self) -> u64 {
        match self.core.reclaim_expired(None).await {
            Ok(0) => 0,
            Ok(reclaimed) => {
                info!(reclaimed, "Reclaimed lapsed reservations");
                reclaimed
            }
            Err(error) => {
                warn!(error = %error, "Reclamation sweep failed");
                0
            }
        }
    }

    /// Run every automatic draw that is due. Returns the draws recorded by
    /// this call.
    pub async fn draw_due_once(&self) -> usize {
        let due = match self.core.due_automatic_draws().await {
            Ok(due) => due,
            Err(error) => {
                warn!(error = %error, "Could not list due draws");
                return 0;
            }
        };

        let mut drawn = 0;
        for competition_id in due {
            match self
                .core
                .run_draw(
                    competition_id,
                    self.config.default_winner_count,
                    DrawOrigin::Scheduler,
                )
                .await
            {
                Ok(outcome) => {
                    info!(
                        competition_id = %competition_id,
                        draw_id = %outcome.draw.id,
                        "Automatic draw recorded"
                    );
                    drawn += 1;
                }
                Err(Error::AlreadyDrawn(_)) => {
                    debug!(competition_id = %competition_id, "Drawn by another worker");
                }
                Err(error) => {
                    warn!(
                        competition_id = %competition_id,
                        code = error.code(),
                        error = %error,
                        "Automatic draw failed"
                    );
                }
            }
        }
        drawn
    }

    /// Retry one batch of winners still waiting for their notification.
    /// Returns how many were delivered.
    pub async fn redeliver_once(&self) -> usize {
        match self
            .core
            .redeliver_notifications(self.config.notify_redeliver_batch)
            .await
        {
            Ok(0) => 0,
            Ok(delivered) => {
                info!(delivered, "Redelivered winner notifications");
                delivered
            }
            Err(error) => {
                warn!(error = %error, "Notification redelivery failed");
                0
            }
        }
    }
}

fn ticker(secs: u64) -> tokio::time::Interval {
    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::Duration as ChronoDuration;
    use prize_draw_core::{OwnerId, TicketLimit};
    use prize_draw_testing::TestHarness;

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            enabled: true,
            reclaim_interval_secs: 1,
            draw_poll_interval_secs: 1,
            default_winner_count: 1,
            notify_max_attempts: 3,
            notify_redeliver_interval_secs: 1,
            notify_redeliver_batch: 10,
        }
    }

    #[tokio::test]
    async fn test_draw_due_once_draws_only_due_competitions() {
        let harness = TestHarness::new();
        let due = harness
            .automatic_competition(TicketLimit::Limited(10), ChronoDuration::minutes(5))
            .await;
        let later = harness
            .automatic_competition(TicketLimit::Limited(10), ChronoDuration::days(2))
            .await;
        harness.sell(due, OwnerId::new(), 2).await;
        harness.sell(later, OwnerId::new(), 2).await;
        harness.clock.advance(ChronoDuration::minutes(10));

        let scheduler = Scheduler::new(harness.core.clone(), config());
        assert_eq!(scheduler.draw_due_once().await, 1);
        assert!(harness.core.draw_for_competition(due).await.unwrap().is_some());
        assert!(harness.core.draw_for_competition(later).await.unwrap().is_none());

        // Nothing left to do on the next tick.
        assert_eq!(scheduler.draw_due_once().await, 0);
    }

    #[tokio::test]
    async fn test_reclaim_once_counts_lapsed_holds() {
        let harness = TestHarness::new();
        let competition = harness.live_competition(TicketLimit::Limited(10)).await;
        harness.core.reserve(competition, 3, None).await.unwrap();
        harness.clock.advance(ChronoDuration::minutes(16));

        let scheduler = Scheduler::new(harness.core.clone(), config());
        assert_eq!(scheduler.reclaim_once().await, 3);
        assert_eq!(scheduler.reclaim_once().await, 0);
    }

    #[tokio::test]
    async fn test_redeliver_once_picks_up_abandoned_notifications() {
        // Fails more often than one dispatch retries, so the draw's own
        // delivery gives up.
        let harness = TestHarness::with_failing_notifier(4);
        let competition = harness.live_competition(TicketLimit::Limited(10)).await;
        harness.sell_to_many(competition, 5).await;
        let outcome = harness
            .core
            .run_draw(competition, 2, DrawOrigin::Admin(None))
            .await
            .unwrap();
        let primary = outcome.winners[0].id;
        assert!(!harness.wait_until_notified(primary).await);
        assert_eq!(harness.notifier.attempts(), 3);

        let scheduler = Scheduler::new(harness.core.clone(), config());
        // One attempt left to fail, then the primary goes through.
        assert_eq!(scheduler.redeliver_once().await, 1);
        assert!(harness.store.winner(primary).await.unwrap().notified_at.is_some());
        // Reserves are not notified by default.
        let reserve = outcome.winners[1].id;
        assert!(harness.store.winner(reserve).await.unwrap().notified_at.is_none());

        assert_eq!(scheduler.redeliver_once().await, 0);
    }

    #[tokio::test]
    async fn test_loops_stop_on_shutdown() {
        let harness = TestHarness::new();
        let (shutdown_tx, _) = broadcast::channel(1);
        let handles = Scheduler::new(harness.core.clone(), config()).spawn(&shutdown_tx);
        assert_eq!(handles.len(), 3);

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            tokio::time::timeout(Duration::from_secs(1), handle)
                .await
                .unwrap()
                .unwrap();
        }
    }
}
