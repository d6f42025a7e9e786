//! Draw Engine.
//!
//! A draw locks the competition, freezes the eligible snapshot, generates a
//! fresh seed, selects winners with [`crate::fairness`] and records the draw,
//! its winners, the WINNER ticket status and the competition's `drawn` status
//! in one transaction. Only after that commit is the primary winner handed to
//! the [`WinnerDispatcher`], so a notification problem can never undo a draw.

use crate::environment::{Clock, CoreEnvironment, WinnerNotice, WinnerNotifier};
use crate::error::{Error, Result};
use crate::fairness::{self, MANUAL_ALGORITHM, RANKING_ALGORITHM, SelectionError};
use crate::lifecycle::rollback;
use crate::metrics;
use crate::retry::{RetryPolicy, retry_with_backoff};
use crate::store::{StoreTransaction, TicketStore};
use crate::types::{
    ClaimCode, Competition, CompetitionId, CompetitionStatus, DrawId, DrawMethod, DrawRecord,
    SnapshotEntry, TicketNumber, Winner, WinnerId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Actor tag recorded for scheduler-issued draws.
pub const SCHEDULER_ACTOR: &str = "scheduler";

/// Who asked for a ranked draw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrawOrigin {
    /// The maintenance scheduler, at the competition's `draw_at`
    Scheduler,
    /// An administrator, optionally identified
    Admin(Option<String>),
}

impl DrawOrigin {
    fn method(&self) -> DrawMethod {
        match self {
            Self::Scheduler => DrawMethod::Automatic,
            Self::Admin(_) => DrawMethod::AdminTriggered,
        }
    }

    fn initiated_by(self) -> Option<String> {
        match self {
            Self::Scheduler => Some(SCHEDULER_ACTOR.to_string()),
            Self::Admin(actor) => actor,
        }
    }
}

/// A recorded draw and its winner rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawOutcome {
    /// The draw record
    pub draw: DrawRecord,
    /// Winners ordered by rank (primary first)
    pub winners: Vec<Winner>,
}

/// Delivery settings for winner notifications.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationPolicy {
    /// Backoff between delivery attempts
    pub retry: RetryPolicy,
    /// Also notify reserve winners
    pub notify_reserves: bool,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::builder()
                .max_attempts(5)
                .initial_delay(Duration::from_millis(500))
                .max_delay(Duration::from_secs(30))
                .build(),
            notify_reserves: false,
        }
    }
}

/// Hands winners to the notification collaborator out of band.
#[derive(Clone)]
pub struct WinnerDispatcher {
    notifier: Arc<dyn WinnerNotifier>,
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
    policy: NotificationPolicy,
}

impl std::fmt::Debug for WinnerDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WinnerDispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl WinnerDispatcher {
    /// Create a dispatcher from the shared environment.
    #[must_use]
    pub fn new(env: &CoreEnvironment, policy: NotificationPolicy) -> Self {
        Self {
            notifier: Arc::clone(&env.notifier),
            store: Arc::clone(&env.store),
            clock: Arc::clone(&env.clock),
            policy,
        }
    }

    /// Deliver in a background task. The draw never waits on this.
    pub fn dispatch(&self, winner: Winner) -> JoinHandle<bool> {
        let dispatcher = self.clone();
        tokio::spawn(async move { dispatcher.deliver(winner).await })
    }

    /// Deliver with retries, then record `notified_at`. Returns whether the
    /// notification was accepted.
    pub async fn deliver(&self, winner: Winner) -> bool {
        let notice = WinnerNotice {
            owner_id: winner.owner_id,
            competition_id: winner.competition_id,
            ticket_number: winner.ticket_number,
            claim_code: winner.claim_code.clone(),
        };

        let delivered = retry_with_backoff(self.policy.retry.clone(), |_| {
            self.notifier.notify_winner(notice.clone())
        })
        .await;

        metrics::record_notification(delivered.is_ok());
        if let Err(error) = delivered {
            tracing::warn!(
                winner_id = %winner.id,
                competition_id = %winner.competition_id,
                error = %error,
                "Winner notification failed, leaving for redelivery"
            );
            return false;
        }

        match self
            .store
            .mark_winner_notified(winner.id, self.clock.now())
            .await
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!(winner_id = %winner.id, "Notified winner no longer exists"),
            Err(error) => tracing::warn!(
                winner_id = %winner.id,
                error = %error,
                "Failed to record winner notification"
            ),
        }
        true
    }

    /// Retry winners whose earlier delivery gave up, at most `limit` of them.
    /// Reserves are included only when the policy notifies reserves.
    /// Returns how many were delivered on this pass.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the pending winners cannot be listed.
    pub async fn redeliver_pending(&self, limit: u32) -> Result<usize> {
        let pending = self
            .store
            .unnotified_winners(!self.policy.notify_reserves, limit)
            .await?;

        let mut delivered = 0;
        for winner in pending {
            if self.deliver(winner).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }
}

/// Runs ranked and manual draws and serves draw records.
#[derive(Debug, Clone)]
pub struct DrawEngine {
    env: CoreEnvironment,
    dispatcher: WinnerDispatcher,
}

impl DrawEngine {
    /// Create a draw engine.
    #[must_use]
    pub fn new(env: CoreEnvironment, notification: NotificationPolicy) -> Self {
        let dispatcher = WinnerDispatcher::new(&env, notification);
        Self { env, dispatcher }
    }

    /// The notification dispatcher used after each draw.
    #[must_use]
    pub const fn dispatcher(&self) -> &WinnerDispatcher {
        &self.dispatcher
    }

    /// Select `num_winners` from the eligible snapshot with the keyed-hash
    /// ranking and record the draw.
    ///
    /// # Errors
    ///
    /// - `Validation`: `num_winners` is zero
    /// - `CompetitionNotFound`
    /// - `AlreadyDrawn` / `NotDrawable`
    /// - `InsufficientEntries`: fewer eligible tickets than winners
    /// - `Storage`: nothing was recorded
    #[tracing::instrument(skip(self, origin), fields(competition_id = %competition_id))]
    pub async fn run_draw(
        &self,
        competition_id: CompetitionId,
        num_winners: u32,
        origin: DrawOrigin,
    ) -> Result<DrawOutcome> {
        if num_winners == 0 {
            return Err(Error::validation("at least one winner must be drawn"));
        }

        let method = origin.method();
        let plan = DrawPlan {
            competition_id,
            method,
            initiated_by: origin.initiated_by(),
            notes: None,
            selection: Selection::Ranked(num_winners),
        };
        self.execute(plan).await
    }

    /// Record an operator-designated winner without ranking.
    ///
    /// The designated ticket must be ACTIVE and valid. The record keeps the
    /// usual shape: a fresh seed and a one-entry snapshot equal to the result.
    ///
    /// # Errors
    ///
    /// - `Validation`: the ticket is not an eligible entry
    /// - `CompetitionNotFound`
    /// - `AlreadyDrawn` / `NotDrawable`
    /// - `Storage`: nothing was recorded
    #[tracing::instrument(skip(self, notes, initiated_by), fields(competition_id = %competition_id))]
    pub async fn run_manual_draw(
        &self,
        competition_id: CompetitionId,
        ticket_number: TicketNumber,
        notes: Option<String>,
        initiated_by: Option<String>,
    ) -> Result<DrawOutcome> {
        let plan = DrawPlan {
            competition_id,
            method: DrawMethod::Manual,
            initiated_by,
            notes,
            selection: Selection::Designated(ticket_number),
        };
        self.execute(plan).await
    }

    async fn execute(&self, plan: DrawPlan) -> Result<DrawOutcome> {
        let mut tx = self.env.store.begin().await?;
        let outcome = match self.record_in(tx.as_mut(), plan).await {
            Ok(outcome) => outcome,
            Err(error) => {
                rollback(tx).await;
                return Err(error);
            }
        };
        tx.commit().await?;

        metrics::record_draw(outcome.draw.method.as_str());
        tracing::info!(
            draw_id = %outcome.draw.id,
            method = outcome.draw.method.as_str(),
            algorithm = %outcome.draw.algorithm,
            entries = outcome.draw.snapshot.len(),
            winners = outcome.winners.len(),
            "Draw recorded"
        );

        let notify_count = if self.dispatcher.policy.notify_reserves {
            outcome.winners.len()
        } else {
            1
        };
        for winner in outcome.winners.iter().take(notify_count) {
            drop(self.dispatcher.dispatch(winner.clone()));
        }

        Ok(outcome)
    }

    async fn record_in(&self, tx: &mut dyn StoreTransaction, plan: DrawPlan) -> Result<DrawOutcome> {
        let competition_id = plan.competition_id;
        let competition = tx
            .lock_competition(competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(competition_id))?;
        ensure_drawable(&competition)?;

        let mut snapshot = tx.eligible_snapshot(competition_id).await?;
        snapshot.sort_by_key(|entry| entry.ticket_number);

        let seed = self.env.entropy.seed();
        let (algorithm, snapshot, result) = match plan.selection {
            Selection::Ranked(num_winners) => {
                let result = fairness::select_winners(&seed, &snapshot, num_winners as usize)
                    .map_err(|error| selection_error(competition_id, num_winners, &error))?;
                (RANKING_ALGORITHM, snapshot, result)
            }
            Selection::Designated(number) => {
                let entry = snapshot
                    .into_iter()
                    .find(|entry| entry.ticket_number == number)
                    .ok_or_else(|| {
                        Error::validation(format!(
                            "ticket {number} is not an eligible entry in competition {competition_id}"
                        ))
                    })?;
                (MANUAL_ALGORITHM, vec![entry], vec![entry])
            }
        };

        let now = self.env.clock.now();
        let draw = DrawRecord {
            id: DrawId::new(),
            competition_id,
            seed,
            algorithm: algorithm.to_string(),
            snapshot_fingerprint: fairness::snapshot_fingerprint(&snapshot),
            snapshot,
            result,
            method: plan.method,
            initiated_by: plan.initiated_by,
            notes: plan.notes,
            evidence: Vec::new(),
            created_at: now,
        };

        let winners: Vec<Winner> = draw
            .result
            .iter()
            .zip(0u32..)
            .map(|(entry, rank)| self.winner_row(&draw, entry, rank))
            .collect();

        if let Err(error) = tx.insert_draw(draw.clone()).await {
            if error.is_unique_violation() {
                return Err(Error::AlreadyDrawn(competition_id));
            }
            return Err(error.into());
        }
        tx.insert_winners(winners.clone()).await?;
        tx.mark_tickets_won(draw.result.iter().map(|entry| entry.ticket_id).collect())
            .await?;
        tx.mark_competition_drawn(competition_id, now).await?;

        Ok(DrawOutcome { draw, winners })
    }

    fn winner_row(&self, draw: &DrawRecord, entry: &SnapshotEntry, rank: u32) -> Winner {
        Winner {
            id: WinnerId::new(),
            draw_id: draw.id,
            competition_id: draw.competition_id,
            ticket_id: entry.ticket_id,
            ticket_number: entry.ticket_number,
            owner_id: entry.owner_id,
            rank,
            claim_code: self.env.entropy.claim_code(),
            notified_at: None,
            claimed_at: None,
        }
    }

    /// Load a draw record.
    ///
    /// # Errors
    ///
    /// - `DrawNotFound`
    /// - `Storage`
    pub async fn get_draw(&self, draw_id: DrawId) -> Result<DrawRecord> {
        self.env
            .store
            .load_draw(draw_id)
            .await?
            .ok_or(Error::DrawNotFound(draw_id))
    }

    /// The draw of a competition, if it has been drawn.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the lookup fails.
    pub async fn draw_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Option<DrawRecord>> {
        Ok(self.env.store.draw_for_competition(competition_id).await?)
    }

    /// Winners of a draw ordered by rank.
    ///
    /// # Errors
    ///
    /// - `DrawNotFound`
    /// - `Storage`
    pub async fn winners_for_draw(&self, draw_id: DrawId) -> Result<Vec<Winner>> {
        let mut winners = self.env.store.winners_for_draw(draw_id).await?;
        if winners.is_empty() && self.env.store.load_draw(draw_id).await?.is_none() {
            return Err(Error::DrawNotFound(draw_id));
        }
        winners.sort_by_key(|winner| winner.rank);
        Ok(winners)
    }

    /// Replace the notes and append evidence references. Seed, snapshot and
    /// result are not writable.
    ///
    /// # Errors
    ///
    /// - `Validation`: a blank evidence reference
    /// - `DrawNotFound`
    /// - `Storage`
    #[tracing::instrument(skip(self, notes, evidence), fields(draw_id = %draw_id))]
    pub async fn annotate_draw(
        &self,
        draw_id: DrawId,
        notes: Option<String>,
        evidence: Vec<String>,
    ) -> Result<DrawRecord> {
        let evidence: Vec<String> = evidence.into_iter().map(|e| e.trim().to_string()).collect();
        if evidence.iter().any(String::is_empty) {
            return Err(Error::validation("evidence references must not be blank"));
        }

        let added = evidence.len();
        if !self.env.store.annotate_draw(draw_id, notes, evidence).await? {
            return Err(Error::DrawNotFound(draw_id));
        }
        tracing::info!(evidence_added = added, "Draw annotated");
        self.get_draw(draw_id).await
    }

    /// Redeem a claim code. Each code works once.
    ///
    /// # Errors
    ///
    /// - `WinnerNotFound`: unknown or already used code
    /// - `Storage`
    pub async fn claim_prize(&self, code: ClaimCode) -> Result<Winner> {
        let winner = self
            .env
            .store
            .claim_winner(code, self.env.clock.now())
            .await?
            .ok_or(Error::WinnerNotFound)?;
        tracing::info!(
            winner_id = %winner.id,
            competition_id = %winner.competition_id,
            rank = winner.rank,
            "Prize claimed"
        );
        Ok(winner)
    }

    /// Competitions whose automatic draw is due.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn due_automatic_draws(&self) -> Result<Vec<CompetitionId>> {
        Ok(self
            .env
            .store
            .due_automatic_draws(self.env.clock.now())
            .await?)
    }

    /// Retry undelivered winner notifications. See
    /// [`WinnerDispatcher::redeliver_pending`].
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the pending winners cannot be listed.
    pub async fn redeliver_notifications(&self, limit: u32) -> Result<usize> {
        self.dispatcher.redeliver_pending(limit).await
    }
}

struct DrawPlan {
    competition_id: CompetitionId,
    method: DrawMethod,
    initiated_by: Option<String>,
    notes: Option<String>,
    selection: Selection,
}

enum Selection {
    Ranked(u32),
    Designated(TicketNumber),
}

fn ensure_drawable(competition: &Competition) -> Result<()> {
    match competition.status {
        CompetitionStatus::Drawn => Err(Error::AlreadyDrawn(competition.id)),
        _ if competition.is_drawable() => Ok(()),
        status => Err(Error::NotDrawable {
            competition_id: competition.id,
            reason: format!("status is {}", status.as_str()),
        }),
    }
}

fn selection_error(competition_id: CompetitionId, requested: u32, error: &SelectionError) -> Error {
    match error {
        SelectionError::NotEnoughEntries { available, .. } => Error::InsufficientEntries {
            competition_id,
            requested,
            available: u32::try_from(*available).unwrap_or(u32::MAX),
        },
        SelectionError::NoWinnersRequested => Error::validation(error.to_string()),
        SelectionError::DuplicateEntry(_) => Error::Storage(error.to_string()),
    }
}
