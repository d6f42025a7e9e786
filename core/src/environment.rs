//! Injected dependencies.
//!
//! Everything the core needs from the outside world (time, randomness, the
//! competition catalogue, winner notification) sits behind a trait so tests
//! can substitute deterministic implementations.

use crate::store::{StoreFuture, TicketStore};
use crate::types::{ClaimCode, Competition, CompetitionId, OwnerId, Seed, TicketNumber};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of draw seeds and claim codes.
pub trait EntropySource: Send + Sync {
    /// A fresh, unpredictable 256-bit seed. Never derived from time or counters.
    fn seed(&self) -> Seed;

    /// A fresh random claim code.
    fn claim_code(&self) -> ClaimCode;
}

/// Operating-system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn seed(&self) -> Seed {
        Seed::generate(&mut OsRng)
    }

    fn claim_code(&self) -> ClaimCode {
        ClaimCode::generate(&mut OsRng)
    }
}

/// Read-only view of the content-management collaborator.
pub trait CompetitionDirectory: Send + Sync {
    /// Ticket limit, status and draw timing of a competition.
    ///
    /// # Errors
    ///
    /// Returns a store error if the lookup fails.
    fn read_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<Competition>>;
}

/// What the notification collaborator needs to tell a winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WinnerNotice {
    /// Winning ticket owner
    pub owner_id: Option<OwnerId>,
    /// Competition
    pub competition_id: CompetitionId,
    /// Winning number
    pub ticket_number: TicketNumber,
    /// Redemption code
    pub claim_code: ClaimCode,
}

/// Notification delivery failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("Winner notification failed: {0}")]
pub struct NotifyError(pub String);

/// Outbound, fire-and-forget winner notification.
pub trait WinnerNotifier: Send + Sync {
    /// Queue a notification for a winner.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the collaborator rejected the request.
    fn notify_winner(
        &self,
        notice: WinnerNotice,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>>;
}

/// Notifier that only logs. Used when no delivery collaborator is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl WinnerNotifier for LoggingNotifier {
    fn notify_winner(
        &self,
        notice: WinnerNotice,
    ) -> Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + '_>> {
        Box::pin(async move {
            tracing::info!(
                competition_id = %notice.competition_id,
                ticket_number = %notice.ticket_number,
                owner_id = ?notice.owner_id,
                "Winner notification queued"
            );
            Ok(())
        })
    }
}

/// Shared dependencies of the allocator, lifecycle manager, draw engine and
/// verifier.
#[derive(Clone)]
pub struct CoreEnvironment {
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Durable store
    pub store: Arc<dyn TicketStore>,
    /// Competition catalogue
    pub competitions: Arc<dyn CompetitionDirectory>,
    /// Winner notification collaborator
    pub notifier: Arc<dyn WinnerNotifier>,
    /// Seeds and claim codes
    pub entropy: Arc<dyn EntropySource>,
}

impl CoreEnvironment {
    /// Production defaults: wall clock, OS entropy, logging notifier.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, competitions: Arc<dyn CompetitionDirectory>) -> Self {
        Self {
            clock: Arc::new(SystemClock),
            store,
            competitions,
            notifier: Arc::new(LoggingNotifier),
            entropy: Arc::new(OsEntropy),
        }
    }

    /// Replace the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the notifier.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn WinnerNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Replace the entropy source.
    #[must_use]
    pub fn with_entropy(mut self, entropy: Arc<dyn EntropySource>) -> Self {
        self.entropy = entropy;
        self
    }
}

impl std::fmt::Debug for CoreEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreEnvironment").finish_non_exhaustive()
    }
}
