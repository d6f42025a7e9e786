//! Storage abstraction for tickets, orders, draws and winners.
//!
//! All cross-worker coordination goes through the store: the
//! `(competition_id, ticket_number)` uniqueness constraint backs reservation
//! allocation, and [`StoreTransaction`] is the explicit begin/commit/rollback
//! boundary for the multi-row transitions (payment promotion, draw recording).
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] (a pinned boxed future) instead of using
//! `async fn` so stores can be shared as `Arc<dyn TicketStore>`. Arguments are
//! taken by value so the returned future only borrows `self`.
//!
//! # Implementations
//!
//! - `PostgresTicketStore` (in `prize-draw-postgres`): production store
//! - `InMemoryTicketStore` (in `prize-draw-testing`): fast, deterministic tests

use crate::types::{
    Competition, CompetitionId, DrawId, DrawRecord, Order, OrderId, OwnerId, SnapshotEntry,
    Ticket, TicketId, TicketNumber, Winner, WinnerId, ClaimCode,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Nothing from the write was kept.
    #[error("Uniqueness conflict on {constraint}")]
    UniqueViolation {
        /// Name of the violated constraint
        constraint: String,
    },

    /// A row the operation depends on does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// Stored data could not be decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Failure injected by a test double.
    #[error("Injected failure: {0}")]
    Injected(String),
}

impl StoreError {
    /// Whether this is a uniqueness conflict.
    #[must_use]
    pub const fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// Constraint name for ticket number uniqueness.
pub const TICKET_NUMBER_CONSTRAINT: &str = "tickets_competition_number_key";

/// Constraint name for one draw per competition.
pub const DRAW_COMPETITION_CONSTRAINT: &str = "draws_competition_id_key";

/// Durable store shared by every worker.
pub trait TicketStore: Send + Sync {
    /// Begin a transaction.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a connection cannot be obtained.
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>>;

    /// Ticket numbers that are ACTIVE, WINNER, or RESERVED with an unexpired hold.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    fn unavailable_numbers(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, BTreeSet<TicketNumber>>;

    /// Insert a batch of RESERVED rows, all or nothing.
    ///
    /// Expired RESERVED rows occupying the same numbers are removed first, in
    /// the same atomic unit. If any number is still taken the whole batch is
    /// rejected with [`StoreError::UniqueViolation`].
    ///
    /// # Errors
    ///
    /// - `UniqueViolation`: another allocation holds one of the numbers
    /// - `Database`: the write failed
    fn insert_reservations(
        &self,
        tickets: Vec<Ticket>,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Delete RESERVED rows for a competition held by `owner_id` (or by no
    /// owner, for guest holds when `owner_id` is `None`), optionally restricted
    /// to a set of numbers. Never touches ACTIVE or WINNER rows.
    ///
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the delete fails.
    fn release_reservations(
        &self,
        competition_id: CompetitionId,
        owner_id: Option<OwnerId>,
        numbers: Option<Vec<TicketNumber>>,
    ) -> StoreFuture<'_, u64>;

    /// Delete RESERVED rows whose hold lapsed at or before `now`.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the delete fails.
    fn delete_expired_reservations(
        &self,
        now: DateTime<Utc>,
        competition_id: Option<CompetitionId>,
    ) -> StoreFuture<'_, u64>;

    /// Tickets currently held by an owner (expired holds excluded).
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    fn tickets_for_owner(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Set the skill-question validity flag. Returns false if no such ticket.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    fn set_ticket_validity(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        is_valid: bool,
    ) -> StoreFuture<'_, bool>;

    /// Load a draw record.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Serialization` on failure.
    fn load_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Option<DrawRecord>>;

    /// Load the draw record of a competition.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Serialization` on failure.
    fn draw_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<DrawRecord>>;

    /// Winners of a draw ordered by rank.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    fn winners_for_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Vec<Winner>>;

    /// Update the annotation fields of a draw. Returns false if no such draw.
    ///
    /// Only `notes` and `evidence` are writable; `evidence` is appended.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    fn annotate_draw(
        &self,
        draw_id: DrawId,
        notes: Option<String>,
        evidence: Vec<String>,
    ) -> StoreFuture<'_, bool>;

    /// Record that a winner was notified. Returns false if no such winner.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    fn mark_winner_notified(
        &self,
        winner_id: WinnerId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool>;

    /// Winners whose notification has not been delivered yet, at most
    /// `limit` of them, ordered by draw and rank. With `primary_only` only
    /// rank-0 winners are returned.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    fn unnotified_winners(&self, primary_only: bool, limit: u32) -> StoreFuture<'_, Vec<Winner>>;

    /// Mark the winner holding `code` as claimed, once.
    ///
    /// Returns the updated winner, or `None` if the code is unknown or was
    /// already used.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the update fails.
    fn claim_winner(
        &self,
        code: ClaimCode,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Winner>>;

    /// Competitions with automatic draws due at `now` that have not been drawn.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the query fails.
    fn due_automatic_draws(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<CompetitionId>>;

    /// Cheap connectivity probe for readiness checks.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the store is unreachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}

/// A unit of work over several rows that commits or rolls back as one.
///
/// Dropping a transaction without committing rolls it back.
pub trait StoreTransaction: Send {
    /// Load a competition and lock it against concurrent draws/promotions.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn lock_competition(
        &mut self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<Competition>>;

    /// Load and lock ticket rows by number.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn lock_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
    ) -> StoreFuture<'_, Vec<Ticket>>;

    /// Bind RESERVED rows to an order: set owner and order, extend the hold.
    ///
    /// Returns the number of rows updated.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn bind_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        owner_id: OwnerId,
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'_, u64>;

    /// Load and lock an order.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn lock_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Option<Order>>;

    /// Insert or replace the core's view of an order.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn save_order(&mut self, order: Order) -> StoreFuture<'_, ()>;

    /// All ticket rows bound to an order.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn tickets_for_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>>;

    /// Promote an order's RESERVED rows to ACTIVE and clear their hold.
    ///
    /// Returns the number of rows promoted.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn activate_order_tickets(&mut self, order_id: OrderId) -> StoreFuture<'_, u64>;

    /// Increase a competition's `tickets_sold` counter.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the competition does not exist.
    fn add_tickets_sold(
        &mut self,
        competition_id: CompetitionId,
        count: u32,
    ) -> StoreFuture<'_, ()>;

    /// ACTIVE, valid tickets of a competition ordered by ticket number.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn eligible_snapshot(
        &mut self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Vec<SnapshotEntry>>;

    /// Insert a draw record.
    ///
    /// # Errors
    ///
    /// Returns `UniqueViolation` if the competition already has a draw.
    fn insert_draw(&mut self, record: DrawRecord) -> StoreFuture<'_, ()>;

    /// Insert winner rows.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn insert_winners(&mut self, winners: Vec<Winner>) -> StoreFuture<'_, ()>;

    /// Set the given tickets' status to WINNER.
    ///
    /// # Errors
    ///
    /// Returns `Database` on failure.
    fn mark_tickets_won(&mut self, ticket_ids: Vec<TicketId>) -> StoreFuture<'_, ()>;

    /// Set a competition's status to drawn.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the competition does not exist.
    fn mark_competition_drawn(
        &mut self,
        competition_id: CompetitionId,
        drawn_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()>;

    /// Make every write in this transaction durable.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the commit fails; nothing was persisted.
    fn commit(self: Box<Self>) -> StoreFuture<'static, ()>;

    /// Discard every write in this transaction.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the rollback could not be sent.
    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()>;
}
