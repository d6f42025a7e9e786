//! `PrizeDrawCore`: one handle over the allocator, lifecycle manager, draw
//! engine and verifier, sharing a single [`CoreEnvironment`].

use crate::allocator::{ReservationAllocator, ReservationPolicy};
use crate::draw::{DrawEngine, DrawOrigin, DrawOutcome, NotificationPolicy};
use crate::environment::CoreEnvironment;
use crate::error::Result;
use crate::lifecycle::LifecycleManager;
use crate::store::TicketStore;
use crate::types::{
    Availability, ClaimCode, CompetitionId, DrawId, DrawRecord, Order, OrderId, OwnerId,
    Reservation, Ticket, TicketNumber, Winner,
};
use crate::verifier::{DrawAudit, DrawVerifier};

/// Entry point for every inbound operation.
#[derive(Debug, Clone)]
pub struct PrizeDrawCore {
    env: CoreEnvironment,
    allocator: ReservationAllocator,
    lifecycle: LifecycleManager,
    draws: DrawEngine,
    verifier: DrawVerifier,
}

impl PrizeDrawCore {
    /// Wire the components over one environment.
    #[must_use]
    pub fn new(
        env: CoreEnvironment,
        reservation: ReservationPolicy,
        notification: NotificationPolicy,
    ) -> Self {
        Self {
            allocator: ReservationAllocator::new(env.clone(), reservation.clone()),
            lifecycle: LifecycleManager::new(env.clone(), reservation),
            draws: DrawEngine::new(env.clone(), notification),
            verifier: DrawVerifier::new(env.clone()),
            env,
        }
    }

    /// Default policies.
    #[must_use]
    pub fn with_defaults(env: CoreEnvironment) -> Self {
        Self::new(env, ReservationPolicy::default(), NotificationPolicy::default())
    }

    /// The shared store.
    #[must_use]
    pub fn store(&self) -> &dyn TicketStore {
        self.env.store.as_ref()
    }

    /// The allocator.
    #[must_use]
    pub const fn allocator(&self) -> &ReservationAllocator {
        &self.allocator
    }

    /// The lifecycle manager.
    #[must_use]
    pub const fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// The draw engine.
    #[must_use]
    pub const fn draws(&self) -> &DrawEngine {
        &self.draws
    }

    /// The verifier.
    #[must_use]
    pub const fn verifier(&self) -> &DrawVerifier {
        &self.verifier
    }

    // Reservations

    /// See [`ReservationAllocator::reserve`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's errors.
    pub async fn reserve(
        &self,
        competition_id: CompetitionId,
        quantity: u32,
        owner_id: Option<OwnerId>,
    ) -> Result<Reservation> {
        self.allocator.reserve(competition_id, quantity, owner_id).await
    }

    /// See [`ReservationAllocator::release`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's errors.
    pub async fn release(
        &self,
        competition_id: CompetitionId,
        owner_id: Option<OwnerId>,
        ticket_numbers: Option<Vec<TicketNumber>>,
    ) -> Result<u64> {
        self.allocator
            .release(competition_id, owner_id, ticket_numbers)
            .await
    }

    /// See [`ReservationAllocator::availability`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's errors.
    pub async fn availability(&self, competition_id: CompetitionId) -> Result<Availability> {
        self.allocator.availability(competition_id).await
    }

    /// See [`ReservationAllocator::tickets_for_owner`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's errors.
    pub async fn tickets_for_owner(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
    ) -> Result<Vec<Ticket>> {
        self.allocator
            .tickets_for_owner(competition_id, owner_id)
            .await
    }

    /// See [`ReservationAllocator::set_ticket_validity`].
    ///
    /// # Errors
    ///
    /// Propagates the allocator's errors.
    pub async fn set_ticket_validity(
        &self,
        competition_id: CompetitionId,
        ticket_number: TicketNumber,
        is_valid: bool,
    ) -> Result<()> {
        self.allocator
            .set_ticket_validity(competition_id, ticket_number, is_valid)
            .await
    }

    // Lifecycle

    /// See [`LifecycleManager::bind_to_order`].
    ///
    /// # Errors
    ///
    /// Propagates the lifecycle manager's errors.
    pub async fn bind_to_order(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        ticket_numbers: Vec<TicketNumber>,
        order_id: OrderId,
    ) -> Result<Order> {
        self.lifecycle
            .bind_to_order(competition_id, owner_id, ticket_numbers, order_id)
            .await
    }

    /// See [`LifecycleManager::confirm_payment`].
    ///
    /// # Errors
    ///
    /// Propagates the lifecycle manager's errors.
    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<Vec<TicketNumber>> {
        self.lifecycle.confirm_payment(order_id).await
    }

    /// See [`LifecycleManager::reclaim_expired`].
    ///
    /// # Errors
    ///
    /// Propagates the lifecycle manager's errors.
    pub async fn reclaim_expired(&self, competition_id: Option<CompetitionId>) -> Result<u64> {
        self.lifecycle.reclaim_expired(competition_id).await
    }

    // Draws

    /// See [`DrawEngine::run_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn run_draw(
        &self,
        competition_id: CompetitionId,
        num_winners: u32,
        origin: DrawOrigin,
    ) -> Result<DrawOutcome> {
        self.draws.run_draw(competition_id, num_winners, origin).await
    }

    /// See [`DrawEngine::run_manual_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn run_manual_draw(
        &self,
        competition_id: CompetitionId,
        ticket_number: TicketNumber,
        notes: Option<String>,
        initiated_by: Option<String>,
    ) -> Result<DrawOutcome> {
        self.draws
            .run_manual_draw(competition_id, ticket_number, notes, initiated_by)
            .await
    }

    /// See [`DrawEngine::get_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn get_draw(&self, draw_id: DrawId) -> Result<DrawRecord> {
        self.draws.get_draw(draw_id).await
    }

    /// See [`DrawEngine::draw_for_competition`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn draw_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> Result<Option<DrawRecord>> {
        self.draws.draw_for_competition(competition_id).await
    }

    /// See [`DrawEngine::winners_for_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn winners_for_draw(&self, draw_id: DrawId) -> Result<Vec<Winner>> {
        self.draws.winners_for_draw(draw_id).await
    }

    /// See [`DrawEngine::annotate_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn annotate_draw(
        &self,
        draw_id: DrawId,
        notes: Option<String>,
        evidence: Vec<String>,
    ) -> Result<DrawRecord> {
        self.draws.annotate_draw(draw_id, notes, evidence).await
    }

    /// See [`DrawEngine::claim_prize`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn claim_prize(&self, code: ClaimCode) -> Result<Winner> {
        self.draws.claim_prize(code).await
    }

    /// See [`DrawEngine::due_automatic_draws`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn due_automatic_draws(&self) -> Result<Vec<CompetitionId>> {
        self.draws.due_automatic_draws().await
    }

    /// See [`DrawEngine::redeliver_notifications`].
    ///
    /// # Errors
    ///
    /// Propagates the draw engine's errors.
    pub async fn redeliver_notifications(&self, limit: u32) -> Result<usize> {
        self.draws.redeliver_notifications(limit).await
    }

    // Verification

    /// See [`DrawVerifier::verify_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the verifier's errors.
    pub async fn verify_draw(&self, draw_id: DrawId) -> Result<bool> {
        self.verifier.verify_draw(draw_id).await
    }

    /// See [`DrawVerifier::ensure_draw_integrity`].
    ///
    /// # Errors
    ///
    /// Propagates the verifier's errors.
    pub async fn ensure_draw_integrity(&self, draw_id: DrawId) -> Result<DrawRecord> {
        self.verifier.ensure_draw_integrity(draw_id).await
    }

    /// See [`DrawVerifier::audit_draw`].
    ///
    /// # Errors
    ///
    /// Propagates the verifier's errors.
    pub async fn audit_draw(&self, draw_id: DrawId) -> Result<DrawAudit> {
        self.verifier.audit_draw(draw_id).await
    }
}
