//! Reservation Lifecycle Manager.
//!
//! Moves reservations forward once checkout starts (extend and bind to an
//! order), promotes them to ACTIVE when payment clears, and sweeps expired
//! holds. Binding and promotion each run inside one [`StoreTransaction`] so a
//! failure part-way leaves every row as it was.

use crate::allocator::ReservationPolicy;
use crate::environment::CoreEnvironment;
use crate::error::{Error, Result};
use crate::metrics;
use crate::store::StoreTransaction;
use crate::types::{
    CompetitionId, CompetitionStatus, Order, OrderId, OrderStatus, OwnerId, TicketNumber,
    TicketStatus,
};
use std::collections::BTreeSet;

/// Binds, promotes and reclaims reservations.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    env: CoreEnvironment,
    policy: ReservationPolicy,
}

impl LifecycleManager {
    /// Create a lifecycle manager.
    #[must_use]
    pub const fn new(env: CoreEnvironment, policy: ReservationPolicy) -> Self {
        Self { env, policy }
    }

    /// Bind exactly `ticket_numbers` to `order_id` and extend their hold to
    /// the checkout window. All or nothing.
    ///
    /// Guest holds (no owner) are adopted by `owner_id`. Binding numbers that
    /// are already bound to this order again is accepted.
    ///
    /// # Errors
    ///
    /// - `Validation`: empty or repeated numbers, or an order belonging to
    ///   another buyer, competition or already completed
    /// - `CompetitionNotFound`
    /// - `StaleReservation`: a number is missing, expired, or held by someone else
    /// - `Storage`
    #[tracing::instrument(skip(self, ticket_numbers), fields(competition_id = %competition_id, order_id = %order_id))]
    pub async fn bind_to_order(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        ticket_numbers: Vec<TicketNumber>,
        order_id: OrderId,
    ) -> Result<Order> {
        if ticket_numbers.is_empty() {
            return Err(Error::validation("at least one ticket number is required"));
        }
        let requested: BTreeSet<TicketNumber> = ticket_numbers.iter().copied().collect();
        if requested.len() != ticket_numbers.len() {
            return Err(Error::validation("ticket numbers must not repeat"));
        }

        let mut tx = self.env.store.begin().await?;
        match self
            .bind_in(tx.as_mut(), competition_id, owner_id, requested, order_id)
            .await
        {
            Ok(order) => {
                tx.commit().await?;
                tracing::info!(
                    ticket_count = order.ticket_count,
                    "Reservation bound to order"
                );
                Ok(order)
            }
            Err(error) => {
                rollback(tx).await;
                if matches!(error, Error::StaleReservation { .. }) {
                    tracing::warn!(error = %error, "Bind rejected");
                }
                Err(error)
            }
        }
    }

    async fn bind_in(
        &self,
        tx: &mut dyn StoreTransaction,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        requested: BTreeSet<TicketNumber>,
        order_id: OrderId,
    ) -> Result<Order> {
        let competition = tx
            .lock_competition(competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(competition_id))?;
        if matches!(
            competition.status,
            CompetitionStatus::Drawn | CompetitionStatus::Cancelled
        ) {
            return Err(Error::validation(format!(
                "competition {competition_id} is {}",
                competition.status.as_str()
            )));
        }

        let now = self.env.clock.now();
        let numbers: Vec<TicketNumber> = requested.iter().copied().collect();
        let tickets = tx.lock_tickets(competition_id, numbers.clone()).await?;

        let stale = |reason: String, ticket_numbers: Vec<TicketNumber>| Error::StaleReservation {
            competition_id,
            reason,
            ticket_numbers,
        };

        let found: BTreeSet<TicketNumber> = tickets.iter().map(|t| t.number).collect();
        let missing: Vec<TicketNumber> = requested.difference(&found).copied().collect();
        if !missing.is_empty() {
            return Err(stale(
                format!("{} of {} tickets are not reserved", missing.len(), requested.len()),
                missing,
            ));
        }

        let lapsed: Vec<TicketNumber> = tickets
            .iter()
            .filter(|t| t.status != TicketStatus::Reserved || t.is_expired_reservation(now))
            .map(|t| t.number)
            .collect();
        if !lapsed.is_empty() {
            return Err(stale("reservation expired or already finalised".into(), lapsed));
        }

        let foreign: Vec<TicketNumber> = tickets
            .iter()
            .filter(|t| {
                t.owner_id.is_some_and(|owner| owner != owner_id)
                    || t.order_id.is_some_and(|order| order != order_id)
            })
            .map(|t| t.number)
            .collect();
        if !foreign.is_empty() {
            return Err(stale("held by another buyer or order".into(), foreign));
        }

        let newly_bound = u32::try_from(tickets.iter().filter(|t| t.order_id.is_none()).count())
            .unwrap_or(u32::MAX);

        let mut order = match tx.lock_order(order_id).await? {
            Some(order) => {
                if order.owner_id != owner_id || order.competition_id != competition_id {
                    return Err(Error::validation(format!(
                        "order {order_id} belongs to another buyer or competition"
                    )));
                }
                if order.status == OrderStatus::Completed {
                    return Err(Error::validation(format!("order {order_id} is already completed")));
                }
                order
            }
            None => Order {
                id: order_id,
                competition_id,
                owner_id,
                status: OrderStatus::Pending,
                ticket_count: 0,
                created_at: now,
                completed_at: None,
            },
        };

        let reserved_until = now + self.policy.checkout_ttl;
        let bound = tx
            .bind_tickets(competition_id, numbers.clone(), owner_id, order_id, reserved_until)
            .await?;
        if bound != numbers.len() as u64 {
            return Err(stale(
                format!("bound {bound} of {} tickets", numbers.len()),
                numbers,
            ));
        }

        order.ticket_count = order.ticket_count.saturating_add(newly_bound);
        tx.save_order(order.clone()).await?;
        Ok(order)
    }

    /// Promote an order's tickets to ACTIVE and complete the order, as one
    /// atomic unit. Returns the promoted numbers.
    ///
    /// Confirming an already completed order returns its numbers unchanged.
    ///
    /// # Errors
    ///
    /// - `OrderNotFound`
    /// - `CompetitionNotFound`
    /// - `StaleReservation`: a bound hold expired or was reclaimed, or the
    ///   competition was drawn or cancelled in the meantime
    /// - `Storage`: nothing was promoted
    #[tracing::instrument(skip(self), fields(order_id = %order_id))]
    pub async fn confirm_payment(&self, order_id: OrderId) -> Result<Vec<TicketNumber>> {
        let mut tx = self.env.store.begin().await?;
        match self.confirm_in(tx.as_mut(), order_id).await {
            Ok(Confirmation::Promoted(numbers)) => {
                tx.commit().await?;
                metrics::record_promoted(numbers.len() as u64);
                tracing::info!(promoted = numbers.len(), "Payment confirmed, tickets active");
                Ok(numbers)
            }
            Ok(Confirmation::AlreadyCompleted(numbers)) => {
                rollback(tx).await;
                tracing::debug!("Order already completed");
                Ok(numbers)
            }
            Err(error) => {
                rollback(tx).await;
                tracing::warn!(error = %error, "Payment confirmation rejected");
                Err(error)
            }
        }
    }

    async fn confirm_in(
        &self,
        tx: &mut dyn StoreTransaction,
        order_id: OrderId,
    ) -> Result<Confirmation> {
        let mut order = tx
            .lock_order(order_id)
            .await?
            .ok_or(Error::OrderNotFound(order_id))?;
        let mut tickets = tx.tickets_for_order(order_id).await?;
        tickets.sort_by_key(|t| t.number);

        if order.status == OrderStatus::Completed {
            return Ok(Confirmation::AlreadyCompleted(
                tickets
                    .iter()
                    .filter(|t| matches!(t.status, TicketStatus::Active | TicketStatus::Winner))
                    .map(|t| t.number)
                    .collect(),
            ));
        }

        let now = self.env.clock.now();
        let numbers: Vec<TicketNumber> = tickets.iter().map(|t| t.number).collect();
        let stale = |reason: String, ticket_numbers: Vec<TicketNumber>| Error::StaleReservation {
            competition_id: order.competition_id,
            reason,
            ticket_numbers,
        };

        // Held until commit, so a draw cannot freeze its snapshot mid-promotion.
        let competition = tx
            .lock_competition(order.competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(order.competition_id))?;
        if matches!(
            competition.status,
            CompetitionStatus::Drawn | CompetitionStatus::Cancelled
        ) {
            return Err(stale(
                format!("competition is {}", competition.status.as_str()),
                numbers,
            ));
        }

        if tickets.len() != order.ticket_count as usize {
            return Err(stale(
                format!(
                    "order expects {} tickets but {} remain bound",
                    order.ticket_count,
                    tickets.len()
                ),
                numbers,
            ));
        }

        let lapsed: Vec<TicketNumber> = tickets
            .iter()
            .filter(|t| t.status != TicketStatus::Reserved || t.is_expired_reservation(now))
            .map(|t| t.number)
            .collect();
        if !lapsed.is_empty() {
            return Err(stale("reservation expired before payment cleared".into(), lapsed));
        }

        let promoted = tx.activate_order_tickets(order_id).await?;
        if promoted != numbers.len() as u64 {
            return Err(stale(
                format!("promoted {promoted} of {} tickets", numbers.len()),
                numbers,
            ));
        }

        tx.add_tickets_sold(order.competition_id, order.ticket_count)
            .await?;

        order.status = OrderStatus::Completed;
        order.completed_at = Some(now);
        tx.save_order(order).await?;

        Ok(Confirmation::Promoted(numbers))
    }

    /// Delete RESERVED rows whose hold has lapsed, for one competition or all.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the sweep fails.
    pub async fn reclaim_expired(&self, competition_id: Option<CompetitionId>) -> Result<u64> {
        let reclaimed = self
            .env
            .store
            .delete_expired_reservations(self.env.clock.now(), competition_id)
            .await?;
        if reclaimed > 0 {
            metrics::record_reclaimed(reclaimed);
            tracing::info!(reclaimed, "Expired reservations reclaimed");
        }
        Ok(reclaimed)
    }
}

enum Confirmation {
    Promoted(Vec<TicketNumber>),
    AlreadyCompleted(Vec<TicketNumber>),
}

/// Roll back, logging a failure instead of surfacing it.
pub(crate) async fn rollback(tx: Box<dyn StoreTransaction>) {
    if let Err(error) = tx.rollback().await {
        tracing::warn!(error = %error, "Transaction rollback failed");
    }
}
