//! Reservation Allocator.
//!
//! Finds free ticket numbers first-fit from 1 and inserts them as RESERVED
//! rows in one batch. The `(competition_id, ticket_number)` uniqueness
//! constraint is the only thing that decides who gets a number: the
//! unavailable set read beforehand is an estimate used to pick candidates and
//! to report capacity. When the batch loses a race the whole batch is
//! discarded and the allocation is recomputed after a backoff.

use crate::environment::CoreEnvironment;
use crate::error::{Error, Result};
use crate::metrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::types::{
    Availability, Competition, CompetitionId, CompetitionStatus, OwnerId, Reservation, Ticket,
    TicketLimit, TicketNumber,
};
use chrono::Duration;
use std::collections::BTreeSet;
use std::fmt;

/// Reservation hold and retry settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservationPolicy {
    /// How long a fresh reservation holds its numbers
    pub hold_ttl: Duration,
    /// Hold length once the reservation is bound to an order
    pub checkout_ttl: Duration,
    /// Backoff for lost uniqueness races
    pub retry: RetryPolicy,
    /// Largest quantity accepted in one call
    pub max_quantity: u32,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            hold_ttl: Duration::minutes(15),
            checkout_ttl: Duration::hours(24),
            retry: RetryPolicy::default(),
            max_quantity: 1_000,
        }
    }
}

/// Outcome of one allocation attempt.
#[derive(Debug)]
enum AttemptError {
    /// Another allocation took one of the candidate numbers.
    Conflict,
    /// Anything that retrying will not fix.
    Fatal(Error),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => f.write_str("ticket number uniqueness conflict"),
            Self::Fatal(error) => write!(f, "{error}"),
        }
    }
}

/// First `quantity` free numbers starting at 1, skipping `unavailable`.
///
/// Returns `None` if the limit (or the number space) runs out first.
#[must_use]
pub fn first_fit(
    unavailable: &BTreeSet<TicketNumber>,
    limit: TicketLimit,
    quantity: u32,
) -> Option<Vec<TicketNumber>> {
    let mut picked = Vec::with_capacity(quantity as usize);
    let mut candidate = TicketNumber::FIRST;

    while picked.len() < quantity as usize {
        if !limit.contains(candidate) {
            return None;
        }
        if !unavailable.contains(&candidate) {
            picked.push(candidate);
        }
        if picked.len() < quantity as usize {
            candidate = candidate.next()?;
        }
    }

    Some(picked)
}

/// Reserves, releases and reports ticket inventory.
#[derive(Debug, Clone)]
pub struct ReservationAllocator {
    env: CoreEnvironment,
    policy: ReservationPolicy,
}

impl ReservationAllocator {
    /// Create an allocator.
    #[must_use]
    pub const fn new(env: CoreEnvironment, policy: ReservationPolicy) -> Self {
        Self { env, policy }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    /// Reserve `quantity` ticket numbers for `owner_id` (or a guest).
    ///
    /// # Errors
    ///
    /// - `Validation`: bad quantity, or the competition is not on sale
    /// - `CompetitionNotFound`
    /// - `InsufficientInventory`: fewer than `quantity` numbers remain
    /// - `Contention`: every attempt lost the uniqueness race
    /// - `Storage`
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn reserve(
        &self,
        competition_id: CompetitionId,
        quantity: u32,
        owner_id: Option<OwnerId>,
    ) -> Result<Reservation> {
        let result = self.reserve_inner(competition_id, quantity, owner_id).await;
        match &result {
            Ok(_) => {}
            Err(Error::InsufficientInventory { .. }) => metrics::record_reservation("insufficient"),
            Err(Error::Contention { .. }) => metrics::record_reservation("contention"),
            Err(_) => metrics::record_reservation("rejected"),
        }
        result
    }

    async fn reserve_inner(
        &self,
        competition_id: CompetitionId,
        quantity: u32,
        owner_id: Option<OwnerId>,
    ) -> Result<Reservation> {
        if quantity < 1 {
            return Err(Error::validation("quantity must be at least 1"));
        }
        if quantity > self.policy.max_quantity {
            return Err(Error::validation(format!(
                "quantity {quantity} exceeds the maximum of {} per reservation",
                self.policy.max_quantity
            )));
        }

        let competition = self
            .env
            .competitions
            .read_competition(competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(competition_id))?;

        if let Some(reason) = competition.purchase_blocker(self.env.clock.now()) {
            return Err(Error::validation(reason));
        }

        let outcome = retry_with_predicate(
            self.policy.retry.clone(),
            |attempt| self.attempt(&competition, quantity, owner_id, attempt),
            |error| matches!(error, AttemptError::Conflict),
        )
        .await;

        match outcome {
            Ok((reservation, attempts)) => {
                metrics::record_reserved(quantity, attempts);
                tracing::info!(
                    quantity,
                    attempts,
                    first = %reservation.ticket_numbers.first().map_or(0, TicketNumber::value),
                    reserved_until = %reservation.reserved_until,
                    "Tickets reserved"
                );
                Ok(reservation)
            }
            Err(AttemptError::Conflict) => {
                let attempts = self.policy.retry.max_attempts.max(1);
                tracing::warn!(quantity, attempts, "Reservation gave up under contention");
                Err(Error::Contention {
                    competition_id,
                    attempts,
                })
            }
            Err(AttemptError::Fatal(error)) => Err(error),
        }
    }

    async fn attempt(
        &self,
        competition: &Competition,
        quantity: u32,
        owner_id: Option<OwnerId>,
        attempt: u32,
    ) -> std::result::Result<(Reservation, u32), AttemptError> {
        let now = self.env.clock.now();
        let unavailable = self
            .env
            .store
            .unavailable_numbers(competition.id, now)
            .await
            .map_err(|e| AttemptError::Fatal(e.into()))?;

        let insufficient = |remaining: u32| {
            AttemptError::Fatal(Error::InsufficientInventory {
                competition_id: competition.id,
                requested: quantity,
                remaining,
            })
        };

        let remaining = competition.ticket_limit.remaining(unavailable.len());
        if remaining.is_some_and(|remaining| quantity > remaining) {
            return Err(insufficient(remaining.unwrap_or(0)));
        }

        // Only fails here when the u32 number space itself is exhausted.
        let numbers = first_fit(&unavailable, competition.ticket_limit, quantity)
            .ok_or_else(|| insufficient(remaining.unwrap_or(0)))?;

        let reserved_until = now + self.policy.hold_ttl;
        let tickets = numbers
            .iter()
            .map(|number| Ticket::reserved(competition.id, *number, owner_id, now, reserved_until))
            .collect();

        match self.env.store.insert_reservations(tickets, now).await {
            Ok(()) => Ok((
                Reservation {
                    competition_id: competition.id,
                    ticket_numbers: numbers,
                    reserved_until,
                    owner_id,
                },
                attempt + 1,
            )),
            Err(e) if e.is_unique_violation() => {
                tracing::debug!(attempt, "Reservation batch lost a uniqueness race");
                Err(AttemptError::Conflict)
            }
            Err(e) => Err(AttemptError::Fatal(e.into())),
        }
    }

    /// Delete RESERVED rows held by `owner_id` (or guest rows when `None`),
    /// optionally only the given numbers. Idempotent.
    ///
    /// # Errors
    ///
    /// - `Validation`: a guest release without explicit numbers
    /// - `Storage`
    #[tracing::instrument(skip(self, ticket_numbers), fields(competition_id = %competition_id))]
    pub async fn release(
        &self,
        competition_id: CompetitionId,
        owner_id: Option<OwnerId>,
        ticket_numbers: Option<Vec<TicketNumber>>,
    ) -> Result<u64> {
        if owner_id.is_none() && ticket_numbers.is_none() {
            return Err(Error::validation(
                "releasing guest reservations requires explicit ticket numbers",
            ));
        }
        if ticket_numbers.as_ref().is_some_and(Vec::is_empty) {
            return Ok(0);
        }

        let released = self
            .env
            .store
            .release_reservations(competition_id, owner_id, ticket_numbers)
            .await?;

        metrics::record_released(released);
        tracing::info!(released, owner_id = ?owner_id, "Reservations released");
        Ok(released)
    }

    /// Capacity picture using the same expiry-aware set as allocation.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`
    /// - `Storage`
    pub async fn availability(&self, competition_id: CompetitionId) -> Result<Availability> {
        let competition = self
            .env
            .competitions
            .read_competition(competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(competition_id))?;

        let unavailable = self
            .env
            .store
            .unavailable_numbers(competition_id, self.env.clock.now())
            .await?
            .len();

        Ok(Availability {
            competition_id,
            ticket_limit: competition.ticket_limit,
            unavailable: u32::try_from(unavailable).unwrap_or(u32::MAX),
            remaining: competition.ticket_limit.remaining(unavailable),
        })
    }

    /// A buyer's current tickets: unexpired holds, ACTIVE and WINNER.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the query fails.
    pub async fn tickets_for_owner(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
    ) -> Result<Vec<Ticket>> {
        let mut tickets = self
            .env
            .store
            .tickets_for_owner(competition_id, owner_id, self.env.clock.now())
            .await?;
        tickets.sort_by_key(|ticket| ticket.number);
        Ok(tickets)
    }

    /// Record the outcome of a ticket's skill question.
    ///
    /// # Errors
    ///
    /// - `CompetitionNotFound`
    /// - `AlreadyDrawn`: the snapshot has been taken
    /// - `TicketNotFound`
    /// - `Storage`
    #[tracing::instrument(skip(self), fields(competition_id = %competition_id))]
    pub async fn set_ticket_validity(
        &self,
        competition_id: CompetitionId,
        ticket_number: TicketNumber,
        is_valid: bool,
    ) -> Result<()> {
        let competition = self
            .env
            .competitions
            .read_competition(competition_id)
            .await?
            .ok_or(Error::CompetitionNotFound(competition_id))?;

        if competition.status == CompetitionStatus::Drawn {
            return Err(Error::AlreadyDrawn(competition_id));
        }

        let updated = self
            .env
            .store
            .set_ticket_validity(competition_id, ticket_number, is_valid)
            .await?;
        if !updated {
            return Err(Error::TicketNotFound {
                competition_id,
                ticket_number,
            });
        }

        tracing::info!(%ticket_number, is_valid, "Ticket validity updated");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn numbers(values: &[u32]) -> BTreeSet<TicketNumber> {
        values.iter().map(|v| TicketNumber::new(*v).unwrap()).collect()
    }

    fn values(picked: &[TicketNumber]) -> Vec<u32> {
        picked.iter().map(TicketNumber::value).collect()
    }

    #[test]
    fn first_fit_skips_unavailable_numbers() {
        let picked = first_fit(&numbers(&[1, 2, 4]), TicketLimit::Limited(10), 3).unwrap();
        assert_eq!(values(&picked), vec![3, 5, 6]);
    }

    #[test]
    fn first_fit_stops_at_the_limit() {
        assert!(first_fit(&numbers(&[1, 3]), TicketLimit::Limited(4), 3).is_none());
        let picked = first_fit(&numbers(&[1, 3]), TicketLimit::Limited(4), 2).unwrap();
        assert_eq!(values(&picked), vec![2, 4]);
    }

    #[test]
    fn first_fit_is_unbounded_when_unlimited() {
        let unavailable: BTreeSet<_> = (1..=500).map(|v| TicketNumber::new(v).unwrap()).collect();
        let picked = first_fit(&unavailable, TicketLimit::Unlimited, 2).unwrap();
        assert_eq!(values(&picked), vec![501, 502]);
    }

    #[test]
    fn default_policy_matches_hold_times() {
        let policy = ReservationPolicy::default();
        assert_eq!(policy.hold_ttl, Duration::minutes(15));
        assert_eq!(policy.checkout_ttl, Duration::hours(24));
        assert_eq!(policy.retry.max_attempts, 5);
    }

    #[test]
    fn attempt_errors_describe_themselves() {
        assert_eq!(
            AttemptError::Conflict.to_string(),
            "ticket number uniqueness conflict"
        );
        let fatal = AttemptError::Fatal(Error::validation("bad"));
        assert!(fatal.to_string().contains("bad"));
    }
}
