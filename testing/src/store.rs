//! In-memory ticket store.
//!
//! Enforces the same `(competition_id, ticket_number)` and one-draw-per-
//! competition uniqueness rules as the Postgres schema. Transactions take the
//! store lock for their whole lifetime and work on a copy of the state, which
//! is written back on commit and discarded on rollback or drop.
//!
//! Faults can be injected to exercise the core's retry and rollback paths:
//! [`InMemoryTicketStore::inject_insert_conflicts`] makes reservation batches
//! lose the uniqueness race, [`InMemoryTicketStore::fail_at`] makes a
//! transaction step fail.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use prize_draw_core::environment::CompetitionDirectory;
use prize_draw_core::store::{
    DRAW_COMPETITION_CONSTRAINT, StoreError, StoreFuture, StoreTransaction,
    TICKET_NUMBER_CONSTRAINT, TicketStore,
};
use prize_draw_core::types::{
    ClaimCode, Competition, CompetitionId, CompetitionStatus, DrawId, DrawMethod, DrawRecord,
    Order, OrderId, OwnerId, SnapshotEntry, Ticket, TicketId, TicketNumber, TicketStatus, Winner,
    WinnerId,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A transaction step that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `StoreTransaction::activate_order_tickets`
    ActivateOrderTickets,
    /// `StoreTransaction::add_tickets_sold`
    AddTicketsSold,
    /// `StoreTransaction::save_order`
    SaveOrder,
    /// `StoreTransaction::insert_draw`
    InsertDraw,
    /// `StoreTransaction::insert_winners`
    InsertWinners,
    /// `StoreTransaction::mark_tickets_won`
    MarkTicketsWon,
    /// `StoreTransaction::mark_competition_drawn`
    MarkCompetitionDrawn,
    /// `StoreTransaction::commit`
    Commit,
}

#[derive(Debug, Default)]
struct Faults {
    insert_conflicts: u32,
    insert_attempts: u32,
    fail_points: HashSet<FailPoint>,
}

impl Faults {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        if self.fail_points.contains(&point) {
            return Err(StoreError::Injected(format!("{point:?}")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    competitions: HashMap<CompetitionId, Competition>,
    tickets: BTreeMap<(CompetitionId, TicketNumber), Ticket>,
    orders: HashMap<OrderId, Order>,
    draws: HashMap<DrawId, DrawRecord>,
    winners: HashMap<WinnerId, Winner>,
}

impl State {
    fn competition_tickets(&self, competition_id: CompetitionId) -> impl Iterator<Item = &Ticket> {
        self.tickets
            .range((competition_id, TicketNumber::FIRST)..)
            .take_while(move |((c, _), _)| *c == competition_id)
            .map(|(_, ticket)| ticket)
    }
}

/// In-memory [`TicketStore`] and [`CompetitionDirectory`].
#[derive(Clone, Debug, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<State>>,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ═══════════════════════════════════════════════════════════
    // Seeding and inspection
    // ═══════════════════════════════════════════════════════════

    /// Insert or replace a competition.
    pub async fn put_competition(&self, competition: Competition) {
        self.state
            .lock()
            .await
            .competitions
            .insert(competition.id, competition);
    }

    /// Current competition row.
    pub async fn competition(&self, competition_id: CompetitionId) -> Option<Competition> {
        self.state
            .lock()
            .await
            .competitions
            .get(&competition_id)
            .cloned()
    }

    /// Insert a ticket row directly, bypassing the allocator.
    pub async fn put_ticket(&self, ticket: Ticket) {
        self.state
            .lock()
            .await
            .tickets
            .insert((ticket.competition_id, ticket.number), ticket);
    }

    /// Every ticket row of a competition, by number.
    pub async fn tickets(&self, competition_id: CompetitionId) -> Vec<Ticket> {
        self.state
            .lock()
            .await
            .competition_tickets(competition_id)
            .cloned()
            .collect()
    }

    /// One ticket row.
    pub async fn ticket(&self, competition_id: CompetitionId, number: TicketNumber) -> Option<Ticket> {
        self.state
            .lock()
            .await
            .tickets
            .get(&(competition_id, number))
            .cloned()
    }

    /// Current order row.
    pub async fn order(&self, order_id: OrderId) -> Option<Order> {
        self.state.lock().await.orders.get(&order_id).cloned()
    }

    /// Number of draw records.
    pub async fn draw_count(&self) -> usize {
        self.state.lock().await.draws.len()
    }

    /// One winner row.
    pub async fn winner(&self, winner_id: WinnerId) -> Option<Winner> {
        self.state.lock().await.winners.get(&winner_id).cloned()
    }

    /// Number of winner rows.
    pub async fn winner_count(&self) -> usize {
        self.state.lock().await.winners.len()
    }

    /// Rewrite a stored draw in place, bypassing the annotation-only rule.
    pub async fn tamper_draw(&self, draw_id: DrawId, edit: impl FnOnce(&mut DrawRecord)) {
        if let Some(draw) = self.state.lock().await.draws.get_mut(&draw_id) {
            edit(draw);
        }
    }

    /// Rewrite a stored winner in place.
    pub async fn tamper_winner(&self, winner_id: WinnerId, edit: impl FnOnce(&mut Winner)) {
        if let Some(winner) = self.state.lock().await.winners.get_mut(&winner_id) {
            edit(winner);
        }
    }

    // ═══════════════════════════════════════════════════════════
    // Fault injection
    // ═══════════════════════════════════════════════════════════

    /// Make the next `count` reservation batches fail with a uniqueness conflict.
    pub fn inject_insert_conflicts(&self, count: u32) {
        self.faults.lock().unwrap().insert_conflicts = count;
    }

    /// Reservation batch inserts attempted so far.
    #[must_use]
    pub fn insert_attempts(&self) -> u32 {
        self.faults.lock().unwrap().insert_attempts
    }

    /// Make a transaction step fail until cleared.
    pub fn fail_at(&self, point: FailPoint) {
        self.faults.lock().unwrap().fail_points.insert(point);
    }

    /// Remove every injected fault.
    pub fn clear_faults(&self) {
        let mut faults = self.faults.lock().unwrap();
        faults.insert_conflicts = 0;
        faults.fail_points.clear();
    }
}

fn ready<T: Send + 'static>(result: Result<T, StoreError>) -> StoreFuture<'static, T> {
    Box::pin(std::future::ready(result))
}

impl CompetitionDirectory for InMemoryTicketStore {
    fn read_competition(&self, competition_id: CompetitionId) -> StoreFuture<'_, Option<Competition>> {
        Box::pin(async move { Ok(self.competition(competition_id).await) })
    }
}

impl TicketStore for InMemoryTicketStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let guard = Arc::clone(&self.state).lock_owned().await;
            let working = guard.clone();
            let tx: Box<dyn StoreTransaction> = Box::new(InMemoryTransaction {
                guard,
                working,
                faults: Arc::clone(&self.faults),
            });
            Ok(tx)
        })
    }

    fn unavailable_numbers(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, BTreeSet<TicketNumber>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .competition_tickets(competition_id)
                .filter(|t| t.is_unavailable(now))
                .map(|t| t.number)
                .collect())
        })
    }

    fn insert_reservations(&self, tickets: Vec<Ticket>, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            {
                let mut faults = self.faults.lock().unwrap();
                faults.insert_attempts += 1;
                if faults.insert_conflicts > 0 {
                    faults.insert_conflicts -= 1;
                    return Err(StoreError::UniqueViolation {
                        constraint: TICKET_NUMBER_CONSTRAINT.to_string(),
                    });
                }
            }

            let mut state = self.state.lock().await;
            let mut batch = HashSet::with_capacity(tickets.len());
            for ticket in &tickets {
                let key = (ticket.competition_id, ticket.number);
                let taken = state.tickets.get(&key).is_some_and(|t| t.is_unavailable(now));
                if taken || !batch.insert(key) {
                    return Err(StoreError::UniqueViolation {
                        constraint: TICKET_NUMBER_CONSTRAINT.to_string(),
                    });
                }
            }
            for ticket in tickets {
                state.tickets.insert((ticket.competition_id, ticket.number), ticket);
            }
            Ok(())
        })
    }

    fn release_reservations(
        &self,
        competition_id: CompetitionId,
        owner_id: Option<OwnerId>,
        numbers: Option<Vec<TicketNumber>>,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let wanted: Option<HashSet<TicketNumber>> = numbers.map(|n| n.into_iter().collect());
            let before = state.tickets.len();
            state.tickets.retain(|(c, number), ticket| {
                let matches = *c == competition_id
                    && ticket.status == TicketStatus::Reserved
                    && ticket.owner_id == owner_id
                    && wanted.as_ref().is_none_or(|w| w.contains(number));
                !matches
            });
            Ok((before - state.tickets.len()) as u64)
        })
    }

    fn delete_expired_reservations(
        &self,
        now: DateTime<Utc>,
        competition_id: Option<CompetitionId>,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let before = state.tickets.len();
            state.tickets.retain(|(c, _), ticket| {
                let in_scope = competition_id.is_none_or(|id| id == *c);
                !(in_scope && ticket.is_expired_reservation(now))
            });
            Ok((before - state.tickets.len()) as u64)
        })
    }

    fn tickets_for_owner(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .competition_tickets(competition_id)
                .filter(|t| t.owner_id == Some(owner_id) && t.is_unavailable(now))
                .cloned()
                .collect())
        })
    }

    fn set_ticket_validity(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        is_valid: bool,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state
                .tickets
                .get_mut(&(competition_id, number))
                .map(|ticket| ticket.is_valid = is_valid)
                .is_some())
        })
    }

    fn load_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Option<DrawRecord>> {
        Box::pin(async move { Ok(self.state.lock().await.draws.get(&draw_id).cloned()) })
    }

    fn draw_for_competition(&self, competition_id: CompetitionId) -> StoreFuture<'_, Option<DrawRecord>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state
                .draws
                .values()
                .find(|d| d.competition_id == competition_id)
                .cloned())
        })
    }

    fn winners_for_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Vec<Winner>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut winners: Vec<Winner> = state
                .winners
                .values()
                .filter(|w| w.draw_id == draw_id)
                .cloned()
                .collect();
            winners.sort_by_key(|w| w.rank);
            Ok(winners)
        })
    }

    fn annotate_draw(
        &self,
        draw_id: DrawId,
        notes: Option<String>,
        evidence: Vec<String>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let Some(draw) = state.draws.get_mut(&draw_id) else {
                return Ok(false);
            };
            if notes.is_some() {
                draw.notes = notes;
            }
            draw.evidence.extend(evidence);
            Ok(true)
        })
    }

    fn mark_winner_notified(&self, winner_id: WinnerId, at: DateTime<Utc>) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            Ok(state
                .winners
                .get_mut(&winner_id)
                .map(|w| w.notified_at = Some(at))
                .is_some())
        })
    }

    fn unnotified_winners(&self, primary_only: bool, limit: u32) -> StoreFuture<'_, Vec<Winner>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let mut pending: Vec<Winner> = state
                .winners
                .values()
                .filter(|w| w.notified_at.is_none() && (!primary_only || w.is_primary()))
                .cloned()
                .collect();
            pending.sort_by_key(|w| (w.draw_id, w.rank));
            pending.truncate(limit as usize);
            Ok(pending)
        })
    }

    fn claim_winner(&self, code: ClaimCode, at: DateTime<Utc>) -> StoreFuture<'_, Option<Winner>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let winner = state
                .winners
                .values_mut()
                .find(|w| w.claim_code == code && w.claimed_at.is_none());
            Ok(winner.map(|w| {
                w.claimed_at = Some(at);
                w.clone()
            }))
        })
    }

    fn due_automatic_draws(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<CompetitionId>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            let drawn: HashSet<CompetitionId> =
                state.draws.values().map(|d| d.competition_id).collect();
            let mut due: Vec<(DateTime<Utc>, CompetitionId)> = state
                .competitions
                .values()
                .filter(|c| {
                    c.draw_mode == DrawMethod::Automatic
                        && c.is_drawable()
                        && c.draw_at.is_some_and(|at| at <= now)
                        && !drawn.contains(&c.id)
                })
                .filter_map(|c| c.draw_at.map(|at| (at, c.id)))
                .collect();
            due.sort();
            Ok(due.into_iter().map(|(_, id)| id).collect())
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        ready(Ok(()))
    }
}

struct InMemoryTransaction {
    guard: OwnedMutexGuard<State>,
    working: State,
    faults: Arc<StdMutex<Faults>>,
}

impl InMemoryTransaction {
    fn check(&self, point: FailPoint) -> Result<(), StoreError> {
        self.faults.lock().unwrap().check(point)
    }
}

impl StoreTransaction for InMemoryTransaction {
    fn lock_competition(&mut self, competition_id: CompetitionId) -> StoreFuture<'_, Option<Competition>> {
        ready(Ok(self.working.competitions.get(&competition_id).cloned()))
    }

    fn lock_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        let tickets = numbers
            .iter()
            .filter_map(|n| self.working.tickets.get(&(competition_id, *n)).cloned())
            .collect();
        ready(Ok(tickets))
    }

    fn bind_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        owner_id: OwnerId,
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'_, u64> {
        let mut bound = 0;
        for number in numbers {
            if let Some(ticket) = self.working.tickets.get_mut(&(competition_id, number)) {
                if ticket.status == TicketStatus::Reserved {
                    ticket.owner_id = Some(owner_id);
                    ticket.order_id = Some(order_id);
                    ticket.reserved_until = Some(reserved_until);
                    bound += 1;
                }
            }
        }
        ready(Ok(bound))
    }

    fn lock_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        ready(Ok(self.working.orders.get(&order_id).cloned()))
    }

    fn save_order(&mut self, order: Order) -> StoreFuture<'_, ()> {
        let result = self.check(FailPoint::SaveOrder).map(|()| {
            self.working.orders.insert(order.id, order);
        });
        ready(result)
    }

    fn tickets_for_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        let tickets = self
            .working
            .tickets
            .values()
            .filter(|t| t.order_id == Some(order_id))
            .cloned()
            .collect();
        ready(Ok(tickets))
    }

    fn activate_order_tickets(&mut self, order_id: OrderId) -> StoreFuture<'_, u64> {
        if let Err(error) = self.check(FailPoint::ActivateOrderTickets) {
            return ready(Err(error));
        }
        let mut promoted = 0;
        for ticket in self.working.tickets.values_mut() {
            if ticket.order_id == Some(order_id) && ticket.status == TicketStatus::Reserved {
                ticket.status = TicketStatus::Active;
                ticket.reserved_until = None;
                promoted += 1;
            }
        }
        ready(Ok(promoted))
    }

    fn add_tickets_sold(&mut self, competition_id: CompetitionId, count: u32) -> StoreFuture<'_, ()> {
        if let Err(error) = self.check(FailPoint::AddTicketsSold) {
            return ready(Err(error));
        }
        let result = match self.working.competitions.get_mut(&competition_id) {
            Some(competition) => {
                competition.tickets_sold = competition.tickets_sold.saturating_add(count);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("competition {competition_id}"))),
        };
        ready(result)
    }

    fn eligible_snapshot(&mut self, competition_id: CompetitionId) -> StoreFuture<'_, Vec<SnapshotEntry>> {
        let snapshot = self
            .working
            .competition_tickets(competition_id)
            .filter(|t| t.is_eligible())
            .map(Ticket::entry)
            .collect();
        ready(Ok(snapshot))
    }

    fn insert_draw(&mut self, record: DrawRecord) -> StoreFuture<'_, ()> {
        if let Err(error) = self.check(FailPoint::InsertDraw) {
            return ready(Err(error));
        }
        let exists = self
            .working
            .draws
            .values()
            .any(|d| d.competition_id == record.competition_id);
        if exists {
            return ready(Err(StoreError::UniqueViolation {
                constraint: DRAW_COMPETITION_CONSTRAINT.to_string(),
            }));
        }
        self.working.draws.insert(record.id, record);
        ready(Ok(()))
    }

    fn insert_winners(&mut self, winners: Vec<Winner>) -> StoreFuture<'_, ()> {
        if let Err(error) = self.check(FailPoint::InsertWinners) {
            return ready(Err(error));
        }
        let mut codes: HashSet<ClaimCode> =
            self.working.winners.values().map(|w| w.claim_code.clone()).collect();
        if winners.iter().any(|w| !codes.insert(w.claim_code.clone())) {
            return ready(Err(StoreError::UniqueViolation {
                constraint: "winners_claim_code_key".to_string(),
            }));
        }
        for winner in winners {
            self.working.winners.insert(winner.id, winner);
        }
        ready(Ok(()))
    }

    fn mark_tickets_won(&mut self, ticket_ids: Vec<TicketId>) -> StoreFuture<'_, ()> {
        if let Err(error) = self.check(FailPoint::MarkTicketsWon) {
            return ready(Err(error));
        }
        let ids: HashSet<TicketId> = ticket_ids.into_iter().collect();
        for ticket in self.working.tickets.values_mut() {
            if ids.contains(&ticket.id) {
                ticket.status = TicketStatus::Winner;
            }
        }
        ready(Ok(()))
    }

    fn mark_competition_drawn(
        &mut self,
        competition_id: CompetitionId,
        drawn_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        if let Err(error) = self.check(FailPoint::MarkCompetitionDrawn) {
            return ready(Err(error));
        }
        let result = match self.working.competitions.get_mut(&competition_id) {
            Some(competition) => {
                competition.status = CompetitionStatus::Drawn;
                competition.drawn_at = Some(drawn_at);
                Ok(())
            }
            None => Err(StoreError::NotFound(format!("competition {competition_id}"))),
        };
        ready(result)
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        let Self { mut guard, working, faults } = *self;
        let result = faults.lock().unwrap().check(FailPoint::Commit).map(|()| {
            *guard = working;
        });
        ready(result)
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        ready(Ok(()))
    }
}
