//! [`StoreTransaction`] over a `sqlx` transaction.
//!
//! Row locks are taken with `SELECT ... FOR UPDATE`, so two promotions of
//! the same order or two draws of the same competition queue behind each
//! other instead of interleaving.

use crate::rows::{
    COMPETITION_COLUMNS, ORDER_COLUMNS, TICKET_COLUMNS, collect, competition_from_row, db_error,
    entry_from_row, order_from_row, ticket_from_row, to_db_count, to_db_numbers,
};
use chrono::{DateTime, Utc};
use prize_draw_core::store::{StoreError, StoreFuture, StoreTransaction};
use prize_draw_core::types::{
    Competition, CompetitionId, DrawRecord, Order, OrderId, OwnerId, SnapshotEntry, Ticket,
    TicketId, TicketNumber, Winner,
};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

/// An open Postgres transaction. Dropped without commit, it rolls back.
pub struct PgStoreTransaction {
    tx: Transaction<'static, Postgres>,
}

impl PgStoreTransaction {
    pub(crate) const fn new(tx: Transaction<'static, Postgres>) -> Self {
        Self { tx }
    }
}

impl std::fmt::Debug for PgStoreTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStoreTransaction").finish_non_exhaustive()
    }
}

fn expect_row(rows_affected: u64, what: String) -> Result<(), StoreError> {
    if rows_affected == 0 {
        return Err(StoreError::NotFound(what));
    }
    Ok(())
}

impl StoreTransaction for PgStoreTransaction {
    fn lock_competition(
        &mut self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<Competition>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = $1 FOR UPDATE"
            ))
            .bind(competition_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
            row.as_ref().map(competition_from_row).transpose()
        })
    }

    fn lock_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE competition_id = $1 AND ticket_number = ANY($2)
                 ORDER BY ticket_number
                 FOR UPDATE"
            ))
            .bind(competition_id.as_uuid())
            .bind(to_db_numbers(&numbers))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
            collect(&rows, ticket_from_row)
        })
    }

    fn bind_tickets(
        &mut self,
        competition_id: CompetitionId,
        numbers: Vec<TicketNumber>,
        owner_id: OwnerId,
        order_id: OrderId,
        reserved_until: DateTime<Utc>,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE tickets
                 SET owner_id = $3, order_id = $4, reserved_until = $5
                 WHERE competition_id = $1
                   AND ticket_number = ANY($2)
                   AND status = 'reserved'",
            )
            .bind(competition_id.as_uuid())
            .bind(to_db_numbers(&numbers))
            .bind(owner_id.as_uuid())
            .bind(order_id.as_uuid())
            .bind(reserved_until)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected())
        })
    }

    fn lock_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Option<Order>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1 FOR UPDATE"
            ))
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;
            row.as_ref().map(order_from_row).transpose()
        })
    }

    fn save_order(&mut self, order: Order) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO orders
                     (id, competition_id, owner_id, status, ticket_count, created_at, completed_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO UPDATE SET
                     status = EXCLUDED.status,
                     ticket_count = EXCLUDED.ticket_count,
                     completed_at = EXCLUDED.completed_at",
            )
            .bind(order.id.as_uuid())
            .bind(order.competition_id.as_uuid())
            .bind(order.owner_id.as_uuid())
            .bind(order.status.as_str())
            .bind(to_db_count(order.ticket_count))
            .bind(order.created_at)
            .bind(order.completed_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn tickets_for_order(&mut self, order_id: OrderId) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE order_id = $1
                 ORDER BY ticket_number
                 FOR UPDATE"
            ))
            .bind(order_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
            collect(&rows, ticket_from_row)
        })
    }

    fn activate_order_tickets(&mut self, order_id: OrderId) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE tickets
                 SET status = 'active', reserved_until = NULL
                 WHERE order_id = $1 AND status = 'reserved'",
            )
            .bind(order_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected())
        })
    }

    fn add_tickets_sold(&mut self, competition_id: CompetitionId, count: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE competitions SET tickets_sold = tickets_sold + $2 WHERE id = $1",
            )
            .bind(competition_id.as_uuid())
            .bind(to_db_count(count))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            expect_row(result.rows_affected(), format!("competition {competition_id}"))
        })
    }

    fn eligible_snapshot(
        &mut self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Vec<SnapshotEntry>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT id, ticket_number, owner_id FROM tickets
                 WHERE competition_id = $1 AND status = 'active' AND is_valid
                 ORDER BY ticket_number",
            )
            .bind(competition_id.as_uuid())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;
            collect(&rows, entry_from_row)
        })
    }

    fn insert_draw(&mut self, record: DrawRecord) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO draws
                     (id, competition_id, seed, algorithm, snapshot, snapshot_fingerprint,
                      result, method, initiated_by, notes, evidence, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(record.id.as_uuid())
            .bind(record.competition_id.as_uuid())
            .bind(record.seed.as_bytes().as_slice())
            .bind(&record.algorithm)
            .bind(Json(&record.snapshot))
            .bind(&record.snapshot_fingerprint)
            .bind(Json(&record.result))
            .bind(record.method.as_str())
            .bind(&record.initiated_by)
            .bind(&record.notes)
            .bind(Json(&record.evidence))
            .bind(record.created_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            Ok(())
        })
    }

    fn insert_winners(&mut self, winners: Vec<Winner>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            for winner in &winners {
                let rank = i32::try_from(winner.rank)
                    .map_err(|_| StoreError::Serialization(format!("rank {} too large", winner.rank)))?;
                sqlx::query(
                    "INSERT INTO winners
                         (id, draw_id, competition_id, ticket_id, ticket_number, owner_id, rank,
                          claim_code, notified_at, claimed_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
                )
                .bind(winner.id.as_uuid())
                .bind(winner.draw_id.as_uuid())
                .bind(winner.competition_id.as_uuid())
                .bind(winner.ticket_id.as_uuid())
                .bind(i64::from(winner.ticket_number.value()))
                .bind(winner.owner_id.map(|owner| *owner.as_uuid()))
                .bind(rank)
                .bind(winner.claim_code.as_str())
                .bind(winner.notified_at)
                .bind(winner.claimed_at)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
            }
            Ok(())
        })
    }

    fn mark_tickets_won(&mut self, ticket_ids: Vec<TicketId>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let ids: Vec<Uuid> = ticket_ids.iter().map(|id| *id.as_uuid()).collect();
            sqlx::query("UPDATE tickets SET status = 'winner' WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *self.tx)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }

    fn mark_competition_drawn(
        &mut self,
        competition_id: CompetitionId,
        drawn_at: DateTime<Utc>,
    ) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE competitions SET status = 'drawn', drawn_at = $2 WHERE id = $1",
            )
            .bind(competition_id.as_uuid())
            .bind(drawn_at)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
            expect_row(result.rows_affected(), format!("competition {competition_id}"))
        })
    }

    fn commit(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.commit().await.map_err(db_error) })
    }

    fn rollback(self: Box<Self>) -> StoreFuture<'static, ()> {
        Box::pin(async move { self.tx.rollback().await.map_err(db_error) })
    }
}
