//! PostgreSQL ticket store for the prize draw core.
//!
//! Implements [`TicketStore`] and [`CompetitionDirectory`] on a `sqlx`
//! connection pool. The schema (see `migrations/`) carries the constraints
//! the core relies on:
//!
//! - `tickets_competition_number_key`: one row per `(competition, number)`,
//!   the arbiter of concurrent reservation batches
//! - `draws_competition_id_key`: at most one draw per competition
//! - a trigger rejecting edits to a recorded draw's seed, snapshot or result
//!
//! # Example
//!
//! ```ignore
//! use prize_draw_postgres::PostgresTicketStore;
//!
//! let store = PostgresTicketStore::connect("postgres://localhost/prize_draw", 20).await?;
//! store.migrate().await?;
//! ```

mod rows;
mod transaction;

pub use transaction::PgStoreTransaction;

use chrono::{DateTime, Utc};
use prize_draw_core::environment::CompetitionDirectory;
use prize_draw_core::store::{StoreError, StoreFuture, StoreTransaction, TicketStore};
use prize_draw_core::types::{
    ClaimCode, Competition, CompetitionId, DrawId, DrawRecord, OwnerId, Ticket, TicketNumber,
    Winner, WinnerId,
};
use rows::{
    COMPETITION_COLUMNS, DRAW_COLUMNS, TICKET_COLUMNS, WINNER_COLUMNS, collect,
    competition_from_row, db_error, draw_from_row, from_db_number, ticket_from_row, to_db_count,
    to_db_number, to_db_numbers, winner_from_row,
};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use std::collections::BTreeSet;
use std::time::Duration;
use uuid::Uuid;

/// Connection pool sizing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolSettings {
    /// Upper bound on open connections
    pub max_connections: u32,
    /// Connections kept open while idle
    pub min_connections: u32,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
    /// Idle connections above the minimum are closed after this long
    pub idle_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// PostgreSQL-backed ticket store.
#[derive(Clone, Debug)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Wrap an existing connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to a database.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the pool cannot establish a connection.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let settings = PoolSettings {
            max_connections,
            ..PoolSettings::default()
        };
        Self::connect_with(database_url, &settings).await
    }

    /// Connect with explicit pool sizing and timeouts.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the pool cannot establish a connection.
    pub async fn connect_with(
        database_url: &str,
        settings: &PoolSettings,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .idle_timeout(Some(settings.idle_timeout))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(Self::new(pool))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `Database` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("migration failed: {e}")))?;
        tracing::info!("Prize draw schema migrations applied");
        Ok(())
    }

    /// Insert or update a competition row.
    ///
    /// Competitions are owned by the content-management side; this is how
    /// that side (or a test) makes one known to the store.
    ///
    /// # Errors
    ///
    /// Returns `Database` if the write fails.
    pub async fn put_competition(&self, competition: &Competition) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO competitions
                 (id, ticket_limit, tickets_sold, status, draw_at, ends_at, drawn_at, draw_mode)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (id) DO UPDATE SET
                 ticket_limit = EXCLUDED.ticket_limit,
                 tickets_sold = EXCLUDED.tickets_sold,
                 status = EXCLUDED.status,
                 draw_at = EXCLUDED.draw_at,
                 ends_at = EXCLUDED.ends_at,
                 drawn_at = EXCLUDED.drawn_at,
                 draw_mode = EXCLUDED.draw_mode",
        )
        .bind(competition.id.as_uuid())
        .bind(competition.ticket_limit.as_option().map(to_db_count))
        .bind(to_db_count(competition.tickets_sold))
        .bind(competition.status.as_str())
        .bind(competition.draw_at)
        .bind(competition.ends_at)
        .bind(competition.drawn_at)
        .bind(competition.draw_mode.as_str())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    /// Every ticket row of a competition, by number.
    ///
    /// # Errors
    ///
    /// Returns `Database` or `Serialization` on failure.
    pub async fn tickets(&self, competition_id: CompetitionId) -> Result<Vec<Ticket>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {TICKET_COLUMNS} FROM tickets
             WHERE competition_id = $1
             ORDER BY ticket_number"
        ))
        .bind(competition_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        collect(&rows, ticket_from_row)
    }
}

impl CompetitionDirectory for PostgresTicketStore {
    fn read_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<Competition>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {COMPETITION_COLUMNS} FROM competitions WHERE id = $1"
            ))
            .bind(competition_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(competition_from_row).transpose()
        })
    }
}

impl TicketStore for PostgresTicketStore {
    fn begin(&self) -> StoreFuture<'_, Box<dyn StoreTransaction>> {
        Box::pin(async move {
            let tx = self.pool.begin().await.map_err(db_error)?;
            Ok(Box::new(PgStoreTransaction::new(tx)) as Box<dyn StoreTransaction>)
        })
    }

    fn unavailable_numbers(
        &self,
        competition_id: CompetitionId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, BTreeSet<TicketNumber>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT ticket_number FROM tickets
                 WHERE competition_id = $1
                   AND (status <> 'reserved' OR reserved_until > $2)",
            )
            .bind(competition_id.as_uuid())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter()
                .map(|row| {
                    let number: i64 = row.try_get("ticket_number").map_err(db_error)?;
                    from_db_number(number)
                })
                .collect()
        })
    }

    fn insert_reservations(&self, tickets: Vec<Ticket>, now: DateTime<Utc>) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let Some(first) = tickets.first() else {
                return Ok(());
            };
            let competition_id = *first.competition_id.as_uuid();
            tracing::debug!(%competition_id, count = tickets.len(), "Inserting reservation batch");

            let mut ids = Vec::with_capacity(tickets.len());
            let mut numbers = Vec::with_capacity(tickets.len());
            let mut owners = Vec::with_capacity(tickets.len());
            let mut holds = Vec::with_capacity(tickets.len());
            let mut created = Vec::with_capacity(tickets.len());
            for ticket in &tickets {
                ids.push(*ticket.id.as_uuid());
                numbers.push(to_db_number(ticket.number));
                owners.push(ticket.owner_id.map(|owner| *owner.as_uuid()));
                holds.push(ticket.reserved_until);
                created.push(ticket.created_at);
            }

            let mut tx = self.pool.begin().await.map_err(db_error)?;

            // Lapsed holds on the requested numbers give way to the new batch.
            sqlx::query(
                "DELETE FROM tickets
                 WHERE competition_id = $1
                   AND ticket_number = ANY($2)
                   AND status = 'reserved'
                   AND reserved_until <= $3",
            )
            .bind(competition_id)
            .bind(&numbers)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            sqlx::query(
                "INSERT INTO tickets
                     (id, competition_id, ticket_number, status, owner_id, reserved_until,
                      is_valid, created_at)
                 SELECT id, $2, number, 'reserved', owner_id, reserved_until, TRUE, created_at
                 FROM UNNEST($1::uuid[], $3::bigint[], $4::uuid[], $5::timestamptz[],
                             $6::timestamptz[])
                      AS batch(id, number, owner_id, reserved_until, created_at)",
            )
            .bind(&ids)
            .bind(competition_id)
            .bind(&numbers)
            .bind(&owners)
            .bind(&holds)
            .bind(&created)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            tx.commit().await.map_err(db_error)?;
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
            let numbers = numbers.as_deref().map(to_db_numbers);
            let result = sqlx::query(
                "DELETE FROM tickets
                 WHERE competition_id = $1
                   AND status = 'reserved'
                   AND owner_id IS NOT DISTINCT FROM $2
                   AND ($3::bigint[] IS NULL OR ticket_number = ANY($3))",
            )
            .bind(competition_id.as_uuid())
            .bind(owner_id.map(|owner| *owner.as_uuid()))
            .bind(numbers)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected())
        })
    }

    fn delete_expired_reservations(
        &self,
        now: DateTime<Utc>,
        competition_id: Option<CompetitionId>,
    ) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            let result = sqlx::query(
                "DELETE FROM tickets
                 WHERE status = 'reserved'
                   AND (reserved_until IS NULL OR reserved_until <= $1)
                   AND ($2::uuid IS NULL OR competition_id = $2)",
            )
            .bind(now)
            .bind(competition_id.map(|id| *id.as_uuid()))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected())
        })
    }

    fn tickets_for_owner(
        &self,
        competition_id: CompetitionId,
        owner_id: OwnerId,
        now: DateTime<Utc>,
    ) -> StoreFuture<'_, Vec<Ticket>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {TICKET_COLUMNS} FROM tickets
                 WHERE competition_id = $1
                   AND owner_id = $2
                   AND (status <> 'reserved' OR reserved_until > $3)
                 ORDER BY ticket_number"
            ))
            .bind(competition_id.as_uuid())
            .bind(owner_id.as_uuid())
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            collect(&rows, ticket_from_row)
        })
    }

    fn set_ticket_validity(
        &self,
        competition_id: CompetitionId,
        number: TicketNumber,
        is_valid: bool,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE tickets SET is_valid = $3
                 WHERE competition_id = $1 AND ticket_number = $2",
            )
            .bind(competition_id.as_uuid())
            .bind(to_db_number(number))
            .bind(is_valid)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn load_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Option<DrawRecord>> {
        Box::pin(async move {
            let row = sqlx::query(&format!("SELECT {DRAW_COLUMNS} FROM draws WHERE id = $1"))
                .bind(draw_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
            row.as_ref().map(draw_from_row).transpose()
        })
    }

    fn draw_for_competition(
        &self,
        competition_id: CompetitionId,
    ) -> StoreFuture<'_, Option<DrawRecord>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {DRAW_COLUMNS} FROM draws WHERE competition_id = $1"
            ))
            .bind(competition_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(draw_from_row).transpose()
        })
    }

    fn winners_for_draw(&self, draw_id: DrawId) -> StoreFuture<'_, Vec<Winner>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {WINNER_COLUMNS} FROM winners WHERE draw_id = $1 ORDER BY rank"
            ))
            .bind(draw_id.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            collect(&rows, winner_from_row)
        })
    }

    fn annotate_draw(
        &self,
        draw_id: DrawId,
        notes: Option<String>,
        evidence: Vec<String>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE draws
                 SET notes = COALESCE($2, notes),
                     evidence = evidence || $3::jsonb
                 WHERE id = $1",
            )
            .bind(draw_id.as_uuid())
            .bind(notes)
            .bind(Json(evidence))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn mark_winner_notified(
        &self,
        winner_id: WinnerId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, bool> {
        Box::pin(async move {
            let result = sqlx::query("UPDATE winners SET notified_at = $2 WHERE id = $1")
                .bind(winner_id.as_uuid())
                .bind(at)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(result.rows_affected() > 0)
        })
    }

    fn unnotified_winners(&self, primary_only: bool, limit: u32) -> StoreFuture<'_, Vec<Winner>> {
        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {WINNER_COLUMNS} FROM winners
                 WHERE notified_at IS NULL AND (NOT $1 OR rank = 0)
                 ORDER BY draw_id, rank
                 LIMIT $2"
            ))
            .bind(primary_only)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
            collect(&rows, winner_from_row)
        })
    }

    fn claim_winner(&self, code: ClaimCode, at: DateTime<Utc>) -> StoreFuture<'_, Option<Winner>> {
        Box::pin(async move {
            let row = sqlx::query(&format!(
                "UPDATE winners SET claimed_at = $2
                 WHERE claim_code = $1 AND claimed_at IS NULL
                 RETURNING {WINNER_COLUMNS}"
            ))
            .bind(code.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
            row.as_ref().map(winner_from_row).transpose()
        })
    }

    fn due_automatic_draws(&self, now: DateTime<Utc>) -> StoreFuture<'_, Vec<CompetitionId>> {
        Box::pin(async move {
            let rows = sqlx::query(
                "SELECT c.id FROM competitions c
                 WHERE c.draw_mode = 'automatic'
                   AND c.status IN ('live', 'closed')
                   AND c.draw_at <= $1
                   AND NOT EXISTS (SELECT 1 FROM draws d WHERE d.competition_id = c.id)
                 ORDER BY c.draw_at",
            )
            .bind(now)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

            rows.iter()
                .map(|row| {
                    let id: Uuid = row.try_get("id").map_err(db_error)?;
                    Ok(CompetitionId::from_uuid(id))
                })
                .collect()
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
            Ok(())
        })
    }
}
