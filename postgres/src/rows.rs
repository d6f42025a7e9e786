//! Row decoding and value conversions shared by the store and its transactions.

use prize_draw_core::store::StoreError;
use prize_draw_core::types::{
    ClaimCode, Competition, CompetitionId, CompetitionStatus, DrawId, DrawMethod, DrawRecord,
    Order, OrderId, OrderStatus, OwnerId, SEED_LEN, Seed, SnapshotEntry, Ticket, TicketId,
    TicketLimit, TicketNumber, TicketStatus, Winner, WinnerId,
};
use sqlx::Row;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use uuid::Uuid;

pub(crate) const COMPETITION_COLUMNS: &str =
    "id, ticket_limit, tickets_sold, status, draw_at, ends_at, drawn_at, draw_mode";

pub(crate) const TICKET_COLUMNS: &str =
    "id, competition_id, ticket_number, status, owner_id, order_id, reserved_until, is_valid, created_at";

pub(crate) const ORDER_COLUMNS: &str =
    "id, competition_id, owner_id, status, ticket_count, created_at, completed_at";

pub(crate) const DRAW_COLUMNS: &str = "id, competition_id, seed, algorithm, snapshot, snapshot_fingerprint, \
     result, method, initiated_by, notes, evidence, created_at";

pub(crate) const WINNER_COLUMNS: &str = "id, draw_id, competition_id, ticket_id, ticket_number, \
     owner_id, rank, claim_code, notified_at, claimed_at";

/// Map a sqlx error, keeping uniqueness conflicts distinguishable.
pub(crate) fn db_error(error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &error {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unknown").to_string();
            metrics::counter!("prize_draw.store.unique_conflicts", "constraint" => constraint.clone())
                .increment(1);
            return StoreError::UniqueViolation { constraint };
        }
    }
    StoreError::Database(error.to_string())
}

fn decode_error(column: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Serialization(format!("column {column}: {detail}"))
}

fn get<'r, T>(row: &'r PgRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(column).map_err(|e| decode_error(column, e))
}

pub(crate) fn to_db_count(value: u32) -> i64 {
    i64::from(value)
}

fn from_db_count(column: &str, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| decode_error(column, format!("{value} out of range")))
}

pub(crate) fn to_db_number(number: TicketNumber) -> i64 {
    i64::from(number.value())
}

pub(crate) fn to_db_numbers(numbers: &[TicketNumber]) -> Vec<i64> {
    numbers.iter().copied().map(to_db_number).collect()
}

pub(crate) fn from_db_number(value: i64) -> Result<TicketNumber, StoreError> {
    u32::try_from(value)
        .ok()
        .and_then(TicketNumber::new)
        .ok_or_else(|| decode_error("ticket_number", format!("{value} is not a ticket number")))
}

fn parse_enum<T>(column: &str, raw: &str, parse: fn(&str) -> Option<T>) -> Result<T, StoreError> {
    parse(raw).ok_or_else(|| decode_error(column, format!("unknown value {raw:?}")))
}

pub(crate) fn competition_from_row(row: &PgRow) -> Result<Competition, StoreError> {
    let limit: Option<i64> = get(row, "ticket_limit")?;
    let limit = limit
        .map(|limit| from_db_count("ticket_limit", limit))
        .transpose()?;
    let status: String = get(row, "status")?;
    let draw_mode: String = get(row, "draw_mode")?;

    Ok(Competition {
        id: CompetitionId::from_uuid(get(row, "id")?),
        ticket_limit: TicketLimit::from_option(limit),
        tickets_sold: from_db_count("tickets_sold", get(row, "tickets_sold")?)?,
        status: parse_enum("status", &status, CompetitionStatus::parse)?,
        draw_at: get(row, "draw_at")?,
        ends_at: get(row, "ends_at")?,
        drawn_at: get(row, "drawn_at")?,
        draw_mode: parse_enum("draw_mode", &draw_mode, DrawMethod::parse)?,
    })
}

pub(crate) fn ticket_from_row(row: &PgRow) -> Result<Ticket, StoreError> {
    let status: String = get(row, "status")?;
    let owner_id: Option<Uuid> = get(row, "owner_id")?;
    let order_id: Option<Uuid> = get(row, "order_id")?;

    Ok(Ticket {
        id: TicketId::from_uuid(get(row, "id")?),
        competition_id: CompetitionId::from_uuid(get(row, "competition_id")?),
        number: from_db_number(get(row, "ticket_number")?)?,
        status: parse_enum("status", &status, TicketStatus::parse)?,
        owner_id: owner_id.map(OwnerId::from_uuid),
        order_id: order_id.map(OrderId::from_uuid),
        reserved_until: get(row, "reserved_until")?,
        is_valid: get(row, "is_valid")?,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn order_from_row(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = get(row, "status")?;
    Ok(Order {
        id: OrderId::from_uuid(get(row, "id")?),
        competition_id: CompetitionId::from_uuid(get(row, "competition_id")?),
        owner_id: OwnerId::from_uuid(get(row, "owner_id")?),
        status: parse_enum("status", &status, OrderStatus::parse)?,
        ticket_count: from_db_count("ticket_count", get(row, "ticket_count")?)?,
        created_at: get(row, "created_at")?,
        completed_at: get(row, "completed_at")?,
    })
}

pub(crate) fn entry_from_row(row: &PgRow) -> Result<SnapshotEntry, StoreError> {
    let owner_id: Option<Uuid> = get(row, "owner_id")?;
    Ok(SnapshotEntry {
        ticket_id: TicketId::from_uuid(get(row, "id")?),
        ticket_number: from_db_number(get(row, "ticket_number")?)?,
        owner_id: owner_id.map(OwnerId::from_uuid),
    })
}

pub(crate) fn draw_from_row(row: &PgRow) -> Result<DrawRecord, StoreError> {
    let seed: Vec<u8> = get(row, "seed")?;
    let seed: [u8; SEED_LEN] = seed
        .as_slice()
        .try_into()
        .map_err(|_| decode_error("seed", format!("expected {SEED_LEN} bytes, got {}", seed.len())))?;
    let method: String = get(row, "method")?;
    let Json(snapshot): Json<Vec<SnapshotEntry>> = get(row, "snapshot")?;
    let Json(result): Json<Vec<SnapshotEntry>> = get(row, "result")?;
    let Json(evidence): Json<Vec<String>> = get(row, "evidence")?;

    Ok(DrawRecord {
        id: DrawId::from_uuid(get(row, "id")?),
        competition_id: CompetitionId::from_uuid(get(row, "competition_id")?),
        seed: Seed::from_bytes(seed),
        algorithm: get(row, "algorithm")?,
        snapshot,
        snapshot_fingerprint: get(row, "snapshot_fingerprint")?,
        result,
        method: parse_enum("method", &method, DrawMethod::parse)?,
        initiated_by: get(row, "initiated_by")?,
        notes: get(row, "notes")?,
        evidence,
        created_at: get(row, "created_at")?,
    })
}

pub(crate) fn winner_from_row(row: &PgRow) -> Result<Winner, StoreError> {
    let owner_id: Option<Uuid> = get(row, "owner_id")?;
    let rank: i32 = get(row, "rank")?;
    let claim_code: String = get(row, "claim_code")?;

    Ok(Winner {
        id: WinnerId::from_uuid(get(row, "id")?),
        draw_id: DrawId::from_uuid(get(row, "draw_id")?),
        competition_id: CompetitionId::from_uuid(get(row, "competition_id")?),
        ticket_id: TicketId::from_uuid(get(row, "ticket_id")?),
        ticket_number: from_db_number(get(row, "ticket_number")?)?,
        owner_id: owner_id.map(OwnerId::from_uuid),
        rank: u32::try_from(rank).map_err(|_| decode_error("rank", rank))?,
        claim_code: ClaimCode::new(claim_code),
        notified_at: get(row, "notified_at")?,
        claimed_at: get(row, "claimed_at")?,
    })
}

pub(crate) fn collect<T>(
    rows: &[PgRow],
    decode: fn(&PgRow) -> Result<T, StoreError>,
) -> Result<Vec<T>, StoreError> {
    rows.iter().map(decode).collect()
}
