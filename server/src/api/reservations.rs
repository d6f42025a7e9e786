//! Reservation endpoints:
//!
//! - `POST /api/competitions/:id/reservations` - reserve the lowest free numbers
//! - `DELETE /api/competitions/:id/reservations` - release held numbers
//! - `GET /api/competitions/:id/availability` - capacity picture
//! - `GET /api/competitions/:id/owners/:owner_id/tickets` - a buyer's tickets
//! - `PUT /api/competitions/:id/tickets/:number/validity` - skill-question result

use super::{ticket_number, ticket_numbers};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use prize_draw_core::{Availability, CompetitionId, OwnerId, Reservation, Ticket};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to reserve tickets.
#[derive(Debug, Deserialize)]
pub struct ReserveRequest {
    /// Number of tickets to reserve
    pub quantity: u32,
    /// Buyer, if signed in
    pub owner_id: Option<Uuid>,
}

/// Request to release held tickets.
#[derive(Debug, Deserialize)]
pub struct ReleaseRequest {
    /// Holder (omit for a guest hold)
    pub owner_id: Option<Uuid>,
    /// Numbers to release (omit to release all of the owner's holds)
    pub ticket_numbers: Option<Vec<u32>>,
}

/// Response after releasing tickets.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    /// Rows released
    pub released: u64,
}

/// Request to set a ticket's skill-question validity.
#[derive(Debug, Deserialize)]
pub struct ValidityRequest {
    /// Whether the attached answer was correct
    pub is_valid: bool,
}

/// Reserve tickets.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/competitions/<id>/reservations \
///   -H "Content-Type: application/json" \
///   -d '{"quantity": 3, "owner_id": "550e8400-e29b-41d4-a716-446655440000"}'
/// ```
pub async fn reserve(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
    Json(request): Json<ReserveRequest>,
) -> Result<(StatusCode, Json<Reservation>), AppError> {
    let reservation = state
        .core
        .reserve(
            CompetitionId::from_uuid(competition_id),
            request.quantity,
            request.owner_id.map(OwnerId::from_uuid),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(reservation)))
}

/// Release held tickets. Releasing numbers that are no longer held is not an error.
pub async fn release(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
    Json(request): Json<ReleaseRequest>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let numbers = request
        .ticket_numbers
        .as_deref()
        .map(ticket_numbers)
        .transpose()?;
    let released = state
        .core
        .release(
            CompetitionId::from_uuid(competition_id),
            request.owner_id.map(OwnerId::from_uuid),
            numbers,
        )
        .await?;
    Ok(Json(ReleaseResponse { released }))
}

/// Capacity picture of a competition.
pub async fn availability(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
) -> Result<Json<Availability>, AppError> {
    let availability = state
        .core
        .availability(CompetitionId::from_uuid(competition_id))
        .await?;
    Ok(Json(availability))
}

/// Tickets currently held by a buyer.
pub async fn owner_tickets(
    State(state): State<AppState>,
    Path((competition_id, owner_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<Ticket>>, AppError> {
    let tickets = state
        .core
        .tickets_for_owner(
            CompetitionId::from_uuid(competition_id),
            OwnerId::from_uuid(owner_id),
        )
        .await?;
    Ok(Json(tickets))
}

/// Record a skill-question outcome for one ticket.
pub async fn set_validity(
    State(state): State<AppState>,
    Path((competition_id, number)): Path<(Uuid, u32)>,
    Json(request): Json<ValidityRequest>,
) -> Result<StatusCode, AppError> {
    state
        .core
        .set_ticket_validity(
            CompetitionId::from_uuid(competition_id),
            ticket_number(number)?,
            request.is_valid,
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
