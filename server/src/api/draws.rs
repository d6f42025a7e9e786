//! Draw endpoints:
//!
//! - `POST /api/competitions/:id/draws` - ranked draw
//! - `POST /api/competitions/:id/draws/manual` - operator-designated winner
//! - `GET /api/competitions/:id/draw` - the competition's draw and winners
//! - `GET /api/draws/:draw_id` - a draw and its winners
//! - `GET /api/draws/:draw_id/verify` - replay the draw
//! - `GET /api/draws/:draw_id/audit` - audit transcript
//! - `PATCH /api/draws/:draw_id/annotations` - notes and evidence
//! - `POST /api/winners/claim` - redeem a claim code
//!
//! A draw response discloses the seed. Draws run once the competition has
//! closed for sale, so there is nothing left to game.

use super::ticket_number;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use prize_draw_core::{
    ClaimCode, CompetitionId, DrawAudit, DrawId, DrawOrigin, DrawOutcome, DrawRecord, Winner,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to run a ranked draw.
#[derive(Debug, Default, Deserialize)]
pub struct RunDrawRequest {
    /// Winners to select (primary plus reserves); server default if omitted
    pub num_winners: Option<u32>,
    /// Administrator running the draw
    pub initiated_by: Option<String>,
}

/// Request to record a manual draw.
#[derive(Debug, Deserialize)]
pub struct ManualDrawRequest {
    /// Designated winning number
    pub ticket_number: u32,
    /// Why the draw was manual
    pub notes: Option<String>,
    /// Operator recording the draw
    pub initiated_by: Option<String>,
}

/// Verification result.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// Draw
    pub draw_id: DrawId,
    /// Replay matched the stored result
    pub verified: bool,
}

/// Request to annotate a draw.
#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    /// Replacement notes (omit to keep the current notes)
    pub notes: Option<String>,
    /// Evidence references to append
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Request to redeem a prize.
#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    /// Code issued to the winner
    pub claim_code: String,
}

/// Run a ranked draw.
///
/// ```bash
/// curl -X POST http://localhost:8080/api/competitions/<id>/draws \
///   -H "Content-Type: application/json" \
///   -d '{"num_winners": 3, "initiated_by": "ops@example.com"}'
/// ```
pub async fn run_draw(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
    Json(request): Json<RunDrawRequest>,
) -> Result<(StatusCode, Json<DrawOutcome>), AppError> {
    let num_winners = request.num_winners.unwrap_or(state.default_winner_count);
    let outcome = state
        .core
        .run_draw(
            CompetitionId::from_uuid(competition_id),
            num_winners,
            DrawOrigin::Admin(request.initiated_by),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// Record an operator-designated winner.
pub async fn run_manual_draw(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
    Json(request): Json<ManualDrawRequest>,
) -> Result<(StatusCode, Json<DrawOutcome>), AppError> {
    let outcome = state
        .core
        .run_manual_draw(
            CompetitionId::from_uuid(competition_id),
            ticket_number(request.ticket_number)?,
            request.notes,
            request.initiated_by,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// The draw of a competition, with winners.
pub async fn draw_for_competition(
    State(state): State<AppState>,
    Path(competition_id): Path<Uuid>,
) -> Result<Json<DrawOutcome>, AppError> {
    let competition_id = CompetitionId::from_uuid(competition_id);
    let draw = state
        .core
        .draw_for_competition(competition_id)
        .await?
        .ok_or_else(|| AppError::not_found("Draw for competition", competition_id))?;
    let winners = state.core.winners_for_draw(draw.id).await?;
    Ok(Json(DrawOutcome { draw, winners }))
}

/// A draw record with winners.
pub async fn get_draw(
    State(state): State<AppState>,
    Path(draw_id): Path<Uuid>,
) -> Result<Json<DrawOutcome>, AppError> {
    let draw_id = DrawId::from_uuid(draw_id);
    let draw = state.core.get_draw(draw_id).await?;
    let winners = state.core.winners_for_draw(draw_id).await?;
    Ok(Json(DrawOutcome { draw, winners }))
}

/// Replay a draw from its stored seed and snapshot.
pub async fn verify_draw(
    State(state): State<AppState>,
    Path(draw_id): Path<Uuid>,
) -> Result<Json<VerifyResponse>, AppError> {
    let draw_id = DrawId::from_uuid(draw_id);
    let verified = state.core.verify_draw(draw_id).await?;
    Ok(Json(VerifyResponse { draw_id, verified }))
}

/// Audit transcript of a draw.
pub async fn audit_draw(
    State(state): State<AppState>,
    Path(draw_id): Path<Uuid>,
) -> Result<Json<DrawAudit>, AppError> {
    let audit = state.core.audit_draw(DrawId::from_uuid(draw_id)).await?;
    Ok(Json(audit))
}

/// Update a draw's notes and append evidence.
pub async fn annotate_draw(
    State(state): State<AppState>,
    Path(draw_id): Path<Uuid>,
    Json(request): Json<AnnotateRequest>,
) -> Result<Json<DrawRecord>, AppError> {
    let draw = state
        .core
        .annotate_draw(DrawId::from_uuid(draw_id), request.notes, request.evidence)
        .await?;
    Ok(Json(draw))
}

/// Redeem a claim code.
pub async fn claim_prize(
    State(state): State<AppState>,
    Json(request): Json<ClaimRequest>,
) -> Result<Json<Winner>, AppError> {
    if request.claim_code.trim().is_empty() {
        return Err(AppError::validation("claim_code is required"));
    }
    let winner = state
        .core
        .claim_prize(ClaimCode::new(request.claim_code))
        .await?;
    Ok(Json(winner))
}
