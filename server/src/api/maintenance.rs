//! `POST /api/maintenance/reclaim` - delete lapsed reservations now.
//!
//! The scheduler does this on an interval; the endpoint lets operators force
//! a sweep, optionally for a single competition.

use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Query, State},
};
use prize_draw_core::CompetitionId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Optional scope of a sweep.
#[derive(Debug, Default, Deserialize)]
pub struct ReclaimQuery {
    /// Only this competition
    pub competition_id: Option<Uuid>,
}

/// Sweep result.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReclaimResponse {
    /// Rows deleted
    pub reclaimed: u64,
}

/// Run reclamation.
pub async fn reclaim(
    State(state): State<AppState>,
    Query(query): Query<ReclaimQuery>,
) -> Result<Json<ReclaimResponse>, AppError> {
    let reclaimed = state
        .core
        .reclaim_expired(query.competition_id.map(CompetitionId::from_uuid))
        .await?;
    Ok(Json(ReclaimResponse { reclaimed }))
}
