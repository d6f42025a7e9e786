//! Checkout endpoints:
//!
//! - `POST /api/orders/:order_id/bind` - attach held tickets to an order
//! - `POST /api/orders/:order_id/confirm` - payment cleared, promote tickets
//!
//! Both are called by the checkout and payment collaborators, not by buyers.
//! `confirm` is safe to repeat: gateways retry their callbacks.

use super::ticket_numbers;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    Json,
    extract::{Path, State},
};
use prize_draw_core::{CompetitionId, Order, OrderId, OwnerId, TicketNumber};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request to bind reservations to an order.
#[derive(Debug, Deserialize)]
pub struct BindRequest {
    /// Competition the tickets belong to
    pub competition_id: Uuid,
    /// Buyer placing the order
    pub owner_id: Uuid,
    /// Reserved numbers to include
    pub ticket_numbers: Vec<u32>,
}

/// Response after confirming payment.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConfirmResponse {
    /// Order
    pub order_id: OrderId,
    /// Numbers now ACTIVE
    pub ticket_numbers: Vec<TicketNumber>,
}

/// Bind reserved tickets to an order and extend their hold for checkout.
pub async fn bind(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<BindRequest>,
) -> Result<Json<Order>, AppError> {
    let numbers = ticket_numbers(&request.ticket_numbers)?;
    let order = state
        .core
        .bind_to_order(
            CompetitionId::from_uuid(request.competition_id),
            OwnerId::from_uuid(request.owner_id),
            numbers,
            OrderId::from_uuid(order_id),
        )
        .await?;
    Ok(Json(order))
}

/// Promote an order's tickets after payment.
pub async fn confirm(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<Json<ConfirmResponse>, AppError> {
    let order_id = OrderId::from_uuid(order_id);
    let ticket_numbers = state.core.confirm_payment(order_id).await?;
    Ok(Json(ConfirmResponse {
        order_id,
        ticket_numbers,
    }))
}
