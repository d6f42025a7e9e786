//! Router configuration for the prize draw server.

use crate::api::{draws, maintenance, orders, reservations};
use crate::health::{health_check, readiness_check};
use crate::state::AppState;
use axum::{
    Router,
    routing::{get, patch, post, put},
};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// Health probes sit at the root; everything else is nested under `/api`.
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Inventory
        .route(
            "/competitions/:id/reservations",
            post(reservations::reserve).delete(reservations::release),
        )
        .route(
            "/competitions/:id/availability",
            get(reservations::availability),
        )
        .route(
            "/competitions/:id/owners/:owner_id/tickets",
            get(reservations::owner_tickets),
        )
        .route(
            "/competitions/:id/tickets/:number/validity",
            put(reservations::set_validity),
        )
        // Checkout
        .route("/orders/:order_id/bind", post(orders::bind))
        .route("/orders/:order_id/confirm", post(orders::confirm))
        // Draws
        .route("/competitions/:id/draws", post(draws::run_draw))
        .route("/competitions/:id/draws/manual", post(draws::run_manual_draw))
        .route("/competitions/:id/draw", get(draws::draw_for_competition))
        .route("/draws/:draw_id", get(draws::get_draw))
        .route("/draws/:draw_id/verify", get(draws::verify_draw))
        .route("/draws/:draw_id/audit", get(draws::audit_draw))
        .route("/draws/:draw_id/annotations", patch(draws::annotate_draw))
        .route("/winners/claim", post(draws::claim_prize))
        // Operations
        .route("/maintenance/reclaim", post(maintenance::reclaim));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
