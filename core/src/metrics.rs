//! Business metrics for reservations and draws.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `prize_draw_reservations_total{outcome}` - Reservation calls by outcome
//! - `prize_draw_tickets_reserved_total` - Ticket numbers reserved
//! - `prize_draw_tickets_released_total` - Reservations released by callers
//! - `prize_draw_tickets_reclaimed_total` - Expired reservations swept
//! - `prize_draw_tickets_promoted_total` - Tickets promoted to ACTIVE
//! - `prize_draw_draws_total{method}` - Draws recorded
//! - `prize_draw_verifications_total{outcome}` - Verification results
//! - `prize_draw_notifications_total{outcome}` - Winner notification outcomes
//!
//! ## Histograms
//! - `prize_draw_reservation_attempts` - Insert attempts per successful reservation

use metrics::{describe_counter, describe_histogram};

/// Register metric descriptions. Call once at start-up.
pub fn register_metrics() {
    describe_counter!(
        "prize_draw_reservations_total",
        "Reservation calls by outcome (reserved, insufficient, contention, rejected)"
    );
    describe_counter!("prize_draw_tickets_reserved_total", "Ticket numbers reserved");
    describe_counter!(
        "prize_draw_tickets_released_total",
        "Reserved tickets released by their holder"
    );
    describe_counter!(
        "prize_draw_tickets_reclaimed_total",
        "Expired reservations deleted by reclamation"
    );
    describe_counter!(
        "prize_draw_tickets_promoted_total",
        "Tickets promoted to ACTIVE after payment confirmation"
    );
    describe_counter!("prize_draw_draws_total", "Draws recorded by method");
    describe_counter!(
        "prize_draw_verifications_total",
        "Draw verifications by outcome (verified, mismatch)"
    );
    describe_counter!(
        "prize_draw_notifications_total",
        "Winner notifications by outcome (delivered, failed)"
    );
    describe_histogram!(
        "prize_draw_reservation_attempts",
        "Insert attempts needed per successful reservation"
    );

    tracing::info!("Prize draw metrics registered");
}

pub(crate) fn record_reservation(outcome: &'static str) {
    metrics::counter!("prize_draw_reservations_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_reserved(quantity: u32, attempts: u32) {
    record_reservation("reserved");
    metrics::counter!("prize_draw_tickets_reserved_total").increment(u64::from(quantity));
    metrics::histogram!("prize_draw_reservation_attempts").record(f64::from(attempts));
}

pub(crate) fn record_released(count: u64) {
    metrics::counter!("prize_draw_tickets_released_total").increment(count);
}

pub(crate) fn record_reclaimed(count: u64) {
    metrics::counter!("prize_draw_tickets_reclaimed_total").increment(count);
}

pub(crate) fn record_promoted(count: u64) {
    metrics::counter!("prize_draw_tickets_promoted_total").increment(count);
}

pub(crate) fn record_draw(method: &'static str) {
    metrics::counter!("prize_draw_draws_total", "method" => method).increment(1);
}

pub(crate) fn record_verification(verified: bool) {
    let outcome = if verified { "verified" } else { "mismatch" };
    metrics::counter!("prize_draw_verifications_total", "outcome" => outcome).increment(1);
}

pub(crate) fn record_notification(delivered: bool) {
    let outcome = if delivered { "delivered" } else { "failed" };
    metrics::counter!("prize_draw_notifications_total", "outcome" => outcome).increment(1);
}
