//! HTTP API endpoints.
//!
//! - [`reservations`]: reserve, release, availability, owner listing, validity
//! - [`orders`]: bind reservations to an order, confirm payment
//! - [`draws`]: run, look up, verify, audit and annotate draws; claim prizes
//! - [`maintenance`]: on-demand reclamation

pub mod draws;
pub mod maintenance;
pub mod orders;
pub mod reservations;

use crate::error::AppError;
use prize_draw_core::TicketNumber;

/// Parse a ticket number from a request, rejecting zero.
pub(crate) fn ticket_number(value: u32) -> Result<TicketNumber, AppError> {
    TicketNumber::new(value)
        .ok_or_else(|| AppError::validation("ticket numbers start at 1"))
}

/// Parse a list of ticket numbers from a request.
pub(crate) fn ticket_numbers(values: &[u32]) -> Result<Vec<TicketNumber>, AppError> {
    values.iter().copied().map(ticket_number).collect()
}
