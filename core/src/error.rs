//! Error taxonomy for the prize draw core.
//!
//! Every variant carries enough structured detail (competition, ticket numbers,
//! remaining counts) for the caller to decide whether and how to retry.

use crate::store::StoreError;
use crate::types::{CompetitionId, DrawId, OrderId, TicketNumber};
use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the allocator, lifecycle manager, draw engine and verifier.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════
    /// Bad input or a competition in the wrong state. Nothing was written.
    #[error("Validation failed: {reason}")]
    Validation {
        /// What was wrong
        reason: String,
    },

    /// Competition does not exist.
    #[error("Competition {0} not found")]
    CompetitionNotFound(CompetitionId),

    /// Order does not exist.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// No ticket with this number exists in the competition.
    #[error("Ticket {ticket_number} not found in competition {competition_id}")]
    TicketNotFound {
        /// Competition
        competition_id: CompetitionId,
        /// Number looked up
        ticket_number: TicketNumber,
    },

    // ═══════════════════════════════════════════════════════════
    // Reservation
    // ═══════════════════════════════════════════════════════════
    /// Fewer tickets remain than were requested.
    #[error("Insufficient inventory for competition {competition_id}: requested {requested}, only {remaining} remain")]
    InsufficientInventory {
        /// Competition
        competition_id: CompetitionId,
        /// Requested quantity
        requested: u32,
        /// Tickets still available
        remaining: u32,
    },

    /// Lost the allocation race on every attempt.
    #[error("Tickets for competition {competition_id} are in high demand, retry later (gave up after {attempts} attempts)")]
    Contention {
        /// Competition
        competition_id: CompetitionId,
        /// Attempts made
        attempts: u32,
    },

    /// The claimed reservations are expired, missing, or held by someone else.
    #[error("Tickets no longer reserved for competition {competition_id}: {reason}")]
    StaleReservation {
        /// Competition
        competition_id: CompetitionId,
        /// What did not match
        reason: String,
        /// Numbers involved
        ticket_numbers: Vec<TicketNumber>,
    },

    // ═══════════════════════════════════════════════════════════
    // Draws
    // ═══════════════════════════════════════════════════════════
    /// The competition already has a draw.
    #[error("Competition {0} has already been drawn")]
    AlreadyDrawn(CompetitionId),

    /// The competition status does not allow a draw.
    #[error("Competition {competition_id} cannot be drawn: {reason}")]
    NotDrawable {
        /// Competition
        competition_id: CompetitionId,
        /// Why not
        reason: String,
    },

    /// More winners requested than eligible tickets exist.
    #[error("Cannot select {requested} winners for competition {competition_id}: only {available} eligible tickets")]
    InsufficientEntries {
        /// Competition
        competition_id: CompetitionId,
        /// Winners requested
        requested: u32,
        /// Eligible tickets in the snapshot
        available: u32,
    },

    /// Draw record does not exist.
    #[error("Draw {0} not found")]
    DrawNotFound(DrawId),

    /// No winner holds the presented claim code, or it was already used.
    #[error("Winner not found for claim code")]
    WinnerNotFound,

    /// A stored draw failed verification.
    #[error("Draw {draw_id} failed integrity verification: {reason}")]
    Integrity {
        /// Draw
        draw_id: DrawId,
        /// What failed
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════
    /// Storage failure. The store was left unchanged.
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Shorthand for a validation error.
    #[must_use]
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call later may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Contention { .. } | Self::Storage(_))
    }

    /// Stable machine-readable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::CompetitionNotFound(_) => "COMPETITION_NOT_FOUND",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::TicketNotFound { .. } => "TICKET_NOT_FOUND",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::Contention { .. } => "HIGH_DEMAND",
            Self::StaleReservation { .. } => "STALE_RESERVATION",
            Self::AlreadyDrawn(_) => "ALREADY_DRAWN",
            Self::NotDrawable { .. } => "NOT_DRAWABLE",
            Self::InsufficientEntries { .. } => "INSUFFICIENT_ENTRIES",
            Self::DrawNotFound(_) => "DRAW_NOT_FOUND",
            Self::WinnerNotFound => "WINNER_NOT_FOUND",
            Self::Integrity { .. } => "INTEGRITY_ERROR",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Storage(error.to_string())
    }
}
