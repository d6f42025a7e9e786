//! Application state for the prize draw HTTP server.

use prize_draw_core::PrizeDrawCore;

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; the core holds its collaborators behind `Arc`s.
#[derive(Clone, Debug)]
pub struct AppState {
    /// The prize draw core
    pub core: PrizeDrawCore,

    /// Winners selected when a draw request does not say
    pub default_winner_count: u32,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub const fn new(core: PrizeDrawCore, default_winner_count: u32) -> Self {
        Self {
            core,
            default_winner_count,
        }
    }
}
