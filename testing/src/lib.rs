//! # Prize Draw Testing
//!
//! Test doubles and fixtures for `prize-draw-core`.
//!
//! This crate provides:
//! - An in-memory [`TicketStore`](prize_draw_core::store::TicketStore) with
//!   fault injection
//! - Deterministic clock, entropy and notifier doubles
//! - [`TestHarness`]: a fully wired core with handles on every double
//! - proptest strategies for draw inputs
//!
//! ## Example
//!
//! ```ignore
//! use prize_draw_testing::{TestHarness, n};
//! use prize_draw_core::{DrawOrigin, OwnerId, TicketLimit};
//!
//! #[tokio::test]
//! async fn draw_picks_a_sold_ticket() {
//!     let harness = TestHarness::new();
//!     let competition = harness.live_competition(TicketLimit::Limited(10)).await;
//!     harness.sell(competition, OwnerId::new(), 3).await;
//!
//!     let outcome = harness
//!         .core
//!         .run_draw(competition, 1, DrawOrigin::Admin(None))
//!         .await
//!         .unwrap();
//!     assert!(outcome.winners[0].ticket_number <= n(3));
//! }
//! ```

pub mod fixtures;
pub mod mocks;
pub mod properties;
pub mod store;

pub use fixtures::{TestHarness, fast_notification_policy, n, numbers};
pub use mocks::{FixedClock, FixedEntropy, MockClock, RecordingNotifier, test_clock, test_epoch};
pub use store::{FailPoint, InMemoryTicketStore};

/// Install a test-friendly tracing subscriber once per process.
///
/// Honours `RUST_LOG`; output is captured by the test harness.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
