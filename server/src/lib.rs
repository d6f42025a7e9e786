//! # Prize Draw Server
//!
//! HTTP surface and background maintenance for [`prize_draw_core`].
//!
//! ```text
//!   HTTP clients ──► axum router ──► PrizeDrawCore ──► PostgresTicketStore
//!                                        ▲
//!   Scheduler (reclaim sweep, automatic draws)
//! ```
//!
//! - [`config`]: environment configuration
//! - [`routes`]: the router; handlers live in [`api`] and [`health`]
//! - [`jobs`]: reclamation sweep and automatic draw poller
//! - [`telemetry`]: tracing subscriber and Prometheus exporter

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod jobs;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::Config;
pub use error::AppError;
pub use jobs::Scheduler;
pub use routes::build_router;
pub use state::AppState;
