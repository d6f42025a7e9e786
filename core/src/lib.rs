//! # Prize Draw Core
//!
//! Ticket inventory and the provably-fair draw engine for a ticketed
//! prize-draw platform.
//!
//! ## Components
//!
//! - **Reservation Allocator** ([`allocator`]): first-fit number allocation,
//!   backed by the store's `(competition, ticket number)` uniqueness constraint
//!   and retried with backoff when a batch loses a race
//! - **Lifecycle Manager** ([`lifecycle`]): bind holds to an order, promote
//!   them atomically on payment, reclaim expired holds
//! - **Draw Engine** ([`draw`]): snapshot, seed, keyed-hash ranking, atomic
//!   recording, out-of-band winner notification
//! - **Draw Verifier** ([`verifier`]): pure replay of a stored draw
//!
//! Expiry is a predicate over stored timestamps (`reserved_until <= now`
//! means free), not a timer. All cross-worker coordination goes through the
//! [`store::TicketStore`]; nothing here holds an in-process lock across I/O.
//!
//! ## Example
//!
//! ```ignore
//! use prize_draw_core::{CoreEnvironment, DrawOrigin, PrizeDrawCore};
//!
//! let core = PrizeDrawCore::with_defaults(CoreEnvironment::new(store, competitions));
//!
//! let reservation = core.reserve(competition_id, 3, Some(owner_id)).await?;
//! core.bind_to_order(competition_id, owner_id, reservation.ticket_numbers, order_id).await?;
//! core.confirm_payment(order_id).await?;
//!
//! let outcome = core.run_draw(competition_id, 1, DrawOrigin::Admin(None)).await?;
//! assert!(core.verify_draw(outcome.draw.id).await?);
//! ```

pub mod allocator;
pub mod draw;
pub mod environment;
pub mod error;
pub mod fairness;
pub mod lifecycle;
pub mod metrics;
pub mod retry;
pub mod service;
pub mod store;
pub mod types;
pub mod verifier;

pub use allocator::{ReservationAllocator, ReservationPolicy};
pub use draw::{DrawEngine, DrawOrigin, DrawOutcome, NotificationPolicy, WinnerDispatcher};
pub use environment::{
    Clock, CompetitionDirectory, CoreEnvironment, EntropySource, LoggingNotifier, NotifyError,
    OsEntropy, SystemClock, WinnerNotice, WinnerNotifier,
};
pub use error::{Error, Result};
pub use lifecycle::LifecycleManager;
pub use service::PrizeDrawCore;
pub use store::{StoreError, StoreFuture, StoreTransaction, TicketStore};
pub use types::*;
pub use verifier::{DrawAudit, DrawVerifier};
