//! Provably-fair winner selection.
//!
//! Pure functions only: the outcome depends on the seed, the snapshot and the
//! algorithm tag, never on time, storage iteration order or other randomness.
//! The draw engine calls [`select_winners`]; the verifier replays it through
//! [`verify_selection`] after [`snapshot_matches`] confirms the stored
//! snapshot is the one fingerprinted at draw time.
//!
//! # Algorithm `hmac-sha256-rank/v1`
//!
//! For every snapshot entry compute
//! `HMAC-SHA-256(key = seed, message = ticket_id)` where `ticket_id` is the
//! canonical lowercase hyphenated UUID text. Sort entries by digest (ties by
//! ticket number) and take the first `n`: the first is the primary winner, the
//! rest are reserves in order. Anyone holding the disclosed seed and snapshot
//! can reproduce this with a stock HMAC implementation.

use crate::types::{Seed, SnapshotEntry, SEED_LEN};
use hmac::digest::{Key, KeyInit};
use hmac::{Hmac, Mac};
use sha2::{Digest as _, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Algorithm tag of the keyed-hash ranking.
pub const RANKING_ALGORITHM: &str = "hmac-sha256-rank/v1";

/// Algorithm tag of operator-designated (manual) draws.
pub const MANUAL_ALGORITHM: &str = "manual-designation/v1";

type HmacSha256 = Hmac<Sha256>;

/// Keyed digest of one ticket.
pub type TicketDigest = [u8; 32];

/// Why a selection could not be made.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Zero winners requested.
    #[error("at least one winner must be selected")]
    NoWinnersRequested,

    /// More winners than entries.
    #[error("requested {requested} winners from {available} entries")]
    NotEnoughEntries {
        /// Winners requested
        requested: usize,
        /// Entries available
        available: usize,
    },

    /// The same ticket appears twice in the snapshot.
    #[error("ticket {0} appears more than once in the snapshot")]
    DuplicateEntry(String),
}

/// A snapshot entry with its keyed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedEntry {
    /// The entry
    pub entry: SnapshotEntry,
    /// `HMAC-SHA-256(seed, ticket_id)`
    pub digest: TicketDigest,
}

/// `HMAC-SHA-256(seed, ticket_id)`.
#[must_use]
pub fn ticket_digest(seed: &Seed, entry: &SnapshotEntry) -> TicketDigest {
    // HMAC zero-pads keys shorter than the block size, so this equals keying
    // with the raw 32-byte seed.
    let mut key = Key::<HmacSha256>::default();
    key[..SEED_LEN].copy_from_slice(seed.as_bytes());

    let mut mac = <HmacSha256 as KeyInit>::new(&key);
    mac.update(entry.ticket_id.to_string().as_bytes());
    mac.finalize().into_bytes().into()
}

/// Rank every entry by keyed digest.
///
/// # Errors
///
/// Returns [`SelectionError::DuplicateEntry`] if a ticket appears twice.
pub fn rank(seed: &Seed, snapshot: &[SnapshotEntry]) -> Result<Vec<RankedEntry>, SelectionError> {
    let mut seen = HashSet::with_capacity(snapshot.len());
    for entry in snapshot {
        if !seen.insert(entry.ticket_id) {
            return Err(SelectionError::DuplicateEntry(entry.ticket_id.to_string()));
        }
    }

    let mut ranked: Vec<RankedEntry> = snapshot
        .iter()
        .map(|entry| RankedEntry {
            entry: *entry,
            digest: ticket_digest(seed, entry),
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.digest
            .cmp(&b.digest)
            .then_with(|| a.entry.ticket_number.cmp(&b.entry.ticket_number))
    });

    Ok(ranked)
}

/// Select `count` winners: primary first, then reserves.
///
/// # Errors
///
/// - `NoWinnersRequested` when `count == 0`
/// - `NotEnoughEntries` when `count` exceeds the snapshot size
/// - `DuplicateEntry` when the snapshot repeats a ticket
pub fn select_winners(
    seed: &Seed,
    snapshot: &[SnapshotEntry],
    count: usize,
) -> Result<Vec<SnapshotEntry>, SelectionError> {
    if count == 0 {
        return Err(SelectionError::NoWinnersRequested);
    }
    if count > snapshot.len() {
        return Err(SelectionError::NotEnoughEntries {
            requested: count,
            available: snapshot.len(),
        });
    }

    Ok(rank(seed, snapshot)?
        .into_iter()
        .take(count)
        .map(|ranked| ranked.entry)
        .collect())
}

/// Replay a selection and compare it with the recorded result.
///
/// Returns false for unknown algorithm tags, malformed snapshots, or any
/// difference in membership or order.
#[must_use]
pub fn verify_selection(
    algorithm: &str,
    seed: &Seed,
    snapshot: &[SnapshotEntry],
    result: &[SnapshotEntry],
) -> bool {
    match algorithm {
        RANKING_ALGORITHM => {
            select_winners(seed, snapshot, result.len()).is_ok_and(|replayed| replayed == result)
        }
        MANUAL_ALGORITHM => snapshot.len() == 1 && result == snapshot,
        _ => false,
    }
}

/// SHA-256 over the canonical snapshot lines `ticket_id:number:owner\n`.
///
/// Published alongside a draw so observers can check that the snapshot they
/// are shown is the one that was drawn.
#[must_use]
pub fn snapshot_fingerprint(snapshot: &[SnapshotEntry]) -> String {
    let mut hasher = Sha256::new();
    for entry in snapshot {
        let owner = entry
            .owner_id
            .map_or_else(|| "-".to_string(), |owner| owner.to_string());
        hasher.update(format!("{}:{}:{owner}\n", entry.ticket_id, entry.ticket_number).as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Whether `snapshot` is the one committed to by `fingerprint` at draw time.
///
/// The snapshot must be in canonical order (which rules out repeated ticket
/// numbers), must not repeat a ticket id, and must hash to `fingerprint`.
#[must_use]
pub fn snapshot_matches(snapshot: &[SnapshotEntry], fingerprint: &str) -> bool {
    let mut ids = HashSet::with_capacity(snapshot.len());
    is_canonical_order(snapshot)
        && snapshot.iter().all(|entry| ids.insert(entry.ticket_id))
        && snapshot_fingerprint(snapshot) == fingerprint
}

/// Whether the snapshot is ordered by strictly ascending ticket number.
#[must_use]
pub fn is_canonical_order(snapshot: &[SnapshotEntry]) -> bool {
    snapshot
        .windows(2)
        .all(|pair| pair[0].ticket_number < pair[1].ticket_number)
}
