//! Draw Verifier.
//!
//! Replays a stored draw from its seed and snapshot. A mismatch is reported as
//! `false`, not as an error: it means the record is corrupt or was tampered
//! with, which is a finding about the data rather than a bad request.

use crate::environment::CoreEnvironment;
use crate::error::{Error, Result};
use crate::fairness::{self, RANKING_ALGORITHM};
use crate::metrics;
use crate::types::{CompetitionId, DrawId, DrawMethod, DrawRecord, TicketId, TicketNumber};
use serde::{Deserialize, Serialize};

/// Everything a third party needs to re-derive a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawAudit {
    /// Draw
    pub draw_id: DrawId,
    /// Competition
    pub competition_id: CompetitionId,
    /// How the draw was initiated
    pub method: DrawMethod,
    /// Algorithm tag
    pub algorithm: String,
    /// Disclosed seed, lowercase hex
    pub seed_hex: String,
    /// Entries in the snapshot
    pub snapshot_size: usize,
    /// SHA-256 of the canonical snapshot lines, as recorded at draw time
    pub snapshot_fingerprint: String,
    /// The stored snapshot still hashes to the recorded fingerprint
    pub snapshot_intact: bool,
    /// Snapshot is in ascending ticket-number order
    pub snapshot_canonical: bool,
    /// Stored result with the keyed digest of each entry
    pub result: Vec<AuditedEntry>,
    /// Replay matched the stored result
    pub verified: bool,
}

/// One result entry in an audit transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditedEntry {
    /// Position (0 = primary)
    pub rank: u32,
    /// Ticket ID
    pub ticket_id: TicketId,
    /// Ticket number
    pub ticket_number: TicketNumber,
    /// `HMAC-SHA-256(seed, ticket_id)` in hex; absent for manual draws
    pub digest_hex: Option<String>,
}

/// Replays stored draws.
#[derive(Debug, Clone)]
pub struct DrawVerifier {
    env: CoreEnvironment,
}

impl DrawVerifier {
    /// Create a verifier.
    #[must_use]
    pub const fn new(env: CoreEnvironment) -> Self {
        Self { env }
    }

    async fn load(&self, draw_id: DrawId) -> Result<DrawRecord> {
        self.env
            .store
            .load_draw(draw_id)
            .await?
            .ok_or(Error::DrawNotFound(draw_id))
    }

    /// Whether the stored result is exactly what the seed and snapshot produce.
    ///
    /// # Errors
    ///
    /// - `DrawNotFound`
    /// - `Storage`
    pub async fn verify_draw(&self, draw_id: DrawId) -> Result<bool> {
        let record = self.load(draw_id).await?;
        let verified = verify_record(&record);
        metrics::record_verification(verified);
        if !verified {
            tracing::warn!(draw_id = %draw_id, algorithm = %record.algorithm, "Draw replay mismatch");
        }
        Ok(verified)
    }

    /// Like [`Self::verify_draw`], but a mismatch is an `Integrity` error.
    ///
    /// Also checks that the winner rows agree with the stored result.
    ///
    /// # Errors
    ///
    /// - `Integrity`: replay or winner rows disagree with the record
    /// - `DrawNotFound`
    /// - `Storage`
    pub async fn ensure_draw_integrity(&self, draw_id: DrawId) -> Result<DrawRecord> {
        let record = self.load(draw_id).await?;
        let verified = verify_record(&record);
        metrics::record_verification(verified);

        let fail = |reason: String| -> Result<DrawRecord> {
            tracing::error!(draw_id = %draw_id, reason = %reason, "Draw failed integrity verification");
            Err(Error::Integrity { draw_id, reason })
        };

        if !verified {
            return fail(format!(
                "result does not replay from the stored seed and snapshot under {}",
                record.algorithm
            ));
        }

        let mut winners = self.env.store.winners_for_draw(draw_id).await?;
        winners.sort_by_key(|winner| winner.rank);
        let winner_tickets: Vec<TicketId> = winners.iter().map(|w| w.ticket_id).collect();
        let result_tickets: Vec<TicketId> = record.result.iter().map(|e| e.ticket_id).collect();
        if winner_tickets != result_tickets {
            return fail(format!(
                "{} winner rows do not match the {} recorded result entries",
                winner_tickets.len(),
                result_tickets.len()
            ));
        }

        Ok(record)
    }

    /// Audit transcript of a draw.
    ///
    /// # Errors
    ///
    /// - `DrawNotFound`
    /// - `Storage`
    pub async fn audit_draw(&self, draw_id: DrawId) -> Result<DrawAudit> {
        let record = self.load(draw_id).await?;
        Ok(audit_record(&record))
    }
}

/// Check a record in memory: the snapshot must still match its recorded
/// fingerprint, and the result must replay from the seed and snapshot.
#[must_use]
pub fn verify_record(record: &DrawRecord) -> bool {
    fairness::snapshot_matches(&record.snapshot, &record.snapshot_fingerprint)
        && fairness::verify_selection(
            &record.algorithm,
            &record.seed,
            &record.snapshot,
            &record.result,
        )
}

/// Build the audit transcript for a record.
#[must_use]
pub fn audit_record(record: &DrawRecord) -> DrawAudit {
    let ranked = record.algorithm == RANKING_ALGORITHM;
    let result = record
        .result
        .iter()
        .zip(0u32..)
        .map(|(entry, rank)| AuditedEntry {
            rank,
            ticket_id: entry.ticket_id,
            ticket_number: entry.ticket_number,
            digest_hex: ranked.then(|| hex::encode(fairness::ticket_digest(&record.seed, entry))),
        })
        .collect();

    DrawAudit {
        draw_id: record.id,
        competition_id: record.competition_id,
        method: record.method,
        algorithm: record.algorithm.clone(),
        seed_hex: record.seed.to_hex(),
        snapshot_size: record.snapshot.len(),
        snapshot_fingerprint: record.snapshot_fingerprint.clone(),
        snapshot_intact: fairness::snapshot_matches(&record.snapshot, &record.snapshot_fingerprint),
        snapshot_canonical: fairness::is_canonical_order(&record.snapshot),
        result,
        verified: verify_record(record),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fairness::{MANUAL_ALGORITHM, select_winners};
    use crate::types::{Seed, SnapshotEntry};
    use chrono::Utc;

    fn record(entries: u32, winners: usize) -> DrawRecord {
        let snapshot: Vec<SnapshotEntry> = (1..=entries)
            .map(|n| SnapshotEntry {
                ticket_id: TicketId::new(),
                ticket_number: TicketNumber::new(n).unwrap(),
                owner_id: None,
            })
            .collect();
        let seed = Seed::from_bytes([0x5a; 32]);
        let result = select_winners(&seed, &snapshot, winners).unwrap();
        DrawRecord {
            id: DrawId::new(),
            competition_id: CompetitionId::new(),
            seed,
            algorithm: RANKING_ALGORITHM.to_string(),
            snapshot_fingerprint: fairness::snapshot_fingerprint(&snapshot),
            snapshot,
            result,
            method: DrawMethod::AdminTriggered,
            initiated_by: None,
            notes: None,
            evidence: Vec::new(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn audit_discloses_seed_and_digests() {
        let draw = record(12, 3);
        let audit = audit_record(&draw);

        assert!(audit.verified);
        assert!(audit.snapshot_canonical);
        assert_eq!(audit.seed_hex, "5a".repeat(32));
        assert_eq!(audit.snapshot_size, 12);
        assert_eq!(audit.result.len(), 3);

        // Digests in the transcript are in ascending order, which is the ranking.
        let digests: Vec<String> = audit.result.iter().map(|e| e.digest_hex.clone().unwrap()).collect();
        let mut sorted = digests.clone();
        sorted.sort();
        assert_eq!(digests, sorted);
    }

    #[test]
    fn tampered_result_fails_replay() {
        let mut draw = record(12, 3);
        draw.result.swap(1, 2);
        assert!(!verify_record(&draw));
        assert!(!audit_record(&draw).verified);
    }

    #[test]
    fn edited_loser_fails_commitment() {
        let mut draw = record(12, 1);
        let loser = draw
            .snapshot
            .iter()
            .position(|entry| *entry != draw.result[0])
            .unwrap();
        draw.snapshot[loser].owner_id = Some(crate::types::OwnerId::new());

        let audit = audit_record(&draw);
        assert!(!audit.snapshot_intact);
        assert!(!audit.verified);
    }

    #[test]
    fn manual_audit_has_no_digests() {
        let mut draw = record(1, 1);
        draw.algorithm = MANUAL_ALGORITHM.to_string();
        assert!(audit_record(&draw).snapshot_intact);
        draw.method = DrawMethod::Manual;

        let audit = audit_record(&draw);
        assert!(audit.verified);
        assert!(audit.result[0].digest_hex.is_none());
    }
}
