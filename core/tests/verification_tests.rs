//! Replaying stored draws, detecting tampering, audit transcripts.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use prize_draw_core::fairness::{MANUAL_ALGORITHM, snapshot_fingerprint, ticket_digest};
use prize_draw_core::verifier::verify_record;
use prize_draw_core::{
    CompetitionId, DrawMethod, DrawOrigin, DrawOutcome, DrawRecord, Error, OwnerId, Seed,
    SnapshotEntry, TicketId, TicketLimit,
};
use prize_draw_testing::{TestHarness, n};

async fn drawn(harness: &TestHarness, entries: usize, winners: u32) -> (CompetitionId, DrawOutcome) {
    let competition = harness.live_competition(TicketLimit::Limited(100)).await;
    harness.sell_to_many(competition, entries).await;
    let outcome = harness
        .core
        .run_draw(competition, winners, DrawOrigin::Admin(None))
        .await
        .unwrap();
    (competition, outcome)
}

#[tokio::test]
async fn untouched_draw_verifies() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 12, 3).await;

    assert!(harness.core.verify_draw(outcome.draw.id).await.unwrap());
    let record = harness.core.ensure_draw_integrity(outcome.draw.id).await.unwrap();
    assert_eq!(record, outcome.draw);
}

#[tokio::test]
async fn flipped_seed_byte_is_detected() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 12, 3).await;
    let draw_id = outcome.draw.id;

    harness
        .store
        .tamper_draw(draw_id, |draw| {
            let mut bytes = *draw.seed.as_bytes();
            bytes[17] ^= 0x01;
            draw.seed = Seed::from_bytes(bytes);
        })
        .await;

    assert!(!harness.core.verify_draw(draw_id).await.unwrap());
    assert!(matches!(
        harness.core.ensure_draw_integrity(draw_id).await,
        Err(Error::Integrity { .. })
    ));
    assert!(!harness.core.audit_draw(draw_id).await.unwrap().verified);
}

/// Draw once, apply `edit` to the stored record, and report whether it still
/// verifies.
async fn verifies_after(
    entries: usize,
    winners: u32,
    edit: impl FnOnce(&mut DrawRecord),
) -> bool {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, entries, winners).await;
    harness.store.tamper_draw(outcome.draw.id, edit).await;
    harness.core.verify_draw(outcome.draw.id).await.unwrap()
}

fn first_loser(draw: &DrawRecord) -> usize {
    draw.snapshot
        .iter()
        .position(|entry| !draw.result.contains(entry))
        .unwrap()
}

#[tokio::test]
async fn edited_snapshot_is_detected() {
    // A losing entry handed to a different ticket id.
    assert!(
        !verifies_after(12, 1, |draw| {
            let loser = first_loser(draw);
            draw.snapshot[loser].ticket_id = TicketId::new();
        })
        .await
    );

    // A losing entry handed to a different owner.
    assert!(
        !verifies_after(12, 1, |draw| {
            let loser = first_loser(draw);
            draw.snapshot[loser].owner_id = Some(OwnerId::new());
        })
        .await
    );

    // A losing entry removed and the rest reversed.
    assert!(
        !verifies_after(12, 1, |draw| {
            let loser = first_loser(draw);
            draw.snapshot.remove(loser);
            draw.snapshot.reverse();
        })
        .await
    );
}

#[tokio::test]
async fn rewritten_fingerprint_is_detected() {
    // Recomputing the fingerprint over an edited snapshot still fails when
    // the edit breaks canonical order or repeats a ticket.
    assert!(
        !verifies_after(10, 2, |draw| {
            draw.snapshot.reverse();
            draw.snapshot_fingerprint = snapshot_fingerprint(&draw.snapshot);
        })
        .await
    );
    assert!(
        !verifies_after(10, 2, |draw| {
            let loser = first_loser(draw);
            let other = (loser + 1) % draw.snapshot.len();
            draw.snapshot[loser].ticket_id = draw.snapshot[other].ticket_id;
            draw.snapshot_fingerprint = snapshot_fingerprint(&draw.snapshot);
        })
        .await
    );
}

#[tokio::test]
async fn audit_reports_a_broken_commitment() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 6, 1).await;
    harness
        .store
        .tamper_draw(outcome.draw.id, |draw| {
            let loser = first_loser(draw);
            draw.snapshot[loser].owner_id = None;
        })
        .await;

    let audit = harness.core.audit_draw(outcome.draw.id).await.unwrap();
    assert!(!audit.snapshot_intact);
    assert!(!audit.verified);
    assert_eq!(audit.snapshot_fingerprint, outcome.draw.snapshot_fingerprint);
}

#[tokio::test]
async fn winner_missing_from_snapshot_is_detected() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 12, 1).await;

    harness
        .store
        .tamper_draw(outcome.draw.id, |draw| {
            let primary = draw.result[0].ticket_id;
            draw.snapshot.retain(|entry| entry.ticket_id != primary);
        })
        .await;
    assert!(!harness.core.verify_draw(outcome.draw.id).await.unwrap());
}

#[tokio::test]
async fn reordered_or_replaced_result_is_detected() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 10, 3).await;
    let draw_id = outcome.draw.id;

    harness
        .store
        .tamper_draw(draw_id, |draw| draw.result.swap(0, 1))
        .await;
    assert!(!harness.core.verify_draw(draw_id).await.unwrap());

    let mut replaced = outcome.draw.clone();
    let loser = replaced
        .snapshot
        .iter()
        .copied()
        .find(|entry| !replaced.result.contains(entry))
        .unwrap();
    replaced.result[0] = loser;
    assert!(!verify_record(&replaced));
}

#[tokio::test]
async fn unknown_algorithm_never_verifies() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 5, 1).await;

    harness
        .store
        .tamper_draw(outcome.draw.id, |draw| {
            draw.algorithm = "hmac-sha256-rank/v2".to_string();
        })
        .await;
    assert!(!harness.core.verify_draw(outcome.draw.id).await.unwrap());
}

#[tokio::test]
async fn winner_rows_must_match_the_result() {
    let harness = TestHarness::new();
    let (_, outcome) = drawn(&harness, 8, 2).await;
    let draw_id = outcome.draw.id;

    harness
        .store
        .tamper_winner(outcome.winners[0].id, |winner| {
            winner.ticket_id = TicketId::new();
        })
        .await;

    // The record itself still replays.
    assert!(harness.core.verify_draw(draw_id).await.unwrap());
    let error = harness.core.ensure_draw_integrity(draw_id).await.unwrap_err();
    assert!(matches!(error, Error::Integrity { draw_id: id, .. } if id == draw_id));
}

#[tokio::test]
async fn audit_transcript_lists_digests_in_rank_order() {
    let harness = TestHarness::new();
    let (competition, outcome) = drawn(&harness, 9, 3).await;

    let audit = harness.core.audit_draw(outcome.draw.id).await.unwrap();

    assert_eq!(audit.draw_id, outcome.draw.id);
    assert_eq!(audit.competition_id, competition);
    assert_eq!(audit.method, DrawMethod::AdminTriggered);
    assert_eq!(audit.seed_hex, outcome.draw.seed.to_hex());
    assert_eq!(audit.snapshot_size, 9);
    assert_eq!(audit.snapshot_fingerprint, snapshot_fingerprint(&outcome.draw.snapshot));
    assert!(audit.snapshot_canonical);
    assert!(audit.snapshot_intact);
    assert!(audit.verified);

    let digests: Vec<String> = audit
        .result
        .iter()
        .map(|entry| entry.digest_hex.clone().unwrap())
        .collect();
    assert!(digests.windows(2).all(|pair| pair[0] < pair[1]));
    for (audited, entry) in audit.result.iter().zip(&outcome.draw.result) {
        assert_eq!(audited.ticket_id, entry.ticket_id);
        assert_eq!(
            audited.digest_hex.as_deref(),
            Some(hex_digest(&outcome.draw.seed, entry).as_str())
        );
    }
    assert_eq!(audit.result[0].rank, 0);
}

#[tokio::test]
async fn manual_draw_audit_has_no_digests() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell(competition, OwnerId::new(), 3).await;
    let outcome = harness
        .core
        .run_manual_draw(competition, n(2), None, Some("ops".into()))
        .await
        .unwrap();

    let audit = harness.core.audit_draw(outcome.draw.id).await.unwrap();
    assert_eq!(audit.algorithm, MANUAL_ALGORITHM);
    assert_eq!(audit.snapshot_size, 1);
    assert_eq!(audit.result[0].ticket_number, n(2));
    assert!(audit.result[0].digest_hex.is_none());
    assert!(audit.verified);

    // A manual record padded with extra entries no longer verifies.
    harness
        .store
        .tamper_draw(outcome.draw.id, |draw| {
            let extra = draw.snapshot[0];
            draw.snapshot.push(extra);
        })
        .await;
    assert!(!harness.core.verify_draw(outcome.draw.id).await.unwrap());
}

fn hex_digest(seed: &Seed, entry: &SnapshotEntry) -> String {
    ticket_digest(seed, entry)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
