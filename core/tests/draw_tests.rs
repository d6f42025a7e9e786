//! Draw engine: recording, atomicity, manual draws, notification and claims.

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::expect_used)] // Tests can expect

use chrono::Duration;
use prize_draw_core::draw::SCHEDULER_ACTOR;
use prize_draw_core::fairness::{MANUAL_ALGORITHM, RANKING_ALGORITHM, select_winners};
use prize_draw_core::{
    ClaimCode, Clock, CompetitionId, CompetitionStatus, DrawId, DrawMethod, DrawOrigin, Error,
    OwnerId, Seed, SnapshotEntry, Ticket, TicketLimit, TicketStatus,
};
use prize_draw_testing::{FailPoint, TestHarness, n, numbers};
use std::collections::HashSet;

fn admin() -> DrawOrigin {
    DrawOrigin::Admin(Some("ops@example.com".into()))
}

async fn eligible_entries(harness: &TestHarness, competition: CompetitionId) -> Vec<SnapshotEntry> {
    harness
        .store
        .tickets(competition)
        .await
        .iter()
        .filter(|t| t.is_eligible())
        .map(Ticket::entry)
        .collect()
}

#[tokio::test]
async fn draw_records_seed_snapshot_and_ranked_winners() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(20)).await;
    harness.sell_to_many(competition, 8).await;
    let snapshot = eligible_entries(&harness, competition).await;

    let outcome = harness.core.run_draw(competition, 3, admin()).await.unwrap();
    let draw = &outcome.draw;

    // The harness entropy hands out [0x42; 32] for the first draw.
    let seed = Seed::from_bytes([0x42; 32]);
    assert_eq!(draw.seed, seed);
    assert_eq!(draw.algorithm, RANKING_ALGORITHM);
    assert_eq!(draw.snapshot, snapshot);
    assert_eq!(draw.result, select_winners(&seed, &snapshot, 3).unwrap());
    assert_eq!(draw.method, DrawMethod::AdminTriggered);
    assert_eq!(draw.initiated_by.as_deref(), Some("ops@example.com"));

    assert_eq!(outcome.winners.len(), 3);
    for (winner, (entry, rank)) in outcome.winners.iter().zip(draw.result.iter().zip(0u32..)) {
        assert_eq!(winner.rank, rank);
        assert_eq!(winner.ticket_id, entry.ticket_id);
        assert_eq!(winner.owner_id, entry.owner_id);
        let ticket = harness.store.ticket(competition, winner.ticket_number).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Winner);
    }
    assert!(outcome.winners[0].is_primary());

    let stored = harness.store.competition(competition).await.unwrap();
    assert_eq!(stored.status, CompetitionStatus::Drawn);
    assert_eq!(stored.drawn_at, Some(harness.clock.now()));

    assert_eq!(harness.core.get_draw(draw.id).await.unwrap(), *draw);
    assert_eq!(
        harness.core.draw_for_competition(competition).await.unwrap(),
        Some(draw.clone())
    );
    assert_eq!(harness.core.winners_for_draw(draw.id).await.unwrap(), outcome.winners);
    assert!(harness.core.verify_draw(draw.id).await.unwrap());
}

#[tokio::test]
async fn snapshot_holds_only_paid_valid_tickets() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(20)).await;
    harness.sell(competition, OwnerId::new(), 4).await;
    harness.core.reserve(competition, 3, Some(OwnerId::new())).await.unwrap();
    harness.core.set_ticket_validity(competition, n(2), false).await.unwrap();

    let outcome = harness.core.run_draw(competition, 1, admin()).await.unwrap();

    let drawn: Vec<_> = outcome.draw.snapshot.iter().map(|e| e.ticket_number).collect();
    assert_eq!(drawn, numbers([1, 3, 4]));
}

#[tokio::test]
async fn winners_are_distinct_tickets() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Unlimited).await;
    harness.sell(competition, OwnerId::new(), 30).await;

    let outcome = harness.core.run_draw(competition, 30, admin()).await.unwrap();

    let ids: HashSet<_> = outcome.winners.iter().map(|w| w.ticket_id).collect();
    assert_eq!(ids.len(), 30);
    let codes: HashSet<_> = outcome.winners.iter().map(|w| w.claim_code.clone()).collect();
    assert_eq!(codes.len(), 30);
}

#[tokio::test]
async fn too_few_entries_records_nothing() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;

    let error = harness.core.run_draw(competition, 3, admin()).await.unwrap_err();
    assert_eq!(
        error,
        Error::InsufficientEntries {
            competition_id: competition,
            requested: 3,
            available: 2,
        }
    );

    let none = harness.core.run_draw(competition, 0, admin()).await.unwrap_err();
    assert!(matches!(none, Error::Validation { .. }));

    assert_eq!(harness.store.draw_count().await, 0);
    assert_eq!(harness.store.winner_count().await, 0);
    assert_eq!(
        harness.store.competition(competition).await.unwrap().status,
        CompetitionStatus::Live
    );
}

#[tokio::test]
async fn empty_competition_cannot_be_drawn() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;

    let error = harness.core.run_draw(competition, 1, admin()).await.unwrap_err();
    assert!(matches!(error, Error::InsufficientEntries { available: 0, .. }));
}

#[tokio::test]
async fn second_draw_is_rejected() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 3).await;

    let first = harness.core.run_draw(competition, 1, admin()).await.unwrap();
    let error = harness.core.run_draw(competition, 1, admin()).await.unwrap_err();
    assert_eq!(error, Error::AlreadyDrawn(competition));

    let manual = harness
        .core
        .run_manual_draw(competition, n(1), None, None)
        .await
        .unwrap_err();
    assert_eq!(manual, Error::AlreadyDrawn(competition));

    assert_eq!(harness.store.draw_count().await, 1);
    assert_eq!(
        harness.core.draw_for_competition(competition).await.unwrap().unwrap().id,
        first.draw.id
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_draws_record_once() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(50)).await;
    harness.sell_to_many(competition, 10).await;

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let core = harness.core.clone();
            tokio::spawn(async move { core.run_draw(competition, 2, DrawOrigin::Admin(None)).await })
        })
        .collect();

    let mut recorded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => recorded += 1,
            Err(error) => assert_eq!(error, Error::AlreadyDrawn(competition)),
        }
    }
    assert_eq!(recorded, 1);
    assert_eq!(harness.store.draw_count().await, 1);
    assert_eq!(harness.store.winner_count().await, 2);
}

#[tokio::test]
async fn only_live_or_closed_competitions_are_drawable() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;

    for status in [CompetitionStatus::Draft, CompetitionStatus::Cancelled] {
        let mut stored = harness.store.competition(competition).await.unwrap();
        stored.status = status;
        harness.store.put_competition(stored).await;

        let error = harness.core.run_draw(competition, 1, admin()).await.unwrap_err();
        assert!(matches!(error, Error::NotDrawable { .. }), "{status:?}");
    }

    let mut stored = harness.store.competition(competition).await.unwrap();
    stored.status = CompetitionStatus::Closed;
    harness.store.put_competition(stored).await;
    harness.core.run_draw(competition, 1, admin()).await.unwrap();
}

#[tokio::test]
async fn failed_recording_leaves_no_trace() {
    for point in [
        FailPoint::InsertDraw,
        FailPoint::InsertWinners,
        FailPoint::MarkTicketsWon,
        FailPoint::MarkCompetitionDrawn,
        FailPoint::Commit,
    ] {
        let harness = TestHarness::new();
        let competition = harness.live_competition(TicketLimit::Limited(10)).await;
        harness.sell_to_many(competition, 4).await;

        harness.store.fail_at(point);
        let error = harness.core.run_draw(competition, 2, admin()).await.unwrap_err();
        assert!(matches!(error, Error::Storage(_)), "{point:?}: {error}");

        assert_eq!(harness.store.draw_count().await, 0, "{point:?}");
        assert_eq!(harness.store.winner_count().await, 0, "{point:?}");
        assert!(
            harness
                .store
                .tickets(competition)
                .await
                .iter()
                .all(|t| t.status == TicketStatus::Active),
            "{point:?}"
        );
        assert_eq!(
            harness.store.competition(competition).await.unwrap().status,
            CompetitionStatus::Live,
            "{point:?}"
        );
        assert!(harness.notifier.notices().is_empty(), "{point:?}");

        harness.store.clear_faults();
        harness.core.run_draw(competition, 2, admin()).await.unwrap();
    }
}

#[tokio::test]
async fn manual_draw_records_the_designated_ticket() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    let owners = harness.sell_to_many(competition, 5).await;

    let outcome = harness
        .core
        .run_manual_draw(
            competition,
            n(4),
            Some("live stream draw".into()),
            Some("host@example.com".into()),
        )
        .await
        .unwrap();

    let draw = &outcome.draw;
    assert_eq!(draw.method, DrawMethod::Manual);
    assert_eq!(draw.algorithm, MANUAL_ALGORITHM);
    assert_eq!(draw.snapshot, draw.result);
    assert_eq!(draw.result.len(), 1);
    assert_eq!(draw.result[0].ticket_number, n(4));
    assert_eq!(draw.notes.as_deref(), Some("live stream draw"));
    assert_eq!(outcome.winners.len(), 1);
    assert_eq!(outcome.winners[0].owner_id, Some(owners[3]));
    assert!(harness.core.verify_draw(draw.id).await.unwrap());
}

#[tokio::test]
async fn manual_draw_needs_an_eligible_ticket() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;
    harness.core.reserve(competition, 1, None).await.unwrap();
    harness.core.set_ticket_validity(competition, n(2), false).await.unwrap();

    for number in [2, 3, 9] {
        let error = harness
            .core
            .run_manual_draw(competition, n(number), None, None)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation { .. }), "ticket {number}");
    }
    assert_eq!(harness.store.draw_count().await, 0);
}

#[tokio::test]
async fn primary_winner_is_notified_after_commit() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 5).await;

    let outcome = harness.core.run_draw(competition, 3, admin()).await.unwrap();
    let primary = &outcome.winners[0];

    let notices = harness.notifier.wait_for(1).await;
    assert_eq!(notices[0].claim_code, primary.claim_code);
    assert_eq!(notices[0].ticket_number, primary.ticket_number);
    assert_eq!(notices[0].owner_id, primary.owner_id);
    assert!(harness.wait_until_notified(primary.id).await);

    // Reserves are not contacted by default.
    assert_eq!(harness.notifier.notices().len(), 1);
    let reserve = harness.store.winner(outcome.winners[1].id).await.unwrap();
    assert!(!reserve.is_notified());
}

#[tokio::test]
async fn notification_is_retried() {
    let harness = TestHarness::with_failing_notifier(2);
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;

    let outcome = harness.core.run_draw(competition, 1, admin()).await.unwrap();

    harness.notifier.wait_for(1).await;
    assert_eq!(harness.notifier.attempts(), 3);
    assert!(harness.wait_until_notified(outcome.winners[0].id).await);
}

#[tokio::test]
async fn undeliverable_notification_keeps_the_draw() {
    let harness = TestHarness::with_failing_notifier(10);
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;

    let outcome = harness.core.run_draw(competition, 1, admin()).await.unwrap();
    let delivered = harness
        .core
        .draws()
        .dispatcher()
        .deliver(outcome.winners[0].clone())
        .await;

    assert!(!delivered);
    assert!(harness.notifier.notices().is_empty());
    assert!(!harness.store.winner(outcome.winners[0].id).await.unwrap().is_notified());
    assert_eq!(harness.store.draw_count().await, 1);
}

#[tokio::test]
async fn abandoned_notification_is_redelivered_on_a_later_pass() {
    // Three failures for the dispatch after the draw, three for the first
    // redelivery pass, one more before the notifier recovers.
    let harness = TestHarness::with_failing_notifier(7);
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 4).await;

    let outcome = harness.core.run_draw(competition, 2, admin()).await.unwrap();
    let primary = outcome.winners[0].id;
    assert!(!harness.wait_until_notified(primary).await);
    assert_eq!(harness.notifier.attempts(), 3);

    assert_eq!(harness.core.redeliver_notifications(10).await.unwrap(), 0);
    assert!(!harness.store.winner(primary).await.unwrap().is_notified());

    assert_eq!(harness.core.redeliver_notifications(10).await.unwrap(), 1);
    let notices = harness.notifier.notices();
    assert_eq!(notices.len(), 1);
    assert_eq!(notices[0].ticket_number, outcome.winners[0].ticket_number);
    assert!(harness.store.winner(primary).await.unwrap().is_notified());

    // Only the primary is owed a notification.
    assert_eq!(harness.core.redeliver_notifications(10).await.unwrap(), 0);
    assert!(!harness.store.winner(outcome.winners[1].id).await.unwrap().is_notified());
}

#[tokio::test]
async fn claim_codes_redeem_once() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 3).await;
    let outcome = harness.core.run_draw(competition, 2, admin()).await.unwrap();
    let reserve = &outcome.winners[1];

    let presented = ClaimCode::new(format!("  {}  ", reserve.claim_code.as_str().to_lowercase()));
    let claimed = harness.core.claim_prize(presented).await.unwrap();
    assert_eq!(claimed.id, reserve.id);
    assert_eq!(claimed.claimed_at, Some(harness.clock.now()));

    let again = harness.core.claim_prize(reserve.claim_code.clone()).await.unwrap_err();
    assert_eq!(again, Error::WinnerNotFound);

    let unknown = harness.core.claim_prize(ClaimCode::new("NOPE")).await.unwrap_err();
    assert_eq!(unknown, Error::WinnerNotFound);
}

#[tokio::test]
async fn annotation_touches_only_notes_and_evidence() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 3).await;
    let outcome = harness.core.run_draw(competition, 1, admin()).await.unwrap();
    let draw_id = outcome.draw.id;

    harness
        .core
        .annotate_draw(
            draw_id,
            Some("witnessed by J. Doe".into()),
            vec!["https://video.example.com/draw-1".into()],
        )
        .await
        .unwrap();
    let annotated = harness
        .core
        .annotate_draw(draw_id, None, vec!["witness-statement.pdf".into()])
        .await
        .unwrap();

    assert_eq!(annotated.notes.as_deref(), Some("witnessed by J. Doe"));
    assert_eq!(
        annotated.evidence,
        vec![
            "https://video.example.com/draw-1".to_string(),
            "witness-statement.pdf".to_string()
        ]
    );
    assert_eq!(annotated.seed, outcome.draw.seed);
    assert_eq!(annotated.snapshot, outcome.draw.snapshot);
    assert_eq!(annotated.result, outcome.draw.result);
    assert!(harness.core.verify_draw(draw_id).await.unwrap());

    let blank = harness
        .core
        .annotate_draw(draw_id, None, vec!["   ".into()])
        .await
        .unwrap_err();
    assert!(matches!(blank, Error::Validation { .. }));

    let missing = DrawId::new();
    assert_eq!(
        harness.core.annotate_draw(missing, None, Vec::new()).await.unwrap_err(),
        Error::DrawNotFound(missing)
    );
}

#[tokio::test]
async fn unknown_draws_are_reported() {
    let harness = TestHarness::new();
    let missing = DrawId::new();

    assert_eq!(harness.core.get_draw(missing).await.unwrap_err(), Error::DrawNotFound(missing));
    assert_eq!(
        harness.core.winners_for_draw(missing).await.unwrap_err(),
        Error::DrawNotFound(missing)
    );
    assert_eq!(
        harness.core.verify_draw(missing).await.unwrap_err(),
        Error::DrawNotFound(missing)
    );
}

#[tokio::test]
async fn validity_is_frozen_once_drawn() {
    let harness = TestHarness::new();
    let competition = harness.live_competition(TicketLimit::Limited(10)).await;
    harness.sell_to_many(competition, 2).await;
    harness.core.run_draw(competition, 1, admin()).await.unwrap();

    let error = harness
        .core
        .set_ticket_validity(competition, n(1), false)
        .await
        .unwrap_err();
    assert_eq!(error, Error::AlreadyDrawn(competition));
}

#[tokio::test]
async fn scheduler_finds_due_automatic_draws() {
    let harness = TestHarness::new();
    let due_soon = harness
        .automatic_competition(TicketLimit::Limited(10), Duration::hours(1))
        .await;
    let later = harness
        .automatic_competition(TicketLimit::Limited(10), Duration::days(2))
        .await;
    let manual = harness.live_competition(TicketLimit::Limited(10)).await;
    for competition in [due_soon, later, manual] {
        harness.sell_to_many(competition, 2).await;
    }

    assert!(harness.core.due_automatic_draws().await.unwrap().is_empty());

    harness.clock.advance(Duration::hours(1));
    assert_eq!(harness.core.due_automatic_draws().await.unwrap(), vec![due_soon]);

    let outcome = harness
        .core
        .run_draw(due_soon, 1, DrawOrigin::Scheduler)
        .await
        .unwrap();
    assert_eq!(outcome.draw.method, DrawMethod::Automatic);
    assert_eq!(outcome.draw.initiated_by.as_deref(), Some(SCHEDULER_ACTOR));

    assert!(harness.core.due_automatic_draws().await.unwrap().is_empty());
}
