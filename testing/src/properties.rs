//! proptest strategies for draw inputs.

use prize_draw_core::types::{OwnerId, SEED_LEN, Seed, SnapshotEntry, TicketId, TicketNumber};
use proptest::prelude::*;
use uuid::Uuid;

/// Any 256-bit seed.
pub fn arb_seed() -> impl Strategy<Value = Seed> {
    any::<[u8; SEED_LEN]>().prop_map(Seed::from_bytes)
}

/// A snapshot of `1..=max_len` tickets with distinct ids, numbered 1.. in
/// order, some owned by guests.
pub fn arb_snapshot(max_len: usize) -> impl Strategy<Value = Vec<SnapshotEntry>> {
    prop::collection::vec((any::<u128>(), any::<Option<u128>>()), 1..=max_len.max(1)).prop_map(
        |rows| {
            rows.into_iter()
                .zip(1u32..)
                .filter_map(|((id, owner), number)| {
                    Some(SnapshotEntry {
                        // Mix in the number so generated ids never collide.
                        ticket_id: TicketId::from_uuid(Uuid::from_u128(
                            id.wrapping_shl(32) | u128::from(number),
                        )),
                        ticket_number: TicketNumber::new(number)?,
                        owner_id: owner.map(|o| OwnerId::from_uuid(Uuid::from_u128(o))),
                    })
                })
                .collect()
        },
    )
}

/// A snapshot together with a winner count that fits it.
pub fn arb_draw_input(max_len: usize) -> impl Strategy<Value = (Seed, Vec<SnapshotEntry>, usize)> {
    (arb_seed(), arb_snapshot(max_len)).prop_flat_map(|(seed, snapshot)| {
        let len = snapshot.len();
        (Just(seed), Just(snapshot), 1..=len)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn snapshots_are_canonical((_, snapshot, count) in arb_draw_input(50)) {
            let ids: HashSet<_> = snapshot.iter().map(|e| e.ticket_id).collect();
            prop_assert_eq!(ids.len(), snapshot.len());
            prop_assert!(snapshot.windows(2).all(|w| w[0].ticket_number < w[1].ticket_number));
            prop_assert!((1..=snapshot.len()).contains(&count));
        }
    }
}
