//! Property tests for chunk splitting/reassembly and incremental batch sizing.

use arena_core::{scoped_rng, EntityKey, PeerId, SimTime, Vec2};
use arena_net::host_sync::{fit_batch, select_batch};
use arena_net::{
    decode, ChunkEndOutcome, ChunkTable, Chunker, Message, ReplicationStore, DEFAULT_MAX_PAYLOAD,
};
use proptest::prelude::*;
use rand::seq::SliceRandom;
use std::collections::BTreeSet;

/// Feed physical records into a table; returns the reassembled record.
fn reassemble(records: &[String]) -> Option<String> {
    let sender = PeerId::from("h");
    let mut table = ChunkTable::new();
    let mut out = None;
    for record in records {
        match decode(record) {
            Message::ChunkStart {
                kind_tag,
                total,
                chunk_id,
            } => {
                table.start(&sender, &chunk_id, &kind_tag, total, SimTime::ZERO);
            }
            Message::ChunkPart {
                chunk_id,
                index,
                data,
            } => {
                table.part(&sender, &chunk_id, index, &data, SimTime::ZERO);
            }
            Message::ChunkEnd { chunk_id } => {
                if let ChunkEndOutcome::Completed(record) = table.end(&sender, &chunk_id) {
                    out = Some(record);
                }
            }
            other => panic!("unexpected physical record {other:?}"),
        }
    }
    out
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: chunking then reassembly reproduces the record exactly
    #[test]
    fn reassembly_is_exact(
        body in "[a-zA-Z0-9|;,. ]{900,9000}",
        seed in any::<u64>(),
    ) {
        let wire = format!("GS|{body}");
        let mut chunker = Chunker::new(DEFAULT_MAX_PAYLOAD, scoped_rng(seed, "prop"));
        let records = chunker.split(&wire);

        prop_assert!(records.len() >= 3);
        for record in &records {
            prop_assert!(record.len() <= DEFAULT_MAX_PAYLOAD, "record of {} bytes", record.len());
        }
        prop_assert_eq!(reassemble(&records), Some(wire));
    }

    /// Property: parts may arrive in any order between start and end
    #[test]
    fn reassembly_is_order_tolerant(
        body in "[a-z0-9;,]{2000,5000}",
        order in any::<u64>(),
    ) {
        let wire = format!("ES|{body}");
        let mut chunker = Chunker::new(DEFAULT_MAX_PAYLOAD, scoped_rng(1, "prop"));
        let mut records = chunker.split(&wire);

        let end = records.pop().unwrap();
        let mut parts = records.split_off(1);
        parts.shuffle(&mut scoped_rng(order, "shuffle"));
        records.extend(parts);
        records.push(end);

        prop_assert_eq!(reassemble(&records), Some(wire));
    }

    /// Property: records that fit are never chunked
    #[test]
    fn small_records_pass_through(body in "[a-z0-9|]{0,880}") {
        let wire = format!("EV|{body}");
        let mut chunker = Chunker::new(DEFAULT_MAX_PAYLOAD, scoped_rng(0, "prop"));
        let records = chunker.split(&wire);
        if wire.len() <= DEFAULT_MAX_PAYLOAD {
            prop_assert_eq!(records, vec![wire]);
        }
    }

    /// Property: an incremental batch never exceeds the entity cap or the
    /// payload ceiling, whatever the population
    #[test]
    fn incremental_batch_respects_caps(
        positions in prop::collection::vec((-1.0e5f32..1.0e5, -1.0e5f32..1.0e5), 0..200),
        max_batch in 1usize..40,
        ceiling in 120usize..1200,
    ) {
        let mut store = ReplicationStore::new();
        for (i, (x, y)) in positions.iter().enumerate() {
            store.upsert(
                EntityKey::hostile(i as u32 + 1),
                Vec2::new(*x, *y),
                123.456,
                SimTime::ZERO,
            );
        }
        let batch = select_batch(&store, &[Vec2::ZERO], &BTreeSet::new(), max_batch);
        prop_assert!(batch.len() <= max_batch);
        prop_assert_eq!(batch.len(), positions.len().min(max_batch));

        if !batch.is_empty() {
            let (n, wire) = fit_batch(&batch, ceiling);
            prop_assert!(n >= 1 && n <= batch.len());
            prop_assert!(wire.len() <= ceiling || n == 1);
        }
    }
}

#[test]
fn settings_blob_of_3000_bytes_needs_four_parts() {
    let wire = format!("GS|{}", "x".repeat(2997));
    assert_eq!(wire.len(), 3000);
    let mut chunker = Chunker::new(900, scoped_rng(7, "blob"));
    let records = chunker.split(&wire);

    // start + ceil(2998 / 850) parts + end
    assert_eq!(records.len(), 4 + 2);
    assert_eq!(reassemble(&records), Some(wire));
}
