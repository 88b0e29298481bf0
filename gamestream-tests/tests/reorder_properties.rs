//! Property-based tests for the reorder queue

use gamestream_protocol::{AddResult, ReorderConfig, ReorderQueue, SeqNumber};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn queue(start: u16, max_size: usize) -> ReorderQueue<u16> {
    let mut queue = ReorderQueue::new(ReorderConfig {
        max_size,
        max_queue_time: Duration::from_millis(10),
    });
    queue.set_next_expected(SeqNumber::new(start));
    queue
}

fn feed(queue: &mut ReorderQueue<u16>, seqs: &[u16], now: Instant, out: &mut Vec<u16>) {
    for &seq in seqs {
        match queue.add_at(SeqNumber::new(seq), seq, now) {
            AddResult::HandleNow(item) => out.push(item),
            AddResult::Ready => {
                while let Some(item) = queue.pop_ready() {
                    out.push(item);
                }
            }
            AddResult::Queued | AddResult::Rejected => {}
        }
    }
}

/// Offsets 0..n in random order
fn shuffled_window() -> impl Strategy<Value = Vec<u16>> {
    (1u16..24).prop_flat_map(|n| Just((0..n).collect::<Vec<u16>>()).prop_shuffle())
}

#[test]
fn test_spec_example_order() {
    let mut q = queue(3, 16);
    let mut out = Vec::new();
    feed(&mut q, &[5, 3, 4, 6], Instant::now(), &mut out);
    assert_eq!(out, vec![3, 4, 5, 6]);
}

#[test]
fn test_size_bound_evicts_lowest_first() {
    let mut q = queue(100, 8);
    let now = Instant::now();
    let mut out = Vec::new();

    // 100 is missing; nine held entries exceed the bound of eight
    let held: Vec<u16> = (101..110).rev().collect();
    feed(&mut q, &held, now, &mut out);

    assert_eq!(out, (101..110).collect::<Vec<u16>>());
    assert_eq!(q.stats().size_evictions, 1);
    assert_eq!(q.stats().skipped, 1);
}

proptest! {
    #[test]
    fn test_any_permutation_delivered_in_order(
        start in any::<u16>(),
        offsets in shuffled_window(),
    ) {
        let mut q = queue(start, 32);
        let seqs: Vec<u16> = offsets.iter().map(|&o| start.wrapping_add(o)).collect();
        let mut out = Vec::new();
        feed(&mut q, &seqs, Instant::now(), &mut out);

        let expected: Vec<u16> = (0..offsets.len() as u16).map(|o| start.wrapping_add(o)).collect();
        prop_assert_eq!(out, expected);
        prop_assert!(q.is_empty());
    }

    #[test]
    fn test_missing_packet_skipped_after_time_bound(
        start in any::<u16>(),
        offsets in shuffled_window(),
        missing in 0usize..24,
    ) {
        let n = offsets.len();
        let missing = (missing % n) as u16;
        let seqs: Vec<u16> = offsets
            .iter()
            .filter(|&&o| o != missing)
            .map(|&o| start.wrapping_add(o))
            .collect();

        let mut q = queue(start, 32);
        let t0 = Instant::now();
        let mut out = Vec::new();
        feed(&mut q, &seqs, t0, &mut out);

        if q.expire(t0 + Duration::from_millis(11)) {
            while let Some(item) = q.pop_ready() {
                out.push(item);
            }
        }

        let expected: Vec<u16> = (0..n as u16)
            .filter(|&o| o != missing)
            .map(|o| start.wrapping_add(o))
            .collect();
        prop_assert_eq!(out, expected);
        prop_assert!(q.is_empty());
        prop_assert_eq!(q.stats().skipped, u64::from(missing < n as u16 - 1));
    }
}
