use opsledger_types::{HybridClock, HybridTimestamp};
use proptest::prelude::*;

#[test]
fn ordering_by_wall_then_logical() {
    let a = HybridTimestamp::new(100, 5);
    let b = HybridTimestamp::new(100, 6);
    let c = HybridTimestamp::new(101, 0);
    assert!(a < b);
    assert!(b < c);
    assert_eq!(a.max(c), c);
}

#[test]
fn tick_is_monotonic_even_from_future_time() {
    let future = HybridTimestamp::new(u64::MAX / 2, 7);
    let next = future.tick();
    assert_eq!(next.wall_time(), future.wall_time());
    assert_eq!(next.logical(), 8);
}

#[test]
fn tick_carries_a_full_logical_counter_into_wall_time() {
    let full = HybridTimestamp::new(u64::MAX / 2, u32::MAX);
    let next = full.tick();
    assert!(next > full);
    assert_eq!(next.wall_time(), full.wall_time() + 1);
    assert_eq!(next.logical(), 0);
}

#[test]
fn receive_carries_a_full_logical_counter() {
    let local = HybridTimestamp::new(u64::MAX / 2, u32::MAX);
    let remote = HybridTimestamp::new(u64::MAX / 2, 1);
    let merged = local.receive(&remote);
    assert!(merged > local);
    assert!(merged > remote);
}

#[test]
fn receive_exceeds_both_inputs() {
    let local = HybridTimestamp::new(u64::MAX / 2, 3);
    let remote = HybridTimestamp::new(u64::MAX / 2, 9);
    let merged = local.receive(&remote);
    assert!(merged > local);
    assert!(merged > remote);
}

#[test]
fn clock_issues_strictly_increasing_timestamps() {
    let clock = HybridClock::new();
    let mut prev = clock.tick();
    for _ in 0..10_000 {
        let next = clock.tick();
        assert!(next > prev);
        prev = next;
    }
    assert_eq!(clock.last(), prev);
}

#[test]
fn clock_observe_moves_forward_only() {
    let clock = HybridClock::new();
    let ahead = HybridTimestamp::new(u64::MAX / 2, 0);
    clock.observe(ahead);
    assert_eq!(clock.last(), ahead);

    clock.observe(HybridTimestamp::new(1, 0));
    assert_eq!(clock.last(), ahead);
    assert!(clock.tick() > ahead);
}

proptest! {
    #[test]
    fn serde_preserves_ordering(w1 in 0u64..1_000_000, l1 in 0u32..100, w2 in 0u64..1_000_000, l2 in 0u32..100) {
        let a = HybridTimestamp::new(w1, l1);
        let b = HybridTimestamp::new(w2, l2);
        let a2: HybridTimestamp = serde_json::from_str(&serde_json::to_string(&a).unwrap()).unwrap();
        let b2: HybridTimestamp = serde_json::from_str(&serde_json::to_string(&b).unwrap()).unwrap();
        prop_assert_eq!(a.cmp(&b), a2.cmp(&b2));
    }
}
