//! Windowed aggregation: stage pairings, eviction bounds, keyed streams and
//! persistence.

use ripple::state::{FileStore, MemoryStore, PersistenceProvider};
use ripple::stream::{BindingContext, Stream};
use ripple::value::Value;
use ripple::window::{
    CountWindow, CountWindows, EveryUpdate, IdentityEvaluator, KeyedWindowSpec, MapUpdater, NoOpEvictor, OnClose,
    PaneManager, ReduceUpdater, ReducingEvaluator, SlidingWindows, Storage, ThresholdEvictor, TimeWindow,
    TumblingWindows, for_map_state, for_simple_state,
};
use std::cell::RefCell;
use std::rc::Rc;

fn sum(a: &f64, b: &f64) -> f64 {
    a + b
}

const INPUT: [(f64, u64); 8] = [
    (3.0, 5),
    (1.0, 20),
    (4.0, 60),
    (1.0, 90),
    (5.0, 110),
    (9.0, 130),
    (2.0, 170),
    (6.0, 260),
];

#[test]
fn reduce_identity_matches_map_reducing_without_eviction() {
    let mut reduced = PaneManager::new(
        SlidingWindows::new(100, 50).unwrap(),
        EveryUpdate,
        ReduceUpdater::new(sum),
        NoOpEvictor,
        IdentityEvaluator,
        for_simple_state::<TimeWindow, f64>(&Storage::Transient),
    );
    let mut mapped = PaneManager::new(
        SlidingWindows::new(100, 50).unwrap(),
        EveryUpdate,
        MapUpdater::by_timestamp(),
        NoOpEvictor,
        ReducingEvaluator::new(sum),
        for_map_state::<TimeWindow, (u64, u64), f64>(&Storage::Transient),
    );
    for (value, timestamp) in INPUT {
        assert_eq!(reduced.process(&value, timestamp), mapped.process(&value, timestamp));
    }
}

#[test]
fn threshold_eviction_bounds_entries_and_refolds_survivors() {
    const BOUND: usize = 3;
    let mut panes = PaneManager::new(
        CountWindows::tumbling(100).unwrap(),
        EveryUpdate,
        MapUpdater::by_position(),
        ThresholdEvictor::most_recent(BOUND),
        ReducingEvaluator::new(sum),
        for_map_state::<CountWindow, u64, f64>(&Storage::Transient),
    );
    let mut history = Vec::new();
    for (value, timestamp) in INPUT {
        history.push(value);
        let released = panes.process(&value, timestamp);
        let survivors: f64 = history.iter().rev().take(BOUND).sum();
        assert_eq!(released, vec![(CountWindow { first: 0, size: 100 }, survivors)]);
    }
}

#[test]
fn time_horizon_eviction_drops_stale_entries() {
    let mut panes = PaneManager::new(
        CountWindows::tumbling(100).unwrap(),
        EveryUpdate,
        MapUpdater::by_timestamp(),
        ThresholdEvictor::horizon(|state| (state.watermark.saturating_sub(50), 0)),
        ReducingEvaluator::new(sum),
        for_map_state::<CountWindow, (u64, u64), f64>(&Storage::Transient),
    );
    let results: Vec<f64> = INPUT
        .iter()
        .flat_map(|(value, timestamp)| panes.process(value, *timestamp))
        .map(|(_, result)| result)
        .collect();
    // At 110 the horizon is 60: 4 + 1 + 5 survive.
    assert_eq!(results[4], 10.0);
    // At 260 only the newest entry is within the horizon.
    assert_eq!(results[7], 6.0);
}

#[test]
fn out_of_order_values_join_open_windows_and_late_ones_are_dropped() {
    let mut panes = PaneManager::new(
        TumblingWindows::new(100).unwrap(),
        OnClose,
        ReduceUpdater::new(sum),
        NoOpEvictor,
        IdentityEvaluator,
        for_simple_state::<TimeWindow, f64>(&Storage::Transient),
    );
    let mut closed = Vec::new();
    for (value, timestamp) in [(1.0, 10), (5.0, 60), (2.0, 30), (3.0, 150), (7.0, 50), (4.0, 120)] {
        closed.extend(panes.process(&value, timestamp));
    }
    closed.extend(panes.close_due(200));
    assert_eq!(
        closed,
        vec![
            (TimeWindow { start: 0, end: 100 }, 8.0),
            (TimeWindow { start: 100, end: 200 }, 7.0),
        ]
    );
}

fn keyed_sums() -> KeyedWindowSpec<CountWindow, Value> {
    KeyedWindowSpec::new(|_key: &Value, storage: &Storage| {
        PaneManager::new(
            CountWindows::tumbling(10).unwrap(),
            EveryUpdate,
            ReduceUpdater::new(Value::plus),
            NoOpEvictor,
            IdentityEvaluator,
            for_simple_state::<CountWindow, Value>(storage),
        )
    })
}

fn run_partition(context: &mut BindingContext, persist: Option<u64>, inputs: &[(&str, i32)]) -> Vec<Value> {
    let source = Stream::source("readings");
    let mut partitioned = source.partition(keyed_sums());
    if let Some(id) = persist {
        partitioned = partitioned.persist(id);
    }
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    context.bind_sink(&partitioned, move |value| sink.borrow_mut().push(value.clone()));
    for (key, n) in inputs {
        context.push(&source, Value::record([(*key, *n)]));
    }
    seen.take()
}

fn keys(snapshot: &Value) -> Vec<Value> {
    snapshot
        .as_record()
        .map(|record| record.keys().cloned().collect())
        .unwrap_or_default()
}

#[test]
fn keyed_stream_snapshots_track_live_keys() {
    let mut context = BindingContext::new();
    let snapshots = run_partition(&mut context, None, &[("a", 1), ("b", 2), ("a", 3)]);
    let key_sets: Vec<Vec<Value>> = snapshots.iter().map(keys).collect();
    let a = Value::from("a");
    let b = Value::from("b");
    assert_eq!(key_sets, vec![vec![a.clone()], vec![a.clone(), b.clone()], vec![a, b]]);
    assert_eq!(
        snapshots.last(),
        Some(&Value::record([("a", 4), ("b", 2)]))
    );
}

#[test]
fn absent_fields_remove_keys() {
    let mut context = BindingContext::new();
    let source = Stream::source("readings");
    let partitioned = source.partition(keyed_sums());
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    context.bind_sink(&partitioned, move |value| sink.borrow_mut().push(value.clone()));

    context.push(&source, Value::record([("a", 1), ("b", 2)]));
    context.push(&source, Value::record([("a", Value::Absent)]));
    context.push(&source, Value::record([("a", 5)]));
    let snapshots = seen.take();
    assert_eq!(snapshots[1], Value::record([("b", 2)]));
    // A re-added key starts from scratch.
    assert_eq!(snapshots[2], Value::record([("a", 5), ("b", 2)]));
}

#[test]
fn reloaded_keyed_state_matches_the_transient_run() {
    let inputs = [("a", 1), ("b", 2), ("a", 3), ("c", 7), ("b", 4)];
    let mut transient = BindingContext::new();
    let expected = run_partition(&mut transient, None, &inputs);

    let store = MemoryStore::new();
    let mut first = BindingContext::new().with_persistence(PersistenceProvider::memory(&store));
    let mut reloaded = run_partition(&mut first, Some(5), &inputs[..2]);
    assert!(!store.is_empty());

    let mut second = BindingContext::new().with_persistence(PersistenceProvider::memory(&store));
    reloaded.extend(run_partition(&mut second, Some(5), &inputs[2..]));
    assert_eq!(reloaded, expected);
}

#[test]
fn file_store_survives_a_restart() {
    let directory = tempfile::tempdir().unwrap();
    let inputs = [("a", 1), ("a", 2), ("b", 3)];
    let mut transient = BindingContext::new();
    let expected = run_partition(&mut transient, None, &inputs);

    let open = || PersistenceProvider::new(FileStore::new(directory.path()).unwrap());
    let mut first = BindingContext::new().with_persistence(open());
    let mut reloaded = run_partition(&mut first, Some(1), &inputs[..1]);
    let mut second = BindingContext::new().with_persistence(open());
    reloaded.extend(run_partition(&mut second, Some(1), &inputs[1..]));
    assert_eq!(reloaded, expected);
}
