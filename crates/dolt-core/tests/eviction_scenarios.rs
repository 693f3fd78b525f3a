//! Oldest-first eviction against both stores.

use dolt_core::{evict, evict_bindles, RecordingSink, EVICTION_EVENT};
use dolt_state::{
    ActiveLaneEntry, DoltStore, Level, MemoryDoltStore, NewRecord, Pointer, SurrealDoltStore,
};

async fn stores() -> Vec<(&'static str, Box<dyn DoltStore>)> {
    vec![
        ("memory", Box::new(MemoryDoltStore::new())),
        (
            "surreal",
            Box::new(SurrealDoltStore::in_memory().await.unwrap()),
        ),
    ]
}

/// Store a bindle and activate it with the given activation recency.
async fn active_bindle(
    store: &dyn DoltStore,
    pointer: &str,
    event_ts_ms: i64,
    last_event_ts_ms: i64,
    tokens: u64,
) {
    store
        .upsert_record(
            NewRecord::new("s1", Level::Bindle, event_ts_ms, format!("summary {pointer}"))
                .with_pointer(pointer)
                .with_token_count(tokens),
        )
        .await
        .unwrap();
    store
        .upsert_active_lane(ActiveLaneEntry {
            session_id: "s1".into(),
            session_key: Some("agent:main".into()),
            level: Level::Bindle,
            pointer: Pointer::from(pointer),
            is_active: true,
            last_event_ts_ms,
        })
        .await
        .unwrap();
}

fn strs(pointers: &[Pointer]) -> Vec<&str> {
    pointers.iter().map(Pointer::as_str).collect()
}

#[tokio::test]
async fn activation_recency_beats_content_age() {
    for (name, store) in stores().await {
        let sink = RecordingSink::new();
        active_bindle(store.as_ref(), "old", 9_000, 10, 30).await;
        active_bindle(store.as_ref(), "new", 1_000, 20, 25).await;

        let outcome = evict_bindles(store.as_ref(), &sink, "s1", 25).await.unwrap();

        assert_eq!(strs(&outcome.evicted_pointers), vec!["old"], "{name}");
        assert_eq!(strs(&outcome.active_pointers), vec!["new"], "{name}");
        assert!(outcome.fits());
    }
}

#[tokio::test]
async fn ties_break_on_smaller_pointer() {
    for (name, store) in stores().await {
        let sink = RecordingSink::new();
        active_bindle(store.as_ref(), "b", 5, 100, 40).await;
        active_bindle(store.as_ref(), "a", 5, 100, 40).await;

        let outcome = evict_bindles(store.as_ref(), &sink, "s1", 40).await.unwrap();

        assert_eq!(strs(&outcome.evicted_pointers), vec!["a"], "{name}");
        assert_eq!(strs(&outcome.active_pointers), vec!["b"], "{name}");
    }
}

#[tokio::test]
async fn evicts_one_at_a_time_until_target_fits() {
    for (name, store) in stores().await {
        let sink = RecordingSink::new();
        for i in 1..=4 {
            active_bindle(store.as_ref(), &format!("bindle-{i}"), i, i, 10 * i as u64).await;
        }

        let outcome = evict_bindles(store.as_ref(), &sink, "s1", 30 + 40)
            .await
            .unwrap();

        assert_eq!(
            strs(&outcome.evicted_pointers),
            vec!["bindle-1", "bindle-2"],
            "{name}"
        );
        assert_eq!(
            strs(&outcome.active_pointers),
            vec!["bindle-4", "bindle-3"],
            "{name}"
        );

        let steps = &outcome.telemetry.steps;
        assert_eq!(steps.len(), 2, "{name}");
        assert_eq!((steps[0].before_count, steps[0].before_tokens), (4, 100));
        assert_eq!((steps[0].after_count, steps[0].after_tokens), (3, 90));
        assert_eq!((steps[1].after_count, steps[1].after_tokens), (2, 70));
        assert_eq!(outcome.telemetry.after.active_count, 2);
        assert_eq!(
            outcome.telemetry.after.oldest,
            Some(Pointer::from("bindle-3"))
        );

        let remaining = store.list_active_records("s1", Level::Bindle).await.unwrap();
        assert_eq!(remaining.len(), 2, "{name}");
    }
}

#[tokio::test]
async fn evicted_records_stay_persisted() {
    for (name, store) in stores().await {
        let sink = RecordingSink::new();
        active_bindle(store.as_ref(), "x", 1, 1, 50).await;

        let outcome = evict_bindles(store.as_ref(), &sink, "s1", 0).await.unwrap();
        assert_eq!(strs(&outcome.evicted_pointers), vec!["x"], "{name}");

        let record = store.get_record(&Pointer::from("x")).await.unwrap();
        assert_eq!(record.map(|r| r.token_count), Some(50), "{name}");
        assert!(store
            .list_active_records("s1", Level::Bindle)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn fitting_lane_is_left_alone() {
    for (name, store) in stores().await {
        let sink = RecordingSink::new();
        active_bindle(store.as_ref(), "a", 1, 1, 10).await;
        active_bindle(store.as_ref(), "b", 2, 2, 10).await;

        let outcome = evict_bindles(store.as_ref(), &sink, "s1", 20).await.unwrap();

        assert!(outcome.evicted_pointers.is_empty(), "{name}");
        assert!(outcome.telemetry.steps.is_empty());
        assert_eq!(outcome.telemetry.before, outcome.telemetry.after);
    }
}

#[tokio::test]
async fn eviction_is_level_agnostic() {
    let store = MemoryDoltStore::new();
    let sink = RecordingSink::new();
    for (pointer, ts) in [("t1", 1), ("t2", 2)] {
        store
            .upsert_record(
                NewRecord::new("s1", Level::Turn, ts, "turn text")
                    .with_pointer(pointer)
                    .with_token_count(10),
            )
            .await
            .unwrap();
        store
            .upsert_active_lane(ActiveLaneEntry {
                session_id: "s1".into(),
                session_key: None,
                level: Level::Turn,
                pointer: Pointer::from(pointer),
                is_active: true,
                last_event_ts_ms: ts,
            })
            .await
            .unwrap();
    }

    let outcome = evict(&store, &sink, "s1", Level::Turn, 10).await.unwrap();

    assert_eq!(strs(&outcome.evicted_pointers), vec!["t1"]);
    assert_eq!(outcome.level, Level::Turn);
}

#[tokio::test]
async fn eviction_event_carries_steps_and_session_key() {
    let store = MemoryDoltStore::new();
    let sink = RecordingSink::new();
    active_bindle(&store, "a", 1, 1, 10).await;
    active_bindle(&store, "b", 2, 2, 10).await;

    evict_bindles(&store, &sink, "s1", 0).await.unwrap();

    let events = sink.events_of(EVICTION_EVENT);
    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.session_key.as_deref(), Some("agent:main"));
    assert_eq!(event.payload["steps"].as_array().map(Vec::len), Some(2));
    assert_eq!(event.payload["evictedPointers"][0], "a");
    assert_eq!(event.payload["after"]["activeCount"], 0);
}
