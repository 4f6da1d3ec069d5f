//! Integration tests: several mirrors following one shared store.

use kvmirror::{EmptyListingPolicy, KvMirror, MemoryStore, RemoteStore, SyncPhase, SyncSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const PROPAGATION: Duration = Duration::from_secs(5);

fn settings() -> SyncSettings {
    SyncSettings {
        max_wait_secs: 1,
        retry_interval_ms: 20,
        max_retry_interval_ms: 20,
        ..Default::default()
    }
}

fn mirror(store: &Arc<MemoryStore>, prefix: &str) -> Arc<KvMirror> {
    init_tracing();
    Arc::new(KvMirror::with_store(prefix, store.clone(), settings()))
}

/// Routes engine logs through the test harness; filter with RUST_LOG.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `mirror` until `key` holds `expected` (`None` = absent).
async fn wait_for_value(mirror: &KvMirror, key: &str, expected: Option<&[u8]>) {
    let deadline = Instant::now() + PROPAGATION;
    loop {
        let current = mirror.get(key).await.map(|e| e.value);
        if current.as_deref() == expected {
            return;
        }
        if Instant::now() > deadline {
            panic!(
                "key {:?}: expected {:?}, still {:?} after {:?}",
                key, expected, current, PROPAGATION
            );
        }
        sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_repopulate_mirrors_remote_keys() {
    let store = Arc::new(MemoryStore::new());
    store.put("foo/bar", b"hello").await.unwrap();

    let a = mirror(&store, "foo");
    a.repopulate().await.unwrap();

    let entry = a.get("bar").await.unwrap();
    assert_eq!(entry.value, b"hello");
    assert_eq!(a.size().await, 1);
}

#[tokio::test]
async fn test_repopulate_counts_every_key() {
    let store = Arc::new(MemoryStore::new());
    for i in 0..25 {
        store
            .put(&format!("foo/k{}", i), format!("v{}", i).as_bytes())
            .await
            .unwrap();
    }
    store.put("foo/__sync", b"old").await.unwrap();

    let a = mirror(&store, "foo");
    a.repopulate().await.unwrap();

    assert_eq!(a.size().await, 25);
    for i in 0..25 {
        let entry = a.get(&format!("k{}", i)).await.unwrap();
        assert_eq!(entry.value, format!("v{}", i).into_bytes());
    }
    assert!(a.clock().await >= 27);
}

#[tokio::test]
async fn test_set_then_get_on_same_instance() {
    let store = Arc::new(MemoryStore::new());
    let a = mirror(&store, "foo");

    a.set("bar", "hello").await.unwrap();

    assert_eq!(a.get("bar").await.unwrap().value, b"hello");
}

#[tokio::test]
async fn test_set_propagates_to_backgrounded_peer() {
    let store = Arc::new(MemoryStore::new());
    let a = mirror(&store, "foo");
    let b = mirror(&store, "foo");
    let sync = a.spawn_background();

    b.set("bar", "hello").await.unwrap();

    wait_for_value(&a, "bar", Some(b"hello")).await;
    assert!(a.clock().await >= 1);

    a.close();
    timeout(Duration::from_secs(3), sync).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_delete_reaches_peer_through_sentinel() {
    let store = Arc::new(MemoryStore::new());
    let a = mirror(&store, "foo");
    let b = mirror(&store, "foo");
    let sync = a.spawn_background();

    b.set("bar", "1").await.unwrap();
    b.set("baz", "2").await.unwrap();
    wait_for_value(&a, "bar", Some(b"1")).await;
    wait_for_value(&a, "baz", Some(b"2")).await;

    let bar_before = a.get("bar").await.unwrap().clock;
    let b_bar_before = b.get("bar").await.unwrap().clock;

    b.delete("baz").await.unwrap();
    assert!(b.get("baz").await.is_none());

    wait_for_value(&a, "baz", None).await;

    // Clock isolation: the unrelated key keeps its version on both sides.
    assert_eq!(a.get("bar").await.unwrap().clock, bar_before);
    assert_eq!(b.get("bar").await.unwrap().clock, b_bar_before);

    // The sentinel is a signal, never data.
    assert!(a.get("__sync").await.is_none());
    assert_eq!(a.size().await, 1);
    assert!(a.stats().await.full_resyncs >= 1);

    a.close();
    timeout(Duration::from_secs(3), sync).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_get_prefix_reports_max_version() {
    let store = Arc::new(MemoryStore::new());
    store.put("foo/c/bar", b"1").await.unwrap();
    store.put("foo/c/baz", b"2").await.unwrap();
    store.put("foo/d", b"3").await.unwrap();

    let a = mirror(&store, "foo");
    a.repopulate().await.unwrap();

    let (values, max) = a.get_prefix("c/").await;
    assert_eq!(values.len(), 2);
    assert!(values.iter().all(|e| e.key.starts_with("c/")));
    assert_eq!(max, values.iter().map(|e| e.clock).max().unwrap());
    assert_eq!(max, 3);

    let (none, max) = a.get_prefix("nope").await;
    assert!(none.is_empty());
    assert_eq!(max, 0);
}

#[tokio::test]
async fn test_close_waits_for_in_flight_watch() {
    let store = Arc::new(MemoryStore::new());
    let a = mirror(&store, "foo");
    let sync = a.spawn_background();

    // The first watch (index 0) answers at once; the second one blocks.
    let deadline = Instant::now() + PROPAGATION;
    while store.watch_calls().await < 2 {
        assert!(Instant::now() < deadline, "second watch never started");
        sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(a.phase(), SyncPhase::Polling);

    a.close();
    sleep(Duration::from_millis(100)).await;
    assert!(!sync.is_finished(), "close must not abort a blocking watch");

    timeout(Duration::from_secs(3), sync)
        .await
        .expect("loop should stop within one watch bound")
        .unwrap();
    assert_eq!(a.phase(), SyncPhase::Terminated);
}

#[tokio::test]
async fn test_background_loop_recovers_after_failures() {
    let store = Arc::new(MemoryStore::new());
    store.fail_next(3).await;

    let a = mirror(&store, "foo");
    let b = mirror(&store, "foo");
    let sync = a.spawn_background();

    b.set("bar", "hello").await.unwrap();
    wait_for_value(&a, "bar", Some(b"hello")).await;

    let stats = a.stats().await;
    assert_eq!(stats.errors, 3);
    assert!(stats.last_error.unwrap().contains("injected"));

    a.close();
    timeout(Duration::from_secs(3), sync).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_prefixes_are_isolated() {
    let store = Arc::new(MemoryStore::new());
    let a = mirror(&store, "foo");
    let other = mirror(&store, "food");
    let sync = a.spawn_background();

    other.set("bar", "elsewhere").await.unwrap();
    a.set("marker", "1").await.unwrap();
    let b = mirror(&store, "foo");
    b.set("bar", "here").await.unwrap();

    wait_for_value(&a, "bar", Some(b"here")).await;
    assert_eq!(a.size().await, 2);

    a.close();
    timeout(Duration::from_secs(3), sync).await.unwrap().unwrap();
}

#[tokio::test]
async fn test_empty_listing_is_ignored_by_default() {
    let store = Arc::new(MemoryStore::new());
    store.put("foo/bar", b"hello").await.unwrap();

    let a = mirror(&store, "foo");
    a.repopulate().await.unwrap();
    let clock = a.clock().await;

    store.delete("foo/", true).await.unwrap();
    a.repopulate().await.unwrap();

    assert_eq!(a.size().await, 1);
    assert_eq!(a.clock().await, clock);
}

#[tokio::test]
async fn test_empty_listing_can_clear() {
    let store = Arc::new(MemoryStore::new());
    store.put("foo/bar", b"hello").await.unwrap();

    let a = KvMirror::with_store(
        "foo",
        store.clone(),
        SyncSettings {
            empty_listing: EmptyListingPolicy::Clear,
            ..settings()
        },
    );
    a.repopulate().await.unwrap();

    store.delete("foo/", true).await.unwrap();
    a.repopulate().await.unwrap();

    assert_eq!(a.size().await, 0);
    assert!(a.clock().await >= 2);
}
