//! Dual-tier cache behaviour across instances sharing one remote store.

use std::sync::Arc;
use std::time::Duration;

use upstream_guard::cache::{CacheManager, MemoryStore, RemoteStore, Tier};
use upstream_guard::config::CacheConfig;
use upstream_guard::observability::{EventBus, ResilienceEvent};

fn instance(store: &Arc<MemoryStore>, events: EventBus) -> CacheManager {
    let remote: Arc<dyn RemoteStore> = store.clone();
    CacheManager::new(&CacheConfig::default(), Some(remote), events)
}

#[tokio::test]
async fn test_instances_share_through_remote_tier() {
    let store = Arc::new(MemoryStore::default());
    let a = instance(&store, EventBus::new());
    let events = EventBus::new();
    let mut rx = events.subscribe();
    let b = instance(&store, events);

    a.set("greeting", &serde_json::json!({"text": "hello"}), "template", None)
        .await
        .unwrap();

    let hit = b.lookup("greeting", "template").await.unwrap();
    assert_eq!(hit.tier, Tier::Remote);
    assert_eq!(
        rx.recv().await.unwrap(),
        ResilienceEvent::CacheHit { key: "guard:template:greeting".into(), tier: Tier::Remote }
    );

    // Deleting through one instance removes the authoritative copy.
    assert!(a.delete("greeting", "template").await);
    assert!(b.exists("greeting", "template").await, "b still holds its local mirror");
    b.clear(None, Some("template")).await;
    assert!(!b.exists("greeting", "template").await);
}

#[tokio::test(start_paused = true)]
async fn test_per_type_ttls() {
    let store = Arc::new(MemoryStore::default());
    let cache = instance(&store, EventBus::new());

    cache.set("probe", &true, "health-status", None).await.unwrap();
    cache.set("tenant", &"cfg", "config", None).await.unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    assert_eq!(cache.get::<bool>("probe", "health-status").await, None);
    assert_eq!(cache.get::<String>("tenant", "config").await.as_deref(), Some("cfg"));

    tokio::time::advance(Duration::from_secs(300)).await;
    assert_eq!(cache.get::<String>("tenant", "config").await, None);
}

#[tokio::test]
async fn test_type_scoped_clear_leaves_other_types() {
    let store = Arc::new(MemoryStore::default());
    let cache = instance(&store, EventBus::new());

    cache.set("a", &1, "completion", None).await.unwrap();
    cache.set("b", &2, "completion", None).await.unwrap();
    cache.set("a", &3, "config", None).await.unwrap();

    let outcome = cache.clear(None, Some("completion")).await;
    assert_eq!(outcome.local, 2);
    assert_eq!(outcome.remote, Some(2));
    assert_eq!(cache.get::<i32>("a", "config").await, Some(3));
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn test_local_capacity_is_bounded() {
    let mut config = CacheConfig::default();
    config.local_capacity = 3;
    config.remote_enabled = false;
    let cache = CacheManager::new(&config, None, EventBus::new());

    for i in 0..10 {
        cache.set(&format!("k{}", i), &i, "config", None).await.unwrap();
    }
    let m = cache.metrics();
    assert_eq!(m.local_size, 3);
    assert_eq!(m.local_evictions, 7);
    assert_eq!(cache.get::<i32>("k9", "config").await, Some(9));
    assert_eq!(cache.get::<i32>("k0", "config").await, None);
}
