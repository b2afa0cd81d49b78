//! Integration tests for provider lifecycle and background reclamation
//!
//! Tests verify:
//! - Clear retires the region's key set and the collector then removes
//!   the old generation's keys, hash containers included, from the store
//! - Collector metrics account for the drained sets and expired keys
//! - The worker keeps running until the last of the nested stops
//! - Host property bags configure regions end to end

use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use strata_cache::{
    BincodeCodec, CacheProvider, CacheRegion, HashCache, ProviderSettings, RegionNamespace,
};
use strata_store::{MemoryStore, StoreClient, StoreConnection};

// ============================================================================
// TEST BUILDERS
// ============================================================================

fn make_provider(store: &MemoryStore) -> CacheProvider<MemoryStore, BincodeCodec> {
    CacheProvider::new(store.clone(), ProviderSettings::default(), BincodeCodec)
        .expect("provider")
}

fn make_properties(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

// ============================================================================
// RECLAMATION
// ============================================================================

#[test]
fn collector_reclaims_cleared_generation() {
    let store = MemoryStore::new();
    let provider = make_provider(&store);
    let region = provider.generational_region("orders").expect("region");

    region.put("k1", b"v1").expect("put k1");
    region.put("k2", b"v2").expect("put k2");
    region.hash_set("row", "f1", b"a").expect("hash_set");

    let namespace = RegionNamespace::new("orders");
    let global_k1 = namespace.global_key(0, "k1");
    let global_k2 = namespace.global_key(0, "k2");
    let container = namespace.global_hash_key(0, "row");

    let mut conn = store.connect().expect("raw connection");
    assert!(conn.get(&global_k1).expect("k1 present").is_some());

    region.clear().expect("clear");
    // Unreachable but still physically present until the collector runs.
    assert!(conn.get(&global_k1).expect("k1 orphaned").is_some());

    provider.start().expect("start collector");
    assert!(wait_until(|| {
        conn.get(&global_k1).expect("poll k1").is_none()
            && conn.get(&global_k2).expect("poll k2").is_none()
            && conn.hgetall(&container).expect("poll container").is_empty()
    }));
    // The retired set itself is removed once drained.
    assert!(wait_until(|| {
        conn.smembers(&namespace.retired_set_key(0))
            .expect("poll retired set")
            .is_empty()
    }));
    provider.stop().expect("stop collector");

    let metrics = provider.collector_metrics();
    assert_eq!(metrics.sets_drained, 1);
    assert_eq!(metrics.keys_expired, 3);
    assert_eq!(metrics.pop_failures, 0);
}

#[test]
fn collector_survives_clears_of_an_empty_region() {
    let store = MemoryStore::new();
    let provider = make_provider(&store);
    let region = provider.generational_region("orders").expect("region");

    provider.start().expect("start collector");
    // Nothing was ever written, so the rename inside clear has no
    // source. The queued name drains to nothing.
    region.clear().expect("clear empty region");
    assert!(wait_until(|| provider.collector_metrics().sets_drained >= 1));
    provider.stop().expect("stop collector");

    assert_eq!(provider.collector_metrics().keys_expired, 0);
    // The region still works.
    region.put("k", b"v").expect("put after clear");
    assert_eq!(region.get("k").expect("get"), Some(b"v".to_vec()));
}

#[test]
fn worker_runs_until_the_last_stop() {
    let store = MemoryStore::new();
    let provider = make_provider(&store);
    let region = provider.generational_region("orders").expect("region");

    provider.start().expect("first start");
    provider.start().expect("second start");
    provider.stop().expect("first stop");
    assert!(provider.collector().is_running());

    // Still draining after the first stop.
    region.put("k", b"v").expect("put");
    region.clear().expect("clear");
    assert!(wait_until(|| provider.collector_metrics().sets_drained >= 1));

    provider.stop().expect("last stop");
    assert!(!provider.collector().is_running());
}

#[test]
fn successive_clears_each_retire_their_generation() {
    let store = MemoryStore::new();
    let provider = make_provider(&store);
    let region = provider.generational_region("orders").expect("region");
    provider.start().expect("start collector");

    for round in 0..3 {
        region
            .put(&format!("k-{}", round), b"payload")
            .expect("put");
        region.clear().expect("clear");
    }
    assert!(wait_until(|| provider.collector_metrics().sets_drained >= 3));
    provider.stop().expect("stop collector");

    let metrics = provider.collector_metrics();
    assert_eq!(metrics.sets_drained, 3);
    assert_eq!(metrics.keys_expired, 3);
}

// ============================================================================
// CONFIGURATION END TO END
// ============================================================================

#[test]
fn property_bag_configures_expiration() {
    let store = MemoryStore::new();
    let provider = make_provider(&store);
    let region = provider
        .build_region("sessions", &make_properties(&[("expiration", "1")]))
        .expect("region");

    region.put("token", b"t1").expect("put");
    assert_eq!(region.get("token").expect("fresh"), Some(b"t1".to_vec()));
    thread::sleep(Duration::from_millis(1300));
    assert_eq!(region.get("token").expect("expired"), None);
}

#[test]
fn property_bag_prefixes_share_nothing() {
    let store = MemoryStore::new();
    let tenant_a = make_provider(&store)
        .build_region("sessions", &make_properties(&[("region_prefix", "tenant-a")]))
        .expect("tenant a");
    let tenant_b = make_provider(&store)
        .build_region("sessions", &make_properties(&[("region_prefix", "tenant-b")]))
        .expect("tenant b");

    tenant_a.put("token", b"a").expect("put a");
    tenant_b.put("token", b"b").expect("put b");
    tenant_a.clear().expect("clear a");

    assert_eq!(tenant_a.get("token").expect("a cleared"), None);
    assert_eq!(tenant_b.get("token").expect("b untouched"), Some(b"b".to_vec()));
}
