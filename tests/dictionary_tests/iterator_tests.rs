//! Tests for snapshot enumeration
//!
//! These tests verify:
//! - Enumeration yields exactly the keys live at acquisition
//! - Writes submitted after acquisition do not leak into the snapshot
//! - Only one enumeration may be active at a time
//! - Release paths: explicit, end of enumeration, drop, dispose

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use futures::{FutureExt, TryStreamExt};
use logdict::{Config, DictError, Dictionary, FaultClass};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_dictionary(memory_size: usize) -> (TempDir, Dictionary<u64, String>) {
    let temp = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp.path())
        .name("iter")
        .memory_size(memory_size)
        .build();
    let dict = Dictionary::open(config).unwrap();
    (temp, dict)
}

async fn collect_entries(dict: &Dictionary<u64, String>) -> BTreeMap<u64, String> {
    let mut entries = dict.entries().await.unwrap();
    let mut seen = BTreeMap::new();
    while let Some((key, value)) = entries.next().await.unwrap() {
        assert!(seen.insert(key, value).is_none(), "key {} yielded twice", key);
    }
    seen
}

// =============================================================================
// Snapshot Content Tests
// =============================================================================

#[tokio::test]
async fn test_empty_dictionary_enumerates_nothing() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    assert!(collect_entries(&dict).await.is_empty());
}

#[tokio::test]
async fn test_multiples_of_five_survive() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);

    for k in 0..1000u64 {
        let _ = dict.upsert(k, format!("value-{}", k));
    }
    for k in (0..1000u64).filter(|k| k % 5 != 0) {
        let _ = dict.remove(k);
    }
    dict.ping().await.unwrap();

    let entries = collect_entries(&dict).await;
    assert_eq!(entries.len(), 200);
    for (key, value) in &entries {
        assert_eq!(key % 5, 0);
        assert_eq!(value, &format!("value-{}", key));
    }
}

#[tokio::test]
async fn test_snapshot_spans_evicted_records() {
    let (_temp, dict) = setup_temp_dictionary(2048);

    for k in 0..400u64 {
        let _ = dict.upsert(k, format!("v{}", k));
    }
    // Overwrites and deletions land in every region of the log
    for k in (0..400u64).step_by(3) {
        let _ = dict.upsert(k, format!("w{}", k));
    }
    for k in (0..400u64).step_by(4) {
        let _ = dict.remove(k);
    }
    dict.ping().await.unwrap();

    let entries = collect_entries(&dict).await;
    let expected: BTreeMap<u64, String> = (0..400u64)
        .filter(|k| k % 4 != 0)
        .map(|k| {
            let value = if k % 3 == 0 {
                format!("w{}", k)
            } else {
                format!("v{}", k)
            };
            (k, value)
        })
        .collect();
    assert_eq!(entries, expected);
}

#[tokio::test]
async fn test_writes_after_acquire_are_invisible() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..50u64 {
        let _ = dict.upsert(k, "before".to_string());
    }

    let mut entries = dict.entries().await.unwrap();

    // Queued behind the acquisition, interleaved with the enumeration
    for k in 0..50u64 {
        let _ = dict.upsert(k, "after".to_string());
    }
    for k in 50..80u64 {
        let _ = dict.upsert(k, "new".to_string());
    }
    for k in 0..10u64 {
        let _ = dict.remove(k);
    }

    let mut seen = BTreeMap::new();
    while let Some((key, value)) = entries.next().await.unwrap() {
        seen.insert(key, value);
    }
    assert_eq!(seen.len(), 50);
    assert!(seen.keys().copied().eq(0..50u64));
    assert!(seen.values().all(|v| v == "before"));

    // The live dictionary did move on
    assert_eq!(dict.get(20).await.unwrap().as_deref(), Some("after"));
    assert_eq!(dict.get(5).await.unwrap(), None);
    assert_eq!(collect_entries(&dict).await.len(), 70);
}

#[tokio::test]
async fn test_keys_mode() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..20u64 {
        let _ = dict.upsert(k, "x".repeat(k as usize));
    }
    let _ = dict.remove(7);

    let mut keys = dict.keys().await.unwrap();
    let mut seen = BTreeSet::new();
    while let Some(key) = keys.next().await.unwrap() {
        seen.insert(key);
    }

    let expected: BTreeSet<u64> = (0..20).filter(|k| *k != 7).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn test_entries_as_stream() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..30u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    let pairs: Vec<(u64, String)> = dict
        .entries()
        .await
        .unwrap()
        .into_stream()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(pairs.len(), 30);
    assert!(pairs.iter().all(|(k, v)| &k.to_string() == v));

    // The stream released its snapshot at the end
    let keys: Vec<u64> = dict.keys().await.unwrap().into_stream().try_collect().await.unwrap();
    assert_eq!(keys.len(), 30);
}

// =============================================================================
// Protocol Tests
// =============================================================================

#[tokio::test]
async fn test_second_acquire_is_protocol_violation() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..10u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    let mut first = dict.entries().await.unwrap();
    assert!(first.next().await.unwrap().is_some());

    let err = match dict.keys().await {
        Err(err) => err,
        Ok(_) => panic!("second acquisition succeeded"),
    };
    assert!(matches!(err, DictError::ProtocolViolation(_)));
    assert_eq!(err.class(), FaultClass::Protocol);

    // The first enumeration is unaffected
    let mut remaining = 1;
    while first.next().await.unwrap().is_some() {
        remaining += 1;
    }
    assert_eq!(remaining, 10);

    // Released at the end; acquiring works again
    assert_eq!(collect_entries(&dict).await.len(), 10);
}

#[tokio::test]
async fn test_explicit_release_allows_new_acquire() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..10u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    let mut entries = dict.entries().await.unwrap();
    entries.next().await.unwrap();
    entries.release().await.unwrap();

    assert_eq!(collect_entries(&dict).await.len(), 10);
}

#[tokio::test]
async fn test_dropped_cursor_releases_snapshot() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..10u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    {
        let mut entries = dict.entries().await.unwrap();
        entries.next().await.unwrap();
    }

    // The release was queued by the drop, ahead of this acquisition
    assert_eq!(collect_entries(&dict).await.len(), 10);
}

#[tokio::test]
async fn test_abandoned_acquire_releases_snapshot() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..500u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    // Poll once so the acquisition is queued, then give up on it
    let _ = dict.entries().now_or_never();
    let _ = dict.keys().now_or_never();

    // Wait until both abandoned acquisitions have run
    dict.ping().await.unwrap();
    assert_eq!(collect_entries(&dict).await.len(), 500);
}

#[tokio::test]
async fn test_timed_out_acquire_releases_snapshot() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    for k in 0..500u64 {
        let _ = dict.upsert(k, k.to_string());
    }

    let _ = tokio::time::timeout(Duration::from_nanos(1), dict.entries()).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(collect_entries(&dict).await.len(), 500);
}

#[tokio::test]
async fn test_next_after_exhaustion_stays_empty() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    let _ = dict.upsert(1, "one".to_string());

    let mut entries = dict.entries().await.unwrap();
    assert_eq!(entries.next().await.unwrap(), Some((1, "one".to_string())));
    assert_eq!(entries.next().await.unwrap(), None);
    assert_eq!(entries.next().await.unwrap(), None);
}

#[tokio::test]
async fn test_dispose_discards_active_snapshot() {
    let (_temp, dict) = setup_temp_dictionary(64 * 1024);
    let _ = dict.upsert(1, "one".to_string());

    let mut entries = dict.entries().await.unwrap();
    dict.dispose().await.unwrap();

    assert!(matches!(entries.next().await, Err(DictError::Disposed)));
}

#[tokio::test]
async fn test_enumeration_does_not_disturb_point_operations() {
    let (_temp, dict) = setup_temp_dictionary(4096);
    for k in 0..200u64 {
        let _ = dict.upsert(k, format!("v{}", k));
    }

    let mut entries = dict.entries().await.unwrap();
    let mut count = 0;
    while let Some((key, _)) = entries.next().await.unwrap() {
        // Sealing the log for the snapshot forces these updates to append
        dict.upsert(key, format!("updated-{}", key)).await.unwrap();
        count += 1;
    }
    assert_eq!(count, 200);

    for k in (0..200u64).step_by(17) {
        assert_eq!(dict.get(k).await.unwrap(), Some(format!("updated-{}", k)));
    }
}
