//! Tests for Save, restart and retention
//!
//! These tests verify:
//! - Saved state survives dispose and reopen, for both checkpoint kinds
//! - Only one checkpoint generation remains after successive saves
//! - Unsaved writes are lost on restart
//! - Enumeration over a recovered dictionary

use std::fs;
use std::path::Path;

use logdict::{CheckpointKind, Config, Dictionary};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(temp: &TempDir, kind: CheckpointKind, memory_size: usize) -> Config {
    Config::builder()
        .data_dir(temp.path())
        .name("durable")
        .memory_size(memory_size)
        .checkpoint_kind(kind)
        .build()
}

fn generation_dirs(dir: &Path) -> Vec<String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap())
        .filter(|e| e.path().is_dir())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect()
}

async fn save_and_reopen(kind: CheckpointKind, memory_size: usize) {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, kind, memory_size);
    {
        let dict: Dictionary<u64, String> = Dictionary::open(config.clone()).unwrap();
        for k in 0..500u64 {
            let _ = dict.upsert(k, format!("first-{}", k));
        }
        for k in (0..500u64).step_by(2) {
            let _ = dict.upsert(k, format!("second-{}", k));
        }
        dict.save().await.unwrap();
        dict.dispose().await.unwrap();
    }

    let dict: Dictionary<u64, String> = Dictionary::open(config).unwrap();
    for k in 0..500u64 {
        let expected = if k % 2 == 0 {
            format!("second-{}", k)
        } else {
            format!("first-{}", k)
        };
        assert_eq!(dict.get(k).await.unwrap(), Some(expected), "key {}", k);
    }
    dict.dispose().await.unwrap();
}

// =============================================================================
// Restart Tests
// =============================================================================

#[tokio::test]
async fn test_snapshot_save_survives_restart() {
    save_and_reopen(CheckpointKind::Snapshot, 64 * 1024).await;
}

#[tokio::test]
async fn test_fold_over_save_survives_restart() {
    save_and_reopen(CheckpointKind::FoldOver, 64 * 1024).await;
}

#[tokio::test]
async fn test_save_with_evicted_log_survives_restart() {
    save_and_reopen(CheckpointKind::Snapshot, 2048).await;
    save_and_reopen(CheckpointKind::FoldOver, 2048).await;
}

#[tokio::test]
async fn test_unsaved_writes_are_lost() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, CheckpointKind::Snapshot, 64 * 1024);
    {
        let dict: Dictionary<String, String> = Dictionary::open(config.clone()).unwrap();
        dict.upsert("saved".into(), "yes".into()).await.unwrap();
        dict.save().await.unwrap();
        dict.upsert("unsaved".into(), "no".into()).await.unwrap();
        dict.remove("saved".into()).await.unwrap();
        dict.dispose().await.unwrap();
    }

    let dict: Dictionary<String, String> = Dictionary::open(config).unwrap();
    assert_eq!(dict.get("saved".into()).await.unwrap().as_deref(), Some("yes"));
    assert_eq!(dict.get("unsaved".into()).await.unwrap(), None);
}

#[tokio::test]
async fn test_removals_survive_restart() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, CheckpointKind::FoldOver, 64 * 1024);
    {
        let dict: Dictionary<u64, u64> = Dictionary::open(config.clone()).unwrap();
        for k in 0..100u64 {
            let _ = dict.upsert(k, k * k);
        }
        for k in 0..50u64 {
            let _ = dict.remove(k);
        }
        dict.save().await.unwrap();
        dict.dispose().await.unwrap();
    }

    let dict: Dictionary<u64, u64> = Dictionary::open(config).unwrap();
    assert_eq!(dict.get(10).await.unwrap(), None);
    assert_eq!(dict.get(60).await.unwrap(), Some(3600));

    let mut keys = dict.keys().await.unwrap();
    let mut count = 0;
    while let Some(key) = keys.next().await.unwrap() {
        assert!(key >= 50);
        count += 1;
    }
    assert_eq!(count, 50);
}

#[tokio::test]
async fn test_work_continues_across_several_restarts() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, CheckpointKind::Snapshot, 4096);

    for round in 0..3u64 {
        let dict: Dictionary<u64, u64> = Dictionary::open(config.clone()).unwrap();
        for k in 0..100u64 {
            let previous = dict.get(k).await.unwrap();
            assert_eq!(previous, if round == 0 { None } else { Some(round - 1) });
            let _ = dict.upsert(k, round);
        }
        dict.save().await.unwrap();
        dict.dispose().await.unwrap();
    }
}

// =============================================================================
// Retention Tests
// =============================================================================

#[tokio::test]
async fn test_two_saves_leave_one_generation() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, CheckpointKind::Snapshot, 64 * 1024);
    let dict: Dictionary<String, String> = Dictionary::open(config.clone()).unwrap();

    dict.upsert("a".into(), "1".into()).await.unwrap();
    dict.save().await.unwrap();
    let after_first = generation_dirs(&config.checkpoint_dir());
    assert_eq!(after_first.len(), 1);

    dict.upsert("b".into(), "2".into()).await.unwrap();
    dict.save().await.unwrap();
    let after_second = generation_dirs(&config.checkpoint_dir());
    assert_eq!(after_second.len(), 1);
    assert_ne!(after_first, after_second);

    dict.dispose().await.unwrap();
}

#[tokio::test]
async fn test_save_prunes_leftovers_from_earlier_runs() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp, CheckpointKind::Snapshot, 64 * 1024);
    {
        let dict: Dictionary<String, String> = Dictionary::open(config.clone()).unwrap();
        dict.upsert("a".into(), "1".into()).await.unwrap();
        dict.save().await.unwrap();
        dict.dispose().await.unwrap();
    }

    // An interrupted generation left behind by a crash
    let stray = config
        .checkpoint_dir()
        .join("00000000-0000-4000-8000-000000000000");
    fs::create_dir_all(&stray).unwrap();
    assert_eq!(generation_dirs(&config.checkpoint_dir()).len(), 2);

    let dict: Dictionary<String, String> = Dictionary::open(config.clone()).unwrap();
    assert_eq!(dict.get("a".into()).await.unwrap().as_deref(), Some("1"));
    dict.save().await.unwrap();
    assert_eq!(generation_dirs(&config.checkpoint_dir()).len(), 1);
    assert!(!stray.exists());
}
