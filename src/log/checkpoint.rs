//! Checkpoint Manager
//!
//! Manages checkpoint generations of one structure.
//!
//! ## Responsibilities
//! - Write a generation on a background thread
//! - Discover complete generations on startup (newest wins)
//! - Load a generation for recovery
//! - Prune every generation except the current one
//!
//! ## Directory Layout
//! ```text
//! checkpoints/{name}/
//!   └── {token}/
//!         ├── index.dat     key → address pairs (bincode)
//!         ├── snapshot.dat  unflushed log records (Snapshot kind only)
//!         └── info.dat      CheckpointInfo (bincode), written last
//! ```
//!
//! A generation without `info.dat` was interrupted and is ignored.

use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::config::CheckpointKind;
use crate::error::{DictError, Result};
use crate::store::{Address, CheckpointToken};

use super::record::LogRecord;

/// Current checkpoint format version
const FORMAT_VERSION: u16 = 1;

const INDEX_FILE: &str = "index.dat";
const SNAPSHOT_FILE: &str = "snapshot.dat";
const INFO_FILE: &str = "info.dat";
const INFO_TMP_FILE: &str = "info.dat.tmp";

/// Metadata of one checkpoint generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub format: u16,
    pub token: String,
    /// Monotonically increasing per structure; the highest complete one is current
    pub generation: u64,
    pub kind: CheckpointKind,
    pub begin: Address,
    /// Everything below this address is on the log device
    pub flushed_until: Address,
    pub tail: Address,
    pub last_serial: u64,
    pub index_entries: u64,
    pub index_crc: u32,
    pub snapshot_len: u64,
    pub snapshot_crc: u32,
    pub created_at_ms: u64,
}

impl CheckpointInfo {
    /// Metadata for a checkpoint about to be written
    pub fn new(
        kind: CheckpointKind,
        begin: Address,
        flushed_until: Address,
        tail: Address,
        last_serial: u64,
    ) -> Self {
        Self {
            format: FORMAT_VERSION,
            token: String::new(),
            generation: 0,
            kind,
            begin,
            flushed_until,
            tail,
            last_serial,
            index_entries: 0,
            index_crc: 0,
            snapshot_len: 0,
            snapshot_crc: 0,
            created_at_ms: 0,
        }
    }
}

/// Everything a generation persists, captured on the actor thread
pub struct CheckpointImage {
    pub info: CheckpointInfo,
    pub index: Vec<(Vec<u8>, Address)>,
    /// Encoded records covering `[flushed_until, tail)`
    pub snapshot: Vec<u8>,
}

/// A generation loaded back from disk
pub struct RecoveredCheckpoint {
    pub info: CheckpointInfo,
    pub index: Vec<(Bytes, Address)>,
    pub records: Vec<(Address, LogRecord)>,
}

struct InFlight {
    token: CheckpointToken,
    handle: JoinHandle<Result<()>>,
}

/// Owns the checkpoint directory of one structure
pub struct CheckpointManager {
    dir: PathBuf,
    next_generation: u64,
    in_flight: Option<InFlight>,
}

impl CheckpointManager {
    /// Open or create the checkpoint directory
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut manager = Self {
            dir: dir.to_path_buf(),
            next_generation: 1,
            in_flight: None,
        };
        manager.next_generation = manager
            .generations()?
            .last()
            .map(|info| info.generation + 1)
            .unwrap_or(1);
        Ok(manager)
    }

    /// Complete generations, oldest first
    pub fn generations(&self) -> Result<Vec<CheckpointInfo>> {
        let mut found = Vec::new();

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if CheckpointToken::parse(&name).is_none() {
                continue;
            }

            let info_path = path.join(INFO_FILE);
            if !info_path.exists() {
                tracing::warn!("Ignoring incomplete checkpoint generation {}", name);
                continue;
            }
            match read_info(&info_path) {
                Ok(info) if info.token == name => found.push(info),
                Ok(info) => tracing::warn!(
                    "Ignoring checkpoint {}: metadata names token {}",
                    name,
                    info.token
                ),
                Err(e) => tracing::warn!("Ignoring unreadable checkpoint {}: {}", name, e),
            }
        }

        found.sort_by_key(|info| info.generation);
        Ok(found)
    }

    /// The newest complete generation, if any
    pub fn latest(&self) -> Result<Option<CheckpointInfo>> {
        Ok(self.generations()?.pop())
    }

    /// Start writing `image` in the background
    pub fn begin(&mut self, mut image: CheckpointImage) -> Result<CheckpointToken> {
        if let Some(in_flight) = &self.in_flight {
            return Err(DictError::Checkpoint(format!(
                "checkpoint {} is still in progress",
                in_flight.token
            )));
        }

        let token = CheckpointToken::new();
        image.info.token = token.to_string();
        image.info.generation = self.next_generation;
        image.info.created_at_ms = now_millis();
        self.next_generation += 1;

        let generation_dir = self.dir.join(token.to_string());
        let handle = std::thread::Builder::new()
            .name("logdict-checkpoint".to_string())
            .spawn(move || write_generation(&generation_dir, image))
            .map_err(|e| DictError::Checkpoint(format!("failed to start writer: {}", e)))?;

        self.in_flight = Some(InFlight { token, handle });
        Ok(token)
    }

    /// Wait for the generation named `token` to become durable
    pub fn complete(&mut self, token: &CheckpointToken) -> Result<()> {
        let in_flight = match self.in_flight.take() {
            Some(in_flight) if in_flight.token == *token => in_flight,
            other => {
                self.in_flight = other;
                return Err(DictError::Checkpoint(format!(
                    "no checkpoint {} in progress",
                    token
                )));
            }
        };

        match in_flight.handle.join() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DictError::Checkpoint(e.to_string())),
            Err(_) => Err(DictError::Checkpoint(
                "checkpoint writer panicked".to_string(),
            )),
        }
    }

    /// Delete every generation directory except `keep`
    pub fn retain_only(&self, keep: &CheckpointToken) -> Result<usize> {
        let keep = keep.to_string();
        let mut removed = 0;

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().into_owned();
            if !path.is_dir() || name == keep || CheckpointToken::parse(&name).is_none() {
                continue;
            }
            fs::remove_dir_all(&path)?;
            removed += 1;
        }

        Ok(removed)
    }

    /// Load a generation for recovery
    pub fn load(&self, info: &CheckpointInfo) -> Result<RecoveredCheckpoint> {
        if info.format != FORMAT_VERSION {
            return Err(DictError::Corruption(format!(
                "unsupported checkpoint format: {}",
                info.format
            )));
        }
        let generation_dir = self.dir.join(&info.token);

        // Index
        let index_bytes = fs::read(generation_dir.join(INDEX_FILE))?;
        if crc32fast::hash(&index_bytes) != info.index_crc {
            return Err(DictError::Corruption(format!(
                "checkpoint {} index CRC mismatch",
                info.token
            )));
        }
        let raw_index: Vec<(Vec<u8>, Address)> = bincode::deserialize(&index_bytes)?;
        if raw_index.len() as u64 != info.index_entries {
            return Err(DictError::Corruption(format!(
                "checkpoint {} index holds {} entries, metadata says {}",
                info.token,
                raw_index.len(),
                info.index_entries
            )));
        }
        let mut index = Vec::with_capacity(raw_index.len());
        for (key, address) in raw_index {
            if address < info.begin || address >= info.tail {
                return Err(DictError::Corruption(format!(
                    "checkpoint {} index points outside the log: {}",
                    info.token, address
                )));
            }
            index.push((Bytes::from(key), address));
        }

        // Snapshot records
        let records = if info.snapshot_len > 0 {
            let bytes = fs::read(generation_dir.join(SNAPSHOT_FILE))?;
            if bytes.len() as u64 != info.snapshot_len || crc32fast::hash(&bytes) != info.snapshot_crc
            {
                return Err(DictError::Corruption(format!(
                    "checkpoint {} snapshot is damaged",
                    info.token
                )));
            }
            decode_snapshot(&bytes, info.flushed_until)?
        } else {
            Vec::new()
        };

        let end = records
            .last()
            .map(|(address, record)| address + record.allocated_len() as u64)
            .unwrap_or(info.flushed_until);
        if end != info.tail {
            return Err(DictError::Corruption(format!(
                "checkpoint {} covers up to {}, tail is {}",
                info.token, end, info.tail
            )));
        }

        Ok(RecoveredCheckpoint {
            info: info.clone(),
            index,
            records,
        })
    }

    /// Remove the whole checkpoint tree of this structure
    pub fn remove_all(&self) -> Result<()> {
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

// =============================================================================
// Private Helpers
// =============================================================================

fn write_generation(dir: &Path, image: CheckpointImage) -> Result<()> {
    let CheckpointImage {
        mut info,
        index,
        snapshot,
    } = image;

    fs::create_dir_all(dir)?;

    let index_bytes = bincode::serialize(&index)?;
    info.index_entries = index.len() as u64;
    info.index_crc = crc32fast::hash(&index_bytes);
    write_synced(&dir.join(INDEX_FILE), &index_bytes)?;

    if !snapshot.is_empty() {
        info.snapshot_len = snapshot.len() as u64;
        info.snapshot_crc = crc32fast::hash(&snapshot);
        write_synced(&dir.join(SNAPSHOT_FILE), &snapshot)?;
    }

    // Metadata goes last: its presence marks the generation complete
    let info_bytes = bincode::serialize(&info)?;
    let tmp = dir.join(INFO_TMP_FILE);
    write_synced(&tmp, &info_bytes)?;
    fs::rename(&tmp, dir.join(INFO_FILE))?;
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }

    tracing::debug!(
        "Checkpoint {} (generation {}) written: {} index entries, {} snapshot bytes",
        info.token,
        info.generation,
        info.index_entries,
        info.snapshot_len
    );
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

fn read_info(path: &Path) -> Result<CheckpointInfo> {
    let bytes = fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

fn decode_snapshot(bytes: &[u8], start: Address) -> Result<Vec<(Address, LogRecord)>> {
    let mut cursor = Cursor::new(bytes);
    let mut address = start;
    let mut records = Vec::new();

    while (cursor.position() as usize) < bytes.len() {
        let record = LogRecord::read_from(&mut cursor)?;
        let len = record.allocated_len() as u64;
        records.push((address, record));
        address += len;
    }

    Ok(records)
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
