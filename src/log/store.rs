//! HybridLog
//!
//! A log-structured key-value engine whose log spans memory and a device.
//!
//! ## Address Space
//! ```text
//!  begin          head        safe_ro   read_only           tail
//!    │  on device   │  in memory, immutable  │  in memory, mutable │
//!    ├──────────────┼──────────┬─────────────┼─────────────────────┤
//!                               └ lags read_only until refresh()
//! ```
//!
//! - Mutable records are updated in place when the new value fits
//! - Everything else is read-copy-update: a new record is appended
//! - Records below `head` are only on the device; operations on them
//!   go pending until [`LogStore::complete_pending`]
//!
//! The hash index maps encoded key bytes to the newest record address.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;

use bytes::Bytes;

use crate::config::{CheckpointKind, Config};
use crate::envelope::Envelope;
use crate::error::{DictError, Result};
use crate::store::{
    Address, CheckpointToken, Completed, LogScan, LogStore, PendingId, Status,
};

use super::checkpoint::{
    CheckpointImage, CheckpointInfo, CheckpointManager, RecoveredCheckpoint,
};
use super::device::{LogDevice, DEVICE_HEADER_SIZE};
use super::record::LogRecord;
use super::scan::{DeviceCursor, LogScanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Read,
    Delete,
}

/// An operation waiting for device I/O
#[derive(Debug)]
struct PendingOp {
    id: PendingId,
    kind: PendingKind,
    key: Bytes,
}

/// The in-crate [`LogStore`] implementation
pub struct HybridLog {
    // -------------------------------------------------------------------------
    // Settings
    // -------------------------------------------------------------------------
    memory_size: u64,
    mutable_fraction: f64,
    checkpoint_kind: CheckpointKind,
    delete_on_close: bool,

    // -------------------------------------------------------------------------
    // Persistence (absent for auxiliary instances)
    // -------------------------------------------------------------------------
    device: Option<LogDevice>,
    checkpoints: Option<CheckpointManager>,

    // -------------------------------------------------------------------------
    // Log state
    // -------------------------------------------------------------------------
    index: HashMap<Bytes, Address>,
    memory: VecDeque<(Address, LogRecord)>,
    begin: Address,
    head: Address,
    flushed_until: Address,
    safe_read_only: Address,
    read_only: Address,
    tail: Address,

    pending: Vec<PendingOp>,
    next_pending_id: PendingId,
    last_serial: u64,
    closed: bool,
}

impl HybridLog {
    /// Open the structure described by `config`, recovering the latest checkpoint
    pub fn open(config: &Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(config.logs_dir())?;

        let checkpoints = CheckpointManager::open(&config.checkpoint_dir())?;
        let latest = checkpoints.latest()?;

        let mut log = Self::blank(config.memory_size as u64, config.mutable_fraction);
        log.checkpoint_kind = config.checkpoint_kind;
        log.delete_on_close = config.delete_on_close;

        let log_path = config.log_path();
        match latest {
            Some(info) => {
                let recovered = checkpoints.load(&info)?;
                let device = LogDevice::open_existing(&log_path, info.flushed_until)?;
                log.restore(device, recovered)?;
                tracing::info!(
                    "Recovered {} from checkpoint generation {} ({} keys, tail {})",
                    config.name,
                    info.generation,
                    log.index.len(),
                    log.tail
                );
            }
            None => {
                log.device = Some(LogDevice::create(&log_path)?);
                tracing::debug!("Created empty log device {}", log_path.display());
            }
        }

        log.checkpoints = Some(checkpoints);
        Ok(log)
    }

    /// A memory-only instance with no size limit and a fully mutable log
    pub fn in_memory() -> Self {
        Self::blank(u64::MAX, 1.0)
    }

    fn blank(memory_size: u64, mutable_fraction: f64) -> Self {
        Self {
            memory_size,
            mutable_fraction,
            checkpoint_kind: CheckpointKind::Snapshot,
            delete_on_close: false,
            device: None,
            checkpoints: None,
            index: HashMap::new(),
            memory: VecDeque::new(),
            begin: DEVICE_HEADER_SIZE,
            head: DEVICE_HEADER_SIZE,
            flushed_until: DEVICE_HEADER_SIZE,
            safe_read_only: DEVICE_HEADER_SIZE,
            read_only: DEVICE_HEADER_SIZE,
            tail: DEVICE_HEADER_SIZE,
            pending: Vec::new(),
            next_pending_id: 1,
            last_serial: 0,
            closed: false,
        }
    }

    fn restore(&mut self, device: LogDevice, recovered: RecoveredCheckpoint) -> Result<()> {
        let info = recovered.info;
        if device.end_address() != info.flushed_until {
            return Err(DictError::Corruption(format!(
                "log device ends at {}, checkpoint flushed until {}",
                device.end_address(),
                info.flushed_until
            )));
        }

        self.device = Some(device);
        self.index = recovered.index.into_iter().collect();
        self.memory = recovered.records.into_iter().collect();
        self.begin = info.begin;
        self.head = info.flushed_until;
        self.flushed_until = info.flushed_until;
        self.read_only = info.tail;
        self.safe_read_only = info.tail;
        self.tail = info.tail;
        self.last_serial = info.last_serial;
        Ok(())
    }

    // =========================================================================
    // Introspection
    // =========================================================================

    pub fn head_address(&self) -> Address {
        self.head
    }

    pub fn read_only_address(&self) -> Address {
        self.read_only
    }

    /// Number of keys in the hash index, tombstoned ones included
    pub fn index_len(&self) -> usize {
        self.index.len()
    }

    /// Number of records resident in memory
    pub fn memory_records(&self) -> usize {
        self.memory.len()
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DictError::Disposed);
        }
        Ok(())
    }

    fn memory_position(&self, address: Address) -> Option<usize> {
        self.memory
            .binary_search_by_key(&address, |(a, _)| *a)
            .ok()
    }

    fn memory_record(&self, address: Address) -> Result<&LogRecord> {
        self.memory_position(address)
            .map(|pos| &self.memory[pos].1)
            .ok_or_else(|| missing_record(address))
    }

    fn memory_record_mut(&mut self, address: Address) -> Result<&mut LogRecord> {
        match self.memory_position(address) {
            Some(pos) => Ok(&mut self.memory[pos].1),
            None => Err(missing_record(address)),
        }
    }

    /// First record boundary at or above `address`
    fn boundary_at_or_above(&self, address: Address) -> Address {
        let idx = self.memory.partition_point(|(a, _)| *a < address);
        self.memory.get(idx).map(|(a, _)| *a).unwrap_or(self.tail)
    }

    fn mutable_len(&self) -> u64 {
        // Float to int casts saturate, so an unbounded budget stays unbounded
        (self.memory_size as f64 * self.mutable_fraction) as u64
    }

    /// Append a record at the tail and return its address
    fn append(&mut self, record: LogRecord) -> Result<Address> {
        let address = self.tail;
        self.tail += record.allocated_len() as u64;
        self.memory.push_back((address, record));

        let desired = self.tail.saturating_sub(self.mutable_len());
        if desired > self.read_only {
            self.read_only = self.boundary_at_or_above(desired).max(self.head);
        }

        if self.tail - self.head > self.memory_size {
            self.refresh()?;
        }
        Ok(address)
    }

    /// Write every unflushed memory record below `until` to the device
    fn flush_until(&mut self, until: Address) -> Result<()> {
        if until <= self.flushed_until {
            return Ok(());
        }
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| DictError::Storage("memory-only log cannot flush".to_string()))?;

        let start = self.memory.partition_point(|(a, _)| *a < self.flushed_until);
        for (address, record) in self.memory.range(start..) {
            if *address >= until {
                break;
            }
            device.write(*address, record)?;
        }
        device.flush()?;
        self.flushed_until = until;
        Ok(())
    }

    /// Move `head` up to keep the in-memory log within budget
    fn evict(&mut self) -> Result<()> {
        if self.tail - self.head <= self.memory_size {
            return Ok(());
        }

        let desired = self.tail - self.memory_size;
        let target = self.boundary_at_or_above(desired).min(self.safe_read_only);
        if target <= self.head {
            return Ok(());
        }

        self.flush_until(target)?;
        let mut evicted = 0usize;
        while let Some((address, _)) = self.memory.front() {
            if *address >= target {
                break;
            }
            self.memory.pop_front();
            evicted += 1;
        }
        tracing::debug!(
            "Evicted {} records, head {} -> {}",
            evicted,
            self.head,
            target
        );
        self.head = target;
        Ok(())
    }

    /// Fetch the record at `address` from memory or the device
    fn load_record(&mut self, address: Address) -> Result<LogRecord> {
        if address >= self.head {
            return self.memory_record(address).cloned();
        }
        let device = self
            .device
            .as_mut()
            .ok_or_else(|| missing_record(address))?;
        device.read_record(address)
    }

    /// Tombstone `key`, whose newest record sits at `address`
    fn tombstone(&mut self, key: &Bytes, address: Address) -> Result<()> {
        if address >= self.read_only && address >= self.head {
            let record = self.memory_record_mut(address)?;
            record.info.set_tombstone(true);
            record.value = Envelope::empty();
            return Ok(());
        }

        let record = LogRecord::tombstone(Envelope::new(key.clone())?)?;
        let new_address = self.append(record)?;
        self.index.insert(key.clone(), new_address);
        Ok(())
    }

    fn park(&mut self, kind: PendingKind, key: Bytes) -> PendingId {
        let id = self.next_pending_id;
        self.next_pending_id += 1;
        self.pending.push(PendingOp { id, kind, key });
        id
    }

    fn complete_one(&mut self, op: PendingOp) -> Result<Completed> {
        // Re-resolve through the index: the key may have moved since parking
        let address = match self.index.get(&op.key) {
            Some(&address) => address,
            None => {
                return Ok(Completed {
                    id: op.id,
                    found: false,
                    value: None,
                })
            }
        };

        let record = self.load_record(address)?;
        if record.info.is_tombstone() {
            return Ok(Completed {
                id: op.id,
                found: false,
                value: None,
            });
        }

        match op.kind {
            PendingKind::Read => Ok(Completed {
                id: op.id,
                found: true,
                value: Some(record.value),
            }),
            PendingKind::Delete => {
                self.tombstone(&op.key, address)?;
                Ok(Completed {
                    id: op.id,
                    found: true,
                    value: None,
                })
            }
        }
    }
}

// =============================================================================
// LogStore Implementation
// =============================================================================

impl LogStore for HybridLog {
    fn upsert(&mut self, key: &Envelope, value: &Envelope, serial: u64) -> Result<()> {
        self.ensure_open()?;
        self.last_serial = self.last_serial.max(serial);

        if let Some(&address) = self.index.get(key.payload()) {
            if address >= self.read_only && address >= self.head {
                let record = self.memory_record_mut(address)?;
                if record.fits(value) {
                    record.value = value.clone();
                    record.info.set_tombstone(false);
                    return Ok(());
                }
                // Superseded in place; scans must skip it
                record.info.set_invalid(true);
            }
        }

        let record = LogRecord::new(key.clone(), value.clone())?;
        let address = self.append(record)?;
        self.index.insert(key.payload().clone(), address);
        Ok(())
    }

    fn read(&mut self, key: &Envelope, serial: u64) -> Result<Status<Envelope>> {
        self.ensure_open()?;
        self.last_serial = self.last_serial.max(serial);

        let address = match self.index.get(key.payload()) {
            Some(&address) => address,
            None => return Ok(Status::Miss),
        };
        if address < self.head {
            let id = self.park(PendingKind::Read, key.payload().clone());
            return Ok(Status::Pending(id));
        }

        let record = self.memory_record(address)?;
        if record.info.is_tombstone() {
            Ok(Status::Miss)
        } else {
            Ok(Status::Hit(record.value.clone()))
        }
    }

    fn delete(&mut self, key: &Envelope, serial: u64) -> Result<Status<()>> {
        self.ensure_open()?;
        self.last_serial = self.last_serial.max(serial);

        let address = match self.index.get(key.payload()) {
            Some(&address) => address,
            None => return Ok(Status::Miss),
        };
        if address < self.head {
            let id = self.park(PendingKind::Delete, key.payload().clone());
            return Ok(Status::Pending(id));
        }

        if self.memory_record(address)?.info.is_tombstone() {
            return Ok(Status::Miss);
        }
        self.tombstone(key.payload(), address)?;
        Ok(Status::Hit(()))
    }

    fn complete_pending(&mut self) -> Result<Vec<Completed>> {
        self.ensure_open()?;
        let parked = std::mem::take(&mut self.pending);
        let mut completed = Vec::with_capacity(parked.len());
        for op in parked {
            completed.push(self.complete_one(op)?);
        }
        Ok(completed)
    }

    fn scan(&mut self, from: Address, to: Address) -> Result<LogScan<'_>> {
        self.ensure_open()?;
        let from = from.max(self.begin);
        let to = to.min(self.tail);
        if from >= to {
            return Ok(Box::new(std::iter::empty()));
        }

        let device = if from < self.head {
            let device = self.device.as_mut().ok_or_else(|| missing_record(from))?;
            let reader = device.open_reader(from)?;
            Some(DeviceCursor::new(reader, from, to.min(self.head)))
        } else {
            None
        };

        let start = from.max(self.head);
        let idx = self.memory.partition_point(|(a, _)| *a < start);
        Ok(Box::new(LogScanner::new(
            device,
            self.memory.range(idx..),
            to,
        )))
    }

    fn begin_address(&self) -> Address {
        self.begin
    }

    fn tail_address(&self) -> Address {
        self.tail
    }

    fn safe_read_only_address(&self) -> Address {
        self.safe_read_only
    }

    fn shift_read_only_address(&mut self, to: Address) {
        let to = to.min(self.tail);
        if to > self.read_only {
            self.read_only = self.boundary_at_or_above(to);
            tracing::debug!("Read-only address shifted to {}", self.read_only);
        }
    }

    fn refresh(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.safe_read_only = self.read_only;
        self.evict()
    }

    fn take_full_checkpoint(&mut self) -> Result<CheckpointToken> {
        self.ensure_open()?;
        if self.checkpoints.is_none() {
            return Err(DictError::Storage(
                "memory-only log cannot checkpoint".to_string(),
            ));
        }

        if self.checkpoint_kind == CheckpointKind::FoldOver {
            self.read_only = self.tail;
            self.safe_read_only = self.tail;
            self.flush_until(self.tail)?;
        }
        if let Some(device) = self.device.as_mut() {
            device.sync()?;
        }

        let mut snapshot = Vec::new();
        let start = self.memory.partition_point(|(a, _)| *a < self.flushed_until);
        for (_, record) in self.memory.range(start..) {
            snapshot.extend_from_slice(&record.encode());
        }
        let index = self
            .index
            .iter()
            .map(|(key, address)| (key.to_vec(), *address))
            .collect();

        let info = CheckpointInfo::new(
            self.checkpoint_kind,
            self.begin,
            self.flushed_until,
            self.tail,
            self.last_serial,
        );
        let snapshot_len = snapshot.len();
        let image = CheckpointImage {
            info,
            index,
            snapshot,
        };

        let manager = self
            .checkpoints
            .as_mut()
            .ok_or_else(|| DictError::Storage("memory-only log cannot checkpoint".to_string()))?;
        let token = manager.begin(image)?;
        tracing::debug!(
            "Checkpoint {} started ({:?}, flushed until {}, tail {}, {} snapshot bytes)",
            token,
            self.checkpoint_kind,
            self.flushed_until,
            self.tail,
            snapshot_len
        );
        Ok(token)
    }

    fn complete_checkpoint(&mut self, token: &CheckpointToken) -> Result<()> {
        let manager = self
            .checkpoints
            .as_mut()
            .ok_or_else(|| DictError::Storage("memory-only log cannot checkpoint".to_string()))?;
        manager.complete(token)
    }

    fn retain_only(&mut self, token: &CheckpointToken) -> Result<usize> {
        match self.checkpoints.as_ref() {
            Some(manager) => manager.retain_only(token),
            None => Ok(0),
        }
    }

    fn last_serial(&self) -> u64 {
        self.last_serial
    }

    fn create_auxiliary(&self) -> Result<Self> {
        Ok(Self::in_memory())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.pending.clear();
        self.memory.clear();
        self.index.clear();

        let log_path: Option<PathBuf> = match self.device.as_mut() {
            Some(device) => {
                device.sync()?;
                Some(device.path().to_path_buf())
            }
            None => None,
        };
        self.device = None;

        if self.delete_on_close {
            if let Some(path) = log_path {
                if path.exists() {
                    fs::remove_file(&path)?;
                }
            }
            if let Some(manager) = self.checkpoints.take() {
                manager.remove_all()?;
            }
        }
        Ok(())
    }
}

fn missing_record(address: Address) -> DictError {
    DictError::Storage(format!("no record at address {}", address))
}
