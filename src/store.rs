//! Store contract
//!
//! The narrow slice of a log-structured engine the command actor relies on.
//! [`crate::log::HybridLog`] is the in-crate implementation; the actor is
//! generic over this trait so it can be driven against any engine that
//! honors it.
//!
//! All methods take `&mut self`: a store value *is* the single mutating
//! session, and only the actor thread ever holds it.

use std::fmt;

use uuid::Uuid;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::log::RecordInfo;

/// Logical byte offset in a log
pub type Address = u64;

/// Identifies an operation parked on auxiliary I/O
pub type PendingId = u64;

/// Outcome of a read or delete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status<T> {
    /// The key was live
    Hit(T),

    /// The key is absent or deleted
    Miss,

    /// The record lives on the device; drive [`LogStore::complete_pending`]
    Pending(PendingId),
}

/// A pending operation after its I/O finished
#[derive(Debug, Clone)]
pub struct Completed {
    pub id: PendingId,

    /// Whether the key was live when the operation completed
    pub found: bool,

    /// The value, for completed reads that hit
    pub value: Option<Envelope>,
}

/// One record produced by a log scan
#[derive(Debug, Clone)]
pub struct ScannedRecord {
    pub address: Address,

    /// Address of the record that follows this one
    pub next_address: Address,

    pub info: RecordInfo,
    pub key: Envelope,
    pub value: Envelope,
}

/// A forward scan over `[from, to)`; restartable per call only
pub type LogScan<'a> = Box<dyn Iterator<Item = Result<ScannedRecord>> + 'a>;

/// Names one checkpoint generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CheckpointToken(pub Uuid);

impl CheckpointToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a token from a generation directory name
    pub fn parse(name: &str) -> Option<Self> {
        Uuid::parse_str(name).ok().map(Self)
    }
}

impl Default for CheckpointToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Engine operations consumed by the command actor
pub trait LogStore: Send + Sized + 'static {
    // -------------------------------------------------------------------------
    // Point operations
    // -------------------------------------------------------------------------

    fn upsert(&mut self, key: &Envelope, value: &Envelope, serial: u64) -> Result<()>;

    fn read(&mut self, key: &Envelope, serial: u64) -> Result<Status<Envelope>>;

    fn delete(&mut self, key: &Envelope, serial: u64) -> Result<Status<()>>;

    /// Finish every parked operation, waiting for its I/O
    fn complete_pending(&mut self) -> Result<Vec<Completed>>;

    // -------------------------------------------------------------------------
    // Log layout
    // -------------------------------------------------------------------------

    /// Scan records in `[from, to)` in address order
    fn scan(&mut self, from: Address, to: Address) -> Result<LogScan<'_>>;

    fn begin_address(&self) -> Address;

    fn tail_address(&self) -> Address;

    /// Below this address records are guaranteed immutable
    fn safe_read_only_address(&self) -> Address;

    /// Ask the engine to seal everything below `to`; the safe boundary
    /// follows on a later [`LogStore::refresh`]
    fn shift_read_only_address(&mut self, to: Address);

    /// Let deferred boundary shifts and evictions take effect
    fn refresh(&mut self) -> Result<()>;

    // -------------------------------------------------------------------------
    // Durability
    // -------------------------------------------------------------------------

    fn take_full_checkpoint(&mut self) -> Result<CheckpointToken>;

    fn complete_checkpoint(&mut self, token: &CheckpointToken) -> Result<()>;

    /// Delete every checkpoint generation except `token`; returns how many went
    fn retain_only(&mut self, token: &CheckpointToken) -> Result<usize>;

    /// Highest serial number applied (restored from a checkpoint on recovery)
    fn last_serial(&self) -> u64;

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// A fresh, empty, memory-only instance with the same key encoding
    fn create_auxiliary(&self) -> Result<Self>;

    /// Flush and close the devices
    fn close(&mut self) -> Result<()>;
}
