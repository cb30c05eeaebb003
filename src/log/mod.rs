//! Hybrid log engine
//!
//! The embedded log-structured store behind every dictionary.
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── logs/{name}.log                  LogDevice: header + flushed records
//!   └── checkpoints/{name}/{token}/      CheckpointManager: one dir per generation
//! ```
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────┬───────────┬──────────────┬────────────────┬─────────┐
//! │ CRC (4)  │ Flags (4)│ Alloc (4) │ Key envelope │ Value envelope │ Padding │
//! └──────────┴──────────┴───────────┴──────────────┴────────────────┴─────────┘
//! ```
//! Flags: bit 0 tombstone, bit 1 invalid. Records are 8-byte aligned.

mod checkpoint;
mod device;
mod record;
mod scan;
mod store;

pub use checkpoint::{CheckpointImage, CheckpointInfo, CheckpointManager, RecoveredCheckpoint};
pub use device::{LogDevice, DEVICE_HEADER_SIZE};
pub use record::{LogRecord, RecordInfo, RECORD_ALIGNMENT, RECORD_HEADER_SIZE};
pub use scan::LogScanner;
pub use store::HybridLog;
