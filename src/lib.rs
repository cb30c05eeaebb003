//! # logdict
//!
//! An asynchronous dictionary over an embedded log-structured key-value
//! engine:
//! - A single command actor owns the engine session; callers never lock
//! - Consistent snapshot enumeration while writers keep going
//! - Checkpoints with recovery and retention of one generation
//! - Raw-byte or JSON envelopes for arbitrary key/value types
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  Dictionary<K, V> (callers)                  │
//! │     upsert / try_get / remove / ping / save / entries        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Command + CompletionHandle
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Command Actor                            │
//! │          (one thread, FIFO, one engine session)              │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ Envelopes
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌──────────────┐
//!   │  HybridLog  │          │  Auxiliary   │
//!   │ (live data) │          │  HybridLog   │
//!   └──────┬──────┘          │ (iteration)  │
//!          │                 └──────────────┘
//!          ▼
//!   ┌─────────────┐
//!   │ Log device  │
//!   │ Checkpoints │
//!   └─────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use logdict::{Config, Dictionary};
//!
//! # async fn demo() -> logdict::Result<()> {
//! let config = Config::builder().data_dir("./data").name("users").build();
//! let dict: Dictionary<String, String> = Dictionary::open(config)?;
//!
//! dict.upsert("alice".into(), "admin".into()).await?;
//! assert_eq!(dict.get("alice".into()).await?.as_deref(), Some("admin"));
//!
//! dict.save().await?;
//! dict.dispose().await?;
//! # Ok(())
//! # }
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod envelope;
pub mod store;
pub mod log;
pub mod dictionary;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DictError, FaultClass, Result};
pub use config::{CheckpointKind, Config};
pub use envelope::{Codec, Envelope, Json};
pub use store::LogStore;
pub use log::HybridLog;
pub use dictionary::{ActorState, Dictionary, Entries, Keys, ReadResult};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of logdict
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
