//! Configuration for logdict
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DictError, Result};

/// Smallest in-memory log budget accepted by [`Config::validate`]
pub const MIN_MEMORY_SIZE: usize = 1024;

/// Main configuration for a dictionary instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files (log devices, checkpoints)
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── logs/{name}.log            (hybrid log device)
    ///     └── checkpoints/{name}/{token}/ (one directory per generation)
    pub data_dir: PathBuf,

    /// Name of the structure; several dictionaries may share one data_dir
    pub name: String,

    /// Remove the log device and checkpoints when the dictionary is disposed
    pub delete_on_close: bool,

    // -------------------------------------------------------------------------
    // Hybrid Log Configuration
    // -------------------------------------------------------------------------
    /// Bytes of log kept in memory before older records are evicted to the device
    pub memory_size: usize,

    /// Fraction of the in-memory log that stays mutable (in-place updates)
    pub mutable_fraction: f64,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// How `Save` captures state
    pub checkpoint_kind: CheckpointKind,
}

/// Checkpoint strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointKind {
    /// Copy the unflushed tail of the log into the checkpoint directory
    Snapshot,

    /// Seal the whole log read-only and flush it to the log device
    FoldOver,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./logdict_data"),
            name: "dictionary".to_string(),
            delete_on_close: false,
            memory_size: 16 * 1024 * 1024, // 16 MB
            mutable_fraction: 0.9,
            checkpoint_kind: CheckpointKind::Snapshot,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DictError::Config("name must not be empty".to_string()));
        }
        if self
            .name
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
        {
            return Err(DictError::Config(format!(
                "name {:?} may only contain ASCII letters, digits, '-', '_' and '.'",
                self.name
            )));
        }
        if self.memory_size < MIN_MEMORY_SIZE {
            return Err(DictError::Config(format!(
                "memory_size must be at least {} bytes, got {}",
                MIN_MEMORY_SIZE, self.memory_size
            )));
        }
        if !(self.mutable_fraction > 0.0 && self.mutable_fraction <= 1.0) {
            return Err(DictError::Config(format!(
                "mutable_fraction must be in (0, 1], got {}",
                self.mutable_fraction
            )));
        }
        Ok(())
    }

    /// Directory holding the log devices
    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    /// Path of this structure's log device
    pub fn log_path(&self) -> PathBuf {
        self.logs_dir().join(format!("{}.log", self.name))
    }

    /// Directory holding this structure's checkpoint generations
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints").join(&self.name)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the structure name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Remove all files of the structure on dispose
    pub fn delete_on_close(mut self, delete: bool) -> Self {
        self.config.delete_on_close = delete;
        self
    }

    /// Set the in-memory log budget (in bytes)
    pub fn memory_size(mut self, size: usize) -> Self {
        self.config.memory_size = size;
        self
    }

    /// Set the mutable fraction of the in-memory log
    pub fn mutable_fraction(mut self, fraction: f64) -> Self {
        self.config.mutable_fraction = fraction;
        self
    }

    /// Set the checkpoint strategy
    pub fn checkpoint_kind(mut self, kind: CheckpointKind) -> Self {
        self.config.checkpoint_kind = kind;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
