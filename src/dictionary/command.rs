//! Command definitions
//!
//! Represents requests submitted to the command actor.

use super::completion::CompletionHandle;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Get = 0x01,
    Upsert = 0x02,
    Remove = 0x03,
    Ping = 0x04,
    Save = 0x05,
    Dispose = 0x06,
    AcquireIterator = 0x07,
    IterateNext = 0x08,
    ReleaseIterator = 0x09,
}

/// What a snapshot enumeration yields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    /// Keys only; values are not copied into the snapshot
    Keys,

    /// Key/value pairs
    Pairs,
}

/// A request for the actor
#[derive(Debug)]
pub enum Command<K, V> {
    /// Look up a key
    Get { key: K },

    /// Insert or replace a key's value
    Upsert { key: K, value: V },

    /// Delete a key
    Remove { key: K },

    /// Barrier: completes once everything submitted before it has
    Ping,

    /// Full checkpoint, then prune older generations
    Save,

    /// Close the engine and stop the actor
    Dispose,

    /// Build a snapshot for the enumeration `iteration`
    AcquireIterator { iteration: u64, mode: IterationMode },

    /// Advance the enumeration `iteration`
    IterateNext { iteration: u64 },

    /// Destroy the snapshot of enumeration `iteration`
    ReleaseIterator { iteration: u64 },
}

impl<K, V> Command<K, V> {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Get { .. } => CommandType::Get,
            Command::Upsert { .. } => CommandType::Upsert,
            Command::Remove { .. } => CommandType::Remove,
            Command::Ping => CommandType::Ping,
            Command::Save => CommandType::Save,
            Command::Dispose => CommandType::Dispose,
            Command::AcquireIterator { .. } => CommandType::AcquireIterator,
            Command::IterateNext { .. } => CommandType::IterateNext,
            Command::ReleaseIterator { .. } => CommandType::ReleaseIterator,
        }
    }
}

/// A command paired with the handle that reports its outcome
pub(crate) struct Job<K, V> {
    pub command: Command<K, V>,
    pub handle: CompletionHandle<K, V>,
}
