//! Dictionary
//!
//! The asynchronous façade. Every call queues a command for the actor that
//! owns the engine and returns a [`Completion`] right away.
//!
//! ## Architecture
//! ```text
//!   caller tasks ──┐
//!   caller tasks ──┼──► unbounded queue ──► actor thread ──► LogStore
//!   caller tasks ──┘         (FIFO)          (one session)
//!        ▲                                        │
//!        └──────────── oneshot completions ◄──────┘
//! ```
//!
//! Commands complete in submission order as observed by the actor, so an
//! awaited [`Dictionary::ping`] is a barrier for everything submitted
//! before it.

mod actor;
mod command;
mod completion;
mod handlers;
mod iterator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;

use crate::config::Config;
use crate::envelope::Codec;
use crate::error::Result;
use crate::log::HybridLog;
use crate::store::LogStore;

use actor::Mailbox;

pub use actor::ActorState;
pub use command::{CommandType, IterationMode};
pub use completion::{Completion, ReadResult};
pub use iterator::{Entries, Keys};

use command::Command;

/// An asynchronous dictionary backed by a log-structured store
pub struct Dictionary<K, V> {
    name: String,
    mailbox: Mailbox<K, V>,

    /// Source of enumeration ids; checked by the actor on every iteration command
    next_iteration: AtomicU64,

    actor: Option<JoinHandle<()>>,
}

impl<K: Codec, V: Codec> Dictionary<K, V> {
    /// Open (or recover) the structure described by `config`
    ///
    /// The engine is opened on the actor thread; an initialization failure
    /// surfaces as the error of every command, starting with the first.
    pub fn open(config: Config) -> Result<Self> {
        let name = config.name.clone();
        Self::with_store(name, move || HybridLog::open(&config))
    }

    /// Run the actor against the store produced by `opener`
    pub fn with_store<S, F>(name: impl Into<String>, opener: F) -> Result<Self>
    where
        S: LogStore,
        F: FnOnce() -> Result<S> + Send + 'static,
    {
        let name = name.into();
        let (mailbox, actor) = actor::spawn::<K, V, S, F>(name.clone(), opener)?;
        Ok(Self {
            name,
            mailbox,
            next_iteration: AtomicU64::new(1),
            actor: Some(actor),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current actor lifecycle state
    pub fn state(&self) -> ActorState {
        self.mailbox.state()
    }

    // =========================================================================
    // Point Operations
    // =========================================================================

    /// Insert or replace `key`; completes with the written pair
    pub fn upsert(&self, key: K, value: V) -> Completion<K, V> {
        self.mailbox.submit(Command::Upsert { key, value })
    }

    /// Look up `key`
    pub fn try_get(&self, key: K) -> Completion<K, V> {
        self.mailbox.submit(Command::Get { key })
    }

    /// Look up `key`, returning just the value
    pub async fn get(&self, key: K) -> Result<Option<V>> {
        let result = self.try_get(key).await?;
        Ok(result.value.filter(|_| result.found))
    }

    /// Delete `key`; `found` tells whether it was live
    pub fn remove(&self, key: K) -> Completion<K, V> {
        self.mailbox.submit(Command::Remove { key })
    }

    // =========================================================================
    // Control
    // =========================================================================

    /// Completes once every command submitted before it has completed
    pub fn ping(&self) -> Completion<K, V> {
        self.mailbox.submit(Command::Ping)
    }

    /// Take a full checkpoint and prune older generations
    pub fn save(&self) -> Completion<K, V> {
        self.mailbox.submit(Command::Save)
    }

    /// Close the engine and stop the actor. Repeated calls succeed.
    pub fn dispose(&self) -> Completion<K, V> {
        self.mailbox.submit(Command::Dispose)
    }

    // =========================================================================
    // Enumeration
    // =========================================================================

    /// Snapshot the live key/value pairs
    ///
    /// Only one enumeration may be active; a second fails with
    /// [`crate::DictError::ProtocolViolation`].
    pub async fn entries(&self) -> Result<Entries<K, V>> {
        let iteration = self.next_iteration.fetch_add(1, Ordering::Relaxed);
        Entries::acquire(self.mailbox.clone(), iteration).await
    }

    /// Snapshot the live keys
    pub async fn keys(&self) -> Result<Keys<K, V>> {
        let iteration = self.next_iteration.fetch_add(1, Ordering::Relaxed);
        Keys::acquire(self.mailbox.clone(), iteration).await
    }
}

impl<K, V> Drop for Dictionary<K, V> {
    fn drop(&mut self) {
        if !self.mailbox.state().is_terminal() {
            let _ = self.mailbox.submit(Command::Dispose);
        }
        // The actor finishes the queue on its own; never block the dropping task
        drop(self.actor.take());
    }
}
