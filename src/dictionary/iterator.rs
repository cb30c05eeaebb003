//! Snapshot iteration
//!
//! The engine cannot enumerate safely while it is being written, so every
//! enumeration works on a private copy.
//!
//! ## Acquire
//! ```text
//!  live log  [begin ─────────────────────── safe_ro ───────── tail)
//!             │ 1. replay every record into the auxiliary instance │
//!                                           │ 2. seal up to tail, │
//!                                           │    replay deletions │
//!                                           │    as the safe      │
//!                                           │    boundary moves   │
//! ```
//! The auxiliary instance then holds the live state as of `tail`; an
//! address cursor walks its log. Release destroys it.

use std::collections::HashMap;

use bytes::Bytes;
use futures::stream::{self, Stream};

use crate::envelope::{Codec, Envelope};
use crate::error::{DictError, Result};
use crate::store::{Address, LogStore, Status};

use super::actor::{Actor, Mailbox};
use super::command::{Command, IterationMode};
use super::completion::ReadResult;

/// Upper bound on refresh rounds while waiting for the safe boundary
const MAX_SEAL_ROUNDS: usize = 64;

/// The auxiliary instance behind one enumeration
pub(crate) struct IterationSnapshot<S: LogStore> {
    id: u64,
    mode: IterationMode,
    aux: S,

    /// Address of the next record to inspect in `aux`
    cursor: Address,
}

impl<S: LogStore> IterationSnapshot<S> {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn destroy(mut self) {
        if let Err(e) = self.aux.close() {
            tracing::warn!("Failed to close snapshot of iteration {}: {}", self.id, e);
        }
    }
}

/// Rebuild the live state as of the current tail in a fresh auxiliary instance
fn build_snapshot<S: LogStore>(live: &mut S, mode: IterationMode) -> Result<S> {
    let tail = live.tail_address();
    let mut aux = live.create_auxiliary()?;
    let mut serial = 0u64;

    // Step 1: Replay the whole log up to the tail
    let begin = live.begin_address();
    for item in live.scan(begin, tail)? {
        let record = item?;
        if record.info.is_invalid() {
            continue;
        }
        serial += 1;
        if record.info.is_tombstone() {
            aux_delete(&mut aux, &record.key, serial)?;
        } else {
            let value = match mode {
                IterationMode::Pairs => record.value,
                IterationMode::Keys => Envelope::empty(),
            };
            aux.upsert(&record.key, &value, serial)?;
        }
    }

    // Step 2: Seal the scanned range and pick up deletions as it becomes immutable
    let mut scanned = live.safe_read_only_address().min(tail);
    live.shift_read_only_address(tail);

    let mut rounds = 0;
    loop {
        let safe = live.safe_read_only_address().min(tail);
        if safe > scanned {
            // Replay a sealed tombstone only when it is the key's newest record below the tail
            let mut newest: HashMap<Bytes, (Address, Option<Envelope>)> = HashMap::new();
            for item in live.scan(scanned, tail)? {
                let record = item?;
                if record.info.is_invalid() {
                    continue;
                }
                let tombstone = record.info.is_tombstone().then_some(record.key.clone());
                newest.insert(record.key.into_payload(), (record.address, tombstone));
            }
            for (address, tombstone) in newest.into_values() {
                if let Some(key) = tombstone.filter(|_| address < safe) {
                    serial += 1;
                    aux_delete(&mut aux, &key, serial)?;
                }
            }
            scanned = safe;
        }

        if scanned >= tail {
            break;
        }
        rounds += 1;
        if rounds > MAX_SEAL_ROUNDS {
            return Err(DictError::Storage(format!(
                "safe read-only address stuck at {} below tail {}",
                scanned, tail
            )));
        }
        live.refresh()?;
    }

    Ok(aux)
}

fn aux_delete<S: LogStore>(aux: &mut S, key: &Envelope, serial: u64) -> Result<()> {
    match aux.delete(key, serial)? {
        Status::Hit(()) | Status::Miss => Ok(()),
        Status::Pending(_) => Err(DictError::Storage(
            "auxiliary instance went to the device".to_string(),
        )),
    }
}

// =============================================================================
// Actor-side handlers
// =============================================================================

impl<K, V, S> Actor<K, V, S>
where
    K: Codec,
    V: Codec,
    S: LogStore,
{
    pub(super) fn handle_acquire_iterator(
        &mut self,
        iteration: u64,
        mode: IterationMode,
    ) -> Result<ReadResult<K, V>> {
        if let Some(active) = &self.iteration {
            return Err(DictError::ProtocolViolation(format!(
                "iteration already in progress (iteration {})",
                active.id
            )));
        }

        let aux = build_snapshot(&mut self.store, mode)?;
        let cursor = aux.begin_address();
        tracing::debug!(
            "Dictionary {} acquired iteration {} ({:?}, snapshot tail {})",
            self.name,
            iteration,
            mode,
            aux.tail_address()
        );
        self.iteration = Some(IterationSnapshot {
            id: iteration,
            mode,
            aux,
            cursor,
        });
        Ok(ReadResult::done())
    }

    pub(super) fn handle_iterate_next(&mut self, iteration: u64) -> Result<ReadResult<K, V>> {
        let snapshot = match self.iteration.as_mut() {
            Some(snapshot) if snapshot.id == iteration => snapshot,
            _ => {
                return Err(DictError::ProtocolViolation(format!(
                    "iteration {} is not active",
                    iteration
                )))
            }
        };

        let tail = snapshot.aux.tail_address();
        let mut next = tail;
        let mut found = None;
        for item in snapshot.aux.scan(snapshot.cursor, tail)? {
            let record = item?;
            if record.info.is_live() {
                next = record.next_address;
                found = Some(record);
                break;
            }
        }
        snapshot.cursor = next;

        match found {
            Some(record) => {
                let key = K::decode(&record.key)?;
                let value = match snapshot.mode {
                    IterationMode::Pairs => Some(V::decode(&record.value)?),
                    IterationMode::Keys => None,
                };
                Ok(ReadResult::hit(key, value))
            }
            None => Ok(ReadResult::missing()),
        }
    }

    pub(super) fn handle_release_iterator(&mut self, iteration: u64) -> Result<ReadResult<K, V>> {
        match self.iteration.take() {
            Some(snapshot) if snapshot.id == iteration => {
                tracing::debug!("Dictionary {} released iteration {}", self.name, iteration);
                snapshot.destroy();
                Ok(ReadResult::done())
            }
            Some(snapshot) => {
                let active = snapshot.id;
                self.iteration = Some(snapshot);
                Err(DictError::ProtocolViolation(format!(
                    "iteration {} cannot release active iteration {}",
                    iteration, active
                )))
            }
            None => Ok(ReadResult::missing()),
        }
    }
}

// =============================================================================
// Caller-side cursors
// =============================================================================

/// Shared plumbing of [`Entries`] and [`Keys`]
struct Cursor<K, V> {
    mailbox: Mailbox<K, V>,
    iteration: u64,
    released: bool,
}

impl<K, V> Cursor<K, V> {
    async fn acquire(mailbox: Mailbox<K, V>, iteration: u64, mode: IterationMode) -> Result<Self> {
        let acquired = mailbox.submit(Command::AcquireIterator { iteration, mode });

        // Exists before the await so an abandoned acquire still releases on drop
        let mut cursor = Self {
            mailbox,
            iteration,
            released: false,
        };
        match acquired.await {
            Ok(_) => Ok(cursor),
            Err(e) => {
                cursor.released = true;
                Err(e)
            }
        }
    }

    async fn advance(&mut self) -> Result<Option<(K, Option<V>)>> {
        if self.released {
            return Ok(None);
        }
        let result = self
            .mailbox
            .submit(Command::IterateNext {
                iteration: self.iteration,
            })
            .await?;

        match (result.found, result.key) {
            (true, Some(key)) => Ok(Some((key, result.value))),
            _ => {
                self.release().await?;
                Ok(None)
            }
        }
    }

    async fn release(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.mailbox
            .submit(Command::ReleaseIterator {
                iteration: self.iteration,
            })
            .await
            .map(|_| ())
    }
}

impl<K, V> Drop for Cursor<K, V> {
    fn drop(&mut self) {
        if !self.released {
            // Fire and forget: nobody is left to observe the outcome
            let _ = self.mailbox.submit(Command::ReleaseIterator {
                iteration: self.iteration,
            });
        }
    }
}

/// Enumeration of the key/value pairs live when it was acquired
///
/// Reaching the end releases the snapshot; so does dropping the cursor.
pub struct Entries<K, V> {
    cursor: Cursor<K, V>,
}

impl<K: Codec, V: Codec> Entries<K, V> {
    pub(crate) async fn acquire(mailbox: Mailbox<K, V>, iteration: u64) -> Result<Self> {
        let cursor = Cursor::acquire(mailbox, iteration, IterationMode::Pairs).await?;
        Ok(Self { cursor })
    }

    /// The next pair, or `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<(K, V)>> {
        match self.cursor.advance().await? {
            Some((key, Some(value))) => Ok(Some((key, value))),
            Some((_, None)) => Err(DictError::Storage(
                "pair enumeration returned a key without a value".to_string(),
            )),
            None => Ok(None),
        }
    }

    /// Destroy the snapshot without reaching the end
    pub async fn release(mut self) -> Result<()> {
        self.cursor.release().await
    }

    /// Consume the cursor as a stream; an error ends the stream
    pub fn into_stream(self) -> impl Stream<Item = Result<(K, V)>> {
        stream::unfold(Some(self), |state| async move {
            let mut entries = state?;
            match entries.next().await {
                Ok(Some(pair)) => Some((Ok(pair), Some(entries))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

/// Enumeration of the keys live when it was acquired
pub struct Keys<K, V> {
    cursor: Cursor<K, V>,
}

impl<K: Codec, V: Codec> Keys<K, V> {
    pub(crate) async fn acquire(mailbox: Mailbox<K, V>, iteration: u64) -> Result<Self> {
        let cursor = Cursor::acquire(mailbox, iteration, IterationMode::Keys).await?;
        Ok(Self { cursor })
    }

    /// The next key, or `None` once exhausted
    pub async fn next(&mut self) -> Result<Option<K>> {
        Ok(self.cursor.advance().await?.map(|(key, _)| key))
    }

    /// Destroy the snapshot without reaching the end
    pub async fn release(mut self) -> Result<()> {
        self.cursor.release().await
    }

    /// Consume the cursor as a stream; an error ends the stream
    pub fn into_stream(self) -> impl Stream<Item = Result<K>> {
        stream::unfold(Some(self), |state| async move {
            let mut keys = state?;
            match keys.next().await {
                Ok(Some(key)) => Some((Ok(key), Some(keys))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
