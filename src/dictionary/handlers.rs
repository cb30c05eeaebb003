//! Command handlers
//!
//! Point operations and control commands. Each runs on the actor thread
//! and returns the outcome its completion handle will carry.

use crate::envelope::Codec;
use crate::error::{DictError, Result};
use crate::store::{Completed, LogStore, PendingId, Status};

use super::actor::Actor;
use super::completion::ReadResult;

impl<K, V, S> Actor<K, V, S>
where
    K: Codec,
    V: Codec,
    S: LogStore,
{
    pub(super) fn handle_get(&mut self, key: K, serial: u64) -> Result<ReadResult<K, V>> {
        let encoded = key.encode()?;
        let value = match self.store.read(&encoded, serial)? {
            Status::Hit(value) => Some(value),
            Status::Miss => None,
            Status::Pending(id) => self.wait_pending(id)?.value,
        };

        match value {
            Some(value) => {
                let value = V::decode(&value)?;
                Ok(ReadResult::hit(key, Some(value)))
            }
            None => Ok(ReadResult::missing()),
        }
    }

    pub(super) fn handle_upsert(
        &mut self,
        key: K,
        value: V,
        serial: u64,
    ) -> Result<ReadResult<K, V>> {
        let encoded_key = key.encode()?;
        let encoded_value = value.encode()?;
        self.store.upsert(&encoded_key, &encoded_value, serial)?;
        Ok(ReadResult::hit(key, Some(value)))
    }

    pub(super) fn handle_remove(&mut self, key: K, serial: u64) -> Result<ReadResult<K, V>> {
        let encoded = key.encode()?;
        let found = match self.store.delete(&encoded, serial)? {
            Status::Hit(()) => true,
            Status::Miss => false,
            Status::Pending(id) => self.wait_pending(id)?.found,
        };

        if found {
            Ok(ReadResult::hit(key, None))
        } else {
            Ok(ReadResult::missing())
        }
    }

    /// Full checkpoint, then prune every older generation
    pub(super) fn handle_save(&mut self) -> Result<ReadResult<K, V>> {
        let token = self.store.take_full_checkpoint()?;
        self.store.complete_checkpoint(&token)?;

        // The new generation is durable; older ones are garbage now
        let removed = self
            .store
            .retain_only(&token)
            .map_err(|e| DictError::Checkpoint(format!("pruning after {} failed: {}", token, e)))?;

        tracing::info!(
            "Dictionary {} saved checkpoint {} (pruned {} older generations)",
            self.name,
            token,
            removed
        );
        Ok(ReadResult::done())
    }

    pub(super) fn handle_dispose(&mut self) -> Result<ReadResult<K, V>> {
        self.shut_down()?;
        Ok(ReadResult::done())
    }

    /// Drop any snapshot and close the engine
    pub(super) fn shut_down(&mut self) -> Result<()> {
        if let Some(snapshot) = self.iteration.take() {
            tracing::debug!(
                "Dictionary {} discarding iteration {} on close",
                self.name,
                snapshot.id()
            );
            snapshot.destroy();
        }
        self.store.close()
    }

    /// Block the actor until the parked operation `id` resolves
    fn wait_pending(&mut self, id: PendingId) -> Result<Completed> {
        self.store
            .complete_pending()?
            .into_iter()
            .find(|completed| completed.id == id)
            .ok_or_else(|| {
                DictError::Storage(format!("pending operation {} was never completed", id))
            })
    }
}
