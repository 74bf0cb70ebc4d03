//! Pending request table.
//!
//! Two stage maps keyed by the caller's correlation key: `queued` (submitted,
//! not yet claimed by the worker) and `in_progress` (claimed, awaiting the
//! worker's reply). A key appears in at most one stage at any instant. A
//! single mutex guards both maps so claim, removal, and resolution are atomic
//! with respect to each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::reply::{ReplyEvent, Resolution};
use crate::submission::CommandRun;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TableError {
    #[error("another request is already in flight for this key")]
    Conflict,
    #[error("no in-progress request for this key")]
    NotFound,
}

struct Entry {
    run: CommandRun,
    event: Arc<ReplyEvent>,
}

#[derive(Default)]
struct Stages {
    queued: HashMap<String, Entry>,
    in_progress: HashMap<String, Entry>,
}

/// Registry of in-flight submissions, owned by the broker and shared with the
/// worker channel.
#[derive(Default)]
pub struct PendingRequests {
    stages: Mutex<Stages>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Stages> {
        match self.stages.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("pending request table mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Admit a submission into the queued stage.
    ///
    /// Fails with [`TableError::Conflict`] if the key is already in flight in
    /// either stage; at most one submission per caller is allowed.
    pub fn enqueue(
        &self,
        key: &str,
        run: CommandRun,
        event: Arc<ReplyEvent>,
    ) -> Result<(), TableError> {
        let mut stages = self.lock();
        if stages.queued.contains_key(key) || stages.in_progress.contains_key(key) {
            return Err(TableError::Conflict);
        }
        stages.queued.insert(key.to_string(), Entry { run, event });
        Ok(())
    }

    /// Atomically move a key from queued to in-progress.
    ///
    /// Returns `false` if the key is no longer queued (the caller may have
    /// given up between the drain snapshot and the worker's ack).
    pub fn claim(&self, key: &str) -> bool {
        let mut stages = self.lock();
        match stages.queued.remove(key) {
            Some(entry) => {
                stages.in_progress.insert(key.to_string(), entry);
                true
            }
            None => false,
        }
    }

    /// Remove a key from whichever stage holds it. Idempotent.
    pub fn remove(&self, key: &str) -> bool {
        let mut stages = self.lock();
        let from_queued = stages.queued.remove(key).is_some();
        let from_in_progress = stages.in_progress.remove(key).is_some();
        from_queued || from_in_progress
    }

    /// Remove `key` only if the stage entry still holds `event`.
    ///
    /// Cleanup paths use this to drop their own entry without clobbering a
    /// successor submission that legitimately reused the key after this one
    /// resolved.
    pub fn remove_entry(&self, key: &str, event: &Arc<ReplyEvent>) -> bool {
        let mut stages = self.lock();
        let mut removed = false;
        if stages
            .queued
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.event, event))
        {
            stages.queued.remove(key);
            removed = true;
        }
        if stages
            .in_progress
            .get(key)
            .is_some_and(|entry| Arc::ptr_eq(&entry.event, event))
        {
            stages.in_progress.remove(key);
            removed = true;
        }
        removed
    }

    /// Resolve an in-progress entry and remove it.
    ///
    /// The reply path only ever targets claimed work, so a key that is still
    /// queued (or unknown) is [`TableError::NotFound`].
    pub fn resolve_and_remove(&self, key: &str, resolution: Resolution) -> Result<(), TableError> {
        let entry = self
            .lock()
            .in_progress
            .remove(key)
            .ok_or(TableError::NotFound)?;
        entry.event.resolve(resolution);
        Ok(())
    }

    /// Point-in-time snapshot of the queued stage.
    ///
    /// Does not mutate the table; the channel removes entries via [`claim`]
    /// or [`remove`] as each offer settles.
    ///
    /// [`claim`]: PendingRequests::claim
    /// [`remove`]: PendingRequests::remove
    pub fn drain_queued(&self) -> Vec<(String, CommandRun)> {
        self.lock()
            .queued
            .iter()
            .map(|(key, entry)| (key.clone(), entry.run.clone()))
            .collect()
    }

    /// Resolve every entry in both stages with [`Resolution::WorkerUnavailable`]
    /// and clear the table. Used on connection loss so no waiting caller hangs
    /// until its own timeout.
    pub fn fail_all(&self) {
        let entries: Vec<Entry> = {
            let mut stages = self.lock();
            let mut entries: Vec<Entry> =
                stages.queued.drain().map(|(_, entry)| entry).collect();
            entries.extend(stages.in_progress.drain().map(|(_, entry)| entry));
            entries
        };
        for entry in entries {
            entry.event.resolve(Resolution::WorkerUnavailable);
        }
    }

    pub fn is_queued(&self, key: &str) -> bool {
        self.lock().queued.contains_key(key)
    }

    pub fn is_in_progress(&self, key: &str) -> bool {
        self.lock().in_progress.contains_key(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        let stages = self.lock();
        stages.queued.contains_key(key) || stages.in_progress.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let stages = self.lock();
        stages.queued.len() + stages.in_progress.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
