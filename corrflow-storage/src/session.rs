//! Per-delivery unit of work.

use crate::error::StorageError;
use crate::store::{MemoryStore, StagedWrite};
use async_trait::async_trait;
use corrflow_core::{
    CancellationToken, CommandSender, CoreError, Envelope, InstanceKey, InstanceRecord,
    InstanceRepository, NotificationPublisher, Services, UnitOfWork,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Stages instance writes and outbound messages for one delivery and flushes
/// them to the [`MemoryStore`] on commit.
///
/// Reads see the session's own staged writes before committed state.
#[derive(Debug)]
pub struct MemorySession {
    store: Arc<MemoryStore>,
    writes: Mutex<Vec<StagedWrite>>,
    outbox: Mutex<Vec<Envelope>>,
    committed: AtomicBool,
}

impl MemorySession {
    pub(crate) fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            writes: Mutex::new(Vec::new()),
            outbox: Mutex::new(Vec::new()),
            committed: AtomicBool::new(false),
        }
    }

    /// Builds the services handle for this delivery, registering the session
    /// as repository, unit of work, command sender and notification publisher.
    pub fn services(self: &Arc<Self>) -> Services {
        self.extend(Services::new())
    }

    /// Adds this session's registrations to `services`.
    pub fn extend(self: &Arc<Self>, services: Services) -> Services {
        services
            .with::<dyn InstanceRepository>(self.clone())
            .with::<dyn UnitOfWork>(self.clone())
            .with::<dyn CommandSender>(self.clone())
            .with::<dyn NotificationPublisher>(self.clone())
    }

    pub fn staged_writes(&self) -> usize {
        self.writes.lock().len()
    }

    /// Outbound messages staged but not yet committed.
    pub fn staged_messages(&self) -> Vec<Envelope> {
        self.outbox.lock().clone()
    }

    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_committed() {
            return Err(StorageError::AlreadyCommitted);
        }
        Ok(())
    }

    fn stage(&self, write: StagedWrite) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.writes.lock().push(write);
        Ok(())
    }

    fn enqueue(&self, envelope: Envelope, cancel: &CancellationToken) -> Result<(), CoreError> {
        cancel.check()?;
        self.ensure_open()?;
        self.outbox.lock().push(envelope);
        Ok(())
    }
}

#[async_trait]
impl InstanceRepository for MemorySession {
    async fn find(
        &self,
        key: &InstanceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<InstanceRecord>, CoreError> {
        cancel.check()?;

        let staged = self
            .writes
            .lock()
            .iter()
            .rev()
            .map(StagedWrite::record)
            .find(|record| &record.key == key)
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }

        Ok(self.store.get(key).map(|stored| stored.record))
    }

    fn add(&self, record: InstanceRecord) -> Result<(), CoreError> {
        self.stage(StagedWrite::Add(record))
    }

    fn update(&self, record: InstanceRecord) -> Result<(), CoreError> {
        self.stage(StagedWrite::Update(record))
    }
}

#[async_trait]
impl UnitOfWork for MemorySession {
    async fn commit(&self, cancel: &CancellationToken) -> Result<(), CoreError> {
        cancel.check()?;
        self.ensure_open()?;

        // Cleared only after the store accepts the batch.
        let mut writes = self.writes.lock();
        let mut envelopes = self.outbox.lock();
        self.store.apply(&writes, &envelopes)?;
        writes.clear();
        envelopes.clear();
        self.committed.store(true, Ordering::Release);

        Ok(())
    }
}

#[async_trait]
impl CommandSender for MemorySession {
    async fn send(&self, command: Envelope, cancel: &CancellationToken) -> Result<(), CoreError> {
        self.enqueue(command, cancel)
    }
}

#[async_trait]
impl NotificationPublisher for MemorySession {
    async fn publish(
        &self,
        notification: Envelope,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        self.enqueue(notification, cancel)
    }
}
