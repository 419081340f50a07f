//! Shared committed state.

use crate::error::StorageError;
use crate::session::MemorySession;
use corrflow_core::{Envelope, InstanceKey, InstanceRecord};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Store behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Reject updates whose read version no longer matches the stored row.
    pub optimistic_concurrency: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            optimistic_concurrency: true,
        }
    }
}

/// A committed instance row with bookkeeping timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredInstance {
    pub record: InstanceRecord,

    /// Creation timestamp (Unix millis).
    pub created_at: i64,

    /// Last update timestamp (Unix millis).
    pub updated_at: i64,
}

/// A write staged by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StagedWrite {
    Add(InstanceRecord),
    Update(InstanceRecord),
}

impl StagedWrite {
    pub(crate) fn record(&self) -> &InstanceRecord {
        match self {
            StagedWrite::Add(record) | StagedWrite::Update(record) => record,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    instances: HashMap<InstanceKey, StoredInstance>,

    /// Committed outbound messages awaiting relay.
    outbox: Vec<Envelope>,

    commits: u64,
}

/// In-memory instance table plus transactional outbox.
///
/// Writes only land through [`MemorySession`] commits, which apply staged
/// instance writes and outbound messages in one critical section.
#[derive(Debug, Default)]
pub struct MemoryStore {
    options: StoreOptions,
    state: RwLock<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self {
            options,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    /// Opens a session scoped to one delivery.
    pub fn begin(self: &Arc<Self>) -> Arc<MemorySession> {
        Arc::new(MemorySession::new(self.clone()))
    }

    /// Returns a committed row.
    pub fn get(&self, key: &InstanceKey) -> Option<StoredInstance> {
        self.state.read().instances.get(key).cloned()
    }

    /// Returns all committed rows, ordered by key.
    pub fn instances(&self) -> Vec<StoredInstance> {
        let mut rows: Vec<_> = self.state.read().instances.values().cloned().collect();
        rows.sort_by(|a, b| a.record.key.cmp(&b.record.key));
        rows
    }

    pub fn instance_count(&self) -> usize {
        self.state.read().instances.len()
    }

    /// Committed outbound messages, oldest first.
    pub fn outbox(&self) -> Vec<Envelope> {
        self.state.read().outbox.clone()
    }

    /// Removes and returns the committed outbound messages.
    pub fn drain_outbox(&self) -> Vec<Envelope> {
        std::mem::take(&mut self.state.write().outbox)
    }

    /// Number of successful commits.
    pub fn commit_count(&self) -> u64 {
        self.state.read().commits
    }

    /// Replaces the instance table, e.g. from a snapshot.
    pub fn restore(&self, rows: Vec<StoredInstance>) {
        let mut state = self.state.write();
        state.instances = rows
            .into_iter()
            .map(|row| (row.record.key.clone(), row))
            .collect();
    }

    /// Validates every staged write against committed state and against the
    /// earlier writes of the same batch, then applies all of them together
    /// with `envelopes`. Nothing is applied on failure.
    pub(crate) fn apply(
        &self,
        writes: &[StagedWrite],
        envelopes: &[Envelope],
    ) -> Result<(), StorageError> {
        let mut state = self.state.write();

        // key -> version the row will have once the batch is applied
        let mut pending: HashMap<&InstanceKey, u64> = HashMap::new();
        for write in writes {
            match write {
                StagedWrite::Add(record) => {
                    if pending.contains_key(&record.key)
                        || state.instances.contains_key(&record.key)
                    {
                        return Err(StorageError::InstanceExists(record.key.clone()));
                    }
                    pending.insert(&record.key, 1);
                }
                StagedWrite::Update(record) => {
                    let current = match pending.get(&record.key) {
                        Some(version) => *version,
                        None => state
                            .instances
                            .get(&record.key)
                            .map(|stored| stored.record.version)
                            .ok_or_else(|| StorageError::InstanceNotFound(record.key.clone()))?,
                    };
                    if self.options.optimistic_concurrency && current != record.version {
                        return Err(StorageError::Conflict {
                            key: record.key.clone(),
                            expected: record.version,
                            actual: current,
                        });
                    }
                    pending.insert(&record.key, current + 1);
                }
            }
        }

        let now = chrono::Utc::now().timestamp_millis();
        for write in writes {
            match write {
                StagedWrite::Add(record) => {
                    state.instances.insert(
                        record.key.clone(),
                        StoredInstance {
                            record: InstanceRecord {
                                version: 1,
                                ..record.clone()
                            },
                            created_at: now,
                            updated_at: now,
                        },
                    );
                }
                StagedWrite::Update(record) => {
                    if let Some(stored) = state.instances.get_mut(&record.key) {
                        stored.record.state = record.state;
                        stored.record.version += 1;
                        stored.updated_at = now;
                    }
                }
            }
        }

        state.outbox.extend_from_slice(envelopes);
        state.commits += 1;

        tracing::debug!(
            "Committed {} instance writes and {} outbound messages",
            writes.len(),
            envelopes.len()
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corrflow_core::MessageKind;

    fn record(id: &str, state: i32) -> InstanceRecord {
        InstanceRecord::new(InstanceKey::new(id, "order"), state)
    }

    fn envelope() -> Envelope {
        Envelope {
            kind: MessageKind::Notification,
            message_type: "OrderAccepted".to_string(),
            payload: serde_json::json!({"order": "c1"}),
        }
    }

    #[test]
    fn test_add_then_update_bumps_version() {
        let store = MemoryStore::new();
        store.apply(&[StagedWrite::Add(record("c1", 0))], &[]).unwrap();

        let stored = store.get(&InstanceKey::new("c1", "order")).unwrap();
        assert_eq!(stored.record.version, 1);

        store
            .apply(&[StagedWrite::Update(stored.record.with_state(2))], &[])
            .unwrap();

        let stored = store.get(&InstanceKey::new("c1", "order")).unwrap();
        assert_eq!(stored.record.state, 2);
        assert_eq!(stored.record.version, 2);
        assert_eq!(store.commit_count(), 2);
    }

    #[test]
    fn test_duplicate_add_rejected() {
        let store = MemoryStore::new();
        store.apply(&[StagedWrite::Add(record("c1", 0))], &[]).unwrap();

        let err = store
            .apply(&[StagedWrite::Add(record("c1", 1))], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::InstanceExists(_)));
        assert_eq!(
            store.get(&InstanceKey::new("c1", "order")).unwrap().record.state,
            0
        );
    }

    #[test]
    fn test_stale_update_rejected() {
        let store = MemoryStore::new();
        store.apply(&[StagedWrite::Add(record("c1", 0))], &[]).unwrap();
        let read = store.get(&InstanceKey::new("c1", "order")).unwrap().record;

        store
            .apply(&[StagedWrite::Update(read.with_state(1))], &[])
            .unwrap();
        let err = store
            .apply(&[StagedWrite::Update(read.with_state(2))], &[envelope()])
            .unwrap_err();

        assert!(matches!(
            err,
            StorageError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert!(store.outbox().is_empty());
    }

    #[test]
    fn test_stale_update_allowed_without_concurrency_check() {
        let store = MemoryStore::with_options(StoreOptions {
            optimistic_concurrency: false,
        });
        store.apply(&[StagedWrite::Add(record("c1", 0))], &[]).unwrap();
        let read = store.get(&InstanceKey::new("c1", "order")).unwrap().record;

        store
            .apply(&[StagedWrite::Update(read.with_state(1))], &[])
            .unwrap();
        store
            .apply(&[StagedWrite::Update(read.with_state(2))], &[])
            .unwrap();

        let stored = store.get(&InstanceKey::new("c1", "order")).unwrap();
        assert_eq!(stored.record.state, 2);
        assert_eq!(stored.record.version, 3);
    }

    #[test]
    fn test_update_of_missing_row_rejected() {
        let store = MemoryStore::new();
        let err = store
            .apply(&[StagedWrite::Update(record("c1", 0))], &[])
            .unwrap_err();
        assert!(matches!(err, StorageError::InstanceNotFound(_)));
    }

    #[test]
    fn test_outbox_commits_with_writes() {
        let store = MemoryStore::new();
        store
            .apply(&[StagedWrite::Add(record("c1", 0))], &[envelope()])
            .unwrap();

        assert_eq!(store.outbox().len(), 1);
        assert_eq!(store.drain_outbox().len(), 1);
        assert!(store.outbox().is_empty());
    }

    #[test]
    fn test_instances_sorted_by_key() {
        let store = MemoryStore::new();
        store
            .apply(
                &[
                    StagedWrite::Add(record("c2", 0)),
                    StagedWrite::Add(record("c1", 0)),
                ],
                &[],
            )
            .unwrap();

        let ids: Vec<_> = store
            .instances()
            .into_iter()
            .map(|i| i.record.key.correlation_id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_duplicate_add_within_batch_rejected() {
        let store = MemoryStore::new();
        let err = store
            .apply(
                &[
                    StagedWrite::Add(record("c1", 0)),
                    StagedWrite::Add(record("c1", 3)),
                ],
                &[envelope()],
            )
            .unwrap_err();

        assert!(matches!(err, StorageError::InstanceExists(_)));
        assert_eq!(store.instance_count(), 0);
        assert!(store.outbox().is_empty());
        assert_eq!(store.commit_count(), 0);
    }

    #[test]
    fn test_updates_within_batch_are_version_checked() {
        let store = MemoryStore::new();
        store.apply(&[StagedWrite::Add(record("c1", 0))], &[]).unwrap();
        let read = store.get(&InstanceKey::new("c1", "order")).unwrap().record;

        let err = store
            .apply(
                &[
                    StagedWrite::Update(read.with_state(1)),
                    StagedWrite::Update(read.with_state(2)),
                ],
                &[],
            )
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Conflict {
                expected: 1,
                actual: 2,
                ..
            }
        ));
        assert_eq!(
            store.get(&InstanceKey::new("c1", "order")).unwrap().record.state,
            0
        );

        let mut next = read.with_state(2);
        next.version = 2;
        store
            .apply(&[StagedWrite::Update(read.with_state(1)), StagedWrite::Update(next)], &[])
            .unwrap();
        let stored = store.get(&InstanceKey::new("c1", "order")).unwrap();
        assert_eq!(stored.record.state, 2);
        assert_eq!(stored.record.version, 3);
    }

    #[test]
    fn test_add_then_update_within_batch() {
        let store = MemoryStore::new();
        let mut moved = record("c1", 1);
        moved.version = 1;

        store
            .apply(&[StagedWrite::Add(record("c1", 0)), StagedWrite::Update(moved)], &[])
            .unwrap();

        let stored = store.get(&InstanceKey::new("c1", "order")).unwrap();
        assert_eq!(stored.record.state, 1);
        assert_eq!(stored.record.version, 2);
    }
}
