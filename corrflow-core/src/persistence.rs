//! Instance persistence contracts.
//!
//! The engine never owns storage. It reads and stages instance rows through
//! [`InstanceRepository`] and flushes them through [`UnitOfWork`]; both are
//! resolved from the per-delivery [`Services`](crate::Services) handle.

use crate::cancel::CancellationToken;
use crate::error::CoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a workflow instance.
///
/// The same correlation id may drive independent instances of different
/// definitions at the same time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub correlation_id: String,
    pub definition: String,
}

impl InstanceKey {
    pub fn new(correlation_id: impl Into<String>, definition: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            definition: definition.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.correlation_id, self.definition)
    }
}

/// Persisted instance row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub key: InstanceKey,

    /// State ordinal.
    pub state: i32,

    /// Row version, bumped on every committed write. A staged update carries
    /// the version it was read at.
    pub version: u64,
}

impl InstanceRecord {
    /// A row about to be added.
    pub fn new(key: InstanceKey, state: i32) -> Self {
        Self {
            key,
            state,
            version: 0,
        }
    }

    /// The same row moved to `state`, still carrying the version it was read at.
    pub fn with_state(&self, state: i32) -> Self {
        Self {
            key: self.key.clone(),
            state,
            version: self.version,
        }
    }
}

/// Instance lookup plus staged writes.
///
/// `add` and `update` only stage; nothing is visible to other readers until
/// [`UnitOfWork::commit`] succeeds.
#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn find(
        &self,
        key: &InstanceKey,
        cancel: &CancellationToken,
    ) -> Result<Option<InstanceRecord>, CoreError>;

    fn add(&self, record: InstanceRecord) -> Result<(), CoreError>;

    fn update(&self, record: InstanceRecord) -> Result<(), CoreError>;
}

/// Atomic flush point for staged instance writes and queued outbound messages.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn commit(&self, cancel: &CancellationToken) -> Result<(), CoreError>;
}
