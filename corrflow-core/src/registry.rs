//! Blueprint memoization.

use crate::blueprint::Blueprint;
use crate::error::{BuildError, CoreError};
use crate::message::{DefinitionId, Message, MessageType, WorkflowDefinition};
use crate::state::WorkflowState;
use dashmap::DashMap;
use std::any::Any;
use std::sync::Arc;

/// Cache key: the definition plus the message type that triggered the lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlueprintKey {
    pub definition: DefinitionId,
    pub trigger: MessageType,
}

impl BlueprintKey {
    pub fn of<D: WorkflowDefinition, M: Message>() -> Self {
        Self {
            definition: DefinitionId::of::<D>(),
            trigger: MessageType::of::<M>(),
        }
    }
}

/// Process-scoped cache of compiled blueprints.
///
/// The factory runs outside the map's locks. Concurrent first lookups for the
/// same key may each build a blueprint; the first one inserted wins and every
/// caller gets that instance. Factories must be free of side effects.
#[derive(Default)]
pub struct BlueprintRegistry {
    blueprints: DashMap<BlueprintKey, Arc<dyn Any + Send + Sync>>,
}

impl BlueprintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached blueprint for `key`, building it with `factory` on
    /// first use.
    pub fn get_or_build<S, F>(
        &self,
        key: BlueprintKey,
        factory: F,
    ) -> Result<Arc<Blueprint<S>>, CoreError>
    where
        S: WorkflowState,
        F: FnOnce() -> Result<Blueprint<S>, BuildError>,
    {
        if let Some(cached) = self.blueprints.get(&key) {
            return Self::downcast(key, cached.value().clone());
        }

        let built: Arc<dyn Any + Send + Sync> = Arc::new(factory()?);
        let stored = self.blueprints.entry(key).or_insert(built).value().clone();

        tracing::debug!(
            "Cached blueprint for {} triggered by {}",
            key.definition,
            key.trigger
        );

        Self::downcast(key, stored)
    }

    /// Returns the blueprint of `D` for dispatching `M`, compiling `D` on first use.
    pub fn blueprint<D, M>(&self) -> Result<Arc<Blueprint<D::State>>, CoreError>
    where
        D: WorkflowDefinition,
        M: Message,
    {
        self.get_or_build(BlueprintKey::of::<D, M>(), Blueprint::<D::State>::compile::<D>)
    }

    pub fn contains<D: WorkflowDefinition, M: Message>(&self) -> bool {
        self.blueprints.contains_key(&BlueprintKey::of::<D, M>())
    }

    pub fn len(&self) -> usize {
        self.blueprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blueprints.is_empty()
    }

    fn downcast<S: WorkflowState>(
        key: BlueprintKey,
        blueprint: Arc<dyn Any + Send + Sync>,
    ) -> Result<Arc<Blueprint<S>>, CoreError> {
        blueprint
            .downcast::<Blueprint<S>>()
            .map_err(|_| CoreError::BlueprintTypeMismatch {
                definition: key.definition.name(),
            })
    }
}
