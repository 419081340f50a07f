//! Message dispatch against persisted workflow instances.
//!
//! One [`WorkflowDispatcher`] exists per (definition, message type) pair. For
//! each delivered message it:
//!
//! 1. fetches the cached blueprint,
//! 2. extracts the correlation id,
//! 3. loads the instance keyed by (correlation id, definition),
//! 4. runs the matching transition rule, or the startup rule when no instance
//!    exists yet,
//! 5. stages the instance write and commits the unit of work.
//!
//! Any failure before the commit leaves nothing staged for commit. Side effects
//! already performed by earlier actions are not compensated.
//!
//! Two deliveries for the same correlation id are not serialized here. Both
//! may read the same row; with a version-checking repository the second commit
//! fails with [`CoreError::Conflict`] and the message can be redelivered.

use crate::blueprint::Blueprint;
use crate::cancel::CancellationToken;
use crate::error::CoreError;
use crate::message::{Message, WorkflowDefinition};
use crate::persistence::{InstanceKey, InstanceRecord, InstanceRepository, UnitOfWork};
use crate::registry::BlueprintRegistry;
use crate::services::Services;
use crate::state::WorkflowState;
use async_trait::async_trait;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Dispatcher behavior switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOptions {
    /// When an existing instance receives a message with no transition rule
    /// for its state, stage an update carrying the unchanged state (true) or
    /// skip the write and the commit (false).
    pub persist_unchanged_state: bool,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            persist_unchanged_state: true,
        }
    }
}

/// What a dispatch did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome<S> {
    /// A startup rule created a new instance.
    Started { correlation_id: String, state: S },
    /// A transition rule ran. `from == to` for actions-only rules.
    Transferred {
        correlation_id: String,
        from: S,
        to: S,
    },
    /// The instance exists but no transition rule matches its state.
    Ignored {
        correlation_id: String,
        state: S,
        persisted: bool,
    },
    /// No instance exists and no startup rule matches.
    Dropped { correlation_id: String },
}

impl<S: WorkflowState> fmt::Display for DispatchOutcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchOutcome::Started {
                correlation_id,
                state,
            } => write!(f, "{}: started in {}", correlation_id, state.name()),
            DispatchOutcome::Transferred {
                correlation_id,
                from,
                to,
            } => write!(f, "{}: {} -> {}", correlation_id, from.name(), to.name()),
            DispatchOutcome::Ignored {
                correlation_id,
                state,
                ..
            } => write!(f, "{}: ignored in {}", correlation_id, state.name()),
            DispatchOutcome::Dropped { correlation_id } => {
                write!(f, "{}: dropped", correlation_id)
            }
        }
    }
}

/// Handles one message type. Implemented by [`WorkflowDispatcher`]; hosts
/// register one handler per (definition, message type).
#[async_trait]
pub trait MessageHandler<M: Message>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        message: M,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<String, CoreError>;
}

/// Advances instances of definition `D` in response to messages of type `M`.
pub struct WorkflowDispatcher<D, M> {
    registry: Arc<BlueprintRegistry>,
    options: DispatchOptions,
    _marker: PhantomData<fn(D, M)>,
}

impl<D: WorkflowDefinition, M: Message> WorkflowDispatcher<D, M> {
    pub fn new(registry: Arc<BlueprintRegistry>) -> Self {
        Self {
            registry,
            options: DispatchOptions::default(),
            _marker: PhantomData,
        }
    }

    pub fn with_options(mut self, options: DispatchOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> DispatchOptions {
        self.options
    }

    /// The compiled blueprint, built on first call.
    pub fn blueprint(&self) -> Result<Arc<Blueprint<D::State>>, CoreError> {
        self.registry.blueprint::<D, M>()
    }

    /// Dispatches one message.
    ///
    /// The repository and unit of work are resolved from `services`, which
    /// is also what the rule's actions see.
    pub async fn dispatch(
        &self,
        message: M,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome<D::State>, CoreError> {
        let blueprint = self.blueprint()?;
        let correlation_id = blueprint.correlate(&message)?;
        let key = InstanceKey::new(correlation_id.clone(), D::name());

        let repository = services.require::<dyn InstanceRepository>()?;
        let unit_of_work = services.require::<dyn UnitOfWork>()?;

        cancel.check()?;
        let existing = repository.find(&key, cancel).await?;
        let message = Arc::new(message);

        let outcome = match existing {
            Some(record) => {
                let current = Self::decode_state(record.state)?;
                let matched = blueprint.handles_transfer::<M>(current);
                let next = blueprint
                    .transfer(current, message, services, cancel)
                    .await?;

                if !matched {
                    tracing::debug!(
                        "{}: no rule for {} in state {}",
                        key,
                        std::any::type_name::<M>(),
                        current.name()
                    );
                    if !self.options.persist_unchanged_state {
                        return Ok(DispatchOutcome::Ignored {
                            correlation_id,
                            state: current,
                            persisted: false,
                        });
                    }
                }

                cancel.check()?;
                repository.update(record.with_state(next.ordinal()))?;

                if matched {
                    DispatchOutcome::Transferred {
                        correlation_id,
                        from: current,
                        to: next,
                    }
                } else {
                    DispatchOutcome::Ignored {
                        correlation_id,
                        state: current,
                        persisted: true,
                    }
                }
            }
            None => match blueprint.start(message, services, cancel).await? {
                Some(initial) => {
                    cancel.check()?;
                    repository.add(InstanceRecord::new(key, initial.ordinal()))?;
                    DispatchOutcome::Started {
                        correlation_id,
                        state: initial,
                    }
                }
                None => {
                    tracing::debug!(
                        "{}: {} starts nothing, dropped",
                        key,
                        std::any::type_name::<M>()
                    );
                    return Ok(DispatchOutcome::Dropped { correlation_id });
                }
            },
        };

        unit_of_work.commit(cancel).await?;
        tracing::debug!("{}: {}", D::name(), outcome);

        Ok(outcome)
    }

    fn decode_state(ordinal: i32) -> Result<D::State, CoreError> {
        D::State::from_ordinal(ordinal).ok_or(CoreError::UnknownStateOrdinal {
            definition: D::name(),
            ordinal,
        })
    }
}

#[async_trait]
impl<D: WorkflowDefinition, M: Message> MessageHandler<M> for WorkflowDispatcher<D, M> {
    fn name(&self) -> &'static str {
        D::name()
    }

    async fn handle(
        &self,
        message: M,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<String, CoreError> {
        let outcome = self.dispatch(message, services, cancel).await?;
        Ok(outcome.to_string())
    }
}
