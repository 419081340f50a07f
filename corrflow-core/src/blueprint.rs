//! Compiled workflow rule tables.

use crate::builder::WorkflowBuilder;
use crate::cancel::CancellationToken;
use crate::error::{BuildError, CoreError};
use crate::message::{DefinitionId, Message, MessageType, WorkflowDefinition};
use crate::services::Services;
use crate::state::WorkflowState;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

pub(crate) type ErasedMessage = Arc<dyn Any + Send + Sync>;

/// Type-erased rule action.
pub(crate) type Action = Arc<
    dyn Fn(ErasedMessage, Services, CancellationToken) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

type Selector = Arc<dyn Fn(&(dyn Any + Send + Sync)) -> Option<String> + Send + Sync>;

/// What an action sees when it runs.
pub struct ActionContext<M> {
    message: Arc<M>,
    services: Services,
    cancel: CancellationToken,
}

impl<M: Message> ActionContext<M> {
    /// The triggering message.
    pub fn message(&self) -> &M {
        &self.message
    }

    /// The triggering message, shared.
    pub fn message_arc(&self) -> Arc<M> {
        self.message.clone()
    }

    /// Services scoped to the current delivery.
    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Resolves a service, failing with [`CoreError::ServiceNotRegistered`].
    pub fn resolve<T>(&self) -> Result<Arc<T>, CoreError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services.require::<T>()
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }
}

pub(crate) fn erase_action<M, F, Fut>(action: F) -> Action
where
    M: Message,
    F: Fn(ActionContext<M>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(
        move |message: ErasedMessage, services: Services, cancel: CancellationToken| match message
            .downcast::<M>()
        {
            Ok(message) => action(ActionContext {
                message,
                services,
                cancel,
            })
            .boxed(),
            Err(_) => futures::future::ready(Err(anyhow::anyhow!(
                "action expects '{}'",
                std::any::type_name::<M>()
            )))
            .boxed(),
        },
    )
}

/// Correlation id extractor for one message type.
#[derive(Clone)]
pub(crate) struct CorrelationSelector {
    pub(crate) message: MessageType,
    select: Selector,
}

impl CorrelationSelector {
    pub(crate) fn new<M, F>(selector: F) -> Self
    where
        M: Message,
        F: Fn(&M) -> String + Send + Sync + 'static,
    {
        Self {
            message: MessageType::of::<M>(),
            select: Arc::new(move |message: &(dyn Any + Send + Sync)| {
                message.downcast_ref::<M>().map(&selector)
            }),
        }
    }
}

/// Startup rule: creates an instance in a fixed state.
pub struct StartOperation<S> {
    pub(crate) target: S,
    pub(crate) actions: Vec<Action>,
}

impl<S: WorkflowState> StartOperation<S> {
    pub fn target(&self) -> S {
        self.target
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

/// Transition rule: runs actions and optionally moves to another state.
pub struct TransferOperation<S> {
    pub(crate) target: Option<S>,
    pub(crate) actions: Vec<Action>,
}

impl<S: WorkflowState> TransferOperation<S> {
    /// `None` means the rule keeps the current state.
    pub fn target(&self) -> Option<S> {
        self.target
    }

    pub fn action_count(&self) -> usize {
        self.actions.len()
    }
}

/// The immutable, queryable rule table of one workflow definition.
///
/// Blueprints are read-only after [`WorkflowBuilder::build`] and can be shared
/// across concurrent dispatches without synchronization.
pub struct Blueprint<S> {
    definition: DefinitionId,

    /// Startup rules indexed by triggering message type.
    starts: HashMap<TypeId, StartOperation<S>>,

    /// Transition rules indexed by source state, then triggering message type.
    transfers: HashMap<S, HashMap<TypeId, TransferOperation<S>>>,

    /// Correlation selectors indexed by message type.
    selectors: HashMap<TypeId, CorrelationSelector>,
}

impl<S: WorkflowState> Blueprint<S> {
    pub(crate) fn from_parts(
        definition: DefinitionId,
        starts: HashMap<TypeId, StartOperation<S>>,
        transfers: HashMap<S, HashMap<TypeId, TransferOperation<S>>>,
        selectors: HashMap<TypeId, CorrelationSelector>,
    ) -> Self {
        Self {
            definition,
            starts,
            transfers,
            selectors,
        }
    }

    /// Runs a definition's `configure` against a fresh builder and builds it.
    pub fn compile<D>() -> Result<Self, BuildError>
    where
        D: WorkflowDefinition<State = S>,
    {
        let mut builder = WorkflowBuilder::for_definition::<D>();
        D::configure(&mut builder)?;
        let blueprint = builder.build()?;

        tracing::debug!(
            "Compiled blueprint for {}: {} startup rules, {} transition rules, {} selectors",
            blueprint.definition,
            blueprint.starts.len(),
            blueprint.transfers.values().map(HashMap::len).sum::<usize>(),
            blueprint.selectors.len()
        );

        Ok(blueprint)
    }

    /// Identity of the definition this blueprint was compiled from.
    pub fn definition(&self) -> DefinitionId {
        self.definition
    }

    /// Names of every message type a rule observes, sorted.
    pub fn observed_messages(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.selectors.values().map(|s| s.message.name()).collect();
        names.sort_unstable();
        names
    }

    /// Extracts the correlation id from `message`.
    pub fn correlate<M: Message>(&self, message: &M) -> Result<String, CoreError> {
        let message_type = MessageType::of::<M>();
        let selector = self.selectors.get(&message_type.id()).ok_or(
            CoreError::MissingCorrelation {
                definition: self.definition.name(),
                message: message_type.name(),
            },
        )?;

        match (selector.select)(message) {
            Some(id) if !id.trim().is_empty() => Ok(id),
            Some(_) => Err(CoreError::BlankCorrelationId {
                definition: self.definition.name(),
                message: message_type.name(),
            }),
            None => Err(CoreError::MissingCorrelation {
                definition: self.definition.name(),
                message: message_type.name(),
            }),
        }
    }

    pub fn start_operation<M: Message>(&self) -> Option<&StartOperation<S>> {
        self.starts.get(&TypeId::of::<M>())
    }

    pub fn transfer_operation<M: Message>(&self, state: S) -> Option<&TransferOperation<S>> {
        self.transfers
            .get(&state)
            .and_then(|rules| rules.get(&TypeId::of::<M>()))
    }

    /// Returns true if `M` can start a new instance.
    pub fn handles_start<M: Message>(&self) -> bool {
        self.start_operation::<M>().is_some()
    }

    /// Returns true if `M` has a transition rule in `state`.
    pub fn handles_transfer<M: Message>(&self, state: S) -> bool {
        self.transfer_operation::<M>(state).is_some()
    }

    /// Runs the startup rule for `M`, if any, and returns its initial state.
    ///
    /// `Ok(None)` means no startup rule matches and nothing ran.
    pub async fn start<M: Message>(
        &self,
        message: Arc<M>,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<Option<S>, CoreError> {
        let Some(operation) = self.start_operation::<M>() else {
            return Ok(None);
        };

        self.run_actions(&operation.actions, message, services, cancel)
            .await?;
        Ok(Some(operation.target))
    }

    /// Runs the transition rule for `(state, M)`, if any, and returns the
    /// resulting state.
    ///
    /// Without a matching rule nothing runs and `state` comes back unchanged.
    pub async fn transfer<M: Message>(
        &self,
        state: S,
        message: Arc<M>,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<S, CoreError> {
        let Some(operation) = self.transfer_operation::<M>(state) else {
            return Ok(state);
        };

        self.run_actions(&operation.actions, message, services, cancel)
            .await?;
        Ok(operation.target.unwrap_or(state))
    }

    /// Runs actions strictly in registration order. The first failure stops
    /// the rest.
    async fn run_actions<M: Message>(
        &self,
        actions: &[Action],
        message: Arc<M>,
        services: &Services,
        cancel: &CancellationToken,
    ) -> Result<(), CoreError> {
        let message_name = std::any::type_name::<M>();
        let message: ErasedMessage = message;

        for (index, action) in actions.iter().enumerate() {
            cancel.check()?;
            action(message.clone(), services.clone(), cancel.clone())
                .await
                .map_err(|source| match source.downcast::<CoreError>() {
                    Ok(CoreError::Cancelled) => CoreError::Cancelled,
                    Ok(other) => CoreError::ActionFailed {
                        definition: self.definition.name(),
                        message: message_name,
                        index,
                        source: other.into(),
                    },
                    Err(source) => CoreError::ActionFailed {
                        definition: self.definition.name(),
                        message: message_name,
                        index,
                        source,
                    },
                })?;
        }

        Ok(())
    }
}

impl<S: WorkflowState> fmt::Debug for Blueprint<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("definition", &self.definition.name())
            .field("starts", &self.starts.len())
            .field(
                "transfers",
                &self.transfers.values().map(HashMap::len).sum::<usize>(),
            )
            .field("observed", &self.observed_messages())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    crate::workflow_state! {
        enum Phase {
            Open = 0,
            Closed = 1,
        }
    }

    struct Opened {
        id: String,
    }

    struct Poked {
        id: String,
    }

    struct Closing {
        id: String,
    }

    struct Doors;

    impl WorkflowDefinition for Doors {
        type State = Phase;

        fn configure(builder: &mut WorkflowBuilder<Phase>) -> Result<(), BuildError> {
            builder.start_when::<Opened>(Phase::Open)?;
            builder.on(Phase::Open).when::<Poked>()?;
            builder
                .on(Phase::Open)
                .when::<Closing>()?
                .transition_to(Phase::Closed)?;
            builder.correlate(|m: &Opened| m.id.clone())?;
            builder.correlate(|m: &Poked| m.id.clone())?;
            builder.correlate(|m: &Closing| m.id.clone())?;
            Ok(())
        }

        fn name() -> &'static str {
            "doors"
        }
    }

    #[test]
    fn test_compile_indexes_rules() {
        let blueprint = Blueprint::compile::<Doors>().unwrap();

        assert_eq!(blueprint.definition().name(), "doors");
        assert!(blueprint.handles_start::<Opened>());
        assert!(!blueprint.handles_start::<Poked>());
        assert!(blueprint.handles_transfer::<Poked>(Phase::Open));
        assert!(!blueprint.handles_transfer::<Poked>(Phase::Closed));
        assert_eq!(
            blueprint.start_operation::<Opened>().unwrap().target(),
            Phase::Open
        );
        assert_eq!(
            blueprint
                .transfer_operation::<Closing>(Phase::Open)
                .unwrap()
                .target(),
            Some(Phase::Closed)
        );
        assert_eq!(blueprint.observed_messages().len(), 3);
    }

    #[test]
    fn test_correlate() {
        let blueprint = Blueprint::compile::<Doors>().unwrap();

        let id = blueprint
            .correlate(&Poked {
                id: "c1".to_string(),
            })
            .unwrap();
        assert_eq!(id, "c1");

        let blank = blueprint.correlate(&Poked {
            id: "   ".to_string(),
        });
        assert!(matches!(blank, Err(CoreError::BlankCorrelationId { .. })));

        let unknown = blueprint.correlate(&42u8);
        assert!(matches!(unknown, Err(CoreError::MissingCorrelation { .. })));
    }

    #[tokio::test]
    async fn test_transfer_without_rule_keeps_state() {
        let blueprint = Blueprint::compile::<Doors>().unwrap();
        let services = Services::new();
        let cancel = CancellationToken::new();

        let state = blueprint
            .transfer(
                Phase::Closed,
                Arc::new(Poked {
                    id: "c1".to_string(),
                }),
                &services,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(state, Phase::Closed);

        let state = blueprint
            .transfer(
                Phase::Open,
                Arc::new(Poked {
                    id: "c1".to_string(),
                }),
                &services,
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(state, Phase::Open);
    }

    #[tokio::test]
    async fn test_start_without_rule_is_none() {
        let blueprint = Blueprint::compile::<Doors>().unwrap();
        let result = blueprint
            .start(
                Arc::new(Closing {
                    id: "c1".to_string(),
                }),
                &Services::new(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_action() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut builder = WorkflowBuilder::<Phase>::new(DefinitionId::of::<Doors>());
        {
            let log = log.clone();
            builder
                .start_when::<Opened>(Phase::Open)
                .unwrap()
                .execute(move |_ctx: ActionContext<Opened>| {
                    let log = log.clone();
                    async move {
                        log.lock().push("ran");
                        Ok::<(), anyhow::Error>(())
                    }
                });
        }
        builder.correlate(|m: &Opened| m.id.clone()).unwrap();
        let blueprint = builder.build().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = blueprint
            .start(
                Arc::new(Opened {
                    id: "c1".to_string(),
                }),
                &Services::new(),
                &cancel,
            )
            .await;

        assert!(matches!(result, Err(CoreError::Cancelled)));
        assert!(log.lock().is_empty());
    }
}
