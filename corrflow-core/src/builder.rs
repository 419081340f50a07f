//! Fluent rule compiler.
//!
//! A [`WorkflowBuilder`] collects the rules of one definition and freezes them
//! into a [`Blueprint`]. Duplicate registrations fail at the call that makes
//! them; the correlation check runs once, in [`WorkflowBuilder::build`].
//!
//! ```
//! use corrflow_core::{ActionContext, BuildError, WorkflowBuilder, WorkflowDefinition};
//!
//! corrflow_core::workflow_state! {
//!     pub enum Shipment {
//!         Packing = 0,
//!         InTransit = 1,
//!     }
//! }
//!
//! struct Packed { order: String }
//! struct Dispatched { order: String }
//!
//! struct ShipmentFlow;
//!
//! impl WorkflowDefinition for ShipmentFlow {
//!     type State = Shipment;
//!
//!     fn configure(b: &mut WorkflowBuilder<Shipment>) -> Result<(), BuildError> {
//!         b.start_when::<Packed>(Shipment::Packing)?
//!             .execute(|_ctx: ActionContext<Packed>| async { Ok::<(), anyhow::Error>(()) });
//!         b.on(Shipment::Packing)
//!             .when::<Dispatched>()?
//!             .transition_to(Shipment::InTransit)?;
//!         b.correlate(|m: &Packed| m.order.clone())?;
//!         b.correlate(|m: &Dispatched| m.order.clone())?;
//!         Ok(())
//!     }
//! }
//!
//! let blueprint = corrflow_core::Blueprint::compile::<ShipmentFlow>().unwrap();
//! assert!(blueprint.handles_start::<Packed>());
//! ```

use crate::blueprint::{
    erase_action, Action, ActionContext, Blueprint, CorrelationSelector, StartOperation,
    TransferOperation,
};
use crate::error::BuildError;
use crate::message::{DefinitionId, Message, MessageType, WorkflowDefinition};
use crate::state::WorkflowState;
use crate::transport::{CommandSender, Envelope, NotificationPublisher};
use serde::Serialize;
use std::any::TypeId;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;

/// Mutable rule collection for one workflow definition.
pub struct WorkflowBuilder<S: WorkflowState> {
    definition: DefinitionId,
    starts: HashMap<TypeId, StartOperation<S>>,
    transfers: HashMap<S, HashMap<TypeId, TransferOperation<S>>>,
    selectors: HashMap<TypeId, CorrelationSelector>,

    /// Every message type referenced by a startup or transition rule.
    observed: HashMap<TypeId, MessageType>,
}

impl<S: WorkflowState> WorkflowBuilder<S> {
    pub fn new(definition: DefinitionId) -> Self {
        Self {
            definition,
            starts: HashMap::new(),
            transfers: HashMap::new(),
            selectors: HashMap::new(),
            observed: HashMap::new(),
        }
    }

    pub fn for_definition<D>() -> Self
    where
        D: WorkflowDefinition<State = S>,
    {
        Self::new(DefinitionId::of::<D>())
    }

    pub fn definition(&self) -> DefinitionId {
        self.definition
    }

    /// Declares that `M` starts a new instance in `initial`.
    pub fn start_when<M: Message>(
        &mut self,
        initial: S,
    ) -> Result<StartRule<'_, S, M>, BuildError> {
        let message = MessageType::of::<M>();
        let operation = match self.starts.entry(message.id()) {
            Entry::Occupied(_) => {
                return Err(BuildError::DuplicateStart {
                    definition: self.definition.name(),
                    message: message.name(),
                })
            }
            Entry::Vacant(slot) => slot.insert(StartOperation {
                target: initial,
                actions: Vec::new(),
            }),
        };
        self.observed.insert(message.id(), message);

        Ok(StartRule {
            operation,
            _message: PhantomData,
        })
    }

    /// Scopes the following `when` calls to source state `state`.
    pub fn on(&mut self, state: S) -> StateRules<'_, S> {
        StateRules {
            builder: self,
            state,
        }
    }

    /// Registers the correlation id extractor for `M`.
    pub fn correlate<M, F>(&mut self, selector: F) -> Result<&mut Self, BuildError>
    where
        M: Message,
        F: Fn(&M) -> String + Send + Sync + 'static,
    {
        let message = MessageType::of::<M>();
        match self.selectors.entry(message.id()) {
            Entry::Occupied(_) => {
                return Err(BuildError::DuplicateCorrelation {
                    definition: self.definition.name(),
                    message: message.name(),
                })
            }
            Entry::Vacant(slot) => {
                slot.insert(CorrelationSelector::new(selector));
            }
        }
        Ok(self)
    }

    /// Freezes the rules into a blueprint.
    ///
    /// Fails unless the message types observed by rules are exactly the types
    /// with a correlation selector.
    pub fn build(self) -> Result<Blueprint<S>, BuildError> {
        let mut missing: Vec<&'static str> = self
            .observed
            .values()
            .filter(|m| !self.selectors.contains_key(&m.id()))
            .map(MessageType::name)
            .collect();
        let mut extra: Vec<&'static str> = self
            .selectors
            .values()
            .filter(|s| !self.observed.contains_key(&s.message.id()))
            .map(|s| s.message.name())
            .collect();

        if !missing.is_empty() || !extra.is_empty() {
            missing.sort_unstable();
            extra.sort_unstable();
            return Err(BuildError::CorrelationMismatch {
                definition: self.definition.name(),
                missing,
                extra,
            });
        }

        Ok(Blueprint::from_parts(
            self.definition,
            self.starts,
            self.transfers,
            self.selectors,
        ))
    }
}

/// Transition rules sharing one source state.
pub struct StateRules<'b, S: WorkflowState> {
    builder: &'b mut WorkflowBuilder<S>,
    state: S,
}

impl<S: WorkflowState> StateRules<'_, S> {
    /// Declares a transition rule for `M` in this state.
    pub fn when<M: Message>(&mut self) -> Result<TransferRule<'_, S, M>, BuildError> {
        let message = MessageType::of::<M>();
        let definition = self.builder.definition.name();
        let state = self.state;

        let operation = match self
            .builder
            .transfers
            .entry(state)
            .or_default()
            .entry(message.id())
        {
            Entry::Occupied(_) => {
                return Err(BuildError::DuplicateTransfer {
                    definition,
                    state: state.name(),
                    message: message.name(),
                })
            }
            Entry::Vacant(slot) => slot.insert(TransferOperation {
                target: None,
                actions: Vec::new(),
            }),
        };
        self.builder.observed.insert(message.id(), message);

        Ok(TransferRule {
            operation,
            definition,
            state,
            _message: PhantomData,
        })
    }
}

/// Clause for attaching actions to a startup rule.
///
/// The initial state is fixed by [`WorkflowBuilder::start_when`]; a startup
/// rule has no `transition_to`.
pub struct StartRule<'b, S, M> {
    operation: &'b mut StartOperation<S>,
    _message: PhantomData<fn(M)>,
}

impl<S: WorkflowState, M: Message> StartRule<'_, S, M> {
    /// Appends an action. Actions run in the order they were added.
    pub fn execute<F, Fut>(self, action: F) -> Self
    where
        F: Fn(ActionContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.operation.actions.push(erase_action(action));
        self
    }

    /// Appends an action that sends the command built from the message.
    pub fn send_command<C, F>(self, make: F) -> Self
    where
        C: Serialize + 'static,
        F: Fn(&M) -> C + Send + Sync + 'static,
    {
        self.operation.actions.push(send_command_action(make));
        self
    }

    /// Appends an action that publishes the notification built from the message.
    pub fn publish_notification<N, F>(self, make: F) -> Self
    where
        N: Serialize + 'static,
        F: Fn(&M) -> N + Send + Sync + 'static,
    {
        self.operation.actions.push(publish_action(make));
        self
    }
}

/// Clause for attaching actions and a target state to a transition rule.
pub struct TransferRule<'b, S, M> {
    operation: &'b mut TransferOperation<S>,
    definition: &'static str,
    state: S,
    _message: PhantomData<fn(M)>,
}

impl<S: WorkflowState, M: Message> TransferRule<'_, S, M> {
    /// Appends an action. Actions run in the order they were added.
    pub fn execute<F, Fut>(self, action: F) -> Self
    where
        F: Fn(ActionContext<M>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.operation.actions.push(erase_action(action));
        self
    }

    /// Sets the state the instance moves to once the actions complete.
    /// Without it the rule keeps the current state.
    pub fn transition_to(self, target: S) -> Result<Self, BuildError> {
        if self.operation.target.is_some() {
            return Err(BuildError::TargetAlreadySet {
                definition: self.definition,
                state: self.state.name(),
                message: std::any::type_name::<M>(),
            });
        }
        self.operation.target = Some(target);
        Ok(self)
    }

    /// Appends an action that sends the command built from the message.
    pub fn send_command<C, F>(self, make: F) -> Self
    where
        C: Serialize + 'static,
        F: Fn(&M) -> C + Send + Sync + 'static,
    {
        self.operation.actions.push(send_command_action(make));
        self
    }

    /// Appends an action that publishes the notification built from the message.
    pub fn publish_notification<N, F>(self, make: F) -> Self
    where
        N: Serialize + 'static,
        F: Fn(&M) -> N + Send + Sync + 'static,
    {
        self.operation.actions.push(publish_action(make));
        self
    }
}

fn send_command_action<M, C, F>(make: F) -> Action
where
    M: Message,
    C: Serialize,
    F: Fn(&M) -> C + Send + Sync + 'static,
{
    erase_action(move |ctx: ActionContext<M>| {
        let envelope = Envelope::command(&make(ctx.message()));
        async move {
            let sender = ctx.resolve::<dyn CommandSender>()?;
            sender.send(envelope?, ctx.cancel()).await?;
            Ok::<(), anyhow::Error>(())
        }
    })
}

fn publish_action<M, N, F>(make: F) -> Action
where
    M: Message,
    N: Serialize,
    F: Fn(&M) -> N + Send + Sync + 'static,
{
    erase_action(move |ctx: ActionContext<M>| {
        let envelope = Envelope::notification(&make(ctx.message()));
        async move {
            let publisher = ctx.resolve::<dyn NotificationPublisher>()?;
            publisher.publish(envelope?, ctx.cancel()).await?;
            Ok::<(), anyhow::Error>(())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    crate::workflow_state! {
        enum Step {
            First = 0,
            Second = 1,
        }
    }

    struct Flow;

    impl WorkflowDefinition for Flow {
        type State = Step;

        fn configure(_builder: &mut WorkflowBuilder<Step>) -> Result<(), BuildError> {
            Ok(())
        }

        fn name() -> &'static str {
            "flow"
        }
    }

    struct Alpha;
    struct Beta;
    struct Gamma;
    struct Delta;

    fn builder() -> WorkflowBuilder<Step> {
        WorkflowBuilder::for_definition::<Flow>()
    }

    #[test]
    fn test_duplicate_start_rejected() {
        let mut b = builder();
        b.start_when::<Alpha>(Step::First).unwrap();

        let err = b.start_when::<Alpha>(Step::Second).err().unwrap();
        assert!(matches!(err, BuildError::DuplicateStart { .. }));
    }

    #[test]
    fn test_duplicate_transfer_rejected() {
        let mut b = builder();
        b.on(Step::First).when::<Beta>().unwrap();

        let err = b.on(Step::First).when::<Beta>().err().unwrap();
        assert!(matches!(err, BuildError::DuplicateTransfer { state: "First", .. }));

        // Same message in a different state is a different rule.
        assert!(b.on(Step::Second).when::<Beta>().is_ok());
    }

    #[test]
    fn test_multiple_rules_in_one_state() {
        let mut b = builder();
        let mut first = b.on(Step::First);
        first.when::<Alpha>().unwrap();
        first.when::<Beta>().unwrap();
        assert!(first.when::<Alpha>().is_err());
    }

    #[test]
    fn test_second_transition_to_rejected() {
        let mut b = builder();
        let err = b
            .on(Step::First)
            .when::<Beta>()
            .unwrap()
            .transition_to(Step::Second)
            .unwrap()
            .transition_to(Step::First)
            .err()
            .unwrap();
        assert!(matches!(err, BuildError::TargetAlreadySet { .. }));
    }

    #[test]
    fn test_duplicate_correlation_rejected() {
        let mut b = builder();
        b.correlate(|_: &Alpha| "a".to_string()).unwrap();
        let err = b.correlate(|_: &Alpha| "b".to_string()).err().unwrap();
        assert!(matches!(err, BuildError::DuplicateCorrelation { .. }));
    }

    #[test]
    fn test_build_reports_missing_and_extra() {
        let mut b = builder();
        b.start_when::<Alpha>(Step::First).unwrap();
        b.on(Step::First).when::<Beta>().unwrap();
        b.correlate(|_: &Alpha| "a".to_string()).unwrap();
        b.correlate(|_: &Gamma| "g".to_string()).unwrap();

        match b.build() {
            Err(BuildError::CorrelationMismatch { missing, extra, .. }) => {
                assert_eq!(missing, vec![std::any::type_name::<Beta>()]);
                assert_eq!(extra, vec![std::any::type_name::<Gamma>()]);
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_build_succeeds_when_sets_match() {
        let mut b = builder();
        b.start_when::<Alpha>(Step::First).unwrap();
        b.on(Step::First)
            .when::<Beta>()
            .unwrap()
            .transition_to(Step::Second)
            .unwrap();
        b.correlate(|_: &Alpha| "a".to_string()).unwrap();
        b.correlate(|_: &Beta| "b".to_string()).unwrap();

        let blueprint = b.build().unwrap();
        assert_eq!(blueprint.definition().name(), "flow");
        assert_eq!(blueprint.observed_messages().len(), 2);
    }

    #[test]
    fn test_actions_accumulate() {
        let mut b = builder();
        b.start_when::<Alpha>(Step::First)
            .unwrap()
            .execute(|_ctx: ActionContext<Alpha>| async { Ok::<(), anyhow::Error>(()) })
            .execute(|_ctx: ActionContext<Alpha>| async { Ok::<(), anyhow::Error>(()) });
        b.correlate(|_: &Alpha| "a".to_string()).unwrap();

        let blueprint = b.build().unwrap();
        assert_eq!(
            blueprint.start_operation::<Alpha>().unwrap().action_count(),
            2
        );
    }

    /// How a message type participates in a generated definition.
    #[derive(Debug, Clone, Copy)]
    struct Usage {
        started: bool,
        transferred: bool,
        correlated: bool,
    }

    fn usage() -> impl Strategy<Value = Usage> {
        (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
            |(started, transferred, correlated)| Usage {
                started,
                transferred,
                correlated,
            },
        )
    }

    fn apply<M: Message>(b: &mut WorkflowBuilder<Step>, usage: Usage) {
        if usage.started {
            b.start_when::<M>(Step::First).unwrap();
        }
        if usage.transferred {
            b.on(Step::Second).when::<M>().unwrap();
        }
        if usage.correlated {
            b.correlate(|_: &M| "id".to_string()).unwrap();
        }
    }

    proptest! {
        #[test]
        fn prop_build_names_every_difference(
            usages in proptest::array::uniform4(usage())
        ) {
            let mut b = builder();
            apply::<Alpha>(&mut b, usages[0]);
            apply::<Beta>(&mut b, usages[1]);
            apply::<Gamma>(&mut b, usages[2]);
            apply::<Delta>(&mut b, usages[3]);

            let names = [
                std::any::type_name::<Alpha>(),
                std::any::type_name::<Beta>(),
                std::any::type_name::<Gamma>(),
                std::any::type_name::<Delta>(),
            ];
            let mut expected_missing = Vec::new();
            let mut expected_extra = Vec::new();
            for (usage, name) in usages.iter().zip(names) {
                let observed = usage.started || usage.transferred;
                if observed && !usage.correlated {
                    expected_missing.push(name);
                }
                if !observed && usage.correlated {
                    expected_extra.push(name);
                }
            }
            expected_missing.sort_unstable();
            expected_extra.sort_unstable();

            match b.build() {
                Ok(_) => {
                    prop_assert!(expected_missing.is_empty() && expected_extra.is_empty());
                }
                Err(BuildError::CorrelationMismatch { missing, extra, .. }) => {
                    prop_assert_eq!(missing, expected_missing);
                    prop_assert_eq!(extra, expected_extra);
                }
                Err(other) => prop_assert!(false, "unexpected error: {}", other),
            }
        }
    }
}
