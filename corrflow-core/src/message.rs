//! Message and definition identity.

use crate::builder::WorkflowBuilder;
use crate::error::BuildError;
use crate::state::WorkflowState;
use std::any::{Any, TypeId};
use std::fmt;

/// Anything that can be delivered to a dispatcher.
pub trait Message: Any + Send + Sync {}

impl<T: Any + Send + Sync> Message for T {}

/// Runtime identity of a message type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    id: TypeId,
    name: &'static str,
}

impl MessageType {
    pub fn of<M: Message>() -> Self {
        Self {
            id: TypeId::of::<M>(),
            name: std::any::type_name::<M>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// A workflow author's rule set.
///
/// Definitions are stateless: `configure` runs exactly once per blueprint
/// build and the definition is never consulted again.
pub trait WorkflowDefinition: Send + Sync + 'static {
    /// The closed state set this workflow moves through.
    type State: WorkflowState;

    /// Declares startup rules, transition rules and correlation selectors.
    fn configure(builder: &mut WorkflowBuilder<Self::State>) -> Result<(), BuildError>;

    /// Persistence partition key for this definition's instances.
    ///
    /// Defaults to the Rust type name. Pin it to a literal when rows must
    /// survive renames or module moves.
    fn name() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Runtime identity of a workflow definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId {
    id: TypeId,
    name: &'static str,
}

impl DefinitionId {
    pub fn of<D: WorkflowDefinition>() -> Self {
        Self {
            id: TypeId::of::<D>(),
            name: D::name(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Ping;
    struct Pong;

    #[test]
    fn test_message_identity() {
        assert_eq!(MessageType::of::<Ping>(), MessageType::of::<Ping>());
        assert_ne!(MessageType::of::<Ping>(), MessageType::of::<Pong>());
        assert!(MessageType::of::<Ping>().name().ends_with("Ping"));
    }
}
