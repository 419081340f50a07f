//! # corrflow-core
//!
//! Correlated workflow engine.
//!
//! This crate provides:
//! - The fluent rule compiler and the immutable blueprints it produces
//! - Per-(definition, message type) blueprint caching
//! - The dispatcher that advances persisted, correlation-keyed instances
//! - Contracts for the persistence and transport collaborators it drives

pub mod blueprint;
pub mod builder;
pub mod cancel;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod persistence;
pub mod registry;
pub mod services;
pub mod state;
pub mod transport;

pub use blueprint::{ActionContext, Blueprint, StartOperation, TransferOperation};
pub use builder::{StartRule, StateRules, TransferRule, WorkflowBuilder};
pub use cancel::CancellationToken;
pub use dispatcher::{DispatchOptions, DispatchOutcome, MessageHandler, WorkflowDispatcher};
pub use error::{BuildError, CoreError};
pub use message::{DefinitionId, Message, MessageType, WorkflowDefinition};
pub use persistence::{InstanceKey, InstanceRecord, InstanceRepository, UnitOfWork};
pub use registry::{BlueprintKey, BlueprintRegistry};
pub use services::Services;
pub use state::WorkflowState;
pub use transport::{CommandSender, Envelope, MessageKind, NotificationPublisher};
