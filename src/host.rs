//! In-process delivery pipeline.

use corrflow_core::{
    BlueprintRegistry, BuildError, CancellationToken, CoreError, DefinitionId, DispatchOptions,
    Message, MessageHandler, Services, WorkflowDefinition, WorkflowDispatcher,
};
use corrflow_storage::MemoryStore;
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

type Handlers<M> = Vec<Arc<dyn MessageHandler<M>>>;

/// Result of delivering one message to its subscribers.
#[derive(Debug, Default)]
pub struct Delivery {
    /// Handler name and outcome summary for every successful dispatch.
    pub handled: Vec<(&'static str, String)>,
    /// Handler name and error for every failed dispatch.
    pub failed: Vec<(&'static str, CoreError)>,
}

impl Delivery {
    pub fn is_empty(&self) -> bool {
        self.handled.is_empty() && self.failed.is_empty()
    }
}

/// Routes each message to every handler subscribed to its type.
///
/// Every handler runs in its own storage session, so one handler's failure
/// rolls back only its own writes and outbound messages.
pub struct Host {
    store: Arc<MemoryStore>,
    registry: Arc<BlueprintRegistry>,
    options: DispatchOptions,
    services: Services,
    // instance partition name -> definition that owns it
    definitions: HashMap<&'static str, DefinitionId>,
    // TypeId of M -> Handlers<M>
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Host {
    pub fn new(store: Arc<MemoryStore>, options: DispatchOptions) -> Self {
        Self {
            store,
            registry: Arc::new(BlueprintRegistry::new()),
            options,
            services: Services::new(),
            definitions: HashMap::new(),
            handlers: HashMap::new(),
        }
    }

    /// Application services visible to every action, next to the per-delivery
    /// storage session.
    pub fn with_services(mut self, services: Services) -> Self {
        self.services = services;
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<BlueprintRegistry> {
        &self.registry
    }

    /// Subscribes a dispatcher advancing `D` on messages of type `M`.
    ///
    /// The blueprint is compiled here so definition errors surface at startup.
    /// Definition names partition instance rows; a name already owned by
    /// another definition is rejected.
    pub fn subscribe<D, M>(&mut self) -> Result<&mut Self, CoreError>
    where
        D: WorkflowDefinition,
        M: Message + Clone,
    {
        let definition = DefinitionId::of::<D>();
        if let Some(owner) = self.definitions.get(definition.name()) {
            if *owner != definition {
                return Err(BuildError::DuplicateDefinitionName {
                    definition: definition.name(),
                }
                .into());
            }
        }

        let dispatcher =
            WorkflowDispatcher::<D, M>::new(self.registry.clone()).with_options(self.options);
        let blueprint = dispatcher.blueprint()?;

        tracing::info!(
            "Subscribed {} to {} ({} observed messages)",
            D::name(),
            type_name::<M>(),
            blueprint.observed_messages().len()
        );

        self.definitions.insert(definition.name(), definition);
        self.add_handler::<M>(Arc::new(dispatcher));
        Ok(self)
    }

    /// Subscribes an arbitrary handler for `M`.
    pub fn add_handler<M: Message>(&mut self, handler: Arc<dyn MessageHandler<M>>) {
        let entry = self
            .handlers
            .entry(TypeId::of::<M>())
            .or_insert_with(|| Box::new(Handlers::<M>::new()) as Box<dyn Any + Send + Sync>);
        if let Some(handlers) = entry.downcast_mut::<Handlers<M>>() {
            handlers.push(handler);
        }
    }

    pub fn subscriber_count<M: Message>(&self) -> usize {
        self.handlers::<M>().len()
    }

    fn handlers<M: Message>(&self) -> &[Arc<dyn MessageHandler<M>>] {
        self.handlers
            .get(&TypeId::of::<M>())
            .and_then(|entry| entry.downcast_ref::<Handlers<M>>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Delivers `message` to every subscribed handler, each in a fresh session.
    ///
    /// Failures are logged and collected; they never stop the remaining
    /// handlers.
    pub async fn deliver<M: Message + Clone>(
        &self,
        message: M,
        cancel: &CancellationToken,
    ) -> Delivery {
        let mut delivery = Delivery::default();
        let handlers = self.handlers::<M>();

        if handlers.is_empty() {
            tracing::debug!("No subscribers for {}", type_name::<M>());
            return delivery;
        }

        for handler in handlers {
            let session = self.store.begin();
            let services = session.extend(self.services.clone());

            match handler.handle(message.clone(), &services, cancel).await {
                Ok(summary) => {
                    tracing::info!("[{}] {}", handler.name(), summary);
                    delivery.handled.push((handler.name(), summary));
                }
                Err(e) => {
                    tracing::warn!(
                        "[{}] failed on {}: {} (code={}, retryable={})",
                        handler.name(),
                        type_name::<M>(),
                        e,
                        e.error_code(),
                        e.is_retryable()
                    );
                    delivery.failed.push((handler.name(), e));
                }
            }
        }

        delivery
    }
}
