//! Late-bound service resolution.
//!
//! Rules are compiled before the host has built any of its dependencies, so
//! actions never capture collaborators. The dispatcher hands them a
//! [`Services`] handle at invocation time instead, scoped to one delivery.

use crate::error::CoreError;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Type-keyed resolution handle.
///
/// Services are registered under the type they are resolved by, which is
/// usually a trait object:
///
/// ```
/// use corrflow_core::Services;
/// use std::sync::Arc;
///
/// trait Clock: Send + Sync {
///     fn now(&self) -> u64;
/// }
///
/// struct Fixed;
/// impl Clock for Fixed {
///     fn now(&self) -> u64 { 42 }
/// }
///
/// let services = Services::new().with::<dyn Clock>(Arc::new(Fixed));
/// assert_eq!(services.require::<dyn Clock>().unwrap().now(), 42);
/// ```
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Entry>>,
}

#[derive(Clone)]
struct Entry {
    name: &'static str,
    // Always an `Arc<T>` for the `T` the entry is keyed by.
    value: Arc<dyn Any + Send + Sync>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` as the resolution of `T`, replacing any previous one.
    pub fn with<T>(mut self, service: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.insert(service);
        self
    }

    /// Registers `service` as the resolution of `T`, replacing any previous one.
    pub fn insert<T>(&mut self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let entry = Entry {
            name: std::any::type_name::<T>(),
            value: Arc::new(service),
        };
        Arc::make_mut(&mut self.entries).insert(TypeId::of::<T>(), entry);
    }

    /// Resolves `T`, if registered.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value.downcast_ref::<Arc<T>>())
            .cloned()
    }

    /// Resolves `T`, failing with [`CoreError::ServiceNotRegistered`].
    pub fn require<T>(&self) -> Result<Arc<T>, CoreError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.get::<T>().ok_or(CoreError::ServiceNotRegistered {
            service: std::any::type_name::<T>(),
        })
    }

    pub fn contains<T>(&self) -> bool
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.entries.values().map(|e| e.name).collect();
        names.sort_unstable();
        f.debug_struct("Services").field("registered", &names).finish()
    }
}
