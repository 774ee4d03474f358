//! Component types, live instances, and the registry of factories able to construct them.
//!
//! A [`Component`] is any type whose instances can be created through the runtime and addressed
//! by a [`GlobalId`](crate::id::GlobalId). Each locality keeps:
//!
//! - a [`ComponentRegistry`] mapping a [`ComponentTypeId`] to the factory constructing it, and
//! - an [`InstanceStore`] owning the live instances hosted on the locality.
//!
//! Registration is expected to happen once at startup. Afterwards the registry is read-mostly,
//! and concurrent construction requests never block each other.

use std::{
    any::Any,
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use dashmap::{mapref::entry::Entry, DashMap};
use tracing::trace;

use crate::{
    error::{RegistrationError, RuntimeError},
    id::{ComponentTypeId, LocalHandle},
};

/// A type whose instances can be created and invoked through the runtime.
///
/// The id must be identical on every locality able to construct the type.
///
/// # Example
///
/// ```
/// use agora::Component;
///
/// struct Counter {
///     x: i64,
/// }
///
/// impl Component for Counter {
///     const COMPONENT_ID: &'static str = "counter";
/// }
///
/// assert_eq!(Counter::component_type().as_str(), "counter");
/// ```
pub trait Component: Send + Sync + 'static {
    /// Stable cluster-wide identifier of the type.
    const COMPONENT_ID: &'static str;

    /// The interned [`ComponentTypeId`] for this type.
    fn component_type() -> ComponentTypeId {
        ComponentTypeId::new(Self::COMPONENT_ID)
    }
}

/// A type-erased live instance.
///
/// Cloning an instance clones the reference; the object itself is shared.
#[derive(Clone)]
pub struct ComponentInstance {
    component: ComponentTypeId,
    object: Arc<dyn Any + Send + Sync>,
}

impl ComponentInstance {
    /// Wraps a typed object.
    pub fn new<T: Component>(object: T) -> Self {
        ComponentInstance {
            component: T::component_type(),
            object: Arc::new(object),
        }
    }

    /// Wraps an already type-erased object tagged with its component type.
    pub fn from_any(component: ComponentTypeId, object: Arc<dyn Any + Send + Sync>) -> Self {
        ComponentInstance { component, object }
    }

    /// The component type of the instance.
    pub fn component(&self) -> ComponentTypeId {
        self.component
    }

    /// Returns the typed object.
    ///
    /// Fails with [`RuntimeError::BadComponentType`] if the instance is not a `T`.
    pub fn downcast<T: Component>(&self) -> Result<Arc<T>, RuntimeError> {
        self.object
            .clone()
            .downcast::<T>()
            .map_err(|_| RuntimeError::BadComponentType {
                expected: T::component_type(),
                found: self.component,
            })
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentInstance")
            .field("component", &self.component)
            .finish_non_exhaustive()
    }
}

/// Owns the live instances hosted on one locality.
#[derive(Debug, Default)]
pub struct InstanceStore {
    next_handle: AtomicU64,
    instances: DashMap<LocalHandle, ComponentInstance>,
    counts: DashMap<ComponentTypeId, usize>,
}

impl InstanceStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        InstanceStore::default()
    }

    /// Takes ownership of an instance, returning its fresh handle.
    pub fn insert(&self, instance: ComponentInstance) -> LocalHandle {
        let handle = LocalHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed));
        *self.counts.entry(instance.component).or_default() += 1;
        self.instances.insert(handle, instance);
        handle
    }

    /// Returns the instance behind a handle, if it is still live.
    pub fn get(&self, handle: LocalHandle) -> Option<ComponentInstance> {
        self.instances.get(&handle).map(|instance| instance.clone())
    }

    /// Drops the store's reference to an instance.
    ///
    /// Dispatches already holding the instance keep it alive until they finish.
    pub fn remove(&self, handle: LocalHandle) -> Option<ComponentInstance> {
        let (_, instance) = self.instances.remove(&handle)?;
        if let Entry::Occupied(mut count) = self.counts.entry(instance.component) {
            *count.get_mut() -= 1;
            if *count.get() == 0 {
                count.remove();
            }
        }
        Some(instance)
    }

    /// Number of live instances of a component type.
    pub fn count(&self, component: ComponentTypeId) -> usize {
        self.counts.get(&component).map(|count| *count).unwrap_or(0)
    }

    /// Total number of live instances.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Returns `true` if no instance is live.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Constructs an instance from encoded constructor arguments.
pub type Factory = dyn Fn(&[u8]) -> Result<ComponentInstance, RuntimeError> + Send + Sync;

/// Captures the state of an instance so it can be restored elsewhere.
pub type Snapshot = dyn Fn(&ComponentInstance) -> Result<Vec<u8>, RuntimeError> + Send + Sync;

/// Rebuilds an instance from a captured state.
pub type Restore = dyn Fn(&[u8]) -> Result<ComponentInstance, RuntimeError> + Send + Sync;

struct ComponentFns {
    factory: Arc<Factory>,
    migration: Option<(Arc<Snapshot>, Arc<Restore>)>,
}

/// Maps component type ids to the factories constructing them.
#[derive(Default)]
pub struct ComponentRegistry {
    components: DashMap<ComponentTypeId, ComponentFns>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ComponentRegistry::default()
    }

    /// Installs the factory for a component type.
    pub fn register_type<F>(
        &self,
        component: ComponentTypeId,
        factory: F,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(&[u8]) -> Result<ComponentInstance, RuntimeError> + Send + Sync + 'static,
    {
        match self.components.entry(component) {
            Entry::Occupied(_) => Err(RegistrationError::DuplicateComponent(component)),
            Entry::Vacant(entry) => {
                entry.insert(ComponentFns {
                    factory: Arc::new(factory),
                    migration: None,
                });
                trace!(%component, "registered component type");
                Ok(())
            }
        }
    }

    /// Makes a registered component type migratable.
    pub fn register_migration<S, R>(
        &self,
        component: ComponentTypeId,
        snapshot: S,
        restore: R,
    ) -> Result<(), RuntimeError>
    where
        S: Fn(&ComponentInstance) -> Result<Vec<u8>, RuntimeError> + Send + Sync + 'static,
        R: Fn(&[u8]) -> Result<ComponentInstance, RuntimeError> + Send + Sync + 'static,
    {
        let mut fns = self
            .components
            .get_mut(&component)
            .ok_or(RuntimeError::UnknownType(component))?;
        fns.migration = Some((Arc::new(snapshot), Arc::new(restore)));
        Ok(())
    }

    /// Returns `true` if a factory is registered for the component type.
    pub fn contains(&self, component: ComponentTypeId) -> bool {
        self.components.contains_key(&component)
    }

    /// Returns `true` if the component type is registered as migratable.
    pub fn is_migratable(&self, component: ComponentTypeId) -> bool {
        self.components
            .get(&component)
            .is_some_and(|fns| fns.migration.is_some())
    }

    /// Number of registered component types.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Returns `true` if no component type is registered.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Constructs an instance locally and hands it to the store.
    pub fn construct(
        &self,
        component: ComponentTypeId,
        args: &[u8],
        store: &InstanceStore,
    ) -> Result<LocalHandle, RuntimeError> {
        let factory = self
            .components
            .get(&component)
            .map(|fns| fns.factory.clone())
            .ok_or(RuntimeError::UnknownType(component))?;
        let instance = factory(args)?;
        let handle = store.insert(instance);
        trace!(%component, %handle, "constructed instance");
        Ok(handle)
    }

    /// Captures the state of a migratable instance.
    pub fn snapshot(&self, instance: &ComponentInstance) -> Result<Vec<u8>, RuntimeError> {
        let (snapshot, _) = self.migration(instance.component())?;
        snapshot(instance)
    }

    /// Rebuilds a migratable instance from its captured state and hands it to the store.
    pub fn restore(
        &self,
        component: ComponentTypeId,
        state: &[u8],
        store: &InstanceStore,
    ) -> Result<LocalHandle, RuntimeError> {
        let (_, restore) = self.migration(component)?;
        let instance = restore(state)?;
        Ok(store.insert(instance))
    }

    fn migration(
        &self,
        component: ComponentTypeId,
    ) -> Result<(Arc<Snapshot>, Arc<Restore>), RuntimeError> {
        let fns = self
            .components
            .get(&component)
            .ok_or(RuntimeError::UnknownType(component))?;
        fns.migration
            .clone()
            .ok_or(RuntimeError::NotMigratable(component))
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.components.iter().map(|entry| *entry.key()))
            .finish()
    }
}
