//! Actions are the remotely invocable methods of component types.
//!
//! Each action is registered once per locality as a thunk which decodes arguments, runs the
//! method against a live [`ComponentInstance`], and encodes the result. Dispatching never holds
//! a lock while the method runs, so any number of actions may execute against the same instance
//! concurrently. Instances serialize their own mutation.

use std::{fmt, future::Future, marker::PhantomData, sync::Arc};

use dashmap::{mapref::entry::Entry, DashMap};
use futures::{future::BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::trace;

use crate::{
    codec::Codec,
    component::{Component, ComponentInstance, InstanceStore},
    error::{RegistrationError, RuntimeError},
    id::{ActionId, LocalHandle},
};

/// A byte-level action thunk.
pub type ActionThunk =
    dyn Fn(ComponentInstance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>>
        + Send
        + Sync;

/// A typed handle to an action of component `T` taking `A` and returning `R`.
///
/// The argument and result types are fixed here so every call site agrees with the registered
/// method.
pub struct Action<T, A, R> {
    id: ActionId,
    phantom: PhantomData<fn(&T, A) -> R>,
}

impl<T: Component, A, R> Action<T, A, R> {
    /// Creates the handle for `method` on component `T`.
    pub fn new(method: &str) -> Self {
        Action {
            id: ActionId::new(T::component_type(), method),
            phantom: PhantomData,
        }
    }
}

impl<T, A, R> Action<T, A, R> {
    /// The untyped action id.
    pub fn id(&self) -> ActionId {
        self.id
    }
}

impl<T, A, R> Clone for Action<T, A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, A, R> Copy for Action<T, A, R> {}

impl<T, A, R> fmt::Debug for Action<T, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Action").field(&self.id).finish()
    }
}

/// Maps action ids to their dispatch thunks.
#[derive(Default)]
pub struct ActionRegistry {
    thunks: DashMap<ActionId, Arc<ActionThunk>>,
}

impl ActionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        ActionRegistry::default()
    }

    /// Installs the thunk for an action.
    pub fn register_action<F>(&self, action: ActionId, thunk: F) -> Result<(), RegistrationError>
    where
        F: Fn(ComponentInstance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>>
            + Send
            + Sync
            + 'static,
    {
        match self.thunks.entry(action) {
            Entry::Occupied(_) => Err(RegistrationError::DuplicateAction(action)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(thunk));
                trace!(%action, "registered action");
                Ok(())
            }
        }
    }

    /// Returns `true` if a thunk is registered for the action.
    pub fn contains(&self, action: ActionId) -> bool {
        self.thunks.contains_key(&action)
    }

    /// Number of registered actions.
    pub fn len(&self) -> usize {
        self.thunks.len()
    }

    /// Returns `true` if no action is registered.
    pub fn is_empty(&self) -> bool {
        self.thunks.is_empty()
    }

    /// Runs an action against a locally hosted instance.
    ///
    /// # Errors
    ///
    /// - [`RuntimeError::UnknownAction`] if no thunk is registered for `action`.
    /// - [`RuntimeError::TargetGone`] if `handle` no longer denotes a live instance.
    /// - [`RuntimeError::BadComponentType`] if the instance isn't of the action's component type.
    /// - Whatever the thunk itself fails with, [`RuntimeError::ActionFailed`] for method errors
    ///   and undecodable arguments.
    pub fn dispatch(
        &self,
        action: ActionId,
        handle: LocalHandle,
        args: Vec<u8>,
        store: &InstanceStore,
    ) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>> {
        let Some(thunk) = self.thunks.get(&action).map(|thunk| thunk.clone()) else {
            return futures::future::ready(Err(RuntimeError::UnknownAction(action))).boxed();
        };
        let Some(instance) = store.get(handle) else {
            return futures::future::ready(Err(RuntimeError::TargetGone)).boxed();
        };
        if instance.component() != action.component() {
            return futures::future::ready(Err(RuntimeError::BadComponentType {
                expected: action.component(),
                found: instance.component(),
            }))
            .boxed();
        }

        trace!(%action, %handle, "dispatching action");
        thunk(instance, args)
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.thunks.iter().map(|entry| *entry.key()))
            .finish()
    }
}

/// Wraps a synchronous method into a byte-level thunk.
pub(crate) fn sync_thunk<T, A, R, E, F, C>(
    codec: C,
    method: F,
) -> impl Fn(ComponentInstance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>>
       + Send
       + Sync
       + 'static
where
    T: Component,
    A: DeserializeOwned,
    R: Serialize,
    E: fmt::Display,
    F: Fn(&T, A) -> Result<R, E> + Send + Sync + 'static,
    C: Codec,
{
    move |instance, args| {
        let result = (|| -> Result<Vec<u8>, RuntimeError> {
            let object = instance.downcast::<T>()?;
            let args = codec
                .decode::<A>(&args)
                .map_err(|err| RuntimeError::ActionFailed(err.to_string()))?;
            let value = method(&*object, args)
                .map_err(|err| RuntimeError::ActionFailed(err.to_string()))?;
            Ok(codec.encode(&value)?)
        })();
        futures::future::ready(result).boxed()
    }
}

/// Wraps an asynchronous method into a byte-level thunk.
pub(crate) fn async_thunk<T, A, R, E, F, Fut, C>(
    codec: C,
    method: F,
) -> impl Fn(ComponentInstance, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, RuntimeError>>
       + Send
       + Sync
       + 'static
where
    T: Component,
    A: DeserializeOwned,
    R: Serialize,
    E: fmt::Display,
    F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    C: Codec,
{
    move |instance, args| {
        let call = instance
            .downcast::<T>()
            .and_then(|object| {
                let args = codec
                    .decode::<A>(&args)
                    .map_err(|err| RuntimeError::ActionFailed(err.to_string()))?;
                Ok((object, args))
            })
            .map(|(object, args)| method(object, args));
        let codec = codec.clone();
        async move {
            let value = call?
                .await
                .map_err(|err| RuntimeError::ActionFailed(err.to_string()))?;
            Ok::<_, RuntimeError>(codec.encode(&value)?)
        }
        .boxed()
    }
}
