//! Typed proxies to remote instances.
//!
//! A [`Client`] wraps the [`GlobalId`] of an instance of `T` and exposes its actions as ordinary
//! async calls. A client can be handed out before its instance exists: while the creation is
//! still running, calls wait for the id and then proceed as usual.
//!
//! ```
//! use std::convert::Infallible;
//!
//! use agora::{
//!     distribution::Single, transport::loopback::LoopbackNetwork, Action, Client, Component,
//!     LocalityId, Runtime,
//! };
//!
//! struct Greeter;
//!
//! impl Component for Greeter {
//!     const COMPONENT_ID: &'static str = "greeter";
//! }
//!
//! # tokio_test::block_on(async {
//! let runtime = Runtime::new(LoopbackNetwork::new().endpoint(LocalityId::new(1)));
//! let greet: Action<Greeter, String, String> = Action::new("greet");
//! runtime.register_component(|(): ()| Ok::<_, Infallible>(Greeter))?;
//! runtime.register_action(&greet, |_: &Greeter, name: String| {
//!     Ok::<_, Infallible>(format!("Hello, {name}"))
//! })?;
//!
//! let greeter: Client<Greeter> = runtime.create_client(Single::local(), &());
//! assert_eq!(greeter.call(&greet, "Ada".to_string()).await?, "Hello, Ada");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use std::{fmt, marker::PhantomData};

use futures::{
    future::{BoxFuture, Shared},
    FutureExt,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    action::Action,
    codec::{Codec, MsgPack},
    component::Component,
    error::RuntimeError,
    id::{GlobalId, LocalHandle, LocalityId},
    runtime::Runtime,
};

type PendingId = Shared<BoxFuture<'static, Result<GlobalId, RuntimeError>>>;

#[derive(Clone)]
enum ClientState {
    Ready(GlobalId),
    Pending(PendingId),
}

/// A typed proxy to an instance of `T`.
pub struct Client<T, C: Codec = MsgPack> {
    runtime: Runtime<C>,
    state: ClientState,
    phantom: PhantomData<fn() -> T>,
}

impl<T: Component, C: Codec> Client<T, C> {
    /// Wraps the id of an existing instance.
    pub fn new(runtime: Runtime<C>, id: GlobalId) -> Self {
        Client {
            runtime,
            state: ClientState::Ready(id),
            phantom: PhantomData,
        }
    }

    /// Wraps an id still being produced, typically by a creation.
    pub fn pending(
        runtime: Runtime<C>,
        id: impl std::future::Future<Output = Result<GlobalId, RuntimeError>> + Send + 'static,
    ) -> Self {
        Client {
            runtime,
            state: ClientState::Pending(id.boxed().shared()),
            phantom: PhantomData,
        }
    }

    /// The runtime calls are issued through.
    pub fn runtime(&self) -> &Runtime<C> {
        &self.runtime
    }

    /// Waits for the instance's id.
    ///
    /// Fails with the creation's error if the instance could not be created.
    pub async fn id(&self) -> Result<GlobalId, RuntimeError> {
        match &self.state {
            ClientState::Ready(id) => Ok(*id),
            ClientState::Pending(id) => id.clone().await,
        }
    }

    /// Returns the id if it is already known.
    pub fn try_id(&self) -> Option<GlobalId> {
        match &self.state {
            ClientState::Ready(id) => Some(*id),
            ClientState::Pending(id) => id.peek().and_then(|id| id.clone().ok()),
        }
    }

    /// Calls `action` on the instance.
    ///
    /// On a pending client the call is issued once the id is known.
    pub fn call<A, R>(
        &self,
        action: &Action<T, A, R>,
        args: A,
    ) -> BoxFuture<'static, Result<R, RuntimeError>>
    where
        A: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        if let Some(id) = self.try_id() {
            return self.runtime.invoke(id, action, args).send().boxed();
        }

        let runtime = self.runtime.clone();
        let action = action.id();
        let args = runtime
            .codec()
            .encode(&args)
            .map_err(RuntimeError::from);
        let id = self.id_future();
        async move {
            let id = id.await?;
            let bytes = runtime.invoke_raw(id, action, args?).await?;
            Ok::<R, RuntimeError>(runtime.codec().decode(&bytes)?)
        }
        .boxed()
    }

    /// Finds the locality currently hosting the instance.
    pub async fn resolve(&self) -> Result<(LocalityId, LocalHandle), RuntimeError> {
        self.runtime.resolve(self.id().await?).await
    }

    /// Moves the instance to `to`.
    pub async fn migrate(&self, to: LocalityId) -> Result<(), RuntimeError> {
        self.runtime.migrate(self.id().await?, to).await
    }

    /// Destroys the instance. Later calls fail with [`RuntimeError::UnknownId`].
    pub async fn retire(&self) -> Result<(), RuntimeError> {
        self.runtime.retire(self.id().await?).await
    }

    fn id_future(&self) -> BoxFuture<'static, Result<GlobalId, RuntimeError>> {
        match &self.state {
            ClientState::Ready(id) => futures::future::ready(Ok(*id)).boxed(),
            ClientState::Pending(id) => id.clone().boxed(),
        }
    }
}

impl<T, C: Codec> Clone for Client<T, C> {
    fn clone(&self) -> Self {
        Client {
            runtime: self.runtime.clone(),
            state: self.state.clone(),
            phantom: PhantomData,
        }
    }
}

impl<T, C: Codec> fmt::Debug for Client<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Client");
        match &self.state {
            ClientState::Ready(id) => d.field("id", id),
            ClientState::Pending(_) => d.field("id", &"<pending>"),
        };
        d.field("here", &self.runtime.here()).finish()
    }
}
