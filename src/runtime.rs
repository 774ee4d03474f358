//! The per-locality runtime: creation, invocation, resolution and migration.
//!
//! A [`Runtime`] ties together the address table, the component and action registries, and the
//! instances hosted on one locality. It talks to the other localities of the cluster through an
//! injected [`Transport`], encoding everything with an injected [`Codec`].
//!
//! Every operation returns without waiting on the network; the returned future resolves once
//! the work completes. Calls against locally hosted instances take the same path as remote calls
//! (through the pending table), so deadlines and cancellation behave identically for both.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//!
//! use agora::{
//!     distribution::Single, transport::loopback::LoopbackNetwork, Action, Component, LocalityId,
//!     Runtime,
//! };
//!
//! struct Counter {
//!     x: i64,
//! }
//!
//! impl Component for Counter {
//!     const COMPONENT_ID: &'static str = "counter";
//! }
//!
//! # tokio_test::block_on(async {
//! let network = LoopbackNetwork::new();
//! let runtime = Runtime::new(network.endpoint(LocalityId::new(1)));
//!
//! let get_x: Action<Counter, (), i64> = Action::new("get_x");
//! runtime.register_component(|x: i64| Ok::<_, Infallible>(Counter { x }))?;
//! runtime.register_action(&get_x, |counter: &Counter, ()| Ok::<_, Infallible>(counter.x))?;
//!
//! let id = runtime.create::<Counter, _>(Single::local(), &5).await?;
//! assert_eq!(runtime.invoke(id, &get_x, ()).await?, 5);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use std::{collections::BTreeMap, fmt, future::Future, sync::Arc, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, trace, warn};

use crate::{
    action::{async_thunk, sync_thunk, Action, ActionRegistry},
    agas::{AddressTable, Resolution},
    client::Client,
    codec::{Codec, MsgPack},
    component::{Component, ComponentInstance, ComponentRegistry, InstanceStore},
    config::RuntimeConfig,
    distribution::{DistributionPolicy, DistributionRequest, PlacementContext},
    error::{RegistrationError, RuntimeError},
    id::{ActionId, ComponentTypeId, GlobalId, LocalHandle, LocalityId},
    transport::Transport,
};

mod inbound;
mod invoke;
mod parcel;
mod pending;

pub use invoke::{CancelHandle, Invocation, InvokeRequest};
pub use parcel::CorrelationId;

use parcel::{Parcel, Request, Response};
use pending::PendingTable;

/// One locality's view of the cluster.
///
/// Cloning a runtime returns another handle to the same locality.
pub struct Runtime<C: Codec = MsgPack> {
    inner: Arc<RuntimeInner<C>>,
}

struct RuntimeInner<C> {
    here: LocalityId,
    config: RuntimeConfig,
    codec: C,
    transport: Arc<dyn Transport>,
    agas: AddressTable,
    components: ComponentRegistry,
    actions: ActionRegistry,
    instances: InstanceStore,
    pending: Arc<PendingTable>,
}

impl Runtime<MsgPack> {
    /// Builds a runtime with the default configuration and codec.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Runtime::builder().build(transport)
    }

    /// Creates a builder with the default configuration and codec.
    pub fn builder() -> RuntimeBuilder<MsgPack> {
        RuntimeBuilder {
            config: RuntimeConfig::default(),
            codec: MsgPack,
        }
    }
}

impl<C: Codec> Runtime<C> {
    /// The locality this runtime represents.
    pub fn here(&self) -> LocalityId {
        self.inner.here
    }

    /// Every locality known to be reachable, including this one, in ascending order.
    pub fn localities(&self) -> Vec<LocalityId> {
        let mut localities = self.inner.transport.peers();
        localities.push(self.inner.here);
        localities.sort_unstable();
        localities.dedup();
        localities
    }

    /// The runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// The codec used for arguments, results and parcels.
    pub fn codec(&self) -> &C {
        &self.inner.codec
    }

    /// The address table of this locality.
    pub fn address_table(&self) -> &AddressTable {
        &self.inner.agas
    }

    /// The component registry, for byte-level factory registration.
    pub fn components(&self) -> &ComponentRegistry {
        &self.inner.components
    }

    /// The action registry, for byte-level thunk registration.
    pub fn actions(&self) -> &ActionRegistry {
        &self.inner.actions
    }

    /// Number of live instances of `component` hosted on this locality.
    pub fn instance_count(&self, component: ComponentTypeId) -> usize {
        self.inner.instances.count(component)
    }

    /// Number of requests issued by this locality still awaiting a reply.
    pub fn pending_invocations(&self) -> usize {
        self.inner.pending.len()
    }

    /// Registers the factory constructing `T` from decoded arguments.
    ///
    /// Errors returned by `factory`, and arguments which fail to decode as `A`, surface as
    /// [`RuntimeError::ConstructionFailed`].
    pub fn register_component<T, A, E, F>(&self, factory: F) -> Result<(), RegistrationError>
    where
        T: Component,
        A: DeserializeOwned,
        E: fmt::Display,
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
    {
        let codec = self.inner.codec.clone();
        self.inner
            .components
            .register_type(T::component_type(), move |bytes: &[u8]| {
                let args = codec
                    .decode::<A>(bytes)
                    .map_err(|err| RuntimeError::ConstructionFailed(err.to_string()))?;
                let object = factory(args)
                    .map_err(|err| RuntimeError::ConstructionFailed(err.to_string()))?;
                Ok(ComponentInstance::new(object))
            })
    }

    /// Registers a synchronous method as an action.
    ///
    /// The method only gets shared access to the instance; concurrent calls against the same
    /// instance run in parallel. Errors returned by `method`, and arguments which fail to decode
    /// as `A`, surface as [`RuntimeError::ActionFailed`].
    pub fn register_action<T, A, R, E, F>(
        &self,
        action: &Action<T, A, R>,
        method: F,
    ) -> Result<(), RegistrationError>
    where
        T: Component,
        A: DeserializeOwned,
        R: Serialize,
        E: fmt::Display,
        F: Fn(&T, A) -> Result<R, E> + Send + Sync + 'static,
    {
        self.inner
            .actions
            .register_action(action.id(), sync_thunk(self.inner.codec.clone(), method))
    }

    /// Registers an asynchronous method as an action.
    pub fn register_async_action<T, A, R, E, F, Fut>(
        &self,
        action: &Action<T, A, R>,
        method: F,
    ) -> Result<(), RegistrationError>
    where
        T: Component,
        A: DeserializeOwned,
        R: Serialize,
        E: fmt::Display,
        F: Fn(Arc<T>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
    {
        self.inner
            .actions
            .register_action(action.id(), async_thunk(self.inner.codec.clone(), method))
    }

    /// Allows instances of `T` to migrate, capturing their state with the runtime's codec.
    ///
    /// `T` must already be registered with [`register_component`](Runtime::register_component).
    pub fn register_migratable<T>(&self) -> Result<(), RuntimeError>
    where
        T: Component + Serialize + DeserializeOwned,
    {
        let snapshot_codec = self.inner.codec.clone();
        let restore_codec = self.inner.codec.clone();
        self.inner.components.register_migration(
            T::component_type(),
            move |instance: &ComponentInstance| {
                let object = instance.downcast::<T>()?;
                Ok(snapshot_codec.encode(&*object)?)
            },
            move |state: &[u8]| Ok(ComponentInstance::new(restore_codec.decode::<T>(state)?)),
        )
    }

    /// Creates one instance of `T` where `policy` places it.
    pub fn create<T, A>(
        &self,
        policy: impl DistributionPolicy,
        args: &A,
    ) -> BoxFuture<'static, Result<GlobalId, RuntimeError>>
    where
        T: Component,
        A: Serialize + ?Sized,
    {
        let ids = self.create_many::<T, A>(policy, 1, args);
        async move {
            ids.await?
                .into_iter()
                .next()
                .ok_or(RuntimeError::NoCandidates)
        }
        .boxed()
    }

    /// Creates `count` instances of `T`, all constructed from the same arguments.
    ///
    /// Ids are returned in slot order. If any slot fails, the instances already created are
    /// retired and the first error is returned.
    pub fn create_many<T, A>(
        &self,
        policy: impl DistributionPolicy,
        count: usize,
        args: &A,
    ) -> BoxFuture<'static, Result<Vec<GlobalId>, RuntimeError>>
    where
        T: Component,
        A: Serialize + ?Sized,
    {
        match self.inner.codec.encode(args) {
            Ok(args) => self.create_raw(T::component_type(), Box::new(policy), count, args),
            Err(err) => futures::future::ready(Err(err.into())).boxed(),
        }
    }

    /// Creates one instance of `T` and wraps it in a [`Client`] right away.
    ///
    /// Calls made through the client wait for the creation to finish.
    pub fn create_client<T, A>(&self, policy: impl DistributionPolicy, args: &A) -> Client<T, C>
    where
        T: Component,
        A: Serialize + ?Sized,
    {
        Client::pending(self.clone(), self.create::<T, A>(policy, args))
    }

    /// Creates `count` instances of a component type from encoded arguments.
    pub fn create_raw(
        &self,
        component: ComponentTypeId,
        policy: Box<dyn DistributionPolicy>,
        count: usize,
        args: Vec<u8>,
    ) -> BoxFuture<'static, Result<Vec<GlobalId>, RuntimeError>> {
        let runtime = self.clone();
        let task = tokio::spawn(async move {
            runtime
                .create_placed(component, &*policy, count, args)
                .await
        });
        async move {
            task.await
                .map_err(|err| RuntimeError::ConstructionFailed(err.to_string()))?
        }
        .boxed()
    }

    /// Calls `action` on the instance `target`.
    ///
    /// ```
    /// # use std::{convert::Infallible, time::Duration};
    /// # use agora::{
    /// #     distribution::Single, transport::loopback::LoopbackNetwork, Action, Component,
    /// #     LocalityId, Runtime,
    /// # };
    /// # struct Counter;
    /// # impl Component for Counter { const COMPONENT_ID: &'static str = "counter"; }
    /// # tokio_test::block_on(async {
    /// # let runtime = Runtime::new(LoopbackNetwork::new().endpoint(LocalityId::new(1)));
    /// # let ping: Action<Counter, (), String> = Action::new("ping");
    /// # runtime.register_component(|(): ()| Ok::<_, Infallible>(Counter))?;
    /// # runtime.register_action(&ping, |_: &Counter, ()| {
    /// #     Ok::<_, Infallible>("pong".to_string())
    /// # })?;
    /// # let id = runtime.create::<Counter, _>(Single::local(), &()).await?;
    /// let reply = runtime
    ///     .invoke(id, &ping, ())
    ///     .timeout(Duration::from_secs(1))
    ///     .await?;
    /// assert_eq!(reply, "pong");
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// # });
    /// ```
    pub fn invoke<T, A, R>(
        &self,
        target: GlobalId,
        action: &Action<T, A, R>,
        args: A,
    ) -> InvokeRequest<'_, R, C>
    where
        A: Serialize,
        R: DeserializeOwned + Send + 'static,
    {
        let args = self.inner.codec.encode(&args).map_err(RuntimeError::from);
        InvokeRequest::new(self, target, action.id(), args, |codec, bytes| {
            Ok(codec.decode(&bytes)?)
        })
    }

    /// Calls an action with encoded arguments, returning the encoded result.
    pub fn invoke_raw(
        &self,
        target: GlobalId,
        action: ActionId,
        args: Vec<u8>,
    ) -> InvokeRequest<'_, Vec<u8>, C> {
        InvokeRequest::new(self, target, action, Ok(args), |_, bytes| Ok(bytes))
    }

    /// Finds the locality hosting `id` and the instance's handle there.
    pub async fn resolve(&self, id: GlobalId) -> Result<(LocalityId, LocalHandle), RuntimeError> {
        match self.inner.agas.resolve(id)? {
            Resolution::Local(handle) => Ok((self.here(), handle)),
            Resolution::Remote(locality) => self
                .call(locality, Request::Resolve { target: id })
                .await?
                .into_resolved(),
        }
    }

    /// Destroys the instance `id`.
    ///
    /// Retiring an id which is already retired is a no-op.
    pub async fn retire(&self, id: GlobalId) -> Result<(), RuntimeError> {
        let result = match self.inner.agas.resolve(id) {
            Ok(Resolution::Local(_)) => {
                self.retire_hosted(id).await;
                Ok(())
            }
            Ok(Resolution::Remote(locality)) => self
                .call(locality, Request::Retire { target: id })
                .await
                .and_then(Response::into_done),
            Err(err) => Err(err),
        };
        self.inner.agas.forget(id);

        match result {
            Err(RuntimeError::UnknownId(_)) => Ok(()),
            result => result,
        }
    }

    /// Moves the instance `id` to the locality `to`, keeping its id and state.
    ///
    /// The component type must be registered with
    /// [`register_migratable`](Runtime::register_migratable). The instance should be quiescent:
    /// calls racing with the migration may act on the old copy.
    pub async fn migrate(&self, id: GlobalId, to: LocalityId) -> Result<(), RuntimeError> {
        match self.inner.agas.resolve(id)? {
            Resolution::Local(_) => self.migrate_hosted(id, to).await,
            Resolution::Remote(locality) => {
                self.call(locality, Request::Migrate { target: id, to })
                    .await?
                    .into_done()?;
                self.inner.agas.remember(id, to);
                Ok(())
            }
        }
    }

    pub(crate) fn issue_invoke(
        &self,
        target: GlobalId,
        action: ActionId,
        args: Result<Vec<u8>, RuntimeError>,
        timeout: Option<Duration>,
    ) -> Invocation<Vec<u8>> {
        let issued = args.and_then(|args| {
            let to = match self.inner.agas.resolve(target)? {
                Resolution::Local(_) => self.here(),
                Resolution::Remote(locality) => locality,
            };
            Ok((to, args))
        });

        let invocation = match issued {
            Ok((to, args)) => self.request(
                to,
                Request::Invoke {
                    target,
                    action,
                    args,
                },
                timeout,
            ),
            Err(err) => self.fail(err),
        };
        invocation.map(Response::into_invoked)
    }

    /// Issues a request with the configured deadline.
    fn call(&self, to: LocalityId, body: Request) -> Invocation<Response> {
        self.request(to, body, self.inner.config.call_timeout)
    }

    fn request(
        &self,
        to: LocalityId,
        body: Request,
        timeout: Option<Duration>,
    ) -> Invocation<Response> {
        let (correlation_id, rx) = self.inner.pending.register(body.locates(), body.action());
        let here = self.here();
        let runtime = self.clone();
        trace!(
            %to,
            %correlation_id,
            action = ?body.action(),
            payload = body.payload_len(),
            "issued request"
        );

        if to == here {
            tokio::spawn(async move {
                runtime
                    .handle_request(here, correlation_id, 0, body)
                    .await;
            });
        } else {
            tokio::spawn(async move {
                trace!(%to, %correlation_id, "sending request");
                let parcel = Parcel::Request {
                    correlation_id,
                    origin: here,
                    hops: 0,
                    body,
                };
                if let Err(err) = runtime.send_parcel(to, &parcel).await {
                    runtime.inner.pending.complete(correlation_id, Err(err));
                }
            });
        }

        Invocation::pending(self.inner.pending.clone(), correlation_id, rx, timeout)
    }

    /// An invocation which already failed.
    fn fail(&self, err: RuntimeError) -> Invocation<Response> {
        let (correlation_id, rx) = self.inner.pending.register(None, None);
        self.inner.pending.complete(correlation_id, Err(err));
        Invocation::pending(self.inner.pending.clone(), correlation_id, rx, None)
    }

    async fn send_parcel(&self, to: LocalityId, parcel: &Parcel) -> Result<(), RuntimeError> {
        let bytes = self.inner.codec.encode(parcel)?;
        self.inner.transport.send(to, bytes).await?;
        Ok(())
    }

    async fn create_placed(
        &self,
        component: ComponentTypeId,
        policy: &dyn DistributionPolicy,
        count: usize,
        args: Vec<u8>,
    ) -> Result<Vec<GlobalId>, RuntimeError> {
        let placement = policy
            .place(DistributionRequest { component, count }, self)
            .await?;
        if placement.len() != count {
            return Err(RuntimeError::NoCandidates);
        }

        let mut groups: BTreeMap<LocalityId, Vec<usize>> = BTreeMap::new();
        for (slot, locality) in placement.into_iter().enumerate() {
            groups.entry(locality).or_default().push(slot);
        }

        let results = futures::future::join_all(groups.into_iter().map(|(locality, slots)| {
            let created = self.call(
                locality,
                Request::Create {
                    component,
                    count: slots.len(),
                    args: args.clone(),
                },
            );
            async move { (slots, created.await.and_then(Response::into_created)) }
        }))
        .await;

        let mut ids = vec![None; count];
        let mut created = Vec::with_capacity(count);
        let mut failure = None;
        for (slots, result) in results {
            match result {
                Ok(group) => {
                    if group.len() != slots.len() {
                        failure.get_or_insert(RuntimeError::ConstructionFailed(format!(
                            "expected {} instances, got {}",
                            slots.len(),
                            group.len()
                        )));
                    }
                    for (slot, id) in slots.into_iter().zip(&group) {
                        ids[slot] = Some(*id);
                    }
                    created.extend(group);
                }
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }

        if let Some(err) = failure {
            debug!(%component, created = created.len(), %err, "rolling back failed creation");
            for id in created {
                if let Err(err) = self.retire(id).await {
                    warn!(%id, %err, "failed to roll back created instance");
                }
            }
            return Err(err);
        }

        Ok(ids.into_iter().flatten().collect())
    }

    /// Constructs instances on this locality, all or nothing.
    fn construct_hosted(
        &self,
        component: ComponentTypeId,
        count: usize,
        args: &[u8],
    ) -> Result<Vec<GlobalId>, RuntimeError> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            match self
                .inner
                .components
                .construct(component, args, &self.inner.instances)
            {
                Ok(handle) => ids.push(self.inner.agas.register(handle)),
                Err(err) => {
                    for id in ids {
                        if let Some(handle) = self.inner.agas.retire(id) {
                            self.inner.instances.remove(handle);
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(ids)
    }

    async fn retire_hosted(&self, id: GlobalId) {
        let Some(handle) = self.inner.agas.retire(id) else {
            return;
        };
        self.inner.instances.remove(handle);

        let home = id.locality();
        if home != self.here() {
            if let Err(err) = self
                .call(home, Request::Release { target: id })
                .await
                .and_then(Response::into_done)
            {
                warn!(%id, %home, %err, "failed to release forwarding record");
            }
        }
    }

    async fn migrate_hosted(&self, id: GlobalId, to: LocalityId) -> Result<(), RuntimeError> {
        if to == self.here() {
            return Ok(());
        }

        let handle = self
            .inner
            .agas
            .lookup(id)
            .ok_or(RuntimeError::UnknownId(id))?;
        let instance = self
            .inner
            .instances
            .get(handle)
            .ok_or(RuntimeError::TargetGone)?;
        let state = self.inner.components.snapshot(&instance)?;

        self.call(
            to,
            Request::Adopt {
                target: id,
                component: instance.component(),
                state,
            },
        )
        .await?
        .into_done()?;

        let handle = self.inner.agas.rebind(id, to)?;
        self.inner.instances.remove(handle);

        let home = id.locality();
        if home != self.here() && home != to {
            if let Err(err) = self
                .call(home, Request::Rebind { target: id, to })
                .await
                .and_then(Response::into_done)
            {
                warn!(%id, %home, %err, "failed to update forwarding record");
            }
        }

        debug!(%id, from = %self.here(), %to, "migrated instance");
        Ok(())
    }
}

impl<C: Codec> PlacementContext for Runtime<C> {
    fn here(&self) -> LocalityId {
        self.inner.here
    }

    fn locate(&self, id: GlobalId) -> BoxFuture<'_, Result<LocalityId, RuntimeError>> {
        async move { self.resolve(id).await.map(|(locality, _)| locality) }.boxed()
    }

    fn instance_count(
        &self,
        locality: LocalityId,
        component: ComponentTypeId,
    ) -> BoxFuture<'_, Result<usize, RuntimeError>> {
        async move {
            if locality == self.inner.here {
                return Ok(self.inner.instances.count(component));
            }
            self.call(locality, Request::InstanceCount { component })
                .await?
                .into_instance_count()
        }
        .boxed()
    }
}

impl<C: Codec> Clone for Runtime<C> {
    fn clone(&self) -> Self {
        Runtime {
            inner: self.inner.clone(),
        }
    }
}

impl<C: Codec> fmt::Debug for Runtime<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("here", &self.inner.here)
            .field("config", &self.inner.config)
            .field("codec", &self.inner.codec)
            .field("instances", &self.inner.instances.len())
            .field("pending", &self.inner.pending.len())
            .finish()
    }
}

/// Configures and builds a [`Runtime`].
#[derive(Clone, Debug)]
pub struct RuntimeBuilder<C: Codec = MsgPack> {
    config: RuntimeConfig,
    codec: C,
}

impl<C: Codec> RuntimeBuilder<C> {
    /// Replaces the whole configuration.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the default call deadline, `None` waits forever.
    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.call_timeout = timeout;
        self
    }

    /// Sets how many times a request may be forwarded.
    pub fn max_forward_hops(mut self, hops: u8) -> Self {
        self.config.max_forward_hops = hops;
        self
    }

    /// Replaces the codec. Every locality of a cluster must use the same codec.
    pub fn codec<C2: Codec>(self, codec: C2) -> RuntimeBuilder<C2> {
        RuntimeBuilder {
            config: self.config,
            codec,
        }
    }

    /// Builds the runtime for the locality the transport represents, and starts receiving.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self, transport: Arc<dyn Transport>) -> Runtime<C> {
        let here = transport.here();
        let inner = Arc::new(RuntimeInner {
            here,
            config: self.config,
            codec: self.codec,
            transport: transport.clone(),
            agas: AddressTable::new(here),
            components: ComponentRegistry::new(),
            actions: ActionRegistry::new(),
            instances: InstanceStore::new(),
            pending: Arc::new(PendingTable::default()),
        });

        let weak = Arc::downgrade(&inner);
        transport.on_receive(Arc::new(move |from, message| {
            if let Some(inner) = weak.upgrade() {
                Runtime { inner }.receive(from, message);
            }
        }));

        debug!(%here, "runtime started");
        Runtime { inner }
    }
}
