//! Distribution policies decide *where* new instances are created.
//!
//! A policy is given a [`DistributionRequest`] and yields one locality per requested slot, in
//! slot order. Policies that need information about the cluster (where an id currently lives,
//! how loaded a locality is) query it through a [`PlacementContext`], which the runtime
//! implements.
//!
//! The built-in policies are:
//!
//! - [`Single`]: every slot on one locality.
//! - [`Colocating`]: every slot next to an existing instance.
//! - [`Binpacking`]: each slot on the currently least loaded candidate.
//! - [`RoundRobin`]: slots dealt over the candidates in order.

use std::fmt;

use dyn_clone::DynClone;
use futures::future::BoxFuture;

use crate::{
    error::RuntimeError,
    id::{ComponentTypeId, GlobalId, LocalityId},
};

mod binpacking;
mod colocating;
mod round_robin;
mod single;

pub use binpacking::{binpack, Binpacking};
pub use colocating::Colocating;
pub use round_robin::RoundRobin;
pub use single::Single;

/// What is being placed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DistributionRequest {
    /// The component type being created.
    pub component: ComponentTypeId,
    /// The number of instances to place.
    pub count: usize,
}

/// Cluster information available to policies while placing.
pub trait PlacementContext: Send + Sync {
    /// The locality evaluating the policy.
    fn here(&self) -> LocalityId;

    /// Finds the locality currently hosting an instance.
    fn locate(&self, id: GlobalId) -> BoxFuture<'_, Result<LocalityId, RuntimeError>>;

    /// Counts the live instances of a component type on a locality.
    fn instance_count(
        &self,
        locality: LocalityId,
        component: ComponentTypeId,
    ) -> BoxFuture<'_, Result<usize, RuntimeError>>;
}

/// A placement strategy for new instances.
pub trait DistributionPolicy: DynClone + fmt::Debug + Send + Sync + 'static {
    /// Assigns a locality to each of the `request.count` slots.
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>>;
}

dyn_clone::clone_trait_object!(DistributionPolicy);

impl DistributionPolicy for Box<dyn DistributionPolicy> {
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>> {
        (**self).place(request, cx)
    }
}
