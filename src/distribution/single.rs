use futures::{future::BoxFuture, FutureExt};

use crate::{error::RuntimeError, id::LocalityId};

use super::{DistributionPolicy, DistributionRequest, PlacementContext};

/// Places every slot on one locality.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Single {
    target: Option<LocalityId>,
}

impl Single {
    /// Places every slot on `locality`.
    pub fn new(locality: LocalityId) -> Self {
        Single {
            target: Some(locality),
        }
    }

    /// Places every slot on the locality evaluating the policy.
    pub fn local() -> Self {
        Single { target: None }
    }
}

impl DistributionPolicy for Single {
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>> {
        let locality = self.target.unwrap_or_else(|| cx.here());
        futures::future::ready(Ok(vec![locality; request.count])).boxed()
    }
}
