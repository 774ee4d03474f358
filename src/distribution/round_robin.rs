use futures::{future::BoxFuture, FutureExt};

use crate::{error::RuntimeError, id::LocalityId};

use super::{DistributionPolicy, DistributionRequest, PlacementContext};

/// Deals slot `i` to candidate `i % K`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundRobin {
    candidates: Vec<LocalityId>,
}

impl RoundRobin {
    /// Deals slots over `candidates`, in the given order.
    pub fn new(candidates: impl IntoIterator<Item = LocalityId>) -> Self {
        RoundRobin {
            candidates: candidates.into_iter().collect(),
        }
    }
}

impl DistributionPolicy for RoundRobin {
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        _cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>> {
        let placement = if self.candidates.is_empty() {
            Err(RuntimeError::NoCandidates)
        } else {
            Ok(self
                .candidates
                .iter()
                .copied()
                .cycle()
                .take(request.count)
                .collect())
        };
        futures::future::ready(placement).boxed()
    }
}
