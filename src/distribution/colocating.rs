use futures::{future::BoxFuture, FutureExt};

use crate::{
    error::RuntimeError,
    id::{GlobalId, LocalityId},
};

use super::{DistributionPolicy, DistributionRequest, PlacementContext};

/// Places every slot on the locality currently hosting an existing instance.
///
/// The instance is located when the policy is evaluated, so a migrated instance pulls later
/// creations along with it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Colocating {
    with: GlobalId,
}

impl Colocating {
    /// Colocates new instances with `with`.
    pub fn new(with: GlobalId) -> Self {
        Colocating { with }
    }
}

impl DistributionPolicy for Colocating {
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>> {
        async move {
            let locality = cx.locate(self.with).await.map_err(|err| match err {
                RuntimeError::UnknownId(_) | RuntimeError::TargetGone => {
                    RuntimeError::NotFound(self.with)
                }
                err => err,
            })?;
            Ok::<_, RuntimeError>(vec![locality; request.count])
        }
        .boxed()
    }
}
