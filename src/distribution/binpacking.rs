use futures::{future::BoxFuture, FutureExt};
use itertools::Itertools;

use crate::{error::RuntimeError, id::LocalityId};

use super::{DistributionPolicy, DistributionRequest, PlacementContext};

/// Places each slot on the candidate with the fewest live instances of the component type.
///
/// Loads are sampled once per evaluation, then every slot is assigned greedily to the currently
/// least loaded candidate. Ties go to the earlier candidate, so identical inputs always produce
/// the same placement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binpacking {
    candidates: Vec<LocalityId>,
}

impl Binpacking {
    /// Balances slots over `candidates`, in the given order.
    pub fn new(candidates: impl IntoIterator<Item = LocalityId>) -> Self {
        Binpacking {
            candidates: candidates.into_iter().collect(),
        }
    }

    /// The candidate localities.
    pub fn candidates(&self) -> &[LocalityId] {
        &self.candidates
    }
}

impl DistributionPolicy for Binpacking {
    fn place<'a>(
        &'a self,
        request: DistributionRequest,
        cx: &'a dyn PlacementContext,
    ) -> BoxFuture<'a, Result<Vec<LocalityId>, RuntimeError>> {
        async move {
            if self.candidates.is_empty() {
                return Err(RuntimeError::NoCandidates);
            }
            let loads = futures::future::try_join_all(
                self.candidates
                    .iter()
                    .map(|locality| cx.instance_count(*locality, request.component)),
            )
            .await?;
            binpack(request.count, &self.candidates, &loads)
        }
        .boxed()
    }
}

/// Greedily assigns `count` slots to the least loaded of `candidates`.
///
/// `loads[i]` is the initial load of `candidates[i]`; missing loads count as zero. Ties are
/// broken by candidate order.
///
/// # Example
///
/// ```
/// use agora::{distribution::binpack, LocalityId};
///
/// let candidates = [LocalityId::new(1), LocalityId::new(2)];
/// let placement = binpack(3, &candidates, &[1, 0]).unwrap();
/// assert_eq!(placement, [LocalityId::new(2), LocalityId::new(1), LocalityId::new(2)]);
/// ```
pub fn binpack(
    count: usize,
    candidates: &[LocalityId],
    loads: &[usize],
) -> Result<Vec<LocalityId>, RuntimeError> {
    if candidates.is_empty() {
        return Err(RuntimeError::NoCandidates);
    }

    let mut loads: Vec<usize> = (0..candidates.len())
        .map(|i| loads.get(i).copied().unwrap_or(0))
        .collect();
    let mut placement = Vec::with_capacity(count);
    for _ in 0..count {
        let Some(slot) = loads.iter().position_min() else {
            return Err(RuntimeError::NoCandidates);
        };
        loads[slot] += 1;
        placement.push(candidates[slot]);
    }

    Ok(placement)
}
