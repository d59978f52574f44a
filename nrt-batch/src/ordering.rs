use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{BatchError, BatchResult};

/// Order in which items are visited during one epoch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrdering {
    #[default]
    Sequential,
    /// A fresh permutation per epoch, fully determined by `seed` and the epoch number.
    Shuffled { seed: u64 },
    /// Caller supplied order; indices may repeat.
    Explicit(Vec<usize>),
}

impl IndexOrdering {
    /// Orders the eligible items among `0..num_items` for `epoch`.
    pub fn arrange(
        &self,
        num_items: usize,
        epoch: u64,
        eligible: impl Fn(usize) -> bool,
    ) -> BatchResult<Vec<usize>> {
        match self {
            IndexOrdering::Sequential => Ok((0..num_items).filter(|&i| eligible(i)).collect()),
            IndexOrdering::Shuffled { seed } => {
                let mut indices: Vec<usize> = (0..num_items).filter(|&i| eligible(i)).collect();
                let mut rng = StdRng::seed_from_u64(epoch_seed(*seed, epoch));
                indices.shuffle(&mut rng);
                Ok(indices)
            }
            IndexOrdering::Explicit(indices) => {
                if let Some(&bad) = indices.iter().find(|&&i| i >= num_items) {
                    return Err(BatchError::InvalidPlan(format!(
                        "explicit index {bad} out of range for {num_items} items"
                    )));
                }
                Ok(indices.iter().copied().filter(|&i| eligible(i)).collect())
            }
        }
    }
}

/// Seed of the permutation used in `epoch`.
pub fn epoch_seed(seed: u64, epoch: u64) -> u64 {
    seed ^ epoch.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}
