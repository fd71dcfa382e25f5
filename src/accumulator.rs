use serde::{Deserialize, Serialize};

use crate::errors::UtreexoError;
use crate::hash::Hash;
use crate::position::Position;
use crate::proof::BatchProof;

/// Item committed to the accumulator.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Leaf {
    /// Leaf hash of the item.
    pub hash: Hash,
    /// Asks the pruned forest to keep enough data to prove this leaf later.
    pub remember: bool,
}

impl Leaf {
    /// Leaf that the pruned forest is free to forget.
    pub fn new(hash: Hash) -> Self {
        Leaf {
            hash,
            remember: false,
        }
    }

    /// Leaf that the pruned forest keeps a proof for.
    pub fn remembered(hash: Hash) -> Self {
        Leaf {
            hash,
            remember: true,
        }
    }
}

/// Common interface of the full and the pruned forests.
///
/// Both representations go through the same sequence of states when fed
/// the same modifications, and therefore always agree on their roots.
pub trait Accumulator {
    /// Removes the leaves at `deletions` (positions before this call), then appends `additions`.
    /// On error the accumulator is left unchanged.
    fn modify(&mut self, additions: &[Leaf], deletions: &[Position]) -> Result<(), UtreexoError>;

    /// Checks that `targets` are the leaves at `proof.targets()`, in that order.
    /// Returns `UtreexoError::InvalidProof` on any mismatch.
    fn verify(&mut self, proof: &BatchProof, targets: &[Hash]) -> Result<(), UtreexoError>;

    /// Roots of the trees, from the tallest to the shortest.
    fn roots(&self) -> Vec<Hash>;

    /// Number of leaves in the forest.
    fn num_leaves(&self) -> u64;
}
