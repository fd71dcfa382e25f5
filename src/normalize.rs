//! Normalization of a forest after deletions and insertions.
//!
//! Both representations run the same algorithm over their own storage.
//! Deletions are applied in place, one row at a time from the leaves upward.
//! In each row the dead nodes (deleted leaves, or parents that lost both
//! children) are handled as follows:
//!
//! 1. A dead root of the row is dropped.
//! 2. Two dead siblings make their parent dead.
//! 3. The remaining dead nodes are taken in pairs from the left: the sibling of
//!    the second one moves into the first one, and the parent of the second one
//!    is dead in the next row.
//! 4. If one dead node is left over, the root of the row moves into it. Without
//!    a root, its sibling becomes the new root of the row and is set aside.
//! 5. A root that did not move is set aside as well.
//!
//! Nodes that received a new child are rehashed before their own row is
//! processed, and so are their ancestors. Once no row has dead nodes, the trees
//! set aside are written at the end of the forest, tallest first.
//!
//! Forest of 6 leaves with deleted leaves {1, 4} (`x`): leaf 5 fills the hole
//! left by leaf 1, and the parent of leaves 4 and 5 is dead in row 1, where
//! the root of the row is dropped.
//!
//! ```ascii
//!  d                              d'
//!  |\                             |\
//!  a   b   c        ---->         a'  b
//!  |\  |\  |\                     |\  |\
//!  0 x 2 3 x 5                    0 5 2 3
//! ```
//!
//! Additions then append the new leaves with a binary-counter carry.
//! The number of roots is always the popcount of the number of leaves.
use tracing::trace;

use crate::accumulator::Leaf;
use crate::errors::UtreexoError;
use crate::position::{self, NodeId, Position};

/// Storage of a forest: the normalization algorithm is expressed in terms of these operations.
///
/// During deletions nodes are addressed in the layout of the forest before the modification.
pub(crate) trait Backend {
    /// Subtree taken out of the forest.
    type Subtree;

    /// Checks that the whole modification can be applied, before anything is changed.
    fn prepare(
        &mut self,
        deletions: &[Position],
        additions: &[Leaf],
        new_num_leaves: u64,
    ) -> Result<(), UtreexoError>;

    /// Moves the subtree at `from` into `to`, replacing a dead subtree of the same row.
    fn relocate(&mut self, from: NodeId, to: NodeId) -> Result<(), UtreexoError>;

    /// Recomputes the hash of the node at `id` from its children.
    fn rehash(&mut self, id: NodeId) -> Result<(), UtreexoError>;

    /// Sets aside the subtree at `id`: it becomes one of the new roots.
    fn detach(&mut self, id: NodeId) -> Result<Self::Subtree, UtreexoError>;

    /// Ends the deletions. Roots at rows `settled_row` and above stay where they are,
    /// the subtrees set aside are given as `(row, subtree)` from the tallest.
    fn settle(
        &mut self,
        num_leaves: u64,
        settled_row: u8,
        detached: Vec<(u8, Self::Subtree)>,
    ) -> Result<(), UtreexoError>;

    /// Appends a leaf as the last root of the forest.
    fn append(&mut self, leaf: &Leaf) -> Result<(), UtreexoError>;

    /// Joins the two last roots of the forest into their parent at `id`.
    fn join(&mut self, id: NodeId) -> Result<(), UtreexoError>;

    /// Ends the modification.
    fn finish(&mut self, num_leaves: u64);
}

/// Applies deletions and then additions. Returns the new number of leaves.
/// The backend is not touched if the modification is rejected.
pub(crate) fn normalize<B: Backend>(
    backend: &mut B,
    num_leaves: u64,
    additions: &[Leaf],
    deletions: &[Position],
) -> Result<u64, UtreexoError> {
    let deletions = sorted_deletions(num_leaves, deletions)?;
    let remaining = num_leaves - deletions.len() as u64;
    let new_num_leaves = remaining
        .checked_add(additions.len() as u64)
        .ok_or(UtreexoError::TooManyLeaves)?;
    backend.prepare(&deletions, additions, new_num_leaves)?;

    if !deletions.is_empty() {
        remove(backend, num_leaves, deletions)?;
    }

    let mut count = remaining;
    for leaf in additions {
        backend.append(leaf)?;
        let mut id = NodeId::leaf(count);
        count += 1;
        while !id.is_left() {
            id = id.parent();
            backend.join(id)?;
        }
    }

    backend.finish(new_num_leaves);
    Ok(new_num_leaves)
}

/// Validates the deletions against the number of leaves and sorts them.
pub(crate) fn sorted_deletions(
    num_leaves: u64,
    deletions: &[Position],
) -> Result<Vec<Position>, UtreexoError> {
    let mut sorted = deletions.to_vec();
    sorted.sort_unstable();
    if let Some(&last) = sorted.last() {
        if last >= num_leaves {
            return Err(UtreexoError::DeletionOutOfRange(last));
        }
    }
    if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(UtreexoError::DuplicateDeletion(w[0]));
    }
    Ok(sorted)
}

/// Removes the sorted, distinct leaves from a forest of `num_leaves`.
fn remove<B: Backend>(
    backend: &mut B,
    num_leaves: u64,
    deletions: Vec<Position>,
) -> Result<(), UtreexoError> {
    let remaining = num_leaves - deletions.len() as u64;
    let mut dead = deletions;
    let mut dirty: Vec<u64> = Vec::new();
    let mut detached = Vec::new();
    let mut row = 0u8;

    while !dead.is_empty() {
        for &offset in dirty.iter() {
            backend.rehash(NodeId::new(row, offset))?;
        }
        let plan = RowPlan::new(num_leaves, row, &dead);
        trace!(
            row,
            dead = dead.len(),
            moved = plan.moves.len(),
            "compacting row"
        );
        for &(from, to) in plan.moves.iter() {
            backend.relocate(NodeId::new(row, from), NodeId::new(row, to))?;
        }
        if let Some(offset) = plan.detached {
            detached.push((row, backend.detach(NodeId::new(row, offset))?));
        }

        let mut parents: Vec<u64> = dirty
            .iter()
            .filter(|&&offset| !plan.vacated(offset))
            .chain(plan.moves.iter().map(|(_, to)| to))
            .map(|&offset| offset >> 1)
            .filter(|parent| plan.next_dead.binary_search(parent).is_err())
            .collect();
        parents.sort_unstable();
        parents.dedup();

        dirty = parents;
        dead = plan.next_dead;
        row += 1;
    }

    // rows above are untouched except for the paths leading to the moved nodes
    let settled_row = row;
    while !dirty.is_empty() {
        for &offset in dirty.iter() {
            backend.rehash(NodeId::new(row, offset))?;
        }
        let mut parents: Vec<u64> = dirty
            .iter()
            .filter(|&&offset| !position::is_root(remaining, NodeId::new(row, offset)))
            .map(|&offset| offset >> 1)
            .collect();
        parents.dedup();
        dirty = parents;
        row += 1;
    }

    detached.reverse();
    debug_assert_eq!(
        position::roots(num_leaves)
            .filter(|id| id.row >= settled_row)
            .count()
            + detached.len(),
        position::num_roots(remaining)
    );
    backend.settle(remaining, settled_row, detached)
}

/// Changes to one row of the forest during deletions.
#[derive(Debug, Default, PartialEq)]
struct RowPlan {
    /// Subtrees moving into dead nodes, as `(from, to)`.
    moves: Vec<(u64, u64)>,
    /// Subtree set aside as the new root of the row.
    detached: Option<u64>,
    /// Dead nodes in the next row, sorted.
    next_dead: Vec<u64>,
}

impl RowPlan {
    /// Plans the row given its sorted dead nodes.
    fn new(num_leaves: u64, row: u8, dead: &[u64]) -> Self {
        let count = num_leaves >> row;
        let mut root = if count & 1 == 1 { Some(count - 1) } else { None };
        let mut dead = dead;
        if let (Some(r), Some((&last, rest))) = (root, dead.split_last()) {
            if last == r {
                dead = rest;
                root = None;
            }
        }

        let mut plan = RowPlan::default();
        let mut lone = Vec::with_capacity(dead.len());
        let mut i = 0;
        while i < dead.len() {
            let offset = dead[i];
            if offset & 1 == 0 && dead.get(i + 1) == Some(&(offset + 1)) {
                plan.next_dead.push(offset >> 1);
                i += 2;
            } else {
                lone.push(offset);
                i += 1;
            }
        }

        for pair in lone.chunks(2) {
            match *pair {
                [to, other] => {
                    plan.moves.push((other ^ 1, to));
                    plan.next_dead.push(other >> 1);
                }
                [last] => match root.take() {
                    Some(r) => plan.moves.push((r, last)),
                    None => {
                        plan.detached = Some(last ^ 1);
                        plan.next_dead.push(last >> 1);
                    }
                },
                _ => {}
            }
        }
        if let Some(r) = root {
            plan.detached = Some(r);
        }

        plan.next_dead.sort_unstable();
        plan
    }

    /// Returns true if the node at `offset` leaves its place.
    fn vacated(&self, offset: u64) -> bool {
        self.detached == Some(offset) || self.moves.iter().any(|&(from, _)| from == offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::Hash;

    #[test]
    fn deletions_are_validated() {
        assert_eq!(sorted_deletions(8, &[5, 1, 3]), Ok(vec![1, 3, 5]));
        assert_eq!(
            sorted_deletions(8, &[2, 8]),
            Err(UtreexoError::DeletionOutOfRange(8))
        );
        assert_eq!(
            sorted_deletions(8, &[2, 6, 2]),
            Err(UtreexoError::DuplicateDeletion(2))
        );
        assert_eq!(
            sorted_deletions(0, &[0]),
            Err(UtreexoError::DeletionOutOfRange(0))
        );
    }

    #[test]
    fn row_plans() {
        // siblings die together
        assert_eq!(
            RowPlan::new(8, 0, &[2, 3]),
            RowPlan {
                moves: vec![],
                detached: None,
                next_dead: vec![1],
            }
        );
        // the second sibling fills the first hole
        assert_eq!(
            RowPlan::new(16, 0, &[0, 9]),
            RowPlan {
                moves: vec![(8, 0)],
                detached: None,
                next_dead: vec![4],
            }
        );
        // the root fills the last hole
        assert_eq!(
            RowPlan::new(7, 0, &[3]),
            RowPlan {
                moves: vec![(6, 3)],
                detached: None,
                next_dead: vec![],
            }
        );
        // without a root the sibling becomes one
        assert_eq!(
            RowPlan::new(8, 1, &[0]),
            RowPlan {
                moves: vec![],
                detached: Some(1),
                next_dead: vec![0],
            }
        );
        // a dead root is dropped, an untouched one is set aside
        assert_eq!(RowPlan::new(3, 1, &[0]), RowPlan::default());
        assert_eq!(
            RowPlan::new(3, 0, &[0, 1]),
            RowPlan {
                moves: vec![],
                detached: Some(2),
                next_dead: vec![0],
            }
        );
    }

    /// Backend that tracks only where the leaves are.
    #[derive(Default)]
    struct Layout {
        leaves: Vec<u64>,
    }

    fn range(id: NodeId) -> core::ops::Range<usize> {
        let start = id.first_leaf() as usize;
        start..start + id.capacity() as usize
    }

    impl Backend for Layout {
        type Subtree = Vec<u64>;

        fn prepare(&mut self, _: &[Position], _: &[Leaf], _: u64) -> Result<(), UtreexoError> {
            Ok(())
        }

        fn relocate(&mut self, from: NodeId, to: NodeId) -> Result<(), UtreexoError> {
            self.leaves.copy_within(range(from), to.first_leaf() as usize);
            Ok(())
        }

        fn rehash(&mut self, _id: NodeId) -> Result<(), UtreexoError> {
            Ok(())
        }

        fn detach(&mut self, id: NodeId) -> Result<Vec<u64>, UtreexoError> {
            Ok(self.leaves[range(id)].to_vec())
        }

        fn settle(
            &mut self,
            num_leaves: u64,
            _settled_row: u8,
            detached: Vec<(u8, Vec<u64>)>,
        ) -> Result<(), UtreexoError> {
            for (row, leaves) in detached {
                let id = NodeId::new(row, (num_leaves >> row) - 1);
                self.leaves[range(id)].copy_from_slice(&leaves);
            }
            self.leaves.truncate(num_leaves as usize);
            Ok(())
        }

        fn append(&mut self, leaf: &Leaf) -> Result<(), UtreexoError> {
            self.leaves.push(1000 + u64::from(leaf.hash.0[0]));
            Ok(())
        }

        fn join(&mut self, _id: NodeId) -> Result<(), UtreexoError> {
            Ok(())
        }

        fn finish(&mut self, num_leaves: u64) {
            assert_eq!(self.leaves.len() as u64, num_leaves);
        }
    }

    fn layout(num_leaves: u64, additions: u8, deletions: &[Position]) -> Vec<u64> {
        let mut backend = Layout {
            leaves: (0..num_leaves).collect(),
        };
        let additions: Vec<Leaf> = (0..additions)
            .map(|i| {
                let mut hash = Hash::default();
                hash.0[0] = i;
                Leaf::new(hash)
            })
            .collect();
        normalize(&mut backend, num_leaves, &additions, deletions).unwrap();
        backend.leaves
    }

    #[test]
    fn additions_keep_order() {
        assert_eq!(layout(5, 3, &[]), vec![0, 1, 2, 3, 4, 1000, 1001, 1002]);
        assert_eq!(layout(0, 3, &[]), vec![1000, 1001, 1002]);
    }

    #[test]
    fn deletions_compact_in_place() {
        // the last leaf goes away without moving anything
        assert_eq!(layout(8, 0, &[7]), vec![0, 1, 2, 3, 4, 5, 6]);
        // the single leaf root fills the hole
        assert_eq!(layout(7, 0, &[0]), vec![6, 1, 2, 3, 4, 5]);
        // subtrees {1}, {2,3}, {4..7} become the three roots
        assert_eq!(layout(8, 0, &[0]), vec![4, 5, 6, 7, 2, 3, 1]);
        // the root of row 1 fills the dead parent of leaves 0 and 1
        assert_eq!(layout(6, 0, &[0]), vec![4, 5, 2, 3, 1]);
        assert_eq!(layout(6, 0, &[1, 4]), vec![0, 5, 2, 3]);
        assert_eq!(layout(3, 0, &[0, 1]), vec![2]);
        assert_eq!(layout(2, 0, &[0, 1]), Vec::<u64>::new());
        assert_eq!(
            layout(16, 0, &[0, 2, 3, 9]),
            vec![8, 1, 10, 11, 4, 5, 6, 7, 12, 13, 14, 15]
        );
    }

    #[test]
    fn additions_follow_deletions() {
        assert_eq!(layout(8, 2, &[0]), vec![4, 5, 6, 7, 2, 3, 1, 1000, 1001]);
    }

    #[test]
    fn every_deletion_set_leaves_a_packed_forest() {
        for num_leaves in 1..=12u64 {
            for mask in 0..(1u32 << num_leaves) {
                let deletions: Vec<u64> = (0..num_leaves)
                    .filter(|&i| mask & (1 << i) != 0)
                    .collect();
                let mut leaves = layout(num_leaves, 0, &deletions);
                leaves.sort_unstable();
                let expected: Vec<u64> = (0..num_leaves)
                    .filter(|i| !deletions.contains(i))
                    .collect();
                assert_eq!(leaves, expected, "deleted {:?}", deletions);
            }
        }
    }
}
