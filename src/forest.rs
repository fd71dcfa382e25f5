//! Full forest: keeps every node of every tree in a flat array.
use core::fmt;
use std::collections::HashMap;
use tracing::{debug, trace};

use crate::accumulator::{Accumulator, Leaf};
use crate::errors::UtreexoError;
use crate::hash::{Hash, NodeHasher};
use crate::normalize::{normalize, Backend};
use crate::position::{self, NodeId, Position};
use crate::proof::{self, BatchProof};

/// Forest that stores all the hashes and can prove any of its leaves.
///
/// Nodes live in a single vector addressed by [`position::flat_position`]:
/// the leaves first, then every row above them up to the row of the tallest
/// possible tree.
pub struct Forest<H: NodeHasher> {
    hasher: H,
    num_leaves: u64,
    rows: u8,
    storage: Vec<Hash>,
    index: HashMap<Hash, Position>,
}

impl<H: NodeHasher> Forest<H> {
    /// Creates an empty forest.
    pub fn new(hasher: H) -> Self {
        Forest {
            hasher,
            num_leaves: 0,
            rows: 0,
            storage: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a proof for the given leaf hashes.
    ///
    /// Targets in the proof are sorted by position and duplicates are collapsed,
    /// so the hashes passed to `verify` must follow `proof.targets()`.
    pub fn prove(&self, targets: &[Hash]) -> Result<BatchProof, UtreexoError> {
        let mut positions = targets
            .iter()
            .map(|h| self.position_of(h).ok_or(UtreexoError::MissingLeaf))
            .collect::<Result<Vec<_>, _>>()?;
        positions.sort_unstable();
        positions.dedup();

        let hashes = proof::proof_positions(self.num_leaves, &positions)
            .into_iter()
            .map(|id| self.hash_at(id))
            .collect();
        Ok(BatchProof::new(positions, hashes))
    }

    /// Hash of the leaf at the position.
    pub fn leaf(&self, position: Position) -> Option<Hash> {
        if position < self.num_leaves {
            Some(self.hash_at(NodeId::leaf(position)))
        } else {
            None
        }
    }

    /// Returns true if any leaf has this hash.
    pub fn contains(&self, hash: &Hash) -> bool {
        self.index.contains_key(hash)
    }

    /// Position of the leaf with this hash.
    /// If several leaves share the hash, the one placed last is returned.
    pub fn position_of(&self, hash: &Hash) -> Option<Position> {
        self.index.get(hash).copied()
    }

    fn hash_at(&self, id: NodeId) -> Hash {
        self.storage[self.slot(id)]
    }
}

impl<H: NodeHasher> Accumulator for Forest<H> {
    fn modify(&mut self, additions: &[Leaf], deletions: &[Position]) -> Result<(), UtreexoError> {
        let num_leaves = self.num_leaves;
        let num_leaves = normalize(self, num_leaves, additions, deletions)?;
        debug!(
            num_leaves,
            added = additions.len(),
            deleted = deletions.len(),
            "full forest modified"
        );
        Ok(())
    }

    fn verify(&mut self, proof: &BatchProof, targets: &[Hash]) -> Result<(), UtreexoError> {
        proof::check_targets(self.num_leaves, proof, targets)?;
        let mut hashes = proof.hashes().iter();
        let climb = proof::climb(
            &self.hasher,
            self.num_leaves,
            proof.targets(),
            targets,
            |_| hashes.next().copied().ok_or(UtreexoError::InvalidProof),
        )?;
        proof::check_roots(self.num_leaves, &self.roots(), &climb.roots)?;
        trace!(targets = targets.len(), "proof verified by the full forest");
        Ok(())
    }

    fn roots(&self) -> Vec<Hash> {
        position::roots(self.num_leaves)
            .map(|id| self.hash_at(id))
            .collect()
    }

    fn num_leaves(&self) -> u64 {
        self.num_leaves
    }
}

/// Rows of the subtree at `id`, from its root down to its leaves,
/// as the first node of each row and the number of nodes in it.
fn subtree_rows(id: NodeId) -> impl Iterator<Item = (NodeId, usize)> {
    (0..=id.row).map(move |depth| {
        let first = NodeId::new(id.row - depth, id.offset << depth);
        (first, 1 << depth)
    })
}

impl<H: NodeHasher> Forest<H> {
    fn slot(&self, id: NodeId) -> usize {
        position::flat_position(id, self.rows) as usize
    }

    /// Moves the storage to a layout with the given number of rows.
    fn relayout(&mut self, rows: u8) {
        let mut storage = vec![Hash::default(); position::flat_len(rows)];
        if !self.storage.is_empty() {
            for row in 0..=rows.min(self.rows) {
                let count = (self.num_leaves >> row) as usize;
                let src = self.slot(NodeId::new(row, 0));
                let dst = position::flat_position(NodeId::new(row, 0), rows) as usize;
                storage[dst..dst + count].copy_from_slice(&self.storage[src..src + count]);
            }
        }
        trace!(from = self.rows, to = rows, "full forest storage resized");
        self.storage = storage;
        self.rows = rows;
    }

    /// Points the index to the leaves under `id`.
    fn index_leaves(&mut self, id: NodeId) {
        let first = id.first_leaf();
        let start = self.slot(NodeId::leaf(first));
        for (i, hash) in self.storage[start..start + id.capacity() as usize]
            .iter()
            .enumerate()
        {
            self.index.insert(*hash, first + i as u64);
        }
    }

    fn recompute(&mut self, id: NodeId) {
        let (l, r) = id.children();
        let hash = self.hasher.intermediate(&self.hash_at(l), &self.hash_at(r));
        let slot = self.slot(id);
        self.storage[slot] = hash;
    }
}

impl<H: NodeHasher> Backend for Forest<H> {
    /// Hashes of the subtree, row by row from its root.
    type Subtree = Vec<Hash>;

    fn prepare(
        &mut self,
        deletions: &[Position],
        _additions: &[Leaf],
        new_num_leaves: u64,
    ) -> Result<(), UtreexoError> {
        let rows = position::forest_rows(new_num_leaves).max(self.rows);
        if new_num_leaves > 0 && (self.storage.is_empty() || rows > self.rows) {
            self.relayout(rows);
        }
        for &p in deletions {
            let hash = self.hash_at(NodeId::leaf(p));
            if self.index.get(&hash) == Some(&p) {
                self.index.remove(&hash);
            }
        }
        Ok(())
    }

    fn relocate(&mut self, from: NodeId, to: NodeId) -> Result<(), UtreexoError> {
        for ((src, width), (dst, _)) in subtree_rows(from).zip(subtree_rows(to)) {
            let src = self.slot(src);
            let dst = self.slot(dst);
            self.storage.copy_within(src..src + width, dst);
        }
        self.index_leaves(to);
        Ok(())
    }

    fn rehash(&mut self, id: NodeId) -> Result<(), UtreexoError> {
        self.recompute(id);
        Ok(())
    }

    fn detach(&mut self, id: NodeId) -> Result<Vec<Hash>, UtreexoError> {
        let mut hashes = Vec::with_capacity(2 * id.capacity() as usize - 1);
        for (first, width) in subtree_rows(id) {
            let start = self.slot(first);
            hashes.extend_from_slice(&self.storage[start..start + width]);
        }
        Ok(hashes)
    }

    fn settle(
        &mut self,
        num_leaves: u64,
        _settled_row: u8,
        detached: Vec<(u8, Vec<Hash>)>,
    ) -> Result<(), UtreexoError> {
        for (row, hashes) in detached {
            let id = NodeId::new(row, (num_leaves >> row) - 1);
            let mut rest = &hashes[..];
            for (first, width) in subtree_rows(id) {
                let start = self.slot(first);
                let (head, tail) = rest.split_at(width);
                self.storage[start..start + width].copy_from_slice(head);
                rest = tail;
            }
            self.index_leaves(id);
        }
        self.num_leaves = num_leaves;
        Ok(())
    }

    fn append(&mut self, leaf: &Leaf) -> Result<(), UtreexoError> {
        let slot = self.slot(NodeId::leaf(self.num_leaves));
        self.storage[slot] = leaf.hash;
        self.index.insert(leaf.hash, self.num_leaves);
        self.num_leaves += 1;
        Ok(())
    }

    fn join(&mut self, id: NodeId) -> Result<(), UtreexoError> {
        self.recompute(id);
        Ok(())
    }

    fn finish(&mut self, num_leaves: u64) {
        self.num_leaves = num_leaves;
        if num_leaves == 0 {
            self.storage = Vec::new();
            self.rows = 0;
        } else if position::forest_rows(num_leaves) < self.rows {
            self.relayout(position::forest_rows(num_leaves));
        }
    }
}

impl<H: NodeHasher> fmt::Debug for Forest<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utreexo::Forest{{\n")?;
        for id in position::roots(self.num_leaves) {
            write!(f, "  [{}] {}\n", id.row, hex::encode(&self.hash_at(id).0))?;
        }
        write!(f, "}}")
    }
}
