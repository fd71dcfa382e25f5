//! Pruned forest: keeps the roots and only the nodes needed to prove remembered leaves.
use core::fmt;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace, warn};

use crate::accumulator::{Accumulator, Leaf};
use crate::config::Config;
use crate::errors::UtreexoError;
use crate::hash::{Hash, NodeHasher};
use crate::normalize::{normalize, Backend};
use crate::pool::{NodePool, NodePtr, Recycle};
use crate::position::{self, NodeId, Position};
use crate::proof::{self, BatchProof};

/// Node of the pruned forest.
///
/// A node has children only if its subtree contains a remembered leaf,
/// in which case `remember` is set. On leaves `remember` marks the leaf itself.
#[derive(Default)]
pub(crate) struct PolNode {
    hash: Hash,
    remember: bool,
    children: Option<(NodePtr<PolNode>, NodePtr<PolNode>)>,
}

impl PolNode {
    fn new(hash: Hash, remember: bool) -> Self {
        PolNode {
            hash,
            remember,
            children: None,
        }
    }
}

impl Recycle for PolNode {
    fn recycle(&mut self) {
        self.children = None;
    }
}

/// Pruned forest allocated in a fixed-size node pool.
pub struct Pollard<H: NodeHasher> {
    hasher: H,
    pool: NodePool<PolNode>,
    num_leaves: u64,
    roots: Vec<NodePtr<PolNode>>,
}

impl<H: NodeHasher> Pollard<H> {
    /// Creates an empty pruned forest with a pool of `max_nodes` nodes.
    pub fn new(hasher: H, max_nodes: usize) -> Self {
        Pollard {
            hasher,
            pool: NodePool::with_capacity(max_nodes),
            num_leaves: 0,
            roots: Vec::new(),
        }
    }

    /// Creates an empty pruned forest sized according to the config.
    pub fn from_config(hasher: H, config: &Config) -> Self {
        Self::new(hasher, config.pollard.max_nodes)
    }

    /// Forgets all the cached nodes, keeping only the roots.
    pub fn prune(&mut self) {
        let before = self.pool.len();
        for root in self.roots.iter() {
            let mut node = root.borrow_mut();
            node.children = None;
            node.remember = false;
        }
        debug!(released = before - self.pool.len(), "pruned forest pruned");
    }

    /// Number of nodes reachable from the roots, roots included.
    pub fn num_cached_nodes(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<NodePtr<PolNode>> = self.roots.clone();
        while let Some(node) = stack.pop() {
            count += 1;
            if let Some((l, r)) = children(&node) {
                stack.push(l);
                stack.push(r);
            }
        }
        count
    }

    /// Number of occupied slots in the node pool.
    pub fn pool_len(&self) -> usize {
        self.pool.len()
    }

    /// Handle of the root at `id`.
    fn root(&self, id: NodeId) -> Option<NodePtr<PolNode>> {
        let index = position::roots(self.num_leaves).position(|r| r == id)?;
        self.roots.get(index).cloned()
    }

    /// Finds the cached node at `id`.
    fn cached(&self, id: NodeId) -> Option<NodePtr<PolNode>> {
        if !position::exists(self.num_leaves, id) {
            return None;
        }
        let root_id = position::root_containing(self.num_leaves, id.first_leaf())?;
        if root_id.row < id.row {
            return None;
        }
        let mut node = self.root(root_id)?;
        for row in (id.row..root_id.row).rev() {
            node = match children(&node) {
                Some((l, _)) if id.ancestor(row).is_left() => l,
                Some((_, r)) => r,
                None => return None,
            };
        }
        Some(node)
    }

    fn has_children(&self, id: NodeId) -> bool {
        self.cached(id).map_or(false, |node| has_children(&node))
    }

    /// Returns the topmost node missing on the path from the root to the leaf.
    fn first_missing(&self, position: Position) -> Option<NodeId> {
        let leaf = NodeId::leaf(position);
        let root_id = match position::root_containing(self.num_leaves, position) {
            Some(id) => id,
            None => return Some(leaf),
        };
        let mut node = match self.root(root_id) {
            Some(node) => node,
            None => return Some(root_id),
        };
        for row in (0..root_id.row).rev() {
            let child = leaf.ancestor(row);
            node = match children(&node) {
                Some((l, _)) if child.is_left() => l,
                Some((_, r)) => r,
                None => return Some(child),
            };
        }
        None
    }

    /// Puts `node` at `id`, in place of the root or of a child of a cached node.
    fn replace(&mut self, id: NodeId, node: NodePtr<PolNode>) -> Result<(), UtreexoError> {
        if position::is_root(self.num_leaves, id) {
            let index = position::roots(self.num_leaves).position(|r| r == id);
            return match index.and_then(|i| self.roots.get_mut(i)) {
                Some(slot) => {
                    *slot = node;
                    Ok(())
                }
                None => Err(missing(id)),
            };
        }
        let parent = self.cached(id.parent()).ok_or_else(|| missing(id))?;
        let mut parent = parent.borrow_mut();
        match parent.children.as_mut() {
            Some((l, _)) if id.is_left() => *l = node,
            Some((_, r)) => *r = node,
            None => return Err(missing(id)),
        }
        Ok(())
    }

    /// Checks that the pool can take the new leaves.
    ///
    /// After deletions the new roots are not known yet, so they are counted as remembered:
    /// the check may then ask for a few more nodes than the additions use.
    fn reserve(&self, deletions: usize, additions: &[Leaf]) -> Result<(), UtreexoError> {
        // (row, forgotten) of the roots the new leaves may be joined with
        let mut roots: Vec<(u8, bool)> = if deletions == 0 {
            position::roots(self.num_leaves)
                .zip(self.roots.iter())
                .map(|(id, node)| (id.row, !is_remembered(node)))
                .collect()
        } else {
            position::roots(self.num_leaves - deletions as u64)
                .map(|id| (id.row, false))
                .collect()
        };
        let mut available = self.pool.available();
        let take = |available: &mut usize| {
            if *available == 0 {
                warn!(capacity = self.pool.capacity(), "node pool is exhausted");
                return Err(UtreexoError::PoolExhausted);
            }
            *available -= 1;
            Ok(())
        };

        for leaf in additions {
            take(&mut available)?;
            let (mut row, mut forgotten) = (0u8, !leaf.remember);
            while let Some(&(last_row, last_forgotten)) = roots.last() {
                if last_row != row {
                    break;
                }
                roots.pop();
                take(&mut available)?;
                forgotten = forgotten && last_forgotten;
                if forgotten {
                    // both children are released once their parent exists
                    available += 2;
                }
                row += 1;
            }
            roots.push((row, forgotten));
        }
        Ok(())
    }

    /// Neighbor hashes for the climb, taking cached nodes into account.
    fn neighbors(
        &self,
        positions: &[NodeId],
        proof: &BatchProof,
    ) -> Result<Vec<Hash>, UtreexoError> {
        let cached: Vec<Option<Hash>> = positions
            .iter()
            .map(|&id| self.cached(id).map(|node| hash_of(&node)))
            .collect();
        let supplied = proof.hashes();

        if supplied.len() == positions.len() {
            // one hash per position: the cached ones must agree
            let consistent = cached
                .iter()
                .zip(supplied.iter())
                .all(|(c, h)| c.map_or(true, |c| c.ct_eq(h)));
            if !consistent {
                return Err(UtreexoError::InvalidProof);
            }
            return Ok(supplied.to_vec());
        }

        // uncached positions take the supplied hashes in order, the rest is ignored
        let mut supplied = supplied.iter();
        cached
            .into_iter()
            .map(|c| c.or_else(|| supplied.next().copied()))
            .collect::<Option<Vec<_>>>()
            .ok_or(UtreexoError::InvalidProof)
    }

    /// Caches the path from the root to every target, so they can be proven later.
    fn remember_paths(
        &self,
        targets: &[Position],
        known: &HashMap<NodeId, Hash>,
    ) -> Result<(), UtreexoError> {
        // nodes that receive children, with the hashes of the children
        let mut expand: BTreeMap<NodeId, (Hash, Hash)> = BTreeMap::new();
        for &target in targets {
            let root = position::root_containing(self.num_leaves, target)
                .ok_or(UtreexoError::InvalidProof)?;
            for row in (1..=root.row).rev() {
                let id = NodeId::leaf(target).ancestor(row);
                if expand.contains_key(&id) || self.has_children(id) {
                    continue;
                }
                let (l, r) = id.children();
                let hashes = match (known.get(&l), known.get(&r)) {
                    (Some(l), Some(r)) => (*l, *r),
                    _ => return Err(UtreexoError::InvalidProof),
                };
                expand.insert(id, hashes);
            }
        }

        if self.pool.available() < 2 * expand.len() {
            warn!(
                needed = 2 * expand.len(),
                available = self.pool.available(),
                "node pool is exhausted"
            );
            return Err(UtreexoError::PoolExhausted);
        }

        for &target in targets {
            let mut id = position::root_containing(self.num_leaves, target)
                .ok_or(UtreexoError::InvalidProof)?;
            let mut node = self.root(id).ok_or(UtreexoError::InvalidProof)?;
            while id.row > 0 {
                let child = NodeId::leaf(target).ancestor(id.row - 1);
                {
                    let mut n = node.borrow_mut();
                    n.remember = true;
                    if n.children.is_none() {
                        if let Some((l, r)) = expand.get(&id) {
                            let l = self.alloc(PolNode::new(*l, false))?;
                            let r = self.alloc(PolNode::new(*r, false))?;
                            n.children = Some((l, r));
                        }
                    }
                }
                node = match children(&node) {
                    Some((l, _)) if child.is_left() => l,
                    Some((_, r)) => r,
                    None => return Err(UtreexoError::InvalidProof),
                };
                id = child;
            }
            node.borrow_mut().remember = true;
        }
        Ok(())
    }

    fn alloc(&self, node: PolNode) -> Result<NodePtr<PolNode>, UtreexoError> {
        self.pool.acquire(node).ok_or_else(|| {
            warn!(capacity = self.pool.capacity(), "node pool is exhausted");
            UtreexoError::PoolExhausted
        })
    }
}

fn hash_of(node: &NodePtr<PolNode>) -> Hash {
    node.borrow().hash
}

fn has_children(node: &NodePtr<PolNode>) -> bool {
    node.borrow().children.is_some()
}

fn children(node: &NodePtr<PolNode>) -> Option<(NodePtr<PolNode>, NodePtr<PolNode>)> {
    node.borrow().children.clone()
}

fn is_remembered(node: &NodePtr<PolNode>) -> bool {
    node.borrow().remember
}

fn missing(id: NodeId) -> UtreexoError {
    trace!(row = id.row, offset = id.offset, "node is not cached");
    UtreexoError::MissingNode {
        row: id.row,
        offset: id.offset,
    }
}

impl<H: NodeHasher> Accumulator for Pollard<H> {
    fn modify(&mut self, additions: &[Leaf], deletions: &[Position]) -> Result<(), UtreexoError> {
        let num_leaves = self.num_leaves;
        let num_leaves = normalize(self, num_leaves, additions, deletions)?;
        debug!(
            num_leaves,
            added = additions.len(),
            deleted = deletions.len(),
            pool_len = self.pool.len(),
            "pruned forest modified"
        );
        Ok(())
    }

    fn verify(&mut self, proof: &BatchProof, targets: &[Hash]) -> Result<(), UtreexoError> {
        proof::check_targets(self.num_leaves, proof, targets)?;
        let positions = proof::proof_positions(self.num_leaves, proof.targets());
        let neighbors = self.neighbors(&positions, proof)?;

        let mut neighbors = neighbors.into_iter();
        let climb = proof::climb(
            &self.hasher,
            self.num_leaves,
            proof.targets(),
            targets,
            |_| neighbors.next().ok_or(UtreexoError::InvalidProof),
        )?;
        proof::check_roots(self.num_leaves, &self.roots(), &climb.roots)?;

        self.remember_paths(proof.targets(), &climb.nodes)?;
        debug!(
            targets = targets.len(),
            pool_len = self.pool.len(),
            "proof verified by the pruned forest"
        );
        Ok(())
    }

    fn roots(&self) -> Vec<Hash> {
        self.roots.iter().map(hash_of).collect()
    }

    fn num_leaves(&self) -> u64 {
        self.num_leaves
    }
}

impl<H: NodeHasher> Backend for Pollard<H> {
    type Subtree = NodePtr<PolNode>;

    fn prepare(
        &mut self,
        deletions: &[Position],
        additions: &[Leaf],
        _new_num_leaves: u64,
    ) -> Result<(), UtreexoError> {
        if let Some(id) = deletions.iter().find_map(|&p| self.first_missing(p)) {
            return Err(missing(id));
        }
        self.reserve(deletions.len(), additions)
    }

    fn relocate(&mut self, from: NodeId, to: NodeId) -> Result<(), UtreexoError> {
        let node = self.cached(from).ok_or_else(|| missing(from))?;
        self.replace(to, node)
    }

    fn rehash(&mut self, id: NodeId) -> Result<(), UtreexoError> {
        let node = self.cached(id).ok_or_else(|| missing(id))?;
        let (l, r) = children(&node).ok_or_else(|| missing(id.children().0))?;
        let hash = self.hasher.intermediate(&hash_of(&l), &hash_of(&r));
        let remember = is_remembered(&l) || is_remembered(&r);

        let mut node = node.borrow_mut();
        node.hash = hash;
        node.remember = remember;
        if !remember {
            node.children = None;
        }
        Ok(())
    }

    fn detach(&mut self, id: NodeId) -> Result<NodePtr<PolNode>, UtreexoError> {
        // the handle left in place is released with the rest of the dead nodes
        self.cached(id).ok_or_else(|| missing(id))
    }

    fn settle(
        &mut self,
        num_leaves: u64,
        settled_row: u8,
        detached: Vec<(u8, NodePtr<PolNode>)>,
    ) -> Result<(), UtreexoError> {
        let mut roots: Vec<NodePtr<PolNode>> = position::roots(self.num_leaves)
            .zip(self.roots.iter())
            .filter(|(id, _)| id.row >= settled_row)
            .map(|(_, node)| node.clone())
            .collect();
        roots.extend(detached.into_iter().map(|(_, node)| node));

        let before = self.pool.len();
        self.roots = roots;
        self.num_leaves = num_leaves;
        trace!(released = before - self.pool.len(), "deletions applied");
        Ok(())
    }

    fn append(&mut self, leaf: &Leaf) -> Result<(), UtreexoError> {
        let node = self.alloc(PolNode::new(leaf.hash, leaf.remember))?;
        self.roots.push(node);
        self.num_leaves += 1;
        Ok(())
    }

    fn join(&mut self, id: NodeId) -> Result<(), UtreexoError> {
        let (right, left) = match (self.roots.pop(), self.roots.pop()) {
            (Some(r), Some(l)) => (r, l),
            _ => return Err(missing(id)),
        };
        let hash = self.hasher.intermediate(&hash_of(&left), &hash_of(&right));
        let remember = is_remembered(&left) || is_remembered(&right);
        let mut node = PolNode::new(hash, remember);
        if remember {
            node.children = Some((left, right));
        }
        let node = self.alloc(node)?;
        self.roots.push(node);
        Ok(())
    }

    fn finish(&mut self, num_leaves: u64) {
        debug_assert_eq!(self.num_leaves, num_leaves);
        debug_assert_eq!(self.roots.len(), position::num_roots(num_leaves));
    }
}

impl<H: NodeHasher> fmt::Debug for Pollard<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utreexo::Pollard{{\n")?;
        for (id, root) in position::roots(self.num_leaves).zip(self.roots.iter()) {
            root.borrow().debug_fmt(f, id.row, "  ")?;
        }
        write!(f, "}}")
    }
}

impl PolNode {
    fn debug_fmt(&self, f: &mut fmt::Formatter<'_>, row: u8, indent: &str) -> fmt::Result {
        write!(
            f,
            "{}[{}] {} ({})\n",
            indent,
            if self.remember { "x" } else { " " },
            hex::encode(&self.hash.0),
            row
        )?;
        if let Some((l, r)) = &self.children {
            let indent = indent.to_string() + "    ";
            l.borrow().debug_fmt(f, row - 1, &indent)?;
            r.borrow().debug_fmt(f, row - 1, &indent)?;
        }
        Ok(())
    }
}
