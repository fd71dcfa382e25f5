//! Batch proofs of inclusion and the climb from the proven leaves to the roots.
use readerwriter::{varint_length, Decodable, Encodable, ReadError, Reader, WriteError, Writer};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;

use crate::errors::UtreexoError;
use crate::hash::{Hash, NodeHasher};
use crate::position::{self, NodeId, Position};

/// Upper bound on the number of targets or hashes in an encoded proof.
pub const MAX_PROOF_ITEMS: usize = 1 << 24;

/// Proof that a set of leaves belongs to the forest.
///
/// `targets` are leaf positions in ascending order. `hashes` are the neighbors
/// that cannot be computed from the targets, listed row by row from the leaves up,
/// and from left to right within a row.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct BatchProof {
    targets: Vec<Position>,
    hashes: Vec<Hash>,
}

impl BatchProof {
    /// Creates a proof from its parts.
    pub fn new(targets: Vec<Position>, hashes: Vec<Hash>) -> Self {
        BatchProof { targets, hashes }
    }

    /// Positions of the proven leaves.
    pub fn targets(&self) -> &[Position] {
        &self.targets
    }

    /// Neighbor hashes.
    pub fn hashes(&self) -> &[Hash] {
        &self.hashes
    }

    /// Encodes the proof in its wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }

    /// Decodes the proof, rejecting malformed or trailing data.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self, UtreexoError> {
        let proof = bytes.parse(|r| BatchProof::decode(r))?;
        Ok(proof)
    }
}

impl Encodable for BatchProof {
    type Error = WriteError;

    fn encode(&self, w: &mut impl Writer) -> Result<(), WriteError> {
        w.write_varint(b"num_targets", self.targets.len() as u64)?;
        for target in self.targets.iter() {
            w.write_u64(b"target", *target)?;
        }
        w.write_varint(b"num_hashes", self.hashes.len() as u64)?;
        for hash in self.hashes.iter() {
            w.write(b"hash", &hash.0)?;
        }
        Ok(())
    }

    fn encoded_length(&self) -> usize {
        varint_length(self.targets.len() as u64)
            + 8 * self.targets.len()
            + varint_length(self.hashes.len() as u64)
            + 32 * self.hashes.len()
    }
}

impl Decodable for BatchProof {
    type Error = ReadError;

    fn decode(r: &mut impl Reader) -> Result<Self, ReadError> {
        let n = r.read_length(8, MAX_PROOF_ITEMS)?;
        let targets = (0..n)
            .map(|_| r.read_u64())
            .collect::<Result<Vec<_>, _>>()?;
        let m = r.read_length(32, MAX_PROOF_ITEMS)?;
        let hashes = (0..m)
            .map(|_| r.read_u8x32().map(Hash))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(BatchProof { targets, hashes })
    }
}

/// Returns true if the targets are strictly ascending leaf positions of the forest.
pub(crate) fn valid_targets(num_leaves: u64, targets: &[Position]) -> bool {
    targets.windows(2).all(|w| w[0] < w[1]) && targets.last().map_or(true, |&t| t < num_leaves)
}

/// Rejects proofs whose targets do not line up with the leaves or with the forest.
pub(crate) fn check_targets(
    num_leaves: u64,
    proof: &BatchProof,
    leaves: &[Hash],
) -> Result<(), UtreexoError> {
    if proof.targets.len() != leaves.len() || !valid_targets(num_leaves, &proof.targets) {
        return Err(UtreexoError::InvalidProof);
    }
    Ok(())
}

/// Positions of the proof hashes needed to climb from `targets` to their roots,
/// in the order they are consumed.
pub(crate) fn proof_positions(num_leaves: u64, targets: &[Position]) -> Vec<NodeId> {
    let mut walker = Positions(Vec::new());
    let leaves = targets.iter().map(|&t| (t, ())).collect();
    match walk(num_leaves, leaves, &mut walker) {
        Ok(()) => walker.0,
        Err(never) => match never {},
    }
}

/// Result of climbing from a set of leaves to their roots.
pub(crate) struct Climb {
    /// Recomputed roots of the trees that contain the leaves.
    pub(crate) roots: Vec<(NodeId, Hash)>,
    /// Every node touched on the way: leaves, neighbors and parents.
    pub(crate) nodes: HashMap<NodeId, Hash>,
}

/// Recomputes the roots over `targets` with `leaves` as their hashes.
/// `neighbor` is asked for the hashes at `proof_positions`, in order.
pub(crate) fn climb<H, F>(
    hasher: &H,
    num_leaves: u64,
    targets: &[Position],
    leaves: &[Hash],
    neighbor: F,
) -> Result<Climb, UtreexoError>
where
    H: NodeHasher,
    F: FnMut(NodeId) -> Result<Hash, UtreexoError>,
{
    let mut walker = Hashes {
        hasher,
        neighbor,
        climb: Climb {
            roots: Vec::new(),
            nodes: HashMap::new(),
        },
    };
    for (&t, &h) in targets.iter().zip(leaves.iter()) {
        walker.climb.nodes.insert(NodeId::leaf(t), h);
    }
    let start = targets.iter().copied().zip(leaves.iter().copied()).collect();
    walk(num_leaves, start, &mut walker)?;
    Ok(walker.climb)
}

/// Checks the recomputed roots against the stored ones.
pub(crate) fn check_roots(
    num_leaves: u64,
    stored: &[Hash],
    computed: &[(NodeId, Hash)],
) -> Result<(), UtreexoError> {
    for (id, hash) in computed.iter() {
        let matches = position::roots(num_leaves)
            .zip(stored.iter())
            .find(|(root, _)| root == id)
            .map_or(false, |(_, stored)| stored.ct_eq(hash));
        if !matches {
            return Err(UtreexoError::InvalidProof);
        }
    }
    Ok(())
}

/// Steps of the climb.
trait Walker {
    type Item;
    type Error;
    /// Provides the neighbor that is not known from the leaves.
    fn neighbor(&mut self, id: NodeId) -> Result<Self::Item, Self::Error>;
    /// Combines two children into their parent.
    fn join(&mut self, parent: NodeId, left: Self::Item, right: Self::Item) -> Self::Item;
    /// Receives the top of a tree.
    fn root(&mut self, id: NodeId, item: Self::Item);
}

/// Climbs row by row from the sorted, unique leaves at row 0 up to the roots.
fn walk<W: Walker>(
    num_leaves: u64,
    leaves: Vec<(u64, W::Item)>,
    walker: &mut W,
) -> Result<(), W::Error> {
    let mut row = 0u8;
    let mut current = leaves;
    while !current.is_empty() {
        let mut next = Vec::with_capacity(current.len());
        let mut iter = current.into_iter().peekable();
        while let Some((offset, item)) = iter.next() {
            let id = NodeId::new(row, offset);
            if position::is_root(num_leaves, id) {
                walker.root(id, item);
                continue;
            }
            let sibling = id.sibling();
            let known = if iter.peek().map_or(false, |(o, _)| *o == sibling.offset) {
                iter.next().map(|(_, item)| item)
            } else {
                None
            };
            let neighbor = match known {
                Some(item) => item,
                None => walker.neighbor(sibling)?,
            };
            let (l, r) = if id.is_left() {
                (item, neighbor)
            } else {
                (neighbor, item)
            };
            next.push((offset >> 1, walker.join(id.parent(), l, r)));
        }
        current = next;
        row += 1;
    }
    Ok(())
}

struct Positions(Vec<NodeId>);

impl Walker for Positions {
    type Item = ();
    type Error = Infallible;

    fn neighbor(&mut self, id: NodeId) -> Result<(), Infallible> {
        self.0.push(id);
        Ok(())
    }

    fn join(&mut self, _parent: NodeId, _left: (), _right: ()) {}

    fn root(&mut self, _id: NodeId, _item: ()) {}
}

struct Hashes<'h, H, F> {
    hasher: &'h H,
    neighbor: F,
    climb: Climb,
}

impl<'h, H, F> Walker for Hashes<'h, H, F>
where
    H: NodeHasher,
    F: FnMut(NodeId) -> Result<Hash, UtreexoError>,
{
    type Item = Hash;
    type Error = UtreexoError;

    fn neighbor(&mut self, id: NodeId) -> Result<Hash, UtreexoError> {
        let hash = (self.neighbor)(id)?;
        self.climb.nodes.insert(id, hash);
        Ok(hash)
    }

    fn join(&mut self, parent: NodeId, left: Hash, right: Hash) -> Hash {
        let hash = self.hasher.intermediate(&left, &right);
        self.climb.nodes.insert(parent, hash);
        hash
    }

    fn root(&mut self, id: NodeId, item: Hash) {
        self.climb.roots.push((id, item));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::utreexo_hasher;

    fn ids(list: &[(u8, u64)]) -> Vec<NodeId> {
        list.iter().map(|&(r, o)| NodeId::new(r, o)).collect()
    }

    #[test]
    fn single_target_needs_full_path() {
        assert_eq!(proof_positions(8, &[0]), ids(&[(0, 1), (1, 1), (2, 1)]));
        assert_eq!(proof_positions(8, &[5]), ids(&[(0, 4), (1, 3), (2, 0)]));
        // the last leaf of 7 is a root on its own
        assert!(proof_positions(7, &[6]).is_empty());
    }

    #[test]
    fn joint_targets_share_neighbors() {
        // siblings are both targets: their neighbor at row 0 is not needed
        assert_eq!(proof_positions(8, &[0, 1]), ids(&[(1, 1), (2, 1)]));
        // 15 leaves: trees of 8, 4, 2, 1
        assert_eq!(
            proof_positions(15, &[0, 7, 8, 14]),
            ids(&[(0, 1), (0, 6), (0, 9), (1, 1), (1, 2), (1, 5)])
        );
    }

    #[test]
    fn climb_recomputes_root() {
        let hasher = utreexo_hasher::<Hash>();
        let leaves: Vec<Hash> = (0..4u8).map(|i| Hash([i; 32])).collect();
        let n01 = hasher.intermediate(&leaves[0], &leaves[1]);
        let n23 = hasher.intermediate(&leaves[2], &leaves[3]);
        let root = hasher.intermediate(&n01, &n23);

        let mut supplied = vec![leaves[0], n23].into_iter();
        let climb = climb(&hasher, 4, &[1], &[leaves[1]], |_| {
            supplied.next().ok_or(UtreexoError::InvalidProof)
        })
        .unwrap();
        assert_eq!(climb.roots, vec![(NodeId::new(2, 0), root)]);
        assert_eq!(climb.nodes.get(&NodeId::new(1, 0)), Some(&n01));
        assert!(check_roots(4, &[root], &climb.roots).is_ok());
        assert_eq!(
            check_roots(4, &[n01], &climb.roots),
            Err(UtreexoError::InvalidProof)
        );
    }

    #[test]
    fn targets_must_be_sorted_and_in_range() {
        assert!(valid_targets(8, &[]));
        assert!(valid_targets(8, &[0, 3, 7]));
        assert!(!valid_targets(8, &[3, 0]));
        assert!(!valid_targets(8, &[3, 3]));
        assert!(!valid_targets(8, &[8]));
    }

    #[test]
    fn encoding() {
        let proof = BatchProof::new(vec![1, 300], vec![Hash([7u8; 32])]);
        let bytes = proof.to_bytes();
        assert_eq!(bytes.len(), proof.encoded_length());
        assert_eq!(bytes.len(), 1 + 16 + 1 + 32);
        assert_eq!(bytes[0], 2);
        assert_eq!(&bytes[1..9], &1u64.to_le_bytes()[..]);
        assert_eq!(BatchProof::from_bytes(&bytes), Ok(proof));

        let empty = BatchProof::default();
        assert_eq!(empty.to_bytes(), vec![0, 0]);
        assert_eq!(BatchProof::from_bytes(&[0, 0]), Ok(empty));
    }

    #[test]
    fn malformed_encodings_are_rejected() {
        let proof = BatchProof::new(vec![0, 1], vec![Hash([1u8; 32]), Hash([2u8; 32])]);
        let bytes = proof.to_bytes();

        for len in 0..bytes.len() {
            assert_eq!(
                BatchProof::from_bytes(&bytes[..len]),
                Err(UtreexoError::Malformed(ReadError::InsufficientBytes))
            );
        }

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert_eq!(
            BatchProof::from_bytes(&trailing),
            Err(UtreexoError::Malformed(ReadError::TrailingBytes))
        );

        // declares 2^30 targets
        let huge = [0x80u8, 0x80, 0x80, 0x80, 0x04];
        assert_eq!(
            BatchProof::from_bytes(&huge),
            Err(UtreexoError::Malformed(ReadError::TooManyItems))
        );

        // declares more targets than there are bytes
        let short = [0x05u8, 0, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(
            BatchProof::from_bytes(&short),
            Err(UtreexoError::Malformed(ReadError::InsufficientBytes))
        );
    }
}
