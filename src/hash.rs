//! Digests and the domain-separated hashing rules of the accumulator.
use core::marker::PhantomData;
use merlin::Transcript;
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Merkle hash of a node.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

/// MerkleItem defines an item in the Merkle tree.
pub trait MerkleItem: Sized {
    /// Commits the hash of the item to Transcript.
    fn commit(&self, t: &mut Transcript);
}

/// Parent-combination rule shared by all representations of the accumulator.
///
/// Implementations must keep this mode separate from how leaves are hashed,
/// so that a leaf digest never equals the digest of an inner node.
pub trait NodeHasher {
    /// Computes hash of the inner node from the hashes of its left and right children.
    fn intermediate(&self, left: &Hash, right: &Hash) -> Hash;
}

/// Precomputed hash instance.
pub struct Hasher<M: MerkleItem> {
    t: Transcript,
    phantom: PhantomData<M>,
}

/// Utreexo-labeled hasher for the leaves and inner nodes.
pub fn utreexo_hasher<M: MerkleItem>() -> Hasher<M> {
    Hasher::new(b"utreexo")
}

impl Hash {
    /// Compares two hashes in constant time.
    pub fn ct_eq(&self, other: &Hash) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", hex::encode(&self.0))
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Hash {
    fn from(bytes: [u8; 32]) -> Self {
        Hash(bytes)
    }
}

impl MerkleItem for Hash {
    fn commit(&self, t: &mut Transcript) {
        t.append_message(b"hash", &self.0);
    }
}

impl<T> MerkleItem for &T
where
    T: MerkleItem,
{
    fn commit(&self, t: &mut Transcript) {
        T::commit(*self, t)
    }
}

impl<M: MerkleItem> Clone for Hasher<M> {
    fn clone(&self) -> Self {
        Self {
            t: self.t.clone(),
            phantom: self.phantom,
        }
    }
}

impl<M: MerkleItem> Hasher<M> {
    /// Creates a new hasher instance.
    pub fn new(label: &'static [u8]) -> Self {
        Self {
            t: Transcript::new(label),
            phantom: PhantomData,
        }
    }

    /// Computes hash of the leaf node in a merkle tree.
    pub fn leaf(&self, item: &M) -> Hash {
        let mut t = self.t.clone();
        item.commit(&mut t);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.leaf", &mut hash.0);
        hash
    }

    /// Computes hash of the inner node in a merkle tree (that contains left/right child nodes).
    pub fn intermediate(&self, left: &Hash, right: &Hash) -> Hash {
        let mut t = self.t.clone();
        t.append_message(b"L", &left.0);
        t.append_message(b"R", &right.0);
        let mut hash = Hash::default();
        t.challenge_bytes(b"merkle.node", &mut hash.0);
        hash
    }
}

impl<M: MerkleItem> NodeHasher for Hasher<M> {
    fn intermediate(&self, left: &Hash, right: &Hash) -> Hash {
        Hasher::intermediate(self, left, right)
    }
}

impl<H: NodeHasher> NodeHasher for &H {
    fn intermediate(&self, left: &Hash, right: &Hash) -> Hash {
        H::intermediate(*self, left, right)
    }
}
