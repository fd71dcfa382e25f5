#![deny(missing_docs)]
//! Utreexo: a dynamic accumulator of hashes.
//!
//! The accumulator commits to a set of leaves with a short list of Merkle roots,
//! one per set bit of the number of leaves. Leaves can be appended and deleted,
//! and batches of leaves proven against the roots.
//!
//! Two representations are provided:
//!
//! * [`Forest`] stores every node and can prove any leaf.
//! * [`Pollard`] stores the roots and the few nodes needed to prove the leaves
//!   it was asked to remember, in a fixed-size [`NodePool`].
//!
//! Both go through identical states when fed the same [`Accumulator::modify`] calls.

mod accumulator;
mod config;
mod errors;
mod forest;
mod hash;
mod normalize;
mod pollard;
mod pool;
pub mod position;
mod proof;


pub use self::accumulator::{Accumulator, Leaf};
pub use self::config::{Config, PollardConfig};
pub use self::errors::UtreexoError;
pub use self::forest::Forest;
pub use self::hash::{utreexo_hasher, Hash, Hasher, MerkleItem, NodeHasher};
pub use self::pollard::Pollard;
pub use self::pool::{NodePool, NodePtr, Recycle};
pub use self::position::{NodeId, Position};
pub use self::proof::{BatchProof, MAX_PROOF_ITEMS};
