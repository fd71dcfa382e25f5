use readerwriter::ReadError;
use thiserror::Error;

/// Represents an error in accumulator modification, proof creation, verification, or parsing.
#[derive(Error, Clone, Debug, Eq, PartialEq)]
pub enum UtreexoError {
    /// This error occurs when the proof does not lead to the stored roots,
    /// or does not carry enough data to reach them.
    #[error("Merkle proof is invalid")]
    InvalidProof,

    /// A deletion refers to a position past the last leaf.
    #[error("Deleted position {0} is out of range")]
    DeletionOutOfRange(u64),

    /// The same position is deleted twice in one modification.
    #[error("Position {0} is deleted more than once")]
    DuplicateDeletion(u64),

    /// A proof was requested for a hash that is not in the forest.
    #[error("Leaf is not present in the forest")]
    MissingLeaf,

    /// The pruned forest does not hold the subtree needed to apply a deletion.
    #[error("Node at row {row}, offset {offset} is not cached")]
    MissingNode {
        /// Row of the missing node.
        row: u8,
        /// Offset of the missing node within its row.
        offset: u64,
    },

    /// All slots of the node pool are taken.
    #[error("Node pool is exhausted")]
    PoolExhausted,

    /// The forest cannot hold that many leaves.
    #[error("Too many leaves in the forest")]
    TooManyLeaves,

    /// The encoded proof is malformed.
    #[error("Malformed proof encoding: {0}")]
    Malformed(ReadError),
}

impl From<ReadError> for UtreexoError {
    fn from(e: ReadError) -> UtreexoError {
        UtreexoError::Malformed(e)
    }
}
