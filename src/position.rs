//! Arithmetic over the positions of a forest.
//!
//! The forest over `n` leaves is a list of perfect trees ordered from the tallest
//! to the shortest, one tree per set bit of `n`. Every tree of height `h` starts at
//! a leaf offset divisible by `2^h`, so a node is addressed by its `(row, offset)`:
//!
//! ```ascii
//!  row 2      (2,0)
//!            /     \
//!  row 1  (1,0)   (1,1)   (1,2)
//!         /  \    /  \    /  \
//!  row 0 0    1  2    3  4    5    6
//! ```
//!
//! Row `r` holds exactly `n >> r` nodes, and a root sits at the end of row `r`
//! iff bit `r` of `n` is set.

/// Absolute position of a leaf: its offset in the row 0 of the forest.
pub type Position = u64;

/// Maximum number of rows in a forest (trees of height 0 to 63).
pub const MAX_ROWS: usize = 64;

/// Address of a node within the forest.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId {
    /// Row of the node, 0 for leaves.
    pub row: u8,
    /// Offset of the node within its row.
    pub offset: u64,
}

impl NodeId {
    /// Creates a node address.
    pub fn new(row: u8, offset: u64) -> Self {
        NodeId { row, offset }
    }

    /// Address of the leaf at position.
    pub fn leaf(position: Position) -> Self {
        NodeId::new(0, position)
    }

    /// The other child of this node's parent.
    pub fn sibling(self) -> Self {
        NodeId::new(self.row, self.offset ^ 1)
    }

    /// Parent of this node.
    pub fn parent(self) -> Self {
        NodeId::new(self.row + 1, self.offset >> 1)
    }

    /// Left and right children of this node. Must not be called on leaves.
    pub fn children(self) -> (Self, Self) {
        debug_assert!(self.row > 0);
        let l = NodeId::new(self.row - 1, self.offset << 1);
        (l, l.sibling())
    }

    /// Returns true if this node is a left child.
    pub fn is_left(self) -> bool {
        self.offset & 1 == 0
    }

    /// Offset of the first leaf covered by this node.
    pub fn first_leaf(self) -> Position {
        self.offset << self.row
    }

    /// Number of leaves covered by this node.
    pub fn capacity(self) -> u64 {
        1 << self.row
    }

    /// Returns the ancestor of this node at the given row.
    pub fn ancestor(self, row: u8) -> Self {
        debug_assert!(row >= self.row);
        NodeId::new(row, self.offset >> (row - self.row))
    }
}

/// Number of trees in a forest of `num_leaves`.
pub fn num_roots(num_leaves: u64) -> usize {
    num_leaves.count_ones() as usize
}

/// Returns true if a node exists at `id` in a forest of `num_leaves`.
pub fn exists(num_leaves: u64, id: NodeId) -> bool {
    (id.row as usize) < MAX_ROWS && id.offset < (num_leaves >> id.row)
}

/// Returns true if `id` is the root of one of the trees.
pub fn is_root(num_leaves: u64, id: NodeId) -> bool {
    (id.row as usize) < MAX_ROWS
        && (num_leaves >> id.row) & 1 == 1
        && id.offset == (num_leaves >> id.row) - 1
}

/// Iterates over the roots of a forest of `num_leaves`, tallest first.
pub fn roots(num_leaves: u64) -> impl DoubleEndedIterator<Item = NodeId> {
    (0..MAX_ROWS as u8)
        .rev()
        .filter(move |&row| (num_leaves >> row) & 1 == 1)
        .map(move |row| NodeId::new(row, (num_leaves >> row) - 1))
}

/// Returns the root of the tree containing the leaf at `position`.
pub fn root_containing(num_leaves: u64, position: Position) -> Option<NodeId> {
    if position >= num_leaves {
        return None;
    }
    roots(num_leaves).find(|r| NodeId::leaf(position).ancestor(r.row) == *r)
}

/// Smallest number of rows `R` such that `2^R >= num_leaves`.
pub fn forest_rows(num_leaves: u64) -> u8 {
    if num_leaves <= 1 {
        0
    } else {
        (64 - (num_leaves - 1).leading_zeros()) as u8
    }
}

/// Number of slots in the flat storage of a forest with the given number of rows.
pub fn flat_len(rows: u8) -> usize {
    (1usize << (rows + 1)) - 1
}

/// Offset of the first slot of `row` in the flat storage of a forest with `rows`.
fn row_start(row: u8, rows: u8) -> u64 {
    (2u64 << rows) - (2u64 << (rows - row))
}

/// Encodes the node into the flat position used by the full forest storage.
pub fn flat_position(id: NodeId, rows: u8) -> u64 {
    debug_assert!(id.row <= rows);
    row_start(id.row, rows) + id.offset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roots_follow_bits() {
        for n in 0..300u64 {
            let roots: Vec<_> = roots(n).collect();
            assert_eq!(roots.len(), num_roots(n));
            // tallest first, contiguous leaf coverage
            let mut next_leaf = 0;
            for w in roots.windows(2) {
                assert!(w[0].row > w[1].row);
            }
            for r in roots.iter() {
                assert_eq!(r.first_leaf(), next_leaf);
                next_leaf += r.capacity();
                assert!(is_root(n, *r));
            }
            assert_eq!(next_leaf, n);
        }
    }

    #[test]
    fn root_lookup() {
        // 4 + 2 + 1
        assert_eq!(root_containing(7, 0), Some(NodeId::new(2, 0)));
        assert_eq!(root_containing(7, 3), Some(NodeId::new(2, 0)));
        assert_eq!(root_containing(7, 4), Some(NodeId::new(1, 2)));
        assert_eq!(root_containing(7, 6), Some(NodeId::new(0, 6)));
        assert_eq!(root_containing(7, 7), None);
        assert!(!is_root(7, NodeId::new(1, 0)));
        assert!(exists(7, NodeId::new(1, 2)));
        assert!(!exists(7, NodeId::new(1, 3)));
    }

    #[test]
    fn flat_encoding() {
        assert_eq!(forest_rows(0), 0);
        assert_eq!(forest_rows(1), 0);
        assert_eq!(forest_rows(2), 1);
        assert_eq!(forest_rows(8), 3);
        assert_eq!(forest_rows(9), 4);

        let rows = 3;
        assert_eq!(flat_len(rows), 15);
        assert_eq!(flat_position(NodeId::new(0, 5), rows), 5);
        assert_eq!(flat_position(NodeId::new(1, 0), rows), 8);
        assert_eq!(flat_position(NodeId::new(2, 1), rows), 13);
        assert_eq!(flat_position(NodeId::new(3, 0), rows), 14);

        // rows are contiguous and do not overlap
        let mut next = 0;
        for row in 0..=rows {
            for offset in 0..(8u64 >> row) {
                assert_eq!(flat_position(NodeId::new(row, offset), rows), next);
                next += 1;
            }
        }
        assert_eq!(next as usize, flat_len(rows));
    }

    #[test]
    fn node_relations() {
        let n = NodeId::new(2, 3);
        assert_eq!(n.children(), (NodeId::new(1, 6), NodeId::new(1, 7)));
        assert_eq!(n.sibling(), NodeId::new(2, 2));
        assert_eq!(NodeId::leaf(13).ancestor(2), n);
        assert_eq!(n.first_leaf(), 12);
        assert!(!n.is_left());
    }
}
