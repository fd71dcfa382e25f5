use serde::{Deserialize, Serialize};

use crate::position::MAX_ROWS;

/*
Example config file:

[pollard]
max_nodes = 1_048_576

*/

/// Configuration of the accumulator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Pruned forest options
    #[serde(default)]
    pub pollard: PollardConfig,
}

/// Pruned forest configuration options
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollardConfig {
    /// Number of preallocated nodes. The pool never grows:
    /// once it is exhausted, modifications and verifications fail.
    #[serde(default = "PollardConfig::default_max_nodes")]
    pub max_nodes: usize,
}

impl Config {
    /// Returns a documentation for the config file.
    pub fn documentation() -> &'static str {
        r##"
    [pollard]
    max_nodes = 1_048_576        # number of nodes preallocated for the pruned forest
"##
    }

    /// Pool size that fits a pruned forest in which all of `leaves` are remembered.
    /// Deletions never allocate, and a forest of `n` leaves has fewer than `2n` nodes.
    pub fn recommended_max_nodes(leaves: u64) -> usize {
        let nodes = (leaves as usize).saturating_mul(2);
        nodes.saturating_add(2 * MAX_ROWS)
    }
}

impl PollardConfig {
    /// Default number of nodes (1M).
    pub fn default_max_nodes() -> usize {
        1 << 20
    }
}

impl Default for PollardConfig {
    fn default() -> Self {
        PollardConfig {
            max_nodes: Self::default_max_nodes(),
        }
    }
}
