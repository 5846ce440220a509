//! Topology builder: produces the scheduler's switch/block topology
//! file from physical InfiniBand fabric or from GPU fabric identifiers,
//! plus ASCII visualizations for operator review.

mod builder;
mod error;
mod render;
mod visualize;

pub use builder::{TopologyBuilder, TopologyInput, TopologyType};
pub use error::TopologyError;
pub use render::{render_block_topology, render_tree_topology};
pub use visualize::{visualize_block, visualize_tree};
