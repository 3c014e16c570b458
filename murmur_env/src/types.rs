//! Common types for the Murmur environment abstraction.

use serde::{Deserialize, Serialize};

/// Unique identifier for a Murmur node.
///
/// A stable 32-bit integer rather than a live object reference: node ids
/// appear verbatim in the L1 fragment header, key replica stores, and seed
/// per-node randomness, so they must be small, ordered and serializable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Creates a NodeId from a raw integer.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Creates a deterministic NodeId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        Self((seed ^ (seed >> 32)) as u32)
    }

    /// Returns the raw id.
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Destination of a link-layer transmission.
///
/// Murmur links are broadcast-style: most traffic goes out as
/// `Broadcast` and is filtered by the receivers, but recipient selectors
/// may address individual nodes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// A single node.
    Node(NodeId),
    /// Every node reachable on the link.
    Broadcast,
}

impl Address {
    /// Whether a node with the given id should accept a frame sent to
    /// this address.
    pub fn matches(&self, id: NodeId) -> bool {
        match self {
            Address::Node(target) => *target == id,
            Address::Broadcast => true,
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Address::Node(id) => write!(f, "{}", id),
            Address::Broadcast => write!(f, "*"),
        }
    }
}
