//! Gossip dissemination stack.
//!
//! Layering, bottom up:
//! - **L0**: raw frames on a device. A frame carries one or more
//!   size-prefixed L1 fragments.
//! - **L1** ([`Layer1`]): MTU-bounded fragmentation of opaque payloads
//!   and reassembly of incoming fragments keyed by `(data id, source)`.
//! - **L2** ([`Layer2`]): typed packets (knowledge snapshots today) and
//!   pluggable receive strategies, including rebroadcast with duplicate
//!   suppression.
//! - Above L2: the [`DataManager`] publish path (recipient selection,
//!   gossip, per-publish deduplication) and the [`KnowledgeReceiver`]
//!   strategy feeding replicas.
//!
//! The stack is clockless and socketless: callers pass the current time
//! into the receive path and devices abstract the medium, so the same
//! code runs under the simulator and on real links.

mod data_manager;
mod l1;
mod l2;
mod marshaller;
mod publisher;

pub use data_manager::{
    BroadcastRecipients, DataManager, GossipStrategy, KnowledgeReceiver, NeighborRecipients,
    ProbabilisticGossip, RecipientSelector,
};
pub use l1::{Layer1, ReassembledData, DEFAULT_COLLECTOR_TTL_MS, L1_HEADER_LEN};
pub use l2::{L2Packet, L2Strategy, Layer2, RebroadcastStrategy, StrategyOutcome};
pub use marshaller::{JsonMarshaller, Marshaller, MarshallerRegistry};
pub use publisher::KnowledgePublisher;

use murmur_env::EnvError;
use thiserror::Error;

/// Typed classes of L2 packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// A marshalled versioned knowledge snapshot.
    Knowledge = 1,
}

impl PacketType {
    pub fn from_wire(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PacketType::Knowledge),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Errors on the dissemination path.
#[derive(Debug, Error)]
pub enum NetError {
    #[error(transparent)]
    Env(#[from] EnvError),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Device MTU {mtu} too small to carry a fragment")]
    MtuTooSmall { mtu: usize },

    #[error("Unknown packet type tag {0}")]
    UnknownPacketType(u8),

    #[error("Marshalling failed: {0}")]
    Marshalling(String),

    #[error("No marshaller registered for {0:?}")]
    NoMarshaller(PacketType),
}

impl From<serde_json::Error> for NetError {
    fn from(err: serde_json::Error) -> Self {
        NetError::Marshalling(err.to_string())
    }
}
