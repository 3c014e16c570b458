//! L2: typed packets and receive strategies.
//!
//! A reassembled payload is a one-byte packet-type tag followed by the
//! marshalled body. Every registered strategy sees every packet;
//! strategies vote on whether the packet should be forwarded, and the
//! layer re-sends it (under its original source and data id) when any
//! strategy says so.

use super::l1::{Layer1, ReassembledData};
use super::{NetError, PacketType};
use murmur_env::{Address, NodeId, ReceivedInfo};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{trace, warn};

/// A decoded L2 packet as handed to strategies.
pub struct L2Packet {
    pub packet_type: PacketType,
    pub source: NodeId,
    pub data_id: u32,
    pub payload: Vec<u8>,
    pub info: ReceivedInfo,
}

/// What a strategy decided about a packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrategyOutcome {
    /// Request that the packet be re-sent for other nodes to hear.
    pub forward: bool,
}

/// A pluggable handler on the receive path.
///
/// Strategies must not send through the layer themselves; they report
/// intent through their outcome and the layer acts on it, which keeps
/// the receive path free of reentrancy.
pub trait L2Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn process(&self, packet: &L2Packet) -> Result<StrategyOutcome, NetError>;
}

/// The typed-packet layer.
pub struct Layer2 {
    node: NodeId,
    layer1: Arc<Layer1>,
    strategies: Mutex<Vec<Arc<dyn L2Strategy>>>,
}

impl Layer2 {
    pub fn new(node: NodeId, layer1: Arc<Layer1>) -> Arc<Self> {
        Arc::new(Self {
            node,
            layer1,
            strategies: Mutex::new(Vec::new()),
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn register_strategy(&self, strategy: Arc<dyn L2Strategy>) {
        self.strategies.lock().unwrap().push(strategy);
    }

    /// Sends a typed packet originated here.
    pub fn send(
        &self,
        packet_type: PacketType,
        body: &[u8],
        address: Address,
    ) -> Result<(), NetError> {
        let mut wire = Vec::with_capacity(1 + body.len());
        wire.push(packet_type.to_wire());
        wire.extend_from_slice(body);
        self.layer1.send(&wire, address)
    }

    /// Handles one reassembled payload from L1.
    ///
    /// A strategy failure (bad marshalling, most likely) is logged and
    /// does not stop the remaining strategies: one malformed packet must
    /// not wedge the receive path.
    pub fn receive(&self, data: ReassembledData) -> Result<(), NetError> {
        let Some((&tag, body)) = data.payload.split_first() else {
            return Err(NetError::MalformedFrame("empty L2 payload".to_string()));
        };
        let packet_type =
            PacketType::from_wire(tag).ok_or(NetError::UnknownPacketType(tag))?;
        let packet = L2Packet {
            packet_type,
            source: data.source,
            data_id: data.data_id,
            payload: body.to_vec(),
            info: data.info,
        };

        let strategies = self.strategies.lock().unwrap().clone();
        let mut forward = false;
        for strategy in strategies {
            match strategy.process(&packet) {
                Ok(outcome) => forward |= outcome.forward,
                Err(error) => {
                    warn!(
                        node = %self.node,
                        strategy = strategy.name(),
                        %error,
                        "strategy failed on packet"
                    );
                }
            }
        }

        if forward {
            trace!(node = %self.node, source = %packet.source, data_id = packet.data_id, "rebroadcasting");
            self.layer1
                .send_as(packet.source, packet.data_id, &data.payload, Address::Broadcast)?;
        }
        Ok(())
    }
}

/// Epidemic forwarding with duplicate suppression.
///
/// Each `(source, data id)` pair is forwarded at most once; packets we
/// originated are never forwarded. The seen-set is cleared when it grows
/// past a bound so long-running nodes do not accumulate it forever, at
/// the cost of occasionally re-forwarding something old.
pub struct RebroadcastStrategy {
    node: NodeId,
    seen: Mutex<HashSet<(u32, u32)>>,
    max_seen: usize,
}

impl RebroadcastStrategy {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            seen: Mutex::new(HashSet::new()),
            max_seen: 65_536,
        }
    }
}

impl L2Strategy for RebroadcastStrategy {
    fn name(&self) -> &str {
        "rebroadcast"
    }

    fn process(&self, packet: &L2Packet) -> Result<StrategyOutcome, NetError> {
        if packet.source == self.node {
            return Ok(StrategyOutcome { forward: false });
        }
        let mut seen = self.seen.lock().unwrap();
        if seen.len() >= self.max_seen {
            seen.clear();
        }
        let first_time = seen.insert((packet.source.as_u32(), packet.data_id));
        Ok(StrategyOutcome { forward: first_time })
    }
}
