//! Publish and receive paths for knowledge snapshots.
//!
//! The [`DataManager`] owns the publish side: it marshals a snapshot,
//! asks the recipient selector where it should go, deduplicates the
//! answer, and hands it to L2. The [`KnowledgeReceiver`] is the L2
//! strategy on the other end, feeding accepted snapshots into the
//! replica side of the knowledge registry.

use super::l2::{L2Packet, L2Strategy, Layer2, StrategyOutcome};
use super::marshaller::MarshallerRegistry;
use super::{NetError, PacketType};
use crate::knowledge::{KnowledgeData, KnowledgeRegistry, KnowledgeStore};
use murmur_env::{Address, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace};

/// Decides where a snapshot should be sent.
///
/// Selectors see both the snapshot and the store it came from, so a
/// selector can route on fields the snapshot does not carry.
pub trait RecipientSelector: Send + Sync {
    fn recipients(&self, data: &KnowledgeData, sender: &dyn KnowledgeStore) -> Vec<Address>;
}

/// Everything goes to the local broadcast domain.
#[derive(Default)]
pub struct BroadcastRecipients;

impl RecipientSelector for BroadcastRecipients {
    fn recipients(&self, _data: &KnowledgeData, _sender: &dyn KnowledgeStore) -> Vec<Address> {
        vec![Address::Broadcast]
    }
}

/// Per-neighbor gossip decision.
pub trait GossipStrategy: Send + Sync {
    fn should_gossip_to(&self, node: NodeId) -> bool;
}

/// Gossips to each neighbor independently with fixed probability, from
/// an explicit seed so runs are reproducible.
pub struct ProbabilisticGossip {
    probability: f64,
    rng: Mutex<ChaCha8Rng>,
}

impl ProbabilisticGossip {
    pub fn new(probability: f64, seed: u64) -> Self {
        Self {
            probability: probability.clamp(0.0, 1.0),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
        }
    }
}

impl GossipStrategy for ProbabilisticGossip {
    fn should_gossip_to(&self, _node: NodeId) -> bool {
        self.rng.lock().unwrap().gen_bool(self.probability)
    }
}

/// Selects among a maintained neighbor list through a gossip strategy.
pub struct NeighborRecipients {
    neighbors: Mutex<Vec<NodeId>>,
    gossip: Arc<dyn GossipStrategy>,
}

impl NeighborRecipients {
    pub fn new(gossip: Arc<dyn GossipStrategy>) -> Self {
        Self {
            neighbors: Mutex::new(Vec::new()),
            gossip,
        }
    }

    pub fn set_neighbors(&self, neighbors: Vec<NodeId>) {
        *self.neighbors.lock().unwrap() = neighbors;
    }
}

impl RecipientSelector for NeighborRecipients {
    fn recipients(&self, _data: &KnowledgeData, _sender: &dyn KnowledgeStore) -> Vec<Address> {
        self.neighbors
            .lock()
            .unwrap()
            .iter()
            .filter(|&&node| self.gossip.should_gossip_to(node))
            .map(|&node| Address::Node(node))
            .collect()
    }
}

/// The publish path.
pub struct DataManager {
    layer2: Arc<Layer2>,
    marshallers: Arc<MarshallerRegistry>,
    selector: Arc<dyn RecipientSelector>,
}

impl DataManager {
    pub fn new(
        layer2: Arc<Layer2>,
        marshallers: Arc<MarshallerRegistry>,
        selector: Arc<dyn RecipientSelector>,
    ) -> Self {
        Self {
            layer2,
            marshallers,
            selector,
        }
    }

    /// Marshals and sends one snapshot.
    ///
    /// However many times the selector names a recipient, each one gets
    /// the snapshot at most once per publish.
    pub fn publish(&self, data: &KnowledgeData, sender: &dyn KnowledgeStore) -> Result<(), NetError> {
        let bytes = self
            .marshallers
            .get(PacketType::Knowledge)?
            .marshal(data)?;

        let mut nodes_sent: HashSet<NodeId> = HashSet::new();
        let mut broadcast_sent = false;
        for address in self.selector.recipients(data, sender) {
            let fresh = match address {
                Address::Broadcast => !std::mem::replace(&mut broadcast_sent, true),
                Address::Node(node) => nodes_sent.insert(node),
            };
            if fresh {
                self.layer2.send(PacketType::Knowledge, &bytes, address)?;
            }
        }
        trace!(
            component = %data.component_id,
            version = data.version,
            recipients = nodes_sent.len() + usize::from(broadcast_sent),
            "published knowledge snapshot"
        );
        Ok(())
    }
}

/// L2 strategy that applies incoming snapshots to replicas.
pub struct KnowledgeReceiver {
    node: NodeId,
    registry: Arc<KnowledgeRegistry>,
    marshallers: Arc<MarshallerRegistry>,
}

impl KnowledgeReceiver {
    pub fn new(
        node: NodeId,
        registry: Arc<KnowledgeRegistry>,
        marshallers: Arc<MarshallerRegistry>,
    ) -> Self {
        Self {
            node,
            registry,
            marshallers,
        }
    }
}

impl L2Strategy for KnowledgeReceiver {
    fn name(&self) -> &str {
        "knowledge-receiver"
    }

    fn process(&self, packet: &L2Packet) -> Result<StrategyOutcome, NetError> {
        if packet.packet_type != PacketType::Knowledge {
            return Ok(StrategyOutcome::default());
        }
        let data = self
            .marshallers
            .get(PacketType::Knowledge)?
            .unmarshal(&packet.payload)?;
        if data.source == self.node {
            // A forwarded copy of our own knowledge came back around.
            return Ok(StrategyOutcome::default());
        }
        let accepted = self.registry.apply_knowledge(&data);
        debug!(
            node = %self.node,
            component = %data.component_id,
            source = %data.source,
            version = data.version,
            accepted,
            "knowledge snapshot received"
        );
        Ok(StrategyOutcome::default())
    }
}
