//! Simulated broadcast medium with fault injection.

use crate::context::SimContext;
use murmur_core::net::L1_HEADER_LEN;
use murmur_env::{Address, Device, EnvError, NodeContext, NodeId, ReceivedInfo};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

/// Network controller for fault injection.
pub struct SimNetworkController {
    /// Per-link latency in milliseconds
    link_latency: Mutex<HashMap<(NodeId, NodeId), u64>>,

    /// Per-link packet loss rate (0.0 - 1.0)
    link_loss: Mutex<HashMap<(NodeId, NodeId), f64>>,

    /// Loss applied to links with no per-link override
    default_loss: Mutex<f64>,

    /// Active partitions (nodes that cannot communicate)
    partitions: Mutex<Vec<(Vec<NodeId>, Vec<NodeId>)>>,
}

impl SimNetworkController {
    pub fn new() -> Self {
        Self {
            link_latency: Mutex::new(HashMap::new()),
            link_loss: Mutex::new(HashMap::new()),
            default_loss: Mutex::new(0.0),
            partitions: Mutex::new(Vec::new()),
        }
    }

    /// Sets latency for a specific link.
    pub fn set_latency(&self, from: NodeId, to: NodeId, latency_ms: u64) {
        self.link_latency.lock().unwrap().insert((from, to), latency_ms);
    }

    /// Sets packet loss rate for a link.
    pub fn set_loss(&self, from: NodeId, to: NodeId, loss_rate: f64) {
        self.link_loss
            .lock()
            .unwrap()
            .insert((from, to), loss_rate.clamp(0.0, 1.0));
    }

    /// Sets the loss rate for every link without an explicit override.
    pub fn set_default_loss(&self, loss_rate: f64) {
        *self.default_loss.lock().unwrap() = loss_rate.clamp(0.0, 1.0);
    }

    /// Creates a network partition between two groups.
    pub fn partition(&self, group_a: Vec<NodeId>, group_b: Vec<NodeId>) {
        self.partitions.lock().unwrap().push((group_a, group_b));
    }

    /// Heals all active partitions.
    pub fn heal_all(&self) {
        self.partitions.lock().unwrap().clear();
    }

    /// Checks if two nodes can communicate (not partitioned).
    pub fn can_communicate(&self, from: NodeId, to: NodeId) -> bool {
        let partitions = self.partitions.lock().unwrap();
        for (group_a, group_b) in partitions.iter() {
            let from_in_a = group_a.contains(&from);
            let from_in_b = group_b.contains(&from);
            let to_in_a = group_a.contains(&to);
            let to_in_b = group_b.contains(&to);
            if (from_in_a && to_in_b) || (from_in_b && to_in_a) {
                return false;
            }
        }
        true
    }

    /// Gets the latency for a link (default 0).
    pub fn get_latency(&self, from: NodeId, to: NodeId) -> u64 {
        *self.link_latency.lock().unwrap().get(&(from, to)).unwrap_or(&0)
    }

    /// Gets the loss rate for a link.
    pub fn get_loss(&self, from: NodeId, to: NodeId) -> f64 {
        self.link_loss
            .lock()
            .unwrap()
            .get(&(from, to))
            .copied()
            .unwrap_or_else(|| *self.default_loss.lock().unwrap())
    }
}

impl Default for SimNetworkController {
    fn default() -> Self {
        Self::new()
    }
}

/// A frame on its way to one destination node.
pub struct Delivery {
    pub to: NodeId,
    pub frame: Vec<u8>,
    pub info: ReceivedInfo,
    pub deliver_at_ms: u64,
}

/// The shared medium: routes frames between registered nodes, applying
/// the controller's partitions, loss and latency per destination.
///
/// Loss draws come from a seeded RNG, so a scenario replays identically
/// for the same seed.
pub struct SimNetwork {
    context: Arc<SimContext>,
    controller: SimNetworkController,
    nodes: Mutex<Vec<NodeId>>,
    rng: Mutex<ChaCha8Rng>,
    in_flight: Mutex<Vec<Delivery>>,
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

impl SimNetwork {
    pub fn new(context: Arc<SimContext>, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            context,
            controller: SimNetworkController::new(),
            nodes: Mutex::new(Vec::new()),
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            in_flight: Mutex::new(Vec::new()),
            frames_sent: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
        })
    }

    pub fn controller(&self) -> &SimNetworkController {
        &self.controller
    }

    /// Attaches a node to the medium and returns its device.
    pub fn attach(self: &Arc<Self>, node: NodeId, mtu: usize) -> Arc<SimDevice> {
        self.nodes.lock().unwrap().push(node);
        Arc::new(SimDevice {
            node,
            mtu,
            network: Arc::clone(self),
        })
    }

    fn route(&self, from: NodeId, address: Address, frame: Vec<u8>) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        let now = self.context.now_ms();
        let nodes = self.nodes.lock().unwrap().clone();
        for to in nodes {
            if to == from || !address.matches(to) {
                continue;
            }
            if !self.controller.can_communicate(from, to) {
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let loss = self.controller.get_loss(from, to);
            if loss > 0.0 && self.rng.lock().unwrap().gen_bool(loss) {
                trace!(%from, %to, "frame lost");
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let deliver_at_ms = now + self.controller.get_latency(from, to);
            self.in_flight.lock().unwrap().push(Delivery {
                to,
                frame: frame.clone(),
                info: ReceivedInfo::default(),
                deliver_at_ms,
            });
        }
    }

    /// Drains every delivery due at or before `now_ms`, in send order.
    pub fn deliveries_due(&self, now_ms: u64) -> Vec<Delivery> {
        let mut in_flight = self.in_flight.lock().unwrap();
        let mut due = Vec::new();
        let mut remaining = Vec::new();
        for delivery in in_flight.drain(..) {
            if delivery.deliver_at_ms <= now_ms {
                due.push(delivery);
            } else {
                remaining.push(delivery);
            }
        }
        *in_flight = remaining;
        due
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }
}

/// A node's port onto the simulated medium.
pub struct SimDevice {
    node: NodeId,
    mtu: usize,
    network: Arc<SimNetwork>,
}

/// Fixed per-frame overhead above the fragment payload budget: the
/// fragment header plus the frame count and size words.
const FRAME_OVERHEAD: usize = L1_HEADER_LEN + 8;

impl Device for SimDevice {
    fn name(&self) -> &str {
        "sim"
    }

    fn can_send(&self, _address: &Address) -> bool {
        true
    }

    fn mtu(&self) -> usize {
        self.mtu
    }

    fn send(&self, frame: Vec<u8>, address: Address) -> Result<(), EnvError> {
        if frame.len() > self.mtu + FRAME_OVERHEAD {
            return Err(EnvError::FrameTooLarge {
                size: frame.len(),
                mtu: self.mtu,
            });
        }
        self.network.route(self.node, address, frame);
        Ok(())
    }
}
