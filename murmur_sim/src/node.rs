//! A fully wired node under simulation.

use crate::network::SimNetwork;
use murmur_core::net::{
    BroadcastRecipients, DataManager, KnowledgePublisher, KnowledgeReceiver, Layer1, Layer2,
    MarshallerRegistry, RebroadcastStrategy,
};
use murmur_core::runtime::RuntimeBinder;
use murmur_core::scheduler::{Schedule, Scheduler, SchedulerConfig, SimulationScheduler, Task};
use murmur_core::KnowledgeRegistry;
use murmur_env::{NodeId, ReceivedInfo};
use std::sync::Arc;
use tracing::warn;

/// One node: knowledge registry, scheduler, binder and the full
/// dissemination stack, attached to the shared medium.
///
/// The runner owns time; it calls [`SimNode::step`] to run the node's
/// scheduler up to the current instant and [`SimNode::deliver`] for each
/// frame the medium hands the node.
pub struct SimNode {
    pub id: NodeId,
    pub binder: RuntimeBinder,
    registry: Arc<KnowledgeRegistry>,
    scheduler: Arc<SimulationScheduler>,
    l1: Arc<Layer1>,
    l2: Arc<Layer2>,
}

impl SimNode {
    pub fn new(id: NodeId, network: &Arc<SimNetwork>, mtu: usize, publish_period_ms: u64) -> Self {
        let registry = Arc::new(KnowledgeRegistry::new());
        let scheduler = Arc::new(SimulationScheduler::new(SchedulerConfig::for_node(id)));
        scheduler.start();
        let binder = RuntimeBinder::new(Arc::clone(&registry), scheduler.clone());

        let l1 = Arc::new(Layer1::new(id));
        l1.register_device(network.attach(id, mtu));
        let l2 = Layer2::new(id, Arc::clone(&l1));
        let marshallers = Arc::new(MarshallerRegistry::default());
        l2.register_strategy(Arc::new(KnowledgeReceiver::new(
            id,
            Arc::clone(&registry),
            Arc::clone(&marshallers),
        )));
        l2.register_strategy(Arc::new(RebroadcastStrategy::new(id)));

        let manager = Arc::new(DataManager::new(
            Arc::clone(&l2),
            marshallers,
            Arc::new(BroadcastRecipients),
        ));
        let publisher = Arc::new(KnowledgePublisher::new(id, Arc::clone(&registry), manager));
        scheduler.add_task(Task::new(Schedule::periodic(publish_period_ms), publisher));

        Self {
            id,
            binder,
            registry,
            scheduler,
            l1,
            l2,
        }
    }

    pub fn registry(&self) -> &Arc<KnowledgeRegistry> {
        &self.registry
    }

    /// Runs everything due on this node's scheduler up to `now_ms`.
    pub fn step(&self, now_ms: u64) {
        self.scheduler.advance_to(now_ms);
    }

    /// Feeds one frame from the medium into the node's stack.
    ///
    /// Receive-path failures are logged, not propagated: a corrupt frame
    /// from the medium must not take the node down.
    pub fn deliver(&self, frame: &[u8], info: &ReceivedInfo, now_ms: u64) {
        match self.l1.process_frame(frame, info, now_ms) {
            Ok(completed) => {
                for data in completed {
                    if let Err(error) = self.l2.receive(data) {
                        warn!(node = %self.id, %error, "dropping undecodable payload");
                    }
                }
            }
            Err(error) => {
                warn!(node = %self.id, %error, "dropping malformed frame");
            }
        }
    }
}
