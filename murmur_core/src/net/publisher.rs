//! Periodic knowledge publishing.

use super::data_manager::DataManager;
use crate::knowledge::{KnowledgeData, KnowledgeRegistry, KnowledgeStore, Trigger};
use crate::scheduler::{ExecutionError, TaskBody};
use murmur_env::NodeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Task body that snapshots every local component's knowledge and hands
/// the snapshots to the publish path.
///
/// Versions are per-component publish counters; a receiver uses them to
/// discard stale or reordered snapshots, so they only need to be
/// monotonic per `(component, source)`, which a counter gives us.
pub struct KnowledgePublisher {
    node: NodeId,
    registry: Arc<KnowledgeRegistry>,
    manager: Arc<DataManager>,
    versions: Mutex<HashMap<String, u64>>,
}

impl KnowledgePublisher {
    pub fn new(node: NodeId, registry: Arc<KnowledgeRegistry>, manager: Arc<DataManager>) -> Self {
        Self {
            node,
            registry,
            manager,
            versions: Mutex::new(HashMap::new()),
        }
    }

    fn next_version(&self, component_id: &str) -> u64 {
        let mut versions = self.versions.lock().unwrap();
        let version = versions.entry(component_id.to_string()).or_insert(0);
        *version += 1;
        *version
    }
}

impl TaskBody for KnowledgePublisher {
    fn name(&self) -> &str {
        "knowledge-publisher"
    }

    fn invoke(&self, _trigger: &Trigger) -> Result<(), ExecutionError> {
        for store in self.registry.locals() {
            let data = KnowledgeData {
                component_id: store.id().to_string(),
                source: self.node,
                version: self.next_version(store.id()),
                values: store.snapshot(),
            };
            self.manager
                .publish(&data, store.as_ref())
                .map_err(|error| ExecutionError::Process(format!("publish failed: {error}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::LocalStore;
    use crate::net::l1::Layer1;
    use crate::net::l2::Layer2;
    use crate::net::marshaller::MarshallerRegistry;
    use crate::net::data_manager::{BroadcastRecipients, KnowledgeReceiver};
    use murmur_env::{Address, Device, EnvError, ReceivedInfo};
    use serde_json::json;
    use std::collections::BTreeMap;

    struct CaptureDevice {
        sent: Mutex<Vec<Vec<u8>>>,
    }

    impl Device for CaptureDevice {
        fn name(&self) -> &str {
            "capture"
        }

        fn can_send(&self, _address: &Address) -> bool {
            true
        }

        fn mtu(&self) -> usize {
            64
        }

        fn send(&self, frame: Vec<u8>, _address: Address) -> Result<(), EnvError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }
    }

    #[test]
    fn test_snapshot_travels_from_store_to_replica() {
        // Publishing node.
        let device = Arc::new(CaptureDevice { sent: Mutex::new(Vec::new()) });
        let sender_node = NodeId::new(1);
        let sender_registry = Arc::new(KnowledgeRegistry::new());
        let mut fields = BTreeMap::new();
        fields.insert("route".to_string(), json!("A4"));
        fields.insert("position".to_string(), json!(41));
        sender_registry.add_local(Arc::new(LocalStore::new("leader", fields)));

        let l1 = Arc::new(Layer1::new(sender_node));
        l1.register_device(device.clone());
        let l2 = Layer2::new(sender_node, l1);
        let manager = Arc::new(DataManager::new(
            l2,
            Arc::new(MarshallerRegistry::default()),
            Arc::new(BroadcastRecipients),
        ));
        let publisher = KnowledgePublisher::new(sender_node, sender_registry, manager);

        publisher.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();
        publisher.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();
        // Small MTU: each publish produced several fragments.
        assert!(device.sent.lock().unwrap().len() > 2);

        // Receiving node reassembles and applies.
        let receiver_node = NodeId::new(2);
        let receiver_registry = Arc::new(KnowledgeRegistry::new());
        let marshallers = Arc::new(MarshallerRegistry::default());
        let recv_l1 = Arc::new(Layer1::new(receiver_node));
        let recv_l2 = Layer2::new(receiver_node, Arc::clone(&recv_l1));
        recv_l2.register_strategy(Arc::new(KnowledgeReceiver::new(
            receiver_node,
            Arc::clone(&receiver_registry),
            marshallers,
        )));

        for frame in device.sent.lock().unwrap().iter() {
            for data in recv_l1.process_frame(frame, &ReceivedInfo::default(), 0).unwrap() {
                recv_l2.receive(data).unwrap();
            }
        }

        let replica = receiver_registry.replica("leader", sender_node);
        assert_eq!(replica.version(), 2);
        let values = replica.probe(&[crate::knowledge::KnowledgePath::parse("self.position").unwrap()]);
        assert_eq!(values.value(&crate::knowledge::KnowledgePath::parse("self.position").unwrap()), Some(&json!(41)));
    }

    #[test]
    fn test_versions_count_per_component() {
        let device = Arc::new(CaptureDevice { sent: Mutex::new(Vec::new()) });
        let node = NodeId::new(1);
        let registry = Arc::new(KnowledgeRegistry::new());
        registry.add_local(Arc::new(LocalStore::new("a", BTreeMap::new())));
        registry.add_local(Arc::new(LocalStore::new("b", BTreeMap::new())));

        let l1 = Arc::new(Layer1::new(node));
        l1.register_device(device);
        let l2 = Layer2::new(node, l1);
        let marshallers = Arc::new(MarshallerRegistry::default());
        let manager = Arc::new(DataManager::new(
            l2,
            Arc::clone(&marshallers),
            Arc::new(BroadcastRecipients),
        ));
        let publisher = KnowledgePublisher::new(node, registry, manager);

        publisher.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();
        publisher.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();
        publisher.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();

        let versions = publisher.versions.lock().unwrap();
        assert_eq!(versions.get("a"), Some(&3));
        assert_eq!(versions.get("b"), Some(&3));
    }
}
