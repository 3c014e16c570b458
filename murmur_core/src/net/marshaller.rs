//! Packet-body marshalling.

use super::{NetError, PacketType};
use crate::knowledge::KnowledgeData;
use std::collections::HashMap;
use std::sync::Arc;

/// Encodes and decodes knowledge snapshots for the wire.
pub trait Marshaller: Send + Sync {
    fn marshal(&self, data: &KnowledgeData) -> Result<Vec<u8>, NetError>;
    fn unmarshal(&self, bytes: &[u8]) -> Result<KnowledgeData, NetError>;
}

/// JSON marshalling. Verbose but self-describing; fragmentation keeps
/// it within the MTU regardless.
#[derive(Default)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal(&self, data: &KnowledgeData) -> Result<Vec<u8>, NetError> {
        Ok(serde_json::to_vec(data)?)
    }

    fn unmarshal(&self, bytes: &[u8]) -> Result<KnowledgeData, NetError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Marshaller lookup by packet type.
pub struct MarshallerRegistry {
    by_type: HashMap<PacketType, Arc<dyn Marshaller>>,
}

impl MarshallerRegistry {
    pub fn new() -> Self {
        Self { by_type: HashMap::new() }
    }

    pub fn register(&mut self, packet_type: PacketType, marshaller: Arc<dyn Marshaller>) {
        self.by_type.insert(packet_type, marshaller);
    }

    pub fn get(&self, packet_type: PacketType) -> Result<&Arc<dyn Marshaller>, NetError> {
        self.by_type
            .get(&packet_type)
            .ok_or(NetError::NoMarshaller(packet_type))
    }
}

impl Default for MarshallerRegistry {
    /// JSON for knowledge snapshots.
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(PacketType::Knowledge, Arc::new(JsonMarshaller));
        registry
    }
}
