//! Murmur Core - Ensemble Coordination & Knowledge Dissemination Engine
//!
//! Components on autonomous nodes own private knowledge stores and
//! coordinate through transient, predicate-formed groups ("ensembles")
//! instead of addressed messages. This library provides the engine that
//! makes that work over lossy broadcast links:
//! 1. **Task & Scheduler**: periodic and trigger-driven execution with
//!    seeded jitter, in wall-clock or discrete-event time
//! 2. **Ensemble Engine**: membership predicates and knowledge exchange
//!    between coordinator and member knowledge views
//! 3. **Dissemination Stack**: versioned knowledge snapshots, gossip
//!    recipient selection, MTU-bounded fragmentation and reassembly

pub mod knowledge;
pub mod scheduler;
pub mod ensemble;
pub mod net;
pub mod runtime;

// Re-export key types for convenience
pub use knowledge::{
    KnowledgeData, KnowledgeError, KnowledgePath, KnowledgeRegistry, KnowledgeStore, LocalStore,
    ReplicaStore, RoleSelector, StructuralError, Trigger, Value, ValueSet,
};
pub use scheduler::{
    ExecutionError, Executor, InlineExecutor, PoolExecutor, RealTimeScheduler, Schedule, Scheduler,
    SchedulerConfig, SimulationScheduler, Task, TaskBody, TaskId,
};
pub use ensemble::{EnsembleDefinition, EnsembleTask, EnsembleView, FieldType, RoleSchema};
pub use net::{
    BroadcastRecipients, DataManager, KnowledgePublisher, KnowledgeReceiver, Layer1, Layer2,
    MarshallerRegistry, NetError, PacketType, RebroadcastStrategy,
};
pub use runtime::{ComponentDefinition, ProcessDefinition, RuntimeBinder};
