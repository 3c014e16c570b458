//! Runtime binder: deployment commands tying stores, tasks and the
//! scheduler together.
//!
//! The binder is the only writer of the deployment state. Everything it
//! does happens through explicit commands ([`RuntimeBinder::component_added`]
//! and friends); there is no change-listening machinery between the
//! model and the runtime.

use crate::ensemble::{EnsembleDefinition, EnsembleTask};
use crate::knowledge::{
    KnowledgePath, KnowledgeRegistry, KnowledgeStore, ListenerId, LocalStore, RoleSelector,
    StructuralError, Trigger, Value, ValueSet,
};
use crate::scheduler::{ExecutionError, Schedule, Scheduler, Task, TaskBody, TaskId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// A component process: reads its inputs, computes, writes its outputs.
pub type ProcessFn =
    dyn Fn(&ValueSet) -> Result<Vec<(KnowledgePath, Value)>, ExecutionError> + Send + Sync;

/// Definition of one process of a component.
pub struct ProcessDefinition {
    pub name: String,
    /// Paths read before each invocation (role `self`).
    pub in_paths: Vec<KnowledgePath>,
    /// Paths the process is allowed to write (role `self`).
    pub out_paths: Vec<KnowledgePath>,
    pub schedule: Schedule,
    body: Arc<ProcessFn>,
}

impl ProcessDefinition {
    pub fn new(
        name: impl Into<String>,
        in_paths: Vec<KnowledgePath>,
        out_paths: Vec<KnowledgePath>,
        schedule: Schedule,
        body: Arc<ProcessFn>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            in_paths,
            out_paths,
            schedule,
            body,
        })
    }
}

/// Definition of a component instance: identity, initial knowledge, and
/// its processes.
pub struct ComponentDefinition {
    pub id: String,
    pub initial_knowledge: BTreeMap<String, Value>,
    pub processes: Vec<Arc<ProcessDefinition>>,
}

impl ComponentDefinition {
    pub fn new(id: impl Into<String>, initial_knowledge: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            initial_knowledge,
            processes: Vec::new(),
        }
    }

    pub fn with_process(mut self, process: Arc<ProcessDefinition>) -> Self {
        self.processes.push(process);
        self
    }

    /// Structural validation, fatal before anything is scheduled.
    fn validate(&self) -> Result<(), StructuralError> {
        if self.id.is_empty() {
            return Err(StructuralError::BadComponent {
                component: "<unnamed>".to_string(),
                reason: "component needs an id".to_string(),
            });
        }
        for process in &self.processes {
            for path in process.in_paths.iter().chain(&process.out_paths) {
                if path.role() != RoleSelector::Own {
                    return Err(StructuralError::BadComponent {
                        component: self.id.clone(),
                        reason: format!(
                            "process '{}' path '{}' must address the component's own knowledge",
                            process.name, path
                        ),
                    });
                }
            }
            if process.schedule.period_ms.is_none() && process.schedule.triggers.is_empty() {
                return Err(StructuralError::BadComponent {
                    component: self.id.clone(),
                    reason: format!("process '{}' would never run", process.name),
                });
            }
        }
        Ok(())
    }
}

/// Task body wrapping one process of one component.
struct ProcessTask {
    component_id: String,
    definition: Arc<ProcessDefinition>,
    registry: Arc<KnowledgeRegistry>,
    name: String,
}

impl TaskBody for ProcessTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _trigger: &Trigger) -> Result<(), ExecutionError> {
        let Some(store) = self.registry.local(&self.component_id) else {
            return Ok(());
        };
        let inputs = store.get(&self.definition.in_paths)?;
        let writes = (self.definition.body)(&inputs)?;
        for (path, _) in &writes {
            if !self.definition.out_paths.contains(path) {
                return Err(ExecutionError::Process(format!(
                    "process '{}' wrote undeclared path '{}'",
                    self.definition.name, path
                )));
            }
        }
        store.update(writes)?;
        Ok(())
    }
}

/// One scheduled task plus the store listeners backing its triggers.
struct TaskRegistration {
    task_id: TaskId,
    listeners: Vec<ListenerId>,
}

struct ComponentRecord {
    store: Arc<LocalStore>,
    definition: ComponentDefinition,
    /// Process name → registration. Absent while a process is inactive.
    process_tasks: HashMap<String, TaskRegistration>,
    /// One evaluation task per deployed ensemble.
    ensemble_tasks: Vec<TaskRegistration>,
}

/// Binds deployed components and ensembles to the scheduler.
pub struct RuntimeBinder {
    registry: Arc<KnowledgeRegistry>,
    scheduler: Arc<dyn Scheduler>,
    components: Mutex<HashMap<String, ComponentRecord>>,
    ensembles: Mutex<Vec<Arc<EnsembleDefinition>>>,
}

impl RuntimeBinder {
    pub fn new(registry: Arc<KnowledgeRegistry>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            registry,
            scheduler,
            components: Mutex::new(HashMap::new()),
            ensembles: Mutex::new(Vec::new()),
        }
    }

    pub fn registry(&self) -> &Arc<KnowledgeRegistry> {
        &self.registry
    }

    /// Deploys a component: store, process tasks, and evaluation tasks
    /// for every already-deployed ensemble.
    pub fn component_added(&self, definition: ComponentDefinition) -> Result<(), StructuralError> {
        definition.validate()?;
        let mut components = self.components.lock().unwrap();
        if components.contains_key(&definition.id) {
            return Err(StructuralError::BadComponent {
                component: definition.id.clone(),
                reason: "already deployed".to_string(),
            });
        }

        let store = Arc::new(LocalStore::new(
            definition.id.clone(),
            definition.initial_knowledge.clone(),
        ));
        self.registry.add_local(Arc::clone(&store));

        let mut record = ComponentRecord {
            store: Arc::clone(&store),
            definition,
            process_tasks: HashMap::new(),
            ensemble_tasks: Vec::new(),
        };
        for process in record.definition.processes.clone() {
            let registration = self.schedule_process(&record.definition.id, &store, &process);
            record.process_tasks.insert(process.name.clone(), registration);
        }
        for ensemble in self.ensembles.lock().unwrap().iter() {
            let registration =
                self.schedule_ensemble(&record.definition.id, &store, Arc::clone(ensemble));
            record.ensemble_tasks.push(registration);
        }

        info!(component = %record.definition.id, "component deployed");
        components.insert(record.definition.id.clone(), record);
        Ok(())
    }

    /// Undeploys a component: all its tasks and listeners go, then the
    /// store. Idempotent.
    pub fn component_removed(&self, component_id: &str) {
        let Some(record) = self.components.lock().unwrap().remove(component_id) else {
            warn!(component = component_id, "removal of unknown component ignored");
            return;
        };
        for registration in record
            .process_tasks
            .into_values()
            .chain(record.ensemble_tasks)
        {
            self.teardown(&record.store, registration);
        }
        self.registry.remove_local(component_id);
        info!(component = component_id, "component undeployed");
    }

    /// Activates or deactivates one process of a deployed component.
    /// Deactivation removes its task; activation schedules it afresh.
    pub fn process_active_changed(&self, component_id: &str, process_name: &str, active: bool) {
        let mut components = self.components.lock().unwrap();
        let Some(record) = components.get_mut(component_id) else {
            warn!(component = component_id, "process toggle on unknown component ignored");
            return;
        };
        let currently_active = record.process_tasks.contains_key(process_name);
        if active == currently_active {
            return;
        }
        if active {
            let Some(process) = record
                .definition
                .processes
                .iter()
                .find(|p| p.name == process_name)
                .cloned()
            else {
                warn!(component = component_id, process = process_name, "unknown process");
                return;
            };
            let store = Arc::clone(&record.store);
            let registration = self.schedule_process(component_id, &store, &process);
            record.process_tasks.insert(process_name.to_string(), registration);
        } else if let Some(registration) = record.process_tasks.remove(process_name) {
            let store = Arc::clone(&record.store);
            self.teardown(&store, registration);
        }
        debug!(component = component_id, process = process_name, active, "process toggled");
    }

    /// Deploys an ensemble: every current and future component gets an
    /// evaluation task for it.
    pub fn ensemble_deployed(&self, definition: Arc<EnsembleDefinition>) {
        self.ensembles.lock().unwrap().push(Arc::clone(&definition));
        let mut components = self.components.lock().unwrap();
        for record in components.values_mut() {
            let store = Arc::clone(&record.store);
            let registration =
                self.schedule_ensemble(&record.definition.id, &store, Arc::clone(&definition));
            record.ensemble_tasks.push(registration);
        }
        info!(ensemble = %definition.name, "ensemble deployed");
    }

    fn schedule_process(
        &self,
        component_id: &str,
        store: &Arc<LocalStore>,
        process: &Arc<ProcessDefinition>,
    ) -> TaskRegistration {
        let body = Arc::new(ProcessTask {
            component_id: component_id.to_string(),
            definition: Arc::clone(process),
            registry: Arc::clone(&self.registry),
            name: format!("process:{}:{}", component_id, process.name),
        });
        self.schedule_body(store, process.schedule.clone(), body)
    }

    fn schedule_ensemble(
        &self,
        component_id: &str,
        store: &Arc<LocalStore>,
        definition: Arc<EnsembleDefinition>,
    ) -> TaskRegistration {
        let schedule = definition.schedule.clone();
        let body = Arc::new(EnsembleTask::new(
            component_id,
            definition,
            Arc::clone(&self.registry),
        ));
        self.schedule_body(store, schedule, body)
    }

    fn schedule_body(
        &self,
        store: &Arc<LocalStore>,
        schedule: Schedule,
        body: Arc<dyn TaskBody>,
    ) -> TaskRegistration {
        let triggers = schedule.triggers.clone();
        let task_id = self.scheduler.add_task(Task::new(schedule, body));
        let mut listeners = Vec::new();
        for trigger in triggers {
            let listener = self.scheduler.trigger_listener(task_id);
            listeners.push(store.register(trigger, listener));
        }
        TaskRegistration { task_id, listeners }
    }

    fn teardown(&self, store: &Arc<LocalStore>, registration: TaskRegistration) {
        self.scheduler.remove_task(registration.task_id);
        for listener in registration.listeners {
            store.unregister(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensemble::{EnsembleView, FieldType, RoleSchema};
    use crate::scheduler::{SchedulerConfig, SimulationScheduler};
    use serde_json::json;

    fn drive(scheduler: &SimulationScheduler, until_ms: u64) {
        for t in 1..=until_ms {
            scheduler.advance_to(t);
        }
    }

    fn mover(id: &str, route: &str) -> ComponentDefinition {
        let position = KnowledgePath::parse("self.position").unwrap();
        let out = position.clone();
        let mut initial = BTreeMap::new();
        initial.insert("route".to_string(), json!(route));
        initial.insert("position".to_string(), json!(0));
        ComponentDefinition::new(id, initial).with_process(ProcessDefinition::new(
            "move",
            vec![position.clone()],
            vec![position.clone()],
            Schedule::periodic(10).with_randomized_start(false),
            Arc::new(move |inputs: &ValueSet| {
                let current = inputs.value(&position).and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(vec![(out.clone(), json!(current + 1))])
            }),
        ))
    }

    fn binder() -> (Arc<SimulationScheduler>, RuntimeBinder) {
        let scheduler = Arc::new(SimulationScheduler::new(SchedulerConfig::new(5)));
        scheduler.start();
        let registry = Arc::new(KnowledgeRegistry::new());
        let binder = RuntimeBinder::new(registry, scheduler.clone());
        (scheduler, binder)
    }

    #[test]
    fn test_periodic_process_updates_knowledge() {
        let (scheduler, binder) = binder();
        binder.component_added(mover("car", "A4")).unwrap();
        drive(&scheduler, 100);

        let store = binder.registry().local("car").unwrap();
        let position = store.field_value("position").and_then(|v| v.as_i64()).unwrap();
        assert!(position >= 5, "expected steady progress, got {}", position);
    }

    #[test]
    fn test_triggered_process_follows_knowledge_changes() {
        let (scheduler, binder) = binder();
        let position = KnowledgePath::parse("self.position").unwrap();
        let shadow = KnowledgePath::parse("self.shadow").unwrap();

        let mut initial = BTreeMap::new();
        initial.insert("position".to_string(), json!(0));
        initial.insert("shadow".to_string(), json!(-1));
        let trigger = Trigger::KnowledgeChange { path: position.clone() };
        let definition = ComponentDefinition::new("c", initial).with_process(
            ProcessDefinition::new(
                "shadow",
                vec![position.clone()],
                vec![shadow.clone()],
                Schedule::triggered(vec![trigger]),
                {
                    let position = position.clone();
                    let shadow = shadow.clone();
                    Arc::new(move |inputs: &ValueSet| {
                        Ok(vec![(shadow.clone(), inputs.value(&position).cloned().unwrap())])
                    })
                },
            ),
        );
        binder.component_added(definition).unwrap();

        let store = binder.registry().local("c").unwrap();
        store.update(vec![(position.clone(), json!(42))]).unwrap();
        drive(&scheduler, 5);
        assert_eq!(store.field_value("shadow"), Some(json!(42)));
    }

    #[test]
    fn test_component_removed_stops_its_tasks() {
        let (scheduler, binder) = binder();
        binder.component_added(mover("car", "A4")).unwrap();
        drive(&scheduler, 50);
        binder.component_removed("car");
        assert!(binder.registry().local("car").is_none());
        // No panic, nothing scheduled for it anymore.
        drive(&scheduler, 200);
        binder.component_removed("car"); // idempotent
    }

    #[test]
    fn test_process_toggle() {
        let (scheduler, binder) = binder();
        binder.component_added(mover("car", "A4")).unwrap();
        drive(&scheduler, 50);

        binder.process_active_changed("car", "move", false);
        let store = binder.registry().local("car").unwrap();
        let frozen = store.field_value("position").unwrap();
        drive(&scheduler, 150);
        assert_eq!(store.field_value("position"), Some(frozen.clone()));

        binder.process_active_changed("car", "move", true);
        drive(&scheduler, 250);
        assert_ne!(store.field_value("position"), Some(frozen));
    }

    #[test]
    fn test_duplicate_and_invalid_deployments_rejected() {
        let (_scheduler, binder) = binder();
        binder.component_added(mover("car", "A4")).unwrap();
        assert!(binder.component_added(mover("car", "A4")).is_err());

        // Process path crossing the role boundary is structural.
        let bad = ComponentDefinition::new("bad", BTreeMap::new()).with_process(
            ProcessDefinition::new(
                "p",
                vec![KnowledgePath::parse("coord.position").unwrap()],
                vec![],
                Schedule::periodic(10),
                Arc::new(|_: &ValueSet| Ok(vec![])),
            ),
        );
        assert!(binder.component_added(bad).is_err());
    }

    #[test]
    fn test_convoy_through_deployed_ensemble() {
        let (scheduler, binder) = binder();
        binder.component_added(mover("leader", "A4")).unwrap();
        binder.component_added(mover("follower", "A4")).unwrap();

        let definition = EnsembleDefinition::new(
            "convoy",
            RoleSchema::new()
                .with_field("route", FieldType::String)
                .with_field("position", FieldType::Number),
            RoleSchema::new()
                .with_field("route", FieldType::String)
                .with_field("leader_position", FieldType::Any),
            vec![
                KnowledgePath::parse("coord.route").unwrap(),
                KnowledgePath::parse("member.route").unwrap(),
            ],
            vec![KnowledgePath::parse("coord.position").unwrap()],
            Schedule::periodic(10).with_randomized_start(false),
            Arc::new(|view: &EnsembleView| Ok(view.get("coord.route") == view.get("member.route"))),
            Arc::new(|view: &EnsembleView| {
                Ok(vec![(
                    KnowledgePath::parse("member.leader_position").unwrap(),
                    view.get("coord.position").cloned().unwrap_or(Value::Null),
                )])
            }),
        )
        .unwrap();
        binder.ensemble_deployed(definition);

        drive(&scheduler, 200);

        let follower = binder.registry().local("follower").unwrap();
        let seen = follower
            .field_value("leader_position")
            .and_then(|v| v.as_i64())
            .expect("follower should have seen the leader's position");
        assert!(seen > 0, "leader position should have propagated, got {}", seen);
    }
}
