//! Ensemble engine: membership predicates and knowledge exchange.
//!
//! An ensemble is a transient, predicate-formed group between a
//! coordinator and member component. Nothing is ever "joined": every
//! evaluation re-reads both sides' knowledge (local store, or the
//! last-known replica for a remote side), re-decides membership, and on
//! success runs the knowledge-exchange function.
//!
//! Writes produced by the exchange are applied only to the evaluating
//! component's own store: the remote side is a read-only replica here,
//! and the remote node runs the same evaluation in the mirrored
//! orientation to update its own side.

use crate::knowledge::{
    KnowledgeError, KnowledgePath, KnowledgeRegistry, KnowledgeStore, LocalStore, RoleSelector,
    StructuralError, Value, ValueSet,
};
use crate::scheduler::{ExecutionError, Schedule, TaskBody};
use crate::knowledge::Trigger;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Expected JSON shape of a knowledge field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Number,
    String,
    Bool,
    Object,
    Array,
    /// Any value, including null.
    Any,
}

impl FieldType {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            FieldType::Number => value.is_number(),
            FieldType::String => value.is_string(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
            FieldType::Any => true,
        }
    }
}

/// Explicit schema of a role: field name → expected type.
///
/// Replaces per-access reflective type checks: a definition is validated
/// against its schemas once, at deployment.
#[derive(Debug, Clone, Default)]
pub struct RoleSchema {
    fields: BTreeMap<String, FieldType>,
}

impl RoleSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Whether a knowledge snapshot satisfies this role (every schema
    /// field present with a matching type).
    pub fn accepts(&self, values: &BTreeMap<String, Value>) -> bool {
        self.fields.iter().all(|(name, ty)| {
            values
                .get(name)
                .map(|value| value.is_null() || ty.accepts(value))
                .unwrap_or(false)
        })
    }
}

/// Both sides' knowledge as read for one evaluation.
///
/// Values are keyed by their role-qualified paths, so a predicate asks
/// for `coord.position` and `member.position` and gets the right sides.
pub struct EnsembleView {
    values: ValueSet,
}

impl EnsembleView {
    pub fn value(&self, path: &KnowledgePath) -> Option<&Value> {
        self.values.value(path)
    }

    /// Convenience: look a role-qualified dotted path up.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = KnowledgePath::parse(path).ok()?;
        self.values.value(&path)
    }
}

/// Membership predicate: pure function of both sides' knowledge.
pub type MembershipFn =
    dyn Fn(&EnsembleView) -> Result<bool, ExecutionError> + Send + Sync;

/// Knowledge exchange: pure function of both sides' knowledge producing
/// role-qualified writes.
pub type ExchangeFn =
    dyn Fn(&EnsembleView) -> Result<Vec<(KnowledgePath, Value)>, ExecutionError> + Send + Sync;

/// Immutable definition of an ensemble.
pub struct EnsembleDefinition {
    pub name: String,
    pub coordinator_role: RoleSchema,
    pub member_role: RoleSchema,
    /// Paths the membership predicate reads (role-qualified).
    pub membership_paths: Vec<KnowledgePath>,
    /// Paths the exchange function reads (role-qualified).
    pub exchange_paths: Vec<KnowledgePath>,
    pub schedule: Schedule,
    membership: Arc<MembershipFn>,
    exchange: Arc<ExchangeFn>,
}

impl EnsembleDefinition {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        coordinator_role: RoleSchema,
        member_role: RoleSchema,
        membership_paths: Vec<KnowledgePath>,
        exchange_paths: Vec<KnowledgePath>,
        schedule: Schedule,
        membership: Arc<MembershipFn>,
        exchange: Arc<ExchangeFn>,
    ) -> Result<Arc<Self>, StructuralError> {
        let definition = Self {
            name: name.into(),
            coordinator_role,
            member_role,
            membership_paths,
            exchange_paths,
            schedule,
            membership,
            exchange,
        };
        definition.validate()?;
        Ok(Arc::new(definition))
    }

    /// Deployment-time structural validation. Fatal before any task is
    /// scheduled.
    fn validate(&self) -> Result<(), StructuralError> {
        if self.name.is_empty() {
            return Err(StructuralError::BadEnsemble {
                ensemble: "<unnamed>".to_string(),
                reason: "ensemble needs a name".to_string(),
            });
        }
        if self.membership_paths.is_empty() {
            return Err(StructuralError::BadEnsemble {
                ensemble: self.name.clone(),
                reason: "membership predicate references no knowledge paths".to_string(),
            });
        }
        for path in self.membership_paths.iter().chain(&self.exchange_paths) {
            let schema = match path.role() {
                RoleSelector::Coordinator => &self.coordinator_role,
                RoleSelector::Member => &self.member_role,
                RoleSelector::Own => {
                    return Err(StructuralError::BadEnsemble {
                        ensemble: self.name.clone(),
                        reason: format!(
                            "path '{}' does not cross the role boundary",
                            path
                        ),
                    })
                }
            };
            if !schema.has_field(path.field_name()) {
                return Err(StructuralError::BadEnsemble {
                    ensemble: self.name.clone(),
                    reason: format!(
                        "path '{}' is not declared in the {:?} role schema",
                        path,
                        path.role()
                    ),
                });
            }
        }
        Ok(())
    }

    fn read_paths_for(&self, role: RoleSelector) -> Vec<KnowledgePath> {
        let mut paths: Vec<KnowledgePath> = self
            .membership_paths
            .iter()
            .chain(&self.exchange_paths)
            .filter(|p| p.role() == role)
            .cloned()
            .collect();
        paths.dedup();
        paths
    }
}

/// The membership-evaluation task body for one component instance and
/// one ensemble definition.
///
/// Each invocation pairs the owning component against every other known
/// store (local or replica), in both orientations: own-as-coordinator
/// and own-as-member.
pub struct EnsembleTask {
    component_id: String,
    definition: Arc<EnsembleDefinition>,
    registry: Arc<KnowledgeRegistry>,
    name: String,
}

impl EnsembleTask {
    pub fn new(
        component_id: impl Into<String>,
        definition: Arc<EnsembleDefinition>,
        registry: Arc<KnowledgeRegistry>,
    ) -> Self {
        let component_id = component_id.into();
        let name = format!("ensemble:{}:{}", definition.name, component_id);
        Self {
            component_id,
            definition,
            registry,
            name,
        }
    }

    /// Evaluates one (coordinator, member) pairing where the owning
    /// component plays `own_role`. Returns true when the exchange ran.
    fn evaluate_pair(
        &self,
        own: &LocalStore,
        own_role: RoleSelector,
        other: &dyn KnowledgeStore,
    ) -> Result<bool, ExecutionError> {
        let other_role = match own_role {
            RoleSelector::Coordinator => RoleSelector::Member,
            RoleSelector::Member => RoleSelector::Coordinator,
            RoleSelector::Own => unreachable!("ensembles pair roles, not Own"),
        };

        let own_paths = self.definition.read_paths_for(own_role);
        let other_paths = self.definition.read_paths_for(other_role);

        // NotFound on either side means the candidate simply cannot play
        // the role right now (e.g. a replica that has not converged yet):
        // membership is unsatisfied, not an error.
        let own_values = match own.get(&own_paths) {
            Ok(values) => values,
            Err(KnowledgeError::NotFound(missing)) => {
                trace!(ensemble = %self.definition.name, %missing, "own side incomplete");
                return Ok(false);
            }
            Err(other) => return Err(other.into()),
        };
        let other_values = match other.get(&other_paths) {
            Ok(values) => values,
            Err(KnowledgeError::NotFound(missing)) => {
                trace!(ensemble = %self.definition.name, %missing, "candidate side incomplete");
                return Ok(false);
            }
            Err(other) => return Err(other.into()),
        };

        let mut values = own_values;
        for path in &other_paths {
            if let Some(value) = other_values.value(path) {
                values.set_value(path.clone(), value.clone());
            }
        }
        let view = EnsembleView { values };

        if !(self.definition.membership)(&view)? {
            return Ok(false);
        }

        let (coordinator, member) = if own_role == RoleSelector::Coordinator {
            (own.id(), other.id())
        } else {
            (other.id(), own.id())
        };
        debug!(
            ensemble = %self.definition.name,
            coordinator,
            member,
            "membership satisfied, running knowledge exchange"
        );

        let writes = (self.definition.exchange)(&view)?;
        let mut own_writes = Vec::new();
        for (path, value) in writes {
            if path.role() == own_role {
                own_writes.push((path.with_role(RoleSelector::Own), value));
            } else {
                // The other side is updated by its own node running the
                // mirrored evaluation; writing a replica is disallowed.
                if !other.is_local(&path) {
                    trace!(ensemble = %self.definition.name, %path, "dropping write to remote side");
                }
            }
        }
        if !own_writes.is_empty() {
            own.update(own_writes)?;
        }
        Ok(true)
    }
}

impl TaskBody for EnsembleTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, _trigger: &Trigger) -> Result<(), ExecutionError> {
        // The component may have been undeployed between scheduling and
        // execution; that is not an error.
        let Some(own) = self.registry.local(&self.component_id) else {
            return Ok(());
        };

        for other in self.registry.pairing_candidates(&self.component_id) {
            self.evaluate_pair(&own, RoleSelector::Coordinator, other.as_ref())?;
            self.evaluate_pair(&own, RoleSelector::Member, other.as_ref())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{KnowledgeData, ReplicaStore};
    use murmur_env::NodeId;
    use serde_json::json;

    fn follower_definition() -> Arc<EnsembleDefinition> {
        // Convoy: a member follows a coordinator on the same route and
        // copies the coordinator's position.
        let coord_pos = KnowledgePath::parse("coord.position").unwrap();
        let member_route = KnowledgePath::parse("member.route").unwrap();
        let coord_route = KnowledgePath::parse("coord.route").unwrap();

        let membership_paths = vec![coord_route.clone(), member_route.clone()];
        let exchange_paths = vec![coord_pos.clone()];

        EnsembleDefinition::new(
            "convoy",
            RoleSchema::new()
                .with_field("route", FieldType::String)
                .with_field("position", FieldType::Number),
            RoleSchema::new()
                .with_field("route", FieldType::String)
                .with_field("leader_position", FieldType::Any),
            membership_paths,
            exchange_paths,
            Schedule::periodic(100),
            Arc::new(move |view: &EnsembleView| {
                Ok(view.get("coord.route") == view.get("member.route"))
            }),
            Arc::new(move |view: &EnsembleView| {
                let position = view
                    .get("coord.position")
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(vec![(
                    KnowledgePath::parse("member.leader_position").unwrap(),
                    position,
                )])
            }),
        )
        .unwrap()
    }

    fn store(id: &str, route: &str, position: i64) -> Arc<LocalStore> {
        let mut fields = BTreeMap::new();
        fields.insert("route".to_string(), json!(route));
        fields.insert("position".to_string(), json!(position));
        Arc::new(LocalStore::new(id, fields))
    }

    #[test]
    fn test_exchange_runs_when_predicate_holds() {
        let registry = Arc::new(KnowledgeRegistry::new());
        let leader = store("leader", "A4", 42);
        let follower = store("follower", "A4", 7);
        registry.add_local(leader);
        registry.add_local(Arc::clone(&follower));

        let task = EnsembleTask::new("follower", follower_definition(), Arc::clone(&registry));
        task.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();

        assert_eq!(follower.field_value("leader_position"), Some(json!(42)));
    }

    #[test]
    fn test_target_untouched_when_predicate_false() {
        let registry = Arc::new(KnowledgeRegistry::new());
        let leader = store("leader", "A4", 42);
        let follower = store("follower", "B1", 7);
        registry.add_local(leader);
        registry.add_local(Arc::clone(&follower));

        let task = EnsembleTask::new("follower", follower_definition(), Arc::clone(&registry));
        task.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();

        assert_eq!(follower.field_value("leader_position"), None);
    }

    #[test]
    fn test_member_side_exchange_against_replica() {
        let registry = Arc::new(KnowledgeRegistry::new());
        let follower = store("follower", "A4", 7);
        registry.add_local(Arc::clone(&follower));

        // Leader knowledge arrives only as a disseminated replica.
        let mut values = BTreeMap::new();
        values.insert("route".to_string(), json!("A4"));
        values.insert("position".to_string(), json!(99));
        registry.apply_knowledge(&KnowledgeData {
            component_id: "leader".to_string(),
            source: NodeId::new(2),
            version: 1,
            values,
        });

        let task = EnsembleTask::new("follower", follower_definition(), Arc::clone(&registry));
        task.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();

        assert_eq!(follower.field_value("leader_position"), Some(json!(99)));
    }

    #[test]
    fn test_incomplete_replica_is_not_an_error() {
        let registry = Arc::new(KnowledgeRegistry::new());
        let follower = store("follower", "A4", 7);
        registry.add_local(Arc::clone(&follower));

        // Replica exists but has no knowledge yet.
        let _ = registry.replica("leader", NodeId::new(2));
        let replica: Arc<ReplicaStore> = registry.replica("leader", NodeId::new(2));
        assert_eq!(replica.version(), 0);

        let task = EnsembleTask::new("follower", follower_definition(), Arc::clone(&registry));
        task.invoke(&Trigger::Timed { period_ms: 100 }).unwrap();
        assert_eq!(follower.field_value("leader_position"), None);
    }

    #[test]
    fn test_predicate_error_is_execution_failure() {
        let registry = Arc::new(KnowledgeRegistry::new());
        registry.add_local(store("a", "A4", 1));
        registry.add_local(store("b", "A4", 2));

        let definition = EnsembleDefinition::new(
            "broken",
            RoleSchema::new().with_field("route", FieldType::String),
            RoleSchema::new().with_field("route", FieldType::String),
            vec![KnowledgePath::parse("coord.route").unwrap()],
            vec![],
            Schedule::periodic(100),
            Arc::new(|_view: &EnsembleView| {
                Err(ExecutionError::Membership("bad predicate".to_string()))
            }),
            Arc::new(|_view: &EnsembleView| Ok(vec![])),
        )
        .unwrap();

        let task = EnsembleTask::new("a", definition, Arc::clone(&registry));
        let err = task.invoke(&Trigger::Timed { period_ms: 100 }).unwrap_err();
        assert!(matches!(err, ExecutionError::Membership(_)));
    }

    #[test]
    fn test_definition_validation() {
        // Path not declared in the role schema.
        let result = EnsembleDefinition::new(
            "bad",
            RoleSchema::new().with_field("route", FieldType::String),
            RoleSchema::new(),
            vec![KnowledgePath::parse("coord.position").unwrap()],
            vec![],
            Schedule::periodic(100),
            Arc::new(|_: &EnsembleView| Ok(true)),
            Arc::new(|_: &EnsembleView| Ok(vec![])),
        );
        assert!(result.is_err());

        // Self-path does not cross the role boundary.
        let result = EnsembleDefinition::new(
            "bad2",
            RoleSchema::new().with_field("route", FieldType::String),
            RoleSchema::new(),
            vec![KnowledgePath::parse("self.route").unwrap()],
            vec![],
            Schedule::periodic(100),
            Arc::new(|_: &EnsembleView| Ok(true)),
            Arc::new(|_: &EnsembleView| Ok(vec![])),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_role_schema_accepts() {
        let schema = RoleSchema::new()
            .with_field("route", FieldType::String)
            .with_field("position", FieldType::Number);

        let mut values = BTreeMap::new();
        values.insert("route".to_string(), json!("A4"));
        values.insert("position".to_string(), json!(3));
        assert!(schema.accepts(&values));

        values.insert("position".to_string(), json!("not a number"));
        assert!(!schema.accepts(&values));

        values.remove("position");
        assert!(!schema.accepts(&values));
    }
}
