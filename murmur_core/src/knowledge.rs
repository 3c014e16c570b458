//! Knowledge stores, paths and triggers.
//!
//! Every component instance owns exactly one [`LocalStore`]; the
//! dissemination stack additionally maintains read-only [`ReplicaStore`]s
//! mirroring the last-known snapshot of remote components. Both are
//! addressed through [`KnowledgePath`]s, which may cross a
//! coordinator/member role boundary inside an ensemble definition.

use murmur_env::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

/// Knowledge values are JSON values: typed enough for schema checks,
/// loose enough to cross node boundaries without shared type registries.
pub type Value = serde_json::Value;

/// Errors surfaced by knowledge store queries and writes.
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// At least one requested path has no value anywhere in the store.
    #[error("No value for knowledge path(s): {0}")]
    NotFound(String),

    /// A write targeted a store the writer does not own.
    #[error("Write to non-local knowledge store '{0}'")]
    ReplicaWrite(String),
}

/// Malformed definitions: fatal at deployment/parse time, before the
/// engine starts (never recovered at the task boundary).
#[derive(Debug, Error)]
pub enum StructuralError {
    #[error("Malformed knowledge path '{path}': {reason}")]
    BadPath { path: String, reason: String },

    #[error("Ensemble '{ensemble}' is malformed: {reason}")]
    BadEnsemble { ensemble: String, reason: String },

    #[error("Component '{component}' is malformed: {reason}")]
    BadComponent { component: String, reason: String },
}

/// Which side of an ensemble a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoleSelector {
    /// The coordinator side of an ensemble.
    Coordinator,
    /// The member side of an ensemble.
    Member,
    /// The component's own knowledge (no role boundary crossed).
    Own,
}

impl RoleSelector {
    fn parse(token: &str) -> Option<RoleSelector> {
        match token {
            "coord" | "coordinator" => Some(RoleSelector::Coordinator),
            "member" => Some(RoleSelector::Member),
            "self" => Some(RoleSelector::Own),
            _ => None,
        }
    }

    fn token(&self) -> &'static str {
        match self {
            RoleSelector::Coordinator => "coord",
            RoleSelector::Member => "member",
            RoleSelector::Own => "self",
        }
    }
}

/// One step of a knowledge path below the role selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PathNode {
    /// A named field of the store.
    Field(String),
    /// A key into a map-valued field.
    MapKey(String),
}

/// Structured address into a knowledge store.
///
/// Immutable once built. When the role selector is not `Own`, the path
/// crosses a role boundary and must carry at least one field node (the
/// overall length invariant from the data model: role + field ≥ 2).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KnowledgePath {
    role: RoleSelector,
    nodes: Vec<PathNode>,
}

impl KnowledgePath {
    /// Builds a path, enforcing the role-boundary length invariant.
    pub fn new(role: RoleSelector, nodes: Vec<PathNode>) -> Result<Self, StructuralError> {
        if nodes.is_empty() {
            return Err(StructuralError::BadPath {
                path: role.token().to_string(),
                reason: "path needs at least one field below the role selector".to_string(),
            });
        }
        if !matches!(nodes[0], PathNode::Field(_)) {
            return Err(StructuralError::BadPath {
                path: format!("{}...", role.token()),
                reason: "first node below the role selector must be a field".to_string(),
            });
        }
        Ok(Self { role, nodes })
    }

    /// Shorthand for a single-field path.
    pub fn field(role: RoleSelector, name: impl Into<String>) -> Self {
        Self {
            role,
            nodes: vec![PathNode::Field(name.into())],
        }
    }

    /// Parses `"coord.position"`, `"member.routes.home"`, `"self.battery"`.
    ///
    /// The first dotted token is the role selector, the second the field,
    /// any further tokens are map keys.
    pub fn parse(text: &str) -> Result<Self, StructuralError> {
        let mut parts = text.split('.');
        let role_token = parts.next().unwrap_or("");
        let role = RoleSelector::parse(role_token).ok_or_else(|| StructuralError::BadPath {
            path: text.to_string(),
            reason: format!("unknown role selector '{}'", role_token),
        })?;
        let mut nodes = Vec::new();
        for (i, part) in parts.enumerate() {
            if part.is_empty() {
                return Err(StructuralError::BadPath {
                    path: text.to_string(),
                    reason: "empty path segment".to_string(),
                });
            }
            if i == 0 {
                nodes.push(PathNode::Field(part.to_string()));
            } else {
                nodes.push(PathNode::MapKey(part.to_string()));
            }
        }
        Self::new(role, nodes)
    }

    /// The role selector of this path.
    pub fn role(&self) -> RoleSelector {
        self.role
    }

    /// The nodes below the role selector.
    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    /// The top-level field this path addresses.
    pub fn field_name(&self) -> &str {
        match &self.nodes[0] {
            PathNode::Field(name) => name,
            // new() guarantees the first node is a field
            PathNode::MapKey(key) => key,
        }
    }

    /// The same path rebound to a different role side.
    pub fn with_role(&self, role: RoleSelector) -> Self {
        Self {
            role,
            nodes: self.nodes.clone(),
        }
    }
}

impl std::fmt::Display for KnowledgePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.role.token())?;
        for node in &self.nodes {
            match node {
                PathNode::Field(name) => write!(f, ".{}", name)?,
                PathNode::MapKey(key) => write!(f, ".{}", key)?,
            }
        }
        Ok(())
    }
}

/// Result of a batch knowledge query.
///
/// Every requested path appears exactly once, classified as found (with
/// its value — `Value::Null` is a legitimate found value, distinct from
/// absence) or not found.
#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    found: HashMap<KnowledgePath, Value>,
    not_found: HashSet<KnowledgePath>,
}

impl ValueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a value for a path.
    pub fn set_value(&mut self, path: KnowledgePath, value: Value) {
        self.not_found.remove(&path);
        self.found.insert(path, value);
    }

    /// Records that a path has no value.
    pub fn set_not_found(&mut self, path: KnowledgePath) {
        if !self.found.contains_key(&path) {
            self.not_found.insert(path);
        }
    }

    /// The value for a path, if it was found.
    pub fn value(&self, path: &KnowledgePath) -> Option<&Value> {
        self.found.get(path)
    }

    /// Paths requested but absent from the store.
    pub fn not_found(&self) -> impl Iterator<Item = &KnowledgePath> {
        self.not_found.iter()
    }

    /// True when every requested path was found.
    pub fn is_complete(&self) -> bool {
        self.not_found.is_empty()
    }

    pub fn found_len(&self) -> usize {
        self.found.len()
    }
}

/// Predicate over a knowledge change or a periodic clock tick.
///
/// Stores fire `KnowledgeChange` triggers synchronously on successful
/// mutation; the scheduler coalesces repeated fires of the same trigger
/// into a single pending execution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Fires every `period_ms` milliseconds (plus jitter).
    Timed { period_ms: u64 },
    /// Fires when the addressed knowledge changes.
    KnowledgeChange { path: KnowledgePath },
}

/// Callback registered against a store for trigger fires.
pub trait TriggerListener: Send + Sync {
    fn triggered(&self, trigger: &Trigger);
}

/// Handle for unregistering a trigger listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    entries: Vec<(ListenerId, Trigger, Arc<dyn TriggerListener>)>,
}

impl ListenerTable {
    fn register(&mut self, trigger: Trigger, listener: Arc<dyn TriggerListener>) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, trigger, listener));
        id
    }

    fn unregister(&mut self, id: ListenerId) {
        self.entries.retain(|(lid, _, _)| *lid != id);
    }

    /// Listeners whose knowledge-change trigger matches one of the
    /// changed top-level fields.
    fn matching(&self, changed_fields: &HashSet<String>) -> Vec<(Trigger, Arc<dyn TriggerListener>)> {
        self.entries
            .iter()
            .filter(|(_, trigger, _)| match trigger {
                Trigger::KnowledgeChange { path } => changed_fields.contains(path.field_name()),
                Trigger::Timed { .. } => false,
            })
            .map(|(_, trigger, listener)| (trigger.clone(), Arc::clone(listener)))
            .collect()
    }
}

/// Common read/trigger contract of local stores and replicas.
pub trait KnowledgeStore: Send + Sync {
    /// Store id: the id of the component instance whose knowledge this is.
    fn id(&self) -> &str;

    /// Batch query. Fails the whole batch with `NotFound` when at least
    /// one requested path has no value in the store.
    fn get(&self, paths: &[KnowledgePath]) -> Result<ValueSet, KnowledgeError>;

    /// Batch query that classifies instead of failing.
    fn probe(&self, paths: &[KnowledgePath]) -> ValueSet;

    /// Registers a trigger listener; returns a handle for unregistering.
    fn register(&self, trigger: Trigger, listener: Arc<dyn TriggerListener>) -> ListenerId;

    /// Unregisters a previously registered listener. Idempotent.
    fn unregister(&self, id: ListenerId);

    /// Whether the path is owned by this node (writable here).
    fn is_local(&self, path: &KnowledgePath) -> bool;

    /// The set of locally-owned paths (what a publisher must snapshot).
    fn local_paths(&self) -> Vec<KnowledgePath>;
}

/// Looks a path up in a field map, descending into map-valued fields.
fn resolve<'a>(fields: &'a BTreeMap<String, Value>, path: &KnowledgePath) -> Option<&'a Value> {
    let mut nodes = path.nodes().iter();
    let first = match nodes.next()? {
        PathNode::Field(name) => fields.get(name)?,
        PathNode::MapKey(_) => return None,
    };
    let mut current = first;
    for node in nodes {
        let key = match node {
            PathNode::MapKey(key) => key,
            PathNode::Field(name) => name,
        };
        current = current.as_object()?.get(key)?;
    }
    Some(current)
}

fn probe_fields(fields: &BTreeMap<String, Value>, paths: &[KnowledgePath]) -> ValueSet {
    let mut result = ValueSet::new();
    for path in paths {
        match resolve(fields, path) {
            Some(value) => result.set_value(path.clone(), value.clone()),
            None => result.set_not_found(path.clone()),
        }
    }
    result
}

fn get_or_not_found(
    store_id: &str,
    fields: &BTreeMap<String, Value>,
    paths: &[KnowledgePath],
) -> Result<ValueSet, KnowledgeError> {
    let result = probe_fields(fields, paths);
    if result.is_complete() {
        Ok(result)
    } else {
        let missing: Vec<String> = result.not_found().map(|p| p.to_string()).collect();
        Err(KnowledgeError::NotFound(format!(
            "{} in store '{}'",
            missing.join(", "),
            store_id
        )))
    }
}

/// Knowledge owned by exactly one component instance.
///
/// Mutated only through [`LocalStore::update`], by the owning component's
/// own process executions or ensemble exchanges. Writes are atomic at
/// field granularity and fire matching triggers synchronously before
/// `update` returns.
pub struct LocalStore {
    id: String,
    fields: Mutex<BTreeMap<String, Value>>,
    listeners: Mutex<ListenerTable>,
}

impl LocalStore {
    pub fn new(id: impl Into<String>, initial: BTreeMap<String, Value>) -> Self {
        Self {
            id: id.into(),
            fields: Mutex::new(initial),
            listeners: Mutex::new(ListenerTable::default()),
        }
    }

    /// Applies a batch of writes and notifies matching triggers.
    ///
    /// Listeners run after the field lock is released so that they can
    /// query the store; they see the post-mutation values.
    pub fn update(&self, writes: Vec<(KnowledgePath, Value)>) -> Result<(), KnowledgeError> {
        let mut changed = HashSet::new();
        {
            let mut fields = self.fields.lock().unwrap();
            for (path, value) in writes {
                write_field(&mut fields, &path, value);
                changed.insert(path.field_name().to_string());
            }
        }
        self.notify(&changed);
        Ok(())
    }

    /// Current value of a single top-level field (test/diagnostic helper).
    pub fn field_value(&self, name: &str) -> Option<Value> {
        self.fields.lock().unwrap().get(name).cloned()
    }

    /// Snapshot of all fields, for publishing.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.fields.lock().unwrap().clone()
    }

    fn notify(&self, changed: &HashSet<String>) {
        if changed.is_empty() {
            return;
        }
        let matching = self.listeners.lock().unwrap().matching(changed);
        for (trigger, listener) in matching {
            listener.triggered(&trigger);
        }
    }
}

fn write_field(fields: &mut BTreeMap<String, Value>, path: &KnowledgePath, value: Value) {
    let field = path.field_name().to_string();
    if path.nodes().len() == 1 {
        fields.insert(field, value);
        return;
    }
    // Descend into map keys, materializing objects along the way.
    let mut current = fields
        .entry(field)
        .or_insert_with(|| Value::Object(Default::default()));
    for node in &path.nodes()[1..path.nodes().len() - 1] {
        let key = match node {
            PathNode::MapKey(key) | PathNode::Field(key) => key.clone(),
        };
        if !current.is_object() {
            *current = Value::Object(Default::default());
        }
        current = current
            .as_object_mut()
            .unwrap()
            .entry(key)
            .or_insert_with(|| Value::Object(Default::default()));
    }
    let last = match path.nodes().last().unwrap() {
        PathNode::MapKey(key) | PathNode::Field(key) => key.clone(),
    };
    if !current.is_object() {
        *current = Value::Object(Default::default());
    }
    current.as_object_mut().unwrap().insert(last, value);
}

impl KnowledgeStore for LocalStore {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, paths: &[KnowledgePath]) -> Result<ValueSet, KnowledgeError> {
        let fields = self.fields.lock().unwrap();
        get_or_not_found(&self.id, &fields, paths)
    }

    fn probe(&self, paths: &[KnowledgePath]) -> ValueSet {
        let fields = self.fields.lock().unwrap();
        probe_fields(&fields, paths)
    }

    fn register(&self, trigger: Trigger, listener: Arc<dyn TriggerListener>) -> ListenerId {
        self.listeners.lock().unwrap().register(trigger, listener)
    }

    fn unregister(&self, id: ListenerId) {
        self.listeners.lock().unwrap().unregister(id);
    }

    fn is_local(&self, _path: &KnowledgePath) -> bool {
        true
    }

    fn local_paths(&self) -> Vec<KnowledgePath> {
        let fields = self.fields.lock().unwrap();
        fields
            .keys()
            .map(|name| KnowledgePath::field(RoleSelector::Own, name.clone()))
            .collect()
    }
}

/// A versioned snapshot of one component's knowledge: the unit of
/// dissemination.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeData {
    /// Component instance whose knowledge this is.
    pub component_id: String,
    /// Node that published the snapshot.
    pub source: NodeId,
    /// Logical version, incremented per publish at the source.
    pub version: u64,
    /// Field values at snapshot time.
    pub values: BTreeMap<String, Value>,
}

#[derive(Default)]
struct ReplicaState {
    fields: BTreeMap<String, Value>,
    version: u64,
}

/// Node-local, read-only mirror of a remote component's last-known
/// disseminated knowledge.
///
/// Mutated only by the dissemination stack's receive path, and only when
/// the incoming snapshot is strictly newer than what is already held.
pub struct ReplicaStore {
    component_id: String,
    source: NodeId,
    state: Mutex<ReplicaState>,
    listeners: Mutex<ListenerTable>,
}

impl ReplicaStore {
    pub fn new(component_id: impl Into<String>, source: NodeId) -> Self {
        Self {
            component_id: component_id.into(),
            source,
            state: Mutex::new(ReplicaState::default()),
            listeners: Mutex::new(ListenerTable::default()),
        }
    }

    /// The node this replica mirrors.
    pub fn source(&self) -> NodeId {
        self.source
    }

    /// The version currently held (0 = nothing received yet).
    pub fn version(&self) -> u64 {
        self.state.lock().unwrap().version
    }

    /// Applies a disseminated snapshot.
    ///
    /// Returns false (and leaves the replica untouched) when the snapshot
    /// is not strictly newer than the one already held: stale and
    /// duplicate deliveries are expected under gossip.
    pub fn apply(&self, data: &KnowledgeData) -> bool {
        let changed: HashSet<String>;
        {
            let mut state = self.state.lock().unwrap();
            if data.version <= state.version {
                debug!(
                    component = %self.component_id,
                    held = state.version,
                    incoming = data.version,
                    "replica rejected stale knowledge"
                );
                return false;
            }
            changed = data.values.keys().cloned().collect();
            state.fields = data.values.clone();
            state.version = data.version;
        }
        let matching = self.listeners.lock().unwrap().matching(&changed);
        for (trigger, listener) in matching {
            listener.triggered(&trigger);
        }
        true
    }
}

impl KnowledgeStore for ReplicaStore {
    fn id(&self) -> &str {
        &self.component_id
    }

    fn get(&self, paths: &[KnowledgePath]) -> Result<ValueSet, KnowledgeError> {
        let state = self.state.lock().unwrap();
        get_or_not_found(&self.component_id, &state.fields, paths)
    }

    fn probe(&self, paths: &[KnowledgePath]) -> ValueSet {
        let state = self.state.lock().unwrap();
        probe_fields(&state.fields, paths)
    }

    fn register(&self, trigger: Trigger, listener: Arc<dyn TriggerListener>) -> ListenerId {
        self.listeners.lock().unwrap().register(trigger, listener)
    }

    fn unregister(&self, id: ListenerId) {
        self.listeners.lock().unwrap().unregister(id);
    }

    fn is_local(&self, _path: &KnowledgePath) -> bool {
        false
    }

    fn local_paths(&self) -> Vec<KnowledgePath> {
        Vec::new()
    }
}

/// Node-local arena of knowledge stores, keyed by component id.
///
/// Local stores are added/removed by the runtime binder as components are
/// deployed; replicas are created lazily when knowledge from a new remote
/// component first arrives. Ordered maps so that iteration (publishing,
/// ensemble pairing) is deterministic.
#[derive(Default)]
pub struct KnowledgeRegistry {
    locals: Mutex<BTreeMap<String, Arc<LocalStore>>>,
    replicas: Mutex<BTreeMap<String, Arc<ReplicaStore>>>,
}

impl KnowledgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_local(&self, store: Arc<LocalStore>) {
        self.locals
            .lock()
            .unwrap()
            .insert(store.id().to_string(), store);
    }

    pub fn remove_local(&self, component_id: &str) -> Option<Arc<LocalStore>> {
        self.locals.lock().unwrap().remove(component_id)
    }

    pub fn local(&self, component_id: &str) -> Option<Arc<LocalStore>> {
        self.locals.lock().unwrap().get(component_id).cloned()
    }

    pub fn locals(&self) -> Vec<Arc<LocalStore>> {
        self.locals.lock().unwrap().values().cloned().collect()
    }

    /// The replica mirroring a remote component, creating it on first use.
    pub fn replica(&self, component_id: &str, source: NodeId) -> Arc<ReplicaStore> {
        let mut replicas = self.replicas.lock().unwrap();
        Arc::clone(
            replicas
                .entry(component_id.to_string())
                .or_insert_with(|| Arc::new(ReplicaStore::new(component_id, source))),
        )
    }

    pub fn replicas(&self) -> Vec<Arc<ReplicaStore>> {
        self.replicas.lock().unwrap().values().cloned().collect()
    }

    /// Applies incoming knowledge to the matching replica.
    ///
    /// Knowledge about a component we host locally is ignored: the local
    /// store is authoritative for it.
    pub fn apply_knowledge(&self, data: &KnowledgeData) -> bool {
        if self.locals.lock().unwrap().contains_key(&data.component_id) {
            return false;
        }
        self.replica(&data.component_id, data.source).apply(data)
    }

    /// All stores an ensemble may pair a component against: every other
    /// local store plus every replica of a component not hosted here.
    pub fn pairing_candidates(&self, component_id: &str) -> Vec<Arc<dyn KnowledgeStore>> {
        let locals = self.locals.lock().unwrap();
        let replicas = self.replicas.lock().unwrap();
        let mut result: Vec<Arc<dyn KnowledgeStore>> = Vec::new();
        for (id, store) in locals.iter() {
            if id != component_id {
                result.push(Arc::clone(store) as Arc<dyn KnowledgeStore>);
            }
        }
        for (id, replica) in replicas.iter() {
            if id != component_id && !locals.contains_key(id) {
                result.push(Arc::clone(replica) as Arc<dyn KnowledgeStore>);
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn own(name: &str) -> KnowledgePath {
        KnowledgePath::field(RoleSelector::Own, name)
    }

    #[test]
    fn test_path_parse_roundtrip() {
        let path = KnowledgePath::parse("coord.routes.home").unwrap();
        assert_eq!(path.role(), RoleSelector::Coordinator);
        assert_eq!(path.field_name(), "routes");
        assert_eq!(path.to_string(), "coord.routes.home");
    }

    #[test]
    fn test_path_requires_field_below_role() {
        assert!(KnowledgePath::parse("member").is_err());
        assert!(KnowledgePath::parse("coord.").is_err());
        assert!(KnowledgePath::parse("pilot.position").is_err());
    }

    #[test]
    fn test_value_set_distinguishes_null_from_absent() {
        let store = LocalStore::new("c1", BTreeMap::new());
        store
            .update(vec![(own("maybe"), Value::Null)])
            .unwrap();

        let result = store.probe(&[own("maybe"), own("missing")]);
        assert_eq!(result.value(&own("maybe")), Some(&Value::Null));
        assert_eq!(result.value(&own("missing")), None);
        assert!(!result.is_complete());
        assert_eq!(result.found_len(), 1);
    }

    #[test]
    fn test_get_fails_whole_batch_on_missing_path() {
        let store = LocalStore::new("c1", BTreeMap::new());
        store.update(vec![(own("position"), json!(4))]).unwrap();

        let err = store.get(&[own("position"), own("velocity")]).unwrap_err();
        assert!(matches!(err, KnowledgeError::NotFound(_)));
    }

    #[test]
    fn test_map_key_paths() {
        let store = LocalStore::new("c1", BTreeMap::new());
        let deep = KnowledgePath::parse("self.routes.home").unwrap();
        store.update(vec![(deep.clone(), json!("A4"))]).unwrap();

        let got = store.get(&[deep.clone()]).unwrap();
        assert_eq!(got.value(&deep), Some(&json!("A4")));
        assert_eq!(store.field_value("routes"), Some(json!({"home": "A4"})));
    }

    struct CountingListener(Mutex<u32>);
    impl TriggerListener for CountingListener {
        fn triggered(&self, _trigger: &Trigger) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn test_write_fires_matching_trigger_synchronously() {
        let store = LocalStore::new("c1", BTreeMap::new());
        let listener = Arc::new(CountingListener(Mutex::new(0)));
        store.register(
            Trigger::KnowledgeChange { path: own("position") },
            listener.clone(),
        );

        store.update(vec![(own("position"), json!(1))]).unwrap();
        assert_eq!(*listener.0.lock().unwrap(), 1);

        // Unrelated field does not fire
        store.update(vec![(own("battery"), json!(0.9))]).unwrap();
        assert_eq!(*listener.0.lock().unwrap(), 1);
    }

    #[test]
    fn test_unregister_stops_notifications() {
        let store = LocalStore::new("c1", BTreeMap::new());
        let listener = Arc::new(CountingListener(Mutex::new(0)));
        let id = store.register(
            Trigger::KnowledgeChange { path: own("position") },
            listener.clone(),
        );
        store.unregister(id);
        store.unregister(id); // idempotent

        store.update(vec![(own("position"), json!(1))]).unwrap();
        assert_eq!(*listener.0.lock().unwrap(), 0);
    }

    fn data(version: u64, value: i64) -> KnowledgeData {
        let mut values = BTreeMap::new();
        values.insert("position".to_string(), json!(value));
        KnowledgeData {
            component_id: "remote".to_string(),
            source: NodeId::new(7),
            version,
            values,
        }
    }

    #[test]
    fn test_replica_version_monotonicity() {
        let replica = ReplicaStore::new("remote", NodeId::new(7));

        assert!(replica.apply(&data(1, 10)));
        assert_eq!(replica.version(), 1);

        // Same version again: rejected, unchanged
        assert!(!replica.apply(&data(1, 99)));
        assert_eq!(replica.get(&[own("position")]).unwrap().value(&own("position")), Some(&json!(10)));

        // Older version: rejected
        assert!(!replica.apply(&data(0, 99)));

        // Newer version: accepted
        assert!(replica.apply(&data(2, 20)));
        assert_eq!(replica.version(), 2);
        assert_eq!(replica.get(&[own("position")]).unwrap().value(&own("position")), Some(&json!(20)));
    }

    #[test]
    fn test_replica_fires_triggers_on_accepted_update_only() {
        let replica = ReplicaStore::new("remote", NodeId::new(7));
        let listener = Arc::new(CountingListener(Mutex::new(0)));
        replica.register(
            Trigger::KnowledgeChange { path: own("position") },
            listener.clone(),
        );

        replica.apply(&data(1, 10));
        replica.apply(&data(1, 10)); // duplicate, no fire
        assert_eq!(*listener.0.lock().unwrap(), 1);
    }

    #[test]
    fn test_registry_ignores_knowledge_about_local_components() {
        let registry = KnowledgeRegistry::new();
        registry.add_local(Arc::new(LocalStore::new("remote", BTreeMap::new())));

        assert!(!registry.apply_knowledge(&data(1, 10)));
    }

    #[test]
    fn test_registry_pairing_candidates() {
        let registry = KnowledgeRegistry::new();
        registry.add_local(Arc::new(LocalStore::new("a", BTreeMap::new())));
        registry.add_local(Arc::new(LocalStore::new("b", BTreeMap::new())));
        registry.apply_knowledge(&data(1, 10)); // creates replica "remote"

        let candidates = registry.pairing_candidates("a");
        let mut ids: Vec<&str> = candidates.iter().map(|s| s.id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["b", "remote"]);
    }
}
