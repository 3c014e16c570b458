//! Scenario runner: builds a world of nodes, drives virtual time, and
//! checks convergence properties at the end.

use crate::context::SimContext;
use crate::network::SimNetwork;
use crate::node::SimNode;
use crate::scenarios::ScenarioId;
use murmur_core::ensemble::{EnsembleDefinition, EnsembleView, FieldType, RoleSchema};
use murmur_core::runtime::{ComponentDefinition, ProcessDefinition};
use murmur_core::{KnowledgePath, Schedule, Value, ValueSet};
use murmur_env::{NodeContext, NodeId};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of one scenario run.
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final virtual time in milliseconds
    pub final_time_ms: u64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during the run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default)]
pub struct ScenarioMetrics {
    /// Frames offered to the medium
    pub frames_sent: u64,

    /// Frames dropped by loss or partition
    pub frames_dropped: u64,
}

/// Runs convergence scenarios.
pub struct ScenarioRunner {
    seed: u64,
    num_nodes: usize,
    duration_ms: u64,
    tick_ms: u64,
}

const MTU: usize = 128;
const PUBLISH_PERIOD_MS: u64 = 50;

impl ScenarioRunner {
    pub fn new(seed: u64, num_nodes: usize) -> Self {
        Self {
            seed,
            num_nodes: num_nodes.max(2),
            duration_ms: 5_000,
            tick_ms: 5,
        }
    }

    /// Sets the virtual duration of the run.
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        info!(scenario = scenario.name(), seed = self.seed, "starting scenario");
        match scenario {
            ScenarioId::Convoy => self.run_convoy(scenario, self.num_nodes, 0.0),
            ScenarioId::GossipLoss => self.run_convoy(scenario, self.num_nodes, 0.4),
            ScenarioId::Crowd => self.run_convoy(scenario, self.num_nodes.max(13), 0.1),
            ScenarioId::PartitionHeal => self.run_partition_heal(),
        }
    }

    fn build_world(&self, num_nodes: usize, loss: f64) -> World {
        let context = SimContext::shared(self.seed);
        let network = SimNetwork::new(Arc::clone(&context), self.seed ^ 0x736e_6f77);
        network.controller().set_default_loss(loss);

        let mut nodes = Vec::with_capacity(num_nodes);
        for i in 0..num_nodes {
            let id = NodeId::new(i as u32 + 1);
            let node = SimNode::new(id, &network, MTU, PUBLISH_PERIOD_MS);
            if i == 0 {
                node.binder.component_added(leader_component()).expect("leader deploys");
            } else {
                node.binder
                    .component_added(follower_component(&format!("follower{}", id.as_u32())))
                    .expect("follower deploys");
            }
            node.binder.ensemble_deployed(convoy_ensemble());
            nodes.push(node);
        }
        World {
            context,
            network,
            nodes,
        }
    }

    fn run_convoy(&self, scenario: ScenarioId, num_nodes: usize, loss: f64) -> ScenarioResult {
        let world = self.build_world(num_nodes, loss);
        let ticks = world.advance(self.tick_ms, 0, self.duration_ms);

        let laggards = world.laggard_followers();
        let passed = laggards.is_empty();
        world.result(scenario, self.seed, ticks, passed, laggards)
    }

    fn run_partition_heal(&self) -> ScenarioResult {
        let world = self.build_world(self.num_nodes, 0.0);
        let leader = world.nodes[0].id;
        let followers: Vec<NodeId> = world.nodes[1..].iter().map(|n| n.id).collect();

        // Leader cut off for the first half of the run.
        world.network.controller().partition(vec![leader], followers);
        let mut ticks = world.advance(self.tick_ms, 0, self.duration_ms / 2);

        let mut failure: Option<String> = None;
        if world.laggard_followers().len() != world.nodes.len() - 1 {
            failure = Some("leader knowledge crossed an active partition".to_string());
        }

        world.network.controller().heal_all();
        ticks += world.advance(self.tick_ms, self.duration_ms / 2, self.duration_ms);

        let laggards = world.laggard_followers();
        if failure.is_none() && !laggards.is_empty() {
            failure = Some(format!("followers never caught up after heal: {:?}", laggards));
        }

        let passed = failure.is_none();
        ScenarioResult {
            scenario: ScenarioId::PartitionHeal,
            seed: self.seed,
            passed,
            total_ticks: ticks,
            final_time_ms: world.context.now_ms(),
            failure_reason: failure,
            metrics: world.metrics(),
        }
    }
}

struct World {
    context: Arc<SimContext>,
    network: Arc<SimNetwork>,
    nodes: Vec<SimNode>,
}

impl World {
    /// Drives the world from `from_ms` (exclusive) to `to_ms`, returning
    /// the number of ticks executed.
    fn advance(&self, tick_ms: u64, from_ms: u64, to_ms: u64) -> u64 {
        let mut ticks = 0;
        let mut now = from_ms;
        while now < to_ms {
            now += tick_ms;
            self.context.set_time(now);
            for node in &self.nodes {
                node.step(now);
            }
            // Rebroadcasts of just-delivered frames can be due in the
            // same tick; drain until the medium settles.
            loop {
                let due = self.network.deliveries_due(now);
                if due.is_empty() {
                    break;
                }
                for delivery in due {
                    if let Some(node) = self.nodes.iter().find(|n| n.id == delivery.to) {
                        node.deliver(&delivery.frame, &delivery.info, now);
                    }
                }
            }
            ticks += 1;
        }
        debug!(now, "world advanced");
        ticks
    }

    /// Followers that have not yet seen any leader position.
    fn laggard_followers(&self) -> Vec<String> {
        let mut laggards = Vec::new();
        for node in &self.nodes[1..] {
            let component = format!("follower{}", node.id.as_u32());
            let caught_up = node
                .registry()
                .local(&component)
                .and_then(|store| store.field_value("leader_position"))
                .and_then(|v| v.as_i64())
                .map(|p| p > 0)
                .unwrap_or(false);
            if !caught_up {
                laggards.push(component);
            }
        }
        laggards
    }

    fn metrics(&self) -> ScenarioMetrics {
        ScenarioMetrics {
            frames_sent: self.network.frames_sent(),
            frames_dropped: self.network.frames_dropped(),
        }
    }

    fn result(
        &self,
        scenario: ScenarioId,
        seed: u64,
        ticks: u64,
        passed: bool,
        laggards: Vec<String>,
    ) -> ScenarioResult {
        ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks: ticks,
            final_time_ms: self.context.now_ms(),
            failure_reason: if passed {
                None
            } else {
                Some(format!("followers without leader position: {:?}", laggards))
            },
            metrics: self.metrics(),
        }
    }
}

fn leader_component() -> ComponentDefinition {
    let position = KnowledgePath::parse("self.position").unwrap();
    let out = position.clone();
    let mut initial = BTreeMap::new();
    initial.insert("route".to_string(), json!("A4"));
    initial.insert("position".to_string(), json!(0));
    initial.insert("is_leader".to_string(), json!(true));
    ComponentDefinition::new("leader", initial).with_process(ProcessDefinition::new(
        "advance",
        vec![position.clone()],
        vec![position.clone()],
        Schedule::periodic(20),
        Arc::new(move |inputs: &ValueSet| {
            let current = inputs.value(&position).and_then(|v| v.as_i64()).unwrap_or(0);
            Ok(vec![(out.clone(), json!(current + 1))])
        }),
    ))
}

fn follower_component(id: &str) -> ComponentDefinition {
    let mut initial = BTreeMap::new();
    initial.insert("route".to_string(), json!("A4"));
    initial.insert("is_leader".to_string(), json!(false));
    ComponentDefinition::new(id, initial)
}

fn convoy_ensemble() -> Arc<EnsembleDefinition> {
    EnsembleDefinition::new(
        "convoy",
        RoleSchema::new()
            .with_field("route", FieldType::String)
            .with_field("position", FieldType::Number)
            .with_field("is_leader", FieldType::Bool),
        RoleSchema::new()
            .with_field("route", FieldType::String)
            .with_field("leader_position", FieldType::Any),
        vec![
            KnowledgePath::parse("coord.route").unwrap(),
            KnowledgePath::parse("coord.is_leader").unwrap(),
            KnowledgePath::parse("member.route").unwrap(),
        ],
        vec![KnowledgePath::parse("coord.position").unwrap()],
        Schedule::periodic(40),
        Arc::new(|view: &EnsembleView| {
            Ok(view.get("coord.is_leader") == Some(&json!(true))
                && view.get("coord.route") == view.get("member.route"))
        }),
        Arc::new(|view: &EnsembleView| {
            Ok(vec![(
                KnowledgePath::parse("member.leader_position").unwrap(),
                view.get("coord.position").cloned().unwrap_or(Value::Null),
            )])
        }),
    )
    .expect("convoy ensemble is structurally valid")
}
