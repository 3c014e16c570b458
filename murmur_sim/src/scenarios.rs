//! Scenario catalogue.

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioId {
    /// Leader/follower convoy over a clean medium
    Convoy,

    /// Convoy under heavy random frame loss
    GossipLoss,

    /// Convoy through a partition that later heals
    PartitionHeal,

    /// Many-node convoy, everyone following one leader
    Crowd,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Convoy,
            ScenarioId::GossipLoss,
            ScenarioId::PartitionHeal,
            ScenarioId::Crowd,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "convoy",
            ScenarioId::GossipLoss => "gossip_loss",
            ScenarioId::PartitionHeal => "partition_heal",
            ScenarioId::Crowd => "crowd",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Convoy => "Followers pick up the leader's position through the ensemble",
            ScenarioId::GossipLoss => "40% frame loss; periodic republish must still converge",
            ScenarioId::PartitionHeal => "Leader partitioned away, then healed; followers catch up",
            ScenarioId::Crowd => "A dozen followers converging on one leader",
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "convoy" => Ok(ScenarioId::Convoy),
            "gossip_loss" | "gossiploss" | "loss" => Ok(ScenarioId::GossipLoss),
            "partition_heal" | "partitionheal" | "partition" => Ok(ScenarioId::PartitionHeal),
            "crowd" => Ok(ScenarioId::Crowd),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scenario_names_round_trip() {
        for scenario in ScenarioId::all() {
            assert_eq!(scenario.name().parse::<ScenarioId>().unwrap(), scenario);
        }
        assert!("bogus".parse::<ScenarioId>().is_err());
    }
}
