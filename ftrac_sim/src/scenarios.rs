//! Canonical FTRAC scenarios.

use crate::presets;

use ftrac_core::{
    AgentSpec, ConsensusMode, Discipline, DisturbanceConfig, HysteresisParams, RunConfig, Scheme, Topology,
};
use serde::{Deserialize, Serialize};

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioId {
    /// FT-001: 3-node ring starting on its references, no disturbance
    RingSettling,

    /// FT-002: 3-node ring with tracking offsets, no disturbance
    RingOffset,

    /// FT-003: 3-node ring under uniform + sinusoidal disturbance
    DisturbedRing,

    /// FT-004: 9-node cluster exchanging references every 50 ms
    SampledNetwork,

    /// FT-005: linear Laplacian law on the 3-node ring
    LaplacianReference,

    /// FT-006: 4-node ring with one agent switched off
    DisabledAgent,

    /// FT-007: 9-node permutation cycle under disturbance
    NineNodeCycle,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::RingSettling,
            ScenarioId::RingOffset,
            ScenarioId::DisturbedRing,
            ScenarioId::SampledNetwork,
            ScenarioId::LaplacianReference,
            ScenarioId::DisabledAgent,
            ScenarioId::NineNodeCycle,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::RingSettling => "ring_settling",
            ScenarioId::RingOffset => "ring_offset",
            ScenarioId::DisturbedRing => "disturbed_ring",
            ScenarioId::SampledNetwork => "sampled_network",
            ScenarioId::LaplacianReference => "laplacian_reference",
            ScenarioId::DisabledAgent => "disabled_agent",
            ScenarioId::NineNodeCycle => "nine_node_cycle",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::RingSettling => "Ring 1->2->3->1 from x0 = z0 = (5, 1, 8); sigma must never leave the band",
            ScenarioId::RingOffset => "Ring with x0 = (5.5, 1, 7.5); gains adapt until sigma settles for good",
            ScenarioId::DisturbedRing => "Ring under U(-1.5, 1.5) + 0.5 + sin(2π·10 t) disturbance at dt = 1 ms",
            ScenarioId::SampledNetwork => "Cluster graph, consensus term held for 50 ms between exchanges",
            ScenarioId::LaplacianReference => "Linear -L z reference law on the ring, exponential agreement",
            ScenarioId::DisabledAgent => "Agent 4 disabled; neighbors skip it and it stays frozen",
            ScenarioId::NineNodeCycle => "Nine agents on one directed cycle, x0 = i, z0 = 5, disturbed",
        }
    }

    /// Builds the topology, configuration and pass checks for `seed`.
    pub fn setup(&self, seed: u64) -> ftrac_core::Result<ScenarioSetup> {
        let ring_offset = || presets::ring(&[5.5, 1.0, 7.5], &[5.0, 1.0, 8.0]);
        let base = RunConfig::default()
            .with_seed(seed)
            .with_hysteresis(HysteresisParams::new(0.5, 0.01, 0.02))
            .with_scheme(Scheme::Rk4);
        let disturbance = DisturbanceConfig::uniform_sinusoid(1.5, 0.5, 1.0, 10.0);

        let setup = match self {
            ScenarioId::RingSettling => ScenarioSetup {
                topology: presets::ring(&[5.0, 1.0, 8.0], &[5.0, 1.0, 8.0])?,
                config: base.with_dt(0.01).with_duration(20.0),
                checks: vec![PassCheck::StrictSettling, PassCheck::Agreement { factor: 1e-3 }],
            },
            ScenarioId::RingOffset => ScenarioSetup {
                topology: ring_offset()?,
                config: base.with_dt(0.01).with_duration(20.0),
                checks: vec![PassCheck::StrictSettling, PassCheck::Agreement { factor: 1e-3 }],
            },
            ScenarioId::DisturbedRing => ScenarioSetup {
                topology: ring_offset()?,
                config: base.with_dt(0.001).with_duration(30.0).with_disturbance(disturbance),
                checks: vec![PassCheck::PracticalBand, PassCheck::Agreement { factor: 1e-2 }],
            },
            ScenarioId::SampledNetwork => ScenarioSetup {
                topology: presets::cluster_nine(seed)?,
                config: base
                    .with_dt(0.001)
                    .with_duration(20.0)
                    .with_scheme(Scheme::Euler)
                    .with_discipline(Discipline::sampled_every(0.05, 0.001)?),
                checks: vec![PassCheck::Agreement { factor: 0.25 }, PassCheck::PracticalBand],
            },
            ScenarioId::LaplacianReference => ScenarioSetup {
                topology: presets::ring(&[5.0, 1.0, 8.0], &[5.0, 1.0, 8.0])?,
                config: base
                    .with_dt(0.01)
                    .with_duration(20.0)
                    .with_consensus(ConsensusMode::Linear),
                checks: vec![PassCheck::Agreement { factor: 1e-3 }, PassCheck::StrictSettling],
            },
            ScenarioId::DisabledAgent => ScenarioSetup {
                topology: Topology::new(vec![
                    (1, AgentSpec::new(2.0, 2.0, [2])),
                    (2, AgentSpec::new(6.0, 6.0, [3])),
                    (3, AgentSpec::new(4.0, 4.0, [4])),
                    (4, AgentSpec::new(50.0, 50.0, [1]).disabled()),
                ])?,
                config: base.with_dt(0.01).with_duration(15.0),
                checks: vec![PassCheck::FrozenWhereIsolated, PassCheck::Agreement { factor: 1e-2 }],
            },
            ScenarioId::NineNodeCycle => ScenarioSetup {
                topology: presets::permutation_cycle_nine()?,
                config: base.with_dt(0.001).with_duration(30.0).with_disturbance(disturbance),
                checks: vec![PassCheck::PracticalBand],
            },
        };
        Ok(setup)
    }
}

/// Everything needed to run one scenario.
#[derive(Debug, Clone)]
pub struct ScenarioSetup {
    pub topology: Topology,
    pub config: RunConfig,

    /// All must hold for the scenario to pass
    pub checks: Vec<PassCheck>,
}

/// Assertions evaluated on a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassCheck {
    /// Every enabled sigma enters `[-eps_off, eps_off]` and never exceeds
    /// `eps_on` afterwards
    StrictSettling,

    /// Over the last quarter of the run, `max |sigma| <= 2 eps_on + dt (max vartheta + |nu| bound)`
    PracticalBand,

    /// Final spread of enabled references is at most `factor` times the initial spread
    Agreement { factor: f64 },

    /// Disabled agents and agents whose neighbors are all disabled keep their reference
    FrozenWhereIsolated,
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
            "ring_settling" | "ringsettling" | "ft-001" => Ok(ScenarioId::RingSettling),
            "ring_offset" | "ringoffset" | "ft-002" => Ok(ScenarioId::RingOffset),
            "disturbed_ring" | "disturbedring" | "ft-003" => Ok(ScenarioId::DisturbedRing),
            "sampled_network" | "samplednetwork" | "ft-004" => Ok(ScenarioId::SampledNetwork),
            "laplacian_reference" | "laplacianreference" | "ft-005" => Ok(ScenarioId::LaplacianReference),
            "disabled_agent" | "disabledagent" | "ft-006" => Ok(ScenarioId::DisabledAgent),
            "nine_node_cycle" | "ninenodecycle" | "ft-007" => Ok(ScenarioId::NineNodeCycle),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_round_trip_through_from_str() {
        for id in ScenarioId::all() {
            assert_eq!(id.name().parse::<ScenarioId>().unwrap(), id);
            assert_eq!(id.to_string(), id.name());
            assert!(!id.description().is_empty());
        }
        assert_eq!("FT-004".parse::<ScenarioId>().unwrap(), ScenarioId::SampledNetwork);
        assert!("split_brain".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn test_every_setup_validates() {
        for id in ScenarioId::all() {
            let setup = id.setup(42).unwrap();
            assert!(setup.config.validate().is_ok(), "{} config invalid", id);
            assert!(!setup.checks.is_empty());
            assert_eq!(setup.config.seed, 42);
        }
    }

    #[test]
    fn test_sampled_network_interval() {
        let setup = ScenarioId::SampledNetwork.setup(1).unwrap();
        assert_eq!(setup.config.discipline, Discipline::Sampled { sample_interval: 50 });
        assert_eq!(setup.config.sample_points(), Some(400));
        assert_eq!(setup.topology.len(), 9);
    }
}
