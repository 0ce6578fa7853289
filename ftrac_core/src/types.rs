//! Common types for the FTRAC core.

use serde::{Deserialize, Serialize};

/// Unique identifier for a consensus agent.
///
/// Ids are 1-based, matching the node numbering used when flashing hardware
/// nodes. Dense array positions are owned by [`crate::Topology`]; nothing else
/// translates between the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u32);

impl AgentId {
    /// Creates an AgentId from its raw number.
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Returns the raw id number.
    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for AgentId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}

/// Random streams drawn from one run seed.
///
/// Each stream gets its own ChaCha8 seed, so no two streams share draws for
/// any run seed (including 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SeedStream {
    /// Per-step disturbance noise
    DisturbanceNoise = 1,

    /// Per-agent sinusoid phases
    DisturbancePhase = 2,

    /// Randomized initial conditions of preset topologies
    InitialConditions = 3,
}

impl SeedStream {
    /// Derives the ChaCha8 seed of this stream from the run seed.
    pub fn derive(self, seed: u64) -> u64 {
        seed.wrapping_mul(0x9e3779b97f4a7c15)
            .wrapping_add((self as u64).wrapping_mul(0x517cc1b727220a95))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_ordering_follows_raw_number() {
        let mut ids = vec![AgentId(3), AgentId(1), AgentId(2)];
        ids.sort();
        assert_eq!(ids, vec![AgentId(1), AgentId(2), AgentId(3)]);
    }

    #[test]
    fn test_agent_id_json_is_a_plain_number() {
        let json = serde_json::to_string(&AgentId(7)).unwrap();
        assert_eq!(json, "7");

        let back: AgentId = serde_json::from_str("7").unwrap();
        assert_eq!(back, AgentId::new(7));
        assert_eq!(back.to_string(), "agent-7");
    }

    #[test]
    fn test_seed_streams_never_coincide() {
        let streams = [
            SeedStream::DisturbanceNoise,
            SeedStream::DisturbancePhase,
            SeedStream::InitialConditions,
        ];
        for seed in [0, 1, 42, u64::MAX] {
            let derived: Vec<u64> = streams.iter().map(|s| s.derive(seed)).collect();
            assert_ne!(derived[0], derived[1], "seed {}", seed);
            assert_ne!(derived[0], derived[2], "seed {}", seed);
            assert_ne!(derived[1], derived[2], "seed {}", seed);
        }
        assert_ne!(SeedStream::DisturbanceNoise.derive(0), 0);
        assert_ne!(SeedStream::DisturbanceNoise.derive(1), SeedStream::DisturbanceNoise.derive(2));
    }
}
