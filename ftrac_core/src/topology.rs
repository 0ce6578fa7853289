//! Topology model - the agent set and its directed neighbor relation.
//!
//! The topology owns the only translation between [`AgentId`]s (1-based, as
//! configured on the nodes) and dense indices (0-based, as used by the state
//! vector). Agents are ordered by ascending id.

use crate::error::{FtracError, Result};
use crate::types::AgentId;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

fn default_enabled() -> bool {
    true
}

/// Per-agent description supplied by the topology authoring tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    /// Initial state x(0)
    pub x0: f64,

    /// Initial virtual reference z(0)
    pub z0: f64,

    /// Initial adaptive gain (nodes can be flashed with a non-zero gain)
    #[serde(default)]
    pub vartheta0: f64,

    /// Agents whose reference this agent listens to
    #[serde(default)]
    pub neighbors: Vec<AgentId>,

    /// Disabled agents are skipped by every consensus sum
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AgentSpec {
    /// Creates an enabled agent with zero initial gain.
    pub fn new(x0: f64, z0: f64, neighbors: impl IntoIterator<Item = u32>) -> Self {
        Self {
            x0,
            z0,
            vartheta0: 0.0,
            neighbors: neighbors.into_iter().map(AgentId).collect(),
            enabled: true,
        }
    }

    /// Sets the initial adaptive gain.
    pub fn with_vartheta0(mut self, vartheta0: f64) -> Self {
        self.vartheta0 = vartheta0;
        self
    }

    /// Marks the agent as disabled.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Directed communication graph over the agent set.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Agent ids in dense-index order
    ids: Vec<AgentId>,

    /// id -> dense index
    index: HashMap<AgentId, usize>,

    /// Specs in dense-index order
    specs: Vec<AgentSpec>,

    /// Neighbor indices restricted to enabled agents; empty for disabled agents
    active_neighbors: Vec<Vec<usize>>,
}

impl Topology {
    /// Builds a topology from `(id, spec)` pairs.
    ///
    /// Fails with `InvalidTopology` on duplicate ids.
    pub fn new(agents: impl IntoIterator<Item = (u32, AgentSpec)>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for (raw, spec) in agents {
            if map.insert(AgentId(raw), spec).is_some() {
                return Err(FtracError::topology(format!("duplicate agent id {}", raw)));
            }
        }
        Self::from_map(map)
    }

    /// Builds a topology from an id-keyed map, rejecting self-loops.
    pub fn from_map(agents: BTreeMap<AgentId, AgentSpec>) -> Result<Self> {
        Self::build(agents, false)
    }

    /// Builds a topology from an id-keyed map, permitting self-loops.
    pub fn with_self_loops(agents: BTreeMap<AgentId, AgentSpec>) -> Result<Self> {
        Self::build(agents, true)
    }

    /// Parses a JSON object of the form `{"1": {"x0": .., "z0": .., "neighbors": [2]}, ..}`.
    pub fn from_json(json: &str) -> Result<Self> {
        let agents: BTreeMap<AgentId, AgentSpec> = serde_json::from_str(json)?;
        Self::from_map(agents)
    }

    fn build(agents: BTreeMap<AgentId, AgentSpec>, allow_self_loops: bool) -> Result<Self> {
        if agents.is_empty() {
            return Err(FtracError::topology("no agents declared"));
        }

        let ids: Vec<AgentId> = agents.keys().copied().collect();
        let index: HashMap<AgentId, usize> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();

        let mut specs = Vec::with_capacity(ids.len());
        for (id, mut spec) in agents {
            if id.get() == 0 {
                return Err(FtracError::topology("agent ids are 1-based; found id 0"));
            }
            if !spec.x0.is_finite() || !spec.z0.is_finite() || !spec.vartheta0.is_finite() {
                return Err(FtracError::parameters(format!(
                    "{} has a non-finite initial condition",
                    id
                )));
            }
            if spec.vartheta0 < 0.0 {
                return Err(FtracError::parameters(format!(
                    "{} has negative initial gain {}",
                    id, spec.vartheta0
                )));
            }

            let mut seen = Vec::with_capacity(spec.neighbors.len());
            for neighbor in &spec.neighbors {
                if !index.contains_key(neighbor) {
                    return Err(FtracError::topology(format!(
                        "{} lists unknown neighbor {}",
                        id, neighbor
                    )));
                }
                if *neighbor == id && !allow_self_loops {
                    return Err(FtracError::topology(format!("{} lists itself as a neighbor", id)));
                }
                if seen.contains(neighbor) {
                    debug!("{} lists {} twice; keeping the first occurrence", id, neighbor);
                    continue;
                }
                seen.push(*neighbor);
            }
            spec.neighbors = seen;
            specs.push(spec);
        }

        let active_neighbors = specs
            .iter()
            .map(|spec| {
                if !spec.enabled {
                    return Vec::new();
                }
                spec.neighbors
                    .iter()
                    .map(|n| index[n])
                    .filter(|&j| specs[j].enabled)
                    .collect()
            })
            .collect();

        Ok(Self {
            ids,
            index,
            specs,
            active_neighbors,
        })
    }

    /// Returns the number of agents (enabled or not).
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if the topology has no agents. Never true for a built topology.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns agent ids in dense-index order.
    pub fn ids(&self) -> &[AgentId] {
        &self.ids
    }

    /// Returns the dense index of an agent.
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.index.get(&id).copied()
    }

    /// Returns the agent id at a dense index.
    pub fn id_at(&self, index: usize) -> Option<AgentId> {
        self.ids.get(index).copied()
    }

    /// Returns the spec of an agent.
    pub fn spec(&self, id: AgentId) -> Option<&AgentSpec> {
        self.index_of(id).map(|i| &self.specs[i])
    }

    /// Returns specs in dense-index order.
    pub fn specs(&self) -> &[AgentSpec] {
        &self.specs
    }

    /// Returns the declared neighbors of an agent (empty for unknown ids).
    pub fn neighbors_of(&self, id: AgentId) -> &[AgentId] {
        self.spec(id).map(|s| s.neighbors.as_slice()).unwrap_or(&[])
    }

    /// Returns the enabled neighbor indices of the agent at `index`.
    pub fn active_neighbor_indices(&self, index: usize) -> &[usize] {
        self.active_neighbors.get(index).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Returns the enabled flag per dense index.
    pub fn enabled_mask(&self) -> Vec<bool> {
        self.specs.iter().map(|s| s.enabled).collect()
    }

    /// Returns whether an agent is enabled (false for unknown ids).
    pub fn is_enabled(&self, id: AgentId) -> bool {
        self.spec(id).map(|s| s.enabled).unwrap_or(false)
    }

    /// Materializes the graph Laplacian used by the linear consensus law.
    ///
    /// `L[i][i]` counts the enabled neighbors of agent `i`, `L[i][j] = -1` for
    /// each enabled neighbor `j`, so `-L z` sums `z_j - z_i`. Rows of disabled
    /// agents are zero.
    pub fn to_laplacian(&self) -> Result<DMatrix<f64>> {
        let n = self.len();
        let mut laplacian = DMatrix::zeros(n, n);

        for (i, spec) in self.specs.iter().enumerate() {
            if !spec.enabled {
                continue;
            }
            for neighbor in &spec.neighbors {
                let j = self.index_of(*neighbor).ok_or_else(|| {
                    FtracError::topology(format!("{} lists unknown neighbor {}", self.ids[i], neighbor))
                })?;
                if !self.specs[j].enabled {
                    continue;
                }
                laplacian[(i, i)] += 1.0;
                laplacian[(i, j)] -= 1.0;
            }
        }

        Ok(laplacian)
    }
}
