//! Joint simulation state `[x | z | vartheta]`.

use crate::error::{FtracError, Result};
use crate::hysteresis::GainState;
use crate::topology::Topology;
use crate::types::AgentId;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// The vector advanced by the integrators.
///
/// Layout is fixed for a run: `x` occupies `[0, N)`, `z` occupies `[N, 2N)`
/// and `vartheta` occupies `[2N, 3N)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationState {
    n_agents: usize,
    y: DVector<f64>,
}

impl SimulationState {
    /// Builds the initial state from the topology's initial conditions.
    pub fn from_topology(topology: &Topology) -> Self {
        let n = topology.len();
        let mut y = DVector::zeros(3 * n);
        for (i, spec) in topology.specs().iter().enumerate() {
            y[i] = spec.x0;
            y[n + i] = spec.z0;
            y[2 * n + i] = spec.vartheta0;
        }
        Self { n_agents: n, y }
    }

    /// Builds a state from separate blocks of equal length.
    pub fn from_parts(x: &[f64], z: &[f64], vartheta: &[f64]) -> Result<Self> {
        let n = x.len();
        if z.len() != n || vartheta.len() != n {
            return Err(FtracError::parameters(format!(
                "state blocks differ in length: x={}, z={}, vartheta={}",
                n,
                z.len(),
                vartheta.len()
            )));
        }
        let y = DVector::from_iterator(3 * n, x.iter().chain(z).chain(vartheta).copied());
        Ok(Self { n_agents: n, y })
    }

    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// Returns the real states.
    pub fn x(&self) -> &[f64] {
        &self.y.as_slice()[..self.n_agents]
    }

    /// Returns the virtual reference states.
    pub fn z(&self) -> &[f64] {
        &self.y.as_slice()[self.n_agents..2 * self.n_agents]
    }

    /// Returns the adaptive gains.
    pub fn vartheta(&self) -> &[f64] {
        &self.y.as_slice()[2 * self.n_agents..]
    }

    /// Tracking error `x_i - z_i`.
    pub fn sigma(&self, index: usize) -> f64 {
        self.y[index] - self.y[self.n_agents + index]
    }

    /// Returns the full vector.
    pub fn as_vector(&self) -> &DVector<f64> {
        &self.y
    }

    /// Returns the full vector mutably (for integrators).
    pub fn as_vector_mut(&mut self) -> &mut DVector<f64> {
        &mut self.y
    }

    /// Returns true if no entry is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.y.iter().all(|v| v.is_finite())
    }

    /// Clamps every entry to be non-negative.
    pub fn clamp_non_negative(&mut self) {
        self.y.apply(|v| *v = v.max(0.0));
    }
}

/// View of one agent at a point in a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub x: f64,
    pub z: f64,
    pub vartheta: f64,
    pub gain: GainState,
    pub enabled: bool,
}

impl AgentSnapshot {
    /// Tracking error `x - z`.
    pub fn sigma(&self) -> f64 {
        self.x - self.z
    }
}
