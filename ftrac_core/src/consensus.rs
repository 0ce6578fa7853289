//! Consensus laws driving the virtual reference `z`.
//!
//! - [`SignSqrtConsensus`]: `v_i = -Σ_j sign(z_i - z_j) sqrt(|z_i - z_j|)`, the
//!   finite-time coupling.
//! - [`LaplacianConsensus`]: `v = -L z`, the linear reference law.
//!
//! Both read the whole `z` vector and never mutate it, so every agent sees the
//! same snapshot within an evaluation.

use crate::error::Result;
use crate::topology::Topology;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Sign function with `sign(0) = 0` (unlike `f64::signum`).
pub fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// A neighbor-coupling law evaluated over the whole reference vector.
pub trait ConsensusLaw: std::fmt::Debug {
    /// Writes the coupling term of every agent into `out`.
    ///
    /// Agents without enabled neighbors, and disabled agents, get `0`.
    fn coupling(&self, z: &DVector<f64>, out: &mut DVector<f64>);

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

/// Selects the consensus law of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMode {
    /// Finite-time sign/sqrt law
    #[default]
    Nonlinear,

    /// Linear Laplacian law (reference/comparison mode)
    Linear,
}

impl ConsensusMode {
    /// Builds the law for a topology.
    pub fn build(self, topology: &Topology) -> Result<Box<dyn ConsensusLaw>> {
        Ok(match self {
            ConsensusMode::Nonlinear => Box::new(SignSqrtConsensus::new(topology)),
            ConsensusMode::Linear => Box::new(LaplacianConsensus::new(topology)?),
        })
    }
}

/// Finite-time sign/sqrt coupling over enabled neighbors.
#[derive(Debug, Clone)]
pub struct SignSqrtConsensus {
    neighbors: Vec<Vec<usize>>,
}

impl SignSqrtConsensus {
    /// Captures the enabled neighbor indices of every agent.
    pub fn new(topology: &Topology) -> Self {
        let neighbors = (0..topology.len())
            .map(|i| topology.active_neighbor_indices(i).to_vec())
            .collect();
        Self { neighbors }
    }
}

impl ConsensusLaw for SignSqrtConsensus {
    fn coupling(&self, z: &DVector<f64>, out: &mut DVector<f64>) {
        for (i, neighbors) in self.neighbors.iter().enumerate() {
            let zi = z[i];
            let pull: f64 = neighbors
                .iter()
                .map(|&j| {
                    let diff = zi - z[j];
                    sign(diff) * diff.abs().sqrt()
                })
                .sum();
            out[i] = -pull;
        }
    }

    fn name(&self) -> &'static str {
        "sign_sqrt"
    }
}

/// Linear coupling `v = -L z`.
#[derive(Debug, Clone)]
pub struct LaplacianConsensus {
    laplacian: DMatrix<f64>,
}

impl LaplacianConsensus {
    /// Builds `L = D - A` over the enabled agents.
    ///
    /// Fails with `InvalidTopology` when a neighbor is not a declared agent.
    pub fn new(topology: &Topology) -> Result<Self> {
        Ok(Self {
            laplacian: topology.to_laplacian()?,
        })
    }

    /// Returns the Laplacian (for diagnostics).
    pub fn laplacian(&self) -> &DMatrix<f64> {
        &self.laplacian
    }
}

impl ConsensusLaw for LaplacianConsensus {
    fn coupling(&self, z: &DVector<f64>, out: &mut DVector<f64>) {
        out.gemv(-1.0, &self.laplacian, z, 0.0);
    }

    fn name(&self) -> &'static str {
        "laplacian"
    }
}
