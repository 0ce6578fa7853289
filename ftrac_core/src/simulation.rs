//! Run loop for both integration disciplines.
//!
//! Per fine step `k` (time `t_k = k * dt`):
//!
//! ```text
//!   nu_k  <- disturbance stream
//!   g     <- consensus(z)            (sampled: only when k % sample_interval == 0)
//!   k1    <- dynamics(y_k)           (hysteresis evaluated, u / dvartheta recorded)
//!   y_k+1 <- scheme(y_k, k1, ...)    (sampled: explicit Euler with the held g)
//!   clamp, finiteness check
//! ```

use crate::config::RunConfig;
use crate::disturbance::DisturbanceGenerator;
use crate::dynamics::Dynamics;
use crate::error::{FtracError, Result};
use crate::integrator::{Discipline, Integrator, IntegratorStats, Scheme};
use crate::recorder::{Recorder, Trajectory};
use crate::state::{AgentSnapshot, SimulationState};
use crate::topology::Topology;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Aggregate numbers of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub n_agents: usize,

    /// Fine steps taken (and full-rate rows recorded)
    pub n_points: usize,

    /// Sampled rows recorded, if sampled
    pub sample_points: Option<usize>,

    /// Time after the last step
    pub final_time: f64,

    pub scheme: String,

    pub integrator: IntegratorStats,

    /// Inactive -> Active transitions per agent
    pub activations: Vec<u64>,

    /// Active -> Inactive transitions per agent
    pub deactivations: Vec<u64>,

    /// Largest `|x - z|` in the final state
    pub final_max_sigma: f64,

    pub final_vartheta: Vec<f64>,
}

/// Everything a run hands to downstream consumers.
#[derive(Debug, Clone)]
pub struct RunOutput {
    /// Row `k` is the state before step `k`
    pub full: Trajectory,

    /// Rows at the sample instants (sampled discipline only)
    pub sampled: Option<Trajectory>,

    pub summary: RunSummary,

    /// Agents after the last step
    pub final_agents: Vec<AgentSnapshot>,
}

/// One configured run: owns the state, the dynamics and the disturbance stream.
#[derive(Debug)]
pub struct Simulation {
    topology: Topology,
    config: RunConfig,
    state: SimulationState,
    dynamics: Dynamics,
    disturbance: DisturbanceGenerator,
    integrator: Integrator,
    n_points: usize,
}

impl Simulation {
    /// Validates the configuration against the topology and prepares the run.
    pub fn new(topology: Topology, config: RunConfig) -> Result<Self> {
        config.validate_for(topology.len())?;
        let n = topology.len();

        let dynamics = Dynamics::new(
            &topology,
            config.consensus,
            config.hysteresis,
            config.omega,
            config.oscillator_bias,
        )?;
        let disturbance = DisturbanceGenerator::new(config.disturbance.clone(), n, config.seed)?;

        // Local steps between sample instants are explicit Euler
        let scheme = match config.discipline {
            Discipline::Continuous => config.scheme,
            Discipline::Sampled { .. } => Scheme::Euler,
        };

        Ok(Self {
            state: SimulationState::from_topology(&topology),
            integrator: Integrator::new(scheme, n),
            n_points: config.n_points(),
            topology,
            config,
            dynamics,
            disturbance,
        })
    }

    /// Returns the topology of the run.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Returns the validated configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Returns the joint state before the run starts.
    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    /// Per-agent view of the current state.
    pub fn agents(&self) -> Vec<AgentSnapshot> {
        let bank = self.dynamics.hysteresis();
        self.topology
            .ids()
            .iter()
            .enumerate()
            .map(|(i, id)| AgentSnapshot {
                id: *id,
                x: self.state.x()[i],
                z: self.state.z()[i],
                vartheta: self.state.vartheta()[i],
                gain: bank.state(i),
                enabled: self.topology.is_enabled(*id),
            })
            .collect()
    }

    /// Integrates to the horizon.
    pub fn run(mut self) -> Result<RunOutput> {
        let n = self.topology.len();
        let dt = self.config.dt;
        let n_points = self.n_points;
        let interval = self.config.discipline.sample_interval();
        let sampled = matches!(self.config.discipline, Discipline::Sampled { .. });
        let sample_points = self.config.sample_points();

        info!(
            "Starting run: {} agents, {} points, dt={}, law={}, scheme={}, discipline={:?}",
            n,
            n_points,
            dt,
            self.dynamics.law().name(),
            self.integrator.scheme().name(),
            self.config.discipline
        );

        let mut full = Recorder::new(self.topology.ids().to_vec(), n_points);
        let mut coarse = sample_points.map(|points| Recorder::new(self.topology.ids().to_vec(), points));
        let mut held_g: DVector<f64> = DVector::zeros(n);

        for k in 0..n_points {
            let t = k as f64 * dt;
            let nu = self.disturbance.sample(k, t);

            let sample_instant = sampled && k % interval == 0;
            if sample_instant {
                held_g.copy_from(self.dynamics.consensus_term(self.state.as_vector()));
                debug!(step = k, t, "sample instant");
            }
            let held = if sampled { Some(&held_g) } else { None };

            let aux = self
                .integrator
                .evaluate_start(&mut self.dynamics, self.state.as_vector(), nu, held);
            full.record(k, t, &self.state, aux)?;

            if sample_instant {
                if let Some(recorder) = coarse.as_mut() {
                    // Trailing partial interval is dropped
                    let row = k / interval;
                    if row < recorder.capacity() {
                        recorder.record(row, t, &self.state, aux)?;
                    }
                }
            }

            self.integrator
                .advance(&mut self.dynamics, self.state.as_vector_mut(), dt, nu, held);

            if self.config.clamp_non_negative {
                self.state.clamp_non_negative();
            }
            if !self.state.is_finite() {
                return Err(FtracError::NonFiniteState {
                    step: k,
                    time: t + dt,
                });
            }
        }

        let final_agents = self.agents();
        let bank = self.dynamics.hysteresis();
        let summary = RunSummary {
            n_agents: n,
            n_points,
            sample_points,
            final_time: n_points as f64 * dt,
            scheme: self.integrator.scheme().name().to_string(),
            integrator: self.integrator.stats(),
            activations: bank.activations().to_vec(),
            deactivations: bank.deactivations().to_vec(),
            final_max_sigma: final_agents
                .iter()
                .filter(|agent| agent.enabled)
                .map(|agent| agent.sigma().abs())
                .fold(0.0, f64::max),
            final_vartheta: self.state.vartheta().to_vec(),
        };

        info!(
            "Run complete: t={:.3}s, {} evaluations, {} activations, final max |sigma|={:.3e}",
            summary.final_time,
            summary.integrator.evaluations,
            summary.activations.iter().sum::<u64>(),
            summary.final_max_sigma
        );

        Ok(RunOutput {
            full: full.finish(),
            sampled: coarse.map(Recorder::finish),
            summary,
            final_agents,
        })
    }
}
