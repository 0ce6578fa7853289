//! Scenario runner - executes the canonical FTRAC scenarios and checks them.

use crate::error::SimResult;
use crate::exporter::SimExport;
use crate::scenarios::{PassCheck, ScenarioId, ScenarioSetup};

use ftrac_core::{Discipline, RunConfig, RunOutput, Simulation, Topology, Trajectory};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Fine steps executed
    pub total_steps: usize,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioMetrics {
    /// Spread of enabled references at t = 0
    pub initial_spread: f64,

    /// Spread of enabled references after the last step
    pub final_spread: f64,

    /// Largest |sigma| over enabled agents after the last step
    pub final_max_sigma: f64,

    /// Largest |sigma| over the last quarter of the run
    pub tail_max_sigma: f64,

    /// Largest adaptive gain reached
    pub max_vartheta: f64,

    /// Inactive -> Active transitions, all agents
    pub activations: u64,

    /// Active -> Inactive transitions, all agents
    pub deactivations: u64,

    /// Vector field evaluations
    pub evaluations: u64,

    /// Sampled rows, if the run was sampled
    pub sample_points: Option<usize>,
}

/// Runs FTRAC scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Replaces each scenario's horizon when set
    duration_secs: Option<f64>,

    /// Replaces each scenario's step size when set
    dt: Option<f64>,

    /// Keeps every n-th sample in exports
    export_stride: usize,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration_secs: None,
            dt: None,
            export_stride: 1,
        }
    }

    /// Sets the duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    /// Sets the step size.
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = Some(dt);
        self
    }

    /// Sets the export decimation.
    pub fn with_export_stride(mut self, stride: usize) -> Self {
        self.export_stride = stride.max(1);
        self
    }

    /// Runs a scenario and returns the result.
    ///
    /// Setup and run errors are reported as a failed result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        match self.execute(scenario) {
            Ok((result, _, _)) => result,
            Err(e) => {
                warn!("Scenario {} aborted: {}", scenario.name(), e);
                ScenarioResult {
                    scenario,
                    seed: self.seed,
                    passed: false,
                    total_steps: 0,
                    final_time_secs: 0.0,
                    failure_reason: Some(e.to_string()),
                    metrics: ScenarioMetrics::default(),
                }
            }
        }
    }

    /// Runs every scenario in order.
    pub fn run_all(&self) -> Vec<ScenarioResult> {
        ScenarioId::all().into_iter().map(|id| self.run(id)).collect()
    }

    /// Runs a scenario and packages the trajectories for the plotting tools.
    pub fn run_export(&self, scenario: ScenarioId) -> SimResult<(ScenarioResult, SimExport)> {
        let (result, config, output) = self.execute(scenario)?;
        let mut export = SimExport::new(scenario.name(), self.seed, config, &output, self.export_stride);
        export.finalize(result.passed, result.failure_reason.clone());
        Ok((result, export))
    }

    /// Builds the scenario with the runner's overrides applied.
    ///
    /// A step size override keeps the network period of sampled scenarios in
    /// seconds, so the interval in steps is recomputed.
    pub fn setup(&self, scenario: ScenarioId) -> SimResult<ScenarioSetup> {
        let mut setup = scenario.setup(self.seed)?;
        if let Some(dt) = self.dt {
            if let Discipline::Sampled { sample_interval } = setup.config.discipline {
                let period = sample_interval as f64 * setup.config.dt;
                setup.config = setup.config.with_discipline(Discipline::sampled_every(period, dt)?);
            }
            setup.config = setup.config.with_dt(dt);
        }
        if let Some(secs) = self.duration_secs {
            setup.config = setup.config.with_duration(secs);
        }
        Ok(setup)
    }

    fn execute(&self, scenario: ScenarioId) -> SimResult<(ScenarioResult, RunConfig, RunOutput)> {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);
        debug!("  {}", scenario.description());

        let ScenarioSetup {
            topology,
            config,
            checks,
        } = self.setup(scenario)?;

        let initial_spread = spread(topology.specs().iter().filter(|s| s.enabled).map(|s| s.z0));
        let output = Simulation::new(topology.clone(), config.clone())?.run()?;
        let metrics = collect_metrics(&output, initial_spread);

        let failure_reason = checks
            .iter()
            .find_map(|check| evaluate_check(*check, &topology, &config, &output, &metrics).err());
        let passed = failure_reason.is_none();

        if passed {
            info!(
                "✓ {} passed: final max |sigma|={:.2e}, spread {:.2e} -> {:.2e}, {} activations",
                scenario.name(),
                metrics.final_max_sigma,
                metrics.initial_spread,
                metrics.final_spread,
                metrics.activations
            );
        } else {
            warn!(
                "✗ {} failed: {}",
                scenario.name(),
                failure_reason.as_deref().unwrap_or("unknown")
            );
        }

        let result = ScenarioResult {
            scenario,
            seed: self.seed,
            passed,
            total_steps: output.summary.n_points,
            final_time_secs: output.summary.final_time,
            failure_reason,
            metrics,
        };
        Ok((result, config, output))
    }
}

fn spread(values: impl Iterator<Item = f64>) -> f64 {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if max >= min {
        max - min
    } else {
        0.0
    }
}

/// Enabled rows of a trajectory.
fn enabled_rows<'a>(topology: &'a Topology, trajectory: &'a Trajectory) -> impl Iterator<Item = usize> + 'a {
    (0..trajectory.n_agents()).filter(move |&row| topology.is_enabled(trajectory.ids[row]))
}

fn collect_metrics(output: &RunOutput, initial_spread: f64) -> ScenarioMetrics {
    let enabled: Vec<_> = output.final_agents.iter().filter(|a| a.enabled).collect();
    let full = &output.full;
    let tail_start = full.len() * 3 / 4;

    let mut tail_max_sigma: f64 = 0.0;
    for step in tail_start..full.len() {
        for (row, agent) in output.final_agents.iter().enumerate() {
            if agent.enabled {
                tail_max_sigma = tail_max_sigma.max((full.x[(row, step)] - full.z[(row, step)]).abs());
            }
        }
    }

    ScenarioMetrics {
        initial_spread,
        final_spread: spread(enabled.iter().map(|a| a.z)),
        final_max_sigma: output.summary.final_max_sigma,
        tail_max_sigma,
        max_vartheta: output.summary.final_vartheta.iter().cloned().fold(0.0, f64::max),
        activations: output.summary.activations.iter().sum(),
        deactivations: output.summary.deactivations.iter().sum(),
        evaluations: output.summary.integrator.evaluations,
        sample_points: output.summary.sample_points,
    }
}

fn evaluate_check(
    check: PassCheck,
    topology: &Topology,
    config: &RunConfig,
    output: &RunOutput,
    metrics: &ScenarioMetrics,
) -> Result<(), String> {
    let full = &output.full;
    let eps_off = config.hysteresis.epsilon_off;
    let eps_on = config.hysteresis.epsilon_on;

    match check {
        PassCheck::StrictSettling => {
            for row in enabled_rows(topology, full) {
                let id = full.ids[row];
                let mut entered: Option<usize> = None;
                for step in 0..full.len() {
                    let sigma = (full.x[(row, step)] - full.z[(row, step)]).abs();
                    let settled = entered;
                    match settled {
                        None if sigma <= eps_off => entered = Some(step),
                        Some(first) if sigma > eps_on => {
                            return Err(format!(
                                "{} left the band at t={:.3}s (|sigma|={:.4}) after settling at t={:.3}s",
                                id, full.t[step], sigma, full.t[first]
                            ));
                        }
                        _ => {}
                    }
                }
                if entered.is_none() {
                    return Err(format!("{} never entered [-{}, {}]", id, eps_off, eps_off));
                }
            }
            Ok(())
        }
        PassCheck::PracticalBand => {
            let band = 2.0 * eps_on + config.dt * (metrics.max_vartheta + config.disturbance.bound());
            if metrics.tail_max_sigma <= band {
                Ok(())
            } else {
                Err(format!(
                    "tail max |sigma| {:.4} exceeds practical band {:.4}",
                    metrics.tail_max_sigma, band
                ))
            }
        }
        PassCheck::Agreement { factor } => {
            let limit = factor * metrics.initial_spread;
            if metrics.final_spread <= limit {
                Ok(())
            } else {
                Err(format!(
                    "reference spread {:.3e} above {:.3e} ({} x initial {:.3e})",
                    metrics.final_spread, limit, factor, metrics.initial_spread
                ))
            }
        }
        PassCheck::FrozenWhereIsolated => {
            for row in 0..full.n_agents() {
                let id = full.ids[row];
                let isolated = !topology.is_enabled(id)
                    || topology.index_of(id).map_or(false, |i| topology.active_neighbor_indices(i).is_empty());
                if !isolated {
                    continue;
                }
                let z0 = full.z[(row, 0)];
                if let Some(step) = (0..full.len()).find(|&step| full.z[(row, step)] != z0) {
                    return Err(format!("{} reference moved at t={:.3}s", id, full.t[step]));
                }
                if !topology.is_enabled(id) && full.u.row(row).iter().any(|u| *u != 0.0) {
                    return Err(format!("disabled {} produced a control input", id));
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn assert_passes(id: ScenarioId) -> ScenarioResult {
        init_tracing();
        let result = ScenarioRunner::new(42).run(id);
        assert!(result.passed, "{} failed: {:?}", id, result.failure_reason);
        result
    }

    #[test]
    fn test_ring_settling() {
        let result = assert_passes(ScenarioId::RingSettling);
        assert_eq!(result.total_steps, 2000);
        assert_eq!(result.metrics.activations, 0);
        assert_eq!(result.metrics.final_max_sigma, 0.0);
    }

    #[test]
    fn test_ring_offset() {
        let result = assert_passes(ScenarioId::RingOffset);
        assert!(result.metrics.activations >= 2);
        // Gain stops growing once sigma settles
        assert!(result.metrics.max_vartheta < 1.0);
    }

    #[test]
    fn test_disturbed_ring() {
        let result = assert_passes(ScenarioId::DisturbedRing);
        assert!(result.metrics.max_vartheta > 0.0);
    }

    #[test]
    fn test_sampled_network() {
        let result = assert_passes(ScenarioId::SampledNetwork);
        assert_eq!(result.metrics.sample_points, Some(400));
    }

    #[test]
    fn test_laplacian_reference() {
        let result = assert_passes(ScenarioId::LaplacianReference);
        assert!(result.metrics.final_spread < 1e-6);
    }

    #[test]
    fn test_disabled_agent() {
        assert_passes(ScenarioId::DisabledAgent);
    }

    #[test]
    fn test_nine_node_cycle() {
        let result = assert_passes(ScenarioId::NineNodeCycle);
        // Common reference never moves
        assert_eq!(result.metrics.final_spread, 0.0);
    }

    #[test]
    fn test_same_seed_same_result() {
        init_tracing();
        let runner = ScenarioRunner::new(7).with_duration(2.0);
        let a = runner.run(ScenarioId::DisturbedRing);
        let b = runner.run(ScenarioId::DisturbedRing);
        assert_eq!(a.metrics, b.metrics);
    }

    #[test]
    fn test_setup_error_becomes_failed_result() {
        init_tracing();
        let result = ScenarioRunner::new(1).with_dt(-0.1).run(ScenarioId::RingSettling);

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("dt"));
    }

    #[test]
    fn test_short_run_fails_strict_settling() {
        init_tracing();
        // Gains have no time to pull sigma into the band
        let result = ScenarioRunner::new(42).with_duration(0.2).run(ScenarioId::RingOffset);

        assert!(!result.passed);
        assert!(result.failure_reason.unwrap().contains("never entered"));
    }

    #[test]
    fn test_dt_override_keeps_network_period() {
        let setup = ScenarioRunner::new(42).with_dt(0.002).setup(ScenarioId::SampledNetwork).unwrap();

        assert_eq!(setup.config.dt, 0.002);
        assert_eq!(setup.config.discipline, Discipline::Sampled { sample_interval: 25 });

        // Continuous scenarios only change the step size
        let ring = ScenarioRunner::new(42).with_dt(0.002).setup(ScenarioId::RingSettling).unwrap();
        assert_eq!(ring.config.discipline, Discipline::Continuous);
    }

    #[test]
    fn test_run_export_carries_verdict() {
        init_tracing();
        let runner = ScenarioRunner::new(42).with_duration(1.0).with_export_stride(10);
        let (result, export) = runner.run_export(ScenarioId::RingSettling).unwrap();

        assert_eq!(export.scenario, "ring_settling");
        assert_eq!(export.passed, result.passed);
        assert_eq!(export.agents.len(), 3);
        assert_eq!(export.agents[0].t.len(), 10);
    }
}
