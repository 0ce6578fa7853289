//! Fixed-step and adaptive steppers for the joint state.
//!
//! A step is split in two calls so the caller can record the first-stage
//! auxiliaries (`u`, `dvartheta`) before the state moves:
//!
//! 1. [`Integrator::evaluate_start`] evaluates the vector field at `y_k`.
//! 2. [`Integrator::advance`] finishes the step and overwrites `y` with `y_{k+1}`.
//!
//! The disturbance vector is held for the whole step, across every stage.
//! The gain switch is consulted only at the first stage of a step (of a
//! substep for the adaptive scheme); the inner stages reuse its rate.

use crate::dynamics::{Derivative, Dynamics};
use crate::error::{FtracError, Result};

use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Error tolerances of the adaptive solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveTolerance {
    /// Relative tolerance
    pub rtol: f64,

    /// Absolute tolerance
    pub atol: f64,

    /// Smallest substep as a fraction of `dt`; trials at this size are accepted
    pub min_step_fraction: f64,
}

impl Default for AdaptiveTolerance {
    fn default() -> Self {
        Self {
            rtol: 1e-6,
            atol: 1e-9,
            min_step_fraction: 1e-3,
        }
    }
}

impl AdaptiveTolerance {
    /// Checks that both tolerances are positive and the minimum substep is a fraction of `dt`.
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.rtol) || !positive(self.atol) {
            return Err(FtracError::parameters("adaptive tolerances must be finite and > 0"));
        }
        if !positive(self.min_step_fraction) || self.min_step_fraction > 1.0 {
            return Err(FtracError::parameters(format!(
                "min_step_fraction must lie in (0, 1], got {}",
                self.min_step_fraction
            )));
        }
        Ok(())
    }
}

/// Numerical scheme for the continuous discipline.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scheme {
    /// Classic fourth-order Runge-Kutta
    #[default]
    Rk4,

    /// Explicit Euler
    Euler,

    /// Embedded Dormand-Prince 5(4) with substeps inside each `dt`
    Adaptive(AdaptiveTolerance),
}

impl Scheme {
    /// Short name used in logs and summaries.
    pub fn name(&self) -> &'static str {
        match self {
            Scheme::Rk4 => "rk4",
            Scheme::Euler => "euler",
            Scheme::Adaptive(_) => "dopri5",
        }
    }
}

/// How often the consensus term is refreshed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discipline {
    /// Consensus recomputed at every evaluation
    #[default]
    Continuous,

    /// Consensus recomputed every `sample_interval` fine steps and held in between
    Sampled { sample_interval: usize },
}

impl Discipline {
    /// Sampled discipline for a network period given in seconds.
    ///
    /// The period is rounded to the nearest whole number of fine steps.
    pub fn sampled_every(sample_time: f64, dt: f64) -> Result<Self> {
        if !(sample_time.is_finite() && dt.is_finite() && sample_time > 0.0 && dt > 0.0) {
            return Err(FtracError::parameters(format!(
                "sample time and dt must be finite and > 0, got {} and {}",
                sample_time, dt
            )));
        }
        let sample_interval = (sample_time / dt).round() as usize;
        if sample_interval == 0 {
            return Err(FtracError::parameters(format!(
                "sample time {} is shorter than half a step of {}",
                sample_time, dt
            )));
        }
        Ok(Discipline::Sampled { sample_interval })
    }

    /// Returns the interval in fine steps (1 for continuous).
    pub fn sample_interval(&self) -> usize {
        match self {
            Discipline::Continuous => 1,
            Discipline::Sampled { sample_interval } => *sample_interval,
        }
    }
}

/// Work counters of an integrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct IntegratorStats {
    /// Vector field evaluations
    pub evaluations: u64,

    /// Accepted (sub)steps
    pub accepted: u64,

    /// Rejected adaptive trials
    pub rejected: u64,
}

// Dormand-Prince 5(4) tableau
const DP_A: [[f64; 6]; 6] = [
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0],
    [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0],
    [19372.0 / 6561.0, -25360.0 / 2187.0, 64448.0 / 6561.0, -212.0 / 729.0, 0.0, 0.0],
    [9017.0 / 3168.0, -355.0 / 33.0, 46732.0 / 5247.0, 49.0 / 176.0, -5103.0 / 18656.0, 0.0],
    [35.0 / 384.0, 0.0, 500.0 / 1113.0, 125.0 / 192.0, -2187.0 / 6784.0, 11.0 / 84.0],
];

// Difference between the fifth- and fourth-order weights
const DP_E: [f64; 7] = [
    71.0 / 57600.0,
    0.0,
    -71.0 / 16695.0,
    71.0 / 1920.0,
    -17253.0 / 339200.0,
    22.0 / 525.0,
    -1.0 / 40.0,
];

const SAFETY: f64 = 0.9;
const MIN_SCALE: f64 = 0.2;
const MAX_SCALE: f64 = 5.0;

/// Advances [`Dynamics`] with a chosen [`Scheme`].
#[derive(Debug)]
pub struct Integrator {
    scheme: Scheme,

    /// Stage derivatives; `stages[0]` holds the start-of-step evaluation
    stages: Vec<Derivative>,

    /// Stage input
    tmp: DVector<f64>,

    /// Error estimate (adaptive only)
    err: DVector<f64>,

    /// Substep carried between steps (adaptive only)
    h_suggest: Option<f64>,

    stats: IntegratorStats,
}

impl Integrator {
    /// Creates an integrator with stage buffers sized for `n_agents`.
    pub fn new(scheme: Scheme, n_agents: usize) -> Self {
        let n_stages = match scheme {
            Scheme::Euler => 1,
            Scheme::Rk4 => 4,
            Scheme::Adaptive(_) => 7,
        };
        Self {
            scheme,
            stages: (0..n_stages).map(|_| Derivative::zeros(n_agents)).collect(),
            tmp: DVector::zeros(3 * n_agents),
            err: DVector::zeros(3 * n_agents),
            h_suggest: None,
            stats: IntegratorStats::default(),
        }
    }

    /// Returns the scheme in use.
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Returns the evaluation and step counters so far.
    pub fn stats(&self) -> IntegratorStats {
        self.stats
    }

    /// Evaluates the vector field at the start of a step.
    ///
    /// The returned derivative carries the `u` and `dvartheta` to record for `y`.
    pub fn evaluate_start(
        &mut self,
        dynamics: &mut Dynamics,
        y: &DVector<f64>,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
    ) -> &Derivative {
        dynamics.evaluate(y, nu, held_g, &mut self.stages[0]);
        self.stats.evaluations += 1;
        &self.stages[0]
    }

    /// Completes the step started by [`evaluate_start`](Self::evaluate_start).
    pub fn advance(
        &mut self,
        dynamics: &mut Dynamics,
        y: &mut DVector<f64>,
        dt: f64,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
    ) {
        match self.scheme {
            Scheme::Euler => {
                y.axpy(dt, &self.stages[0].dydt, 1.0);
                self.stats.accepted += 1;
            }
            Scheme::Rk4 => self.advance_rk4(dynamics, y, dt, nu, held_g),
            Scheme::Adaptive(tolerance) => self.advance_adaptive(dynamics, y, dt, nu, held_g, tolerance),
        }
    }

    fn advance_rk4(
        &mut self,
        dynamics: &mut Dynamics,
        y: &mut DVector<f64>,
        dt: f64,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
    ) {
        let half = 0.5 * dt;

        // k2 = f(y + dt/2 k1), k3 = f(y + dt/2 k2), k4 = f(y + dt k3), all at the k1 rate
        for (stage, weight) in [(1, half), (2, half), (3, dt)] {
            self.tmp.copy_from(&*y);
            self.tmp.axpy(weight, &self.stages[stage - 1].dydt, 1.0);
            let (first, rest) = self.stages.split_at_mut(1);
            dynamics.evaluate_with_rate(&self.tmp, nu, held_g, &first[0].dvartheta, &mut rest[stage - 1]);
        }
        self.stats.evaluations += 3;

        let sixth = dt / 6.0;
        y.axpy(sixth, &self.stages[0].dydt, 1.0);
        y.axpy(2.0 * sixth, &self.stages[1].dydt, 1.0);
        y.axpy(2.0 * sixth, &self.stages[2].dydt, 1.0);
        y.axpy(sixth, &self.stages[3].dydt, 1.0);
        self.stats.accepted += 1;
    }

    fn advance_adaptive(
        &mut self,
        dynamics: &mut Dynamics,
        y: &mut DVector<f64>,
        dt: f64,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
        tolerance: AdaptiveTolerance,
    ) {
        let h_min = dt * tolerance.min_step_fraction;
        let mut h = self.h_suggest.unwrap_or(dt).clamp(h_min, dt);
        let mut elapsed = 0.0;
        let mut first = true;

        while dt - elapsed > 1e-12 * dt {
            if !first {
                dynamics.evaluate(y, nu, held_g, &mut self.stages[0]);
                self.stats.evaluations += 1;
            }
            first = false;

            loop {
                let trial = h.min(dt - elapsed);
                let err_norm = self.dopri_trial(dynamics, y, trial, nu, held_g, tolerance);

                if err_norm <= 1.0 || trial <= h_min {
                    // The seventh stage input is the fifth-order solution
                    y.copy_from(&self.tmp);
                    elapsed += trial;
                    self.stats.accepted += 1;

                    let scale = if err_norm == 0.0 {
                        MAX_SCALE
                    } else {
                        (SAFETY * err_norm.powf(-0.2)).clamp(MIN_SCALE, MAX_SCALE)
                    };
                    // Keep the carried substep from collapsing on a short remainder
                    h = (h.max(trial) * scale).clamp(h_min, dt);
                    break;
                }

                self.stats.rejected += 1;
                h = (trial * (SAFETY * err_norm.powf(-0.2)).max(MIN_SCALE)).max(h_min);
                trace!(trial, err_norm, next = h, "rejected substep");
            }
        }

        self.h_suggest = Some(h);
    }

    /// Evaluates stages 2 to 7 for a substep of length `h`.
    ///
    /// Leaves the fifth-order solution in `tmp` and returns the scaled RMS error.
    fn dopri_trial(
        &mut self,
        dynamics: &mut Dynamics,
        y: &DVector<f64>,
        h: f64,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
        tolerance: AdaptiveTolerance,
    ) -> f64 {
        for (row, coefficients) in DP_A.iter().enumerate() {
            self.tmp.copy_from(&*y);
            for (j, a) in coefficients.iter().enumerate().take(row + 1) {
                if *a != 0.0 {
                    self.tmp.axpy(h * a, &self.stages[j].dydt, 1.0);
                }
            }
            let (first, rest) = self.stages.split_at_mut(1);
            dynamics.evaluate_with_rate(&self.tmp, nu, held_g, &first[0].dvartheta, &mut rest[row]);
        }
        self.stats.evaluations += 6;

        self.err.fill(0.0);
        for (stage, e) in self.stages.iter().zip(DP_E) {
            if e != 0.0 {
                self.err.axpy(h * e, &stage.dydt, 1.0);
            }
        }

        let len = y.len().max(1) as f64;
        let sum: f64 = self
            .err
            .iter()
            .zip(y.iter().zip(self.tmp.iter()))
            .map(|(e, (a, b))| {
                let scale = tolerance.atol + tolerance.rtol * a.abs().max(b.abs());
                (e / scale).powi(2)
            })
            .sum();
        (sum / len).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consensus::ConsensusMode;
    use crate::dynamics::OscillatorBias;
    use crate::hysteresis::HysteresisParams;
    use crate::topology::{AgentSpec, Topology};
    use approx::assert_relative_eq;

    /// Two agents pulling each other linearly with x = z, so sigma stays 0
    /// and the z block follows `z' = -L z`, solvable in closed form.
    fn linear_pair() -> (Dynamics, DVector<f64>) {
        let topology = Topology::new(vec![
            (1, AgentSpec::new(1.0, 1.0, [2])),
            (2, AgentSpec::new(-1.0, -1.0, [1])),
        ])
        .unwrap();
        let dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Linear,
            HysteresisParams::default(),
            0.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();
        let y = DVector::from_vec(vec![1.0, -1.0, 1.0, -1.0, 0.0, 0.0]);
        (dynamics, y)
    }

    /// z_1(t) for the linear pair: the difference decays as e^{-2t}.
    fn exact_z1(t: f64) -> f64 {
        (-2.0 * t).exp()
    }

    fn integrate(scheme: Scheme, dt: f64, steps: usize) -> (DVector<f64>, IntegratorStats) {
        let (mut dynamics, mut y) = linear_pair();
        let mut integrator = Integrator::new(scheme, 2);
        let nu = DVector::zeros(2);
        for _ in 0..steps {
            integrator.evaluate_start(&mut dynamics, &y, &nu, None);
            integrator.advance(&mut dynamics, &mut y, dt, &nu, None);
        }
        (y, integrator.stats())
    }

    #[test]
    fn test_euler_single_step() {
        let (y, stats) = integrate(Scheme::Euler, 0.1, 1);
        // z' = [-2, 2] at the start
        assert_relative_eq!(y[2], 1.0 - 0.2, epsilon = 1e-15);
        assert_relative_eq!(y[3], -1.0 + 0.2, epsilon = 1e-15);
        assert_eq!(stats.evaluations, 1);
    }

    #[test]
    fn test_rk4_matches_exponential_decay() {
        let (y, stats) = integrate(Scheme::Rk4, 0.01, 100);
        assert_relative_eq!(y[2], exact_z1(1.0), epsilon = 1e-9);
        assert_relative_eq!(y[2] + y[3], 0.0, epsilon = 1e-12);
        assert_eq!(stats.evaluations, 400);
    }

    #[test]
    fn test_rk4_error_shrinks_with_step() {
        let (coarse, _) = integrate(Scheme::Rk4, 0.1, 10);
        let (fine, _) = integrate(Scheme::Rk4, 0.05, 20);

        let coarse_err = (coarse[2] - exact_z1(1.0)).abs();
        let fine_err = (fine[2] - exact_z1(1.0)).abs();

        // Fourth order: halving dt divides the error by about 16
        assert!(fine_err < coarse_err / 10.0, "{} vs {}", fine_err, coarse_err);
    }

    #[test]
    fn test_adaptive_meets_tolerance() {
        let tolerance = AdaptiveTolerance {
            rtol: 1e-10,
            atol: 1e-12,
            min_step_fraction: 1e-3,
        };
        let (y, stats) = integrate(Scheme::Adaptive(tolerance), 0.5, 2);

        assert_relative_eq!(y[2], exact_z1(1.0), epsilon = 1e-8);
        // The first trial spans the whole step and is far too coarse
        assert!(stats.rejected > 0);
        assert!(stats.accepted > 2);
    }

    #[test]
    fn test_adaptive_substeps_keep_single_activation() {
        // Large tracking error forces activation at the first stage
        let topology = Topology::new(vec![(1, AgentSpec::new(10.0, 0.0, []))]).unwrap();
        let mut dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Nonlinear,
            HysteresisParams::default(),
            0.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();
        let tolerance = AdaptiveTolerance {
            rtol: 1e-12,
            atol: 1e-14,
            min_step_fraction: 1e-2,
        };
        let mut integrator = Integrator::new(Scheme::Adaptive(tolerance), 1);
        let mut y = DVector::from_vec(vec![10.0, 0.0, 0.0]);
        let nu = DVector::zeros(1);

        integrator.evaluate_start(&mut dynamics, &y, &nu, None);
        integrator.advance(&mut dynamics, &mut y, 0.1, &nu, None);

        // sigma never approaches the band, so exactly one activation survives
        assert_eq!(dynamics.hysteresis().activations(), &[1]);
        assert_eq!(dynamics.hysteresis().deactivations(), &[0]);
        // vartheta' = eta throughout
        assert_relative_eq!(y[2], 0.05, epsilon = 1e-9);
    }

    #[test]
    fn test_sampled_every_rounds_to_whole_steps() {
        assert_eq!(
            Discipline::sampled_every(0.3, 0.001).unwrap(),
            Discipline::Sampled { sample_interval: 300 }
        );
        assert_eq!(Discipline::Continuous.sample_interval(), 1);
        assert!(Discipline::sampled_every(0.0001, 0.001).is_err());
        assert!(Discipline::sampled_every(0.1, 0.0).is_err());
    }

    #[test]
    fn test_scheme_serde_tag() {
        let json = serde_json::to_string(&Scheme::Rk4).unwrap();
        assert_eq!(json, r#"{"kind":"rk4"}"#);

        let adaptive: Scheme = serde_json::from_str(r#"{"kind":"adaptive","rtol":1e-8}"#).unwrap();
        match adaptive {
            Scheme::Adaptive(tolerance) => {
                assert_eq!(tolerance.rtol, 1e-8);
                assert_eq!(tolerance.atol, 1e-9);
            }
            other => panic!("unexpected scheme {:?}", other),
        }
    }
}
