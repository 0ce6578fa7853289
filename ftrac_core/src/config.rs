//! Run parameters.

use crate::consensus::ConsensusMode;
use crate::disturbance::DisturbanceConfig;
use crate::dynamics::OscillatorBias;
use crate::error::{FtracError, Result};
use crate::hysteresis::HysteresisParams;
use crate::integrator::{Discipline, Scheme};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Length of a run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Horizon {
    /// Simulated seconds `T`; the run has `ceil(T / dt)` points
    Duration(f64),

    /// Number of fine steps
    Points(usize),
}

impl Horizon {
    /// Number of fine steps for step size `dt` (0 when `dt` is unusable).
    pub fn n_points(&self, dt: f64) -> usize {
        match *self {
            Horizon::Points(n) => n,
            Horizon::Duration(t) if t.is_finite() && t > 0.0 && dt.is_finite() && dt > 0.0 => {
                // Absorb representation error so 30 / 0.001 gives 30000, not 30001
                (t / dt - 1e-9).ceil().max(0.0) as usize
            }
            Horizon::Duration(_) => 0,
        }
    }
}

/// Everything a run needs besides the topology.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Seed of the disturbance streams
    pub seed: u64,

    /// Fine step size in seconds
    pub dt: f64,

    pub horizon: Horizon,

    pub hysteresis: HysteresisParams,

    pub disturbance: DisturbanceConfig,

    pub consensus: ConsensusMode,

    /// Constant oscillator bias added to the consensus term
    pub omega: f64,

    pub oscillator_bias: OscillatorBias,

    pub scheme: Scheme,

    pub discipline: Discipline,

    /// Clamp x, z and vartheta to `>= 0` after every step
    pub clamp_non_negative: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            dt: 0.01,
            horizon: Horizon::Duration(20.0),
            hysteresis: HysteresisParams::default(),
            disturbance: DisturbanceConfig::none(),
            consensus: ConsensusMode::Nonlinear,
            omega: 0.0,
            oscillator_bias: OscillatorBias::ConsensusOnly,
            scheme: Scheme::Rk4,
            discipline: Discipline::Continuous,
            clamp_non_negative: false,
        }
    }
}

impl RunConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Sets the seed of the random streams.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the fine step size in seconds.
    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    /// Sets the run length.
    pub fn with_horizon(mut self, horizon: Horizon) -> Self {
        self.horizon = horizon;
        self
    }

    /// Shorthand for `with_horizon(Horizon::Duration(secs))`.
    pub fn with_duration(self, secs: f64) -> Self {
        self.with_horizon(Horizon::Duration(secs))
    }

    /// Sets the gain switch parameters.
    pub fn with_hysteresis(mut self, hysteresis: HysteresisParams) -> Self {
        self.hysteresis = hysteresis;
        self
    }

    /// Sets the disturbance shape and bounds.
    pub fn with_disturbance(mut self, disturbance: DisturbanceConfig) -> Self {
        self.disturbance = disturbance;
        self
    }

    /// Selects the consensus law.
    pub fn with_consensus(mut self, consensus: ConsensusMode) -> Self {
        self.consensus = consensus;
        self
    }

    /// Sets the oscillator bias and where it enters the dynamics.
    pub fn with_omega(mut self, omega: f64, bias: OscillatorBias) -> Self {
        self.omega = omega;
        self.oscillator_bias = bias;
        self
    }

    /// Selects the numerical scheme (continuous discipline only).
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    /// Selects continuous or sampled consensus refresh.
    pub fn with_discipline(mut self, discipline: Discipline) -> Self {
        self.discipline = discipline;
        self
    }

    /// Enables clamping of the state to `>= 0` after every step.
    pub fn with_clamp_non_negative(mut self, clamp: bool) -> Self {
        self.clamp_non_negative = clamp;
        self
    }

    /// Number of fine steps in the run.
    pub fn n_points(&self) -> usize {
        self.horizon.n_points(self.dt)
    }

    /// Number of sampled rows (`n_points / sample_interval`, floor), if sampled.
    pub fn sample_points(&self) -> Option<usize> {
        match self.discipline {
            Discipline::Continuous => None,
            Discipline::Sampled { sample_interval } if sample_interval > 0 => {
                Some(self.n_points() / sample_interval)
            }
            Discipline::Sampled { .. } => Some(0),
        }
    }

    /// Checks every parameter that does not depend on the agent count.
    pub fn validate(&self) -> Result<()> {
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(FtracError::parameters(format!("dt must be finite and > 0, got {}", self.dt)));
        }
        if let Horizon::Duration(t) = self.horizon {
            if !t.is_finite() || t <= 0.0 {
                return Err(FtracError::parameters(format!("duration must be finite and > 0, got {}", t)));
            }
            if t / self.dt >= usize::MAX as f64 {
                return Err(FtracError::parameters(format!(
                    "duration {} at dt {} exceeds the addressable step count",
                    t, self.dt
                )));
            }
        }
        let n_points = self.n_points();
        if n_points == 0 {
            return Err(FtracError::parameters("horizon contains no steps"));
        }
        if !self.omega.is_finite() {
            return Err(FtracError::parameters("omega must be finite"));
        }

        self.hysteresis.validate()?;

        if let Scheme::Adaptive(tolerance) = &self.scheme {
            tolerance.validate()?;
        }

        if let Discipline::Sampled { sample_interval } = self.discipline {
            if sample_interval == 0 {
                return Err(FtracError::parameters("sample_interval must be >= 1"));
            }
            if sample_interval >= n_points {
                return Err(FtracError::DegenerateSampling {
                    sample_interval,
                    n_points,
                });
            }
            if self.scheme != Scheme::Euler {
                warn!(
                    "scheme {} ignored in sampled mode; local steps use explicit Euler",
                    self.scheme.name()
                );
            }
        }

        Ok(())
    }

    /// Runs [`validate`](Self::validate) and checks that the full-rate
    /// trajectory of `n_agents` agents fits in a single allocation.
    pub fn validate_for(&self, n_agents: usize) -> Result<()> {
        self.validate()?;

        let n_points = self.n_points();
        let bytes = n_points
            .checked_mul(n_agents.max(1))
            .and_then(|cells| cells.checked_mul(std::mem::size_of::<f64>()))
            .filter(|bytes| *bytes <= isize::MAX as usize);
        if bytes.is_none() {
            return Err(FtracError::parameters(format!(
                "{} points for {} agents cannot be recorded",
                n_points, n_agents
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.dt, 0.01);
        assert_eq!(config.n_points(), 2000);
        assert_eq!(config.hysteresis.eta, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_horizon_absorbs_rounding() {
        assert_eq!(Horizon::Duration(30.0).n_points(0.001), 30000);
        assert_eq!(Horizon::Duration(0.3).n_points(0.1), 3);
        assert_eq!(Horizon::Duration(0.35).n_points(0.1), 4);
        assert_eq!(Horizon::Points(17).n_points(0.5), 17);
        assert_eq!(Horizon::Duration(1.0).n_points(0.0), 0);
    }

    #[test]
    fn test_sample_points_floor() {
        let config = RunConfig::default()
            .with_horizon(Horizon::Points(1000))
            .with_discipline(Discipline::Sampled { sample_interval: 300 });
        assert_eq!(config.sample_points(), Some(3));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_degenerate_sampling() {
        let config = RunConfig::default()
            .with_horizon(Horizon::Points(100))
            .with_discipline(Discipline::Sampled { sample_interval: 100 });

        match config.validate() {
            Err(FtracError::DegenerateSampling {
                sample_interval,
                n_points,
            }) => {
                assert_eq!(sample_interval, 100);
                assert_eq!(n_points, 100);
            }
            other => panic!("expected DegenerateSampling, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_parameters() {
        assert!(RunConfig::default().with_dt(0.0).validate().is_err());
        assert!(RunConfig::default().with_dt(f64::NAN).validate().is_err());
        assert!(RunConfig::default().with_duration(-1.0).validate().is_err());
        assert!(RunConfig::default()
            .with_hysteresis(HysteresisParams::new(-0.5, 0.01, 0.02))
            .validate()
            .is_err());
        assert!(RunConfig::default()
            .with_discipline(Discipline::Sampled { sample_interval: 0 })
            .validate()
            .is_err());
    }

    #[test]
    fn test_unallocatable_horizon_is_rejected() {
        let huge = RunConfig::default().with_duration(1e300);
        assert!(matches!(huge.validate(), Err(FtracError::InvalidParameters(_))));

        let wide = RunConfig::default().with_horizon(Horizon::Points(usize::MAX / 4));
        assert!(wide.validate().is_ok());
        assert!(matches!(wide.validate_for(3), Err(FtracError::InvalidParameters(_))));

        assert!(RunConfig::default().validate_for(9).is_ok());
    }

    #[test]
    fn test_json_with_defaults() {
        let config = RunConfig::from_json(
            r#"{
                "dt": 0.001,
                "horizon": { "points": 1000 },
                "consensus": "linear",
                "discipline": { "kind": "sampled", "sample_interval": 300 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.dt, 0.001);
        assert_eq!(config.n_points(), 1000);
        assert_eq!(config.consensus, ConsensusMode::Linear);
        assert_eq!(config.sample_points(), Some(3));
        assert_eq!(config.seed, 42);
        assert_eq!(config.scheme, Scheme::Rk4);
    }
}
