//! Bounded, reproducible disturbance injection.
//!
//! Each agent receives `nu(i, k) = U(-alpha, alpha) + beta`, optionally plus
//! `kappa * sin(2π f (t_k - phi_i))`. All draws come from ChaCha8 streams
//! derived from the run seed, so the same seed always reproduces the same
//! noise realization.

use crate::error::{FtracError, Result};
use crate::types::SeedStream;

use nalgebra::DVector;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::warn;

/// Shape of the injected perturbation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisturbanceShape {
    /// No disturbance
    #[default]
    None,

    /// Uniform noise in `[-alpha, alpha]` plus bias `beta`
    Uniform,

    /// Uniform noise plus bias plus a per-agent phase-shifted sinusoid
    UniformSinusoid,
}

/// Disturbance parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisturbanceConfig {
    pub shape: DisturbanceShape,

    /// Half-width of the uniform component
    pub alpha: f64,

    /// Constant bias
    pub beta: f64,

    /// Sinusoid amplitude
    pub kappa: f64,

    /// Sinusoid frequency in Hz
    pub frequency_hz: f64,

    /// Per-agent phase shifts in seconds (drawn from `[0, 1)` when absent)
    pub phases: Option<Vec<f64>>,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            shape: DisturbanceShape::None,
            alpha: 1.5,
            beta: 0.5,
            kappa: 1.0,
            frequency_hz: 10.0,
            phases: None,
        }
    }
}

impl DisturbanceConfig {
    /// No disturbance.
    pub fn none() -> Self {
        Self::default()
    }

    /// Uniform noise plus bias.
    pub fn uniform(alpha: f64, beta: f64) -> Self {
        Self {
            shape: DisturbanceShape::Uniform,
            alpha,
            beta,
            ..Default::default()
        }
    }

    /// Uniform noise plus bias plus sinusoid.
    pub fn uniform_sinusoid(alpha: f64, beta: f64, kappa: f64, frequency_hz: f64) -> Self {
        Self {
            shape: DisturbanceShape::UniformSinusoid,
            alpha,
            beta,
            kappa,
            frequency_hz,
            phases: None,
        }
    }

    /// Fixes the per-agent phase shifts instead of drawing them.
    pub fn with_phases(mut self, phases: Vec<f64>) -> Self {
        self.phases = Some(phases);
        self
    }

    /// Upper bound on `|nu|` for this configuration.
    pub fn bound(&self) -> f64 {
        match self.shape {
            DisturbanceShape::None => 0.0,
            DisturbanceShape::Uniform => self.alpha + self.beta.abs(),
            DisturbanceShape::UniformSinusoid => self.alpha + self.beta.abs() + self.kappa.abs(),
        }
    }

    /// Checks parameter ranges for `n_agents` agents.
    pub fn validate(&self, n_agents: usize) -> Result<()> {
        if self.shape == DisturbanceShape::None {
            return Ok(());
        }
        if !self.alpha.is_finite() || self.alpha < 0.0 {
            return Err(FtracError::parameters(format!(
                "disturbance alpha must be finite and >= 0, got {}",
                self.alpha
            )));
        }
        if !self.beta.is_finite() {
            return Err(FtracError::parameters("disturbance beta must be finite"));
        }
        if self.shape == DisturbanceShape::UniformSinusoid {
            if !self.kappa.is_finite() || !self.frequency_hz.is_finite() {
                return Err(FtracError::parameters("sinusoid amplitude and frequency must be finite"));
            }
            if let Some(phases) = &self.phases {
                if phases.len() != n_agents {
                    return Err(FtracError::parameters(format!(
                        "expected {} phase shifts, got {}",
                        n_agents,
                        phases.len()
                    )));
                }
                if phases.iter().any(|p| !p.is_finite()) {
                    return Err(FtracError::parameters("phase shifts must be finite"));
                }
            }
        }
        Ok(())
    }
}

/// Streams one disturbance vector per integration step.
///
/// Steps must be requested in non-decreasing order; skipped steps are still
/// drawn so the realization at step `k` never depends on which steps were
/// observed.
#[derive(Debug, Clone)]
pub struct DisturbanceGenerator {
    config: DisturbanceConfig,

    /// Noise stream (separate from the phase stream)
    rng: ChaCha8Rng,

    /// `None` when `alpha == 0` or the shape is `None`: nothing is drawn
    uniform: Option<Uniform<f64>>,

    /// Per-agent phase shifts (seconds)
    phases: Vec<f64>,

    /// Vector for the most recently generated step
    current: DVector<f64>,

    /// Step index of `current`
    generated: Option<usize>,
}

impl DisturbanceGenerator {
    /// Creates a generator for `n_agents` agents from the run seed.
    pub fn new(config: DisturbanceConfig, n_agents: usize, seed: u64) -> Result<Self> {
        config.validate(n_agents)?;

        // Separate streams so fixing the phases does not shift the noise realization
        let noise_seed = SeedStream::DisturbanceNoise.derive(seed);
        let phase_seed = SeedStream::DisturbancePhase.derive(seed);

        let phases = match (&config.shape, &config.phases) {
            (DisturbanceShape::UniformSinusoid, Some(phases)) => phases.clone(),
            (DisturbanceShape::UniformSinusoid, None) => {
                let mut phase_rng = ChaCha8Rng::seed_from_u64(phase_seed);
                let unit = Uniform::new(0.0, 1.0);
                (0..n_agents).map(|_| unit.sample(&mut phase_rng)).collect()
            }
            _ => vec![0.0; n_agents],
        };

        let uniform = match config.shape {
            DisturbanceShape::None => None,
            _ if config.alpha == 0.0 => None,
            _ => Some(Uniform::new_inclusive(-config.alpha, config.alpha)),
        };

        Ok(Self {
            config,
            rng: ChaCha8Rng::seed_from_u64(noise_seed),
            uniform,
            phases,
            current: DVector::zeros(n_agents),
            generated: None,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DisturbanceConfig {
        &self.config
    }

    /// Returns the per-agent phase shifts.
    pub fn phases(&self) -> &[f64] {
        &self.phases
    }

    /// Returns the disturbance vector for step `k` at time `t`.
    pub fn sample(&mut self, k: usize, t: f64) -> &DVector<f64> {
        match self.generated {
            Some(done) if done == k => return &self.current,
            Some(done) if done > k => {
                warn!("disturbance step {} requested after step {}; reusing the latest vector", k, done);
                return &self.current;
            }
            _ => {}
        }

        let first = self.generated.map(|done| done + 1).unwrap_or(0);
        for _ in first..k {
            self.draw_noise();
        }
        self.draw_noise();

        if self.config.shape == DisturbanceShape::UniformSinusoid {
            let omega = 2.0 * PI * self.config.frequency_hz;
            for (value, phase) in self.current.iter_mut().zip(&self.phases) {
                *value += self.config.kappa * (omega * (t - phase)).sin();
            }
        }

        self.generated = Some(k);
        &self.current
    }

    /// Fills `current` with the uniform + bias component.
    fn draw_noise(&mut self) {
        if self.config.shape == DisturbanceShape::None {
            self.current.fill(0.0);
            return;
        }

        let beta = self.config.beta;
        match &self.uniform {
            Some(uniform) => {
                for value in self.current.iter_mut() {
                    *value = uniform.sample(&mut self.rng) + beta;
                }
            }
            None => self.current.fill(beta),
        }
    }
}
