//! Hysteresis-switched adaptive gain.
//!
//! Each agent carries a two-state switch deciding whether its gain
//! `vartheta` accumulates. The band `epsilon_off < epsilon_on` keeps the
//! switch from toggling on a single threshold:
//!
//! ```text
//!   rate
//!    eta ┤        ┌──────────────── Active
//!        │        │      ▲
//!        │        ▼      │
//!      0 ┼────────┴──────┘ Inactive
//!        └────────┬──────┬──────────── |sigma|
//!             eps_off  eps_on
//! ```

use crate::error::{FtracError, Result};

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Adaptation rate and hysteresis band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HysteresisParams {
    /// Adaptation rate while active (eta > 0)
    pub eta: f64,

    /// Below or at this |sigma| an active gain freezes ("ε")
    pub epsilon_off: f64,

    /// Above this |sigma| a frozen gain resumes ("ε̄")
    pub epsilon_on: f64,
}

impl Default for HysteresisParams {
    fn default() -> Self {
        Self {
            eta: 0.5,
            epsilon_off: 0.01,
            epsilon_on: 0.02,
        }
    }
}

impl HysteresisParams {
    /// Creates a parameter set.
    pub fn new(eta: f64, epsilon_off: f64, epsilon_on: f64) -> Self {
        Self {
            eta,
            epsilon_off,
            epsilon_on,
        }
    }

    /// Checks `eta > 0` and `0 <= epsilon_off < epsilon_on`.
    pub fn validate(&self) -> Result<()> {
        if !self.eta.is_finite() || self.eta <= 0.0 {
            return Err(FtracError::parameters(format!("eta must be finite and > 0, got {}", self.eta)));
        }
        if !self.epsilon_off.is_finite() || !self.epsilon_on.is_finite() {
            return Err(FtracError::parameters("hysteresis thresholds must be finite"));
        }
        if self.epsilon_off < 0.0 || self.epsilon_off >= self.epsilon_on {
            return Err(FtracError::parameters(format!(
                "need 0 <= epsilon_off < epsilon_on, got {} and {}",
                self.epsilon_off, self.epsilon_on
            )));
        }
        Ok(())
    }
}

/// State of one agent's gain switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GainState {
    /// Gain frozen
    #[default]
    Inactive,

    /// Gain accumulating at rate eta
    Active,
}

impl GainState {
    /// Applies one evaluation and returns the next state with its adaptation rate.
    ///
    /// Activation needs `|sigma| > epsilon_on` strictly; deactivation happens at
    /// `|sigma| <= epsilon_off`.
    pub fn step(self, sigma: f64, params: &HysteresisParams) -> (GainState, f64) {
        let magnitude = sigma.abs();
        match self {
            GainState::Inactive if magnitude > params.epsilon_on => (GainState::Active, params.eta),
            GainState::Inactive => (GainState::Inactive, 0.0),
            GainState::Active if magnitude <= params.epsilon_off => (GainState::Inactive, 0.0),
            GainState::Active => (GainState::Active, params.eta),
        }
    }

    /// Returns true while the gain accumulates.
    pub fn is_active(self) -> bool {
        self == GainState::Active
    }
}

/// The gain switches of every agent in a run.
#[derive(Debug, Clone)]
pub struct HysteresisBank {
    params: HysteresisParams,
    states: Vec<GainState>,

    /// Inactive -> Active transitions per agent
    activations: Vec<u64>,

    /// Active -> Inactive transitions per agent
    deactivations: Vec<u64>,
}

impl HysteresisBank {
    /// Creates a bank with every agent inactive.
    pub fn new(params: HysteresisParams, n_agents: usize) -> Self {
        Self {
            params,
            states: vec![GainState::Inactive; n_agents],
            activations: vec![0; n_agents],
            deactivations: vec![0; n_agents],
        }
    }

    /// Returns the parameters.
    pub fn params(&self) -> &HysteresisParams {
        &self.params
    }

    /// Evaluates agent `index` with tracking error `sigma` and returns `dvartheta/dt`.
    pub fn evaluate(&mut self, index: usize, sigma: f64) -> f64 {
        let before = self.states[index];
        let (after, rate) = before.step(sigma, &self.params);

        if before != after {
            match after {
                GainState::Active => self.activations[index] += 1,
                GainState::Inactive => self.deactivations[index] += 1,
            }
            trace!(agent = index, sigma, ?after, "gain switch");
        }

        self.states[index] = after;
        rate
    }

    /// Returns the state of agent `index`.
    pub fn state(&self, index: usize) -> GainState {
        self.states[index]
    }

    /// Returns all states in dense-index order.
    pub fn states(&self) -> &[GainState] {
        &self.states
    }

    /// Returns Inactive -> Active counts per agent.
    pub fn activations(&self) -> &[u64] {
        &self.activations
    }

    /// Returns Active -> Inactive counts per agent.
    pub fn deactivations(&self) -> &[u64] {
        &self.deactivations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params() -> HysteresisParams {
        HysteresisParams::new(0.5, 0.01, 0.02)
    }

    #[test]
    fn test_inactive_activates_only_above_epsilon_on() {
        let p = params();

        assert_eq!(GainState::Inactive.step(0.015, &p), (GainState::Inactive, 0.0));
        assert_eq!(GainState::Inactive.step(0.03, &p), (GainState::Active, 0.5));
        assert_eq!(GainState::Inactive.step(-0.03, &p), (GainState::Active, 0.5));
    }

    #[test]
    fn test_tie_at_epsilon_on_does_not_activate() {
        let p = params();
        assert_eq!(GainState::Inactive.step(0.02, &p), (GainState::Inactive, 0.0));
        assert_eq!(GainState::Inactive.step(-0.02, &p), (GainState::Inactive, 0.0));
    }

    #[test]
    fn test_active_holds_inside_band_and_releases_at_epsilon_off() {
        let p = params();

        // Inside the band an active gain keeps accumulating
        assert_eq!(GainState::Active.step(0.015, &p), (GainState::Active, 0.5));
        // Tie at epsilon_off releases
        assert_eq!(GainState::Active.step(0.01, &p), (GainState::Inactive, 0.0));
        assert_eq!(GainState::Active.step(0.0, &p), (GainState::Inactive, 0.0));
    }

    #[test]
    fn test_bank_counts_transitions() {
        let mut bank = HysteresisBank::new(params(), 2);

        assert_eq!(bank.evaluate(0, 0.5), 0.5);
        assert_eq!(bank.evaluate(0, 0.015), 0.5);
        assert_eq!(bank.evaluate(0, 0.005), 0.0);
        assert_eq!(bank.evaluate(0, 0.015), 0.0);

        assert_eq!(bank.activations(), &[1, 0]);
        assert_eq!(bank.deactivations(), &[1, 0]);
        assert_eq!(bank.state(1), GainState::Inactive);
    }

    #[test]
    fn test_params_validation() {
        assert!(params().validate().is_ok());
        assert!(HysteresisParams::new(0.0, 0.01, 0.02).validate().is_err());
        assert!(HysteresisParams::new(0.5, 0.02, 0.02).validate().is_err());
        assert!(HysteresisParams::new(0.5, -0.01, 0.02).validate().is_err());
        assert!(HysteresisParams::new(0.5, 0.0, 0.02).validate().is_ok());
    }

    proptest! {
        #[test]
        fn prop_rate_matches_resulting_state(
            sigmas in prop::collection::vec(-0.05f64..0.05, 1..200)
        ) {
            let p = params();
            let mut state = GainState::Inactive;
            for sigma in sigmas {
                let (next, rate) = state.step(sigma, &p);
                prop_assert_eq!(rate, if next.is_active() { p.eta } else { 0.0 });
                state = next;
            }
        }

        #[test]
        fn prop_no_single_threshold_toggling(
            sigmas in prop::collection::vec(-0.05f64..0.05, 1..200)
        ) {
            // Every activation is caused by |sigma| > eps_on and every release by
            // |sigma| <= eps_off, so consecutive opposite switches need sigma to
            // cross the whole band.
            let p = params();
            let mut state = GainState::Inactive;
            for sigma in sigmas {
                let (next, _) = state.step(sigma, &p);
                if state != next {
                    match next {
                        GainState::Active => prop_assert!(sigma.abs() > p.epsilon_on),
                        GainState::Inactive => prop_assert!(sigma.abs() <= p.epsilon_off),
                    }
                }
                state = next;
            }
        }

        #[test]
        fn prop_same_sigma_twice_is_idempotent(sigma in -0.05f64..0.05, active in any::<bool>()) {
            let p = params();
            let start = if active { GainState::Active } else { GainState::Inactive };
            let (once, rate_once) = start.step(sigma, &p);
            let (twice, rate_twice) = once.step(sigma, &p);
            prop_assert_eq!(once, twice);
            prop_assert_eq!(rate_once, rate_twice);
        }
    }
}
