//! The FTRAC vector field.
//!
//! For every enabled agent:
//!
//! ```text
//! g_i           = consensus_i(z) + omega
//! u_i           = g_i - vartheta_i * sign(x_i - z_i)
//! dx_i/dt       = u_i + nu_i            (+ omega with OscillatorBias::StateAndConsensus)
//! dz_i/dt       = g_i
//! dvartheta_i/dt = hysteresis rate      (mutates the agent's gain switch)
//! ```
//!
//! Inner stages of a step reuse the rate of the first stage through
//! [`Dynamics::evaluate_with_rate`], so the gain switch moves at most once per
//! step and `vartheta` stays constant over a step that starts inactive.
//!
//! Disabled agents have a zero derivative and a zero control input.

use crate::consensus::{sign, ConsensusLaw, ConsensusMode};
use crate::error::Result;
use crate::hysteresis::{HysteresisBank, HysteresisParams};
use crate::topology::Topology;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Where the constant oscillator bias `omega` enters the dynamics.
///
/// Recorded experiments disagree on this point, so both variants are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OscillatorBias {
    /// `omega` is part of `g` only (and so reaches `dx/dt` through `u`)
    #[default]
    ConsensusOnly,

    /// `omega` is part of `g` and is also added to `dx/dt` directly
    StateAndConsensus,
}

/// One evaluation of the vector field plus the recorded auxiliaries.
#[derive(Debug, Clone, PartialEq)]
pub struct Derivative {
    /// `d/dt [x | z | vartheta]`
    pub dydt: DVector<f64>,

    /// Control input per agent
    pub u: DVector<f64>,

    /// Adaptation rate per agent
    pub dvartheta: DVector<f64>,
}

impl Derivative {
    /// Creates a zeroed buffer for `n_agents` agents.
    pub fn zeros(n_agents: usize) -> Self {
        Self {
            dydt: DVector::zeros(3 * n_agents),
            u: DVector::zeros(n_agents),
            dvartheta: DVector::zeros(n_agents),
        }
    }
}

/// Owns the consensus law and the hysteresis bank of a run.
#[derive(Debug)]
pub struct Dynamics {
    n_agents: usize,
    law: Box<dyn ConsensusLaw>,
    hysteresis: HysteresisBank,
    enabled: Vec<bool>,
    omega: f64,
    bias: OscillatorBias,

    /// Scratch copy of the z block
    z: DVector<f64>,

    /// Coupling term of the current evaluation
    g: DVector<f64>,
}

impl Dynamics {
    /// Creates the vector field for a topology.
    pub fn new(
        topology: &Topology,
        mode: ConsensusMode,
        hysteresis: HysteresisParams,
        omega: f64,
        bias: OscillatorBias,
    ) -> Result<Self> {
        hysteresis.validate()?;
        let n = topology.len();

        Ok(Self {
            n_agents: n,
            law: mode.build(topology)?,
            hysteresis: HysteresisBank::new(hysteresis, n),
            enabled: topology.enabled_mask(),
            omega,
            bias,
            z: DVector::zeros(n),
            g: DVector::zeros(n),
        })
    }

    /// Returns the number of agents.
    pub fn n_agents(&self) -> usize {
        self.n_agents
    }

    /// Returns the consensus law in use.
    pub fn law(&self) -> &dyn ConsensusLaw {
        self.law.as_ref()
    }

    /// Returns the hysteresis bank.
    pub fn hysteresis(&self) -> &HysteresisBank {
        &self.hysteresis
    }

    /// Computes `g = consensus(z) + omega` for the joint state `y`.
    ///
    /// Disabled agents get `0`. Does not touch the hysteresis bank.
    pub fn consensus_term(&mut self, y: &DVector<f64>) -> &DVector<f64> {
        let n = self.n_agents;
        self.z.copy_from(&y.rows(n, n));
        self.law.coupling(&self.z, &mut self.g);

        for (g, enabled) in self.g.iter_mut().zip(&self.enabled) {
            *g = if *enabled { *g + self.omega } else { 0.0 };
        }
        &self.g
    }

    /// Evaluates the vector field at `y` with disturbance `nu`.
    ///
    /// When `held_g` is given (sampled mode) it replaces the freshly computed
    /// coupling term; it must already include `omega`. Each call advances the
    /// hysteresis state machine of every enabled agent once.
    pub fn evaluate(
        &mut self,
        y: &DVector<f64>,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
        out: &mut Derivative,
    ) {
        self.fill(y, nu, held_g, None, out);
    }

    /// Evaluates the vector field with the adaptation rates fixed to `rate`.
    ///
    /// The hysteresis bank is not consulted or mutated.
    pub fn evaluate_with_rate(
        &mut self,
        y: &DVector<f64>,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
        rate: &DVector<f64>,
        out: &mut Derivative,
    ) {
        self.fill(y, nu, held_g, Some(rate), out);
    }

    fn fill(
        &mut self,
        y: &DVector<f64>,
        nu: &DVector<f64>,
        held_g: Option<&DVector<f64>>,
        held_rate: Option<&DVector<f64>>,
        out: &mut Derivative,
    ) {
        let n = self.n_agents;
        match held_g {
            Some(g) => self.g.copy_from(g),
            None => {
                self.consensus_term(y);
            }
        }

        for i in 0..n {
            if !self.enabled[i] {
                out.dydt[i] = 0.0;
                out.dydt[n + i] = 0.0;
                out.dydt[2 * n + i] = 0.0;
                out.u[i] = 0.0;
                out.dvartheta[i] = 0.0;
                continue;
            }

            let sigma = y[i] - y[n + i];
            let vartheta = y[2 * n + i];
            let g = self.g[i];

            let u = g - vartheta * sign(sigma);
            let rate = match held_rate {
                Some(rate) => rate[i],
                None => self.hysteresis.evaluate(i, sigma),
            };

            let mut dx = u + nu[i];
            if self.bias == OscillatorBias::StateAndConsensus {
                dx += self.omega;
            }

            out.dydt[i] = dx;
            out.dydt[n + i] = g;
            out.dydt[2 * n + i] = rate;
            out.u[i] = u;
            out.dvartheta[i] = rate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hysteresis::GainState;
    use crate::topology::AgentSpec;
    use approx::assert_relative_eq;

    fn pair(disabled_second: bool) -> Topology {
        let second = AgentSpec::new(1.0, 3.0, [1]);
        Topology::new(vec![
            (1, AgentSpec::new(2.0, 2.0, [2])),
            (2, if disabled_second { second.disabled() } else { second }),
        ])
        .unwrap()
    }

    fn y(x: [f64; 2], z: [f64; 2], vartheta: [f64; 2]) -> DVector<f64> {
        DVector::from_vec(vec![x[0], x[1], z[0], z[1], vartheta[0], vartheta[1]])
    }

    #[test]
    fn test_control_input_and_derivative() {
        let topology = pair(false);
        let mut dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Linear,
            HysteresisParams::default(),
            0.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();

        let state = y([2.0, 1.0], [2.0, 3.0], [0.0, 0.4]);
        let nu = DVector::from_vec(vec![0.1, -0.2]);
        let mut out = Derivative::zeros(2);

        dynamics.evaluate(&state, &nu, None, &mut out);

        // g = -L z = [3 - 2, 2 - 3]
        assert_relative_eq!(out.dydt[2], 1.0);
        assert_relative_eq!(out.dydt[3], -1.0);

        // Agent 1: sigma = 0 -> u = g, gain stays inactive
        assert_relative_eq!(out.u[0], 1.0);
        assert_relative_eq!(out.dydt[0], 1.1);
        assert_eq!(out.dvartheta[0], 0.0);

        // Agent 2: sigma = -2 -> u = g + vartheta, gain activates
        assert_relative_eq!(out.u[1], -1.0 + 0.4);
        assert_relative_eq!(out.dydt[1], -0.6 - 0.2);
        assert_eq!(out.dvartheta[1], 0.5);
        assert_eq!(out.dydt[5], 0.5);
        assert_eq!(dynamics.hysteresis().state(1), GainState::Active);
    }

    #[test]
    fn test_oscillator_bias_variants() {
        let topology = pair(false);
        let state = y([2.0, 3.0], [2.0, 3.0], [0.0, 0.0]);
        let nu = DVector::zeros(2);

        let mut consensus_only = Dynamics::new(
            &topology,
            ConsensusMode::Linear,
            HysteresisParams::default(),
            1.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();
        let mut both = Dynamics::new(
            &topology,
            ConsensusMode::Linear,
            HysteresisParams::default(),
            1.0,
            OscillatorBias::StateAndConsensus,
        )
        .unwrap();

        let mut a = Derivative::zeros(2);
        let mut b = Derivative::zeros(2);
        consensus_only.evaluate(&state, &nu, None, &mut a);
        both.evaluate(&state, &nu, None, &mut b);

        // z advances identically
        assert_eq!(a.dydt.rows(2, 2), b.dydt.rows(2, 2));
        // dx differs by exactly omega
        assert_relative_eq!(b.dydt[0] - a.dydt[0], 1.0);
        assert_relative_eq!(b.dydt[1] - a.dydt[1], 1.0);
        // At consensus the reference still advances at omega
        assert_relative_eq!(a.dydt[2], 1.0 + 1.0);
    }

    #[test]
    fn test_held_coupling_replaces_fresh_one() {
        let topology = pair(false);
        let mut dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Nonlinear,
            HysteresisParams::default(),
            0.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();

        let state = y([2.0, 3.0], [2.0, 3.0], [0.0, 0.0]);
        let held = DVector::from_vec(vec![7.0, -7.0]);
        let mut out = Derivative::zeros(2);

        dynamics.evaluate(&state, &DVector::zeros(2), Some(&held), &mut out);

        assert_eq!(out.dydt[2], 7.0);
        assert_eq!(out.dydt[3], -7.0);
    }

    #[test]
    fn test_held_rate_leaves_switch_untouched() {
        let topology = pair(false);
        let mut dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Nonlinear,
            HysteresisParams::default(),
            0.0,
            OscillatorBias::ConsensusOnly,
        )
        .unwrap();

        // Agent 2 has sigma = -2, far outside the band
        let state = y([2.0, 1.0], [2.0, 3.0], [0.0, 0.0]);
        let rate = DVector::from_vec(vec![0.0, 0.0]);
        let mut out = Derivative::zeros(2);

        dynamics.evaluate_with_rate(&state, &DVector::zeros(2), None, &rate, &mut out);

        assert_eq!(out.dvartheta[1], 0.0);
        assert_eq!(out.dydt[5], 0.0);
        assert_eq!(dynamics.hysteresis().state(1), GainState::Inactive);
        assert_eq!(dynamics.hysteresis().activations(), &[0, 0]);
    }

    #[test]
    fn test_disabled_agent_is_frozen() {
        let topology = pair(true);
        let mut dynamics = Dynamics::new(
            &topology,
            ConsensusMode::Nonlinear,
            HysteresisParams::default(),
            0.5,
            OscillatorBias::StateAndConsensus,
        )
        .unwrap();

        let state = y([2.0, 1.0], [2.0, 3.0], [0.0, 0.0]);
        let nu = DVector::from_vec(vec![0.0, 5.0]);
        let mut out = Derivative::zeros(2);

        dynamics.evaluate(&state, &nu, None, &mut out);

        assert_eq!(out.dydt[1], 0.0);
        assert_eq!(out.dydt[3], 0.0);
        assert_eq!(out.dydt[5], 0.0);
        assert_eq!(out.u[1], 0.0);
        assert_eq!(dynamics.hysteresis().state(1), GainState::Inactive);

        // Agent 1's only neighbor is disabled: g = omega only
        assert_relative_eq!(out.dydt[2], 0.5);
    }

    #[test]
    fn test_invalid_hysteresis_is_rejected() {
        let result = Dynamics::new(
            &pair(false),
            ConsensusMode::Nonlinear,
            HysteresisParams::new(0.5, 0.05, 0.01),
            0.0,
            OscillatorBias::ConsensusOnly,
        );
        assert!(result.is_err());
    }
}
