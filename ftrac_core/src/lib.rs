//! FTRAC Core - Finite-Time Robust Adaptive Consensus simulation engine
//!
//! Agents exchange a virtual reference `z` over a directed graph and drive
//! their tracking error `sigma = x - z` into a band around zero with a
//! sign-based control law and a hysteresis-switched adaptive gain `vartheta`.
//!
//! # Architecture
//!
//! ```text
//!  Topology ──► Dynamics ◄── ConsensusLaw (sign/sqrt or -L z)
//!                  │  ▲
//!                  │  └──── HysteresisBank (mutated per evaluation)
//!                  ▼
//!  DisturbanceGenerator ──► Integrator (RK4 / Euler / Dormand-Prince)
//!                               │      continuous or sampled
//!                               ▼
//!                           Recorder ──► Trajectory
//! ```
//!
//! # Usage
//!
//! ```
//! use ftrac_core::{AgentSpec, RunConfig, Simulation, Topology};
//!
//! let topology = Topology::new(vec![
//!     (1, AgentSpec::new(5.0, 5.0, [2])),
//!     (2, AgentSpec::new(1.0, 1.0, [3])),
//!     (3, AgentSpec::new(8.0, 8.0, [1])),
//! ])?;
//!
//! let output = Simulation::new(topology, RunConfig::default().with_duration(1.0))?.run()?;
//! assert_eq!(output.full.len(), 100);
//! # Ok::<(), ftrac_core::FtracError>(())
//! ```

pub mod config;
pub mod consensus;
pub mod disturbance;
pub mod dynamics;
pub mod error;
pub mod hysteresis;
pub mod integrator;
pub mod recorder;
pub mod simulation;
pub mod state;
pub mod topology;
pub mod types;

// Re-export key types for convenience
pub use config::{Horizon, RunConfig};
pub use consensus::{ConsensusLaw, ConsensusMode, LaplacianConsensus, SignSqrtConsensus};
pub use disturbance::{DisturbanceConfig, DisturbanceGenerator, DisturbanceShape};
pub use dynamics::{Derivative, Dynamics, OscillatorBias};
pub use error::{FtracError, Result};
pub use hysteresis::{GainState, HysteresisBank, HysteresisParams};
pub use integrator::{AdaptiveTolerance, Discipline, Integrator, IntegratorStats, Scheme};
pub use recorder::{AgentSeries, Recorder, SampleRow, Trajectory};
pub use simulation::{RunOutput, RunSummary, Simulation};
pub use state::{AgentSnapshot, SimulationState};
pub use topology::{AgentSpec, Topology};
pub use types::{AgentId, SeedStream};
