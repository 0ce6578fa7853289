//! FTRAC deterministic scenario harness
//!
//! Runs the canonical consensus scenarios against `ftrac_core` and checks
//! their settling properties. Every run is reproducible from one 64-bit seed:
//! the seed drives the disturbance streams and the random initial conditions
//! of the cluster topology.
//!
//! # Architecture
//!
//! ```text
//!  ScenarioId ──setup(seed)──► ScenarioSetup { Topology, RunConfig, checks }
//!                                    │
//!                                    ▼
//!                         ScenarioRunner ──► Simulation::run
//!                                    │
//!                      ┌─────────────┴─────────────┐
//!                      ▼                           ▼
//!               ScenarioResult                 SimExport (JSON,
//!           (passed, metrics)              fixed-point frames)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use ftrac_sim::{ScenarioId, ScenarioRunner};
//!
//! let runner = ScenarioRunner::new(42);
//! for result in runner.run_all() {
//!     println!("{}: {}", result.scenario, if result.passed { "PASS" } else { "FAIL" });
//! }
//!
//! let (_, export) = runner.run_export(ScenarioId::DisturbedRing)?;
//! export.write_to_file("disturbed_ring.json")?;
//! # Ok::<(), ftrac_sim::SimError>(())
//! ```

pub mod error;
pub mod exporter;
pub mod presets;
pub mod runner;
pub mod scenarios;

pub use error::{SimError, SimResult};
pub use exporter::{AgentTrace, FixedPointFrame, SimExport, HARDWARE_SCALE};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::{PassCheck, ScenarioId, ScenarioSetup};
