//! JSON exporter for the plotting tools.
//!
//! Exports per-agent columnar series (field order `t, x, z, vartheta, u,
//! dvartheta`) plus the run summary, and can re-express a run as the
//! fixed-point frames the hardware nodes log.

use crate::error::SimResult;

use ftrac_core::{AgentSeries, RunConfig, RunOutput, RunSummary, Trajectory};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Scale the hardware nodes apply before storing a value as an integer.
pub const HARDWARE_SCALE: f64 = 1000.0;

/// One agent's series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTrace {
    pub agent_id: u32,
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub vartheta: Vec<f64>,
    pub u: Vec<f64>,
    pub dvartheta: Vec<f64>,
}

impl From<AgentSeries> for AgentTrace {
    fn from(series: AgentSeries) -> Self {
        Self {
            agent_id: series.id.get(),
            t: series.t,
            x: series.x,
            z: series.z,
            vartheta: series.vartheta,
            u: series.u,
            dvartheta: series.dvartheta,
        }
    }
}

/// One agent at one step, in hardware integer units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPointFrame {
    pub agent: u32,
    pub step: usize,

    /// Scaled `x`
    pub state: i64,

    /// Scaled `z`
    pub vstate: i64,

    /// Scaled `vartheta`
    pub vartheta: i64,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Configuration the run used
    pub config: RunConfig,

    /// Duration in seconds
    pub duration_sec: f64,

    /// Full-rate series, one per agent
    pub agents: Vec<AgentTrace>,

    /// Series at the sample instants (sampled runs only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<Vec<AgentTrace>>,

    pub summary: RunSummary,

    /// Final results
    pub passed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

fn traces(trajectory: &Trajectory) -> Vec<AgentTrace> {
    trajectory
        .ids
        .iter()
        .filter_map(|id| trajectory.series(*id))
        .map(AgentTrace::from)
        .collect()
}

impl SimExport {
    /// Creates an export from a finished run, keeping every `stride`-th full-rate sample.
    pub fn new(scenario: &str, seed: u64, config: RunConfig, output: &RunOutput, stride: usize) -> Self {
        let full = if stride > 1 {
            output.full.every_nth(stride)
        } else {
            output.full.clone()
        };

        Self {
            scenario: scenario.to_string(),
            seed,
            config,
            duration_sec: output.summary.final_time,
            agents: traces(&full),
            sampled: output.sampled.as_ref().map(traces),
            summary: output.summary.clone(),
            passed: false,
            failure_reason: None,
        }
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, failure_reason: Option<String>) {
        self.passed = passed;
        self.failure_reason = failure_reason;
    }

    /// Full-rate samples as hardware frames (`value * scale_factor`, truncated toward zero).
    pub fn fixed_point_frames(&self, scale_factor: f64) -> Vec<FixedPointFrame> {
        let scale = |v: f64| (v * scale_factor) as i64;

        self.agents
            .iter()
            .flat_map(|trace| {
                (0..trace.t.len()).map(move |step| FixedPointFrame {
                    agent: trace.agent_id,
                    step,
                    state: scale(trace.x[step]),
                    vstate: scale(trace.z[step]),
                    vartheta: scale(trace.vartheta[step]),
                })
            })
            .collect()
    }

    /// Serializes to pretty JSON.
    pub fn to_json(&self) -> SimResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> SimResult<()> {
        let json = self.to_json()?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
