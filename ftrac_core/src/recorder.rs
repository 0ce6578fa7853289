//! Pre-sized trajectory storage.
//!
//! Every field is an `n_agents × n_points` matrix (one row per agent, one
//! column per sample). The recorder is index-addressed and never grows, so the
//! storage is allocated once before the run starts.

use crate::dynamics::Derivative;
use crate::error::{FtracError, Result};
use crate::state::SimulationState;
use crate::types::AgentId;

use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Recorded run, in columnar form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Agent ids, row order of every matrix
    pub ids: Vec<AgentId>,

    /// Sample times
    pub t: Vec<f64>,

    pub x: DMatrix<f64>,
    pub z: DMatrix<f64>,
    pub vartheta: DMatrix<f64>,

    /// Control input at each sample
    pub u: DMatrix<f64>,

    /// Adaptation rate at each sample
    pub dvartheta: DMatrix<f64>,
}

/// One agent's series, borrowed from a [`Trajectory`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSeries {
    pub id: AgentId,
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub z: Vec<f64>,
    pub vartheta: Vec<f64>,
    pub u: Vec<f64>,
    pub dvartheta: Vec<f64>,
}

impl AgentSeries {
    /// Tracking error series `x - z`.
    pub fn sigma(&self) -> Vec<f64> {
        self.x.iter().zip(&self.z).map(|(x, z)| x - z).collect()
    }
}

/// One agent at one sample (row-per-sample form).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub agent: AgentId,
    pub step: usize,
    pub t: f64,
    pub x: f64,
    pub z: f64,
    pub vartheta: f64,
    pub u: f64,
    pub dvartheta: f64,
}

impl Trajectory {
    /// Number of samples.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Returns true when no time step was recorded.
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Returns the number of recorded agents.
    pub fn n_agents(&self) -> usize {
        self.ids.len()
    }

    /// Copies out the series of one agent.
    pub fn series(&self, id: AgentId) -> Option<AgentSeries> {
        let row = self.ids.iter().position(|candidate| *candidate == id)?;
        let take = |m: &DMatrix<f64>| m.row(row).iter().copied().collect::<Vec<_>>();

        Some(AgentSeries {
            id,
            t: self.t.clone(),
            x: take(&self.x),
            z: take(&self.z),
            vartheta: take(&self.vartheta),
            u: take(&self.u),
            dvartheta: take(&self.dvartheta),
        })
    }

    /// Iterates samples in time order, agents in id order within a sample.
    pub fn rows(&self) -> impl Iterator<Item = SampleRow> + '_ {
        let n = self.n_agents();
        (0..self.len()).flat_map(move |step| {
            (0..n).map(move |row| SampleRow {
                agent: self.ids[row],
                step,
                t: self.t[step],
                x: self.x[(row, step)],
                z: self.z[(row, step)],
                vartheta: self.vartheta[(row, step)],
                u: self.u[(row, step)],
                dvartheta: self.dvartheta[(row, step)],
            })
        })
    }

    /// Keeps every `stride`-th sample, starting with the first.
    pub fn every_nth(&self, stride: usize) -> Trajectory {
        let stride = stride.max(1);
        let keep: Vec<usize> = (0..self.len()).step_by(stride).collect();
        let pick = |m: &DMatrix<f64>| m.select_columns(keep.iter());

        Trajectory {
            ids: self.ids.clone(),
            t: keep.iter().map(|&k| self.t[k]).collect(),
            x: pick(&self.x),
            z: pick(&self.z),
            vartheta: pick(&self.vartheta),
            u: pick(&self.u),
            dvartheta: pick(&self.dvartheta),
        }
    }

    /// Largest `|x - z|` over all agents at the last sample.
    pub fn final_max_sigma(&self) -> f64 {
        match self.len() {
            0 => 0.0,
            len => (0..self.n_agents())
                .map(|row| (self.x[(row, len - 1)] - self.z[(row, len - 1)]).abs())
                .fold(0.0, f64::max),
        }
    }
}

/// Fills a [`Trajectory`] one sample at a time.
#[derive(Debug)]
pub struct Recorder {
    trajectory: Trajectory,
    capacity: usize,
    written: usize,
}

impl Recorder {
    /// Allocates storage for `capacity` samples.
    pub fn new(ids: Vec<AgentId>, capacity: usize) -> Self {
        let n = ids.len();
        Self {
            trajectory: Trajectory {
                ids,
                t: vec![0.0; capacity],
                x: DMatrix::zeros(n, capacity),
                z: DMatrix::zeros(n, capacity),
                vartheta: DMatrix::zeros(n, capacity),
                u: DMatrix::zeros(n, capacity),
                dvartheta: DMatrix::zeros(n, capacity),
            },
            capacity,
            written: 0,
        }
    }

    /// Returns the number of rows reserved up front.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of samples written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Writes sample `index`: the state and the auxiliaries evaluated at it.
    pub fn record(&mut self, index: usize, t: f64, state: &SimulationState, aux: &Derivative) -> Result<()> {
        if index >= self.capacity {
            return Err(FtracError::RecorderOverflow {
                index,
                capacity: self.capacity,
            });
        }

        let trajectory = &mut self.trajectory;
        trajectory.t[index] = t;
        for (row, ((x, z), vartheta)) in state.x().iter().zip(state.z()).zip(state.vartheta()).enumerate() {
            trajectory.x[(row, index)] = *x;
            trajectory.z[(row, index)] = *z;
            trajectory.vartheta[(row, index)] = *vartheta;
            trajectory.u[(row, index)] = aux.u[row];
            trajectory.dvartheta[(row, index)] = aux.dvartheta[row];
        }

        self.written = self.written.max(index + 1);
        Ok(())
    }

    /// Hands over the trajectory, truncated to the samples actually written.
    pub fn finish(self) -> Trajectory {
        let mut trajectory = self.trajectory;
        if self.written < self.capacity {
            let written = self.written;
            let cut = |m: DMatrix<f64>| m.columns(0, written).into_owned();
            trajectory.t.truncate(written);
            trajectory.x = cut(trajectory.x);
            trajectory.z = cut(trajectory.z);
            trajectory.vartheta = cut(trajectory.vartheta);
            trajectory.u = cut(trajectory.u);
            trajectory.dvartheta = cut(trajectory.dvartheta);
        }
        trajectory
    }
}
