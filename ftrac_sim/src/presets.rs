//! Canonical topologies used by the scenarios.
//!
//! State values are in natural units; the hardware logs multiply them by
//! 1000 (see [`crate::exporter::HARDWARE_SCALE`]).

use ftrac_core::{AgentSpec, FtracError, SeedStream, Topology};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Uniform};

/// Directed ring `1 -> 2 -> ... -> n -> 1` (agent `i` listens to `i + 1`).
pub fn ring(x0: &[f64], z0: &[f64]) -> ftrac_core::Result<Topology> {
    if x0.len() != z0.len() {
        return Err(FtracError::parameters(format!(
            "ring needs one z0 per x0, got {} and {}",
            x0.len(),
            z0.len()
        )));
    }
    let n = x0.len() as u32;
    if n < 2 {
        return Err(FtracError::topology("a ring needs at least two agents"));
    }

    Topology::new(
        x0.iter()
            .zip(z0)
            .enumerate()
            .map(|(i, (x, z))| {
                let id = i as u32 + 1;
                (id, AgentSpec::new(*x, *z, [id % n + 1]))
            }),
    )
}

/// Nine agents on a single directed cycle given as a permutation.
///
/// Agent `i` starts at `x0 = i` with a common reference `z0 = 5`.
pub fn permutation_cycle_nine() -> ftrac_core::Result<Topology> {
    const NEXT: [(u32, u32); 9] = [(1, 4), (2, 5), (3, 8), (4, 7), (5, 9), (6, 2), (7, 3), (8, 6), (9, 1)];

    Topology::new(
        NEXT.iter()
            .map(|&(id, next)| (id, AgentSpec::new(id as f64, 5.0, [next]))),
    )
}

/// Neighbor lists of the nine-node cluster graph (undirected, stored both ways).
pub const CLUSTER_NINE: [(u32, &[u32]); 9] = [
    (1, &[4, 6, 7]),
    (2, &[5, 8]),
    (3, &[6, 9]),
    (4, &[1, 7]),
    (5, &[2, 8]),
    (6, &[1, 3, 8, 9]),
    (7, &[1, 4]),
    (8, &[2, 5, 6]),
    (9, &[3, 6]),
];

/// Nine-node cluster graph with `x0`, `z0` drawn from `U(-2, 2)`.
pub fn cluster_nine(seed: u64) -> ftrac_core::Result<Topology> {
    let mut rng = ChaCha8Rng::seed_from_u64(SeedStream::InitialConditions.derive(seed));
    let initial = Uniform::new(-2.0, 2.0);

    let draws: Vec<(f64, f64)> = (0..CLUSTER_NINE.len())
        .map(|_| (initial.sample(&mut rng), initial.sample(&mut rng)))
        .collect();

    Topology::new(
        CLUSTER_NINE
            .iter()
            .zip(draws)
            .map(|((id, neighbors), (x0, z0))| (*id, AgentSpec::new(x0, z0, neighbors.iter().copied()))),
    )
}
