//! Pair-potential sums and force assembly over the neighbor stack.

use crate::math::Vector;
use crate::neighbors::NeighborProvider;
use crate::particle::{Packing, ParticlePair};
use crate::potentials::{PairPotential, PotentialEnum};

/// Result of a multi-ratio contraction-energy pass.
#[derive(Clone, Debug)]
pub struct EnergiesResult {
    /// Total pair energy per contraction ratio, non-rattlers only.
    pub contraction_energies: Vec<f64>,
    /// Number of particles with at least `min_neighbors_count` overlapping
    /// neighbors, per contraction ratio.
    pub non_rattler_counts: Vec<usize>,
    /// Closest pair seen during the pass.
    pub closest_pair: ParticlePair,
}

/// Sums pair potentials and forces over all neighbor pairs.
#[derive(Clone, Debug)]
pub struct EnergyService<const D: usize, P> {
    neighbors: P,
    min_neighbors_count: usize,
    potential_normalizer: f64,
    max_close_neighbors: Option<usize>,
}

impl<const D: usize, P: NeighborProvider<D>> EnergyService<D, P> {
    /// Wraps a neighbor provider.
    #[must_use]
    pub fn new(neighbors: P) -> Self {
        Self {
            neighbors,
            min_neighbors_count: 0,
            potential_normalizer: 1.0,
            max_close_neighbors: None,
        }
    }

    /// Rebuilds the neighbor stack for a new packing.
    pub fn set_particles(&mut self, packing: &Packing<D>) {
        self.neighbors.set_particles(packing);
    }

    /// Starts a move bracket on the underlying stack.
    pub fn start_move(&mut self, packing: &Packing<D>, index: usize) {
        self.neighbors.start_move(packing, index);
    }

    /// Ends a move bracket on the underlying stack.
    pub fn end_move(&mut self, packing: &Packing<D>, index: usize) {
        self.neighbors.end_move(packing, index);
    }

    /// Sets the contact count below which a particle counts as a rattler.
    pub fn set_min_neighbors_count(&mut self, count: usize) {
        self.min_neighbors_count = count;
    }

    /// Scales every energy contribution; the minimization engines need the
    /// sums well above their internal tolerances.
    pub fn set_potential_normalizer(&mut self, normalizer: f64) {
        self.potential_normalizer = normalizer;
    }

    /// Restricts interactions of each particle to its `count` nearest
    /// neighbors by surface-to-surface distance, or lifts the restriction.
    pub fn set_max_close_neighbors(&mut self, count: Option<usize>) {
        self.max_close_neighbors = count;
    }

    /// Returns mutable access to the wrapped neighbor provider.
    pub fn neighbors_mut(&mut self) -> &mut P {
        &mut self.neighbors
    }

    /// Sums `potentials[m]` over all neighbor pairs at center distances
    /// contracted by `ratios[m]`, tracking the closest pair and the
    /// non-rattler count per ratio in the same pass.
    #[must_use]
    pub fn contraction_energies(
        &mut self,
        packing: &Packing<D>,
        ratios: &[f64],
        potentials: &[PotentialEnum],
    ) -> EnergiesResult {
        assert_eq!(ratios.len(), potentials.len());
        let mut result = EnergiesResult {
            contraction_energies: vec![0.0; ratios.len()],
            non_rattler_counts: vec![0; ratios.len()],
            closest_pair: ParticlePair::none(),
        };

        for index in 0..packing.len() {
            let contributing = self.close_neighbors(packing, index);
            self.update_closest_pair(packing, index, &contributing, &mut result.closest_pair);

            for (ratio_index, (&ratio, potential)) in
                ratios.iter().zip(potentials).enumerate()
            {
                let mut energy = 0.0;
                let mut overlap_count = 0;
                let particle = &packing[index];
                for &(neighbor, distance) in &contributing {
                    if let Some(pair_energy) = potential.energy(
                        particle.diameter,
                        packing[neighbor].diameter,
                        distance * ratio,
                    ) {
                        energy += self.potential_normalizer * pair_energy;
                        overlap_count += 1;
                    }
                }
                if overlap_count >= self.min_neighbors_count {
                    result.contraction_energies[ratio_index] += energy;
                    result.non_rattler_counts[ratio_index] += 1;
                }
            }
        }
        result
    }

    /// Computes the net force on every particle at center distances
    /// contracted by `ratio`, and returns the closest pair of the pass.
    pub fn fill_forces(
        &mut self,
        packing: &Packing<D>,
        ratio: f64,
        potential: &PotentialEnum,
        forces: &mut Vec<Vector<D>>,
    ) -> ParticlePair {
        forces.clear();
        forces.resize(packing.len(), Vector::zeros());
        let mut closest_pair = ParticlePair::none();
        let periodic_box = self.neighbors.periodic_box().clone();

        for index in 0..packing.len() {
            let contributing = self.close_neighbors(packing, index);
            self.update_closest_pair(packing, index, &contributing, &mut closest_pair);

            let particle = &packing[index];
            let mut force = Vector::zeros();
            for &(neighbor, distance) in &contributing {
                let Some(magnitude) = potential.repulsion_force(
                    particle.diameter,
                    packing[neighbor].diameter,
                    distance * ratio,
                ) else {
                    continue;
                };
                // The difference points from the particle to the neighbor;
                // a positive repulsion pushes the other way.
                let difference =
                    periodic_box.distance(&packing[neighbor].center, &particle.center);
                force += difference * (-magnitude / distance);
            }
            forces[index] = force;
        }
        closest_pair
    }

    /// Returns `(neighbor, center distance)` for the neighbors that may
    /// contribute, truncated to the configured closest ones.
    fn close_neighbors(&mut self, packing: &Packing<D>, index: usize) -> Vec<(usize, f64)> {
        let particle = &packing[index];
        let periodic_box = self.neighbors.periodic_box().clone();
        let mut result: Vec<(usize, f64)> = self
            .neighbors
            .neighbors_of(packing, index)
            .iter()
            .map(|&neighbor| {
                let distance = periodic_box
                    .distance_squared(&particle.center, &packing[neighbor].center)
                    .sqrt();
                (neighbor, distance)
            })
            .collect();

        if let Some(count) = self.max_close_neighbors {
            if count < result.len() {
                // Distances to neighbor surfaces, not normalized distances:
                // small and large particles are treated equally, which
                // drives the minimizers towards isostaticity early.
                result.select_nth_unstable_by(count - 1, |a, b| {
                    let surface_a = a.1 - 0.5 * packing[a.0].diameter;
                    let surface_b = b.1 - 0.5 * packing[b.0].diameter;
                    surface_a.total_cmp(&surface_b)
                });
                result.truncate(count);
            }
        }
        result
    }

    fn update_closest_pair(
        &self,
        packing: &Packing<D>,
        index: usize,
        contributing: &[(usize, f64)],
        closest_pair: &mut ParticlePair,
    ) {
        let particle = &packing[index];
        for &(neighbor, distance) in contributing {
            let ratio = 2.0 * distance / (particle.diameter + packing[neighbor].diameter);
            let ratio_squared = ratio * ratio;
            if ratio_squared < closest_pair.normalized_distance_squared {
                *closest_pair = ParticlePair::new(index, neighbor, ratio_squared);
            }
        }
    }
}
