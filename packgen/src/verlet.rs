//! Verlet-list overlay over a base neighbor provider.

use crate::collisions::sphere_intersection_time;
use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::{mean_diameter, Packing, Particle};

/// Upper bound on the outer/inner diameter ratio any engine drives the
/// packing to; the Verlet spheres are inflated by it so cached lists stay
/// valid while the effective diameters grow.
const MAX_EXPECTED_OUTER_DIAMETER_RATIO: f64 = 1.1;

/// Cached per-particle neighbor lists, refreshed only after a particle has
/// moved by more than half the skin cutoff. This refresh rule is the main
/// performance lever of the whole neighbor stack.
#[derive(Clone, Debug)]
pub struct VerletList<const D: usize, P> {
    base: P,
    /// Particle snapshots taken when each list was built, with diameters
    /// inflated to the Verlet-sphere size.
    verlet_particles: Packing<D>,
    verlet_lists: Vec<Vec<usize>>,
    cutoff: f64,
    explicit_cutoff: Option<f64>,
    moved_particle: usize,
}

impl<const D: usize, P: NeighborProvider<D>> VerletList<D, P> {
    /// Wraps a base provider. The skin cutoff defaults to the mean particle
    /// diameter of the packing given to `set_particles`.
    #[must_use]
    pub fn new(base: P) -> Self {
        Self {
            base,
            verlet_particles: Vec::new(),
            verlet_lists: Vec::new(),
            cutoff: 0.0,
            explicit_cutoff: None,
            moved_particle: usize::MAX,
        }
    }

    /// Wraps a base provider with a fixed skin cutoff.
    #[must_use]
    pub fn with_cutoff(base: P, cutoff: f64) -> Self {
        let mut overlay = Self::new(base);
        overlay.explicit_cutoff = Some(cutoff);
        overlay
    }

    /// Returns the skin cutoff currently in effect.
    #[must_use]
    pub const fn cutoff(&self) -> f64 {
        self.cutoff
    }

    fn in_verlet_sphere(&self, first: usize, second: usize) -> bool {
        // The stored diameters already include the ratio bound and the
        // cutoff, so sphere overlap is a plain normalized-distance test.
        let periodic_box = self.base.periodic_box();
        periodic_box.normalized_distance_squared(
            &self.verlet_particles[first],
            &self.verlet_particles[second],
        ) <= 1.0
    }

    /// Rebuilds one particle's list unconditionally: syncs the stored
    /// snapshot, removes the particle from every current neighbor's list
    /// and refills from the base provider. The event-driven engine calls
    /// this when a particle reaches its Verlet sphere exactly, where the
    /// half-skin displacement test of [`NeighborProvider::end_move`] is
    /// still on its "no refresh" side.
    pub fn rebuild_list(&mut self, packing: &Packing<D>, index: usize) {
        self.base.start_move(&self.verlet_particles, index);
        self.verlet_particles[index].center = packing[index].center;
        self.base.end_move(&self.verlet_particles, index);

        let old_neighbors = std::mem::take(&mut self.verlet_lists[index]);
        for neighbor in old_neighbors {
            let list = &mut self.verlet_lists[neighbor];
            if let Some(position) = list.iter().position(|&n| n == index) {
                list.swap_remove(position);
            }
        }
        self.fill_verlet_list(index);
    }

    fn fill_verlet_list(&mut self, index: usize) {
        let candidates = self
            .base
            .neighbors_of(&self.verlet_particles, index)
            .to_vec();

        for neighbor in candidates {
            if self.in_verlet_sphere(index, neighbor) {
                // Insertion is symmetric regardless of what the base
                // provider returned for the other side.
                if !self.verlet_lists[index].contains(&neighbor) {
                    self.verlet_lists[index].push(neighbor);
                }
                if !self.verlet_lists[neighbor].contains(&index) {
                    self.verlet_lists[neighbor].push(index);
                }
            }
        }
    }
}

impl<const D: usize, P: NeighborProvider<D>> NeighborProvider<D> for VerletList<D, P> {
    fn set_particles(&mut self, packing: &Packing<D>) {
        self.cutoff = self
            .explicit_cutoff
            .unwrap_or_else(|| mean_diameter(packing));

        self.verlet_particles = packing
            .iter()
            .map(|particle| {
                let mut inflated = particle.clone();
                inflated.diameter =
                    particle.diameter * MAX_EXPECTED_OUTER_DIAMETER_RATIO + self.cutoff;
                inflated
            })
            .collect();

        self.base.set_particles(&self.verlet_particles);

        self.verlet_lists = vec![Vec::with_capacity(50); packing.len()];
        for index in 0..packing.len() {
            self.fill_verlet_list(index);
        }
    }

    fn neighbors_of(&mut self, _packing: &Packing<D>, index: usize) -> &[usize] {
        &self.verlet_lists[index]
    }

    fn neighbors_of_point(&mut self, point: &Vector<D>) -> &[usize] {
        self.base.neighbors_of_point(point)
    }

    fn start_move(&mut self, _packing: &Packing<D>, index: usize) {
        self.moved_particle = index;
    }

    fn end_move(&mut self, packing: &Packing<D>, index: usize) {
        debug_assert_eq!(index, self.moved_particle);
        let shift_squared = self
            .base
            .periodic_box()
            .distance_squared(&packing[index].center, &self.verlet_particles[index].center);
        if shift_squared <= 0.25 * self.cutoff * self.cutoff {
            return;
        }
        self.rebuild_list(packing, index);
    }

    fn time_to_update_boundary(
        &self,
        _packing: &Packing<D>,
        index: usize,
        point: &Vector<D>,
        velocity: &Vector<D>,
    ) -> f64 {
        let center = &self.verlet_particles[index].center;
        let image = self.base.periodic_box().closest_periodic_image(center, point);
        sphere_intersection_time(&image, velocity, center, 0.5 * self.cutoff)
    }

    fn periodic_box(&self) -> &PeriodicBox<D> {
        self.base.periodic_box()
    }
}
