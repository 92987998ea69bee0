//! Distance queries over the neighbor stack without the closest-pair queue.

use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::{Packing, ParticlePair};

/// Closest-pair and point queries backed by a plain neighbor scan. The
/// Monte Carlo engine uses this instead of [`crate::closest_pair`] because
/// it probes candidate positions that are not yet part of the packing.
#[derive(Clone, Debug)]
pub struct DistanceService<const D: usize, P> {
    neighbors: P,
}

impl<const D: usize, P: NeighborProvider<D>> DistanceService<D, P> {
    /// Wraps a neighbor provider.
    #[must_use]
    pub fn new(neighbors: P) -> Self {
        Self { neighbors }
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

    /// Returns the periodic box of the wrapped provider.
    #[must_use]
    pub fn periodic_box(&self) -> &PeriodicBox<D> {
        self.neighbors.periodic_box()
    }

    /// Returns mutable access to the wrapped neighbor provider.
    pub fn neighbors_mut(&mut self) -> &mut P {
        &mut self.neighbors
    }

    /// Scans every particle's neighborhood for the globally closest pair.
    #[must_use]
    pub fn find_closest_pair(&mut self, packing: &Packing<D>) -> ParticlePair {
        let periodic_box = self.neighbors.periodic_box().clone();
        let mut closest = ParticlePair::none();
        for particle in packing {
            for &neighbor in self.neighbors.neighbors_of(packing, particle.index) {
                let distance_squared =
                    periodic_box.normalized_distance_squared(particle, &packing[neighbor]);
                if distance_squared < closest.normalized_distance_squared {
                    closest = ParticlePair::new(particle.index, neighbor, distance_squared);
                }
            }
        }
        closest
    }

    /// Returns the particle closest to a probe sphere of diameter
    /// `diameter` at `point`, skipping `index_to_exclude`, together with
    /// the squared normalized distance.
    #[must_use]
    pub fn closest_neighbor_of_point(
        &mut self,
        packing: &Packing<D>,
        point: &Vector<D>,
        index_to_exclude: usize,
        diameter: f64,
    ) -> (usize, f64) {
        let periodic_box = self.neighbors.periodic_box().clone();
        let mut best = (ParticlePair::NONE, f64::INFINITY);
        for &neighbor in self.neighbors.neighbors_of_point(point) {
            if neighbor == index_to_exclude {
                continue;
            }
            let other = &packing[neighbor];
            let diameter_sum = diameter + other.diameter;
            let distance_squared = periodic_box.distance_squared(point, &other.center) * 4.0
                / (diameter_sum * diameter_sum);
            if distance_squared < best.1 {
                best = (neighbor, distance_squared);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_list::CellList;
    use crate::particle::Particle;
    use crate::verlet::VerletList;
    use float_cmp::assert_approx_eq;

    #[test]
    fn scan_and_point_queries_agree() {
        let packing: Packing<3> = vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([6.0, 5.0, 5.0])),
            Particle::new(2, 1.0, Vector::from([5.0, 8.0, 5.0])),
            Particle::new(3, 1.0, Vector::from([5.5, 8.0, 5.0])),
        ];
        let cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        let mut service = DistanceService::new(VerletList::new(cell_list));
        service.set_particles(&packing);

        let pair = service.find_closest_pair(&packing);
        let (first, second) = (pair.first.min(pair.second), pair.first.max(pair.second));
        assert_eq!((first, second), (2, 3));
        assert_approx_eq!(f64, pair.normalized_distance_squared, 0.25, epsilon = 1e-10);

        let (neighbor, distance_squared) = service.closest_neighbor_of_point(
            &packing,
            &Vector::from([5.0, 7.5, 5.0]),
            2,
            1.0,
        );
        assert_eq!(neighbor, 3);
        assert_approx_eq!(f64, distance_squared, 0.5, epsilon = 1e-10);
    }
}
