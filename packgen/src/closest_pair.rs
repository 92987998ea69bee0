//! Closest-pair tracking: per-particle nearest-neighbor cache plus an
//! ordered queue over particles.

use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::{Packing, ParticlePair};
use crate::priority_queue::IndexedPriorityQueue;

/// Nearest neighbor of one particle.
#[derive(Clone, Copy, Debug)]
struct ClosestNeighbor {
    index: usize,
    distance_squared: f64,
}

impl ClosestNeighbor {
    const NONE: Self = Self {
        index: ParticlePair::NONE,
        distance_squared: f64::INFINITY,
    };
}

/// Maintains, for every particle, its nearest neighbor under the normalized
/// distance, and a queue over particles keyed by that distance. The queue
/// top is the globally closest pair; a move costs O(deg log N).
#[derive(Clone, Debug)]
pub struct ClosestPairTracker<const D: usize, P> {
    neighbors: P,
    entries: Vec<ClosestNeighbor>,
    queue: IndexedPriorityQueue,
    moved_particle: usize,
}

impl<const D: usize, P: NeighborProvider<D>> ClosestPairTracker<D, P> {
    /// Wraps a neighbor provider; call
    /// [`ClosestPairTracker::set_particles`] before querying.
    #[must_use]
    pub fn new(neighbors: P) -> Self {
        Self {
            neighbors,
            entries: Vec::new(),
            queue: IndexedPriorityQueue::new(Vec::new()),
            moved_particle: usize::MAX,
        }
    }

    /// Rebuilds the cache and the queue for a new packing.
    pub fn set_particles(&mut self, packing: &Packing<D>) {
        self.neighbors.set_particles(packing);

        self.entries = vec![ClosestNeighbor::NONE; packing.len()];
        for index in 0..packing.len() {
            self.entries[index] = self.closest_neighbor_of(packing, index, ParticlePair::NONE);
        }
        self.queue =
            IndexedPriorityQueue::new(self.entries.iter().map(|e| e.distance_squared).collect());
    }

    /// Returns the globally closest pair.
    #[must_use]
    pub fn find_closest_pair(&self) -> ParticlePair {
        let first = self.queue.top();
        let entry = self.entries[first];
        ParticlePair::new(first, entry.index, entry.distance_squared)
    }

    /// Returns the nearest neighbor of one particle.
    #[must_use]
    pub fn find_closest_neighbor(&self, index: usize) -> ParticlePair {
        let entry = self.entries[index];
        ParticlePair::new(index, entry.index, entry.distance_squared)
    }

    /// Starts a move bracket: every neighbor whose closest neighbor is the
    /// mover recomputes its entry without the mover.
    pub fn start_move(&mut self, packing: &Packing<D>, index: usize) {
        self.moved_particle = index;

        let neighbor_indexes = self.neighbors.neighbors_of(packing, index).to_vec();
        for neighbor in neighbor_indexes {
            if self.entries[neighbor].index == index {
                let entry = self.closest_neighbor_of(packing, neighbor, index);
                self.entries[neighbor] = entry;
                self.queue.update_key(neighbor, entry.distance_squared);
            }
        }
        self.queue.update_key(index, f64::INFINITY);

        // The inner provider moves last so the queries above still see the
        // old neighborhood.
        self.neighbors.start_move(packing, index);
    }

    /// Ends the move bracket: the mover gets a fresh entry and offers
    /// itself as closest neighbor to everyone around it.
    pub fn end_move(&mut self, packing: &Packing<D>, index: usize) {
        debug_assert_eq!(index, self.moved_particle);
        // The inner provider moves first so the queries below see the new
        // neighborhood.
        self.neighbors.end_move(packing, index);

        let particle = &packing[index];
        let periodic_box = self.neighbors.periodic_box().clone();

        let mut own_entry = ClosestNeighbor::NONE;
        let neighbor_indexes = self.neighbors.neighbors_of(packing, index).to_vec();
        for neighbor in neighbor_indexes {
            let distance_squared =
                periodic_box.normalized_distance_squared(particle, &packing[neighbor]);

            if distance_squared < own_entry.distance_squared {
                own_entry = ClosestNeighbor {
                    index: neighbor,
                    distance_squared,
                };
            }
            if distance_squared < self.entries[neighbor].distance_squared {
                self.entries[neighbor] = ClosestNeighbor {
                    index,
                    distance_squared,
                };
                self.queue.update_key(neighbor, distance_squared);
            }
        }

        self.entries[index] = own_entry;
        self.queue.update_key(index, own_entry.distance_squared);
    }

    /// Gives mutable access to the wrapped neighbor provider. The step
    /// engines use the same stack for bond updates and event searches.
    pub fn neighbors_mut(&mut self) -> &mut P {
        &mut self.neighbors
    }

    /// Returns the periodic box of the wrapped provider.
    #[must_use]
    pub fn periodic_box(&self) -> &PeriodicBox<D> {
        self.neighbors.periodic_box()
    }

    fn closest_neighbor_of(
        &mut self,
        packing: &Packing<D>,
        index: usize,
        index_to_exclude: usize,
    ) -> ClosestNeighbor {
        let particle = &packing[index];
        let periodic_box = self.neighbors.periodic_box().clone();

        let mut best = ClosestNeighbor::NONE;
        for &neighbor in self.neighbors.neighbors_of(packing, index) {
            if neighbor == index_to_exclude {
                continue;
            }
            let distance_squared =
                periodic_box.normalized_distance_squared(particle, &packing[neighbor]);
            if distance_squared < best.distance_squared {
                best = ClosestNeighbor {
                    index: neighbor,
                    distance_squared,
                };
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

    type Tracker = ClosestPairTracker<3, VerletList<3, CellList<3>>>;

    fn tracker_over(packing: &Packing<3>) -> Tracker {
        let cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        let mut tracker = ClosestPairTracker::new(VerletList::new(cell_list));
        tracker.set_particles(packing);
        tracker
    }

    fn packing_of(centers: &[[f64; 3]]) -> Packing<3> {
        centers
            .iter()
            .enumerate()
            .map(|(index, &center)| Particle::new(index, 1.0, Vector::from(center)))
            .collect()
    }

    fn normalize(pair: ParticlePair) -> (usize, usize) {
        (pair.first.min(pair.second), pair.first.max(pair.second))
    }

    #[test]
    fn selects_the_closest_pair() {
        let packing = packing_of(&[
            [5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0],
            [5.0, 8.0, 5.0],
            [5.5, 8.0, 5.0],
        ]);
        let tracker = tracker_over(&packing);

        let pair = tracker.find_closest_pair();
        assert_eq!(normalize(pair), (2, 3));
        assert_approx_eq!(f64, pair.normalized_distance_squared, 0.25, epsilon = 1e-5);
    }

    #[test]
    fn selects_the_closest_pair_across_the_boundary() {
        let packing = packing_of(&[
            [5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0],
            [0.0, 8.0, 5.0],
            [9.5, 8.0, 5.0],
        ]);
        let tracker = tracker_over(&packing);

        let pair = tracker.find_closest_pair();
        assert_eq!(normalize(pair), (2, 3));
        assert_approx_eq!(f64, pair.normalized_distance_squared, 0.25, epsilon = 1e-5);
    }

    #[test]
    fn queue_follows_particle_moves() {
        let mut packing = packing_of(&[
            [5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0],
            [5.0, 8.0, 5.0],
            [5.5, 8.0, 5.0],
        ]);
        let mut tracker = tracker_over(&packing);

        // Pull particle 3 away; the closest pair becomes (0, 1).
        tracker.start_move(&packing, 3);
        packing[3].center = Vector::from([2.0, 2.0, 2.0]);
        tracker.end_move(&packing, 3);

        let pair = tracker.find_closest_pair();
        assert_eq!(normalize(pair), (0, 1));
        assert_approx_eq!(f64, pair.normalized_distance_squared, 1.0, epsilon = 1e-5);

        // Push particle 3 right next to particle 0.
        tracker.start_move(&packing, 3);
        packing[3].center = Vector::from([5.0, 5.0, 5.4]);
        tracker.end_move(&packing, 3);

        let pair = tracker.find_closest_pair();
        assert_eq!(normalize(pair), (0, 3));
        assert_approx_eq!(f64, pair.normalized_distance_squared, 0.16, epsilon = 1e-5);
    }

    #[test]
    fn empty_move_bracket_changes_nothing() {
        let packing = packing_of(&[
            [5.0, 5.0, 5.0],
            [6.0, 5.0, 5.0],
            [5.0, 8.0, 5.0],
            [5.5, 8.0, 5.0],
        ]);
        let mut tracker = tracker_over(&packing);
        let before = tracker.find_closest_pair();

        tracker.start_move(&packing, 2);
        tracker.end_move(&packing, 2);

        let after = tracker.find_closest_pair();
        assert_eq!(normalize(before), normalize(after));
        assert_approx_eq!(
            f64,
            before.normalized_distance_squared,
            after.normalized_distance_squared,
            ulps = 2
        );
    }

    #[test]
    fn matches_an_exhaustive_scan() {
        // Deterministic scattered packing.
        let mut centers = Vec::new();
        for i in 0..20_usize {
            let x = (i * 7 % 19) as f64 * 0.5 + 0.31;
            let y = (i * 5 % 17) as f64 * 0.55 + 0.67;
            let z = (i * 11 % 13) as f64 * 0.7 + 0.13;
            centers.push([x, y, z]);
        }
        let packing = packing_of(&centers);
        let tracker = tracker_over(&packing);

        let periodic_box = PeriodicBox::new([10.0; 3]);
        let mut best = f64::INFINITY;
        for i in 0..packing.len() {
            for j in i + 1..packing.len() {
                best = best
                    .min(periodic_box.normalized_distance_squared(&packing[i], &packing[j]));
            }
        }

        let pair = tracker.find_closest_pair();
        assert_approx_eq!(f64, pair.normalized_distance_squared, best, epsilon = 1e-10);
    }
}
