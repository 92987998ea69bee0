//! Rattler classification and removal.
//!
//! A rattler is a particle with fewer than `min_neighbors_count` contacting
//! neighbors at a given contraction ratio. Classification is recursive:
//! once a particle is demoted, its contacts lose a neighbor and may become
//! rattlers themselves.

use crate::neighbors::NeighborProvider;
use crate::particle::Packing;

/// Recursive rattler classifier over a neighbor stack.
#[derive(Clone, Debug)]
pub struct RattlerClassifier<const D: usize, P> {
    neighbors: P,
    min_neighbors_count: usize,
}

impl<const D: usize, P: NeighborProvider<D>> RattlerClassifier<D, P> {
    /// Wraps a neighbor provider with the stability contact threshold; 4 is
    /// the isostatic number for infinite friction.
    #[must_use]
    pub fn new(neighbors: P, min_neighbors_count: usize) -> Self {
        Self {
            neighbors,
            min_neighbors_count,
        }
    }

    /// Rebuilds the neighbor stack for a new packing.
    pub fn set_particles(&mut self, packing: &Packing<D>) {
        self.neighbors.set_particles(packing);
    }

    /// Returns the mask of rattlers at the given contraction ratio:
    /// `mask[i]` is `true` iff particle `i` is a rattler.
    #[must_use]
    pub fn rattler_mask(&mut self, packing: &Packing<D>, contraction_ratio: f64) -> Vec<bool> {
        let mut rattler_mask = vec![false; packing.len()];
        let mut processed = vec![false; packing.len()];

        for index in 0..packing.len() {
            if !processed[index] {
                self.classify(packing, contraction_ratio, index, &mut rattler_mask, &mut processed);
            }
        }
        rattler_mask
    }

    /// Returns the number of `false` entries in a rattler mask.
    #[must_use]
    pub fn non_rattler_count(mask: &[bool]) -> usize {
        mask.iter().filter(|&&is_rattler| !is_rattler).count()
    }

    /// Extracts the non-rattler particles with densely renumbered indices.
    #[must_use]
    pub fn non_rattler_packing(packing: &Packing<D>, mask: &[bool]) -> Packing<D> {
        packing
            .iter()
            .zip(mask)
            .filter(|&(_, &is_rattler)| !is_rattler)
            .enumerate()
            .map(|(new_index, (particle, _))| {
                let mut kept = particle.clone();
                kept.index = new_index;
                kept
            })
            .collect()
    }

    fn classify(
        &mut self,
        packing: &Packing<D>,
        contraction_ratio: f64,
        index: usize,
        rattler_mask: &mut Vec<bool>,
        processed: &mut Vec<bool>,
    ) {
        if packing[index].immobile {
            processed[index] = true;
            rattler_mask[index] = false;
            return;
        }
        // Re-examine already-processed non-rattlers: a newly demoted
        // neighbor may have taken their last supporting contact.
        if processed[index] && rattler_mask[index] {
            return;
        }

        let periodic_box = self.neighbors.periodic_box().clone();
        let particle = &packing[index];
        let mut contacts = Vec::new();
        for &neighbor in self.neighbors.neighbors_of(packing, index) {
            if processed[neighbor] && rattler_mask[neighbor] {
                continue;
            }
            let contracted = periodic_box.normalized_distance_squared(particle, &packing[neighbor])
                * contraction_ratio
                * contraction_ratio;
            if contracted < 1.0 {
                contacts.push(neighbor);
            }
        }

        let is_rattler = contacts.len() < self.min_neighbors_count;
        processed[index] = true;
        rattler_mask[index] = is_rattler;

        if is_rattler {
            for neighbor in contacts {
                self.classify(packing, contraction_ratio, neighbor, rattler_mask, processed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_list::CellList;
    use crate::math::{PeriodicBox, Vector};
    use crate::particle::Particle;
    use crate::verlet::VerletList;

    type Classifier = RattlerClassifier<3, VerletList<3, CellList<3>>>;

    fn classifier_over(packing: &Packing<3>) -> Classifier {
        let cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        let mut classifier = RattlerClassifier::new(VerletList::new(cell_list), 1);
        classifier.set_particles(packing);
        classifier
    }

    fn square_packing(diameter: f64) -> Packing<3> {
        vec![
            Particle::new(0, diameter, Vector::from([4.0, 4.0, 5.0])),
            Particle::new(1, diameter, Vector::from([4.0, 5.0, 5.0])),
            Particle::new(2, diameter, Vector::from([5.0, 4.0, 5.0])),
            Particle::new(3, diameter, Vector::from([5.0, 5.0, 5.0])),
        ]
    }

    #[test]
    fn touching_square_has_no_rattlers() {
        let packing = square_packing(1.0);
        let mut classifier = classifier_over(&packing);

        let mask = classifier.rattler_mask(&packing, 0.999);
        assert_eq!(mask, vec![false; 4]);
        assert_eq!(Classifier::non_rattler_count(&mask), 4);
    }

    #[test]
    fn displaced_particle_becomes_a_rattler() {
        let mut packing = square_packing(1.0);
        packing[1].center = Vector::from([7.0, 7.0, 5.0]);
        let mut classifier = classifier_over(&packing);

        let mask = classifier.rattler_mask(&packing, 0.999);
        assert_eq!(mask, vec![false, true, false, false]);

        let kept = Classifier::non_rattler_packing(&packing, &mask);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1].index, 1);
        assert_eq!(kept[1].center, packing[2].center);
    }

    #[test]
    fn shrunken_diameters_make_everything_rattle() {
        let packing = square_packing(0.1);
        let mut classifier = classifier_over(&packing);

        let mask = classifier.rattler_mask(&packing, 0.999);
        assert_eq!(mask, vec![true; 4]);
        assert_eq!(Classifier::non_rattler_count(&mask), 0);
    }

    #[test]
    fn immobile_particles_never_rattle() {
        let mut packing = square_packing(0.1);
        packing[0].immobile = true;
        let mut classifier = classifier_over(&packing);

        let mask = classifier.rattler_mask(&packing, 0.999);
        assert_eq!(mask, vec![false, true, true, true]);
    }
}
