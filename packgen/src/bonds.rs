//! The bond network of the closest-jamming engine.
//!
//! A bond is an unordered particle pair held at (near-)contact. The set is
//! stored three ways at once: a flat bond list, per-particle bond indices,
//! and per-particle bond pairs (two bonds sharing a particle, the
//! off-diagonal entries of the jamming linear system). All three stay
//! consistent under incremental adds and swap-removes.

use crate::math::PeriodicBox;
use crate::neighbors::NeighborProvider;
use crate::particle::{Packing, ParticlePair};

/// Two bonds sharing a common particle.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BondPair {
    /// Lower bond index of the pair.
    pub first_bond: usize,
    /// Higher bond index of the pair.
    pub second_bond: usize,
    /// The particle both bonds touch.
    pub common_particle: usize,
    /// Partner of the common particle in the first inserted bond.
    pub first_neighbor: usize,
    /// Partner of the common particle in the other bond.
    pub second_neighbor: usize,
}

/// Outcome of one bond-update pass.
#[derive(Clone, Debug, Default)]
pub struct BondStatistics {
    /// Bonds created during the pass.
    pub added_bonds: Vec<ParticlePair>,
    /// Bonds removed during the pass (only when removal was requested).
    pub removed_bonds: Vec<ParticlePair>,
    /// Number of bonded pairs that drifted to a gap.
    pub gaps_count: usize,
    /// Mean normalized gap length over those pairs.
    pub mean_gap_length: f64,
    /// Number of bonded pairs that drifted into overlap.
    pub intersections_count: usize,
    /// Mean normalized overlap depth over those pairs.
    pub mean_intersection_length: f64,
}

/// The bond set with incremental indices.
#[derive(Clone, Debug)]
pub struct BondSet {
    bonds: Vec<ParticlePair>,
    bond_indexes_per_particle: Vec<Vec<usize>>,
    bond_pairs_per_particle: Vec<Vec<BondPair>>,
    bond_pairs_count: usize,
    threshold: f64,
}

impl BondSet {
    /// Creates an empty bond set with the default tolerance band.
    #[must_use]
    pub fn new(particle_count: usize) -> Self {
        Self {
            bonds: Vec::new(),
            bond_indexes_per_particle: vec![Vec::new(); particle_count],
            bond_pairs_per_particle: vec![Vec::new(); particle_count],
            bond_pairs_count: 0,
            threshold: 1e-10,
        }
    }

    /// Clears all bonds, keeping the particle count.
    pub fn reset(&mut self, particle_count: usize) {
        self.bonds.clear();
        self.bond_indexes_per_particle = vec![Vec::new(); particle_count];
        self.bond_pairs_per_particle = vec![Vec::new(); particle_count];
        self.bond_pairs_count = 0;
    }

    /// Returns the tolerance band width β.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Sets the tolerance band width β.
    pub fn set_threshold(&mut self, threshold: f64) {
        self.threshold = threshold;
    }

    /// Returns the flat bond list.
    #[must_use]
    pub fn bonds(&self) -> &[ParticlePair] {
        &self.bonds
    }

    /// Returns the bond indices touching each particle.
    #[must_use]
    pub fn bond_indexes_per_particle(&self) -> &[Vec<usize>] {
        &self.bond_indexes_per_particle
    }

    /// Returns the bond pairs sharing each particle.
    #[must_use]
    pub fn bond_pairs_per_particle(&self) -> &[Vec<BondPair>] {
        &self.bond_pairs_per_particle
    }

    /// Returns the total number of bond pairs.
    #[must_use]
    pub const fn bond_pairs_count(&self) -> usize {
        self.bond_pairs_count
    }

    /// Returns `true` if the two particles share a bond.
    #[must_use]
    pub fn particles_share_bond(&self, first: usize, second: usize) -> bool {
        self.bond_index(&ordered_pair(first, second)).is_some()
    }

    /// Sweeps all neighbor pairs: pairs with normalized distance inside
    /// `[r_inner, r_inner (1 + β)]` become bonds, bonded pairs outside the
    /// band are reported as gaps (and removed when `remove_broken_bonds`).
    pub fn update_bonds<const D: usize, P: NeighborProvider<D>>(
        &mut self,
        neighbors: &mut P,
        periodic_box: &PeriodicBox<D>,
        packing: &Packing<D>,
        inner_diameter_ratio: f64,
        remove_broken_bonds: bool,
    ) -> BondStatistics {
        let mut statistics = BondStatistics::default();

        for particle in packing {
            let neighbor_indexes = neighbors.neighbors_of(packing, particle.index).to_vec();
            for neighbor in neighbor_indexes {
                let normalized_distance =
                    periodic_box.normalized_distance(particle, &packing[neighbor]);
                let bond = ordered_pair(particle.index, neighbor);

                if normalized_distance < inner_diameter_ratio * (1.0 + self.threshold) {
                    if self.bond_index(&bond).is_none() {
                        statistics.added_bonds.push(bond);
                        self.add_bond(bond);
                    }
                    if normalized_distance < inner_diameter_ratio {
                        statistics.intersections_count += 1;
                        statistics.mean_intersection_length +=
                            inner_diameter_ratio - normalized_distance;
                    }
                } else if let Some(bond_index) = self.bond_index(&bond) {
                    statistics.gaps_count += 1;
                    statistics.mean_gap_length += normalized_distance - inner_diameter_ratio;
                    if remove_broken_bonds {
                        statistics.removed_bonds.push(bond);
                        self.remove_bond(bond_index);
                    }
                }
            }
        }

        // Every pair was visited from both ends.
        if statistics.gaps_count > 0 {
            statistics.mean_gap_length /= statistics.gaps_count as f64;
            statistics.gaps_count /= 2;
        }
        if statistics.intersections_count > 0 {
            statistics.mean_intersection_length /= statistics.intersections_count as f64;
            statistics.intersections_count /= 2;
        }
        statistics
    }

    fn add_bond(&mut self, bond: ParticlePair) {
        let bond_index = self.bonds.len();
        self.bonds.push(bond);

        self.add_bond_pairs(&bond, bond_index, bond.first, bond.second);
        self.add_bond_pairs(&bond, bond_index, bond.second, bond.first);

        self.bond_indexes_per_particle[bond.first].push(bond_index);
        self.bond_indexes_per_particle[bond.second].push(bond_index);
    }

    fn add_bond_pairs(
        &mut self,
        _bond: &ParticlePair,
        bond_index: usize,
        common_particle: usize,
        other_particle: usize,
    ) {
        let existing: Vec<usize> = self.bond_indexes_per_particle[common_particle].clone();
        for other_bond_index in existing {
            let other_bond = self.bonds[other_bond_index];
            let (first_bond, second_bond) = if bond_index < other_bond_index {
                (bond_index, other_bond_index)
            } else {
                (other_bond_index, bond_index)
            };
            self.bond_pairs_per_particle[common_particle].push(BondPair {
                first_bond,
                second_bond,
                common_particle,
                first_neighbor: other_particle,
                second_neighbor: other_bond.other(common_particle),
            });
            self.bond_pairs_count += 1;
        }
    }

    fn remove_bond(&mut self, bond_index: usize) {
        let bond = self.bonds[bond_index];
        self.remove_bond_from_particle(bond.first, bond_index);
        self.remove_bond_from_particle(bond.second, bond_index);

        self.bonds.swap_remove(bond_index);

        // The former last bond now sits at `bond_index`; patch every index
        // that still names its old slot.
        let old_moved_index = self.bonds.len();
        if old_moved_index == 0 || old_moved_index == bond_index {
            return;
        }
        let moved_bond = self.bonds[bond_index];
        self.rename_bond_index(moved_bond.first, old_moved_index, bond_index);
        self.rename_bond_index(moved_bond.second, old_moved_index, bond_index);
    }

    fn remove_bond_from_particle(&mut self, particle: usize, bond_index: usize) {
        let indexes = &mut self.bond_indexes_per_particle[particle];
        let position = indexes
            .iter()
            .position(|&b| b == bond_index)
            .expect("bond not registered at its endpoint");
        indexes.swap_remove(position);

        let pairs = &mut self.bond_pairs_per_particle[particle];
        let mut i = 0;
        while i < pairs.len() {
            if pairs[i].first_bond == bond_index || pairs[i].second_bond == bond_index {
                pairs.swap_remove(i);
                self.bond_pairs_count -= 1;
            } else {
                i += 1;
            }
        }
    }

    fn rename_bond_index(&mut self, particle: usize, old_index: usize, new_index: usize) {
        for bond in &mut self.bond_indexes_per_particle[particle] {
            if *bond == old_index {
                *bond = new_index;
            }
        }
        for pair in &mut self.bond_pairs_per_particle[particle] {
            if pair.first_bond == old_index {
                pair.first_bond = new_index;
            } else if pair.second_bond == old_index {
                pair.second_bond = new_index;
            }
            if pair.first_bond > pair.second_bond {
                std::mem::swap(&mut pair.first_bond, &mut pair.second_bond);
            }
        }
    }

    /// Bonds per particle stay in the single digits even at jamming, so a
    /// linear probe beats any keyed container here.
    fn bond_index(&self, bond: &ParticlePair) -> Option<usize> {
        self.bond_indexes_per_particle[bond.first]
            .iter()
            .copied()
            .find(|&bond_index| {
                let existing = self.bonds[bond_index];
                existing.first == bond.first && existing.second == bond.second
            })
    }
}

fn ordered_pair(first: usize, second: usize) -> ParticlePair {
    ParticlePair::new(first.min(second), first.max(second), 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add(bond_set: &mut BondSet, first: usize, second: usize) {
        bond_set.add_bond(ordered_pair(first, second));
    }

    fn assert_consistent(bond_set: &BondSet) {
        // Every bond is referenced exactly twice in the per-particle lists.
        let mut references = vec![0_usize; bond_set.bonds().len()];
        for indexes in bond_set.bond_indexes_per_particle() {
            for &bond_index in indexes {
                references[bond_index] += 1;
            }
        }
        assert!(references.iter().all(|&count| count == 2));

        // Bond-pair entries agree with the flat list.
        let mut pair_count = 0;
        for pairs in bond_set.bond_pairs_per_particle() {
            for pair in pairs {
                pair_count += 1;
                assert!(pair.first_bond < pair.second_bond);
                let first = bond_set.bonds()[pair.first_bond];
                let second = bond_set.bonds()[pair.second_bond];
                assert!(first.first == pair.common_particle || first.second == pair.common_particle);
                assert!(second.first == pair.common_particle || second.second == pair.common_particle);
            }
        }
        assert_eq!(pair_count, bond_set.bond_pairs_count());
    }

    #[test]
    fn chain_produces_one_bond_pair_per_inner_particle() {
        let mut bond_set = BondSet::new(4);
        add(&mut bond_set, 0, 1);
        add(&mut bond_set, 1, 2);
        add(&mut bond_set, 2, 3);

        assert_eq!(bond_set.bonds().len(), 3);
        assert_eq!(bond_set.bond_pairs_count(), 2);
        assert!(bond_set.particles_share_bond(0, 1));
        assert!(bond_set.particles_share_bond(2, 1));
        assert!(!bond_set.particles_share_bond(0, 2));
        assert_consistent(&bond_set);
    }

    #[test]
    fn triangle_produces_three_bond_pairs() {
        let mut bond_set = BondSet::new(3);
        add(&mut bond_set, 0, 1);
        add(&mut bond_set, 1, 2);
        add(&mut bond_set, 0, 2);

        assert_eq!(bond_set.bond_pairs_count(), 3);
        assert_consistent(&bond_set);
    }

    #[test]
    fn removal_patches_swapped_indices() {
        let mut bond_set = BondSet::new(5);
        add(&mut bond_set, 0, 1); // bond 0
        add(&mut bond_set, 1, 2); // bond 1
        add(&mut bond_set, 2, 3); // bond 2
        add(&mut bond_set, 3, 4); // bond 3
        assert_consistent(&bond_set);

        // Removing bond 1 moves bond 3 into its slot.
        bond_set.remove_bond(1);
        assert_eq!(bond_set.bonds().len(), 3);
        assert!(!bond_set.particles_share_bond(1, 2));
        assert!(bond_set.particles_share_bond(3, 4));
        assert!(bond_set.particles_share_bond(0, 1));
        assert!(bond_set.particles_share_bond(2, 3));
        assert_consistent(&bond_set);

        bond_set.remove_bond(0);
        assert!(!bond_set.particles_share_bond(0, 1));
        assert_consistent(&bond_set);
    }
}
