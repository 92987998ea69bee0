//! Diameter growth along the bond network towards the closest jammed
//! state.
//!
//! The inner diameter ratio doubles as the integration time. Each step
//! solves a sparse linear system for Lagrange multipliers that keep every
//! bond at exact contact while the diameters grow, integrates the
//! resulting rigid-motion velocities with a fixed-step RK4, and refreshes
//! the bond network.

use crate::bonds::{BondSet, BondStatistics};
use crate::cell_list::CellList;
use crate::closest_pair::ClosestPairTracker;
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::ls::collision_service::GrowingCollisions;
use crate::ls::events::MovingParticle;
use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::Packing;
use crate::sparse::{ConjugateGradientSolver, SparseSpdSolver, SparseSymMatrix};
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use ndarray::Array1;
use rand_pcg::Pcg64;
use tracing::{debug, warn};

/// Below this integration step the diameters no longer grow in double
/// precision (final diameters are of order one).
const MIN_INTEGRATION_TIME_STEP: f64 = 2e-14;

/// Bond-strength correction never exceeds this factor.
const MAX_STABILIZATION_FACTOR: f64 = 2.0;

type Tracker<const D: usize> = ClosestPairTracker<D, VerletList<D, CellList<D>>>;

/// The closest-jamming step engine.
pub struct ClosestJammingStep<const D: usize> {
    base: BaseStep<D>,
    tracker: Tracker<D>,
    bonds: BondSet,
    solver: ConjugateGradientSolver,
    velocities: Vec<Vector<D>>,
    integration_time_step: f64,
    max_time_step: Option<f64>,
    particle_count: usize,
    bonds_count_at_step_update: usize,
}

impl<const D: usize> ClosestJammingStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let tracker = ClosestPairTracker::new(VerletList::new(CellList::new(periodic_box.clone())));
        Self {
            base: BaseStep::new(periodic_box, generation, false, true),
            tracker,
            bonds: BondSet::new(0),
            solver: ConjugateGradientSolver::default(),
            velocities: Vec::new(),
            integration_time_step: 1e-9,
            max_time_step: None,
            particle_count: 0,
            bonds_count_at_step_update: 0,
        }
    }

    /// Returns the bond tolerance band β.
    #[must_use]
    pub const fn bond_threshold(&self) -> f64 {
        self.bonds.threshold()
    }

    /// Sets the bond tolerance band β.
    pub fn set_bond_threshold(&mut self, threshold: f64) {
        self.bonds.set_threshold(threshold);
    }

    /// Sets the RK4 step width in inner-ratio units.
    pub fn set_integration_time_step(&mut self, step: f64) {
        self.integration_time_step = step;
    }

    /// Caps how far the inner ratio may advance per displacement.
    pub fn set_max_time_step(&mut self, cap: Option<f64>) {
        self.max_time_step = cap;
    }

    /// Solves the bond system for Lagrange multipliers and assembles the
    /// particle velocities at the given coordinates and inner ratio.
    fn bond_velocities(
        &self,
        packing: &Packing<D>,
        coordinates: &[Vector<D>],
        inner_ratio: f64,
    ) -> Result<Vec<Vector<D>>> {
        let mut velocities = vec![Vector::zeros(); coordinates.len()];
        let bond_count = self.bonds.bonds().len();
        if bond_count == 0 {
            return Ok(velocities);
        }
        let periodic_box = &self.base.periodic_box;

        let mut triplets =
            Vec::with_capacity(bond_count + 2 * self.bonds.bond_pairs_count());
        let mut rhs = Array1::zeros(bond_count);
        for (bond_index, bond) in self.bonds.bonds().iter().enumerate() {
            let half_sum =
                0.5 * (packing[bond.first].diameter + packing[bond.second].diameter);
            // The expected distance (not the actual, possibly slightly
            // broken one) keeps the system stable against bonds opened by
            // roundoff.
            let expected = half_sum * inner_ratio;
            triplets.push((bond_index, bond_index, 2.0 * expected * expected));
            rhs[bond_index] = 2.0 * half_sum * half_sum * inner_ratio;
        }

        for pairs in self.bonds.bond_pairs_per_particle() {
            for pair in pairs {
                let common = &coordinates[pair.common_particle];
                let to_first = periodic_box
                    .distance(&coordinates[pair.first_neighbor], common)
                    .normalize();
                let to_second = periodic_box
                    .distance(&coordinates[pair.second_neighbor], common)
                    .normalize();

                let first_bond = self.bonds.bonds()[pair.first_bond];
                let second_bond = self.bonds.bonds()[pair.second_bond];
                let first_distance = 0.5
                    * (packing[first_bond.first].diameter + packing[first_bond.second].diameter)
                    * inner_ratio;
                let second_distance = 0.5
                    * (packing[second_bond.first].diameter
                        + packing[second_bond.second].diameter)
                    * inner_ratio;

                let value = first_distance * second_distance * to_first.dot(&to_second);
                triplets.push((pair.first_bond, pair.second_bond, value));
                triplets.push((pair.second_bond, pair.first_bond, value));
            }
        }

        let matrix = SparseSymMatrix::from_triplets(bond_count, &triplets);
        let multipliers = self.solver.solve(&matrix, &rhs)?;

        let threshold = self.bonds.threshold();
        for (index, velocity) in velocities.iter_mut().enumerate() {
            if packing[index].immobile {
                continue;
            }
            for &bond_index in &self.bonds.bond_indexes_per_particle()[index] {
                let bond = self.bonds.bonds()[bond_index];
                let neighbor = bond.other(index);

                let bond_vector =
                    periodic_box.distance(&coordinates[index], &coordinates[neighbor]);
                let bond_length = bond_vector.norm();
                let unit = bond_vector / bond_length;

                let expected = 0.5
                    * (packing[index].diameter + packing[neighbor].diameter)
                    * inner_ratio;
                let mut strength = 0.5 * expected * multipliers[bond_index];

                // Error stabilisation: drifted bonds are pulled back
                // towards exact contact by scaling their strength.
                let gap = bond_length - expected;
                if gap > threshold {
                    let factor = 1.0
                        + (MAX_STABILIZATION_FACTOR - 1.0) / (4.0 * threshold)
                            * (gap - threshold).min(4.0 * threshold);
                    strength /= factor;
                } else if -gap > threshold {
                    let factor = 1.0
                        + (MAX_STABILIZATION_FACTOR - 1.0) / (4.0 * threshold)
                            * (-gap - threshold).min(4.0 * threshold);
                    strength *= factor;
                }

                *velocity += unit * strength;
            }
        }
        Ok(velocities)
    }

    /// Earliest collision among non-bonded neighbor pairs, measured as the
    /// inner-ratio increment until contact. Bonded pairs cannot collide:
    /// the equations of motion keep them exactly in contact.
    fn collision_cap(&mut self, packing: &Packing<D>) -> f64 {
        let inner = self.base.inner_diameter_ratio;
        let collisions = GrowingCollisions::new(0.0, 1.0);
        let periodic_box = self.base.periodic_box.clone();

        let moving: Vec<MovingParticle<D>> = packing
            .iter()
            .map(|particle| {
                let mut moving = MovingParticle::new(particle.index, particle.center);
                moving.velocity = self.velocities[particle.index];
                moving.last_event_time = inner;
                moving
            })
            .collect();

        let mut min_collision = f64::INFINITY;
        for particle in packing {
            let neighbors = self
                .tracker
                .neighbors_mut()
                .neighbors_of(packing, particle.index)
                .to_vec();
            for neighbor in neighbors {
                if self.bonds.particles_share_bond(particle.index, neighbor) {
                    continue;
                }
                let time = collisions.collision_time(
                    &periodic_box,
                    inner,
                    particle.diameter,
                    packing[neighbor].diameter,
                    &moving[particle.index],
                    &moving[neighbor],
                );
                if time > inner && time < min_collision {
                    min_collision = time;
                }
            }
        }
        min_collision - inner
    }

    /// Moves every bonded, mobile particle by its velocity times `step`.
    fn move_particles(&mut self, packing: &mut Packing<D>, step: f64) {
        for index in 0..packing.len() {
            if packing[index].immobile
                || self.bonds.bond_indexes_per_particle()[index].is_empty()
            {
                continue;
            }
            self.tracker.start_move(packing, index);
            let mut center = packing[index].center + self.velocities[index] * step;
            self.base.periodic_box.wrap(&mut center);
            packing[index].center = center;
            self.tracker.end_move(packing, index);
        }
    }

    /// Fixed-step RK4 in "time = inner ratio" from the current ratio to
    /// `target`, with the velocities re-solved at every stage.
    fn integrate_to(&mut self, packing: &mut Packing<D>, target: f64) -> Result<u64> {
        let mut coordinates: Vec<Vector<D>> =
            packing.iter().map(|particle| particle.center).collect();
        let mut cycles = 0_u64;

        while self.base.inner_diameter_ratio < target {
            let time = self.base.inner_diameter_ratio;
            let h = self.integration_time_step.min(target - time);

            let k1 = self.bond_velocities(packing, &coordinates, time)?;
            let stage2 = shifted(&coordinates, &k1, 0.5 * h);
            let k2 = self.bond_velocities(packing, &stage2, time + 0.5 * h)?;
            let stage3 = shifted(&coordinates, &k2, 0.5 * h);
            let k3 = self.bond_velocities(packing, &stage3, time + 0.5 * h)?;
            let stage4 = shifted(&coordinates, &k3, h);
            let k4 = self.bond_velocities(packing, &stage4, time + h)?;

            for (index, coordinate) in coordinates.iter_mut().enumerate() {
                *coordinate += (k1[index] + k2[index] * 2.0 + k3[index] * 2.0 + k4[index])
                    * (h / 6.0);
            }
            self.base.inner_diameter_ratio = time + h;
            cycles += 1;

            // Commit the step so the neighbor stack and the collision
            // estimate below see current positions.
            self.velocities = k1;
            for index in 0..packing.len() {
                if packing[index].immobile {
                    continue;
                }
                self.tracker.start_move(packing, index);
                let mut center = coordinates[index];
                self.base.periodic_box.wrap(&mut center);
                packing[index].center = center;
                self.tracker.end_move(packing, index);
                coordinates[index] = packing[index].center;
            }

            // A collision may creep below the precomputed cap while the
            // velocities evolve; stop early instead of overshooting.
            self.velocities = self.bond_velocities(packing, &coordinates, self.base.inner_diameter_ratio)?;
            let cap = self.collision_cap(packing);
            if cap < self.integration_time_step {
                break;
            }
        }
        Ok(cycles)
    }

    fn fix_intersections(&mut self, packing: &mut Packing<D>, statistics: &BondStatistics) -> Result<()> {
        let closest = self.tracker.find_closest_pair();
        let threshold = self.bonds.threshold();
        let tolerance = 1.0 - 5.0 * threshold;
        let inner = self.base.inner_diameter_ratio;
        let intersections_exist =
            closest.normalized_distance_squared < inner * inner * tolerance * tolerance;
        if intersections_exist {
            warn!(
                min_distance = closest.normalized_distance_squared.sqrt(),
                inner_ratio = inner,
                first = closest.first,
                second = closest.second,
                "minimum pair distance fell below the inner ratio"
            );
        }

        let error_is_large = statistics.mean_gap_length > threshold * 5.0
            || statistics.mean_intersection_length > threshold * 5.0
            || intersections_exist;
        if !error_is_large {
            return Ok(());
        }

        warn!("bond errors too large, resnapping the inner ratio and the bonds");
        // The last bond was added with errors; anything before it was not.
        let bonds_count = self.bonds.bonds().len().saturating_sub(1);
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();
        let inner = self.base.inner_diameter_ratio;
        self.bonds.update_bonds(
            self.tracker.neighbors_mut(),
            &self.base.periodic_box.clone(),
            packing,
            inner,
            true,
        );
        self.update_integration_time_step(bonds_count)
    }

    fn update_integration_time_step(&mut self, bonds_count: usize) -> Result<()> {
        let added_bonds = bonds_count as i64 - self.bonds_count_at_step_update as i64;
        self.bonds_count_at_step_update = bonds_count;

        let error_grows_too_quickly = added_bonds < 10;
        if error_grows_too_quickly && self.integration_time_step > MIN_INTEGRATION_TIME_STEP {
            self.integration_time_step *= 0.5;
            warn!(
                integration_time_step = self.integration_time_step,
                "error grows too quickly, halving the integration step"
            );
        }
        if added_bonds <= 0 && self.integration_time_step <= MIN_INTEGRATION_TIME_STEP {
            return Err(Error::Convergence(
                "particles no longer grow and the integration step cannot shrink further".into(),
            ));
        }
        Ok(())
    }
}

fn shifted<const D: usize>(
    coordinates: &[Vector<D>],
    derivative: &[Vector<D>],
    scale: f64,
) -> Vec<Vector<D>> {
    coordinates
        .iter()
        .zip(derivative)
        .map(|(coordinate, slope)| coordinate + slope * scale)
        .collect()
}

impl<const D: usize> PackingStep<D> for ClosestJammingStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.tracker.set_particles(packing);
        self.particle_count = packing.len();

        let closest = self.tracker.find_closest_pair();
        if closest.normalized_distance_squared <= 0.0
            || !closest.normalized_distance_squared.is_finite()
        {
            return Err(Error::Precondition(
                "the packing needs a positive minimum pair distance to grow from".into(),
            ));
        }
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();
        self.base.outer_diameter_ratio = self.base.inner_diameter_ratio;

        self.bonds.reset(packing.len());
        self.velocities = vec![Vector::zeros(); packing.len()];

        let inner = self.base.inner_diameter_ratio;
        self.bonds.update_bonds(
            self.tracker.neighbors_mut(),
            &self.base.periodic_box.clone(),
            packing,
            inner,
            false,
        );
        self.bonds_count_at_step_update = self.bonds.bonds().len();
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        let initial_inner = self.base.inner_diameter_ratio;
        let coordinates: Vec<Vector<D>> =
            packing.iter().map(|particle| particle.center).collect();
        self.velocities = self.bond_velocities(packing, &coordinates, initial_inner)?;

        let mut movement_time = self.collision_cap(packing);
        if let Some(cap) = self.max_time_step {
            movement_time = movement_time.min(cap);
        } else if !movement_time.is_finite() {
            // Nothing left to collide with; grow in bounded chunks so one
            // displacement stays one iteration.
            movement_time = 1000.0 * self.integration_time_step;
        }

        let ode_cycles = if movement_time <= self.integration_time_step {
            self.move_particles(packing, movement_time);
            self.base.inner_diameter_ratio += movement_time;
            0
        } else {
            self.integrate_to(packing, initial_inner + movement_time)?
        };

        // Snap accumulated drift: the inner ratio is the actual minimum.
        self.base.inner_diameter_ratio =
            self.tracker.find_closest_pair().normalized_distance_squared.sqrt();
        self.base.outer_diameter_ratio = self.base.inner_diameter_ratio;

        let inner = self.base.inner_diameter_ratio;
        let statistics = self.bonds.update_bonds(
            self.tracker.neighbors_mut(),
            &self.base.periodic_box.clone(),
            packing,
            inner,
            false,
        );
        if statistics.gaps_count > 0 {
            warn!(
                gaps = statistics.gaps_count,
                mean_gap = statistics.mean_gap_length,
                "bonds drifted open"
            );
        }
        if statistics.intersections_count > 0 {
            warn!(
                intersections = statistics.intersections_count,
                mean_intersection = statistics.mean_intersection_length,
                "bonds drifted into overlap"
            );
        }
        debug!(
            bonds = self.bonds.bonds().len(),
            bond_pairs = self.bonds.bond_pairs_count(),
            ode_cycles,
            integration_time_step = self.integration_time_step,
            inner_ratio = self.base.inner_diameter_ratio,
            "closest-jamming displacement finished"
        );

        self.fix_intersections(packing, &statistics)
    }

    fn should_continue(&self) -> bool {
        // One particle of a rigid frame can always be held fixed.
        self.bonds.bonds().len() < D * (self.particle_count - 1)
    }

    fn inner_diameter_ratio(&self) -> f64 {
        self.base.inner_diameter_ratio
    }

    fn outer_diameter_ratio(&self) -> f64 {
        self.base.outer_diameter_ratio
    }

    fn is_outer_diameter_changing(&self) -> bool {
        self.base.is_outer_diameter_changing
    }

    fn can_overcome_theoretical_density(&self) -> bool {
        self.base.can_overcome_theoretical_density
    }

    fn reset(&mut self, _packing: &mut Packing<D>) -> Result<()> {
        Err(Error::Convergence(
            "the closest-jamming engine runs a single pass; use one run per generation".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use std::f64::consts::PI;

    const DIAMETER: f64 = 0.5;

    fn step_2d(time_step: f64, integration_step: f64) -> ClosestJammingStep<2> {
        let mut step = ClosestJammingStep::new(
            PeriodicBox::new([10.0, 10.0]),
            GenerationConfig::default(),
        );
        step.set_max_time_step(Some(time_step));
        step.set_bond_threshold(1e-10);
        step.set_integration_time_step(integration_step);
        step
    }

    fn packing_2d(centers: &[[f64; 2]]) -> Packing<2> {
        centers
            .iter()
            .enumerate()
            .map(|(index, &center)| Particle::new(index, DIAMETER, Vector::from(center)))
            .collect()
    }

    fn displacements(
        periodic_box: &PeriodicBox<2>,
        packing: &Packing<2>,
        initial: &[Vector<2>],
    ) -> Vec<Vector<2>> {
        packing
            .iter()
            .zip(initial)
            .map(|(particle, start)| periodic_box.distance(&particle.center, start))
            .collect()
    }

    #[test]
    fn three_disks_in_a_triangle_displace_symmetrically() {
        let time_step = 1e-8;
        let mut step = step_2d(time_step, 1e-4);
        let periodic_box = PeriodicBox::new([10.0, 10.0]);

        // Three disks in a regular triangle; the fourth is far away.
        let c0 = [0.0, 0.0];
        let c1 = [DIAMETER, 0.0];
        let c2 = [DIAMETER * 0.5, DIAMETER * (PI / 3.0).sin()];
        let c3 = [5.0, 5.0];
        let mut packing = packing_2d(&[c0, c1, c2, c3]);
        let initial: Vec<Vector<2>> = packing.iter().map(|p| p.center).collect();

        let mut rng = Pcg64::seed_from_u64(0);
        step.set_particles(&mut packing, &mut rng).unwrap();
        step.displace_particles(&mut packing, &mut rng).unwrap();

        let c01 = periodic_box.distance(&initial[1], &initial[0]);
        let c02 = periodic_box.distance(&initial[2], &initial[0]);
        let c12 = periodic_box.distance(&initial[2], &initial[1]);

        let expected = [
            (c01 + c02) * (-time_step / 3.0),
            (c12 - c01) * (-time_step / 3.0),
            (c02 + c12) * (time_step / 3.0),
            Vector::zeros(),
        ];

        let actual = displacements(&periodic_box, &packing, &initial);
        for (displacement, expected) in actual.iter().zip(&expected) {
            for axis in 0..2 {
                assert_approx_eq!(
                    f64,
                    displacement[axis],
                    expected[axis],
                    epsilon = 1e-5 * time_step
                );
            }
        }
    }

    #[test]
    fn four_disk_chain_displaces_along_the_bond_directions() {
        let time_step = 1e-8;
        let mut step = step_2d(time_step, 1e-4);
        let periodic_box = PeriodicBox::new([10.0, 10.0]);

        // A chain with a sixty-degree bend and a vertical tail.
        let c0 = [0.0, 0.0];
        let c1 = [
            DIAMETER * (PI / 3.0).cos(),
            DIAMETER * (PI / 3.0).sin(),
        ];
        let c2 = [c1[0] + DIAMETER, c1[1]];
        let c3 = [c2[0], c2[1] + DIAMETER];
        let mut packing = packing_2d(&[c0, c1, c2, c3]);
        let initial: Vec<Vector<2>> = packing.iter().map(|p| p.center).collect();

        let mut rng = Pcg64::seed_from_u64(0);
        step.set_particles(&mut packing, &mut rng).unwrap();
        step.displace_particles(&mut packing, &mut rng).unwrap();

        let c01 = periodic_box.distance(&initial[1], &initial[0]);
        let c12 = periodic_box.distance(&initial[2], &initial[1]);
        let c23 = periodic_box.distance(&initial[3], &initial[2]);

        let expected = [
            c01 * (-2.0 * time_step / 3.0),
            (c01 - c12) * (2.0 * time_step / 3.0),
            c12 * (2.0 * time_step / 3.0) + c23 * (-0.5 * time_step),
            c23 * (0.5 * time_step),
        ];

        let actual = displacements(&periodic_box, &packing, &initial);
        for (displacement, expected) in actual.iter().zip(&expected) {
            for axis in 0..2 {
                assert_approx_eq!(
                    f64,
                    displacement[axis],
                    expected[axis],
                    epsilon = 1e-5 * time_step
                );
            }
        }
    }

    #[test]
    fn integration_step_halves_and_never_grows() {
        let mut step = step_2d(1e-8, 1e-4);
        step.bonds_count_at_step_update = 0;

        // Plenty of new bonds: the step stays put.
        step.update_integration_time_step(50).unwrap();
        assert_approx_eq!(f64, step.integration_time_step, 1e-4, ulps = 2);

        // Too few new bonds: the step halves, and only ever halves.
        step.update_integration_time_step(52).unwrap();
        assert_approx_eq!(f64, step.integration_time_step, 5e-5, ulps = 2);
        step.update_integration_time_step(60).unwrap();
        assert_approx_eq!(f64, step.integration_time_step, 2.5e-5, ulps = 2);

        // At the floor with no bond progress the run is over.
        step.integration_time_step = MIN_INTEGRATION_TIME_STEP;
        assert!(step.update_integration_time_step(60).is_err());
    }

    #[test]
    fn long_integration_keeps_bonds_tight_and_disjoint() {
        let time_step = 1e-3;
        let mut step = step_2d(time_step, 1e-7);
        let periodic_box = PeriodicBox::new([10.0, 10.0]);

        let c0 = [0.0, 0.0];
        let c1 = [
            DIAMETER * (PI / 3.0).cos(),
            DIAMETER * (PI / 3.0).sin(),
        ];
        let c2 = [c1[0] + DIAMETER, c1[1]];
        let c3 = [c2[0], c2[1] + DIAMETER];
        let mut packing = packing_2d(&[c0, c1, c2, c3]);

        let mut rng = Pcg64::seed_from_u64(0);
        step.set_particles(&mut packing, &mut rng).unwrap();
        step.displace_particles(&mut packing, &mut rng).unwrap();

        let ratio = step.inner_diameter_ratio();
        assert!(ratio > 1.0);

        // No pair of grown disks overlaps.
        for i in 0..packing.len() {
            for j in i + 1..packing.len() {
                let distance = periodic_box.normalized_distance(&packing[i], &packing[j]);
                assert!(distance >= ratio * (1.0 - 1e-10));
            }
        }

        // The chain bonds stayed at exact contact.
        for (first, second) in [(0, 1), (1, 2), (2, 3)] {
            let distance = periodic_box.normalized_distance(&packing[first], &packing[second]);
            assert_approx_eq!(f64, distance, ratio, epsilon = 1e-8);
        }
    }
}
