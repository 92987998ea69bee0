//! Monte Carlo densification after Maier (2008).
//!
//! Particles take random trial displacements that are accepted only when
//! the contracted spheres stay overlap-free; after each sweep the
//! contraction ratio creeps towards the closest-pair distance and the
//! displacement cap follows the remaining free length.

use crate::cell_list::CellList;
use crate::config::GenerationConfig;
use crate::distance::DistanceService;
use crate::error::Result;
use crate::math::{PeriodicBox, Vector};
use crate::particle::{Packing, ParticlePair};
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use rand::Rng;
use rand_pcg::Pcg64;
use tracing::debug;

const INITIAL_EXPANSION_FACTOR: f64 = 2.0;

/// The Monte Carlo step engine.
pub struct MonteCarloStep<const D: usize> {
    base: BaseStep<D>,
    distance: DistanceService<D, VerletList<D, CellList<D>>>,
    is_first_run: bool,
    max_displacement_length: f64,
    max_displacement_to_free_length_ratio: f64,
}

impl<const D: usize> MonteCarloStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let distance = DistanceService::new(VerletList::new(CellList::new(periodic_box.clone())));
        Self {
            base: BaseStep::new(periodic_box, generation, false, false),
            distance,
            is_first_run: true,
            max_displacement_length: 0.0,
            max_displacement_to_free_length_ratio: 2.0,
        }
    }

    /// Puts the particles on a cubic array; later sweeps relax the order
    /// away. Particles beyond the last full lattice site keep their
    /// positions.
    fn arrange_in_cubic_array(&self, packing: &mut Packing<D>) {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let per_side = (packing.len() as f64)
            .powf(1.0 / f64::from(D as u32))
            .round() as usize;
        let per_side = per_side.max(1);

        let mut cell_size = Vector::<D>::zeros();
        for axis in 0..D {
            #[allow(clippy::cast_precision_loss)]
            {
                cell_size[axis] = self.base.periodic_box.size()[axis] / per_side as f64;
            }
        }

        let mut lattice = [0_usize; D];
        for site in 0..per_side.pow(D as u32).min(packing.len()) {
            for axis in 0..D {
                #[allow(clippy::cast_precision_loss)]
                {
                    packing[site].center[axis] = (lattice[axis] as f64 + 0.5) * cell_size[axis];
                }
            }
            for axis in 0..D {
                lattice[axis] += 1;
                if lattice[axis] < per_side {
                    break;
                }
                lattice[axis] = 0;
            }
        }
    }

    /// One sweep of trial moves; returns whether any move was accepted.
    fn displace_particles_once(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> bool {
        let mut successful_moves = 0_usize;
        let inner_squared = self.base.inner_diameter_ratio * self.base.inner_diameter_ratio;

        for index in 0..packing.len() {
            if packing[index].immobile {
                continue;
            }
            let mut trial = packing[index].center;
            for axis in 0..D {
                trial[axis] += (rng.gen::<f64>() - 0.5) * 2.0 * self.max_displacement_length;
            }
            self.base.periodic_box.wrap(&mut trial);

            let (_, normalized_distance_squared) = self.distance.closest_neighbor_of_point(
                packing,
                &trial,
                index,
                packing[index].diameter,
            );

            // The move is allowed if the spheres contracted by the current
            // ratio stay disjoint.
            if normalized_distance_squared > inner_squared {
                self.distance.start_move(packing, index);
                packing[index].center = trial;
                self.distance.end_move(packing, index);
                successful_moves += 1;
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let success_ratio = successful_moves as f64 / packing.len() as f64;
        if success_ratio < 0.5 {
            self.max_displacement_to_free_length_ratio *= 0.75;
            debug!(
                success_ratio,
                cap = self.max_displacement_to_free_length_ratio,
                "low acceptance, tightening the displacement cap"
            );
        }
        successful_moves > 0
    }

    /// Creeps the contraction ratio towards the closest pair and refreshes
    /// the displacement cap from the remaining free length. With a
    /// contraction rate of one the closest pair would touch immediately.
    fn update_parameters(&mut self, packing: &Packing<D>, closest_pair: ParticlePair) {
        if closest_pair.first == ParticlePair::NONE {
            return;
        }
        let min_normalized_distance = closest_pair.normalized_distance_squared.sqrt();
        let radii_sum = 0.5
            * (packing[closest_pair.first].diameter + packing[closest_pair.second].diameter);
        let min_distance = radii_sum * min_normalized_distance;

        let inner = self.base.inner_diameter_ratio;
        self.base.inner_diameter_ratio = inner
            * (radii_sum
                + self.base.generation.contraction_rate * (min_distance / inner - radii_sum))
            / radii_sum;

        let occupied_length = radii_sum * self.base.inner_diameter_ratio;
        let available_length = min_distance - occupied_length;
        self.max_displacement_length =
            self.max_displacement_to_free_length_ratio * available_length;
    }
}

impl<const D: usize> PackingStep<D> for MonteCarloStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.distance.set_particles(packing);
        self.is_first_run = true;
        self.max_displacement_to_free_length_ratio = 2.0;

        let closest_pair = self.distance.find_closest_pair(packing);
        self.base.inner_diameter_ratio = closest_pair.normalized_distance_squared.sqrt();
        self.base.outer_diameter_ratio = self.base.inner_diameter_ratio;
        self.update_parameters(packing, closest_pair);
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()> {
        if self.is_first_run {
            self.is_first_run = false;

            self.arrange_in_cubic_array(packing);
            self.distance.set_particles(packing);
            let closest_pair = self.distance.find_closest_pair(packing);

            // Contracted far below the lattice spacing; the ratio then
            // grows sweep by sweep.
            self.base.inner_diameter_ratio = 1.0 / INITIAL_EXPANSION_FACTOR;
            self.update_parameters(packing, closest_pair);
            return Ok(());
        }

        loop {
            if self.displace_particles_once(packing, rng) {
                let closest_pair = self.distance.find_closest_pair(packing);
                self.update_parameters(packing, closest_pair);
                return Ok(());
            }
            debug!("no particle moved, halving the displacement length");
            self.max_displacement_length *= 0.5;
            if self.max_displacement_length < 1e-15 {
                return Err(crate::error::Error::Convergence(
                    "no trial displacement is acceptable any more".into(),
                ));
            }
        }
    }

    fn should_continue(&self) -> bool {
        self.base.should_continue()
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
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use rand::SeedableRng;

    #[test]
    fn sweeps_grow_the_contraction_ratio_without_overlaps() {
        // Eight spheres whose target diameters overlap on the initial
        // cubic array.
        let mut packing: Packing<3> = (0..8)
            .map(|index| Particle::new(index, 5.2, Vector::zeros()))
            .collect();
        let periodic_box = PeriodicBox::new([10.0; 3]);
        let generation = GenerationConfig {
            contraction_rate: 0.5,
            ..GenerationConfig::default()
        };
        let mut step = MonteCarloStep::new(periodic_box.clone(), generation);
        let mut rng = Pcg64::seed_from_u64(9);

        step.set_particles(&mut packing, &mut rng).unwrap();
        // First displacement arranges the cubic array.
        step.displace_particles(&mut packing, &mut rng).unwrap();
        let initial_ratio = step.inner_diameter_ratio();

        for _ in 0..200 {
            if !step.should_continue() {
                break;
            }
            step.displace_particles(&mut packing, &mut rng).unwrap();

            // No pair may overlap at the current contraction ratio.
            let ratio = step.inner_diameter_ratio();
            for i in 0..packing.len() {
                for j in i + 1..packing.len() {
                    let distance = periodic_box.normalized_distance(&packing[i], &packing[j]);
                    assert!(distance >= ratio * (1.0 - 1e-9));
                }
            }
        }

        assert!(step.inner_diameter_ratio() > initial_ratio);
    }
}
