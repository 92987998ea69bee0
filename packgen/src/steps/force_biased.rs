//! The force-biased relaxation step of Bezrukov, Bargiel and Stoyan (2002).

use crate::cell_list::CellList;
use crate::config::GenerationConfig;
use crate::energy::EnergyService;
use crate::error::Result;
use crate::math::{PeriodicBox, Vector};
use crate::particle::Packing;
use crate::potentials::{Bezrukov, PotentialEnum};
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use rand_pcg::Pcg64;

/// Spheres inflated to this multiple of the target density define the
/// initial outer diameter ratio.
const NOMINAL_DENSITY_RATIO: f64 = 1.2;
const FORCE_SCALING_FACTOR: f64 = 0.5;

/// Iterative displacement along pair repulsion forces with an outer
/// diameter that contracts towards the inner one.
pub struct ForceBiasedStep<const D: usize> {
    base: BaseStep<D>,
    energy: EnergyService<D, VerletList<D, CellList<D>>>,
    potential: PotentialEnum,
    forces: Vec<Vector<D>>,
    initial_outer_diameter_ratio: f64,
}

impl<const D: usize> ForceBiasedStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let energy = EnergyService::new(VerletList::new(CellList::new(periodic_box.clone())));
        Self {
            base: BaseStep::new(periodic_box, generation, true, true),
            energy,
            potential: Bezrukov.into(),
            forces: Vec::new(),
            initial_outer_diameter_ratio: 1.0,
        }
    }

    fn reset_outer_diameter_ratio(&mut self) {
        self.base.outer_diameter_ratio = NOMINAL_DENSITY_RATIO.powf(1.0 / f64::from(D as u32));
        self.initial_outer_diameter_ratio = self.base.outer_diameter_ratio;
    }

    fn refresh_forces(&mut self, packing: &Packing<D>) {
        let contraction = 1.0 / self.base.outer_diameter_ratio;
        let closest =
            self.energy
                .fill_forces(packing, contraction, &self.potential, &mut self.forces);
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();
    }

    fn repulse_all_particles(&mut self, packing: &mut Packing<D>) {
        let outer = self.base.outer_diameter_ratio;
        for index in 0..packing.len() {
            if packing[index].immobile {
                continue;
            }
            self.energy.start_move(packing, index);

            // The energy pass contracts distances instead of expanding
            // diameters, hence the extra two factors of the outer ratio.
            let factor =
                FORCE_SCALING_FACTOR / (2.0 * packing[index].diameter) * outer * outer;
            let mut center = packing[index].center + self.forces[index] * factor;
            self.base.periodic_box.wrap(&mut center);
            packing[index].center = center;

            self.energy.end_move(packing, index);
        }
    }

    /// The `0.5^j` contraction schedule: the closer the current porosity is
    /// to the nominal one, the slower the outer diameter shrinks.
    fn update_outer_diameter_ratio(&mut self) {
        let inner_porosity = self.base.porosity_at(self.base.inner_diameter_ratio);
        let nominal_density = (1.0 - self.base.theoretical_porosity) * NOMINAL_DENSITY_RATIO;
        let porosity_difference = inner_porosity - (1.0 - nominal_density);
        if porosity_difference < 0.0 {
            return;
        }

        let j = (-porosity_difference.log10()).ceil();
        self.base.outer_diameter_ratio -= 0.5_f64.powf(j)
            * self.initial_outer_diameter_ratio
            * self.base.generation.contraction_rate;
    }
}

impl<const D: usize> PackingStep<D> for ForceBiasedStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.energy.set_particles(packing);
        self.reset_outer_diameter_ratio();
        self.refresh_forces(packing);
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.repulse_all_particles(packing);
        self.refresh_forces(packing);
        self.update_outer_diameter_ratio();
        Ok(())
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
        self.reset_outer_diameter_ratio();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use rand::SeedableRng;

    #[test]
    fn relaxation_separates_an_overlapping_cluster() {
        // A tight cluster of four spheres that overlap at full diameter.
        let mut packing: Packing<3> = vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([5.6, 5.0, 5.0])),
            Particle::new(2, 1.0, Vector::from([5.0, 5.7, 5.0])),
            Particle::new(3, 1.0, Vector::from([5.3, 5.3, 5.6])),
        ];
        let generation = GenerationConfig {
            contraction_rate: 1e-2,
            ..GenerationConfig::default()
        };
        let mut step = ForceBiasedStep::new(PeriodicBox::new([10.0; 3]), generation);
        let mut rng = Pcg64::seed_from_u64(1);

        step.set_particles(&mut packing, &mut rng).unwrap();
        let initial_inner = step.inner_diameter_ratio();
        assert!(initial_inner < 1.0);
        assert!(step.outer_diameter_ratio() > 1.0);

        let mut iterations = 0;
        while step.should_continue() && iterations < 5000 {
            step.displace_particles(&mut packing, &mut rng).unwrap();
            iterations += 1;
            if step.inner_diameter_ratio() >= 1.0 {
                break;
            }
        }

        assert!(step.inner_diameter_ratio() > initial_inner);
    }

    #[test]
    fn immobile_particles_do_not_move() {
        let mut packing: Packing<3> = vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([5.5, 5.0, 5.0])),
        ];
        packing[0].immobile = true;
        let anchor = packing[0].center;

        let mut step =
            ForceBiasedStep::new(PeriodicBox::new([10.0; 3]), GenerationConfig::default());
        let mut rng = Pcg64::seed_from_u64(2);
        step.set_particles(&mut packing, &mut rng).unwrap();
        for _ in 0..10 {
            step.displace_particles(&mut packing, &mut rng).unwrap();
        }

        assert_eq!(packing[0].center, anchor);
        assert!(packing[1].center != Vector::from([5.5, 5.0, 5.0]));
    }
}
