//! The generation driver: iterate a step engine until its termination
//! predicate holds.

use crate::config::{GenerationConfig, InitialDistribution, SystemConfig};
use crate::error::{Error, Result};
use crate::init::{InitialGenerator, PoissonGenerator, PoissonInCellsGenerator};
use crate::math::PeriodicBox;
use crate::particle::{particles_volume, Packing, Particle};
use crate::steps::{PackingStep, StepEnum};
use itertools::Itertools;
use rand::SeedableRng;
use rand_pcg::Pcg64;
use std::time::Instant;
use tracing::{info, warn};

/// Summary of one finished generation.
#[derive(Clone, Copy, Debug)]
pub struct PackingInfo {
    /// Porosity at the nominal diameters.
    pub theoretical_porosity: f64,
    /// Porosity at the inner diameter ratio reached at termination.
    pub calculated_porosity: f64,
    /// Contact tolerance the run targeted.
    pub tolerance: f64,
    /// Number of displacement iterations.
    pub iterations: u64,
    /// Wall time in seconds.
    pub total_time: f64,
}

/// Drives one step engine over one packing.
pub struct PackingGenerator<const D: usize> {
    system: SystemConfig<D>,
    generation: GenerationConfig,
    step: StepEnum<D>,
    rng: Pcg64,
}

impl<const D: usize> PackingGenerator<D> {
    /// Validates the configuration and wires the selected engine.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for out-of-range parameters.
    pub fn new(system: SystemConfig<D>, generation: GenerationConfig) -> Result<Self> {
        system.validate()?;
        generation.validate()?;
        let step = StepEnum::from_config(&system, &generation);
        let rng = Pcg64::seed_from_u64(generation.seed);
        Ok(Self {
            system,
            generation,
            step,
            rng,
        })
    }

    /// Creates an initial packing with the given diameters, arranged
    /// according to the configured initial distribution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the diameter count does not match
    /// the particle count.
    pub fn create_packing(&mut self, diameters: &[f64]) -> Result<Packing<D>> {
        if diameters.len() != self.system.particle_count {
            return Err(Error::Config(format!(
                "{} diameters supplied for {} particles",
                diameters.len(),
                self.system.particle_count
            )));
        }
        if diameters.iter().any(|&diameter| diameter <= 0.0) {
            return Err(Error::Config("diameters must be positive".into()));
        }

        let mut packing: Packing<D> = diameters
            .iter()
            .enumerate()
            .map(|(index, &diameter)| {
                Particle::new(index, diameter, crate::math::Vector::zeros())
            })
            .collect();

        match self.generation.initial_distribution {
            InitialDistribution::Poisson => {
                PoissonGenerator.arrange(&self.system, &mut self.rng, &mut packing)?;
            }
            InitialDistribution::PoissonInCells => {
                PoissonInCellsGenerator.arrange(&self.system, &mut self.rng, &mut packing)?;
            }
        }
        Ok(packing)
    }

    /// Runs the engine until its termination predicate holds and returns
    /// the generation summary.
    ///
    /// # Errors
    ///
    /// Propagates precondition and convergence failures of the engine;
    /// the packing is left at the last completed step.
    pub fn generate(&mut self, packing: &mut Packing<D>) -> Result<PackingInfo> {
        if packing.len() != self.system.particle_count {
            return Err(Error::Config(format!(
                "packing holds {} particles, the configuration expects {}",
                packing.len(),
                self.system.particle_count
            )));
        }
        debug_assert!(packing.iter().enumerate().all(|(i, p)| p.index == i));

        let start = Instant::now();
        let theoretical_porosity =
            1.0 - particles_volume(packing) / PeriodicBox::new(self.system.box_size).volume();
        info!(
            algorithm = ?self.generation.algorithm,
            particles = packing.len(),
            theoretical_porosity,
            "starting generation"
        );

        self.step.set_particles(packing, &mut self.rng)?;

        let mut iterations = 0_u64;
        while self.step.should_continue() {
            self.step.displace_particles(packing, &mut self.rng)?;
            iterations += 1;

            if iterations % self.generation.steps_to_write == 0 {
                info!(
                    iterations,
                    inner_ratio = self.step.inner_diameter_ratio(),
                    outer_ratio = self.step.outer_diameter_ratio(),
                    "generation progress"
                );
            }
        }

        let inner_ratio = self.step.inner_diameter_ratio();
        self.check_intersections(packing, inner_ratio);

        let calculated_porosity = 1.0
            - particles_volume(packing) * inner_ratio.powi(D as i32)
                / PeriodicBox::new(self.system.box_size).volume();
        let info = PackingInfo {
            theoretical_porosity,
            calculated_porosity,
            tolerance: crate::steps::TOLERANCE - 1.0,
            iterations,
            total_time: start.elapsed().as_secs_f64(),
        };
        info!(
            iterations,
            inner_ratio,
            calculated_porosity,
            total_time = info.total_time,
            "generation finished"
        );
        Ok(info)
    }

    /// Returns the inner diameter ratio the engine reached; scaling every
    /// diameter by it turns the nominal packing into the achieved one.
    #[must_use]
    pub fn final_inner_diameter_ratio(&self) -> f64 {
        self.step.inner_diameter_ratio()
    }

    /// A full-pair sweep catching any neighbor-stack inconsistency at the
    /// very end of a run.
    fn check_intersections(&self, packing: &Packing<D>, inner_ratio: f64) {
        let periodic_box = PeriodicBox::new(self.system.box_size);
        let min_distance = packing
            .iter()
            .tuple_combinations()
            .map(|(first, second)| periodic_box.normalized_distance(first, second))
            .fold(f64::INFINITY, f64::min);

        if min_distance < inner_ratio * (1.0 - 1e-7) {
            warn!(
                min_distance,
                inner_ratio, "final packing has overlaps beyond tolerance"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Algorithm;

    #[test]
    fn force_biased_generation_runs_to_termination() {
        let system = SystemConfig::<3> {
            particle_count: 20,
            box_size: [6.0; 3],
        };
        let generation = GenerationConfig {
            algorithm: Algorithm::ForceBiased,
            seed: 17,
            contraction_rate: 0.05,
            steps_to_write: 500,
            ..GenerationConfig::default()
        };

        let mut generator = PackingGenerator::new(system, generation).unwrap();
        let diameters = vec![1.0; 20];
        let mut packing = generator.create_packing(&diameters).unwrap();

        let info = generator.generate(&mut packing).unwrap();
        assert!(info.iterations > 0);
        assert!(info.calculated_porosity > 0.0);
        assert!(info.calculated_porosity < 1.0);

        // At termination the spheres scaled by the inner ratio are
        // overlap-free by construction.
        let periodic_box = PeriodicBox::new([6.0; 3]);
        let inner = 1.0_f64.min(
            packing
                .iter()
                .tuple_combinations()
                .map(|(a, b)| periodic_box.normalized_distance(a, b))
                .fold(f64::INFINITY, f64::min),
        );
        assert!(inner > 0.0);
    }

    #[test]
    fn mismatched_packings_are_rejected() {
        let system = SystemConfig::<3> {
            particle_count: 5,
            box_size: [10.0; 3],
        };
        let mut generator =
            PackingGenerator::new(system, GenerationConfig::default()).unwrap();

        let mut packing = generator.create_packing(&[1.0; 5]).unwrap();
        packing.pop();
        assert!(matches!(
            generator.generate(&mut packing),
            Err(Error::Config(_))
        ));
    }
}
