//! Energy minimisation with nonlinear conjugate gradients.
//!
//! Minimises the impermeable-attraction energy — overlap repulsion scaled
//! by 1e10 plus a harmonic attraction outside contact — restricted to the
//! closest neighbors of each particle, with Polak–Ribière directions and a
//! backtracking line search.

use crate::cell_list::CellList;
use crate::config::GenerationConfig;
use crate::energy::EnergyService;
use crate::error::Result;
use crate::math::{PeriodicBox, Vector};
use crate::particle::Packing;
use crate::potentials::{Harmonic, ImpermeableAttraction, PotentialEnum};
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use rand_pcg::Pcg64;
use tracing::debug;

/// The minimizer stalls on raw pair energies; everything is scaled up.
const POTENTIAL_NORMALIZER: f64 = 1e4;
/// Interactions are truncated to this many nearest neighbors, which drives
/// the packing towards isostatic contact counts early.
const MAX_CLOSE_NEIGHBORS: usize = 6;
/// Density the outer ratio is reset to aim for.
const EXPECTED_DENSITY: f64 = 0.6522;
/// Minimisation stops once the gradient norm falls below this.
const GRADIENT_TOLERANCE: f64 = 1e-10;
/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO_SLOPE: f64 = 1e-4;

/// The conjugate-gradient step engine.
pub struct EnergyMinimizationStep<const D: usize> {
    base: BaseStep<D>,
    energy: EnergyService<D, VerletList<D, CellList<D>>>,
    potential: PotentialEnum,
    forces: Vec<Vector<D>>,
    gradient: Vec<Vector<D>>,
    previous_gradient: Vec<Vector<D>>,
    direction: Vec<Vector<D>>,
    current_energy: f64,
    trial_length: f64,
    making_progress: bool,
}

impl<const D: usize> EnergyMinimizationStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let mut energy = EnergyService::new(VerletList::new(CellList::new(periodic_box.clone())));
        energy.set_potential_normalizer(POTENTIAL_NORMALIZER);
        energy.set_max_close_neighbors(Some(MAX_CLOSE_NEIGHBORS));
        // Particles below the stability contact count drop out of the
        // objective, so the minimiser does not chase rattler energies.
        energy.set_min_neighbors_count(generation.min_neighbors_count);
        Self {
            base: BaseStep::new(periodic_box, generation, false, true),
            energy,
            potential: ImpermeableAttraction::new(Harmonic::new(2.0)).into(),
            forces: Vec::new(),
            gradient: Vec::new(),
            previous_gradient: Vec::new(),
            direction: Vec::new(),
            current_energy: 0.0,
            trial_length: 1e-3,
            making_progress: true,
        }
    }

    fn potential_energy(&mut self, packing: &Packing<D>) -> f64 {
        let contraction = 1.0 / self.base.outer_diameter_ratio;
        let result =
            self.energy
                .contraction_energies(packing, &[contraction], &[self.potential]);
        self.base.inner_diameter_ratio = result.closest_pair.normalized_distance_squared.sqrt();
        result.contraction_energies[0]
    }

    fn fill_gradient(&mut self, packing: &Packing<D>) {
        let contraction = 1.0 / self.base.outer_diameter_ratio;
        self.energy
            .fill_forces(packing, contraction, &self.potential, &mut self.forces);
        self.gradient.clear();
        self.gradient.extend(
            self.forces
                .iter()
                .map(|force| -force * POTENTIAL_NORMALIZER),
        );
        for (index, particle) in packing.iter().enumerate() {
            if particle.immobile {
                self.gradient[index] = Vector::zeros();
            }
        }
    }

    fn gradient_norm_squared(gradient: &[Vector<D>]) -> f64 {
        gradient.iter().map(|component| component.norm_squared()).sum()
    }

    /// Polak–Ribière with restart on non-descent directions.
    fn update_direction(&mut self) {
        let previous_norm_squared = Self::gradient_norm_squared(&self.previous_gradient);
        let beta = if previous_norm_squared == 0.0 || self.direction.is_empty() {
            0.0
        } else {
            let mut numerator = 0.0;
            for (current, previous) in self.gradient.iter().zip(&self.previous_gradient) {
                numerator += current.dot(&(current - previous));
            }
            (numerator / previous_norm_squared).max(0.0)
        };

        if self.direction.is_empty() {
            self.direction = vec![Vector::zeros(); self.gradient.len()];
        }
        let mut descent = 0.0;
        for (direction, gradient) in self.direction.iter_mut().zip(&self.gradient) {
            *direction = -gradient + *direction * beta;
            descent += direction.dot(gradient);
        }
        if descent >= 0.0 {
            // Restart with steepest descent.
            for (direction, gradient) in self.direction.iter_mut().zip(&self.gradient) {
                *direction = -gradient;
            }
        }
    }

    fn move_all(&mut self, packing: &mut Packing<D>, offsets: &[Vector<D>], scale: f64) {
        for index in 0..packing.len() {
            if packing[index].immobile {
                continue;
            }
            self.energy.start_move(packing, index);
            let mut center = packing[index].center + offsets[index] * scale;
            self.base.periodic_box.wrap(&mut center);
            packing[index].center = center;
            self.energy.end_move(packing, index);
        }
    }

    /// Backtracking line search along the current direction. Returns
    /// `false` once no step length gives sufficient decrease.
    fn line_search(&mut self, packing: &mut Packing<D>) -> bool {
        let direction_norm = Self::gradient_norm_squared(&self.direction).sqrt();
        if direction_norm == 0.0 {
            return false;
        }
        let slope: f64 = self
            .direction
            .iter()
            .zip(&self.gradient)
            .map(|(direction, gradient)| direction.dot(gradient))
            .sum::<f64>()
            / direction_norm;
        debug_assert!(slope < 0.0);

        let mut length = self.trial_length;
        let direction = self.direction.clone();
        while length > 1e-14 {
            let scale = length / direction_norm;
            self.move_all(packing, &direction, scale);
            let trial_energy = self.potential_energy(packing);

            if trial_energy <= self.current_energy + ARMIJO_SLOPE * length * slope {
                self.current_energy = trial_energy;
                // A generous opening for the next search.
                self.trial_length = (length * 2.0).min(1e-1);
                return true;
            }
            // Undo the trial move.
            self.move_all(packing, &direction, -scale);
            length *= 0.5;
        }
        false
    }
}

impl<const D: usize> PackingStep<D> for EnergyMinimizationStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.energy.set_particles(packing);

        self.base.outer_diameter_ratio = (EXPECTED_DENSITY
            / (1.0 - self.base.theoretical_porosity))
            .powf(1.0 / f64::from(D as u32));
        self.current_energy = self.potential_energy(packing);
        self.gradient.clear();
        self.previous_gradient.clear();
        self.direction.clear();
        self.trial_length = 1e-3;
        self.making_progress = true;
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.previous_gradient = std::mem::take(&mut self.gradient);
        self.fill_gradient(packing);

        let gradient_norm = Self::gradient_norm_squared(&self.gradient).sqrt();
        if gradient_norm < GRADIENT_TOLERANCE {
            debug!(gradient_norm, "gradient below tolerance, stopping");
            self.making_progress = false;
            return Ok(());
        }

        self.update_direction();
        if !self.line_search(packing) {
            debug!(
                energy = self.current_energy,
                "iteration is not making progress towards the minimum"
            );
            self.making_progress = false;
        }
        Ok(())
    }

    fn should_continue(&self) -> bool {
        self.making_progress && self.base.should_continue()
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

    fn reset(&mut self, packing: &mut Packing<D>) -> Result<()> {
        self.set_particles(packing, &mut Pcg64::new(0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use rand::SeedableRng;

    #[test]
    fn minimisation_reduces_the_energy() {
        // A compressed pair plus a separated attractor. No particle of the
        // cluster can reach the default stability contact count, so the
        // rattler filter is lifted to keep them all in the objective.
        let mut packing: Packing<3> = vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([5.6, 5.0, 5.0])),
            Particle::new(2, 1.0, Vector::from([5.3, 6.2, 5.0])),
        ];
        let generation = GenerationConfig {
            min_neighbors_count: 0,
            ..GenerationConfig::default()
        };
        let mut step = EnergyMinimizationStep::new(PeriodicBox::new([10.0; 3]), generation);
        let mut rng = Pcg64::seed_from_u64(12);

        step.set_particles(&mut packing, &mut rng).unwrap();
        let initial_energy = step.current_energy;

        let mut iterations = 0;
        while step.should_continue() && iterations < 300 {
            step.displace_particles(&mut packing, &mut rng).unwrap();
            iterations += 1;
        }

        assert!(step.current_energy < initial_energy);
    }

    #[test]
    fn contact_filter_follows_the_configuration() {
        let cluster: Packing<3> = vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([5.6, 5.0, 5.0])),
            Particle::new(2, 1.0, Vector::from([5.3, 6.2, 5.0])),
        ];
        let mut rng = Pcg64::seed_from_u64(12);

        // Under the default threshold of four contacts every particle of
        // the cluster is a rattler and contributes nothing.
        let mut strict =
            EnergyMinimizationStep::new(PeriodicBox::new([10.0; 3]), GenerationConfig::default());
        let mut packing = cluster.clone();
        strict.set_particles(&mut packing, &mut rng).unwrap();
        assert_eq!(strict.current_energy, 0.0);

        // Lifting the threshold brings their pair energies back.
        let generation = GenerationConfig {
            min_neighbors_count: 0,
            ..GenerationConfig::default()
        };
        let mut lenient = EnergyMinimizationStep::new(PeriodicBox::new([10.0; 3]), generation);
        let mut packing = cluster;
        lenient.set_particles(&mut packing, &mut rng).unwrap();
        assert!(lenient.current_energy > 0.0);
    }
}
