//! Thermal velocities for the event-driven simulator.

use crate::ls::events::MovingParticle;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Maxwell–Boltzmann initialisation and kinetic-energy bookkeeping for
/// unit-mass particles.
#[derive(Clone, Copy, Debug)]
pub struct VelocityService {
    temperature: f64,
}

impl VelocityService {
    /// Creates the service at the given reference temperature `k_B T`.
    #[must_use]
    pub const fn new(temperature: f64) -> Self {
        Self { temperature }
    }

    /// Returns the reference temperature.
    #[must_use]
    pub const fn temperature(&self) -> f64 {
        self.temperature
    }

    /// Draws Maxwell–Boltzmann velocities and removes the center-of-mass
    /// drift.
    pub fn fill_velocities<const D: usize, R: Rng>(
        &self,
        rng: &mut R,
        particles: &mut [MovingParticle<D>],
    ) {
        let normal = Normal::new(0.0, self.temperature.sqrt()).expect("positive temperature");
        let mut mean = crate::math::Vector::<D>::zeros();
        for particle in particles.iter_mut() {
            for axis in 0..D {
                particle.velocity[axis] = normal.sample(rng);
            }
            mean += particle.velocity;
        }

        #[allow(clippy::cast_precision_loss)]
        let drift = mean / particles.len() as f64;
        for particle in particles.iter_mut() {
            particle.velocity -= drift;
        }
    }

    /// Returns the total kinetic energy.
    #[must_use]
    pub fn actual_kinetic_energy<const D: usize>(&self, particles: &[MovingParticle<D>]) -> f64 {
        particles
            .iter()
            .map(|particle| 0.5 * particle.velocity.norm_squared())
            .sum()
    }

    /// Returns the equipartition kinetic energy `D N k_B T / 2`.
    #[must_use]
    pub fn expected_kinetic_energy<const D: usize>(&self, particles: &[MovingParticle<D>]) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let count = particles.len() as f64;
        0.5 * f64::from(D as u32) * count * self.temperature
    }

    /// Rescales all velocities so the kinetic energy matches the reference
    /// temperature again.
    pub fn rescale_velocities<const D: usize>(&self, particles: &mut [MovingParticle<D>]) {
        let actual = self.actual_kinetic_energy(particles);
        if actual == 0.0 {
            return;
        }
        let factor = (self.expected_kinetic_energy(particles) / actual).sqrt();
        for particle in particles {
            particle.velocity *= factor;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vector;
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;

    fn resting_particles(count: usize) -> Vec<MovingParticle<3>> {
        (0..count)
            .map(|index| MovingParticle::new(index, Vector::zeros()))
            .collect()
    }

    #[test]
    fn initial_velocities_hit_the_temperature() {
        let service = VelocityService::new(0.2);
        let mut particles = resting_particles(10_000);
        let mut rng = Pcg64::seed_from_u64(42);

        service.fill_velocities(&mut rng, &mut particles);

        let actual = service.actual_kinetic_energy(&particles);
        let expected = service.expected_kinetic_energy(&particles);
        assert_approx_eq!(f64, actual, expected, epsilon = expected * 0.05);

        // No center-of-mass drift.
        let mut momentum = Vector::<3>::zeros();
        for particle in &particles {
            momentum += particle.velocity;
        }
        assert!(momentum.norm() < 1e-9 * particles.len() as f64);
    }

    #[test]
    fn rescaling_restores_the_temperature_exactly() {
        let service = VelocityService::new(0.2);
        let mut particles = resting_particles(1000);
        let mut rng = Pcg64::seed_from_u64(7);
        service.fill_velocities(&mut rng, &mut particles);

        for particle in &mut particles {
            particle.velocity[0] += 0.5;
        }
        service.rescale_velocities(&mut particles);

        assert_approx_eq!(
            f64,
            service.actual_kinetic_energy(&particles),
            service.expected_kinetic_energy(&particles),
            epsilon = 1e-9
        );
    }
}
