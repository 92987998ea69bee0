//! Initial particle arrangements for a fresh generation.
//!
//! Generators place centers only; diameters are owned by the caller. The
//! Poisson variants start from maximal disorder, the HCP lattice provides a
//! known crystalline reference state.

use crate::config::SystemConfig;
use crate::error::{Error, Result};
use crate::math::Vector;
use crate::particle::Packing;
use rand::Rng;

/// Places the centers of an initial packing.
pub trait InitialGenerator<const D: usize> {
    /// Fills the centers of `packing`; diameters and indices are already
    /// set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the packing does not match the
    /// generator's requirements.
    fn arrange<R: Rng>(
        &self,
        config: &SystemConfig<D>,
        rng: &mut R,
        packing: &mut Packing<D>,
    ) -> Result<()>;
}

/// Uniformly random centers ("R-packings").
#[derive(Clone, Copy, Debug, Default)]
pub struct PoissonGenerator;

impl<const D: usize> InitialGenerator<D> for PoissonGenerator {
    fn arrange<R: Rng>(
        &self,
        config: &SystemConfig<D>,
        rng: &mut R,
        packing: &mut Packing<D>,
    ) -> Result<()> {
        for particle in packing {
            for axis in 0..D {
                particle.center[axis] = rng.gen::<f64>() * config.box_size[axis];
            }
        }
        Ok(())
    }
}

/// Random centers drawn per cell of a coarse cubic grid ("S-packings"),
/// which suppresses long-wavelength density fluctuations.
#[derive(Clone, Copy, Debug, Default)]
pub struct PoissonInCellsGenerator;

impl PoissonInCellsGenerator {
    const PARTICLES_IN_CELL: usize = 8;
}

impl<const D: usize> InitialGenerator<D> for PoissonInCellsGenerator {
    fn arrange<R: Rng>(
        &self,
        config: &SystemConfig<D>,
        rng: &mut R,
        packing: &mut Packing<D>,
    ) -> Result<()> {
        let target_cells = config.particle_count / Self::PARTICLES_IN_CELL;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let mut cells_per_side = (target_cells as f64)
            .powf(1.0 / f64::from(D as u32))
            .round() as usize;
        while cells_per_side > 1 && cells_per_side.pow(D as u32) > target_cells {
            cells_per_side -= 1;
        }
        let cells_per_side = cells_per_side.max(1);
        let cell_count = cells_per_side.pow(D as u32);
        let particles_per_cell = config.particle_count / cell_count;

        let mut cell_size = Vector::<D>::zeros();
        for axis in 0..D {
            #[allow(clippy::cast_precision_loss)]
            {
                cell_size[axis] = config.box_size[axis] / cells_per_side as f64;
            }
        }

        let mut lattice = [0_usize; D];
        for cell in 0..cell_count {
            let mut corner = Vector::<D>::zeros();
            for axis in 0..D {
                #[allow(clippy::cast_precision_loss)]
                {
                    corner[axis] = lattice[axis] as f64 * cell_size[axis];
                }
            }

            for i in 0..particles_per_cell {
                let particle = &mut packing[cell * particles_per_cell + i];
                for axis in 0..D {
                    particle.center[axis] = corner[axis] + rng.gen::<f64>() * cell_size[axis];
                }
            }

            // Advance the lattice counter.
            for axis in 0..D {
                lattice[axis] += 1;
                if lattice[axis] < cells_per_side {
                    break;
                }
                lattice[axis] = 0;
            }
        }

        // Spread the remainder uniformly over the whole box.
        for particle in packing.iter_mut().skip(particles_per_cell * cell_count) {
            for axis in 0..D {
                particle.center[axis] = rng.gen::<f64>() * config.box_size[axis];
            }
        }
        Ok(())
    }
}

/// Periodic hexagonal-close-packed lattice of 48 equal spheres.
#[derive(Clone, Copy, Debug, Default)]
pub struct HcpGenerator;

impl HcpGenerator {
    /// The only particle count the periodic lattice supports.
    pub const EXPECTED_PARTICLE_COUNT: usize = 48;

    /// Box extent that makes the 48-sphere lattice periodic for the given
    /// diameter.
    #[must_use]
    pub fn expected_box_size(diameter: f64) -> [f64; 3] {
        let radius = 0.5 * diameter;
        [
            6.0 * radius,
            4.0 * 3.0_f64.sqrt() * radius,
            8.0 * 6.0_f64.sqrt() / 3.0 * radius,
        ]
    }

    fn add_row(packing: &mut Packing<3>, cursor: &mut usize, first_center: Vector<3>, radius: f64) {
        for i in 0..3 {
            let particle = &mut packing[*cursor + i];
            particle.center = first_center;
            #[allow(clippy::cast_precision_loss)]
            {
                particle.center[0] += i as f64 * 2.0 * radius;
            }
        }
        *cursor += 3;
    }

    fn add_layer(
        packing: &mut Packing<3>,
        cursor: &mut usize,
        first_center: Vector<3>,
        row_shift_x: f64,
        radius: f64,
    ) {
        let row_shift_y = radius * 3.0_f64.sqrt();
        let mut center = first_center;

        Self::add_row(packing, cursor, center, radius);
        center[0] += row_shift_x;
        center[1] += row_shift_y;
        Self::add_row(packing, cursor, center, radius);
        center[0] -= row_shift_x;
        center[1] += row_shift_y;
        Self::add_row(packing, cursor, center, radius);
        center[0] += row_shift_x;
        center[1] += row_shift_y;
        Self::add_row(packing, cursor, center, radius);
    }
}

impl InitialGenerator<3> for HcpGenerator {
    fn arrange<R: Rng>(
        &self,
        config: &SystemConfig<3>,
        _rng: &mut R,
        packing: &mut Packing<3>,
    ) -> Result<()> {
        if config.particle_count != Self::EXPECTED_PARTICLE_COUNT {
            return Err(Error::Config(format!(
                "the periodic HCP lattice holds exactly {} particles",
                Self::EXPECTED_PARTICLE_COUNT
            )));
        }
        let diameter = packing[0].diameter;
        let expected = Self::expected_box_size(diameter);
        for axis in 0..3 {
            if (config.box_size[axis] / expected[axis] - 1.0).abs() > 1e-10 {
                return Err(Error::Config(format!(
                    "the HCP box for diameter {diameter} must be {expected:?}, got {:?}",
                    config.box_size
                )));
            }
        }

        let radius = 0.5 * diameter;
        let layer_height = radius * 2.0 * 6.0_f64.sqrt() / 3.0;
        let layer_b_shift_y = radius / 3.0_f64.sqrt();
        let mut cursor = 0;

        for layer in 0..4 {
            let is_layer_a = layer % 2 == 0;
            let first_center = Vector::from([
                if is_layer_a { 0.0 } else { radius },
                if is_layer_a { 0.0 } else { layer_b_shift_y },
                f64::from(layer) * layer_height,
            ]);
            let row_shift_x = if is_layer_a { radius } else { -radius };
            Self::add_layer(packing, &mut cursor, first_center, row_shift_x, radius);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::PeriodicBox;
    use crate::particle::{particles_volume, Particle};
    use float_cmp::assert_approx_eq;
    use rand::SeedableRng;
    use rand_pcg::Pcg64;
    use std::f64::consts::PI;

    fn empty_packing(count: usize, diameter: f64) -> Packing<3> {
        (0..count)
            .map(|index| Particle::new(index, diameter, Vector::zeros()))
            .collect()
    }

    #[test]
    fn poisson_centers_stay_inside_the_box() {
        let config = SystemConfig::<3> {
            particle_count: 100,
            box_size: [5.0, 7.0, 3.0],
        };
        let mut packing = empty_packing(100, 0.2);
        let mut rng = Pcg64::seed_from_u64(7);

        PoissonGenerator.arrange(&config, &mut rng, &mut packing).unwrap();
        for particle in &packing {
            for axis in 0..3 {
                assert!(particle.center[axis] >= 0.0);
                assert!(particle.center[axis] < config.box_size[axis]);
            }
        }
    }

    #[test]
    fn poisson_in_cells_fills_every_cell() {
        let config = SystemConfig::<3> {
            particle_count: 64,
            box_size: [8.0, 8.0, 8.0],
        };
        let mut packing = empty_packing(64, 0.2);
        let mut rng = Pcg64::seed_from_u64(11);

        PoissonInCellsGenerator.arrange(&config, &mut rng, &mut packing).unwrap();

        // 64 particles, 8 per cell target: a 2x2x2 grid of 4 fm cells, 8
        // particles each.
        let mut counts = [[[0_usize; 2]; 2]; 2];
        for particle in &packing {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let cell = |value: f64| (value / 4.0).floor().min(1.0) as usize;
            counts[cell(particle.center[0])][cell(particle.center[1])][cell(particle.center[2])] += 1;
        }
        for plane in counts {
            for row in plane {
                for count in row {
                    assert_eq!(count, 8);
                }
            }
        }
    }

    #[test]
    fn hcp_touches_exactly_and_reaches_the_crystal_density() {
        let diameter = 1.0;
        let config = SystemConfig::<3> {
            particle_count: HcpGenerator::EXPECTED_PARTICLE_COUNT,
            box_size: HcpGenerator::expected_box_size(diameter),
        };
        let mut packing = empty_packing(config.particle_count, diameter);
        let mut rng = Pcg64::seed_from_u64(0);

        HcpGenerator.arrange(&config, &mut rng, &mut packing).unwrap();

        let periodic_box = PeriodicBox::new(config.box_size);
        let mut min_distance_squared = f64::INFINITY;
        for i in 0..packing.len() {
            for j in i + 1..packing.len() {
                min_distance_squared = min_distance_squared
                    .min(periodic_box.normalized_distance_squared(&packing[i], &packing[j]));
            }
        }
        assert_approx_eq!(f64, min_distance_squared.sqrt(), 1.0, epsilon = 1e-9);

        let density = particles_volume(&packing) / periodic_box.volume();
        assert_approx_eq!(f64, density, PI / (3.0 * 2.0_f64.sqrt()), epsilon = 1e-9);
    }

    #[test]
    fn hcp_rejects_wrong_counts() {
        let config = SystemConfig::<3> {
            particle_count: 10,
            box_size: HcpGenerator::expected_box_size(1.0),
        };
        let mut packing = empty_packing(10, 1.0);
        let mut rng = Pcg64::seed_from_u64(0);
        assert!(HcpGenerator.arrange(&config, &mut rng, &mut packing).is_err());
    }
}
