//! Generation and system configuration records.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Packing-generation algorithm selector.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Algorithm {
    /// Event-driven Lubachevsky–Stillinger with a fixed compression rate.
    LubachevskyStillingerSimple,
    /// Lubachevsky–Stillinger with a compression rate that decreases each
    /// time the packing equilibrates.
    LubachevskyStillingerGradual,
    /// Force-biased relaxation after Bezrukov, Bargiel and Stoyan (2002).
    ForceBiased,
    /// The original Jodrey–Tory algorithm (1985).
    OriginalJodreyTory,
    /// The Jodrey–Tory variant from S. Khirevich's dissertation.
    KhirevichJodreyTory,
    /// Monte Carlo densification after Maier (2008).
    MonteCarlo,
    /// Energy minimisation with nonlinear conjugate gradients.
    ConjugateGradient,
    /// Diameter growth along the bond network towards the closest jammed
    /// state.
    ClosestJamming,
}

/// Initial particle arrangement for a fresh generation.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum InitialDistribution {
    /// Uniformly random centers in the box.
    #[default]
    Poisson,
    /// Random centers drawn per cell of a coarse grid, which suppresses
    /// long-wavelength density fluctuations.
    PoissonInCells,
}

/// Parameters of the modelled system, independent of the algorithm.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SystemConfig<const D: usize> {
    /// Number of particles.
    pub particle_count: usize,
    /// Box extent along each axis.
    #[serde(with = "serde_arrays")]
    pub box_size: [f64; D],
}

impl<const D: usize> SystemConfig<D> {
    /// Checks the basic range constraints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the particle count is zero or any box
    /// extent is not positive.
    pub fn validate(&self) -> Result<()> {
        if self.particle_count == 0 {
            return Err(Error::Config("particle count must be positive".into()));
        }
        if self.box_size.iter().any(|&l| l <= 0.0) {
            return Err(Error::Config(format!(
                "box extents must be positive, got {:?}",
                self.box_size
            )));
        }
        Ok(())
    }
}

/// Parameters of a packing-generation run.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Algorithm to run.
    pub algorithm: Algorithm,
    /// Seed of the per-generation random number generator.
    pub seed: u64,
    /// How aggressively the outer diameter ratio (or the LS compression
    /// rate) approaches the inner one. Must lie in (0, 1).
    pub contraction_rate: f64,
    /// Final compression rate of the gradual-densification LS schedule.
    pub final_contraction_rate: f64,
    /// Factor by which the gradual-densification schedule divides the
    /// compression rate after each equilibration.
    pub contraction_rate_decrease_factor: f64,
    /// Report progress every this many iterations. Purely informational;
    /// the core never writes checkpoints itself.
    pub steps_to_write: u64,
    /// Minimum number of contacts for a particle to count as mechanically
    /// stable in energy aggregates.
    pub min_neighbors_count: usize,
    /// Stop once the theoretical density is reached even if the algorithm
    /// could compress further.
    pub stop_on_theoretical_density: bool,
    /// Initial particle arrangement when no packing is supplied.
    pub initial_distribution: InitialDistribution,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::ForceBiased,
            seed: 0,
            contraction_rate: 1e-3,
            final_contraction_rate: 1e-4,
            contraction_rate_decrease_factor: 2.0,
            steps_to_write: 1000,
            min_neighbors_count: 4,
            stop_on_theoretical_density: false,
            initial_distribution: InitialDistribution::Poisson,
        }
    }
}

impl GenerationConfig {
    /// Checks the range constraints of the generation parameters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] on any out-of-range field.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.contraction_rate) || self.contraction_rate == 0.0 {
            return Err(Error::Config(format!(
                "contraction rate must lie in (0, 1), got {}",
                self.contraction_rate
            )));
        }
        if self.algorithm == Algorithm::LubachevskyStillingerGradual {
            if self.final_contraction_rate <= 0.0
                || self.final_contraction_rate > self.contraction_rate
            {
                return Err(Error::Config(format!(
                    "final contraction rate must lie in (0, {}], got {}",
                    self.contraction_rate, self.final_contraction_rate
                )));
            }
            if self.contraction_rate_decrease_factor <= 1.0 {
                return Err(Error::Config(
                    "contraction rate decrease factor must exceed 1".into(),
                ));
            }
        }
        if self.steps_to_write == 0 {
            return Err(Error::Config("steps_to_write must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_config_rejects_degenerate_boxes() {
        let config = SystemConfig::<3> {
            particle_count: 10,
            box_size: [1.0, 0.0, 1.0],
        };
        assert!(config.validate().is_err());

        let config = SystemConfig::<3> {
            particle_count: 0,
            box_size: [1.0; 3],
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn generation_config_rejects_bad_rates() {
        let mut config = GenerationConfig::default();
        assert!(config.validate().is_ok());

        config.contraction_rate = 1.5;
        assert!(config.validate().is_err());

        config.contraction_rate = 1e-3;
        config.algorithm = Algorithm::LubachevskyStillingerGradual;
        config.final_contraction_rate = 0.5;
        assert!(config.validate().is_err());
    }
}
