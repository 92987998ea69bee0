//! The step engines and their common contract.

pub mod closest_jamming;
pub mod conjugate_gradient;
pub mod force_biased;
pub mod jodrey_tory;
pub mod monte_carlo;

use crate::config::{Algorithm, GenerationConfig, SystemConfig};
use crate::error::Result;
use crate::math::PeriodicBox;
use crate::particle::{particles_volume, Packing};
use rand_pcg::Pcg64;

/// Generation stops once the inner ratio is within this tolerance of
/// contact for engines that cannot exceed the theoretical density.
pub(crate) const TOLERANCE: f64 = 1.0001;

/// State and predicates shared by every step engine.
#[derive(Clone, Debug)]
pub(crate) struct BaseStep<const D: usize> {
    pub periodic_box: PeriodicBox<D>,
    pub generation: GenerationConfig,
    pub inner_diameter_ratio: f64,
    pub outer_diameter_ratio: f64,
    pub is_outer_diameter_changing: bool,
    pub can_overcome_theoretical_density: bool,
    pub particles_volume: f64,
    pub total_volume: f64,
    pub theoretical_porosity: f64,
}

impl<const D: usize> BaseStep<D> {
    pub fn new(
        periodic_box: PeriodicBox<D>,
        generation: GenerationConfig,
        is_outer_diameter_changing: bool,
        can_overcome_theoretical_density: bool,
    ) -> Self {
        Self {
            periodic_box,
            generation,
            inner_diameter_ratio: 1.0,
            outer_diameter_ratio: 1.0,
            is_outer_diameter_changing,
            can_overcome_theoretical_density,
            particles_volume: 0.0,
            total_volume: 0.0,
            theoretical_porosity: 0.0,
        }
    }

    pub fn set_particles(&mut self, packing: &Packing<D>) {
        self.particles_volume = particles_volume(packing);
        self.total_volume = self.periodic_box.volume();
        self.theoretical_porosity = self.porosity_at(1.0);
    }

    /// Porosity the packing would have with diameters scaled by `ratio`.
    pub fn porosity_at(&self, ratio: f64) -> f64 {
        1.0 - self.particles_volume * ratio.powi(D as i32) / self.total_volume
    }

    /// The shared termination predicate over the two ratios and the
    /// engine flags.
    pub fn should_continue(&self) -> bool {
        let min_distance = 2.0 - TOLERANCE;

        if self.is_outer_diameter_changing {
            if self.outer_diameter_ratio <= self.inner_diameter_ratio {
                return false;
            }
            if !self.generation.stop_on_theoretical_density {
                return true;
            }
        }

        if self.can_overcome_theoretical_density {
            self.inner_diameter_ratio < 1.0
        } else {
            self.inner_diameter_ratio < min_distance
        }
    }
}

/// The contract every generation engine exposes to the driver.
pub trait PackingStep<const D: usize> {
    /// Binds the engine to a packing and prepares the first displacement.
    ///
    /// # Errors
    ///
    /// Returns an error when the packing violates the engine's
    /// preconditions.
    fn set_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()>;

    /// Performs one displacement iteration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::Error::Convergence`] when no further
    /// progress is possible.
    fn displace_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()>;

    /// Returns `false` once the engine's termination predicate holds.
    fn should_continue(&self) -> bool;

    /// The minimum normalized pair distance of the current state.
    fn inner_diameter_ratio(&self) -> f64;

    /// The effective interaction scale the engine is contracting.
    fn outer_diameter_ratio(&self) -> f64;

    /// Whether the engine runs an outer-diameter schedule at all.
    fn is_outer_diameter_changing(&self) -> bool;

    /// Whether the engine may compress beyond the theoretical density.
    fn can_overcome_theoretical_density(&self) -> bool;

    /// Rewinds the engine's schedule for another run over the same
    /// packing.
    ///
    /// # Errors
    ///
    /// Returns an error for engines that do not support repeated runs.
    fn reset(&mut self, packing: &mut Packing<D>) -> Result<()>;
}

/// The closed family of step engines, selected by
/// [`Algorithm`].
pub enum StepEnum<const D: usize> {
    /// Event-driven Lubachevsky–Stillinger.
    LubachevskyStillinger(crate::ls::LubachevskyStillingerStep<D>),
    /// Force-biased relaxation.
    ForceBiased(force_biased::ForceBiasedStep<D>),
    /// Original Jodrey–Tory.
    OriginalJodreyTory(jodrey_tory::OriginalJodreyToryStep<D>),
    /// Khirevich's Jodrey–Tory variant.
    KhirevichJodreyTory(jodrey_tory::KhirevichJodreyToryStep<D>),
    /// Monte Carlo densification.
    MonteCarlo(monte_carlo::MonteCarloStep<D>),
    /// Nonlinear conjugate-gradient energy minimisation.
    ConjugateGradient(conjugate_gradient::EnergyMinimizationStep<D>),
    /// Closest-jamming diameter growth.
    ClosestJamming(closest_jamming::ClosestJammingStep<D>),
}

impl<const D: usize> StepEnum<D> {
    /// Wires the engine selected by the generation config, the same way
    /// for every algorithm: a cell list under a Verlet overlay under the
    /// engine-specific provider.
    #[must_use]
    pub fn from_config(system: &SystemConfig<D>, generation: &GenerationConfig) -> Self {
        let periodic_box = PeriodicBox::new(system.box_size);
        match generation.algorithm {
            Algorithm::LubachevskyStillingerSimple | Algorithm::LubachevskyStillingerGradual => {
                Self::LubachevskyStillinger(crate::ls::LubachevskyStillingerStep::new(
                    periodic_box,
                    generation.clone(),
                ))
            }
            Algorithm::ForceBiased => Self::ForceBiased(force_biased::ForceBiasedStep::new(
                periodic_box,
                generation.clone(),
            )),
            Algorithm::OriginalJodreyTory => Self::OriginalJodreyTory(
                jodrey_tory::OriginalJodreyToryStep::new(periodic_box, generation.clone()),
            ),
            Algorithm::KhirevichJodreyTory => Self::KhirevichJodreyTory(
                jodrey_tory::KhirevichJodreyToryStep::new(periodic_box, generation.clone()),
            ),
            Algorithm::MonteCarlo => Self::MonteCarlo(monte_carlo::MonteCarloStep::new(
                periodic_box,
                generation.clone(),
            )),
            Algorithm::ConjugateGradient => Self::ConjugateGradient(
                conjugate_gradient::EnergyMinimizationStep::new(periodic_box, generation.clone()),
            ),
            Algorithm::ClosestJamming => Self::ClosestJamming(
                closest_jamming::ClosestJammingStep::new(periodic_box, generation.clone()),
            ),
        }
    }
}

// The const-generic parameter keeps `enum_dispatch` out; the dispatch is
// written out instead.
macro_rules! dispatch {
    ($self:expr, $step:ident => $body:expr) => {
        match $self {
            StepEnum::LubachevskyStillinger($step) => $body,
            StepEnum::ForceBiased($step) => $body,
            StepEnum::OriginalJodreyTory($step) => $body,
            StepEnum::KhirevichJodreyTory($step) => $body,
            StepEnum::MonteCarlo($step) => $body,
            StepEnum::ConjugateGradient($step) => $body,
            StepEnum::ClosestJamming($step) => $body,
        }
    };
}

impl<const D: usize> PackingStep<D> for StepEnum<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()> {
        dispatch!(self, step => step.set_particles(packing, rng))
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()> {
        dispatch!(self, step => step.displace_particles(packing, rng))
    }

    fn should_continue(&self) -> bool {
        dispatch!(self, step => step.should_continue())
    }

    fn inner_diameter_ratio(&self) -> f64 {
        dispatch!(self, step => step.inner_diameter_ratio())
    }

    fn outer_diameter_ratio(&self) -> f64 {
        dispatch!(self, step => step.outer_diameter_ratio())
    }

    fn is_outer_diameter_changing(&self) -> bool {
        dispatch!(self, step => step.is_outer_diameter_changing())
    }

    fn can_overcome_theoretical_density(&self) -> bool {
        dispatch!(self, step => step.can_overcome_theoretical_density())
    }

    fn reset(&mut self, packing: &mut Packing<D>) -> Result<()> {
        dispatch!(self, step => step.reset(packing))
    }
}
