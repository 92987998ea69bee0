//! The two Jodrey–Tory relaxation variants: the original 1985 scheme and
//! the variant from S. Khirevich's dissertation. Both repulse only the
//! single closest pair per iteration.

use crate::cell_list::CellList;
use crate::closest_pair::ClosestPairTracker;
use crate::config::GenerationConfig;
use crate::error::{Error, Result};
use crate::math::PeriodicBox;
use crate::particle::Packing;
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use rand_pcg::Pcg64;
use tracing::info;

type Tracker<const D: usize> = ClosestPairTracker<D, VerletList<D, CellList<D>>>;

/// Moves one particle of the closest pair away from the other, preserving
/// the pair's center of mass via the partner's displacement factor.
fn repulse_pair<const D: usize>(
    base: &BaseStep<D>,
    tracker: &mut Tracker<D>,
    packing: &mut Packing<D>,
    first: usize,
    second: usize,
    factor_of: impl Fn(&Packing<D>, usize, usize) -> f64,
) {
    // Snapshots: both displacements are computed from the pre-move pair.
    let first_center = packing[first].center;
    let second_center = packing[second].center;

    for (mover, partner, partner_center) in
        [(first, second, second_center), (second, first, first_center)]
    {
        if packing[mover].immobile {
            continue;
        }
        let mover_center = if mover == first { first_center } else { second_center };
        // Work on the partner's closest periodic image so the pair is
        // pushed apart, not across the box.
        let partner_image = base
            .periodic_box
            .closest_periodic_image(&mover_center, &partner_center);

        tracker.start_move(packing, mover);
        let factor = factor_of(packing, mover, partner);
        let mut center = mover_center + (mover_center - partner_image) * factor;
        base.periodic_box.wrap(&mut center);
        packing[mover].center = center;
        tracker.end_move(packing, mover);
    }
}

/// Checks that an incremental inner ratio agrees with a rebuilt one.
fn check_reset_consistency(old_inner: f64, new_inner: f64) -> Result<()> {
    if (old_inner - new_inner).abs() > 1e-6 {
        return Err(Error::Convergence(format!(
            "inner ratio changed from {old_inner} to {new_inner} across a rebuild; \
             the incremental closest-pair state went stale"
        )));
    }
    Ok(())
}

/// The original Jodrey–Tory step: mass-weighted pair repulsion and an
/// outer ratio contracting by `0.5^j · rate / N`.
pub struct OriginalJodreyToryStep<const D: usize> {
    base: BaseStep<D>,
    tracker: Tracker<D>,
    closest_first: usize,
    closest_second: usize,
}

impl<const D: usize> OriginalJodreyToryStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let tracker = ClosestPairTracker::new(VerletList::new(CellList::new(periodic_box.clone())));
        Self {
            base: BaseStep::new(periodic_box, generation, true, true),
            tracker,
            closest_first: 0,
            closest_second: 0,
        }
    }

    fn reset_outer_diameter_ratio(&mut self) {
        self.base.outer_diameter_ratio = (self.base.total_volume / self.base.particles_volume)
            .powf(1.0 / f64::from(D as u32));
    }

    fn update_outer_diameter_ratio(&mut self, particle_count: usize) {
        let nominal_porosity = self.base.porosity_at(self.base.outer_diameter_ratio);
        let actual_porosity = self.base.porosity_at(self.base.inner_diameter_ratio);
        let porosity_difference = actual_porosity - nominal_porosity;
        if porosity_difference < 0.0 {
            return;
        }

        let j = (-porosity_difference.log10()).ceil();
        #[allow(clippy::cast_precision_loss)]
        {
            self.base.outer_diameter_ratio -=
                0.5_f64.powf(j) * self.base.generation.contraction_rate / particle_count as f64;
        }
    }
}

impl<const D: usize> PackingStep<D> for OriginalJodreyToryStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.tracker.set_particles(packing);

        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();
        self.reset_outer_diameter_ratio();
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        let (first, second) = (self.closest_first, self.closest_second);
        let inner = self.base.inner_diameter_ratio;
        let outer = self.base.outer_diameter_ratio;
        repulse_pair(
            &self.base,
            &mut self.tracker,
            packing,
            first,
            second,
            |packing, mover, partner| {
                // The repulsion preserves the pair's center of mass, which
                // handles polydispersity naturally.
                let mover_mass = packing[mover].diameter.powi(3);
                let partner_mass = packing[partner].diameter.powi(3);
                partner_mass / (mover_mass + partner_mass) * (outer - inner) / inner
            },
        );

        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();

        self.update_outer_diameter_ratio(packing.len());
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

    fn reset(&mut self, packing: &mut Packing<D>) -> Result<()> {
        info!("rebuilding the closest-pair state");
        let old_inner = self.base.inner_diameter_ratio;

        self.tracker.set_particles(packing);
        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        self.base.inner_diameter_ratio = closest.normalized_distance_squared.sqrt();

        check_reset_consistency(old_inner, self.base.inner_diameter_ratio)?;
        self.reset_outer_diameter_ratio();
        Ok(())
    }
}

/// Khirevich's variant: no outer schedule, repulsion factor
/// `(1 + log10(1 / r_inner)) / r_inner`, and an inner ratio that only ever
/// moves up.
pub struct KhirevichJodreyToryStep<const D: usize> {
    base: BaseStep<D>,
    tracker: Tracker<D>,
    closest_first: usize,
    closest_second: usize,
    repulsion_factor: f64,
}

impl<const D: usize> KhirevichJodreyToryStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let tracker = ClosestPairTracker::new(VerletList::new(CellList::new(periodic_box.clone())));
        Self {
            base: BaseStep::new(periodic_box, generation, false, false),
            tracker,
            closest_first: 0,
            closest_second: 0,
            repulsion_factor: 0.0,
        }
    }

    fn reset_closest_pair_parameters(&mut self, normalized_distance_squared: f64) {
        self.base.inner_diameter_ratio = normalized_distance_squared.sqrt();
        self.repulsion_factor = (1.0 + (1.0 / self.base.inner_diameter_ratio).log10())
            / self.base.inner_diameter_ratio;
    }
}

impl<const D: usize> PackingStep<D> for KhirevichJodreyToryStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.tracker.set_particles(packing);

        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        self.reset_closest_pair_parameters(closest.normalized_distance_squared);
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        let (first, second) = (self.closest_first, self.closest_second);
        let repulsion_factor = self.repulsion_factor;
        repulse_pair(
            &self.base,
            &mut self.tracker,
            packing,
            first,
            second,
            // The mover lands at (r + 1)/2 of itself minus (r - 1)/2 of the
            // partner, which is the same affine map expressed through the
            // pair difference.
            |_, _, _| (repulsion_factor - 1.0) / 2.0,
        );

        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        if self.base.inner_diameter_ratio * self.base.inner_diameter_ratio
            < closest.normalized_distance_squared
        {
            self.reset_closest_pair_parameters(closest.normalized_distance_squared);
        }
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

    fn reset(&mut self, packing: &mut Packing<D>) -> Result<()> {
        info!("rebuilding the closest-pair state");
        let old_inner = self.base.inner_diameter_ratio;

        self.tracker.set_particles(packing);
        let closest = self.tracker.find_closest_pair();
        self.closest_first = closest.first;
        self.closest_second = closest.second;
        self.reset_closest_pair_parameters(closest.normalized_distance_squared);

        check_reset_consistency(old_inner, self.base.inner_diameter_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Vector;
    use crate::particle::Particle;
    use rand::SeedableRng;

    fn overlapping_cluster() -> Packing<3> {
        vec![
            Particle::new(0, 1.0, Vector::from([5.0, 5.0, 5.0])),
            Particle::new(1, 1.0, Vector::from([5.5, 5.0, 5.0])),
            Particle::new(2, 1.0, Vector::from([5.0, 5.6, 5.0])),
            Particle::new(3, 1.0, Vector::from([3.0, 3.0, 3.0])),
        ]
    }

    #[test]
    fn original_variant_pushes_the_closest_pair_apart() {
        let mut packing = overlapping_cluster();
        let generation = GenerationConfig {
            contraction_rate: 0.1,
            ..GenerationConfig::default()
        };
        let mut step = OriginalJodreyToryStep::new(PeriodicBox::new([10.0; 3]), generation);
        let mut rng = Pcg64::seed_from_u64(4);

        step.set_particles(&mut packing, &mut rng).unwrap();
        let initial_inner = step.inner_diameter_ratio();
        assert!(initial_inner < 1.0);

        let mut iterations = 0;
        while step.should_continue() && iterations < 20_000 {
            step.displace_particles(&mut packing, &mut rng).unwrap();
            iterations += 1;
        }

        assert!(step.inner_diameter_ratio() > initial_inner);
        // The incremental state survives a rebuild.
        assert!(step.reset(&mut packing).is_ok());
    }

    #[test]
    fn khirevich_variant_inner_ratio_never_decreases() {
        let mut packing = overlapping_cluster();
        let mut step = KhirevichJodreyToryStep::new(
            PeriodicBox::new([10.0; 3]),
            GenerationConfig::default(),
        );
        let mut rng = Pcg64::seed_from_u64(6);

        step.set_particles(&mut packing, &mut rng).unwrap();
        let mut previous = step.inner_diameter_ratio();
        for _ in 0..500 {
            if !step.should_continue() {
                break;
            }
            step.displace_particles(&mut packing, &mut rng).unwrap();
            assert!(step.inner_diameter_ratio() >= previous);
            previous = step.inner_diameter_ratio();
        }
        assert!(previous > 0.5);
    }
}
