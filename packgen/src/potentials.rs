//! Pair potentials driving the relaxation engines.

use enum_dispatch::enum_dispatch;

/// Soft pair interaction between two spheres at center distance `distance`.
///
/// Both operations return `None` once the pair separates beyond contact,
/// i.e. when `distance >= (d_i + d_j) / 2` (except for potentials with an
/// attractive tail, which stay defined everywhere).
#[enum_dispatch]
pub trait PairPotential {
    /// Potential energy of the pair, `None` without overlap.
    fn energy(&self, first_diameter: f64, second_diameter: f64, distance: f64) -> Option<f64>;

    /// Magnitude of the repulsive force along the line of centers, positive
    /// for overlap; `None` without overlap.
    fn repulsion_force(
        &self,
        first_diameter: f64,
        second_diameter: f64,
        distance: f64,
    ) -> Option<f64>;
}

/// `(1 - r / s)^alpha` overlap potential with `s` the mean radius sum; from
/// Chaudhury, Berthier and Sastry (2010).
#[derive(Clone, Copy, Debug)]
pub struct Harmonic {
    energy_power: f64,
}

impl Harmonic {
    /// Creates the potential with exponent `energy_power`.
    #[must_use]
    pub const fn new(energy_power: f64) -> Self {
        Self { energy_power }
    }
}

impl PairPotential for Harmonic {
    fn energy(&self, first_diameter: f64, second_diameter: f64, distance: f64) -> Option<f64> {
        let half_sum = 0.5 * (first_diameter + second_diameter);
        let ratio = distance / half_sum;
        if ratio >= 1.0 {
            return None;
        }
        let energy = if self.energy_power == 2.0 {
            (1.0 - ratio) * (1.0 - ratio)
        } else {
            (1.0 - ratio).powf(self.energy_power)
        };
        Some(energy)
    }

    fn repulsion_force(
        &self,
        first_diameter: f64,
        second_diameter: f64,
        distance: f64,
    ) -> Option<f64> {
        let half_sum = 0.5 * (first_diameter + second_diameter);
        let ratio = distance / half_sum;
        if ratio >= 1.0 {
            return None;
        }
        let force = if self.energy_power == 2.0 {
            1.0 - ratio
        } else {
            (1.0 - ratio).powf(self.energy_power - 1.0)
        };
        Some(self.energy_power * force / half_sum)
    }
}

/// Force form of the force-biased algorithm, Bezrukov, Bargiel and Stoyan
/// (2002): `d_i d_j (1 - r^2 / s^2)`. No closed-form energy is needed.
#[derive(Clone, Copy, Debug, Default)]
pub struct Bezrukov;

impl PairPotential for Bezrukov {
    fn energy(&self, _first_diameter: f64, _second_diameter: f64, _distance: f64) -> Option<f64> {
        unimplemented!("the force-biased engine only evaluates forces")
    }

    fn repulsion_force(
        &self,
        first_diameter: f64,
        second_diameter: f64,
        distance: f64,
    ) -> Option<f64> {
        let half_sum = 0.5 * (first_diameter + second_diameter);
        let ratio = distance / half_sum;
        if ratio >= 1.0 {
            return None;
        }
        Some(first_diameter * second_diameter * (1.0 - ratio * ratio))
    }
}

/// Overlap repulsion scaled by a large normalizer plus a harmonic
/// attraction outside contact. The attraction is diameter-independent so
/// large and small particles contribute equally to coordination numbers.
#[derive(Clone, Copy, Debug)]
pub struct ImpermeableAttraction {
    repulsion: Harmonic,
}

impl ImpermeableAttraction {
    // 1e6 is too small: shrinking the inner diameter by 1e-6 would pay off
    // for the minimizer even after the multiplication.
    const IMPERMEABLE_NORMALIZER: f64 = 1e10;

    /// Wraps the repulsive core.
    #[must_use]
    pub const fn new(repulsion: Harmonic) -> Self {
        Self { repulsion }
    }
}

impl PairPotential for ImpermeableAttraction {
    fn energy(&self, first_diameter: f64, second_diameter: f64, distance: f64) -> Option<f64> {
        if let Some(energy) = self.repulsion.energy(first_diameter, second_diameter, distance) {
            return Some(energy * Self::IMPERMEABLE_NORMALIZER);
        }
        let half_sum = 0.5 * (first_diameter + second_diameter);
        Some((distance - half_sum) * (distance - half_sum))
    }

    fn repulsion_force(
        &self,
        first_diameter: f64,
        second_diameter: f64,
        distance: f64,
    ) -> Option<f64> {
        if let Some(force) =
            self.repulsion
                .repulsion_force(first_diameter, second_diameter, distance)
        {
            return Some(force * Self::IMPERMEABLE_NORMALIZER);
        }
        // Negative outside contact: the pair is pulled together.
        let half_sum = 0.5 * (first_diameter + second_diameter);
        Some(half_sum - distance)
    }
}

/// The closed family of pair potentials the engines are wired with.
#[enum_dispatch(PairPotential)]
#[derive(Clone, Copy, Debug)]
pub enum PotentialEnum {
    /// Harmonic overlap potential.
    Harmonic,
    /// Bezrukov force-biased force.
    Bezrukov,
    /// Impermeable repulsion with attractive tail.
    ImpermeableAttraction,
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn harmonic_vanishes_at_contact() {
        let potential = Harmonic::new(2.0);
        assert!(potential.energy(1.0, 1.0, 1.0).is_none());
        assert!(potential.repulsion_force(1.0, 1.0, 1.2).is_none());
    }

    #[test]
    fn harmonic_energy_and_force_at_half_overlap() {
        let potential = Harmonic::new(2.0);
        // Mean radius sum 1, distance 0.5.
        assert_approx_eq!(f64, potential.energy(1.0, 1.0, 0.5).unwrap(), 0.25, ulps = 2);
        assert_approx_eq!(
            f64,
            potential.repulsion_force(1.0, 1.0, 0.5).unwrap(),
            1.0,
            ulps = 2
        );
    }

    #[test]
    fn bezrukov_force_scales_with_diameters() {
        let potential = Bezrukov;
        // Mean radius sum 1.5, distance 0.75, ratio 0.5.
        let force = potential.repulsion_force(1.0, 2.0, 0.75).unwrap();
        assert_approx_eq!(f64, force, 2.0 * 0.75, ulps = 4);
        assert!(potential.repulsion_force(1.0, 2.0, 1.5).is_none());
    }

    #[test]
    fn impermeable_attraction_pulls_separated_pairs() {
        let potential = ImpermeableAttraction::new(Harmonic::new(2.0));

        let inside = potential.repulsion_force(1.0, 1.0, 0.5).unwrap();
        assert!(inside > 1e9);

        let outside = potential.repulsion_force(1.0, 1.0, 1.5).unwrap();
        assert_approx_eq!(f64, outside, -0.5, ulps = 2);
        assert_approx_eq!(f64, potential.energy(1.0, 1.0, 1.5).unwrap(), 0.25, ulps = 2);
    }
}
