//! Periodic-box geometry: minimum-image distances and boundary wrapping.

use crate::particle::Particle;
use nalgebra::SVector;

/// Position, displacement or velocity in `D`-dimensional space.
pub type Vector<const D: usize> = SVector<f64, D>;

/// Fully periodic axis-aligned box with positive extent on each axis.
///
/// All pair distances in the crate go through [`PeriodicBox::distance`], so
/// the minimum-image convention — each component of a distance vector is
/// reduced to `(-L/2, L/2]` — holds everywhere.
#[derive(Clone, Debug)]
pub struct PeriodicBox<const D: usize> {
    size: Vector<D>,
    half_size: Vector<D>,
}

impl<const D: usize> PeriodicBox<D> {
    /// Creates a box with the given extent per axis.
    ///
    /// # Panics
    ///
    /// Panics if any extent is not positive; configurations are validated
    /// before a box is ever built, so this is a logic error.
    #[must_use]
    pub fn new(size: [f64; D]) -> Self {
        assert!(size.iter().all(|&l| l > 0.0), "box extents must be positive");
        let size = Vector::from(size);
        Self {
            size,
            half_size: size * 0.5,
        }
    }

    /// Returns the box extent.
    #[must_use]
    pub const fn size(&self) -> &Vector<D> {
        &self.size
    }

    /// Returns the box volume.
    #[must_use]
    pub fn volume(&self) -> f64 {
        self.size.iter().product()
    }

    /// Returns the minimum-image vector pointing from `from` to `to`.
    #[must_use]
    pub fn distance(&self, to: &Vector<D>, from: &Vector<D>) -> Vector<D> {
        let mut difference = to - from;
        for i in 0..D {
            if difference[i] > self.half_size[i] {
                difference[i] -= self.size[i];
            }
            if difference[i] < -self.half_size[i] {
                difference[i] += self.size[i];
            }
        }
        difference
    }

    /// Returns the squared minimum-image distance between two points.
    #[must_use]
    pub fn distance_squared(&self, first: &Vector<D>, second: &Vector<D>) -> f64 {
        self.distance(first, second).norm_squared()
    }

    /// Returns the squared center distance of a pair divided by the squared
    /// mean radius sum. Values of at most one mean overlap or contact.
    #[must_use]
    pub fn normalized_distance_squared(
        &self,
        first: &Particle<D>,
        second: &Particle<D>,
    ) -> f64 {
        let diameter_sum = first.diameter + second.diameter;
        self.distance_squared(&first.center, &second.center) * 4.0 / (diameter_sum * diameter_sum)
    }

    /// Returns the normalized center distance of a pair.
    #[must_use]
    pub fn normalized_distance(&self, first: &Particle<D>, second: &Particle<D>) -> f64 {
        self.normalized_distance_squared(first, second).sqrt()
    }

    /// Wraps a point periodically so that every coordinate lies in
    /// `[0, L_i)`.
    pub fn wrap(&self, point: &mut Vector<D>) {
        for i in 0..D {
            point[i] = point[i].rem_euclid(self.size[i]);
            // rem_euclid of a tiny negative value may round up to L itself
            if point[i] >= self.size[i] {
                point[i] -= self.size[i];
            }
        }
    }

    /// Returns the periodic image of `movable` closest to `stable`.
    #[must_use]
    pub fn closest_periodic_image(&self, stable: &Vector<D>, movable: &Vector<D>) -> Vector<D> {
        stable - self.distance(stable, movable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn distance_uses_minimum_image() {
        let periodic_box = PeriodicBox::new([10.0, 10.0, 10.0]);
        let a = Vector::from([9.5, 5.0, 5.0]);
        let b = Vector::from([0.5, 5.0, 5.0]);

        let d = periodic_box.distance(&a, &b);
        assert_approx_eq!(f64, d[0], -1.0, ulps = 2);
        assert_approx_eq!(f64, d[1], 0.0, ulps = 2);
        assert_approx_eq!(f64, periodic_box.distance_squared(&a, &b), 1.0, ulps = 2);
    }

    #[test]
    fn normalized_distance_of_touching_pair_is_one() {
        let periodic_box = PeriodicBox::new([10.0, 10.0, 10.0]);
        let first = Particle::new(0, 0.6, Vector::from([1.0, 1.0, 1.0]));
        let second = Particle::new(1, 1.4, Vector::from([2.0, 1.0, 1.0]));

        assert_approx_eq!(
            f64,
            periodic_box.normalized_distance(&first, &second),
            1.0,
            ulps = 4
        );
    }

    #[test]
    fn wrap_moves_coordinates_into_the_box() {
        let periodic_box = PeriodicBox::new([10.0, 4.0]);
        let mut point = Vector::from([-0.5, 4.5]);
        periodic_box.wrap(&mut point);
        assert_approx_eq!(f64, point[0], 9.5, ulps = 2);
        assert_approx_eq!(f64, point[1], 0.5, ulps = 2);

        let mut boundary = Vector::from([10.0, -1e-18]);
        periodic_box.wrap(&mut boundary);
        assert!(boundary[0] < 10.0);
        assert!(boundary[1] < 4.0);
    }

    #[test]
    fn closest_periodic_image_crosses_the_boundary() {
        let periodic_box = PeriodicBox::new([10.0, 10.0]);
        let stable = Vector::from([9.5, 5.0]);
        let movable = Vector::from([0.5, 5.0]);

        let image = periodic_box.closest_periodic_image(&stable, &movable);
        assert_approx_eq!(f64, image[0], 10.5, ulps = 2);
        assert_approx_eq!(f64, image[1], 5.0, ulps = 2);
    }
}
