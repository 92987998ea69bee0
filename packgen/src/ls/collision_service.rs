//! Collision prediction and resolution for growing spheres.

use crate::ls::events::MovingParticle;
use crate::math::{PeriodicBox, Vector};

/// Solves pair collisions while every diameter grows linearly in time: the
/// effective radius sum of a pair at time `t` is
/// `(d_i + d_j) / 2 · (ratio_0 + γ t)`.
#[derive(Clone, Copy, Debug)]
pub struct GrowingCollisions {
    initial_ratio: f64,
    growth_rate: f64,
}

impl GrowingCollisions {
    /// Creates the solver with the diameter ratio at time zero and the
    /// ratio growth rate γ.
    #[must_use]
    pub const fn new(initial_ratio: f64, growth_rate: f64) -> Self {
        Self {
            initial_ratio,
            growth_rate,
        }
    }

    /// Returns the ratio growth rate γ.
    #[must_use]
    pub const fn growth_rate(&self) -> f64 {
        self.growth_rate
    }

    /// Replaces the ratio growth rate, keeping the diameter ratio
    /// continuous at `current_time`.
    pub fn set_growth_rate(&mut self, current_time: f64, growth_rate: f64) {
        self.initial_ratio = self.ratio_at(current_time) - growth_rate * current_time;
        self.growth_rate = growth_rate;
    }

    /// Returns the diameter ratio at `time`.
    #[must_use]
    pub fn ratio_at(&self, time: f64) -> f64 {
        self.initial_ratio + self.growth_rate * time
    }

    /// Returns the earliest absolute collision time of two moving, growing
    /// particles at or after `current_time`, or a negative value when they
    /// never collide.
    #[must_use]
    pub fn collision_time<const D: usize>(
        &self,
        periodic_box: &PeriodicBox<D>,
        current_time: f64,
        first_diameter: f64,
        second_diameter: f64,
        first: &MovingParticle<D>,
        second: &MovingParticle<D>,
    ) -> f64 {
        let half_sum = 0.5 * (first_diameter + second_diameter);
        let position_difference = periodic_box.distance(
            &first.position_at(current_time),
            &second.position_at(current_time),
        );
        let velocity_difference = first.velocity - second.velocity;

        let radius_sum = half_sum * self.ratio_at(current_time);
        let radius_rate = half_sum * self.growth_rate;

        // |r + v τ|² = (R + Ṙ τ)², i.e. a τ² + 2 b τ + c = 0.
        let a = velocity_difference.norm_squared() - radius_rate * radius_rate;
        let b = position_difference.dot(&velocity_difference) - radius_sum * radius_rate;
        let c = position_difference.norm_squared() - radius_sum * radius_sum;

        if c <= 0.0 {
            // Already touching or overlapping (roundoff): collide now if
            // the gap keeps closing.
            return if b < 0.0 { current_time } else { -1.0 };
        }

        let delay = if a.abs() < f64::EPSILON * (velocity_difference.norm_squared() + 1.0) {
            // Degenerate quadratic: the approach and growth rates cancel.
            if b < 0.0 {
                -c / (2.0 * b)
            } else {
                return -1.0;
            }
        } else {
            let discriminant = b * b - a * c;
            if discriminant < 0.0 {
                return -1.0;
            }
            let root = discriminant.sqrt();
            let near = (-b - root) / a;
            let far = (-b + root) / a;
            let mut delay = f64::INFINITY;
            for candidate in [near.min(far), near.max(far)] {
                if candidate >= 0.0 {
                    delay = candidate;
                    break;
                }
            }
            if delay.is_infinite() {
                return -1.0;
            }
            delay
        };
        current_time + delay
    }

    /// Post-collision velocities of an equal-mass pair in contact at
    /// `current_time`: the normal velocity components are exchanged, and
    /// each particle receives an extra `γ (d_i + d_j) / 2` along the
    /// contact normal so that collisions keep doing work on a growing
    /// packing.
    #[must_use]
    pub fn velocities_after_collision<const D: usize>(
        &self,
        periodic_box: &PeriodicBox<D>,
        current_time: f64,
        first_diameter: f64,
        second_diameter: f64,
        first: &MovingParticle<D>,
        second: &MovingParticle<D>,
    ) -> (Vector<D>, Vector<D>) {
        let half_sum = 0.5 * (first_diameter + second_diameter);
        // Normal pointing from the first particle to the second.
        let normal = periodic_box
            .distance(
                &second.position_at(current_time),
                &first.position_at(current_time),
            )
            .normalize();

        let relative_normal = (second.velocity - first.velocity).dot(&normal);
        let growth_push = self.growth_rate * half_sum;

        let first_velocity = first.velocity + normal * (relative_normal - growth_push);
        let second_velocity = second.velocity - normal * (relative_normal - growth_push);
        (first_velocity, second_velocity)
    }
}
