//! Event records of the event-driven simulator.

use crate::math::Vector;

/// What happens to a particle at its next scheduled instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    /// No event scheduled; the sentinel time is `+inf`.
    Invalid,
    /// Plain synchronisation of the particle position.
    Move,
    /// Elastic collision with a neighbor.
    Collision {
        /// The collision partner.
        neighbor: usize,
    },
    /// Periodic wrap across a box wall.
    WallTransfer {
        /// Index of the crossed wall.
        wall: usize,
    },
    /// The particle leaves its Verlet sphere; the list must be rebuilt.
    NeighborTransfer,
    /// The particle reaches the inscribed sphere of its Voronoi cell.
    VoronoiInscribedSphereTransfer,
    /// The particle reaches a face of its Voronoi cell.
    VoronoiTransfer {
        /// Index of the reached face.
        face: usize,
    },
}

/// A scheduled event of one particle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Event {
    /// Event kind and payload.
    pub kind: EventKind,
    /// Owning particle.
    pub particle: usize,
    /// Scheduled absolute time.
    pub time: f64,
}

impl Event {
    /// The never-happening event.
    #[must_use]
    pub const fn invalid(particle: usize) -> Self {
        Self {
            kind: EventKind::Invalid,
            particle,
            time: f64::INFINITY,
        }
    }

    /// Returns the collision partner, if this is a collision.
    #[must_use]
    pub const fn collision_partner(&self) -> Option<usize> {
        match self.kind {
            EventKind::Collision { neighbor } => Some(neighbor),
            _ => None,
        }
    }
}

/// A particle of the event-driven simulation.
///
/// `position` is the physical position at `last_event_time`; the position
/// at any later instant is obtained by linear extrapolation along
/// `velocity`.
#[derive(Clone, Debug)]
pub struct MovingParticle<const D: usize> {
    /// Position at `last_event_time`.
    pub position: Vector<D>,
    /// Current velocity.
    pub velocity: Vector<D>,
    /// Time the position was last synchronised.
    pub last_event_time: f64,
    /// The soonest event of this particle.
    pub next_event: Event,
}

impl<const D: usize> MovingParticle<D> {
    /// Creates a resting particle with no scheduled event.
    #[must_use]
    pub fn new(index: usize, position: Vector<D>) -> Self {
        Self {
            position,
            velocity: Vector::zeros(),
            last_event_time: 0.0,
            next_event: Event::invalid(index),
        }
    }

    /// Returns the position extrapolated to `time`.
    #[must_use]
    pub fn position_at(&self, time: f64) -> Vector<D> {
        self.position + self.velocity * (time - self.last_event_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extrapolation_follows_the_velocity() {
        let mut particle = MovingParticle::<2>::new(0, Vector::from([1.0, 2.0]));
        particle.velocity = Vector::from([0.5, -1.0]);
        particle.last_event_time = 1.0;

        let position = particle.position_at(3.0);
        float_cmp::assert_approx_eq!(f64, position[0], 2.0, ulps = 2);
        float_cmp::assert_approx_eq!(f64, position[1], 0.0, ulps = 2);
    }

    #[test]
    fn invalid_event_is_scheduled_at_infinity() {
        let event = Event::invalid(3);
        assert_eq!(event.particle, 3);
        assert!(event.time.is_infinite());
        assert_eq!(event.collision_partner(), None);
    }
}
