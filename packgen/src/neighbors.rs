//! The neighbor-provider protocol shared by the spatial indexes.

use crate::math::{PeriodicBox, Vector};
use crate::particle::Packing;

/// Supplier of candidate interaction partners for particles and points.
///
/// Mutations of the packing must be bracketed: call
/// [`NeighborProvider::start_move`] with the particle still at its old
/// position, change the coordinates, then call
/// [`NeighborProvider::end_move`]. Between brackets no other query may run,
/// and no provider caches survive the bracket in a stale state.
pub trait NeighborProvider<const D: usize> {
    /// Rebuilds the index for a new packing. Any previously cached state is
    /// discarded.
    fn set_particles(&mut self, packing: &Packing<D>);

    /// Returns the candidate neighbors of a particle, excluding the
    /// particle itself.
    fn neighbors_of(&mut self, packing: &Packing<D>, index: usize) -> &[usize];

    /// Returns the candidate neighbors of a free point.
    fn neighbors_of_point(&mut self, point: &Vector<D>) -> &[usize];

    /// Announces that the particle `index` is about to move.
    fn start_move(&mut self, packing: &Packing<D>, index: usize);

    /// Completes the move announced by the last
    /// [`NeighborProvider::start_move`]; the packing already holds the new
    /// coordinates.
    fn end_move(&mut self, packing: &Packing<D>, index: usize);

    /// Returns the time until a ray starting at `point` leaves the region
    /// within which the cached neighbor information of particle `index`
    /// stays valid, or a negative value if it never does.
    fn time_to_update_boundary(
        &self,
        packing: &Packing<D>,
        index: usize,
        point: &Vector<D>,
        velocity: &Vector<D>,
    ) -> f64;

    /// Returns the periodic box the provider indexes.
    fn periodic_box(&self) -> &PeriodicBox<D>;
}
