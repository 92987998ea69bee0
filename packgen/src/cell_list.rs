//! Uniform cell-list spatial index.
//!
//! Unusually, each cell stores the particles of its whole 3^D periodic
//! neighborhood, so a neighbor query is a single slice lookup instead of a
//! merge of 27 lists. Moving a particle across a cell boundary touches
//! O(3^D) cells, but crossings are rare in the dense regimes this index
//! serves. See Raschdorf and Kolonko (2011) for the trade-off.

use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::{max_diameter, Packing};
use rustc_hash::FxHashMap;

#[derive(Clone, Debug, Default)]
struct Cell {
    /// Particles whose center lies in this cell or any neighbor cell.
    particles: Vec<usize>,
    /// Linear indices of the 3^D neighbor cells, deduplicated.
    neighbor_cells: Vec<usize>,
    /// `position_in_list[i]` is the index of particle `i` inside
    /// `particles`, for O(1) removal.
    position_in_list: FxHashMap<usize, usize>,
}

impl Cell {
    fn insert(&mut self, particle: usize) {
        self.particles.push(particle);
        self.position_in_list.insert(particle, self.particles.len() - 1);
    }

    fn remove(&mut self, particle: usize) {
        let position = self.position_in_list.remove(&particle).expect("particle not in cell");
        let last = self.particles.len() - 1;
        if position < last {
            let moved = self.particles[last];
            self.particles.swap(position, last);
            self.position_in_list.insert(moved, position);
        }
        self.particles.pop();
    }
}

/// Cell-list neighbor index over a periodic box.
#[derive(Clone, Debug)]
pub struct CellList<const D: usize> {
    periodic_box: PeriodicBox<D>,
    cells: Vec<Cell>,
    cell_counts: [usize; D],
    cell_size: Vector<D>,
    moved_particle: usize,
    previous_cell: [usize; D],
}

impl<const D: usize> CellList<D> {
    /// Creates an empty index; call
    /// [`NeighborProvider::set_particles`] before querying.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>) -> Self {
        Self {
            periodic_box,
            cells: Vec::new(),
            cell_counts: [1; D],
            cell_size: Vector::zeros(),
            moved_particle: usize::MAX,
            previous_cell: [0; D],
        }
    }

    fn initialize_cell_dimensions(&mut self, packing: &Packing<D>) {
        let cutoff = max_diameter(packing);
        for axis in 0..D {
            let extent = self.periodic_box.size()[axis];
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let count = ((extent / cutoff).floor() as usize).max(1);
            self.cell_counts[axis] = count;
            #[allow(clippy::cast_precision_loss)]
            {
                self.cell_size[axis] = extent / count as f64;
            }
        }
    }

    fn initialize_cells(&mut self) {
        let total: usize = self.cell_counts.iter().product();
        self.cells = vec![Cell::default(); total];

        for linear in 0..total {
            let lattice = self.unravel(linear);
            let mut neighbor_cells = self.neighborhood_of(&lattice);
            neighbor_cells.sort_unstable();
            // Neighbor indices repeat only when some axis has fewer than
            // three cells.
            neighbor_cells.dedup();
            self.cells[linear].neighbor_cells = neighbor_cells;
        }
    }

    fn spread_particles(&mut self, packing: &Packing<D>) {
        for particle in packing {
            let home = self.ravel(&self.cell_of(&particle.center));
            let neighborhood = self.cells[home].neighbor_cells.clone();
            for cell_index in neighborhood {
                self.cells[cell_index].insert(particle.index);
            }
        }
    }

    fn neighborhood_of(&self, lattice: &[usize; D]) -> Vec<usize> {
        let mut result = Vec::with_capacity(3_usize.pow(D as u32));
        let mut offsets = [-1_isize; D];
        loop {
            let mut neighbor = [0_usize; D];
            for axis in 0..D {
                #[allow(clippy::cast_possible_wrap)]
                let count = self.cell_counts[axis] as isize;
                let shifted = (lattice[axis] as isize + offsets[axis]).rem_euclid(count);
                #[allow(clippy::cast_sign_loss)]
                {
                    neighbor[axis] = shifted as usize;
                }
            }
            result.push(self.ravel(&neighbor));

            // Advance the offset counter in {-1, 0, 1}^D.
            let mut axis = 0;
            loop {
                if axis == D {
                    return result;
                }
                offsets[axis] += 1;
                if offsets[axis] <= 1 {
                    break;
                }
                offsets[axis] = -1;
                axis += 1;
            }
        }
    }

    fn ravel(&self, lattice: &[usize; D]) -> usize {
        lattice
            .iter()
            .zip(&self.cell_counts)
            .fold(0, |acc, (&i, &count)| acc * count + i)
    }

    fn unravel(&self, mut linear: usize) -> [usize; D] {
        let mut lattice = [0; D];
        for (value, &count) in lattice.iter_mut().zip(&self.cell_counts).rev() {
            *value = linear % count;
            linear /= count;
        }
        lattice
    }

    /// Maps a point to its owning cell, clamping roundoff spill at the box
    /// boundary into the outermost cells.
    fn cell_of(&self, point: &Vector<D>) -> [usize; D] {
        let mut lattice = [0; D];
        for axis in 0..D {
            let relative = (point[axis] / self.cell_size[axis]).floor();
            #[allow(clippy::cast_possible_truncation)]
            let index = relative as isize;
            lattice[axis] = index.clamp(0, self.cell_counts[axis] as isize - 1) as usize;
        }
        lattice
    }

    /// Returns the cell counts along each axis.
    #[must_use]
    pub fn cell_counts(&self) -> &[usize; D] {
        &self.cell_counts
    }
}

impl<const D: usize> NeighborProvider<D> for CellList<D> {
    fn set_particles(&mut self, packing: &Packing<D>) {
        self.initialize_cell_dimensions(packing);
        self.initialize_cells();
        self.spread_particles(packing);
    }

    fn neighbors_of(&mut self, packing: &Packing<D>, index: usize) -> &[usize] {
        let cell_index = self.ravel(&self.cell_of(&packing[index].center));
        let cell = &mut self.cells[cell_index];

        // Swap the particle itself to the list tail and return the slice in
        // front of it; the particle stays a member of the cell.
        let position = cell.position_in_list[&index];
        let last = cell.particles.len() - 1;
        if position < last {
            let moved = cell.particles[last];
            cell.particles.swap(position, last);
            cell.position_in_list.insert(moved, position);
            cell.position_in_list.insert(index, last);
        }
        &cell.particles[..last]
    }

    fn neighbors_of_point(&mut self, point: &Vector<D>) -> &[usize] {
        let cell_index = self.ravel(&self.cell_of(point));
        &self.cells[cell_index].particles
    }

    fn start_move(&mut self, packing: &Packing<D>, index: usize) {
        self.moved_particle = index;
        self.previous_cell = self.cell_of(&packing[index].center);
    }

    fn end_move(&mut self, packing: &Packing<D>, index: usize) {
        debug_assert_eq!(index, self.moved_particle);
        let current = self.cell_of(&packing[index].center);
        if current == self.previous_cell {
            return;
        }

        let old_home = self.ravel(&self.previous_cell);
        for cell_index in self.cells[old_home].neighbor_cells.clone() {
            self.cells[cell_index].remove(index);
        }

        let new_home = self.ravel(&current);
        for cell_index in self.cells[new_home].neighbor_cells.clone() {
            self.cells[cell_index].insert(index);
        }
    }

    fn time_to_update_boundary(
        &self,
        _packing: &Packing<D>,
        _index: usize,
        point: &Vector<D>,
        velocity: &Vector<D>,
    ) -> f64 {
        let lattice = self.cell_of(point);
        let mut min_vertex = Vector::<D>::zeros();
        for axis in 0..D {
            #[allow(clippy::cast_precision_loss)]
            {
                min_vertex[axis] = lattice[axis] as f64 * self.cell_size[axis];
            }
        }
        let walls = crate::collisions::BoxWalls::new(&min_vertex, &self.cell_size);
        let (time, _) = crate::collisions::find_wall_intersection(point, velocity, &walls, None);
        time
    }

    fn periodic_box(&self) -> &PeriodicBox<D> {
        &self.periodic_box
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;

    fn packing_of(centers: &[[f64; 3]]) -> Packing<3> {
        centers
            .iter()
            .enumerate()
            .map(|(index, &center)| Particle::new(index, 1.0, Vector::from(center)))
            .collect()
    }

    fn sorted_neighbors(cell_list: &mut CellList<3>, packing: &Packing<3>, index: usize) -> Vec<usize> {
        let mut neighbors = cell_list.neighbors_of(packing, index).to_vec();
        neighbors.sort_unstable();
        neighbors
    }

    #[test]
    fn close_particles_see_each_other() {
        let packing = packing_of(&[[1.0, 1.0, 1.0], [1.8, 1.0, 1.0], [8.0, 8.0, 8.0]]);
        let mut cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        cell_list.set_particles(&packing);

        assert_eq!(cell_list.cell_counts(), &[10, 10, 10]);
        assert!(sorted_neighbors(&mut cell_list, &packing, 0).contains(&1));
        assert!(sorted_neighbors(&mut cell_list, &packing, 1).contains(&0));
        assert!(!sorted_neighbors(&mut cell_list, &packing, 0).contains(&2));
    }

    #[test]
    fn neighbors_across_the_periodic_boundary() {
        let packing = packing_of(&[[0.2, 5.0, 5.0], [9.8, 5.0, 5.0]]);
        let mut cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        cell_list.set_particles(&packing);

        assert_eq!(sorted_neighbors(&mut cell_list, &packing, 0), vec![1]);
        assert_eq!(sorted_neighbors(&mut cell_list, &packing, 1), vec![0]);
    }

    #[test]
    fn incremental_moves_match_a_rebuild() {
        let mut packing = packing_of(&[
            [1.0, 1.0, 1.0],
            [2.5, 1.0, 1.0],
            [5.0, 5.0, 5.0],
            [9.5, 9.5, 9.5],
        ]);
        let mut incremental = CellList::new(PeriodicBox::new([10.0; 3]));
        incremental.set_particles(&packing);

        // Drag particle 0 across several cell boundaries, including a
        // periodic wrap.
        let waypoints = [[3.3, 1.0, 1.0], [6.1, 4.9, 5.2], [9.9, 9.6, 9.4], [0.3, 0.1, 9.8]];
        for waypoint in waypoints {
            incremental.start_move(&packing, 0);
            packing[0].center = Vector::from(waypoint);
            incremental.end_move(&packing, 0);
        }

        let mut rebuilt = CellList::new(PeriodicBox::new([10.0; 3]));
        rebuilt.set_particles(&packing);

        for index in 0..packing.len() {
            assert_eq!(
                sorted_neighbors(&mut incremental, &packing, index),
                sorted_neighbors(&mut rebuilt, &packing, index),
                "neighbor lists diverged for particle {index}"
            );
        }
    }

    #[test]
    fn move_bracket_without_displacement_is_idempotent() {
        let packing = packing_of(&[[1.0, 1.0, 1.0], [1.8, 1.0, 1.0]]);
        let mut cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        cell_list.set_particles(&packing);

        let before = sorted_neighbors(&mut cell_list, &packing, 0);
        cell_list.start_move(&packing, 0);
        cell_list.end_move(&packing, 0);
        assert_eq!(sorted_neighbors(&mut cell_list, &packing, 0), before);
    }

    #[test]
    fn time_to_leave_the_owning_cell() {
        let packing = packing_of(&[[1.5, 1.5, 1.5]]);
        let mut cell_list = CellList::new(PeriodicBox::new([10.0; 3]));
        cell_list.set_particles(&packing);

        let velocity = Vector::from([1.0, 0.0, 0.0]);
        let time =
            cell_list.time_to_update_boundary(&packing, 0, &packing[0].center, &velocity);
        float_cmp::assert_approx_eq!(f64, time, 0.5, ulps = 4);
    }
}
