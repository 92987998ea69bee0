//! Ray intersections with axis-aligned walls and spheres.

use crate::math::Vector;

/// A plane perpendicular to a Cartesian axis.
#[derive(Clone, Copy, Debug)]
pub struct SimplePlane {
    /// Axis the plane is perpendicular to.
    pub axis: usize,
    /// Projection of the outer normal onto the axis, `-1` or `+1`.
    pub outer_normal: f64,
    /// Coordinate of the plane along the axis.
    pub coordinate: f64,
}

/// The `2 D` walls of an axis-aligned box, with opposite-wall lookup.
#[derive(Clone, Debug)]
pub struct BoxWalls<const D: usize> {
    walls: Vec<SimplePlane>,
    opposite: Vec<usize>,
}

impl<const D: usize> BoxWalls<D> {
    /// Builds the walls of the box `[min_vertex, min_vertex + size]`.
    #[must_use]
    pub fn new(min_vertex: &Vector<D>, size: &Vector<D>) -> Self {
        let mut walls = Vec::with_capacity(2 * D);
        let mut opposite = Vec::with_capacity(2 * D);
        for axis in 0..D {
            walls.push(SimplePlane {
                axis,
                outer_normal: 1.0,
                coordinate: min_vertex[axis] + size[axis],
            });
            walls.push(SimplePlane {
                axis,
                outer_normal: -1.0,
                coordinate: min_vertex[axis],
            });
            opposite.push(2 * axis + 1);
            opposite.push(2 * axis);
        }
        Self { walls, opposite }
    }

    /// Returns the walls in axis-major order (outer, inner per axis).
    #[must_use]
    pub fn walls(&self) -> &[SimplePlane] {
        &self.walls
    }

    /// Returns the index of the wall opposite to `wall_index`.
    #[must_use]
    pub fn opposite(&self, wall_index: usize) -> usize {
        self.opposite[wall_index]
    }
}

/// Earliest time at which a ray crosses an axis-aligned plane outwards.
///
/// Periodic shifts can leave a point marginally outside its box. In that
/// case the crossing is forced (`0`) when the velocity also points outwards
/// and suppressed (`-1`) when it points back inside; re-wrapping a point
/// that is already returning would loop forever on the same wall.
#[must_use]
pub fn plane_intersection_time<const D: usize>(
    point: &Vector<D>,
    velocity: &Vector<D>,
    plane: &SimplePlane,
) -> f64 {
    let distance_along_axis = plane.coordinate - point[plane.axis];
    let velocity_along_axis = velocity[plane.axis];
    let distance_along_normal = distance_along_axis * plane.outer_normal;

    if distance_along_normal < 0.0 {
        // Outside the box.
        let outward = velocity_along_axis * plane.outer_normal >= 0.0;
        return if outward { 0.0 } else { -1.0 };
    }
    if distance_along_normal == 0.0 {
        // Exactly on the plane.
        let outward = velocity_along_axis * plane.outer_normal > 0.0;
        return if outward { 0.0 } else { -1.0 };
    }
    if velocity_along_axis == 0.0 {
        return -1.0;
    }
    distance_along_axis / velocity_along_axis
}

/// Finds the earliest wall crossing of a ray, skipping `wall_to_exclude`
/// (the wall just crossed) when it is `Some`.
///
/// Returns `(time, wall_index)`; the time is `f64::INFINITY` when no wall is
/// ever crossed. A ray may intersect the continuation of a wall plane
/// outside the box earlier than the wall it actually leaves through, so all
/// walls are examined.
#[must_use]
pub fn find_wall_intersection<const D: usize>(
    point: &Vector<D>,
    velocity: &Vector<D>,
    walls: &BoxWalls<D>,
    wall_to_exclude: Option<usize>,
) -> (f64, usize) {
    let mut best_time = f64::INFINITY;
    let mut best_wall = usize::MAX;
    for (wall_index, wall) in walls.walls().iter().enumerate() {
        if Some(wall_index) == wall_to_exclude {
            continue;
        }
        let time = plane_intersection_time(point, velocity, wall);
        if time >= 0.0 && time < best_time {
            best_time = time;
            best_wall = wall_index;
        }
    }
    (best_time, best_wall)
}

/// A plane in general position, `normal · x + displacement = 0`.
#[derive(Clone, Debug)]
pub struct Plane<const D: usize> {
    /// Unit normal of the plane.
    pub normal: Vector<D>,
    /// Signed offset of the plane from the origin.
    pub displacement: f64,
}

/// A convex polytope given by its face planes, with the inscribed sphere
/// used for cheap containment checks.
#[derive(Clone, Debug)]
pub struct Polytope<const D: usize> {
    /// Face planes with outward normals.
    pub planes: Vec<Plane<D>>,
    /// Center of the inscribed sphere.
    pub inscribed_center: Vector<D>,
    /// Radius of the inscribed sphere.
    pub inscribed_radius: f64,
}

/// Earliest `t` at which a ray crosses a plane in general position, or `-1`
/// for a parallel ray.
#[must_use]
pub fn general_plane_intersection_time<const D: usize>(
    point: &Vector<D>,
    velocity: &Vector<D>,
    plane: &Plane<D>,
) -> f64 {
    let along_normal = plane.normal.dot(velocity);
    if along_normal == 0.0 {
        return -1.0;
    }
    -(plane.displacement + plane.normal.dot(point)) / along_normal
}

/// Finds the earliest face crossing of a ray leaving a polytope, skipping
/// `face_to_exclude` when it is `Some`. Returns `(time, face_index)` with
/// time `f64::INFINITY` when no face is ever crossed.
#[must_use]
pub fn find_polytope_intersection<const D: usize>(
    point: &Vector<D>,
    velocity: &Vector<D>,
    polytope: &Polytope<D>,
    face_to_exclude: Option<usize>,
) -> (f64, usize) {
    let mut best_time = f64::INFINITY;
    let mut best_face = usize::MAX;
    for (face_index, plane) in polytope.planes.iter().enumerate() {
        if Some(face_index) == face_to_exclude {
            continue;
        }
        let time = general_plane_intersection_time(point, velocity, plane);
        if time > 0.0 && time < best_time {
            best_time = time;
            best_face = face_index;
        }
    }
    (best_time, best_face)
}

/// Earliest `t >= 0` with `|point + t v - center| = radius`, or a negative
/// value when the ray never meets the sphere.
#[must_use]
pub fn sphere_intersection_time<const D: usize>(
    point: &Vector<D>,
    velocity: &Vector<D>,
    center: &Vector<D>,
    radius: f64,
) -> f64 {
    let speed = velocity.norm();
    if speed == 0.0 {
        return -1.0;
    }
    let direction = velocity / speed;
    let to_center = center - point;

    let along = direction.dot(&to_center);
    let discriminant = along * along - to_center.norm_squared() + radius * radius;
    if discriminant < 0.0 {
        return -1.0;
    }

    let root = discriminant.sqrt();
    let mut distance = along - root;
    if distance < 0.0 {
        distance = along + root;
    }
    distance / speed
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::assert_approx_eq;

    #[test]
    fn ray_crosses_the_nearest_wall() {
        let walls = BoxWalls::<2>::new(&Vector::<2>::zeros(), &Vector::from([10.0, 10.0]));
        let point = Vector::from([9.0, 5.0]);
        let velocity = Vector::from([2.0, 0.0]);

        let (time, wall) = find_wall_intersection(&point, &velocity, &walls, None);
        assert_approx_eq!(f64, time, 0.5, ulps = 2);
        assert_eq!(walls.walls()[wall].axis, 0);
        assert_approx_eq!(f64, walls.walls()[wall].outer_normal, 1.0, ulps = 2);
        assert_eq!(walls.opposite(wall), wall + 1);
    }

    #[test]
    fn point_outside_the_box_transfers_immediately() {
        let plane = SimplePlane {
            axis: 0,
            outer_normal: 1.0,
            coordinate: 10.0,
        };
        // Slightly past the wall after a periodic shift.
        let point = Vector::from([10.0 + 1e-16, 5.0]);

        let outward = Vector::from([1.0, 0.0]);
        assert_approx_eq!(f64, plane_intersection_time(&point, &outward, &plane), 0.0, ulps = 2);

        let inward = Vector::from([-1.0, 0.0]);
        assert_approx_eq!(f64, plane_intersection_time(&point, &inward, &plane), -1.0, ulps = 2);
    }

    #[test]
    fn parallel_ray_never_crosses() {
        let plane = SimplePlane {
            axis: 1,
            outer_normal: -1.0,
            coordinate: 0.0,
        };
        let point = Vector::from([5.0, 5.0]);
        let velocity = Vector::from([1.0, 0.0]);
        assert_approx_eq!(f64, plane_intersection_time(&point, &velocity, &plane), -1.0, ulps = 2);
    }

    #[test]
    fn sphere_intersection_takes_the_near_root() {
        let point = Vector::from([0.0, 0.0, 0.0]);
        let velocity = Vector::from([2.0, 0.0, 0.0]);
        let center = Vector::from([5.0, 0.0, 0.0]);

        let time = sphere_intersection_time(&point, &velocity, &center, 1.0);
        assert_approx_eq!(f64, time, 2.0, ulps = 2);
    }

    #[test]
    fn sphere_intersection_from_inside_exits() {
        let point = Vector::from([5.0, 0.0, 0.0]);
        let velocity = Vector::from([1.0, 0.0, 0.0]);
        let center = Vector::from([5.0, 0.0, 0.0]);

        let time = sphere_intersection_time(&point, &velocity, &center, 2.0);
        assert_approx_eq!(f64, time, 2.0, ulps = 2);
    }

    #[test]
    fn sphere_intersection_misses() {
        let point = Vector::from([0.0, 5.0, 0.0]);
        let velocity = Vector::from([1.0, 0.0, 0.0]);
        let center = Vector::from([5.0, 0.0, 0.0]);

        assert!(sphere_intersection_time(&point, &velocity, &center, 1.0) < 0.0);
    }
}
