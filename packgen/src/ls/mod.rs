//! Event-driven Lubachevsky–Stillinger compression.
//!
//! Particles fly ballistically and collide elastically while every diameter
//! grows linearly in time; "time" doubles as the inflation parameter, so
//! the inner diameter ratio of the packing is the current time times the
//! compression rate. Each particle carries its soonest event; a queue over
//! particles keyed by event time drives the main loop.

pub mod collision_service;
pub mod events;
pub mod velocity_service;

use crate::cell_list::CellList;
use crate::collisions::{find_polytope_intersection, find_wall_intersection, BoxWalls, Polytope};
use crate::config::{Algorithm, GenerationConfig};
use crate::error::{Error, Result};
use crate::math::{PeriodicBox, Vector};
use crate::neighbors::NeighborProvider;
use crate::particle::Packing;
use crate::priority_queue::IndexedPriorityQueue;
use crate::steps::{BaseStep, PackingStep};
use crate::verlet::VerletList;
use collision_service::GrowingCollisions;
use events::{Event, EventKind, MovingParticle};
use rand_pcg::Pcg64;
use tracing::{debug, warn};
use velocity_service::VelocityService;

/// Reference temperature of the thermal velocities.
const TEMPERATURE: f64 = 0.2;

/// Reduced pressure above which the packing counts as equilibrated at the
/// current compression rate (and as jammed at the final rate).
const REDUCED_PRESSURE_BOUND: f64 = 1e12;

/// Events scheduled earlier than the current time by more than this are
/// counted as collision errors, not plain roundoff.
const PAST_EVENT_TOLERANCE: f64 = 1e-9;

/// Optional per-particle Voronoi confinement for crystallization
/// suppression. Both documented semantics are available; the caller picks
/// one.
#[derive(Clone, Debug, Default)]
pub enum VoronoiMode<const D: usize> {
    /// No confinement.
    #[default]
    Off,
    /// Particles reflect off the faces of their Voronoi cell.
    PolytopeTransfer(Vec<Polytope<D>>),
    /// Particles reflect off the sphere inscribed in their Voronoi cell.
    SphereReflection(Vec<Polytope<D>>),
}

/// Statistics block of one simulation stretch.
#[derive(Clone, Copy, Debug, Default)]
pub struct MolecularDynamicsStatistics {
    /// Time-averaged normal-impulse flux over `N k_B T`.
    pub reduced_pressure: f64,
    /// Total momentum exchanged in collisions.
    pub exchanged_momentum: f64,
    /// Current kinetic energy.
    pub kinetic_energy: f64,
    /// Number of processed events.
    pub event_count: u64,
    /// Simulated time interval.
    pub time_period: f64,
    /// Whether any event had to be coerced from the past.
    pub collision_errors_existed: bool,
}

/// The Lubachevsky–Stillinger step engine.
pub struct LubachevskyStillingerStep<const D: usize> {
    base: BaseStep<D>,
    verlet: VerletList<D, CellList<D>>,
    walls: BoxWalls<D>,
    velocity_service: VelocityService,
    collisions: GrowingCollisions,
    voronoi: VoronoiMode<D>,

    moving: Vec<MovingParticle<D>>,
    queue: IndexedPriorityQueue,
    current_time: f64,
    events_per_displace: usize,

    compression_rate: f64,
    finished: bool,

    exchanged_momentum: f64,
    virial_sum: f64,
    event_count: u64,
    statistics_start_time: f64,
    collision_errors: bool,
}

impl<const D: usize> LubachevskyStillingerStep<D> {
    /// Creates the engine for the given box and generation parameters.
    #[must_use]
    pub fn new(periodic_box: PeriodicBox<D>, generation: GenerationConfig) -> Self {
        let walls = BoxWalls::new(&Vector::zeros(), periodic_box.size());
        let compression_rate = generation.contraction_rate;
        Self {
            verlet: VerletList::new(CellList::new(periodic_box.clone())),
            base: BaseStep::new(periodic_box, generation, false, false),
            walls,
            velocity_service: VelocityService::new(TEMPERATURE),
            collisions: GrowingCollisions::new(0.0, compression_rate),
            voronoi: VoronoiMode::Off,
            moving: Vec::new(),
            queue: IndexedPriorityQueue::new(Vec::new()),
            current_time: 0.0,
            events_per_displace: 0,
            compression_rate,
            finished: false,
            exchanged_momentum: 0.0,
            virial_sum: 0.0,
            event_count: 0,
            statistics_start_time: 0.0,
            collision_errors: false,
        }
    }

    /// Selects the Voronoi confinement mode; the default is off.
    pub fn set_voronoi_mode(&mut self, mode: VoronoiMode<D>) {
        self.voronoi = mode;
    }

    /// Returns the statistics of the stretch simulated so far.
    #[must_use]
    pub fn statistics(&self) -> MolecularDynamicsStatistics {
        let time_period = self.current_time - self.statistics_start_time;
        let kinetic_energy = self.velocity_service.actual_kinetic_energy(&self.moving);
        MolecularDynamicsStatistics {
            reduced_pressure: self.reduced_pressure(time_period, kinetic_energy),
            exchanged_momentum: self.exchanged_momentum,
            kinetic_energy,
            event_count: self.event_count,
            time_period,
            collision_errors_existed: self.collision_errors,
        }
    }

    fn reduced_pressure(&self, time_period: f64, kinetic_energy: f64) -> f64 {
        if time_period <= 0.0 || kinetic_energy == 0.0 {
            return 1.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let count = self.moving.len() as f64;
        let temperature = 2.0 * kinetic_energy / (f64::from(D as u32) * count);
        1.0 + self.virial_sum / (f64::from(D as u32) * count * temperature * time_period)
    }

    fn reset_statistics(&mut self) {
        self.exchanged_momentum = 0.0;
        self.virial_sum = 0.0;
        self.event_count = 0;
        self.statistics_start_time = self.current_time;
    }

    /// Moves a particle to its position at `time` inside a move bracket.
    fn advance_particle(&mut self, packing: &mut Packing<D>, index: usize, time: f64) {
        let position = self.moving[index].position_at(time);
        self.verlet.start_move(packing, index);
        packing[index].center = position;
        self.verlet.end_move(packing, index);
        self.moving[index].position = position;
        self.moving[index].last_event_time = time;
    }

    /// Recomputes the soonest event of one particle and reorders the
    /// queue. `wall_to_exclude` and `face_to_exclude` suppress the box
    /// wall or Voronoi face the particle just crossed, which it still
    /// numerically sits on.
    fn schedule_events(
        &mut self,
        packing: &mut Packing<D>,
        index: usize,
        wall_to_exclude: Option<usize>,
        face_to_exclude: Option<usize>,
    ) {
        let mut best = Event::invalid(index);
        let periodic_box = self.verlet.periodic_box().clone();

        let diameter = packing[index].diameter;
        let neighbors = self.verlet.neighbors_of(packing, index).to_vec();
        for neighbor in neighbors {
            if packing[index].immobile && packing[neighbor].immobile {
                continue;
            }
            let time = self.collisions.collision_time(
                &periodic_box,
                self.current_time,
                diameter,
                packing[neighbor].diameter,
                &self.moving[index],
                &self.moving[neighbor],
            );
            if time >= self.current_time && time < best.time {
                best = Event {
                    kind: EventKind::Collision { neighbor },
                    particle: index,
                    time,
                };
            }
        }

        let point = self.moving[index].position_at(self.current_time);
        let velocity = self.moving[index].velocity;

        let (wall_delay, wall) =
            find_wall_intersection(&point, &velocity, &self.walls, wall_to_exclude);
        let wall_time = self.current_time + wall_delay;
        if wall_delay.is_finite() && wall_time >= self.current_time && wall_time < best.time {
            best = Event {
                kind: EventKind::WallTransfer { wall },
                particle: index,
                time: wall_time,
            };
        }

        let exit_delay = self
            .verlet
            .time_to_update_boundary(packing, index, &point, &velocity);
        if exit_delay >= 0.0 {
            let exit_time = self.current_time + exit_delay;
            if exit_time < best.time {
                best = Event {
                    kind: EventKind::NeighborTransfer,
                    particle: index,
                    time: exit_time,
                };
            }
        }

        match &self.voronoi {
            VoronoiMode::Off => {}
            VoronoiMode::PolytopeTransfer(cells) => {
                let cell = &cells[index];
                let (face_delay, face) =
                    find_polytope_intersection(&point, &velocity, cell, face_to_exclude);
                let face_time = self.current_time + face_delay;
                if face_delay.is_finite() && face_time < best.time {
                    best = Event {
                        kind: EventKind::VoronoiTransfer { face },
                        particle: index,
                        time: face_time,
                    };
                }
            }
            VoronoiMode::SphereReflection(cells) => {
                let cell = &cells[index];
                let image = periodic_box.closest_periodic_image(&cell.inscribed_center, &point);
                let sphere_delay = crate::collisions::sphere_intersection_time(
                    &image,
                    &velocity,
                    &cell.inscribed_center,
                    cell.inscribed_radius,
                );
                if sphere_delay >= 0.0 {
                    let sphere_time = self.current_time + sphere_delay;
                    if sphere_time < best.time {
                        best = Event {
                            kind: EventKind::VoronoiInscribedSphereTransfer,
                            particle: index,
                            time: sphere_time,
                        };
                    }
                }
            }
        }

        self.moving[index].next_event = best;
        self.queue.update_key(index, best.time);
    }

    /// Reschedules every neighbor whose stored collision names `index` as
    /// the partner; their event may have been invalidated by the change.
    fn reschedule_dependents(&mut self, packing: &mut Packing<D>, index: usize) {
        let neighbors = self.verlet.neighbors_of(packing, index).to_vec();
        for neighbor in neighbors {
            if self.moving[neighbor].next_event.collision_partner() == Some(index) {
                self.schedule_events(packing, neighbor, None, None);
            }
        }
    }

    fn process_collision(&mut self, packing: &mut Packing<D>, index: usize, neighbor: usize) {
        self.advance_particle(packing, index, self.current_time);
        self.advance_particle(packing, neighbor, self.current_time);

        let periodic_box = self.verlet.periodic_box().clone();
        let (first_velocity, second_velocity) = self.collisions.velocities_after_collision(
            &periodic_box,
            self.current_time,
            packing[index].diameter,
            packing[neighbor].diameter,
            &self.moving[index],
            &self.moving[neighbor],
        );

        let half_sum = 0.5 * (packing[index].diameter + packing[neighbor].diameter);
        let momentum = (first_velocity - self.moving[index].velocity).norm();
        self.exchanged_momentum += momentum;
        self.virial_sum += momentum * half_sum * self.collisions.ratio_at(self.current_time);

        // Immobile particles stay put; the mobile partner takes the whole
        // relative velocity so the pair still separates faster than it
        // grows.
        match (packing[index].immobile, packing[neighbor].immobile) {
            (false, false) => {
                self.moving[index].velocity = first_velocity;
                self.moving[neighbor].velocity = second_velocity;
            }
            (false, true) => {
                self.moving[index].velocity = first_velocity - second_velocity;
            }
            (true, false) => {
                self.moving[neighbor].velocity = second_velocity - first_velocity;
            }
            (true, true) => {}
        }

        self.schedule_events(packing, index, None, None);
        self.schedule_events(packing, neighbor, None, None);
        self.reschedule_dependents(packing, index);
        self.reschedule_dependents(packing, neighbor);
    }

    fn process_wall_transfer(&mut self, packing: &mut Packing<D>, index: usize, wall: usize) {
        let time = self.current_time;
        let mut position = self.moving[index].position_at(time);
        let crossed = &self.walls.walls()[wall];
        position[crossed.axis] -=
            crossed.outer_normal * self.verlet.periodic_box().size()[crossed.axis];

        self.verlet.start_move(packing, index);
        packing[index].center = position;
        self.verlet.end_move(packing, index);
        self.moving[index].position = position;
        self.moving[index].last_event_time = time;

        self.schedule_events(packing, index, Some(wall), None);
    }

    fn process_voronoi_transfer(
        &mut self,
        packing: &mut Packing<D>,
        index: usize,
        kind: EventKind,
    ) {
        self.advance_particle(packing, index, self.current_time);
        let mut crossed_face = None;

        let normal: Vector<D> = match kind {
            EventKind::VoronoiTransfer { face } => {
                let VoronoiMode::PolytopeTransfer(cells) = &self.voronoi else {
                    return;
                };
                crossed_face = Some(face);
                cells[index].planes[face].normal
            }
            EventKind::VoronoiInscribedSphereTransfer => {
                // A small time nudge avoids re-detecting the sphere wall
                // the particle still numerically sits on.
                self.current_time += 1e-10;
                self.advance_particle(packing, index, self.current_time);
                let VoronoiMode::SphereReflection(cells) = &self.voronoi else {
                    return;
                };
                let cell = &cells[index];
                let image = self
                    .verlet
                    .periodic_box()
                    .closest_periodic_image(&cell.inscribed_center, &self.moving[index].position);
                (image - cell.inscribed_center).normalize()
            }
            _ => return,
        };

        let velocity = self.moving[index].velocity;
        self.moving[index].velocity = velocity - normal * (2.0 * velocity.dot(&normal));
        self.schedule_events(packing, index, None, crossed_face);
        self.reschedule_dependents(packing, index);
    }

    fn process_one_event(&mut self, packing: &mut Packing<D>) -> Result<()> {
        let owner = self.queue.top();
        let event = self.moving[owner].next_event;

        if event.time.is_infinite() {
            return Err(Error::Convergence(
                "no further events can be scheduled".into(),
            ));
        }
        if event.time < self.current_time {
            if self.current_time - event.time > PAST_EVENT_TOLERANCE {
                warn!(
                    particle = event.particle,
                    delay = self.current_time - event.time,
                    "event scheduled in the past, coercing to the current time"
                );
                self.collision_errors = true;
            }
        } else {
            self.current_time = event.time;
        }

        match event.kind {
            EventKind::Invalid | EventKind::Move => {
                self.advance_particle(packing, owner, self.current_time);
                self.schedule_events(packing, owner, None, None);
            }
            EventKind::Collision { neighbor } => {
                self.process_collision(packing, owner, neighbor);
            }
            EventKind::WallTransfer { wall } => {
                self.process_wall_transfer(packing, owner, wall);
            }
            EventKind::NeighborTransfer => {
                self.advance_particle(packing, owner, self.current_time);
                // The displacement test of the move bracket sits exactly on
                // its threshold here; rebuild explicitly.
                self.verlet.rebuild_list(packing, owner);
                self.schedule_events(packing, owner, None, None);
            }
            kind @ (EventKind::VoronoiInscribedSphereTransfer
            | EventKind::VoronoiTransfer { .. }) => {
                self.process_voronoi_transfer(packing, owner, kind);
            }
        }
        self.event_count += 1;
        Ok(())
    }

    fn update_compression_schedule(&mut self, batch_pressure: f64) {
        if batch_pressure <= REDUCED_PRESSURE_BOUND {
            return;
        }
        let gradual = self.base.generation.algorithm == Algorithm::LubachevskyStillingerGradual;
        let above_final =
            self.compression_rate > self.base.generation.final_contraction_rate;
        if gradual && above_final {
            self.compression_rate = (self.compression_rate
                / self.base.generation.contraction_rate_decrease_factor)
                .max(self.base.generation.final_contraction_rate);
            self.collisions
                .set_growth_rate(self.current_time, self.compression_rate);
            self.velocity_service.rescale_velocities(&mut self.moving);
            debug!(
                compression_rate = self.compression_rate,
                "packing equilibrated, lowering the compression rate"
            );
        } else {
            debug!(
                reduced_pressure = batch_pressure,
                "pressure bound reached, stopping compression"
            );
            self.finished = true;
        }
    }
}

impl<const D: usize> PackingStep<D> for LubachevskyStillingerStep<D> {
    fn set_particles(&mut self, packing: &mut Packing<D>, rng: &mut Pcg64) -> Result<()> {
        self.base.set_particles(packing);
        self.verlet.set_particles(packing);

        // The largest diameter scale with no overlaps: the spheres of the
        // closest pair exactly touch.
        let periodic_box = self.verlet.periodic_box().clone();
        let mut min_distance_squared = f64::INFINITY;
        for particle in packing.iter() {
            for &neighbor in self.verlet.neighbors_of(packing, particle.index) {
                min_distance_squared = min_distance_squared
                    .min(periodic_box.normalized_distance_squared(particle, &packing[neighbor]));
            }
        }
        let initial_ratio = if min_distance_squared.is_finite() {
            min_distance_squared.sqrt()
        } else {
            return Err(Error::Precondition(
                "the packing is too sparse for the neighbor stack to see any pair".into(),
            ));
        };

        self.current_time = 0.0;
        self.compression_rate = self.base.generation.contraction_rate;
        self.collisions = GrowingCollisions::new(initial_ratio, self.compression_rate);
        self.base.inner_diameter_ratio = initial_ratio;
        self.base.outer_diameter_ratio = initial_ratio;
        self.finished = false;

        self.moving = packing
            .iter()
            .map(|particle| MovingParticle::new(particle.index, particle.center))
            .collect();
        self.velocity_service.fill_velocities(rng, &mut self.moving);
        for (moving, particle) in self.moving.iter_mut().zip(packing.iter()) {
            if particle.immobile {
                moving.velocity = Vector::zeros();
            }
        }

        self.events_per_displace = packing.len();
        self.queue = IndexedPriorityQueue::new(vec![f64::INFINITY; packing.len()]);
        for index in 0..packing.len() {
            self.schedule_events(packing, index, None, None);
        }
        self.reset_statistics();
        Ok(())
    }

    fn displace_particles(&mut self, packing: &mut Packing<D>, _rng: &mut Pcg64) -> Result<()> {
        let batch_start_time = self.current_time;
        let batch_start_virial = self.virial_sum;

        for _ in 0..self.events_per_displace {
            self.process_one_event(packing)?;
        }
        // Bring every particle to the common current time, so the packing
        // seen by the caller is a consistent snapshot.
        for index in 0..packing.len() {
            self.advance_particle(packing, index, self.current_time);
        }
        self.base.inner_diameter_ratio = self.collisions.ratio_at(self.current_time);
        self.base.outer_diameter_ratio = self.base.inner_diameter_ratio;

        let time_period = self.current_time - batch_start_time;
        let kinetic_energy = self.velocity_service.actual_kinetic_energy(&self.moving);
        #[allow(clippy::cast_precision_loss)]
        let count = self.moving.len() as f64;
        let batch_pressure = if time_period > 0.0 && kinetic_energy > 0.0 {
            let temperature = 2.0 * kinetic_energy / (f64::from(D as u32) * count);
            1.0 + (self.virial_sum - batch_start_virial)
                / (f64::from(D as u32) * count * temperature * time_period)
        } else {
            f64::INFINITY
        };
        self.update_compression_schedule(batch_pressure);
        Ok(())
    }

    fn should_continue(&self) -> bool {
        !self.finished && self.base.should_continue()
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

    fn reset(&mut self, _packing: &mut Packing<D>) -> Result<()> {
        Err(Error::Convergence(
            "the event-driven engine runs a single pass; use one run per generation".into(),
        ))
    }
}
