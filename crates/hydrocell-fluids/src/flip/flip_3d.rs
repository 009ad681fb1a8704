use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, Vec3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    collider::{Collider, ColliderSet, Contact, SURFACE_EPSILON},
    error::SimulationError,
    grid::SimulationGrid,
    report::{BoundaryEscape, EscapeKind, StepReport},
    Fluid,
};

use super::{mac_3d::MacGrid3D, particles::{ParticleSet, ParticleVertex}};

/// Contacts resolved per particle and step before the remaining motion is dropped.
const MAX_CONTACTS: usize = 4;

/// Offset keeping clamped particles strictly inside a cell, relative to the cell length.
const CELL_EPSILON: f32 = 1e-4;

/// How a particle took part in the particle to grid transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Inactive,
    /// Outside of the grid, moved ballistically.
    Outside,
    /// Inside a fixed cell, moved ballistically.
    Rejected,
    Scattered,
}

#[derive(Debug, Clone, Copy)]
struct ParticleUpdate {
    position: Vec3,
    velocity: Vec3,
    active: bool,
    contacts: usize,
    escape: Option<EscapeKind>,
}

/// A FLIP fluid on a staggered grid, with particles kept on one side of every collider.
#[derive(Debug, Clone, Default)]
pub struct FlipFluid3D {
    mac: Option<MacGrid3D>,
    particles: ParticleSet,
    transfers: Vec<Transfer>,
    updates: Vec<ParticleUpdate>,
    /// Grid the next step is written into. Swapped with the scene's grid on success.
    back_grid: Option<SimulationGrid>,
}

impl FlipFluid3D {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_particle(&mut self, position: Vec3, velocity: Vec3) -> usize {
        self.particles.spawn(position, velocity)
    }

    pub fn particles(&self) -> &ParticleSet {
        &self.particles
    }

    pub fn particles_mut(&mut self) -> &mut ParticleSet {
        &mut self.particles
    }

    /// Counts the active particles per cell and flags occupied cells on `grid`.
    fn scatter(&mut self, grid: &mut SimulationGrid) {
        let counts: Vec<AtomicU32> = (0..grid.domain().cell_count()).map(|_| AtomicU32::new(0)).collect();
        let particles = &self.particles;
        let cells = &*grid;

        particles
            .positions
            .par_iter()
            .zip(particles.active.par_iter())
            .map(|(p, &active)| {
                if !active {
                    return Transfer::Inactive;
                }

                let coord = cells.cell_coord(*p);
                if !cells.contains_coord(coord) {
                    return Transfer::Outside;
                }

                if cells.cell_clamped(coord).is_fixed() {
                    return Transfer::Rejected;
                }

                match cells.linear_index(coord) {
                    Ok(idx) => {
                        counts[idx].fetch_add(1, Ordering::Relaxed);
                        Transfer::Scattered
                    }
                    Err(_) => Transfer::Outside,
                }
            })
            .collect_into_vec(&mut self.transfers);

        grid.apply_counts(&counts);
    }

    /// Gathers, collides and advects every particle into `self.updates`.
    fn advect(&mut self, dt: f32, params: &FlipFluid3DParams, grid: &SimulationGrid, colliders: &ColliderSet) {
        let Some(mac) = self.mac.as_ref() else {
            return;
        };
        let particles = &self.particles;
        let transfers = &self.transfers;
        let domain = grid.domain();

        (0..particles.len())
            .into_par_iter()
            .map(|i| {
                let p = particles.positions[i];
                let v0 = particles.velocities[i];
                let transfer = transfers.get(i).copied().unwrap_or(Transfer::Inactive);

                if transfer == Transfer::Inactive {
                    return ParticleUpdate {
                        position: p,
                        velocity: v0,
                        active: false,
                        contacts: 0,
                        escape: None,
                    };
                }

                let ballistic = v0 + params.gravity * dt;
                let v = if transfer == Transfer::Scattered {
                    gather(mac, p, v0, ballistic, params.flip_ratio)
                } else {
                    ballistic
                };

                let (mut to, mut v, contacts) = resolve_collisions(grid, colliders, p, p + v * dt, v, params.restitution);
                let mut contacts = contacts.len();
                if transfer == Transfer::Rejected {
                    contacts += 1;
                }

                if !domain.in_clip_band(to) {
                    log::trace!("particle {i} left the clip band at {to}");
                    return ParticleUpdate {
                        position: to,
                        velocity: v,
                        active: false,
                        contacts,
                        escape: Some(EscapeKind::ClipBand),
                    };
                }

                let escape = clamp_to_grid(grid, &mut to, &mut v).then_some(EscapeKind::Grid);

                ParticleUpdate {
                    position: to,
                    velocity: v,
                    active: true,
                    contacts,
                    escape,
                }
            })
            .collect_into_vec(&mut self.updates);
    }

    /// Checks the pending updates and applies them to the particles.
    fn commit(&mut self) -> Result<StepReport, SimulationError> {
        if let Some(i) = self.updates.iter().position(|u| !(u.position.is_finite() && u.velocity.is_finite())) {
            return Err(SimulationError::NonFiniteState(i));
        }

        let mut report = StepReport::default();

        for (i, (update, transfer)) in self.updates.iter().zip(self.transfers.iter()).enumerate() {
            match transfer {
                Transfer::Inactive => continue,
                Transfer::Scattered => report.scattered += 1,
                Transfer::Rejected => report.rejected += 1,
                Transfer::Outside => {}
            }

            report.collisions += update.contacts;

            if let Some(kind) = update.escape {
                report.escapes.push(BoundaryEscape {
                    particle: i,
                    position: update.position,
                    kind,
                });
            }

            if !update.active {
                report.deactivated += 1;
            }

            self.particles.positions[i] = update.position;
            self.particles.velocities[i] = update.velocity;
            self.particles.active[i] = update.active;
        }

        Ok(report)
    }
}

/// PIC/FLIP blend of the grid velocity at `p`. Components without any valid face nearby keep
/// the `fallback` velocity.
fn gather(mac: &MacGrid3D, p: Vec3, v0: Vec3, fallback: Vec3, flip_ratio: f32) -> Vec3 {
    let mut v = fallback;

    for (axis, sample) in mac.sample(p).into_iter().enumerate() {
        if let Some((new, old)) = sample {
            let pic = new;
            let flip = v0[axis] + (new - old);
            v[axis] = (1.0 - flip_ratio) * pic + flip_ratio * flip;
        }
    }

    v
}

/// Moves `to` back onto every surface the segment `from -> to` crosses, earliest first, and
/// reflects `v` off each of them.
fn resolve_collisions(
    grid: &SimulationGrid,
    colliders: &ColliderSet,
    from: Vec3,
    mut to: Vec3,
    mut v: Vec3,
    restitution: f32,
) -> (Vec3, Vec3, SmallVec<[Contact; MAX_CONTACTS]>) {
    let mut contacts = SmallVec::new();

    while contacts.len() < MAX_CONTACTS {
        let contact = [colliders.sweep(from, to), voxel_contact(grid, from, to)]
            .into_iter()
            .flatten()
            .min_by(|a, b| a.time.total_cmp(&b.time));

        let Some(contact) = contact else {
            break;
        };

        let clamped = contact.clamp(to);
        v = contact.reflect(v, restitution);
        contacts.push(contact);

        let moved = clamped.distance_squared(to) > SURFACE_EPSILON * SURFACE_EPSILON;
        to = clamped;
        if !moved {
            break;
        }
    }

    (to, v, contacts)
}

/// Contact with the first fixed cell no collider claims along the segment `from -> to`.
///
/// Walks the cells the segment passes through in order, so fast particles cannot skip over
/// thin walls of erased cells. The particle is stopped just before the face it crossed to
/// enter that cell. A particle already inside such a cell moves freely within it.
fn voxel_contact(grid: &SimulationGrid, from: Vec3, to: Vec3) -> Option<Contact> {
    let domain = grid.domain();
    let delta = to - from;
    let lo = domain.origin;
    let hi = domain.max();

    // Only the part of the segment inside the grid can enter a cell.
    let mut t_enter = 0.0;
    let mut t_exit = 1.0;
    let mut enter_axis = None;
    for axis in 0..3 {
        if delta[axis] == 0.0 {
            if from[axis] < lo[axis] || from[axis] > hi[axis] {
                return None;
            }
            continue;
        }

        let a = (lo[axis] - from[axis]) / delta[axis];
        let b = (hi[axis] - from[axis]) / delta[axis];
        if a.min(b) > t_enter {
            t_enter = a.min(b);
            enter_axis = Some(axis);
        }
        t_exit = f32::min(t_exit, a.max(b));
    }

    if t_enter > t_exit {
        return None;
    }

    let at = |t: f32| if t >= 1.0 { to } else { from + delta * t };
    let erased = |cell: IVec3| grid.cell_clamped(cell).is_fixed() && !grid.is_claimed(cell);

    let mut cell = grid.clamp_coord(grid.cell_coord(at(t_enter)));
    let target = grid.clamp_coord(grid.cell_coord(at(t_exit)));

    if let Some(axis) = enter_axis {
        if erased(cell) {
            return Some(face_contact(grid, cell, axis, delta, to, t_enter));
        }
    }

    if cell == target {
        return None;
    }

    let step = (target - cell).signum();
    let start = domain.anchor(cell);

    // Segment parameter at the next cell boundary, and between two boundaries, per axis.
    let mut t_max = Vec3::INFINITY;
    let mut t_delta = Vec3::INFINITY;
    for axis in 0..3 {
        let len = domain.cell_length[axis];
        match step[axis] {
            1 => t_max[axis] = (start[axis] + len - from[axis]) / delta[axis],
            -1 => t_max[axis] = (start[axis] - from[axis]) / delta[axis],
            _ => continue,
        }
        t_delta[axis] = len / delta[axis].abs();
    }

    while cell != target {
        let axis = (0..3)
            .filter(|&axis| cell[axis] != target[axis])
            .min_by(|&a, &b| t_max[a].total_cmp(&t_max[b]))?;

        let time = t_max[axis];
        cell[axis] += step[axis];
        t_max[axis] += t_delta[axis];

        if erased(cell) {
            return Some(face_contact(grid, cell, axis, delta, to, time));
        }
    }

    None
}

/// Contact on the face of `cell` that a segment moving by `delta` crosses along `axis`.
fn face_contact(grid: &SimulationGrid, cell: IVec3, axis: usize, delta: Vec3, to: Vec3, time: f32) -> Contact {
    let domain = grid.domain();
    let len = domain.cell_length[axis];
    let anchor = domain.anchor(cell);

    let (face, sign) = if delta[axis] > 0.0 {
        (anchor[axis], -1.0)
    } else {
        (anchor[axis] + len, 1.0)
    };

    let mut normal = Vec3::ZERO;
    normal[axis] = sign;

    let mut point = to;
    point[axis] = face + sign * len * CELL_EPSILON;

    Contact {
        point,
        normal,
        time: time.clamp(0.0, 1.0),
    }
}

/// Clamps a particle that left the grid back inside it and zeroes its outward velocity.
/// Returns whether the particle had to be clamped.
fn clamp_to_grid(grid: &SimulationGrid, p: &mut Vec3, v: &mut Vec3) -> bool {
    let domain = grid.domain();
    let lo = domain.origin;
    let hi = domain.max();
    let mut escaped = false;

    for axis in 0..3 {
        if p[axis] < lo[axis] {
            p[axis] = lo[axis];
            v[axis] = v[axis].max(0.0);
            escaped = true;
        } else if p[axis] >= hi[axis] {
            p[axis] = hi[axis] - domain.cell_length[axis] * CELL_EPSILON;
            v[axis] = v[axis].min(0.0);
            escaped = true;
        }
    }

    escaped
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlipFluid3DParams {
    pub gravity: Vec3,
    /// Share of the FLIP update in the PIC/FLIP blend. `0.0` is pure PIC.
    pub flip_ratio: f32,
    pub num_pressure_iters: usize,
    pub over_relaxation: f32,
    /// Share of the normal velocity kept after a collision.
    pub restitution: f32,
}

impl FlipFluid3DParams {
    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.gravity.is_finite() {
            return Err(SimulationError::InvalidConfig(format!("gravity must be finite, got {}", self.gravity)));
        }

        if !(0.0..=1.0).contains(&self.flip_ratio) {
            return Err(SimulationError::InvalidConfig(format!("flip ratio must be in [0, 1], got {}", self.flip_ratio)));
        }

        if !(self.over_relaxation > 0.0 && self.over_relaxation < 2.0) {
            return Err(SimulationError::InvalidConfig(format!(
                "over-relaxation must be in (0, 2), got {}",
                self.over_relaxation,
            )));
        }

        if !(0.0..=1.0).contains(&self.restitution) {
            return Err(SimulationError::InvalidConfig(format!("restitution must be in [0, 1], got {}", self.restitution)));
        }

        Ok(())
    }
}

impl Default for FlipFluid3DParams {
    fn default() -> Self {
        Self {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            flip_ratio: 0.9,
            num_pressure_iters: 100,
            over_relaxation: 1.9,
            restitution: 0.0,
        }
    }
}

impl Fluid for FlipFluid3D {
    type Params = FlipFluid3DParams;

    fn step(
        &mut self,
        dt: f32,
        params: &Self::Params,
        grid: &mut SimulationGrid,
        colliders: &ColliderSet,
    ) -> Result<StepReport, SimulationError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(SimulationError::InvalidTimeStep(dt));
        }
        params.validate()?;

        let domain = *grid.domain();
        if self.mac.as_ref().is_some_and(|mac| mac.domain != domain) {
            self.mac = None;
        }

        let mut back = match self.back_grid.take() {
            Some(mut back) => {
                back.clone_from(grid);
                back
            }
            None => grid.clone(),
        };
        back.reset_dynamic();

        self.scatter(&mut back);

        let mac = self.mac.get_or_insert_with(|| MacGrid3D::new(&domain));
        let scattered = self
            .particles
            .positions
            .iter()
            .zip(self.particles.velocities.iter())
            .zip(self.transfers.iter())
            .filter(|(_, t)| **t == Transfer::Scattered)
            .map(|(pv, _)| pv);

        mac.particle_to_grid(scattered);
        mac.apply_body_force(params.gravity, dt);
        let residual = mac.solve_pressure(&back, params.num_pressure_iters, params.over_relaxation);

        self.advect(dt, params, &back, colliders);

        let report = match self.commit() {
            Ok(report) => report,
            Err(err) => {
                log::warn!("discarding step: {err}");
                self.back_grid = Some(back);
                return Err(err);
            }
        };

        std::mem::swap(grid, &mut back);
        self.back_grid = Some(back);

        if report.grid_escapes() > 0 {
            log::warn!("{} particles escaped the grid and were clamped back in", report.grid_escapes());
        }
        log::debug!("step dt={dt}: {report}, residual divergence {residual:.3e}");

        Ok(report)
    }

    fn spawn(&mut self, position: Vec3, velocity: Vec3) -> usize {
        self.insert_particle(position, velocity)
    }

    fn vertices(&self) -> Vec<ParticleVertex> {
        self.particles.vertices()
    }

    fn active_particles(&self) -> usize {
        self.particles.active_count()
    }

    fn velocity_at(&self, p: Vec3) -> Vec3 {
        self.mac.as_ref().map_or(Vec3::ZERO, |mac| mac.velocity(p))
    }
}
