use collider::ColliderSet;
use error::SimulationError;
use flip::particles::ParticleVertex;
use glam::Vec3;
use grid::SimulationGrid;
use report::StepReport;

pub mod collider;
pub mod config;
pub mod domain;
pub mod error;
pub mod flip;
pub mod grid;
pub mod report;
pub mod scene;
pub mod uniforms;

pub use domain::{DomainDescriptor, GridUniform};
pub use grid::CellRecord;

/// A particle fluid advanced on a [`SimulationGrid`].
pub trait Fluid {
    type Params;

    /// Advances the fluid by `dt`, updating the cell state of `grid`. On error neither the fluid
    /// nor `grid` change.
    fn step(
        &mut self,
        dt: f32,
        params: &Self::Params,
        grid: &mut SimulationGrid,
        colliders: &ColliderSet,
    ) -> Result<StepReport, SimulationError>;

    /// Adds a particle and returns its slot.
    fn spawn(&mut self, position: Vec3, velocity: Vec3) -> usize;

    /// Active particles for rendering.
    fn vertices(&self) -> Vec<ParticleVertex>;

    fn active_particles(&self) -> usize;

    /// Fluid velocity at `p` as of the last step, with `p` clamped into the grid. Zero before the
    /// first step.
    fn velocity_at(&self, p: Vec3) -> Vec3;
}
