use glam::{IVec3, Vec3};

use crate::{
    collider::{Collider, ColliderId, ColliderSet},
    domain::DomainDescriptor,
    error::SimulationError,
    flip::particles::ParticleVertex,
    grid::{CellRecord, SimulationGrid},
    report::StepReport,
    uniforms::{FrameUniformBuilder, FrameUniforms},
    Fluid,
};

pub struct Scene<F, P> {
    /// The fluid for this scene.
    pub fluid: F,
    /// The parameters for this scene's fluid.
    params: P,
    /// The grid the fluid is simulated on.
    grid: SimulationGrid,
    /// The colliders in this scene.
    colliders: ColliderSet,
    /// Number of successful steps.
    frame: u64,
}

impl<F: Fluid<Params = P>, P> Scene<F, P> {
    pub fn new(fluid: F, params: P, domain: DomainDescriptor) -> Result<Self, SimulationError> {
        Ok(Self::from_grid(fluid, params, SimulationGrid::initialize(domain)?))
    }

    /// A scene without colliders on an existing grid, keeping its fixed cells and occupancy
    /// threshold. Fixed cells of `grid` act as erased cells until a collider covers them.
    pub fn from_grid(fluid: F, params: P, mut grid: SimulationGrid) -> Self {
        let colliders = ColliderSet::new();
        grid.refresh_claims(&colliders);

        Self {
            fluid,
            params,
            grid,
            colliders,
            frame: 0,
        }
    }

    #[inline(always)]
    pub fn domain(&self) -> &DomainDescriptor {
        self.grid.domain()
    }

    #[inline(always)]
    pub fn grid(&self) -> &SimulationGrid {
        &self.grid
    }

    #[inline(always)]
    pub fn params(&self) -> &P {
        &self.params
    }

    #[inline(always)]
    pub fn params_mut(&mut self) -> &mut P {
        &mut self.params
    }

    #[inline(always)]
    pub fn colliders(&self) -> &ColliderSet {
        &self.colliders
    }

    #[inline(always)]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Adds a collider to the scene, fixing every cell it covers, and returns its ID.
    pub fn add_collider<T: Collider + 'static>(&mut self, collider: T) -> ColliderId {
        let covered = self.grid.mark_fixed(&collider);
        let id = self.colliders.add(collider);
        log::debug!("collider {} covers {covered} cells", id.0);
        id
    }

    /// Removes a collider from the scene, given its ID. The cells it fixed stay fixed.
    pub fn remove_collider(&mut self, id: ColliderId) -> Option<Box<dyn Collider>> {
        let removed = self.colliders.remove(id);
        if removed.is_some() {
            self.grid.refresh_claims(&self.colliders);
        }
        removed
    }

    /// Fixes the cell containing `p`, clamped into the grid.
    pub fn erase_at(&mut self, p: Vec3) -> IVec3 {
        self.grid.mark_fixed_at(p)
    }

    pub fn spawn(&mut self, position: Vec3, velocity: Vec3) -> usize {
        self.fluid.spawn(position, velocity)
    }

    /// Re-initializes the grid for a new domain and marks every collider on it again. Cells
    /// erased without a collider are lost.
    pub fn resize(&mut self, domain: DomainDescriptor) -> Result<(), SimulationError> {
        let mut grid = SimulationGrid::initialize(domain)?.with_occupancy_threshold(self.grid.occupancy_threshold());

        for (_, collider) in self.colliders.iter() {
            grid.mark_fixed(collider);
        }

        self.grid = grid;
        Ok(())
    }

    pub fn step(&mut self, dt: f32) -> Result<StepReport, SimulationError> {
        let report = self.fluid.step(dt, &self.params, &mut self.grid, &self.colliders)?;
        self.frame += 1;
        Ok(report)
    }

    pub fn cells(&self) -> Vec<CellRecord> {
        self.grid.to_records()
    }

    pub fn vertices(&self) -> Vec<ParticleVertex> {
        self.fluid.vertices()
    }

    /// Fluid velocity at `p`, clamped into the grid.
    pub fn velocity_at(&self, p: Vec3) -> Vec3 {
        self.fluid.velocity_at(p)
    }

    /// Follows the fluid velocity from `seed`, returning `len` points `dt` seconds apart. Every
    /// point is clamped into the grid.
    pub fn trace_streamline(&self, seed: Vec3, dt: f32, len: usize) -> Vec<Vec3> {
        let lo = self.grid.domain().origin;
        let hi = self.grid.domain().max();

        std::iter::successors(Some(seed.clamp(lo, hi)), |&p| Some((p + self.velocity_at(p) * dt).clamp(lo, hi)))
            .take(len)
            .collect()
    }

    /// Uniforms for the current domain, built from `builder`'s camera matrices.
    pub fn frame_uniforms(&self, builder: FrameUniformBuilder) -> Result<FrameUniforms, SimulationError> {
        builder.domain(*self.grid.domain()).build()
    }
}
