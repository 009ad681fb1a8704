use glam::{IVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::{
    collider::{hexahedron::HexCollider, plane::PlaneCollider},
    domain::DomainDescriptor,
    error::SimulationError,
    flip::flip_3d::{FlipFluid3D, FlipFluid3DParams},
    grid::SimulationGrid,
    scene::Scene,
};

/// A collider as written in a configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColliderConfig {
    /// Axis aligned box.
    Box { min: Vec3, max: Vec3 },
    /// Oriented box given by its six face centers.
    Hexahedron { points: [Vec3; 6] },
    Plane { at: Vec3, u: Vec3, v: Vec3 },
}

/// A box filled with particles on a regular lattice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleBlock {
    pub min: Vec3,
    pub max: Vec3,
    pub spacing: f32,
    #[serde(default)]
    pub velocity: Vec3,
}

impl ParticleBlock {
    /// Lattice points inside the block, offset half a spacing from `min`.
    pub fn positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        let n = ((self.max - self.min) / self.spacing).floor().max(Vec3::ZERO).as_uvec3();

        (0..n.x).flat_map(move |i| {
            (0..n.y).flat_map(move |j| {
                (0..n.z).map(move |k| self.min + (Vec3::new(i as f32, j as f32, k as f32) + 0.5) * self.spacing)
            })
        })
    }
}

/// Everything needed to set up a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Time step per frame, in seconds.
    pub dt: f32,
    pub occupancy_threshold: u32,
    pub domain: DomainDescriptor,
    pub fluid: FlipFluid3DParams,
    pub colliders: Vec<ColliderConfig>,
    pub particles: Vec<ParticleBlock>,
}

impl Default for SimulationConfig {
    /// A dam break: a block of water in one corner of a box with a floor.
    fn default() -> Self {
        let grid_size = IVec3::new(24, 16, 12);
        let cell_length = Vec3::splat(0.1);
        let extent = grid_size.as_vec3() * cell_length;

        Self {
            dt: 1.0 / 60.0,
            occupancy_threshold: 1,
            domain: DomainDescriptor::new(grid_size, cell_length).with_eye(Vec3::new(1.2, 1.0, 4.0)),
            fluid: FlipFluid3DParams::default(),
            colliders: vec![ColliderConfig::Plane {
                at: Vec3::ZERO,
                u: Vec3::new(0.0, 0.0, extent.z),
                v: Vec3::new(extent.x, 0.0, 0.0),
            }],
            particles: vec![ParticleBlock {
                min: Vec3::new(0.0, 0.1, 0.0),
                max: Vec3::new(0.8, 1.0, extent.z),
                spacing: 0.05,
                velocity: Vec3::ZERO,
            }],
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), SimulationError> {
        self.domain.validate()?;
        self.fluid.validate()?;

        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(SimulationError::InvalidConfig(format!("time step must be positive, got {}", self.dt)));
        }

        if self.occupancy_threshold == 0 {
            return Err(SimulationError::InvalidConfig("occupancy threshold must be at least 1".into()));
        }

        for collider in &self.colliders {
            collider.validate()?;
        }

        for block in &self.particles {
            if !(block.spacing.is_finite() && block.spacing > 0.0) {
                return Err(SimulationError::InvalidConfig(format!(
                    "particle spacing must be positive, got {}",
                    block.spacing,
                )));
            }

            if !block.min.is_finite() || !block.max.is_finite() || block.min.cmpgt(block.max).any() {
                return Err(SimulationError::InvalidConfig(format!(
                    "particle block from {} to {} is empty",
                    block.min, block.max,
                )));
            }
        }

        Ok(())
    }

    /// Validates the configuration and builds the scene it describes.
    pub fn build_scene(&self) -> Result<Scene<FlipFluid3D, FlipFluid3DParams>, SimulationError> {
        self.validate()?;

        let grid = SimulationGrid::initialize(self.domain)?.with_occupancy_threshold(self.occupancy_threshold);
        let mut scene = Scene::from_grid(FlipFluid3D::new(), self.fluid, grid);

        for collider in &self.colliders {
            match *collider {
                ColliderConfig::Box { min, max } => {
                    scene.add_collider(HexCollider::aabb(min, max)?);
                }
                ColliderConfig::Hexahedron { points } => {
                    scene.add_collider(HexCollider::from_face_points(points)?);
                }
                ColliderConfig::Plane { at, u, v } => {
                    scene.add_collider(PlaneCollider::new(at, u, v)?);
                }
            }
        }

        let mut spawned = 0;
        for block in &self.particles {
            for p in block.positions() {
                scene.spawn(p, block.velocity);
                spawned += 1;
            }
        }

        log::info!(
            "scene ready: {} grid, {} colliders, {} fixed cells, {spawned} particles",
            self.domain.grid_size,
            scene.colliders().len(),
            scene.grid().fixed_count(),
        );

        Ok(scene)
    }
}

impl ColliderConfig {
    fn validate(&self) -> Result<(), SimulationError> {
        match *self {
            ColliderConfig::Box { min, max } => HexCollider::aabb(min, max).map(drop),
            ColliderConfig::Hexahedron { points } => HexCollider::from_face_points(points).map(drop),
            ColliderConfig::Plane { at, u, v } => PlaneCollider::new(at, u, v).map(drop),
        }
    }
}
