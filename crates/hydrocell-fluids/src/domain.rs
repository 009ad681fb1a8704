use bytemuck::{Pod, Zeroable};
use glam::{IVec3, UVec3, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::SimulationError;

/// Extents, resolution and clipping parameters of one simulation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DomainDescriptor {
    /// Number of cells along each axis.
    pub grid_size: IVec3,
    /// Physical size of a single cell along each axis.
    pub cell_length: Vec3,
    /// World-space position of the minimum corner of cell `(0, 0, 0)`.
    #[serde(default)]
    pub origin: Vec3,
    /// Camera eye, used for domain-relative effects on the GPU.
    #[serde(default)]
    pub eye: Vec3,
    /// Lower bound of the vertical clip band.
    pub pc_min_y: f32,
    /// Upper bound of the vertical clip band.
    pub pc_max_y: f32,
}

impl DomainDescriptor {
    /// A domain of `grid_size` cells of `cell_length` anchored at the world origin, with a clip
    /// band spanning exactly the grid height.
    pub fn new(grid_size: IVec3, cell_length: Vec3) -> Self {
        Self {
            grid_size,
            cell_length,
            origin: Vec3::ZERO,
            eye: Vec3::ZERO,
            pc_min_y: 0.0,
            pc_max_y: grid_size.y as f32 * cell_length.y,
        }
    }

    pub fn with_origin(mut self, origin: Vec3) -> Self {
        self.origin = origin;
        self
    }

    pub fn with_eye(mut self, eye: Vec3) -> Self {
        self.eye = eye;
        self
    }

    pub fn with_clip_band(mut self, pc_min_y: f32, pc_max_y: f32) -> Self {
        self.pc_min_y = pc_min_y;
        self.pc_max_y = pc_max_y;
        self
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.grid_size.cmple(IVec3::ZERO).any() {
            return Err(SimulationError::InvalidDomain(format!(
                "grid dimensions must be positive, got {}",
                self.grid_size,
            )));
        }

        if !self.cell_length.is_finite() || self.cell_length.cmple(Vec3::ZERO).any() {
            return Err(SimulationError::InvalidDomain(format!(
                "cell length must be positive and finite, got {}",
                self.cell_length,
            )));
        }

        if !self.origin.is_finite() || !self.eye.is_finite() {
            return Err(SimulationError::InvalidDomain("origin and eye must be finite".into()));
        }

        if !(self.pc_min_y.is_finite() && self.pc_max_y.is_finite() && self.pc_min_y < self.pc_max_y) {
            return Err(SimulationError::InvalidDomain(format!(
                "clip band requires pc_min_y < pc_max_y, got [{}, {}]",
                self.pc_min_y, self.pc_max_y,
            )));
        }

        Ok(())
    }

    /// Size of the grid, in cells. Only meaningful on a validated domain.
    #[inline]
    pub fn size(&self) -> UVec3 {
        self.grid_size.max(IVec3::ZERO).as_uvec3()
    }

    #[inline]
    pub fn cell_count(&self) -> usize {
        let size = self.size();
        size.x as usize * size.y as usize * size.z as usize
    }

    /// Total physical extent of the grid.
    #[inline]
    pub fn extent(&self) -> Vec3 {
        self.grid_size.as_vec3() * self.cell_length
    }

    #[inline]
    pub fn max(&self) -> Vec3 {
        self.origin + self.extent()
    }

    /// Tolerance used when deciding whether a collider covers a cell.
    #[inline]
    pub fn half_cell(&self) -> f32 {
        0.5 * self.cell_length.max_element()
    }

    #[inline]
    pub fn in_clip_band(&self, p: Vec3) -> bool {
        p.y >= self.pc_min_y && p.y <= self.pc_max_y
    }

    /// World position to the coordinate of the containing cell. Not clamped, so the result may
    /// lie outside the grid.
    #[inline]
    pub fn cell_coord(&self, p: Vec3) -> IVec3 {
        ((p - self.origin) / self.cell_length).floor().as_ivec3()
    }

    #[inline]
    pub fn contains_coord(&self, coord: IVec3) -> bool {
        coord.cmpge(IVec3::ZERO).all() && coord.cmplt(self.grid_size).all()
    }

    #[inline]
    pub fn clamp_coord(&self, coord: IVec3) -> IVec3 {
        coord.clamp(IVec3::ZERO, self.grid_size - 1)
    }

    /// Anchor of a cell: `coord * cell_length + origin`.
    #[inline]
    pub fn anchor(&self, coord: IVec3) -> Vec3 {
        coord.as_vec3() * self.cell_length + self.origin
    }

    /// The GPU snapshot of this domain.
    pub fn uniform(&self) -> GridUniform {
        GridUniform {
            grid_size: self.grid_size.to_array(),
            _pad0: 0,
            eye: self.eye.to_array(),
            _pad1: 0.0,
            pc_max_y: self.pc_max_y,
            pc_min_y: self.pc_min_y,
            grid_length: self.extent().to_array(),
            _pad2: [0; 3],
        }
    }
}

/// Grid descriptor as laid out in GPU memory.
///
/// `eye` is a 16 byte aligned `float3` on the device side, hence the explicit padding around
/// it. `grid_length` is the total extent of the grid along each axis, not the cell size.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GridUniform {
    pub grid_size: [i32; 3],
    pub _pad0: u32,
    pub eye: [f32; 3],
    pub _pad1: f32,
    pub pc_max_y: f32,
    pub pc_min_y: f32,
    pub grid_length: [f32; 3],
    pub _pad2: [u32; 3],
}

impl GridUniform {
    /// Rebuilds a domain from its GPU snapshot. The origin is not part of the device layout and
    /// has to be supplied.
    pub fn to_domain(&self, origin: Vec3) -> DomainDescriptor {
        let grid_size = IVec3::from_array(self.grid_size);

        DomainDescriptor {
            grid_size,
            cell_length: Vec3::from_array(self.grid_length) / grid_size.max(IVec3::ONE).as_vec3(),
            origin,
            eye: Vec3::from_array(self.eye),
            pc_min_y: self.pc_min_y,
            pc_max_y: self.pc_max_y,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    #[test]
    fn grid_uniform_matches_device_layout() {
        assert_eq!(mem::size_of::<GridUniform>(), 64);
        assert_eq!(mem::offset_of!(GridUniform, eye), 16);
        assert_eq!(mem::offset_of!(GridUniform, pc_max_y), 32);
        assert_eq!(mem::offset_of!(GridUniform, grid_length), 40);
    }

    #[test]
    fn rejects_non_positive_dimensions() {
        let domain = DomainDescriptor::new(IVec3::new(4, 0, 4), Vec3::ONE);
        assert!(matches!(domain.validate(), Err(SimulationError::InvalidDomain(_))));

        let domain = DomainDescriptor::new(IVec3::new(4, 4, -1), Vec3::ONE);
        assert!(matches!(domain.validate(), Err(SimulationError::InvalidDomain(_))));
    }

    #[test]
    fn rejects_inverted_clip_band() {
        let domain = DomainDescriptor::new(IVec3::splat(4), Vec3::ONE).with_clip_band(2.0, 1.0);
        assert!(matches!(domain.validate(), Err(SimulationError::InvalidDomain(_))));
    }

    #[test]
    fn cell_coordinates_follow_origin() {
        let domain = DomainDescriptor::new(IVec3::splat(4), Vec3::new(0.5, 1.0, 2.0))
            .with_origin(Vec3::new(-1.0, 0.0, 0.0));

        assert_eq!(domain.cell_coord(Vec3::new(-1.0, 0.0, 0.0)), IVec3::ZERO);
        assert_eq!(domain.cell_coord(Vec3::new(0.2, 3.5, 3.9)), IVec3::new(2, 3, 1));
        assert_eq!(domain.cell_coord(Vec3::new(-1.1, -0.1, 0.0)), IVec3::new(-1, -1, 0));
        assert_eq!(domain.anchor(IVec3::new(2, 3, 1)), Vec3::new(0.0, 3.0, 2.0));
    }

    #[test]
    fn uniform_round_trips_through_domain() {
        let domain = DomainDescriptor::new(IVec3::new(8, 4, 2), Vec3::new(0.25, 0.5, 1.0))
            .with_eye(Vec3::new(1.0, 2.0, 3.0))
            .with_clip_band(-1.0, 5.0);
        let uniform = domain.uniform();

        assert_eq!(uniform.grid_length, [2.0, 2.0, 2.0]);
        assert_eq!(uniform.to_domain(Vec3::ZERO), domain);
    }
}
