use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};
use ndarray::{Array3, ArrayView3, Zip};

use crate::{collider::{Collider, ColliderSet}, domain::DomainDescriptor, error::SimulationError};

/// Per-cell state as laid out in GPU memory.
///
/// `position` is a 16 byte aligned `float3` on the device side, so it starts at offset 16.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct CellRecord {
    pub point_count: i32,
    pub occ: u8,
    pub fixed: u8,
    pub _pad0: [u8; 10],
    pub position: [f32; 3],
    pub _pad1: f32,
}

impl CellRecord {
    pub fn new(position: Vec3) -> Self {
        Self {
            position: position.to_array(),
            ..Default::default()
        }
    }

    #[inline]
    pub fn is_occupied(&self) -> bool {
        self.occ != 0
    }

    #[inline]
    pub fn is_fixed(&self) -> bool {
        self.fixed != 0
    }

    #[inline]
    pub fn anchor(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    #[inline]
    fn fix(&mut self) {
        self.fixed = 1;
        self.occ = 0;
        self.point_count = 0;
    }
}

/// The voxel grid the fluid lives on.
///
/// Fixed cells are permanent solids. They are never occupied and never counted, and no runtime
/// operation turns them back into fluid cells.
#[derive(Debug, Clone)]
pub struct SimulationGrid {
    domain: DomainDescriptor,
    cells: Array3<CellRecord>,
    /// Fixed cells that some collider covers. Collisions in these cells use the collider's
    /// exact surface instead of the voxel.
    claimed: Array3<bool>,
    occupancy_threshold: u32,
}

impl SimulationGrid {
    pub fn initialize(domain: DomainDescriptor) -> Result<Self, SimulationError> {
        domain.validate()?;

        let size = domain.size();
        let shape = (size.x as usize, size.y as usize, size.z as usize);
        let cells = Array3::from_shape_fn(shape, |(i, j, k)| {
            CellRecord::new(domain.anchor(IVec3::new(i as i32, j as i32, k as i32)))
        });

        log::debug!("initialized {} grid with {} cells", domain.grid_size, domain.cell_count());

        Ok(Self {
            domain,
            cells,
            claimed: Array3::from_elem(shape, false),
            occupancy_threshold: 1,
        })
    }

    /// Number of particles a cell needs before it counts as occupied. Clamped to at least one.
    pub fn with_occupancy_threshold(mut self, threshold: u32) -> Self {
        self.occupancy_threshold = threshold.max(1);
        self
    }

    #[inline]
    pub fn domain(&self) -> &DomainDescriptor {
        &self.domain
    }

    #[inline]
    pub fn occupancy_threshold(&self) -> u32 {
        self.occupancy_threshold
    }

    #[inline]
    pub fn cells(&self) -> ArrayView3<'_, CellRecord> {
        self.cells.view()
    }

    /// The cell records in GPU buffer order.
    pub fn to_records(&self) -> Vec<CellRecord> {
        self.cells.iter().copied().collect()
    }

    /// Marks every cell whose anchor lies inside `collider`, or within half a cell of it, as fixed.
    /// Returns the number of cells covered.
    pub fn mark_fixed(&mut self, collider: &dyn Collider) -> usize {
        let tolerance = self.domain.half_cell();
        let covered = AtomicUsize::new(0);

        Zip::from(&mut self.cells)
            .and(&mut self.claimed)
            .par_for_each(|cell, claimed| {
                if collider.contains(cell.anchor(), tolerance) {
                    cell.fix();
                    *claimed = true;
                    covered.fetch_add(1, Ordering::Relaxed);
                }
            });

        covered.into_inner()
    }

    /// Fixes a single cell without a collider behind it.
    pub fn mark_fixed_cell(&mut self, coord: IVec3) -> Result<(), SimulationError> {
        let idx = self.index(coord)?;
        self.cells[idx].fix();
        Ok(())
    }

    /// Fixes the cell containing `p`, clamping positions outside the grid to the nearest cell.
    /// Returns the coordinate of the fixed cell.
    pub fn mark_fixed_at(&mut self, p: Vec3) -> IVec3 {
        let coord = self.domain.clamp_coord(self.domain.cell_coord(p));
        let (i, j, k) = (coord.x as usize, coord.y as usize, coord.z as usize);
        self.cells[(i, j, k)].fix();
        coord
    }

    /// Recomputes which fixed cells are covered by `colliders`, after a collider was removed.
    pub fn refresh_claims(&mut self, colliders: &ColliderSet) {
        let tolerance = self.domain.half_cell();

        Zip::from(&self.cells)
            .and(&mut self.claimed)
            .par_for_each(|cell, claimed| {
                *claimed = cell.is_fixed() && colliders.claims(cell.anchor(), tolerance);
            });
    }

    /// Clears the per-frame state of every non-fixed cell.
    pub fn reset_dynamic(&mut self) {
        self.cells.par_map_inplace(|cell| {
            if !cell.is_fixed() {
                cell.point_count = 0;
                cell.occ = 0;
            }
        });
    }

    pub fn cell_at(&self, coord: IVec3) -> Result<&CellRecord, SimulationError> {
        let idx = self.index(coord)?;
        Ok(&self.cells[idx])
    }

    /// Position in the flat GPU buffer, `x * ny * nz + y * nz + z`.
    pub fn linear_index(&self, coord: IVec3) -> Result<usize, SimulationError> {
        let (i, j, k) = self.index(coord)?;
        let size = self.domain.size();
        Ok((i * size.y as usize + j) * size.z as usize + k)
    }

    #[inline]
    pub fn cell_coord(&self, p: Vec3) -> IVec3 {
        self.domain.cell_coord(p)
    }

    #[inline]
    pub fn clamp_coord(&self, coord: IVec3) -> IVec3 {
        self.domain.clamp_coord(coord)
    }

    #[inline]
    pub fn contains_coord(&self, coord: IVec3) -> bool {
        self.domain.contains_coord(coord)
    }

    /// Writes per-cell particle counts, given in buffer order, into the non-fixed cells and
    /// flags the ones reaching the occupancy threshold.
    pub(crate) fn apply_counts(&mut self, counts: &[AtomicU32]) {
        let threshold = self.occupancy_threshold;
        let size = self.domain.size();
        let (ny, nz) = (size.y as usize, size.z as usize);

        debug_assert_eq!(counts.len(), self.cells.len());

        Zip::indexed(&mut self.cells).par_for_each(|(i, j, k), cell| {
            if cell.is_fixed() {
                return;
            }

            let count = counts.get((i * ny + j) * nz + k).map_or(0, |c| c.load(Ordering::Relaxed));
            cell.point_count = count as i32;
            cell.occ = (count >= threshold) as u8;
        });
    }

    /// Unchecked lookup for coordinates the caller already clamped.
    #[inline]
    pub(crate) fn cell_clamped(&self, coord: IVec3) -> &CellRecord {
        debug_assert!(self.contains_coord(coord), "cell {coord} outside of grid");
        let c = self.clamp_coord(coord);
        &self.cells[(c.x as usize, c.y as usize, c.z as usize)]
    }

    #[inline]
    pub(crate) fn is_claimed(&self, coord: IVec3) -> bool {
        let c = self.clamp_coord(coord);
        self.claimed[(c.x as usize, c.y as usize, c.z as usize)]
    }

    pub fn total_points(&self) -> u64 {
        self.cells.iter().map(|c| c.point_count.max(0) as u64).sum()
    }

    pub fn occupied_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_occupied()).count()
    }

    pub fn fixed_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_fixed()).count()
    }

    fn index(&self, coord: IVec3) -> Result<(usize, usize, usize), SimulationError> {
        if !self.contains_coord(coord) {
            return Err(SimulationError::OutOfBounds {
                coord,
                size: self.domain.size(),
            });
        }

        Ok((coord.x as usize, coord.y as usize, coord.z as usize))
    }
}

#[cfg(test)]
mod tests {
    use std::mem;

    use glam::UVec3;

    use super::*;
    use crate::collider::{hexahedron::HexCollider, plane::PlaneCollider};

    fn grid(n: i32) -> SimulationGrid {
        SimulationGrid::initialize(DomainDescriptor::new(IVec3::splat(n), Vec3::ONE)).unwrap()
    }

    #[test]
    fn cell_record_matches_device_layout() {
        assert_eq!(mem::size_of::<CellRecord>(), 32);
        assert_eq!(mem::offset_of!(CellRecord, occ), 4);
        assert_eq!(mem::offset_of!(CellRecord, fixed), 5);
        assert_eq!(mem::offset_of!(CellRecord, position), 16);
    }

    #[test]
    fn anchors_follow_origin() {
        let domain = DomainDescriptor::new(IVec3::new(2, 3, 4), Vec3::new(0.5, 1.0, 2.0)).with_origin(Vec3::new(1.0, 0.0, -1.0));
        let grid = SimulationGrid::initialize(domain).unwrap();

        assert_eq!(grid.cell_at(IVec3::new(1, 2, 3)).unwrap().anchor(), Vec3::new(1.5, 2.0, 5.0));
        assert_eq!(grid.cell_at(IVec3::ZERO).unwrap().anchor(), domain.origin);
    }

    #[test]
    fn rejects_invalid_domain() {
        let domain = DomainDescriptor::new(IVec3::new(0, 4, 4), Vec3::ONE);
        assert!(matches!(SimulationGrid::initialize(domain), Err(SimulationError::InvalidDomain(_))));
    }

    #[test]
    fn cell_at_is_bounds_checked() {
        let grid = grid(4);

        assert!(grid.cell_at(IVec3::new(3, 3, 3)).is_ok());
        assert_eq!(
            grid.cell_at(IVec3::new(4, 0, 0)),
            Err(SimulationError::OutOfBounds { coord: IVec3::new(4, 0, 0), size: UVec3::splat(4) })
        );
        assert!(grid.cell_at(IVec3::new(0, -1, 0)).is_err());
    }

    #[test]
    fn linear_index_uses_buffer_order() {
        let domain = DomainDescriptor::new(IVec3::new(2, 3, 4), Vec3::ONE);
        let grid = SimulationGrid::initialize(domain).unwrap();

        assert_eq!(grid.linear_index(IVec3::new(0, 0, 1)).unwrap(), 1);
        assert_eq!(grid.linear_index(IVec3::new(0, 1, 0)).unwrap(), 4);
        assert_eq!(grid.linear_index(IVec3::new(1, 0, 0)).unwrap(), 12);

        let records = grid.to_records();
        let idx = grid.linear_index(IVec3::new(1, 2, 3)).unwrap();
        assert_eq!(records[idx].anchor(), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn floor_marks_bottom_layer() {
        let mut grid = grid(4);
        let floor = PlaneCollider::new(Vec3::ZERO, Vec3::Z * 4.0, Vec3::X * 4.0).unwrap();

        assert_eq!(grid.mark_fixed(&floor), 16);
        assert!(grid.cell_at(IVec3::new(2, 0, 2)).unwrap().is_fixed());
        assert!(!grid.cell_at(IVec3::new(2, 1, 2)).unwrap().is_fixed());
        assert!(grid.is_claimed(IVec3::new(2, 0, 2)));
    }

    #[test]
    fn marking_is_idempotent() {
        let mut once = grid(6);
        let hex = HexCollider::aabb(Vec3::splat(1.2), Vec3::splat(3.4)).unwrap();
        once.mark_fixed(&hex);

        let mut twice = once.clone();
        twice.mark_fixed(&hex);

        assert_eq!(once.to_records(), twice.to_records());
    }

    #[test]
    fn erased_cells_are_unclaimed() {
        let mut grid = grid(4);

        assert_eq!(grid.mark_fixed_at(Vec3::new(10.0, 1.5, -3.0)), IVec3::new(3, 1, 0));
        assert!(grid.cell_at(IVec3::new(3, 1, 0)).unwrap().is_fixed());
        assert!(!grid.is_claimed(IVec3::new(3, 1, 0)));

        grid.mark_fixed_cell(IVec3::new(0, 0, 0)).unwrap();
        assert_eq!(grid.fixed_count(), 2);
        assert!(grid.mark_fixed_cell(IVec3::new(0, 4, 0)).is_err());
    }

    #[test]
    fn reset_keeps_fixed_cells() {
        let mut grid = grid(3);
        grid.mark_fixed_cell(IVec3::new(1, 1, 1)).unwrap();

        let counts: Vec<AtomicU32> = (0..27).map(|_| AtomicU32::new(2)).collect();
        grid.apply_counts(&counts);
        assert_eq!(grid.total_points(), 52);
        assert_eq!(grid.occupied_count(), 26);

        grid.reset_dynamic();
        assert_eq!(grid.total_points(), 0);
        assert_eq!(grid.occupied_count(), 0);
        assert!(grid.cell_at(IVec3::new(1, 1, 1)).unwrap().is_fixed());
        assert!(grid.cells().iter().all(|c| !(c.is_fixed() && c.is_occupied())));
    }

    #[test]
    fn occupancy_threshold_gates_occ() {
        let mut grid = grid(2).with_occupancy_threshold(3);
        let counts: Vec<AtomicU32> = (0..8).map(|i| AtomicU32::new(i)).collect();
        grid.apply_counts(&counts);

        assert_eq!(grid.occupied_count(), 5);
        assert_eq!(grid.total_points(), 28);
    }

    #[test]
    fn removing_collider_releases_claims() {
        let mut grid = grid(4);
        let mut colliders = ColliderSet::new();
        let floor = PlaneCollider::new(Vec3::ZERO, Vec3::Z * 4.0, Vec3::X * 4.0).unwrap();
        grid.mark_fixed(&floor);
        let id = colliders.add(floor);

        colliders.remove(id);
        grid.refresh_claims(&colliders);

        assert!(grid.cell_at(IVec3::new(1, 0, 1)).unwrap().is_fixed());
        assert!(!grid.is_claimed(IVec3::new(1, 0, 1)));
    }
}
