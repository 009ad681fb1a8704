//! Invariants of the simulation grid under marking and stepping.
//!
//! Covers:
//! - fixed cells never being occupied or counted
//! - particle counts matching the particles scattered in a step
//! - collider marking agreeing with the collider's own containment test
//! - repeated marking and repeated runs giving identical results

use std::f32::consts::FRAC_PI_6;

use glam::{IVec3, Quat, Vec3};
use hydrocell_fluids::{
    collider::{hexahedron::HexCollider, plane::PlaneCollider, Collider},
    flip::flip_3d::{FlipFluid3D, FlipFluid3DParams},
    grid::SimulationGrid,
    scene::Scene,
    DomainDescriptor,
};

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn domain() -> DomainDescriptor {
    DomainDescriptor::new(IVec3::new(10, 8, 6), Vec3::new(0.25, 0.25, 0.5)).with_origin(Vec3::new(-1.0, 0.0, 0.5))
}

/// A box tank with an obstacle and a block of particles falling into it.
fn tank() -> Scene<FlipFluid3D, FlipFluid3DParams> {
    let domain = domain();
    let extent = domain.extent();
    let mut scene = Scene::new(FlipFluid3D::new(), FlipFluid3DParams::default(), domain).unwrap();

    scene.add_collider(PlaneCollider::new(domain.origin, Vec3::new(0.0, 0.0, extent.z), Vec3::new(extent.x, 0.0, 0.0)).unwrap());
    scene.add_collider(
        HexCollider::new(domain.origin + Vec3::new(1.5, 0.5, 1.5), Vec3::new(0.3, 0.5, 0.4), Quat::from_rotation_y(FRAC_PI_6)).unwrap(),
    );

    for i in 0..6 {
        for j in 0..4 {
            for k in 0..4 {
                let p = domain.origin + Vec3::new(0.1 + 0.15 * i as f32, 0.8 + 0.15 * j as f32, 0.2 + 0.5 * k as f32);
                scene.spawn(p, Vec3::new(0.5, 0.0, 0.0));
            }
        }
    }

    scene
}

/// Number of active particles lying in a non-fixed cell of `scene`'s grid.
fn expected_scatter(scene: &Scene<FlipFluid3D, FlipFluid3DParams>) -> u64 {
    let grid = scene.grid();

    scene
        .fluid
        .particles()
        .iter_active()
        .filter(|&(_, p, _)| {
            let coord = grid.cell_coord(*p);
            grid.cell_at(coord).is_ok_and(|cell| !cell.is_fixed())
        })
        .count() as u64
}

/// Asserts that `grid` has a fixed cell exactly where `collider` covers the cell's anchor.
fn assert_marking_matches(collider: &dyn Collider) {
    let mut grid = SimulationGrid::initialize(domain()).unwrap();
    let covered = grid.mark_fixed(collider);
    let tolerance = grid.domain().half_cell();

    let mut fixed = 0;
    for cell in grid.cells().iter() {
        assert_eq!(
            cell.is_fixed(),
            collider.contains(cell.anchor(), tolerance),
            "cell at {} disagrees with the collider",
            cell.anchor(),
        );
        fixed += cell.is_fixed() as usize;
    }

    assert_eq!(covered, fixed);
    assert!(covered > 0);
}

// =============================================================================
// MARKING
// =============================================================================

#[test]
fn marking_matches_box_containment() {
    let origin = domain().origin;
    assert_marking_matches(&HexCollider::aabb(origin + Vec3::new(0.4, 0.2, 0.6), origin + Vec3::new(1.3, 1.1, 2.0)).unwrap());
    assert_marking_matches(
        &HexCollider::new(origin + Vec3::new(1.2, 1.0, 1.5), Vec3::new(0.7, 0.2, 0.5), Quat::from_rotation_z(FRAC_PI_6)).unwrap(),
    );
}

#[test]
fn marking_matches_plane_containment() {
    let origin = domain().origin;
    assert_marking_matches(&PlaneCollider::new(origin + Vec3::new(0.0, 0.5, 0.0), Vec3::Z * 3.0, Vec3::X * 2.5).unwrap());
    assert_marking_matches(&PlaneCollider::new(origin + Vec3::new(1.0, 0.0, 0.5), Vec3::Y * 1.5, Vec3::Z * 2.0).unwrap());
}

#[test]
fn marking_twice_changes_nothing() {
    let mut grid = SimulationGrid::initialize(domain()).unwrap();
    let origin = grid.domain().origin;
    let hex = HexCollider::aabb(origin + Vec3::splat(0.3), origin + Vec3::splat(1.4)).unwrap();
    let plane = PlaneCollider::new(origin, Vec3::Z * 3.0, Vec3::X * 2.5).unwrap();

    grid.mark_fixed(&hex);
    grid.mark_fixed(&plane);
    let once = grid.to_records();

    grid.mark_fixed(&plane);
    grid.mark_fixed(&hex);
    assert_eq!(grid.to_records(), once);
}

// =============================================================================
// STEPPING
// =============================================================================

#[test]
fn fixed_cells_are_never_occupied() {
    let mut scene = tank();
    let fixed_before = scene.grid().fixed_count();

    for _ in 0..30 {
        scene.step(1.0 / 60.0).unwrap();

        for cell in scene.grid().cells().iter() {
            assert!(!(cell.is_fixed() && cell.is_occupied()), "fixed cell at {} is occupied", cell.anchor());
            if cell.is_fixed() {
                assert_eq!(cell.point_count, 0);
            }
        }
        assert_eq!(scene.grid().fixed_count(), fixed_before);
    }
}

#[test]
fn counts_match_scattered_particles() {
    let mut scene = tank();

    for _ in 0..20 {
        let expected = expected_scatter(&scene);
        let report = scene.step(1.0 / 60.0).unwrap();

        assert_eq!(report.scattered as u64, expected);
        assert_eq!(scene.grid().total_points(), expected);
    }
}

#[test]
fn occupancy_follows_threshold() {
    let domain = DomainDescriptor::new(IVec3::splat(4), Vec3::ONE);
    let grid = SimulationGrid::initialize(domain).unwrap().with_occupancy_threshold(2);
    let params = FlipFluid3DParams { gravity: Vec3::ZERO, ..Default::default() };
    let mut scene = Scene::from_grid(FlipFluid3D::new(), params, grid);

    scene.spawn(Vec3::new(0.5, 0.5, 0.5), Vec3::ZERO);
    scene.spawn(Vec3::new(2.2, 2.2, 2.2), Vec3::ZERO);
    scene.spawn(Vec3::new(2.7, 2.7, 2.7), Vec3::ZERO);
    scene.step(0.01).unwrap();

    assert_eq!(scene.grid().total_points(), 3);
    assert_eq!(scene.grid().occupied_count(), 1);
    assert!(scene.grid().cell_at(IVec3::splat(2)).unwrap().is_occupied());
}

#[test]
fn identical_scenes_step_identically() {
    let mut a = tank();
    let mut b = tank();

    for _ in 0..15 {
        a.step(1.0 / 60.0).unwrap();
        b.step(1.0 / 60.0).unwrap();
    }

    assert_eq!(a.cells(), b.cells());
    assert_eq!(a.vertices(), b.vertices());
}
