use std::collections::BTreeMap;

use glam::Vec3;

pub mod hexahedron;
pub mod plane;

/// Distance below which a point is considered to lie on a collider surface.
pub const SURFACE_EPSILON: f32 = 1e-5;

/// A static obstacle the fluid collides with.
pub trait Collider: Send + Sync {
    /// Signed distance to the collider surface along with the outward surface normal closest to
    /// `p`. Negative inside.
    fn sdf(&self, p: Vec3) -> Sdf;

    /// Whether `p` lies inside the collider or within `tolerance` of it.
    fn contains(&self, p: Vec3, tolerance: f32) -> bool;

    /// First contact along the segment travelled from `from` to `to`, if any.
    fn sweep(&self, from: Vec3, to: Vec3) -> Option<Contact>;
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Sdf {
    pub distance: f32,
    pub gradient: Vec3,
}

impl Sdf {
    pub fn new(distance: f32, gradient: Vec3) -> Sdf {
        Sdf { distance, gradient }
    }
}

/// A contact with a collider surface.
///
/// The surface is locally the plane through `point` with unit `normal`, which points towards
/// the side the particle arrived from. `time` is the fraction of the swept segment travelled
/// before touching the surface.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    pub point: Vec3,
    pub normal: Vec3,
    pub time: f32,
}

impl Contact {
    /// Projects `p` onto the contact plane.
    #[inline]
    pub fn clamp(&self, p: Vec3) -> Vec3 {
        p - self.normal * self.normal.dot(p - self.point)
    }

    /// Removes the velocity component going into the surface, keeping `restitution` of it as a
    /// bounce. Velocities leaving the surface are untouched.
    #[inline]
    pub fn reflect(&self, v: Vec3, restitution: f32) -> Vec3 {
        let vn = self.normal.dot(v);
        if vn < 0.0 {
            v - self.normal * vn * (1.0 + restitution)
        } else {
            v
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColliderId(pub usize);

/// The colliders of a scene, iterated in insertion order.
#[derive(Default)]
pub struct ColliderSet {
    colliders: BTreeMap<usize, Box<dyn Collider>>,
    n_colliders: usize,
}

impl ColliderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a collider to the set, returning its ID.
    pub fn add<T: Collider + 'static>(&mut self, collider: T) -> ColliderId {
        let i = self.n_colliders;
        self.n_colliders += 1;

        self.colliders.insert(i, Box::new(collider));
        ColliderId(i)
    }

    /// Removes a collider from the set, given its ID.
    pub fn remove(&mut self, id: ColliderId) -> Option<Box<dyn Collider>> {
        self.colliders.remove(&id.0)
    }

    pub fn get(&self, id: ColliderId) -> Option<&dyn Collider> {
        self.colliders.get(&id.0).map(|c| c.as_ref())
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ColliderId, &dyn Collider)> {
        self.colliders.iter().map(|(&i, c)| (ColliderId(i), c.as_ref()))
    }

    /// Whether any collider covers `p` within `tolerance`.
    pub fn claims(&self, p: Vec3, tolerance: f32) -> bool {
        self.colliders.values().any(|c| c.contains(p, tolerance))
    }
}

impl Collider for ColliderSet {
    fn sdf(&self, p: Vec3) -> Sdf {
        let mut dist = f32::MAX;
        let mut gradient = Vec3::ZERO;

        for collider in self.colliders.values() {
            let sd = collider.sdf(p);
            if dist > sd.distance {
                dist = sd.distance;
                gradient = sd.gradient;
            }
        }

        Sdf::new(dist, gradient)
    }

    fn contains(&self, p: Vec3, tolerance: f32) -> bool {
        self.claims(p, tolerance)
    }

    /// The earliest contact over all colliders.
    fn sweep(&self, from: Vec3, to: Vec3) -> Option<Contact> {
        self.colliders
            .values()
            .filter_map(|c| c.sweep(from, to))
            .min_by(|a, b| a.time.total_cmp(&b.time))
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{hexahedron::HexCollider, plane::PlaneCollider, *};

    #[test]
    fn reflect_keeps_tangential_velocity() {
        let contact = Contact { point: Vec3::ZERO, normal: Vec3::Y, time: 0.0 };

        assert_eq!(contact.reflect(Vec3::new(1.0, -2.0, 3.0), 0.0), Vec3::new(1.0, 0.0, 3.0));
        assert_eq!(contact.reflect(Vec3::new(1.0, -2.0, 3.0), 0.5), Vec3::new(1.0, 1.0, 3.0));
        assert_eq!(contact.reflect(Vec3::new(0.0, 2.0, 0.0), 0.0), Vec3::new(0.0, 2.0, 0.0));
    }

    #[test]
    fn set_reports_nearest_collider() {
        let mut set = ColliderSet::new();
        set.add(HexCollider::aabb(Vec3::new(4.0, 0.0, 0.0), Vec3::new(5.0, 1.0, 1.0)).unwrap());
        let floor = set.add(PlaneCollider::new(Vec3::ZERO, Vec3::Z * 10.0, Vec3::X * 10.0).unwrap());

        let sdf = set.sdf(Vec3::new(1.0, 0.5, 1.0));
        assert!((sdf.distance - 0.5).abs() < 1e-6);
        assert_eq!(sdf.gradient, Vec3::Y);

        assert!(set.claims(Vec3::new(4.5, 0.5, 0.5), 0.0));
        assert!(set.remove(floor).is_some());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn set_sweep_picks_earliest_contact() {
        let mut set = ColliderSet::new();
        set.add(PlaneCollider::new(Vec3::ZERO, Vec3::Z * 10.0, Vec3::X * 10.0).unwrap());
        set.add(PlaneCollider::new(Vec3::new(0.0, 1.0, 0.0), Vec3::Z * 10.0, Vec3::X * 10.0).unwrap());

        let contact = set.sweep(Vec3::new(1.0, 2.0, 1.0), Vec3::new(1.0, -1.0, 1.0)).unwrap();
        assert_eq!(contact.clamp(Vec3::new(1.0, -1.0, 1.0)).y, 1.0);
    }
}
