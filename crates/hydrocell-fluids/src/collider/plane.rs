use bytemuck::{Pod, Zeroable};
use glam::Vec3;

use crate::error::SimulationError;

use super::{Collider, Contact, Sdf, SURFACE_EPSILON};

/// Triangle list indices covering the quad returned by [`PlaneCollider::quad_vertices`].
pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 2, 1, 3];

/// Distance behind the rectangle, per unit of coordinate magnitude, at which contacts from the
/// back side leave a particle. Must stay above [`SURFACE_EPSILON`] so that the particle is not
/// taken to be on the surface afterwards.
const BACK_OFFSET: f32 = 4.0 * SURFACE_EPSILON;

/// A bounded, two-sided rectangular barrier.
///
/// The rectangle is spanned by the edge vectors `u` and `v` from the corner `at`, which must be
/// perpendicular. Particles on either side are kept on the side they started on, and particles
/// lying on the rectangle itself count as being on the side the normal points to. Contacts from
/// the back side therefore stop particles slightly behind the rectangle instead of on it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaneCollider {
    at: Vec3,
    u: Vec3,
    v: Vec3,
    normal: Vec3,
}

impl PlaneCollider {
    pub fn new(at: Vec3, u: Vec3, v: Vec3) -> Result<Self, SimulationError> {
        if !at.is_finite() || !u.is_finite() || !v.is_finite() {
            return Err(SimulationError::InvalidCollider("plane vectors must be finite".into()));
        }

        if u.length() <= SURFACE_EPSILON || v.length() <= SURFACE_EPSILON {
            return Err(SimulationError::InvalidCollider(format!("degenerate plane edges {u} and {v}")));
        }

        if u.normalize().dot(v.normalize()).abs() > 1e-3 {
            return Err(SimulationError::InvalidCollider(format!("plane edges {u} and {v} are not perpendicular")));
        }

        Ok(Self {
            at,
            u,
            v,
            normal: u.cross(v).normalize(),
        })
    }

    /// Builds a plane from its edge vectors and explicit corners, checking that the corners are
    /// the ones the edges describe.
    pub fn from_parts(at: Vec3, u: Vec3, v: Vec3, corners: [Vec3; 4]) -> Result<Self, SimulationError> {
        let plane = Self::new(at, u, v)?;
        let scale = u.length().max(v.length()).max(1.0);

        for (i, (given, expected)) in corners.iter().zip(plane.corners()).enumerate() {
            if (*given - expected).length() > 1e-4 * scale {
                return Err(SimulationError::InvalidCollider(format!(
                    "plane corner p{i} is {given}, expected {expected}",
                )));
            }
        }

        Ok(plane)
    }

    pub fn from_uniform(uniform: &PlaneUniform) -> Result<Self, SimulationError> {
        let [at, u, v, p0, p1, p2, p3] = uniform.vectors.map(|p| Vec3::new(p[0], p[1], p[2]));
        Self::from_parts(at, u, v, [p0, p1, p2, p3])
    }

    #[inline]
    pub fn at(&self) -> Vec3 {
        self.at
    }

    #[inline]
    pub fn u(&self) -> Vec3 {
        self.u
    }

    #[inline]
    pub fn v(&self) -> Vec3 {
        self.v
    }

    /// Unit normal, `u × v` normalized.
    #[inline]
    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    /// The corners `at`, `at + u`, `at + v` and `at + u + v`.
    pub fn corners(&self) -> [Vec3; 4] {
        [self.at, self.at + self.u, self.at + self.v, self.at + self.u + self.v]
    }

    /// Vertices of the quad to render, indexed by [`QUAD_INDICES`].
    pub fn quad_vertices(&self) -> [Vec3; 4] {
        self.corners()
    }

    pub fn quad_indices(&self) -> [u32; 6] {
        QUAD_INDICES
    }

    pub fn uniform(&self) -> PlaneUniform {
        let [p0, p1, p2, p3] = self.corners();

        PlaneUniform {
            vectors: [self.at, self.u, self.v, p0, p1, p2, p3].map(|p| [p.x, p.y, p.z, 0.0]),
        }
    }

    /// Coordinates of `p` along the two edges, measured from `at`.
    #[inline]
    fn local(&self, p: Vec3) -> (f32, f32) {
        let d = p - self.at;
        (d.dot(self.u.normalize()), d.dot(self.v.normalize()))
    }

    #[inline]
    fn within_bounds(&self, p: Vec3, tolerance: f32) -> bool {
        let (a, b) = self.local(p);
        (-tolerance..=self.u.length() + tolerance).contains(&a) && (-tolerance..=self.v.length() + tolerance).contains(&b)
    }
}

impl Collider for PlaneCollider {
    /// Unsigned distance to the rectangle.
    fn sdf(&self, p: Vec3) -> Sdf {
        let (a, b) = self.local(p);
        let closest = self.at
            + self.u.normalize() * a.clamp(0.0, self.u.length())
            + self.v.normalize() * b.clamp(0.0, self.v.length());
        let offset = p - closest;
        let distance = offset.length();

        let gradient = if self.within_bounds(p, 0.0) || distance <= SURFACE_EPSILON {
            if self.normal.dot(p - self.at) < 0.0 {
                -self.normal
            } else {
                self.normal
            }
        } else {
            offset / distance
        };

        Sdf::new(distance, gradient)
    }

    fn contains(&self, p: Vec3, tolerance: f32) -> bool {
        self.normal.dot(p - self.at).abs() <= tolerance && self.within_bounds(p, tolerance)
    }

    fn sweep(&self, from: Vec3, to: Vec3) -> Option<Contact> {
        let d0 = self.normal.dot(from - self.at);
        let d1 = self.normal.dot(to - self.at);

        let (side, time) = if d0.abs() <= SURFACE_EPSILON {
            // Points on the surface belong to the front side.
            if d1 >= -SURFACE_EPSILON {
                return None;
            }
            (1.0, 0.0)
        } else {
            let side = d0.signum();
            if d1 * side > 0.0 {
                return None;
            }
            (side, d0 / (d0 - d1))
        };

        let hit = from + (to - from) * time;
        if !self.within_bounds(hit, SURFACE_EPSILON) {
            return None;
        }

        let point = if side < 0.0 {
            let scale = hit.abs().max_element().max(1.0);
            self.at - self.normal * BACK_OFFSET * scale
        } else {
            self.at
        };

        Some(Contact {
            point,
            normal: self.normal * side,
            time,
        })
    }
}

/// Plane collider as laid out in GPU memory: `at`, `u`, `v` and the four corners, each a 16 byte
/// aligned `float3`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PlaneUniform {
    pub vectors: [[f32; 4]; 7],
}

#[cfg(test)]
mod tests {
    use std::mem;

    use super::*;

    fn floor() -> PlaneCollider {
        PlaneCollider::new(Vec3::ZERO, Vec3::Z * 4.0, Vec3::X * 4.0).unwrap()
    }

    #[test]
    fn uniform_layout() {
        assert_eq!(mem::size_of::<PlaneUniform>(), 112);

        let uniform = floor().uniform();
        assert_eq!(uniform.vectors[6], [4.0, 0.0, 4.0, 0.0]);
        assert_eq!(PlaneCollider::from_uniform(&uniform).unwrap(), floor());
    }

    #[test]
    fn rejects_bad_planes() {
        assert!(matches!(
            PlaneCollider::new(Vec3::ZERO, Vec3::X, Vec3::new(1.0, 1.0, 0.0)),
            Err(SimulationError::InvalidCollider(_))
        ));
        assert!(matches!(
            PlaneCollider::new(Vec3::ZERO, Vec3::X, Vec3::ZERO),
            Err(SimulationError::InvalidCollider(_))
        ));

        let mut corners = floor().corners();
        corners[3].y += 1.0;
        assert!(matches!(
            PlaneCollider::from_parts(Vec3::ZERO, Vec3::Z * 4.0, Vec3::X * 4.0, corners),
            Err(SimulationError::InvalidCollider(_))
        ));
    }

    #[test]
    fn quad_covers_the_rectangle() {
        let plane = floor();
        let vertices = plane.quad_vertices();

        assert_eq!(vertices[0], Vec3::ZERO);
        assert_eq!(vertices[3], Vec3::new(4.0, 0.0, 4.0));
        assert_eq!(plane.quad_indices(), [0, 1, 2, 2, 1, 3]);
        assert_eq!(plane.normal(), Vec3::Y);
    }

    #[test]
    fn contains_is_bounded() {
        let plane = floor();

        assert!(plane.contains(Vec3::new(1.0, 0.0, 1.0), 0.0));
        assert!(plane.contains(Vec3::new(1.0, 0.4, 1.0), 0.5));
        assert!(!plane.contains(Vec3::new(1.0, 0.6, 1.0), 0.5));
        assert!(!plane.contains(Vec3::new(5.0, 0.0, 1.0), 0.5));
    }

    #[test]
    fn sweep_is_two_sided() {
        let plane = floor();

        let above = plane.sweep(Vec3::new(1.0, 1.0, 1.0), Vec3::new(1.0, -1.0, 1.0)).unwrap();
        assert_eq!(above.normal, Vec3::Y);
        assert_eq!(above.time, 0.5);
        assert_eq!(above.clamp(Vec3::new(1.0, -1.0, 1.0)), Vec3::new(1.0, 0.0, 1.0));

        let below = plane.sweep(Vec3::new(1.0, -1.0, 1.0), Vec3::new(1.0, 1.0, 1.0)).unwrap();
        assert_eq!(below.normal, -Vec3::Y);

        assert!(plane.sweep(Vec3::new(1.0, 1.0, 1.0), Vec3::new(1.0, 0.5, 1.0)).is_none());
        assert!(plane.sweep(Vec3::new(6.0, 1.0, 1.0), Vec3::new(6.0, -1.0, 1.0)).is_none());
    }

    #[test]
    fn resting_particle_stays_on_surface() {
        let plane = floor();
        let rest = Vec3::new(2.0, 0.0, 2.0);

        let contact = plane.sweep(rest, rest - Vec3::Y * 0.01).unwrap();
        assert_eq!(contact.time, 0.0);
        assert_eq!(contact.clamp(rest - Vec3::Y * 0.01), rest);
        assert_eq!(contact.reflect(Vec3::new(0.5, -0.1, 0.0), 0.0), Vec3::new(0.5, 0.0, 0.0));

        assert!(plane.sweep(rest, rest + Vec3::Y * 0.01).is_none());
    }

    #[test]
    fn back_side_contact_stays_behind() {
        let plane = floor();
        let to = Vec3::new(1.0, 1.0, 1.0);

        let contact = plane.sweep(Vec3::new(1.0, -1.0, 1.0), to).unwrap();
        let stopped = contact.clamp(to);
        assert!(stopped.y < -SURFACE_EPSILON && stopped.y > -1e-3, "stopped at {stopped}");
        assert_eq!(contact.reflect(Vec3::new(0.0, 3.0, 0.0), 0.0), Vec3::ZERO);

        // Falling away from the underside is free, pushing back up is stopped again.
        assert!(plane.sweep(stopped, stopped - Vec3::Y * 0.5).is_none());
        assert!(plane.sweep(stopped, stopped - Vec3::Y * 1e-6).is_none());

        let again = plane.sweep(stopped, stopped + Vec3::Y * 0.5).unwrap();
        assert_eq!(again.normal, -Vec3::Y);
        assert!(again.clamp(stopped + Vec3::Y * 0.5).y < 0.0);
    }
}
