use bytemuck::{Pod, Zeroable};
use glam::{Quat, Vec3};

use crate::error::SimulationError;

use super::{Collider, Contact, Sdf, SURFACE_EPSILON};

/// Maximum cosine between two box axes for them to count as orthogonal.
const ORTHOGONALITY_TOLERANCE: f32 = 1e-3;

/// An oriented box obstacle.
///
/// On the device the box is described by the centers of its six faces, in opposite pairs
/// `(p0, p1)`, `(p2, p3)` and `(p4, p5)`. Internally it is kept as a center, three orthonormal
/// axes and the half extent along each axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexCollider {
    center: Vec3,
    axes: [Vec3; 3],
    half_extents: Vec3,
}

impl HexCollider {
    pub fn new(center: Vec3, half_extents: Vec3, rotation: Quat) -> Result<Self, SimulationError> {
        if !center.is_finite() || !half_extents.is_finite() || half_extents.cmple(Vec3::splat(SURFACE_EPSILON)).any() {
            return Err(SimulationError::InvalidCollider(format!(
                "box needs a finite center and positive half extents, got {center} and {half_extents}",
            )));
        }

        let rotation = rotation.normalize();

        Ok(Self {
            center,
            axes: [rotation * Vec3::X, rotation * Vec3::Y, rotation * Vec3::Z],
            half_extents,
        })
    }

    /// An axis aligned box spanning `min` to `max`.
    pub fn aabb(min: Vec3, max: Vec3) -> Result<Self, SimulationError> {
        let center = 0.5 * (min + max);
        let half_extents = 0.5 * (max - min);

        if !center.is_finite() || !half_extents.is_finite() || half_extents.cmple(Vec3::splat(SURFACE_EPSILON)).any() {
            return Err(SimulationError::InvalidCollider(format!("empty box from {min} to {max}")));
        }

        Ok(Self {
            center,
            axes: [Vec3::X, Vec3::Y, Vec3::Z],
            half_extents,
        })
    }

    /// Builds the box from its six face centers.
    ///
    /// Each opposite pair must share the box center as its midpoint and the three pair axes
    /// must be mutually orthogonal.
    pub fn from_face_points(points: [Vec3; 6]) -> Result<Self, SimulationError> {
        if points.iter().any(|p| !p.is_finite()) {
            return Err(SimulationError::InvalidCollider("face points must be finite".into()));
        }

        let center = points.iter().copied().sum::<Vec3>() / 6.0;
        let scale = points.iter().map(|p| (*p - center).length()).fold(1.0, f32::max);

        let mut axes = [Vec3::ZERO; 3];
        let mut half_extents = [0.0; 3];

        for (pair, (axis, half_extent)) in axes.iter_mut().zip(half_extents.iter_mut()).enumerate() {
            let a = points[2 * pair];
            let b = points[2 * pair + 1];

            if (0.5 * (a + b) - center).length() > 1e-4 * scale {
                return Err(SimulationError::InvalidCollider(format!(
                    "faces p{} and p{} are not centered on the box center {center}",
                    2 * pair,
                    2 * pair + 1,
                )));
            }

            let d = 0.5 * (a - b);
            *half_extent = d.length();

            if *half_extent <= SURFACE_EPSILON {
                return Err(SimulationError::InvalidCollider(format!(
                    "faces p{} and p{} coincide",
                    2 * pair,
                    2 * pair + 1,
                )));
            }

            *axis = d / *half_extent;
        }

        for (i, j) in [(0, 1), (0, 2), (1, 2)] {
            if axes[i].dot(axes[j]).abs() > ORTHOGONALITY_TOLERANCE {
                return Err(SimulationError::InvalidCollider(format!(
                    "box axes {i} and {j} are not orthogonal",
                )));
            }
        }

        Ok(Self {
            center,
            axes,
            half_extents: Vec3::from_array(half_extents),
        })
    }

    pub fn from_uniform(uniform: &CubeUniform) -> Result<Self, SimulationError> {
        Self::from_face_points(uniform.points.map(|p| Vec3::new(p[0], p[1], p[2])))
    }

    #[inline]
    pub fn center(&self) -> Vec3 {
        self.center
    }

    #[inline]
    pub fn half_extents(&self) -> Vec3 {
        self.half_extents
    }

    #[inline]
    pub fn axes(&self) -> [Vec3; 3] {
        self.axes
    }

    /// The six face centers, `p0` and `p1` on the first axis and so on.
    pub fn face_points(&self) -> [Vec3; 6] {
        let [x, y, z] = self.axes;
        let h = self.half_extents;

        [
            self.center + x * h.x,
            self.center - x * h.x,
            self.center + y * h.y,
            self.center - y * h.y,
            self.center + z * h.z,
            self.center - z * h.z,
        ]
    }

    pub fn uniform(&self) -> CubeUniform {
        CubeUniform {
            points: self.face_points().map(|p| [p.x, p.y, p.z, 0.0]),
        }
    }

    #[inline]
    fn to_local(&self, p: Vec3) -> Vec3 {
        let d = p - self.center;
        Vec3::new(d.dot(self.axes[0]), d.dot(self.axes[1]), d.dot(self.axes[2]))
    }

    /// The contact plane of the face on `axis`, on the side given by `sign`.
    #[inline]
    fn face_contact(&self, axis: usize, sign: f32, time: f32) -> Contact {
        let normal = self.axes[axis] * sign;

        Contact {
            point: self.center + normal * self.half_extents[axis],
            normal,
            time,
        }
    }

    /// The face closest to a local point, as `(axis, sign)`.
    fn nearest_face(&self, local: Vec3) -> (usize, f32) {
        let q = local.abs() - self.half_extents;
        let axis = if q.x >= q.y && q.x >= q.z {
            0
        } else if q.y >= q.z {
            1
        } else {
            2
        };

        (axis, if local[axis] < 0.0 { -1.0 } else { 1.0 })
    }
}

impl Collider for HexCollider {
    fn sdf(&self, p: Vec3) -> Sdf {
        let local = self.to_local(p);
        let q = local.abs() - self.half_extents;
        let outside = q.max(Vec3::ZERO);

        if outside.length_squared() > 0.0 {
            let local_gradient = outside.normalize() * local.signum();
            let gradient = self.axes[0] * local_gradient.x
                + self.axes[1] * local_gradient.y
                + self.axes[2] * local_gradient.z;

            Sdf::new(outside.length(), gradient)
        } else {
            let (axis, sign) = self.nearest_face(local);
            Sdf::new(q.max_element(), self.axes[axis] * sign)
        }
    }

    fn contains(&self, p: Vec3, tolerance: f32) -> bool {
        self.sdf(p).distance <= tolerance
    }

    fn sweep(&self, from: Vec3, to: Vec3) -> Option<Contact> {
        let o = self.to_local(from);
        let d = self.to_local(to) - o;
        let h = self.half_extents;

        if (o.abs() - h).max_element() <= SURFACE_EPSILON {
            // Started inside or on the surface. Only report a contact when the motion goes
            // deeper into the box.
            let (axis, sign) = self.nearest_face(o);
            if d[axis] * sign < 0.0 || (self.to_local(to).abs() - h).max_element() < -SURFACE_EPSILON {
                return Some(self.face_contact(axis, sign, 0.0));
            }
            return None;
        }

        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;
        let mut entry = (0, 1.0);

        for axis in 0..3 {
            if d[axis].abs() <= f32::EPSILON {
                if o[axis].abs() > h[axis] {
                    return None;
                }
                continue;
            }

            let t1 = (-h[axis] - o[axis]) / d[axis];
            let t2 = (h[axis] - o[axis]) / d[axis];
            let (t_min, t_max) = if t1 < t2 { (t1, t2) } else { (t2, t1) };

            if t_min > t_near {
                t_near = t_min;
                entry = (axis, if d[axis] > 0.0 { -1.0 } else { 1.0 });
            }
            t_far = t_far.min(t_max);
        }

        if t_near > t_far || !(0.0..=1.0).contains(&t_near) {
            return None;
        }

        Some(self.face_contact(entry.0, entry.1, t_near))
    }
}

/// Box collider as laid out in GPU memory: six 16 byte aligned face points.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CubeUniform {
    pub points: [[f32; 4]; 6],
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_4;

    use super::*;

    fn unit_box() -> HexCollider {
        HexCollider::aabb(Vec3::ZERO, Vec3::ONE).unwrap()
    }

    #[test]
    fn face_points_round_trip() {
        let hex = HexCollider::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 1.0, 2.0), Quat::from_rotation_y(FRAC_PI_4)).unwrap();
        let rebuilt = HexCollider::from_face_points(hex.face_points()).unwrap();

        assert!((rebuilt.center() - hex.center()).length() < 1e-5);
        assert!((rebuilt.half_extents() - hex.half_extents()).length() < 1e-5);
        for (a, b) in rebuilt.axes().iter().zip(hex.axes().iter()) {
            assert!((*a - *b).length() < 1e-5);
        }
    }

    #[test]
    fn rejects_inconsistent_face_points() {
        let mut points = unit_box().face_points();
        points[1] += Vec3::new(0.0, 0.3, 0.0);
        assert!(matches!(HexCollider::from_face_points(points), Err(SimulationError::InvalidCollider(_))));

        let skewed = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(0.0, 0.0, -1.0),
        ];
        assert!(matches!(HexCollider::from_face_points(skewed), Err(SimulationError::InvalidCollider(_))));
    }

    #[test]
    fn containment_and_nearest_face() {
        let hex = unit_box();

        assert!(hex.contains(Vec3::splat(0.5), 0.0));
        assert!(hex.contains(Vec3::new(1.0, 0.5, 0.5), 0.0));
        assert!(!hex.contains(Vec3::new(1.2, 0.5, 0.5), 0.0));
        assert!(hex.contains(Vec3::new(1.2, 0.5, 0.5), 0.25));

        let sdf = hex.sdf(Vec3::new(0.5, 0.9, 0.5));
        assert!((sdf.distance + 0.1).abs() < 1e-6);
        assert_eq!(sdf.gradient, Vec3::Y);
    }

    #[test]
    fn rotated_box_containment() {
        let hex = HexCollider::new(Vec3::ZERO, Vec3::new(2.0, 0.5, 0.5), Quat::from_rotation_y(FRAC_PI_4)).unwrap();
        let diagonal = Vec3::new(1.0, 0.0, -1.0);

        assert!(hex.contains(diagonal, 0.0));
        assert!(!hex.contains(Vec3::new(1.0, 0.0, 1.0), 0.0));
    }

    #[test]
    fn sweep_stops_at_entry_face() {
        let hex = unit_box();
        let contact = hex.sweep(Vec3::new(0.5, 2.0, 0.5), Vec3::new(0.5, 0.5, 0.5)).unwrap();

        assert_eq!(contact.normal, Vec3::Y);
        assert!((contact.time - 2.0 / 3.0).abs() < 1e-6);
        assert_eq!(contact.clamp(Vec3::new(0.5, 0.5, 0.5)), Vec3::new(0.5, 1.0, 0.5));
    }

    #[test]
    fn sweep_catches_tunnelling() {
        let hex = unit_box();
        let contact = hex.sweep(Vec3::new(-1.0, 0.5, 0.5), Vec3::new(3.0, 0.5, 0.5)).unwrap();

        assert_eq!(contact.normal, -Vec3::X);
        assert_eq!(contact.clamp(Vec3::new(3.0, 0.5, 0.5)).x, 0.0);
    }

    #[test]
    fn resting_on_top_face() {
        let hex = unit_box();
        let rest = Vec3::new(0.5, 1.0, 0.5);

        let contact = hex.sweep(rest, rest - Vec3::Y * 0.1).unwrap();
        assert_eq!(contact.clamp(rest - Vec3::Y * 0.1), rest);

        assert!(hex.sweep(rest, rest + Vec3::Y * 0.1).is_none());
        assert!(hex.sweep(Vec3::new(0.5, 2.0, 0.5), Vec3::new(2.0, 2.0, 0.5)).is_none());
    }
}
