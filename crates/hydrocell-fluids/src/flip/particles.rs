use bytemuck::{Pod, Zeroable};
use glam::Vec3;

/// A particle as handed to the renderer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct ParticleVertex {
    pub position: [f32; 3],
    pub speed: f32,
}

/// Particle storage with stable slots.
///
/// Particles are never removed. Deactivated slots are skipped by the simulation and handed out
/// again by [`ParticleSet::spawn`], lowest index first.
#[derive(Debug, Clone, Default)]
pub struct ParticleSet {
    pub(crate) positions: Vec<Vec3>,
    pub(crate) velocities: Vec<Vec3>,
    pub(crate) active: Vec<bool>,
}

impl ParticleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a particle, reusing the first inactive slot if there is one. Returns its slot.
    pub fn spawn(&mut self, position: Vec3, velocity: Vec3) -> usize {
        if let Some(i) = self.active.iter().position(|a| !a) {
            self.positions[i] = position;
            self.velocities[i] = velocity;
            self.active[i] = true;
            return i;
        }

        self.positions.push(position);
        self.velocities.push(velocity);
        self.active.push(true);
        self.positions.len() - 1
    }

    pub fn deactivate(&mut self, i: usize) {
        if let Some(active) = self.active.get_mut(i) {
            *active = false;
        }
    }

    /// Number of slots, active or not.
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&a| a).count()
    }

    #[inline]
    pub fn is_active(&self, i: usize) -> bool {
        self.active.get(i).copied().unwrap_or(false)
    }

    #[inline]
    pub fn position(&self, i: usize) -> Option<Vec3> {
        self.positions.get(i).copied()
    }

    #[inline]
    pub fn velocity(&self, i: usize) -> Option<Vec3> {
        self.velocities.get(i).copied()
    }

    /// Active particles as `(slot, position, velocity)`.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &Vec3, &Vec3)> {
        self.positions
            .iter()
            .zip(self.velocities.iter())
            .zip(self.active.iter())
            .enumerate()
            .filter(|(_, (_, &a))| a)
            .map(|(i, ((p, v), _))| (i, p, v))
    }

    pub fn vertices(&self) -> Vec<ParticleVertex> {
        self.iter_active()
            .map(|(_, p, v)| ParticleVertex {
                position: p.to_array(),
                speed: v.length(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_reuses_inactive_slots() {
        let mut particles = ParticleSet::new();
        particles.spawn(Vec3::ZERO, Vec3::ZERO);
        particles.spawn(Vec3::ONE, Vec3::ZERO);
        particles.spawn(Vec3::splat(2.0), Vec3::ZERO);

        particles.deactivate(1);
        assert_eq!(particles.active_count(), 2);

        assert_eq!(particles.spawn(Vec3::splat(5.0), Vec3::X), 1);
        assert_eq!(particles.len(), 3);
        assert_eq!(particles.position(1), Some(Vec3::splat(5.0)));
        assert_eq!(particles.spawn(Vec3::ZERO, Vec3::ZERO), 3);
    }

    #[test]
    fn vertices_skip_inactive_particles() {
        let mut particles = ParticleSet::new();
        particles.spawn(Vec3::ZERO, Vec3::new(3.0, 4.0, 0.0));
        particles.spawn(Vec3::ONE, Vec3::ZERO);
        particles.deactivate(1);

        let vertices = particles.vertices();
        assert_eq!(vertices.len(), 1);
        assert_eq!(vertices[0].speed, 5.0);
        assert_eq!(std::mem::size_of::<ParticleVertex>(), 16);
    }
}
