use glam::{IVec3, Vec3};
use ndarray::{Array3, Zip};
use smallvec::SmallVec;

use crate::{domain::DomainDescriptor, grid::SimulationGrid};

/// Trilinear stencil into one face array: up to eight `(index, weight)` pairs.
type Stencil = SmallVec<[((usize, usize, usize), f32); 8]>;

/// One velocity component sampled at the centers of the cell faces orthogonal to its axis.
#[derive(Debug, Clone)]
pub struct FaceField {
    /// Velocities after the field solve.
    pub values: Array3<f32>,
    /// Velocities as transferred from the particles, before any forces.
    pub star: Array3<f32>,
    /// Accumulated splat weights.
    pub weights: Array3<f32>,
    /// Faces carrying a velocity, either splatted or extrapolated.
    pub valid: Array3<bool>,
    /// Position of face `(0, 0, 0)` relative to the grid origin, in cells.
    offset: Vec3,
}

impl FaceField {
    fn new(shape: (usize, usize, usize), offset: Vec3) -> Self {
        Self {
            values: Array3::zeros(shape),
            star: Array3::zeros(shape),
            weights: Array3::zeros(shape),
            valid: Array3::from_elem(shape, false),
            offset,
        }
    }

    fn clear(&mut self) {
        self.values.fill(0.0);
        self.weights.fill(0.0);
        self.valid.fill(false);
    }

    /// Trilinear weights of the faces surrounding `g`, a position in cell units.
    fn stencil(&self, g: Vec3) -> Stencil {
        let local = g - self.offset;
        let base = local.floor();
        let t = local - base;
        let base = base.as_ivec3();
        let (sx, sy, sz) = self.values.dim();

        let mut stencil = Stencil::new();
        for corner in 0..8 {
            let d = IVec3::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let c = base + d;

            if c.cmplt(IVec3::ZERO).any() || c.x as usize >= sx || c.y as usize >= sy || c.z as usize >= sz {
                continue;
            }

            let w = Vec3::select(d.cmpeq(IVec3::ONE), t, 1.0 - t);
            stencil.push(((c.x as usize, c.y as usize, c.z as usize), w.x * w.y * w.z));
        }

        stencil
    }

    fn splat(&mut self, g: Vec3, value: f32) {
        for (idx, w) in self.stencil(g) {
            if w <= 0.0 {
                continue;
            }

            self.values[idx] += w * value;
            self.weights[idx] += w;
        }
    }

    fn normalize(&mut self) {
        Zip::from(&mut self.values)
            .and(&self.weights)
            .and(&mut self.valid)
            .for_each(|value, &weight, valid| {
                if weight > 0.0 {
                    *value /= weight;
                    *valid = true;
                }
            });
    }

    /// Fills invalid faces with the average of their valid axis neighbours, one layer deep.
    fn extrapolate(&mut self) {
        let known = self.valid.clone();
        let (sx, sy, sz) = known.dim();

        for ((i, j, k), valid) in self.valid.indexed_iter_mut() {
            if *valid {
                continue;
            }

            let mut sum = 0.0;
            let mut count = 0;

            let neighbours = [
                (i.wrapping_sub(1), j, k),
                (i + 1, j, k),
                (i, j.wrapping_sub(1), k),
                (i, j + 1, k),
                (i, j, k.wrapping_sub(1)),
                (i, j, k + 1),
            ];

            for n in neighbours {
                if n.0 < sx && n.1 < sy && n.2 < sz && known[n] {
                    sum += self.values[n];
                    count += 1;
                }
            }

            if count > 0 {
                self.values[(i, j, k)] = sum / count as f32;
                *valid = true;
            }
        }
    }

    fn apply_force(&mut self, dv: f32) {
        Zip::from(&mut self.values).and(&self.valid).for_each(|value, &valid| {
            if valid {
                *value += dv;
            }
        });
    }

    /// Interpolated `(new, old)` velocity at `g`, using valid faces only.
    fn sample(&self, g: Vec3) -> Option<(f32, f32)> {
        let mut total = 0.0;
        let mut new = 0.0;
        let mut old = 0.0;

        for (idx, w) in self.stencil(g) {
            if !self.valid[idx] || w <= 0.0 {
                continue;
            }

            total += w;
            new += w * self.values[idx];
            old += w * self.star[idx];
        }

        (total > 0.0).then(|| (new / total, old / total))
    }
}

/// Staggered (marker-and-cell) velocity field over the simulation grid.
#[derive(Debug, Clone)]
pub struct MacGrid3D {
    pub domain: DomainDescriptor,
    /// Number of cells in the X direction.
    pub nx: usize,
    /// Number of cells in the Y direction.
    pub ny: usize,
    /// Number of cells in the Z direction.
    pub nz: usize,
    /// 1.0 / cell length
    pub inv_spacing: Vec3,

    /// Grid velocities in the X direction.
    pub u: FaceField,
    /// Grid velocities in the Y direction.
    pub v: FaceField,
    /// Grid velocities in the Z direction.
    pub w: FaceField,
}

impl MacGrid3D {
    pub fn new(domain: &DomainDescriptor) -> Self {
        let size = domain.size();
        let nx = size.x as usize;
        let ny = size.y as usize;
        let nz = size.z as usize;

        Self {
            domain: *domain,
            nx,
            ny,
            nz,
            inv_spacing: domain.cell_length.recip(),
            u: FaceField::new((nx + 1, ny, nz), Vec3::new(0.0, 0.5, 0.5)),
            v: FaceField::new((nx, ny + 1, nz), Vec3::new(0.5, 0.0, 0.5)),
            w: FaceField::new((nx, ny, nz + 1), Vec3::new(0.5, 0.5, 0.0)),
        }
    }

    /// Position in cell units.
    #[inline]
    fn to_grid(&self, p: Vec3) -> Vec3 {
        (p - self.domain.origin) * self.inv_spacing
    }

    /// Splats particle velocities onto the faces, then extends the field one face past the
    /// fluid so that gathers near its surface see a full stencil.
    pub fn particle_to_grid<'a>(&mut self, particles: impl Iterator<Item = (&'a Vec3, &'a Vec3)>) {
        self.u.clear();
        self.v.clear();
        self.w.clear();

        for (p, vel) in particles {
            let g = self.to_grid(*p);
            self.u.splat(g, vel.x);
            self.v.splat(g, vel.y);
            self.w.splat(g, vel.z);
        }

        for field in [&mut self.u, &mut self.v, &mut self.w] {
            field.normalize();
            field.extrapolate();
            field.star.assign(&field.values);
        }
    }

    /// Adds a uniform acceleration to every valid face.
    pub fn apply_body_force(&mut self, gravity: Vec3, dt: f32) {
        self.u.apply_force(gravity.x * dt);
        self.v.apply_force(gravity.y * dt);
        self.w.apply_force(gravity.z * dt);
    }

    /// Gauss-Seidel pressure projection over the occupied cells of `grid`.
    ///
    /// Fixed cells are never unknowns and the faces they share are left untouched. Neighbours
    /// outside the grid count as open. Returns the largest remaining divergence.
    pub fn solve_pressure(&mut self, grid: &SimulationGrid, num_iters: usize, over_relaxation: f32) -> f32 {
        let cells = grid.cells();
        let (nx, ny, nz) = (self.nx, self.ny, self.nz);
        let h1 = self.inv_spacing;
        let h2 = h1 * h1;

        let open = |i: usize, j: usize, k: usize, di: isize, dj: isize, dk: isize| -> f32 {
            let ni = i as isize + di;
            let nj = j as isize + dj;
            let nk = k as isize + dk;

            if ni < 0 || nj < 0 || nk < 0 || ni >= nx as isize || nj >= ny as isize || nk >= nz as isize {
                return 1.0;
            }

            if cells[(ni as usize, nj as usize, nk as usize)].is_fixed() { 0.0 } else { 1.0 }
        };

        let mut max_div: f32 = 0.0;

        for iter in 0..num_iters {
            let last = iter + 1 == num_iters;

            for i in 0..nx {
                for j in 0..ny {
                    for k in 0..nz {
                        if !cells[(i, j, k)].is_occupied() {
                            continue;
                        }

                        let sx0 = open(i, j, k, -1, 0, 0);
                        let sx1 = open(i, j, k, 1, 0, 0);
                        let sy0 = open(i, j, k, 0, -1, 0);
                        let sy1 = open(i, j, k, 0, 1, 0);
                        let sz0 = open(i, j, k, 0, 0, -1);
                        let sz1 = open(i, j, k, 0, 0, 1);

                        let s = (sx0 + sx1) * h2.x + (sy0 + sy1) * h2.y + (sz0 + sz1) * h2.z;
                        if s == 0.0 {
                            continue;
                        }

                        let div = (self.u.values[(i + 1, j, k)] - self.u.values[(i, j, k)]) * h1.x
                            + (self.v.values[(i, j + 1, k)] - self.v.values[(i, j, k)]) * h1.y
                            + (self.w.values[(i, j, k + 1)] - self.w.values[(i, j, k)]) * h1.z;

                        if last {
                            max_div = max_div.max(div.abs());
                        }

                        let p = -div / s * over_relaxation;

                        self.u.values[(i, j, k)] -= sx0 * p * h1.x;
                        self.u.values[(i + 1, j, k)] += sx1 * p * h1.x;
                        self.v.values[(i, j, k)] -= sy0 * p * h1.y;
                        self.v.values[(i, j + 1, k)] += sy1 * p * h1.y;
                        self.w.values[(i, j, k)] -= sz0 * p * h1.z;
                        self.w.values[(i, j, k + 1)] += sz1 * p * h1.z;
                    }
                }
            }
        }

        max_div
    }

    /// Interpolated `(new, old)` velocity at `p` per component, `None` for components with no
    /// valid face nearby.
    pub fn sample(&self, p: Vec3) -> [Option<(f32, f32)>; 3] {
        let g = self.to_grid(p);
        [self.u.sample(g), self.v.sample(g), self.w.sample(g)]
    }

    /// Solved grid velocity at `p`, clamped into the grid. Components without any valid face
    /// nearby are zero, as is the velocity at non-finite positions.
    pub fn velocity(&self, p: Vec3) -> Vec3 {
        if !p.is_finite() {
            return Vec3::ZERO;
        }

        let p = p.clamp(self.domain.origin, self.domain.max());
        let [u, v, w] = self.sample(p).map(|s| s.map_or(0.0, |(new, _)| new));
        Vec3::new(u, v, w)
    }
}
