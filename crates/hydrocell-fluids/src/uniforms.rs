use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use crate::{
    domain::{DomainDescriptor, GridUniform},
    error::SimulationError,
};

/// Camera transforms as laid out in GPU memory, column major.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

impl CameraUniforms {
    pub fn new(model: Mat4, view: Mat4, projection: Mat4) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
        }
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }

    pub fn view(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.view)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.projection)
    }
}

impl Default for CameraUniforms {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// Everything the GPU needs for one frame besides the cell and particle buffers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub camera: CameraUniforms,
    pub grid: GridUniform,
}

/// Builds the per-frame uniforms. The matrices are passed through unchanged; only the projection
/// is checked for invertibility.
#[derive(Debug, Clone)]
pub struct FrameUniformBuilder {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
    domain: DomainDescriptor,
}

impl FrameUniformBuilder {
    pub fn new(domain: DomainDescriptor) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            domain,
        }
    }

    pub fn model(mut self, model: Mat4) -> Self {
        self.model = model;
        self
    }

    pub fn view(mut self, view: Mat4) -> Self {
        self.view = view;
        self
    }

    pub fn projection(mut self, projection: Mat4) -> Self {
        self.projection = projection;
        self
    }

    pub fn domain(mut self, domain: DomainDescriptor) -> Self {
        self.domain = domain;
        self
    }

    pub fn build(&self) -> Result<FrameUniforms, SimulationError> {
        let det = self.projection.determinant();
        if det == 0.0 || !det.is_finite() {
            return Err(SimulationError::NonInvertibleProjection(det));
        }

        Ok(FrameUniforms {
            camera: CameraUniforms::new(self.model, self.view, self.projection),
            grid: self.domain.uniform(),
        })
    }
}
