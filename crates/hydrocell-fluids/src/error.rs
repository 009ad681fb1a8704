use glam::{IVec3, UVec3};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulationError {
    #[error("invalid domain: {0}")]
    InvalidDomain(String),
    #[error("invalid time step {0}, must be positive and finite")]
    InvalidTimeStep(f32),
    #[error("cell {coord} is outside of a grid of size {size}")]
    OutOfBounds {
        coord: IVec3,
        size: UVec3,
    },
    #[error("invalid collider: {0}")]
    InvalidCollider(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("projection matrix is not invertible (determinant {0})")]
    NonInvertibleProjection(f32),
    #[error("step produced a non-finite value for particle {0}")]
    NonFiniteState(usize),
}
