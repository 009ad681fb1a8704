pub mod flip_3d;
mod mac_3d;
pub mod particles;
