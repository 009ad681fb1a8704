use std::io::Write;

use encode::{EncodingError, FluidFrameEncoder};
use hydrocell_fluids::{flip::flip_3d::FlipFluid3D, scene::Scene, Fluid};

pub mod decode;
pub mod encode;

/// File holding the run metadata, inside the output directory.
pub const META_FILE: &str = "_meta";

/// Marks a metadata file written by this crate.
pub const META_MAGIC: [u8; 4] = *b"HCEL";

pub const FORMAT_VERSION: u8 = 1;

/// A fluid that can write its per-frame state.
pub trait EncodeFluid {
    fn encode_state<W: Write>(&self, encoder: &mut FluidFrameEncoder<W>) -> Result<(), EncodingError>;
}

impl EncodeFluid for FlipFluid3D {
    fn encode_state<W: Write>(&self, encoder: &mut FluidFrameEncoder<W>) -> Result<(), EncodingError> {
        encoder.encode_section(&self.vertices())
    }
}

impl<F: Fluid<Params = P> + EncodeFluid, P> EncodeFluid for Scene<F, P> {
    /// The fluid's sections followed by the cell records.
    fn encode_state<W: Write>(&self, encoder: &mut FluidFrameEncoder<W>) -> Result<(), EncodingError> {
        self.fluid.encode_state(encoder)?;
        encoder.encode_section(&self.cells())
    }
}

/// Name of frame `frame` in a run of `num_frames`, zero padded so the files sort in order.
pub(crate) fn frame_file_name(frame: u64, num_frames: u64) -> String {
    let width = num_frames.saturating_sub(1).checked_ilog10().unwrap_or(0) as usize + 1;
    format!("{frame:0width$}.dat")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(0, 1), "0.dat");
        assert_eq!(frame_file_name(7, 10), "7.dat");
        assert_eq!(frame_file_name(7, 11), "07.dat");
        assert_eq!(frame_file_name(42, 600), "042.dat");
        assert_eq!(frame_file_name(0, 0), "0.dat");
    }
}
