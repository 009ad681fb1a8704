use std::{fs::File, io::{BufWriter, Write}, path::PathBuf};

use bytemuck::Pod;
use thiserror::Error;

use hydrocell_fluids::{scene::Scene, Fluid};

use crate::{frame_file_name, EncodeFluid, FORMAT_VERSION, META_FILE, META_MAGIC};

/// Writes a simulation run as a directory of frame files.
///
/// All values are written in native byte order, matching the layout of the GPU buffers they
/// are uploaded to.
pub struct FluidDataEncoder {
    /// The path to the directory into which the fluid data will be placed.
    path: PathBuf,
    num_frames: u64,
    fps: u32,
    current_frame: u64,
}

impl FluidDataEncoder {
    /// Creates the output directory. Fails if it already exists.
    pub fn new(path: PathBuf, num_frames: u64, fps: u32) -> Result<FluidDataEncoder, EncodingError> {
        std::fs::create_dir(&path)?;

        Ok(Self {
            path,
            num_frames,
            fps,
            current_frame: 0,
        })
    }

    #[inline]
    pub fn current_frame(&self) -> u64 {
        self.current_frame
    }

    fn frame_path(&self, frame: u64) -> PathBuf {
        self.path.join(frame_file_name(frame, self.num_frames))
    }

    pub fn encode_metadata<F, P>(&mut self, scene: &Scene<F, P>) -> Result<(), EncodingError>
    where
        F: Fluid<Params = P>,
    {
        let path = self.path.join(META_FILE);
        let mut writer = BufWriter::new(File::create(path)?);
        let domain = scene.domain();

        writer.write_all(&META_MAGIC)?;
        writer.write_all(&[FORMAT_VERSION])?;
        writer.write_all(&self.fps.to_ne_bytes())?;
        writer.write_all(&self.num_frames.to_ne_bytes())?;
        writer.write_all(bytemuck::bytes_of(&domain.uniform()))?;
        writer.write_all(bytemuck::cast_slice(&domain.origin.to_array()))?;
        writer.flush()?;

        log::debug!("wrote metadata for {} frames at {} fps", self.num_frames, self.fps);

        Ok(())
    }

    pub fn encode_frame<T: EncodeFluid>(&mut self, state: &T) -> Result<(), EncodingError> {
        if self.current_frame >= self.num_frames {
            return Err(EncodingError::FrameLimit(self.num_frames));
        }

        let path = self.frame_path(self.current_frame);
        let mut encoder = FluidFrameEncoder { writer: BufWriter::new(File::create(path)?) };

        state.encode_state(&mut encoder)?;
        encoder.finish()?;

        self.current_frame += 1;

        Ok(())
    }
}

pub struct FluidFrameEncoder<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FluidFrameEncoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: BufWriter::new(writer) }
    }

    /// Writes `values` as one length-prefixed section.
    pub fn encode_section<T: Pod>(&mut self, values: &[T]) -> Result<(), EncodingError> {
        self.writer.write_all(&(values.len() as u64).to_ne_bytes())?;
        self.writer.write_all(bytemuck::cast_slice(values))?;

        Ok(())
    }

    pub fn finish(mut self) -> Result<W, EncodingError> {
        self.writer.flush()?;
        self.writer.into_inner().map_err(|err| EncodingError::Io(err.into_error()))
    }
}

#[derive(Debug, Error)]
pub enum EncodingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("all {0} frames have already been written")]
    FrameLimit(u64),
}
