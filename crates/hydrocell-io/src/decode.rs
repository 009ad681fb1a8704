use std::{fs::File, io::{BufReader, Read}, mem, path::PathBuf};

use bytemuck::Pod;
use glam::Vec3;
use thiserror::Error;

use hydrocell_fluids::{flip::particles::ParticleVertex, CellRecord, DomainDescriptor, GridUniform};

use crate::{frame_file_name, FORMAT_VERSION, META_FILE, META_MAGIC};

/// Reads back a run written by [`FluidDataEncoder`](crate::encode::FluidDataEncoder).
pub struct FluidDataDecoder {
    /// The path to the directory in which the fluid data resides.
    path: PathBuf,
    metadata: Option<FluidMetadata>,
    current_frame: u64,
}

impl FluidDataDecoder {
    pub fn new(path: PathBuf) -> FluidDataDecoder {
        Self {
            path,
            metadata: None,
            current_frame: 0,
        }
    }

    fn read_value<T: Pod, R: Read>(reader: &mut R) -> Result<T, DecodingError> {
        let mut bytes = vec![0; mem::size_of::<T>()];
        reader.read_exact(&mut bytes)?;

        Ok(bytemuck::pod_read_unaligned(&bytes))
    }

    /// Reads a length prefixed section. The buffer only grows as data arrives, so a corrupt
    /// length fails once the file runs out instead of allocating up front.
    fn read_section<T: Pod, R: Read>(reader: &mut R) -> Result<Vec<T>, DecodingError> {
        let len = Self::read_value::<u64, _>(reader)?;
        let size = usize::try_from(len)
            .ok()
            .and_then(|len| len.checked_mul(mem::size_of::<T>()))
            .ok_or(DecodingError::SectionTooLarge(len))?;

        let mut bytes = Vec::new();
        reader.by_ref().take(size as u64).read_to_end(&mut bytes)?;
        if bytes.len() != size {
            return Err(DecodingError::Truncated {
                len,
                found: (bytes.len() / mem::size_of::<T>()) as u64,
            });
        }

        Ok(bytes.chunks_exact(mem::size_of::<T>()).map(bytemuck::pod_read_unaligned).collect())
    }

    pub fn decode_metadata(&mut self) -> Result<FluidMetadata, DecodingError> {
        let path = self.path.join(META_FILE);
        let mut reader = BufReader::new(File::open(path)?);

        let magic = Self::read_value::<[u8; 4], _>(&mut reader)?;
        if magic != META_MAGIC {
            return Err(DecodingError::BadMagic(magic));
        }

        let version = Self::read_value::<u8, _>(&mut reader)?;
        if version != FORMAT_VERSION {
            return Err(DecodingError::UnsupportedVersion(version));
        }

        let fps = Self::read_value::<u32, _>(&mut reader)?;
        let num_frames = Self::read_value::<u64, _>(&mut reader)?;
        let grid = Self::read_value::<GridUniform, _>(&mut reader)?;
        let origin = Vec3::from_array(Self::read_value::<[f32; 3], _>(&mut reader)?);

        let metadata = FluidMetadata {
            fps,
            num_frames,
            grid,
            origin,
        };
        self.metadata = Some(metadata);

        log::debug!("decoded metadata: {num_frames} frames at {fps} fps");

        Ok(metadata)
    }

    /// Decodes the next frame, or `None` once every frame was read. Requires
    /// [`decode_metadata`](Self::decode_metadata) to have been called.
    pub fn decode_frame(&mut self) -> Result<Option<FluidFrameData>, DecodingError> {
        let metadata = self.metadata.ok_or(DecodingError::MissingMetadata)?;

        if self.current_frame >= metadata.num_frames {
            return Ok(None);
        }

        let path = self.path.join(frame_file_name(self.current_frame, metadata.num_frames));
        let mut reader = BufReader::new(File::open(path)?);

        let particles = Self::read_section::<ParticleVertex, _>(&mut reader)?;
        let cells = Self::read_section::<CellRecord, _>(&mut reader)?;

        let expected = metadata.domain().cell_count();
        if cells.len() != expected {
            return Err(DecodingError::CellCount {
                expected,
                found: cells.len(),
            });
        }

        self.current_frame += 1;

        Ok(Some(FluidFrameData { particles, cells }))
    }

    /// Moves to `frame`, which the next call to [`decode_frame`](Self::decode_frame) returns.
    pub fn seek(&mut self, frame: u64) {
        self.current_frame = frame;
    }

    pub fn reset(&mut self) {
        self.current_frame = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluidMetadata {
    pub fps: u32,
    pub num_frames: u64,
    pub grid: GridUniform,
    pub origin: Vec3,
}

impl FluidMetadata {
    pub fn domain(&self) -> DomainDescriptor {
        self.grid.to_domain(self.origin)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FluidFrameData {
    pub particles: Vec<ParticleVertex>,
    /// Cell records in GPU buffer order.
    pub cells: Vec<CellRecord>,
}

#[derive(Debug, Error)]
pub enum DecodingError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("not a fluid metadata file (magic {0:?})")]
    BadMagic([u8; 4]),
    #[error("unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("section of {0} values does not fit in memory")]
    SectionTooLarge(u64),
    #[error("section of {len} values ends after {found}")]
    Truncated { len: u64, found: u64 },
    #[error("frame has {found} cells, expected {expected}")]
    CellCount { expected: usize, found: usize },
    #[error("metadata must be decoded before any frame")]
    MissingMetadata,
}
