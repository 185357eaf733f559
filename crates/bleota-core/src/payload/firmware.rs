//! Firmware image segmentation.
//!
//! An image is split into logical blocks of `PART` bytes, and each block
//! into frames of at most `MTU` bytes. Nothing is materialised up front:
//! blocks and frames are slices into the loaded image.

use std::path::Path;

use thiserror::Error;

use crate::protocol::Command;
use crate::protocol::constants::{MAX_FRAMES_PER_BLOCK, MTU, PART};

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Firmware image is empty")]
    Empty,
    #[error("Image too large: {len} bytes in {blocks} blocks")]
    TooLarge { len: usize, blocks: usize },
    #[error("Invalid geometry: part={part} mtu={mtu}")]
    InvalidGeometry { part: usize, mtu: usize },
    #[error("Block {index} out of range (image has {total} blocks)")]
    BlockOutOfRange { index: usize, total: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Block and frame sizes used to cut an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    part: usize,
    mtu: usize,
}

impl Geometry {
    /// The fixed sizes the device firmware expects.
    pub const DEFAULT: Geometry = Geometry {
        part: PART,
        mtu: MTU,
    };

    /// Custom geometry. Both sizes go on the wire as 16-bit values and a
    /// block may not need more than 256 frames.
    pub fn new(part: usize, mtu: usize) -> Result<Self, ImageError> {
        let valid = part > 0
            && mtu > 0
            && part <= u16::MAX as usize
            && mtu <= u16::MAX as usize
            && part <= mtu * MAX_FRAMES_PER_BLOCK;
        if !valid {
            return Err(ImageError::InvalidGeometry { part, mtu });
        }
        Ok(Self { part, mtu })
    }

    pub fn part(&self) -> usize {
        self.part
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }
}

impl Default for Geometry {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Loaded firmware image, read-only for the whole session.
#[derive(Debug)]
pub struct FirmwareImage {
    data: Vec<u8>,
    geometry: Geometry,
}

impl FirmwareImage {
    /// Read an image from disk with the default geometry.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ImageError::FileNotFound(path.display().to_string()));
        }
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        Self::with_geometry(data, Geometry::DEFAULT)
    }

    /// Both the total length and the block count must fit their wire fields.
    pub fn with_geometry(data: Vec<u8>, geometry: Geometry) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        let blocks = data.len().div_ceil(geometry.part);
        if data.len() > u32::MAX as usize || blocks > u16::MAX as usize {
            return Err(ImageError::TooLarge {
                len: data.len(),
                blocks,
            });
        }
        Ok(Self { data, geometry })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Total size in bytes (`L`).
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `ceil(L / PART)`.
    pub fn block_count(&self) -> usize {
        self.data.len().div_ceil(self.geometry.part)
    }

    /// Block `index`, covering `[index * PART, min((index + 1) * PART, L))`.
    pub fn block(&self, index: usize) -> Result<Block<'_>, ImageError> {
        let total = self.block_count();
        if index >= total {
            return Err(ImageError::BlockOutOfRange { index, total });
        }
        let start = index * self.geometry.part;
        let end = (start + self.geometry.part).min(self.data.len());
        Ok(Block {
            index,
            data: &self.data[start..end],
            mtu: self.geometry.mtu,
        })
    }

    /// Iterate over all blocks in ascending order.
    pub fn blocks(&self) -> impl Iterator<Item = Block<'_>> {
        self.data
            .chunks(self.geometry.part)
            .enumerate()
            .map(|(index, data)| Block {
                index,
                data,
                mtu: self.geometry.mtu,
            })
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.data
    }
}

/// One logical block of an image.
#[derive(Debug, Clone, Copy)]
pub struct Block<'a> {
    index: usize,
    data: &'a [u8],
    mtu: usize,
}

impl<'a> Block<'a> {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// `ceil(len / MTU)`.
    pub fn frame_count(&self) -> usize {
        self.data.len().div_ceil(self.mtu)
    }

    pub fn frames(&self) -> FrameIterator<'a> {
        FrameIterator::new(self.data, self.mtu)
    }

    /// Marker closing this block on the wire.
    pub fn complete_marker(&self) -> Command<'static> {
        // Geometry and image validation keep both values within u16.
        Command::Complete {
            block_len: self.data.len() as u16,
            block: self.index as u16,
        }
    }
}

/// Iterator over the data frames of a block.
///
/// The last frame carries the remainder; no empty trailing frame is
/// produced when the block is an exact multiple of the MTU.
#[derive(Debug)]
pub struct FrameIterator<'a> {
    data: &'a [u8],
    mtu: usize,
    offset: usize,
    current_frame: usize,
}

impl<'a> FrameIterator<'a> {
    pub fn new(data: &'a [u8], mtu: usize) -> Self {
        Self {
            data,
            mtu,
            offset: 0,
            current_frame: 0,
        }
    }

    /// Total number of frames (including a partial one).
    pub fn total(&self) -> usize {
        self.data.len().div_ceil(self.mtu)
    }

    /// Index of the next frame to be produced.
    pub fn current(&self) -> usize {
        self.current_frame
    }
}

impl<'a> Iterator for FrameIterator<'a> {
    type Item = Command<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        let remaining = self.data.len() - self.offset;
        let frame_len = remaining.min(self.mtu);

        let payload = &self.data[self.offset..self.offset + frame_len];
        let frame = Command::Data {
            frame: self.current_frame as u8,
            payload,
        };
        self.offset += frame_len;
        self.current_frame += 1;

        Some(frame)
    }
}
