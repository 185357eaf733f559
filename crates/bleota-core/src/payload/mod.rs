//! Payload handling module.
//!
//! Splits a firmware image into blocks and frames and writes them out.

pub mod firmware;
pub mod sender;

pub use firmware::{Block, FirmwareImage, FrameIterator, Geometry, ImageError};
pub use sender::{BlockSummary, SendError, send_block};
