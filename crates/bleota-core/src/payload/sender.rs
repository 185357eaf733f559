//! Writing blocks to the link.

use tracing::{debug, instrument};

use super::firmware::{FirmwareImage, ImageError};
use crate::transport::{OtaLink, TransportError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What was put on the wire for one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockSummary {
    pub index: usize,
    pub len: usize,
    pub frames: usize,
}

/// Send every frame of block `index` unacknowledged, then its COMPLETE
/// marker with acknowledgment.
///
/// An index past the end of the image is an error, never clamped.
#[instrument(level = "debug", skip(link, image))]
pub async fn send_block<L: OtaLink + ?Sized>(
    link: &L,
    image: &FirmwareImage,
    index: usize,
) -> Result<BlockSummary, SendError> {
    let block = image.block(index)?;

    let mut frames = 0;
    for frame in block.frames() {
        link.write(&frame.encode(), frame.write_mode()).await?;
        frames += 1;
    }

    let marker = block.complete_marker();
    link.write(&marker.encode(), marker.write_mode()).await?;

    debug!(block = index, len = block.len(), frames, "Block sent");
    Ok(BlockSummary {
        index,
        len: block.len(),
        frames,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockLink, WriteMode};

    #[tokio::test]
    async fn test_send_block_frames_then_marker() {
        let image = FirmwareImage::from_bytes((0..40000u32).map(|i| i as u8).collect()).unwrap();
        let link = MockLink::new();

        let summary = send_block(&link, &image, 2).await.unwrap();
        assert_eq!(
            summary,
            BlockSummary {
                index: 2,
                len: 8000,
                frames: 16
            }
        );

        let writes = link.writes();
        assert_eq!(writes.len(), 17);
        for (j, w) in writes[..16].iter().enumerate() {
            assert_eq!(w.mode, WriteMode::WithoutResponse);
            assert_eq!(w.data[0], 0xFB);
            assert_eq!(w.data[1] as usize, j);
            assert_eq!(w.data.len(), 502);
            let start = 32000 + j * 500;
            assert_eq!(&w.data[2..], &image.raw_data()[start..start + 500]);
        }
        let marker = &writes[16];
        assert_eq!(marker.mode, WriteMode::WithResponse);
        assert_eq!(marker.data, vec![0xFC, 0x1F, 0x40, 0x00, 0x02]);
    }

    #[tokio::test]
    async fn test_send_block_remainder_frame() {
        let image = FirmwareImage::from_bytes(vec![7; 1234]).unwrap();
        let link = MockLink::new();

        send_block(&link, &image, 0).await.unwrap();
        let sizes: Vec<_> = link.writes().iter().map(|w| w.data.len()).collect();
        // three data frames (500, 500, 234) plus the 5 byte marker
        assert_eq!(sizes, vec![502, 502, 236, 5]);
        assert_eq!(link.writes()[3].data, vec![0xFC, 0x04, 0xD2, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_send_block_out_of_range_writes_nothing() {
        let image = FirmwareImage::from_bytes(vec![0; 16000]).unwrap();
        let link = MockLink::new();

        let err = send_block(&link, &image, 1).await.unwrap_err();
        assert!(matches!(
            err,
            SendError::Image(ImageError::BlockOutOfRange { index: 1, total: 1 })
        ));
        assert!(link.writes().is_empty());
    }
}
