//! Outbound (host -> device) protocol messages.

use byteorder::{BigEndian, ByteOrder};

use super::constants::*;
use crate::transport::WriteMode;

/// A message written to the device's RX characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Start of transfer.
    Reset,
    /// Total image length in bytes.
    Size { len: u32 },
    /// Block count and frame payload size.
    Info { block_count: u16, mtu: u16 },
    /// One frame of a block's payload.
    Data { frame: u8, payload: &'a [u8] },
    /// End of a block.
    Complete { block_len: u16, block: u16 },
}

impl Command<'_> {
    /// Wire encoding, opcode first.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::Reset => vec![OP_RESET],
            Command::Size { len } => {
                let mut buf = [OP_SIZE, 0, 0, 0, 0];
                BigEndian::write_u32(&mut buf[1..], len);
                buf.to_vec()
            }
            Command::Info { block_count, mtu } => {
                let mut buf = [OP_INFO, 0, 0, 0, 0];
                BigEndian::write_u16(&mut buf[1..3], block_count);
                BigEndian::write_u16(&mut buf[3..5], mtu);
                buf.to_vec()
            }
            Command::Data { frame, payload } => {
                let mut buf = Vec::with_capacity(2 + payload.len());
                buf.push(OP_DATA);
                buf.push(frame);
                buf.extend_from_slice(payload);
                buf
            }
            Command::Complete { block_len, block } => {
                let mut buf = [OP_COMPLETE, 0, 0, 0, 0];
                BigEndian::write_u16(&mut buf[1..3], block_len);
                BigEndian::write_u16(&mut buf[3..5], block);
                buf.to_vec()
            }
        }
    }

    /// Only block boundaries are acknowledged by the device.
    pub fn write_mode(&self) -> WriteMode {
        match self {
            Command::Complete { .. } => WriteMode::WithResponse,
            _ => WriteMode::WithoutResponse,
        }
    }

    /// Short label used in logs and packet events.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Reset => "RESET",
            Command::Size { .. } => "SIZE",
            Command::Info { .. } => "INFO",
            Command::Data { .. } => "DATA",
            Command::Complete { .. } => "COMPLETE",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_encoding() {
        assert_eq!(Command::Reset.encode(), vec![0xFD]);
        assert_eq!(
            Command::Size { len: 0x0001_3880 }.encode(),
            vec![0xFE, 0x00, 0x01, 0x38, 0x80]
        );
        assert_eq!(
            Command::Info {
                block_count: 3,
                mtu: 500
            }
            .encode(),
            vec![0xFF, 0x00, 0x03, 0x01, 0xF4]
        );
    }

    #[test]
    fn test_data_frame_layout() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let bytes = Command::Data {
            frame: 7,
            payload: &payload,
        }
        .encode();
        assert_eq!(bytes, vec![0xFB, 7, 0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_complete_marker_layout() {
        let bytes = Command::Complete {
            block_len: 16000,
            block: 258,
        }
        .encode();
        assert_eq!(bytes, vec![0xFC, 0x3E, 0x80, 0x01, 0x02]);
    }

    #[test]
    fn test_only_complete_requires_ack() {
        assert_eq!(Command::Reset.write_mode(), WriteMode::WithoutResponse);
        assert_eq!(
            Command::Data {
                frame: 0,
                payload: &[]
            }
            .write_mode(),
            WriteMode::WithoutResponse
        );
        assert_eq!(
            Command::Complete {
                block_len: 1,
                block: 0
            }
            .write_mode(),
            WriteMode::WithResponse
        );
    }
}
