//! Inbound notification parsing.
//!
//! Every notification starts with a one-byte opcode. Unknown opcodes are
//! kept as [`Notification::Unknown`] so newer firmware does not break us.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::*;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty notification")]
    Empty,

    #[error("Truncated {name} notification: expected {expected} bytes, got {actual}")]
    Truncated {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Block {index} out of range (image has {total} blocks)")]
    BlockOutOfRange { index: u16, total: u16 },
}

/// Parsed device -> host notification.
#[derive(Clone, PartialEq, Eq)]
pub enum Notification {
    /// `0xAA`: transfer mode chosen by the device.
    Mode(u8),
    /// `0xF1`: device wants this block (again).
    BlockRequest(u16),
    /// `0xF2`: device is writing the image to flash.
    Installing,
    /// `0x0F`: terminal outcome as free-form text.
    Result(String),
    /// Anything else.
    Unknown { opcode: u8, payload: Vec<u8> },
}

impl Notification {
    /// Parse a raw notification value.
    pub fn parse(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&opcode, payload) = bytes.split_first().ok_or(ProtocolError::Empty)?;

        match opcode {
            OP_MODE => {
                let &mode = payload.first().ok_or(ProtocolError::Truncated {
                    name: "mode",
                    expected: 2,
                    actual: bytes.len(),
                })?;
                Ok(Notification::Mode(mode))
            }
            OP_BLOCK_REQUEST => {
                if payload.len() < 2 {
                    return Err(ProtocolError::Truncated {
                        name: "block request",
                        expected: 3,
                        actual: bytes.len(),
                    });
                }
                Ok(Notification::BlockRequest(BigEndian::read_u16(payload)))
            }
            OP_INSTALLING => Ok(Notification::Installing),
            OP_RESULT => Ok(Notification::Result(
                String::from_utf8_lossy(payload).into_owned(),
            )),
            _ => Ok(Notification::Unknown {
                opcode,
                payload: payload.to_vec(),
            }),
        }
    }

    /// Opcode this notification was tagged with.
    pub fn opcode(&self) -> u8 {
        match self {
            Notification::Mode(_) => OP_MODE,
            Notification::BlockRequest(_) => OP_BLOCK_REQUEST,
            Notification::Installing => OP_INSTALLING,
            Notification::Result(_) => OP_RESULT,
            Notification::Unknown { opcode, .. } => *opcode,
        }
    }
}

impl fmt::Debug for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::Mode(mode) => write!(f, "Mode({})", mode),
            Notification::BlockRequest(index) => write!(f, "BlockRequest({})", index),
            Notification::Installing => write!(f, "Installing"),
            Notification::Result(text) => write!(f, "Result({:?})", text),
            Notification::Unknown { opcode, payload } => {
                write!(f, "Unknown(0x{:02X}, {} bytes)", opcode, payload.len())
            }
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
