//! Protocol module - BLE OTA wire format.

pub mod command;
pub mod constants;
pub mod notification;

pub use command::Command;
pub use constants::*;
pub use notification::{Notification, ProtocolError};
