//! BleOTA-Core: BLE OTA firmware push protocol in Rust.
//!
//! This crate implements the host side of the ESP32 BLE OTA protocol:
//! the image is announced in a three-frame handshake, then pushed as
//! fixed-size blocks of fixed-size frames while the device drives the
//! transfer through notifications.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Opcodes, outbound commands, inbound notifications
//! - **Payload**: Block/frame segmentation and block sending
//! - **Transport**: BLE link abstraction (btleplug, mock)
//! - **State**: Transfer state and pure notification handlers
//! - **Events**: Observer pattern for UI decoupling
//! - **Session**: High-level orchestrator
//!
//! # Example
//!
//! ```no_run
//! use bleota_core::session::{OtaSession, SessionConfig};
//!
//! # async fn flash() -> Result<(), bleota_core::SessionError> {
//! let config = SessionConfig {
//!     address: "24:6F:28:AE:F6:B6".to_string(),
//!     firmware_path: "firmware.bin".to_string(),
//!     ..Default::default()
//! };
//!
//! let report = OtaSession::new(config).run().await?;
//! println!("{}", report.result);
//! # Ok(())
//! # }
//! ```

pub mod address;
pub mod events;
pub mod payload;
pub mod protocol;
pub mod session;
pub mod state;
pub mod transport;

// Re-exports for convenience
pub use address::{AddressError, DeviceAddress};
pub use events::{NullObserver, OtaEvent, OtaObserver, OtaPhase, TracingObserver};
pub use payload::{FirmwareImage, Geometry, ImageError, send_block};
pub use protocol::{Command, Notification, ProtocolError};
pub use session::{OtaSession, SessionConfig, SessionError, TransferReport};
pub use state::{SessionContext, TransferOutcome, TransferState};
pub use transport::{BtleLink, LinkEvent, MockLink, OtaLink, TransportError, WriteMode};
