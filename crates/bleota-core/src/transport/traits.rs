//! BLE link abstraction.
//!
//! Defines the `OtaLink` trait for talking to the device's OTA service,
//! allowing different implementations (btleplug, mock, etc.).

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    #[error("Device not found: {address} (scanned {timeout_secs}s)")]
    DeviceNotFound { address: String, timeout_secs: u64 },

    #[error("Failed to connect: {0}")]
    ConnectFailed(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(uuid::Uuid),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Already subscribed")]
    AlreadySubscribed,

    #[error("Device disconnected")]
    Disconnected,

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

/// Whether a write asks the device for a link-layer acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    WithResponse,
    WithoutResponse,
}

/// Something the link delivers to the session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Value notified on the device's TX characteristic.
    Notification(Vec<u8>),
    /// The link is gone.
    Disconnected,
}

/// Receiving end of a link's event queue.
pub type LinkEvents = mpsc::UnboundedReceiver<LinkEvent>;

/// Abstract OTA link interface.
///
/// This trait enables:
/// - Production implementation using btleplug
/// - Mock implementation for unit testing
#[async_trait]
pub trait OtaLink: Send + Sync {
    /// Write raw bytes to the device's RX characteristic.
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError>;

    /// Start notifications and hand over the event queue.
    ///
    /// Notifications and the disconnect signal share one queue. A real
    /// radio reports the drop on a different path than the notifications,
    /// so `Disconnected` may overtake the last notifications the device
    /// sent; consumers should keep reading briefly after it. Can be called
    /// once per link.
    async fn subscribe(&self) -> Result<LinkEvents, TransportError>;

    /// Tear the link down from our side.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Check if the device is still connected.
    fn is_connected(&self) -> bool;

    /// Identifier the device was opened with.
    fn address(&self) -> &str;
}
