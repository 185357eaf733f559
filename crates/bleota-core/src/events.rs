//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow a transfer without
//! tight coupling to the protocol engine.

use std::fmt;

/// Log level for events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Session phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaPhase {
    /// Scanning for the device.
    Discovery,
    /// Sending RESET / SIZE / INFO.
    Handshake,
    /// Blocks are being sent.
    Transfer,
    /// Result received, waiting for the device to drop the link.
    Finishing,
    /// Session over.
    Complete,
    /// Error state.
    Error,
}

impl fmt::Display for OtaPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaPhase::Discovery => write!(f, "Discovery"),
            OtaPhase::Handshake => write!(f, "Handshake"),
            OtaPhase::Transfer => write!(f, "Transfer"),
            OtaPhase::Finishing => write!(f, "Finishing"),
            OtaPhase::Complete => write!(f, "Complete"),
            OtaPhase::Error => write!(f, "Error"),
        }
    }
}

/// Events emitted by the OTA session.
#[derive(Debug, Clone)]
pub enum OtaEvent {
    /// Device connected.
    DeviceConnected { address: String },
    /// Device dropped the link.
    DeviceDisconnected,
    /// Phase changed.
    PhaseChanged { from: OtaPhase, to: OtaPhase },
    /// The device picked a transfer mode.
    ModeSelected { multi_block: bool },
    /// Blocks sent so far, out of the image total.
    Progress { completed: u32, total: u32 },
    /// The device is flashing the received image.
    Installing,
    /// The device reported its outcome.
    Result { message: String, success: bool },
    /// Log message.
    Log { level: LogLevel, message: String },
    /// Raw packet sent/received.
    Packet {
        direction: PacketDirection,
        packet_type: String,
        length: usize,
        data: Option<Vec<u8>>,
    },
    /// Session finished successfully.
    Complete,
}

/// Packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving OTA events.
///
/// Implement this trait in your UI layer to receive updates.
pub trait OtaObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &OtaEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl OtaObserver for NullObserver {
    fn on_event(&self, _event: &OtaEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl OtaObserver for TracingObserver {
    fn on_event(&self, event: &OtaEvent) {
        match event {
            OtaEvent::DeviceConnected { address } => {
                tracing::info!(address = %address, "Device connected");
            }
            OtaEvent::DeviceDisconnected => {
                tracing::info!("Device disconnected");
            }
            OtaEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            OtaEvent::ModeSelected { multi_block } => {
                tracing::info!(multi_block, "Transfer mode selected");
            }
            OtaEvent::Progress { completed, total } => {
                let pct = if *total > 0 {
                    (*completed as u64 * 100) / *total as u64
                } else {
                    0
                };
                tracing::debug!(completed, total, progress = %format!("{}%", pct), "Progress");
            }
            OtaEvent::Installing => {
                tracing::info!("Device installing firmware");
            }
            OtaEvent::Result { message, success } => {
                if *success {
                    tracing::info!(result = %message, "OTA result");
                } else {
                    tracing::error!(result = %message, "OTA result");
                }
            }
            OtaEvent::Log { level, message } => match level {
                LogLevel::Trace => tracing::trace!("{}", message),
                LogLevel::Debug => tracing::debug!("{}", message),
                LogLevel::Info => tracing::info!("{}", message),
                LogLevel::Warn => tracing::warn!("{}", message),
                LogLevel::Error => tracing::error!("{}", message),
            },
            OtaEvent::Packet {
                direction,
                packet_type,
                length,
                ..
            } => {
                tracing::trace!(
                    dir = %direction,
                    type_ = %packet_type,
                    len = length,
                    "BLE Packet"
                );
            }
            OtaEvent::Complete => {
                tracing::info!("Operation complete");
            }
        }
    }
}
