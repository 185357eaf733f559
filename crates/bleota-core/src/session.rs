//! OTA Session - High-level orchestrator for the transfer.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::address::{AddressError, DeviceAddress};
use crate::events::{LogLevel, OtaEvent, OtaObserver, OtaPhase, PacketDirection, TracingObserver};
use crate::payload::{FirmwareImage, ImageError, SendError, send_block};
use crate::protocol::constants::*;
use crate::protocol::{Command, ProtocolError};
use crate::state::machine::default_success_markers;
use crate::state::{Action, ResultPolicy, SessionContext, TransferOutcome, TransferState, on_frame};
use crate::transport::observable::packet_type;
use crate::transport::{BtleLink, LinkEvent, LinkEvents, ObservableLink, OtaLink, TransportError};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    InvalidAddress(#[from] AddressError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("Device {address} not found within {timeout_secs}s")]
    DeviceNotFound { address: String, timeout_secs: u64 },

    #[error("Transport error: {0}")]
    Transport(TransportError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Device disconnected before reporting a result (state: {state})")]
    UnexpectedDisconnect { state: TransferState },

    #[error("No notification from device for {timeout_secs}s (state: {state})")]
    NotificationTimeout {
        timeout_secs: u64,
        state: TransferState,
    },

    #[error("OTA failed: {0}")]
    TransferFailed(String),
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::DeviceNotFound {
                address,
                timeout_secs,
            } => SessionError::DeviceNotFound {
                address,
                timeout_secs,
            },
            other => SessionError::Transport(other),
        }
    }
}

impl From<SendError> for SessionError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::Image(e) => SessionError::Image(e),
            SendError::Transport(e) => e.into(),
        }
    }
}

/// Configuration for an OTA session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// MAC address or (macOS) peripheral UUID.
    pub address: String,
    /// Path to the firmware binary.
    pub firmware_path: String,
    /// How long to scan for the device.
    pub scan_timeout_secs: u64,
    /// Pause between subscribing and the first handshake write.
    pub settle_ms: u64,
    /// Longest silence tolerated while waiting for the device.
    pub notification_timeout_secs: u64,
    /// How long the device gets to drop the link after its result.
    pub disconnect_timeout_secs: u64,
    /// Result texts containing one of these count as success.
    pub success_markers: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            firmware_path: String::new(),
            scan_timeout_secs: DEFAULT_SCAN_TIMEOUT_SECS,
            settle_ms: DEFAULT_SETTLE_MS,
            notification_timeout_secs: DEFAULT_NOTIFICATION_TIMEOUT_SECS,
            disconnect_timeout_secs: DEFAULT_DISCONNECT_TIMEOUT_SECS,
            success_markers: default_success_markers(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn scan_timeout(&self) -> Duration {
        Duration::from_secs(self.scan_timeout_secs)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_secs(self.notification_timeout_secs)
    }

    pub fn disconnect_timeout(&self) -> Duration {
        Duration::from_secs(self.disconnect_timeout_secs)
    }
}

/// Summary of a successful transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub address: String,
    /// Image size in bytes.
    pub image_len: usize,
    /// Blocks in the image.
    pub total_blocks: u16,
    /// Blocks written, including device-requested repeats.
    pub blocks_sent: usize,
    /// The device's result text.
    pub result: String,
    pub elapsed: Duration,
}

/// OTA Session - orchestrates the complete transfer.
pub struct OtaSession<O: OtaObserver> {
    config: SessionConfig,
    observer: Arc<O>,
    phase: Mutex<OtaPhase>,
}

impl OtaSession<TracingObserver> {
    /// Create a new session with default tracing observer.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_observer(config, Arc::new(TracingObserver))
    }
}

impl<O: OtaObserver + 'static> OtaSession<O> {
    /// Create a new session with a custom observer.
    pub fn with_observer(config: SessionConfig, observer: Arc<O>) -> Self {
        Self {
            config,
            observer,
            phase: Mutex::new(OtaPhase::Discovery),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn emit(&self, event: OtaEvent) {
        self.observer.on_event(&event);
    }

    /// Current phase.
    pub fn phase(&self) -> OtaPhase {
        self.phase
            .lock()
            .map(|phase| *phase)
            .unwrap_or(OtaPhase::Error)
    }

    fn set_phase(&self, to: OtaPhase) {
        let from = match self.phase.lock() {
            Ok(mut phase) => std::mem::replace(&mut *phase, to),
            Err(_) => return,
        };
        self.emit(OtaEvent::PhaseChanged { from, to });
    }

    fn reset_phase(&self) {
        if let Ok(mut phase) = self.phase.lock() {
            *phase = OtaPhase::Discovery;
        }
    }

    /// Run the complete OTA session: validate inputs, find the device,
    /// transfer, and wait for the device to drop the link.
    ///
    /// Bad addresses and missing files are reported before any radio
    /// activity.
    #[instrument(skip(self), fields(address = %self.config.address))]
    pub async fn run(&self) -> Result<TransferReport, SessionError> {
        self.reset_phase();
        let address: DeviceAddress = self.config.address.parse()?;

        info!(path = %self.config.firmware_path, "Loading firmware");
        let image = FirmwareImage::load(&self.config.firmware_path)?;
        info!(
            bytes = image.len(),
            blocks = image.block_count(),
            "Firmware loaded"
        );

        self.emit(OtaEvent::Log {
            level: LogLevel::Info,
            message: format!(
                "Scanning for {} ({}s)",
                address, self.config.scan_timeout_secs
            ),
        });
        let link = match BtleLink::open(&address, self.config.scan_timeout()).await {
            Ok(link) => link,
            Err(e) => {
                self.set_phase(OtaPhase::Error);
                return Err(e.into());
            }
        };

        self.emit(OtaEvent::DeviceConnected {
            address: link.address().to_string(),
        });

        let result = self.transfer(&link, &image).await;
        if result.is_err()
            && link.is_connected()
            && let Err(e) = link.disconnect().await
        {
            warn!(error = %e, "Failed to disconnect");
        }
        result
    }

    /// Drive a transfer over an already open link.
    ///
    /// Any failure moves the session to [`OtaPhase::Error`] from whatever
    /// phase it was in.
    #[instrument(skip_all, fields(bytes = image.len()))]
    pub async fn transfer<L: OtaLink + ?Sized>(
        &self,
        link: &L,
        image: &FirmwareImage,
    ) -> Result<TransferReport, SessionError> {
        self.reset_phase();
        let result = self.drive(link, image).await;
        if result.is_err() {
            self.set_phase(OtaPhase::Error);
        }
        result
    }

    async fn drive<L: OtaLink + ?Sized>(
        &self,
        link: &L,
        image: &FirmwareImage,
    ) -> Result<TransferReport, SessionError> {
        let started = Instant::now();
        let link = ObservableLink::new(link, self.observer.as_ref());

        // Subscribe before the handshake so the device's first reply is queued.
        let mut events = link.subscribe().await?;
        if self.config.settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.settle_ms)).await;
        }

        let total_blocks = u16::try_from(image.block_count()).map_err(|_| ImageError::TooLarge {
            len: image.len(),
            blocks: image.block_count(),
        })?;
        let mut ctx = SessionContext::new(total_blocks, image.geometry())
            .with_policy(ResultPolicy::new(self.config.success_markers.clone()));

        self.set_phase(OtaPhase::Handshake);
        send_handshake(&link, image, total_blocks)
            .await
            .map_err(|e| link_lost(e, &link, &ctx))?;
        ctx.goto_state(TransferState::AwaitingMode);

        self.set_phase(OtaPhase::Transfer);

        let mut blocks_sent = 0;
        let mut disconnected = false;
        let outcome = loop {
            let bytes = match self.next_event(&mut events, &ctx).await? {
                LinkEvent::Notification(bytes) => bytes,
                LinkEvent::Disconnected => {
                    self.emit(OtaEvent::DeviceDisconnected);
                    match self.drain_after_disconnect(&mut events, &mut ctx).await? {
                        Some(outcome) => {
                            disconnected = true;
                            break outcome;
                        }
                        None => return Err(SessionError::UnexpectedDisconnect { state: ctx.state }),
                    }
                }
            };
            self.emit_rx(&bytes);

            let result = on_frame(&bytes, &mut ctx)?;
            let mut finished = None;
            for action in result.actions {
                match action {
                    Action::ModeSelected { multi_block } => {
                        self.emit(OtaEvent::ModeSelected { multi_block });
                        self.emit(OtaEvent::Progress {
                            completed: 0,
                            total: u32::from(total_blocks),
                        });
                    }
                    Action::SendBlock(index) => {
                        send_block(&link, image, usize::from(index))
                            .await
                            .map_err(|e| link_lost(e.into(), &link, &ctx))?;
                        blocks_sent += 1;
                    }
                    Action::Progress { completed, total } => {
                        self.emit(OtaEvent::Progress { completed, total });
                    }
                    Action::Installing => self.emit(OtaEvent::Installing),
                    Action::Finished(outcome) => {
                        self.emit_result(&outcome);
                        finished = Some(outcome);
                    }
                }
            }
            if let Some(outcome) = finished {
                break outcome;
            }
        };

        self.set_phase(OtaPhase::Finishing);
        if !disconnected {
            self.wait_for_disconnect(&link, &mut events).await;
        }

        match outcome {
            TransferOutcome::Success(result) => {
                self.set_phase(OtaPhase::Complete);
                self.emit(OtaEvent::Complete);
                Ok(TransferReport {
                    address: link.address().to_string(),
                    image_len: image.len(),
                    total_blocks,
                    blocks_sent,
                    result,
                    elapsed: started.elapsed(),
                })
            }
            TransferOutcome::Failure(message) => Err(SessionError::TransferFailed(message)),
        }
    }

    fn emit_rx(&self, bytes: &[u8]) {
        self.emit(OtaEvent::Packet {
            direction: PacketDirection::Rx,
            packet_type: packet_type(bytes).to_string(),
            length: bytes.len(),
            data: Some(bytes.iter().take(32).cloned().collect()),
        });
    }

    fn emit_result(&self, outcome: &TransferOutcome) {
        self.emit(OtaEvent::Result {
            message: outcome.message().to_string(),
            success: outcome.is_success(),
        });
    }

    /// Next event from the link, bounded by the notification timeout.
    async fn next_event(
        &self,
        events: &mut LinkEvents,
        ctx: &SessionContext,
    ) -> Result<LinkEvent, SessionError> {
        match tokio::time::timeout(self.config.notification_timeout(), events.recv()).await {
            Ok(Some(event)) => Ok(event),
            // Queue closed: the link is gone.
            Ok(None) => Err(SessionError::UnexpectedDisconnect { state: ctx.state }),
            Err(_) => Err(SessionError::NotificationTimeout {
                timeout_secs: self.config.notification_timeout_secs,
                state: ctx.state,
            }),
        }
    }

    /// The drop signal can overtake notifications the device sent just
    /// before rebooting. Collect what is still queued or arrives within
    /// [`DISCONNECT_GRACE_MS`] and look for the result among it. Nothing is
    /// sent: the link is gone.
    async fn drain_after_disconnect(
        &self,
        events: &mut LinkEvents,
        ctx: &mut SessionContext,
    ) -> Result<Option<TransferOutcome>, SessionError> {
        let grace = Duration::from_millis(DISCONNECT_GRACE_MS);
        while let Ok(Some(LinkEvent::Notification(bytes))) =
            tokio::time::timeout(grace, events.recv()).await
        {
            self.emit_rx(&bytes);
            let result = on_frame(&bytes, ctx)?;
            if let Some(outcome) = result.outcome() {
                info!("Result arrived after the link dropped");
                self.emit_result(outcome);
                return Ok(Some(outcome.clone()));
            }
            debug!(
                actions = result.actions.len(),
                "Dropping actions for a closed link"
            );
        }
        Ok(None)
    }

    /// After the result the device reboots and drops the link. If it does
    /// not within the timeout, hang up ourselves.
    async fn wait_for_disconnect<L: OtaLink + ?Sized>(&self, link: &L, events: &mut LinkEvents) {
        info!("Waiting for disconnect...");
        let wait = async {
            loop {
                match events.recv().await {
                    Some(LinkEvent::Disconnected) | None => return,
                    Some(LinkEvent::Notification(bytes)) => {
                        debug!(len = bytes.len(), "Ignoring notification after result");
                    }
                }
            }
        };

        if tokio::time::timeout(self.config.disconnect_timeout(), wait)
            .await
            .is_err()
        {
            self.emit(OtaEvent::Log {
                level: LogLevel::Warn,
                message: format!(
                    "Device did not disconnect within {}s, closing link",
                    self.config.disconnect_timeout_secs
                ),
            });
            if let Err(e) = link.disconnect().await {
                warn!(error = %e, "Failed to disconnect");
            }
        } else {
            self.emit(OtaEvent::DeviceDisconnected);
        }
    }
}

/// A write that failed because the link is gone is a disconnect, not a
/// transport fault.
fn link_lost<L: OtaLink + ?Sized>(e: SessionError, link: &L, ctx: &SessionContext) -> SessionError {
    match e {
        SessionError::Transport(TransportError::Disconnected) => {
            SessionError::UnexpectedDisconnect { state: ctx.state }
        }
        SessionError::Transport(_) if !link.is_connected() => {
            SessionError::UnexpectedDisconnect { state: ctx.state }
        }
        other => other,
    }
}

/// RESET, SIZE, INFO - all unacknowledged, in this order.
async fn send_handshake<L: OtaLink + ?Sized>(
    link: &L,
    image: &FirmwareImage,
    total_blocks: u16,
) -> Result<(), SessionError> {
    let len = u32::try_from(image.len()).map_err(|_| ImageError::TooLarge {
        len: image.len(),
        blocks: image.block_count(),
    })?;
    let handshake = [
        Command::Reset,
        Command::Size { len },
        Command::Info {
            block_count: total_blocks,
            mtu: image.geometry().mtu() as u16,
        },
    ];
    for cmd in &handshake {
        link.write(&cmd.encode(), cmd.write_mode()).await?;
        debug!(command = cmd.name(), "Sent handshake frame");
    }
    info!(len, blocks = total_blocks, "Handshake sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullObserver;

    fn session(config: SessionConfig) -> OtaSession<NullObserver> {
        OtaSession::with_observer(config, Arc::new(NullObserver))
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ota.toml");

        let config = SessionConfig {
            address: "AA:BB:CC:DD:EE:FF".into(),
            firmware_path: "fw.bin".into(),
            scan_timeout_secs: 5,
            ..Default::default()
        };
        config.save_to_file(&path).unwrap();

        let loaded = SessionConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.address, "AA:BB:CC:DD:EE:FF");
        assert_eq!(loaded.scan_timeout_secs, 5);
        assert_eq!(loaded.settle_ms, DEFAULT_SETTLE_MS);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SessionConfig = toml::from_str("address = \"24:6F:28:AE:F6:B6\"").unwrap();
        assert_eq!(config.scan_timeout_secs, DEFAULT_SCAN_TIMEOUT_SECS);
        assert_eq!(config.success_markers, default_success_markers());
    }

    #[tokio::test]
    async fn test_invalid_address_rejected_before_connecting() {
        let result = session(SessionConfig {
            address: "not-an-address".into(),
            firmware_path: "fw.bin".into(),
            ..Default::default()
        })
        .run()
        .await;
        assert!(matches!(result, Err(SessionError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_missing_file_rejected_before_connecting() {
        let result = session(SessionConfig {
            address: "AA:BB:CC:DD:EE:FF".into(),
            firmware_path: "/no/such/firmware.bin".into(),
            ..Default::default()
        })
        .run()
        .await;
        assert!(matches!(
            result,
            Err(SessionError::Image(ImageError::FileNotFound(_)))
        ));
    }

    #[test]
    fn test_device_not_found_mapping() {
        let err: SessionError = TransportError::DeviceNotFound {
            address: "AA:BB:CC:DD:EE:FF".into(),
            timeout_secs: 20,
        }
        .into();
        assert!(matches!(err, SessionError::DeviceNotFound { timeout_secs: 20, .. }));
    }
}
