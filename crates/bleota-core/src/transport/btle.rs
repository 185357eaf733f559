//! btleplug-based BLE link implementation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
    WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use super::traits::{LinkEvent, LinkEvents, OtaLink, TransportError, WriteMode};
use crate::address::DeviceAddress;
use crate::protocol::constants::{OTA_RX_CHAR_UUID, OTA_SERVICE_UUID, OTA_TX_CHAR_UUID};

const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// btleplug-based BLE link to the device's OTA service.
pub struct BtleLink {
    peripheral: Peripheral,
    rx_char: Characteristic,
    tx_char: Characteristic,
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Mutex<Option<LinkEvents>>,
    connected: Arc<AtomicBool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    address: String,
}

impl BtleLink {
    /// Scan for `address`, connect and resolve the OTA characteristics.
    ///
    /// Gives up with `DeviceNotFound` once `scan_timeout` elapses; nothing
    /// is connected in that case.
    #[instrument(level = "info", skip(address, scan_timeout), fields(address = %address))]
    pub async fn open(
        address: &DeviceAddress,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(TransportError::NoAdapter)?;

        // Watch adapter events before connecting so an early drop is not missed.
        let mut central_events = adapter.events().await?;

        adapter.start_scan(ScanFilter::default()).await?;
        let found = tokio::time::timeout(scan_timeout, find_peripheral(&adapter, address)).await;
        if let Err(e) = adapter.stop_scan().await {
            debug!(error = %e, "Failed to stop scan");
        }
        let peripheral = match found {
            Ok(result) => result?,
            Err(_) => {
                return Err(TransportError::DeviceNotFound {
                    address: address.to_string(),
                    timeout_secs: scan_timeout.as_secs(),
                });
            }
        };

        info!(id = %peripheral.id(), "Found device");

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let (rx_char, tx_char) = disconnect_on_err(resolve_characteristics(&peripheral).await, || {
            let peripheral = peripheral.clone();
            async move {
                if let Err(e) = peripheral.disconnect().await {
                    warn!(error = %e, "Failed to disconnect after setup error");
                }
            }
        })
        .await?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(true));

        let watcher = {
            let id = peripheral.id();
            let events_tx = events_tx.clone();
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                while let Some(event) = central_events.next().await {
                    if let CentralEvent::DeviceDisconnected(gone) = event
                        && gone == id
                    {
                        signal_disconnect(&connected, &events_tx);
                        break;
                    }
                }
            })
        };

        info!(rx = %rx_char.uuid, tx = %tx_char.uuid, "Device opened successfully");

        Ok(Self {
            peripheral,
            rx_char,
            tx_char,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            connected,
            tasks: Mutex::new(vec![watcher]),
            address: address.to_string(),
        })
    }
}

/// Discover services and pick out the OTA RX and TX characteristics.
async fn resolve_characteristics(
    peripheral: &Peripheral,
) -> Result<(Characteristic, Characteristic), TransportError> {
    peripheral
        .discover_services()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    if !peripheral.services().iter().any(|s| s.uuid == OTA_SERVICE_UUID) {
        warn!(service = %OTA_SERVICE_UUID, "OTA service not advertised, trying characteristics anyway");
    }
    let characteristic = |uuid: uuid::Uuid| {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(TransportError::CharacteristicNotFound(uuid))
    };
    Ok((
        characteristic(OTA_RX_CHAR_UUID)?,
        characteristic(OTA_TX_CHAR_UUID)?,
    ))
}

/// Run `cleanup` before handing back an error, so a half-opened link is
/// not left connected.
async fn disconnect_on_err<T, E, F, Fut>(result: Result<T, E>, cleanup: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = ()>,
{
    if result.is_err() {
        cleanup().await;
    }
    result
}

async fn find_peripheral(
    adapter: &Adapter,
    address: &DeviceAddress,
) -> Result<Peripheral, TransportError> {
    loop {
        for peripheral in adapter.peripherals().await? {
            let matches = match address {
                DeviceAddress::Mac(bytes) => peripheral.address() == BDAddr::from(*bytes),
                DeviceAddress::Uuid(uuid) => peripheral
                    .id()
                    .to_string()
                    .eq_ignore_ascii_case(&uuid.to_string()),
            };
            if matches {
                return Ok(peripheral);
            }
        }
        tokio::time::sleep(SCAN_POLL_INTERVAL).await;
    }
}

/// Emits at most one `Disconnected` per link.
fn signal_disconnect(connected: &AtomicBool, events_tx: &mpsc::UnboundedSender<LinkEvent>) {
    if connected.swap(false, Ordering::SeqCst) {
        info!("Device disconnected");
        let _ = events_tx.send(LinkEvent::Disconnected);
    }
}

#[async_trait]
impl OtaLink for BtleLink {
    #[instrument(level = "trace", skip(self, data), fields(len = data.len()))]
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Disconnected);
        }
        let write_type = match mode {
            WriteMode::WithResponse => WriteType::WithResponse,
            WriteMode::WithoutResponse => WriteType::WithoutResponse,
        };
        self.peripheral
            .write(&self.rx_char, data, write_type)
            .await
            .map_err(|e| TransportError::WriteFailed(e.to_string()))
    }

    async fn subscribe(&self) -> Result<LinkEvents, TransportError> {
        let events_rx = self
            .events_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .ok_or(TransportError::AlreadySubscribed)?;

        self.peripheral
            .subscribe(&self.tx_char)
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
        let mut notifications = self
            .peripheral
            .notifications()
            .await
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        let events_tx = self.events_tx.clone();
        let connected = Arc::clone(&self.connected);
        let forwarder = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                if notification.uuid != OTA_TX_CHAR_UUID {
                    continue;
                }
                if events_tx
                    .send(LinkEvent::Notification(notification.value))
                    .is_err()
                {
                    return;
                }
            }
            // The stream only ends when the peripheral goes away.
            signal_disconnect(&connected, &events_tx);
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(forwarder);
        }

        debug!(tx = %self.tx_char.uuid, "Subscribed to notifications");
        Ok(events_rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        signal_disconnect(&self.connected, &self.events_tx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn address(&self) -> &str {
        &self.address
    }
}

impl Drop for BtleLink {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        if self.connected.swap(false, Ordering::SeqCst)
            && let Ok(runtime) = tokio::runtime::Handle::try_current()
        {
            let peripheral = self.peripheral.clone();
            runtime.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(error = %e, "Disconnect on drop failed");
                }
            });
        }
    }
}
