//! Mock BLE link for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::traits::{LinkEvent, LinkEvents, OtaLink, TransportError, WriteMode};

/// One captured write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub data: Vec<u8>,
    pub mode: WriteMode,
}

type Responder = Box<dyn FnMut(&[u8], WriteMode) -> Vec<LinkEvent> + Send>;

/// Mock link for unit testing session and state machine logic.
///
/// Clones share the same state, so a test can keep a handle while the
/// session owns another.
#[derive(Clone)]
pub struct MockLink {
    /// Sender side of the event queue handed out by `subscribe`.
    events_tx: mpsc::UnboundedSender<LinkEvent>,
    events_rx: Arc<Mutex<Option<LinkEvents>>>,
    /// Captured writes.
    write_log: Arc<Mutex<Vec<WriteRecord>>>,
    /// Scripted device behaviour, run on every write.
    responder: Arc<Mutex<Option<Responder>>>,
    /// Whether device is "connected".
    connected: Arc<Mutex<bool>>,
    address: String,
}

impl MockLink {
    pub fn new() -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            events_tx,
            events_rx: Arc::new(Mutex::new(Some(events_rx))),
            write_log: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            connected: Arc::new(Mutex::new(true)),
            address: "AA:BB:CC:DD:EE:FF".to_string(),
        }
    }

    /// Install a closure that plays the device: it sees every write and
    /// returns the events the device emits in reply.
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8], WriteMode) -> Vec<LinkEvent> + Send + 'static,
    {
        *self.responder.lock().unwrap() = Some(Box::new(responder));
    }

    /// Queue a notification from the device.
    pub fn notify(&self, data: &[u8]) {
        self.push(LinkEvent::Notification(data.to_vec()));
    }

    /// Get all captured writes.
    pub fn writes(&self) -> Vec<WriteRecord> {
        self.write_log.lock().unwrap().clone()
    }

    /// Clear captured writes.
    pub fn clear_writes(&self) {
        self.write_log.lock().unwrap().clear();
    }

    /// Simulate the device dropping the link.
    pub fn drop_link(&self) {
        self.push(LinkEvent::Disconnected);
    }

    fn push(&self, event: LinkEvent) {
        if event == LinkEvent::Disconnected {
            *self.connected.lock().unwrap() = false;
        }
        // The receiver may already be gone once a session has finished.
        let _ = self.events_tx.send(event);
    }
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OtaLink for MockLink {
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        if !*self.connected.lock().unwrap() {
            return Err(TransportError::Disconnected);
        }
        self.write_log.lock().unwrap().push(WriteRecord {
            data: data.to_vec(),
            mode,
        });

        let replies = match self.responder.lock().unwrap().as_mut() {
            Some(respond) => respond(data, mode),
            None => Vec::new(),
        };
        for event in replies {
            self.push(event);
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<LinkEvents, TransportError> {
        self.events_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(TransportError::AlreadySubscribed)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let was_connected = std::mem::replace(&mut *self.connected.lock().unwrap(), false);
        if was_connected {
            let _ = self.events_tx.send(LinkEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    fn address(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_write_capture() {
        let mock = MockLink::new();
        mock.write(b"Hello", WriteMode::WithoutResponse).await.unwrap();
        mock.write(b"World", WriteMode::WithResponse).await.unwrap();

        let writes = mock.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].data, b"Hello");
        assert_eq!(writes[1].mode, WriteMode::WithResponse);

        mock.clear_writes();
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn test_mock_event_order() {
        let mock = MockLink::new();
        let mut events = mock.subscribe().await.unwrap();

        mock.notify(&[0xAA, 0x01]);
        mock.drop_link();

        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Notification(vec![0xAA, 0x01]))
        );
        assert_eq!(events.recv().await, Some(LinkEvent::Disconnected));
        assert!(matches!(
            mock.subscribe().await,
            Err(TransportError::AlreadySubscribed)
        ));
    }

    #[tokio::test]
    async fn test_mock_responder() {
        let mock = MockLink::new();
        let mut events = mock.subscribe().await.unwrap();
        mock.set_responder(|data, _| {
            if data[0] == 0xFD {
                vec![LinkEvent::Notification(vec![0xF2])]
            } else {
                Vec::new()
            }
        });

        mock.write(&[0xFD], WriteMode::WithoutResponse).await.unwrap();
        mock.write(&[0xFE], WriteMode::WithoutResponse).await.unwrap();

        assert_eq!(events.try_recv(), Ok(LinkEvent::Notification(vec![0xF2])));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mock_disconnect() {
        let mock = MockLink::new();
        assert!(mock.is_connected());

        mock.drop_link();
        assert!(!mock.is_connected());
        assert!(mock.write(b"test", WriteMode::WithoutResponse).await.is_err());
    }
}
