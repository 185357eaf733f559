//! Link wrapper that reports outgoing packets to an observer.

use async_trait::async_trait;

use super::traits::{LinkEvents, OtaLink, TransportError, WriteMode};
use crate::events::{OtaEvent, OtaObserver, PacketDirection};
use crate::protocol::constants::*;

/// Transport wrapper that emits packet events.
pub struct ObservableLink<'a, L: OtaLink + ?Sized, O: OtaObserver> {
    inner: &'a L,
    observer: &'a O,
}

impl<'a, L: OtaLink + ?Sized, O: OtaObserver> ObservableLink<'a, L, O> {
    pub fn new(inner: &'a L, observer: &'a O) -> Self {
        Self { inner, observer }
    }
}

/// Human readable name for a raw packet, keyed on its opcode.
pub fn packet_type(data: &[u8]) -> &'static str {
    match data.first() {
        Some(&OP_DATA) => "Data",
        Some(&OP_COMPLETE) => "Complete",
        Some(&OP_RESET) => "Reset",
        Some(&OP_SIZE) => "Size",
        Some(&OP_INFO) => "Info",
        Some(&OP_MODE) => "Mode",
        Some(&OP_BLOCK_REQUEST) => "BlockRequest",
        Some(&OP_INSTALLING) => "Installing",
        Some(&OP_RESULT) => "Result",
        Some(_) => "Unknown",
        None => "Empty",
    }
}

#[async_trait]
impl<L: OtaLink + ?Sized, O: OtaObserver> OtaLink for ObservableLink<'_, L, O> {
    async fn write(&self, data: &[u8], mode: WriteMode) -> Result<(), TransportError> {
        let res = self.inner.write(data, mode).await;
        if res.is_ok() {
            self.observer.on_event(&OtaEvent::Packet {
                direction: PacketDirection::Tx,
                packet_type: packet_type(data).to_string(),
                length: data.len(),
                data: Some(data.iter().take(32).cloned().collect()),
            });
        }
        res
    }

    async fn subscribe(&self) -> Result<LinkEvents, TransportError> {
        self.inner.subscribe().await
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.inner.disconnect().await
    }

    fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    fn address(&self) -> &str {
        self.inner.address()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockLink;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<OtaEvent>>);

    impl OtaObserver for Recorder {
        fn on_event(&self, event: &OtaEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[tokio::test]
    async fn test_reports_successful_writes_only() {
        let mock = MockLink::new();
        let recorder = Recorder::default();
        let link = ObservableLink::new(&mock, &recorder);

        link.write(&[0xFD], WriteMode::WithoutResponse).await.unwrap();
        mock.drop_link();
        assert!(link.write(&[0xFE, 0, 0, 0, 1], WriteMode::WithoutResponse).await.is_err());

        let events = recorder.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            OtaEvent::Packet { direction: PacketDirection::Tx, packet_type, length: 1, .. }
                if packet_type == "Reset"
        ));
    }
}
