//! Container transport
//!
//! The scheduler and module runtime only see [`ContainerSink`] and
//! [`ContainerSource`]. [`Conference`] implements both over a tokio broadcast
//! channel so a whole session can run inside one process.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::{debug, trace, warn};
use wirecodec::{Codec, Container, TimeStamp};

use crate::error::TransportError;

/// Outbound half of a transport
pub trait ContainerSink: Send + Sync {
    fn send(&self, container: &Container) -> Result<(), TransportError>;
}

/// Inbound half of a transport
#[async_trait]
pub trait ContainerSource: Send {
    /// Wait for the next container
    async fn receive(&mut self) -> Result<Container, TransportError>;

    /// Next container if one is queued, else [`TransportError::WouldBlock`]
    fn try_receive(&mut self) -> Result<Container, TransportError>;
}

impl<T: ContainerSink + ?Sized> ContainerSink for Arc<T> {
    fn send(&self, container: &Container) -> Result<(), TransportError> {
        (**self).send(container)
    }
}

#[derive(Debug, Clone)]
struct Packet {
    origin: u64,
    bytes: Arc<[u8]>,
}

/// Default number of packets buffered per participant
pub const DEFAULT_CONFERENCE_CAPACITY: usize = 1024;

/// In-process conference keyed by a numeric id
///
/// Every participant sees every packet sent by the others; its own packets
/// are filtered out. A participant that falls more than the channel capacity
/// behind loses the oldest packets.
#[derive(Debug, Clone)]
pub struct Conference {
    cid: u32,
    codec: Codec,
    tx: broadcast::Sender<Packet>,
    next_origin: Arc<AtomicU64>,
}

impl Conference {
    pub fn new(cid: u32, codec: Codec) -> Self {
        Self::with_capacity(cid, codec, DEFAULT_CONFERENCE_CAPACITY)
    }

    pub fn with_capacity(cid: u32, codec: Codec, capacity: usize) -> Self {
        debug!(cid, capacity, "Conference::with_capacity: called");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            cid,
            codec,
            tx,
            next_origin: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn cid(&self) -> u32 {
        self.cid
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// Join as a new participant
    pub fn join(&self) -> (ConferenceSender, ConferenceReceiver) {
        let origin = self.next_origin.fetch_add(1, Ordering::Relaxed);
        debug!(cid = self.cid, origin, "Conference::join: called");
        let sender = ConferenceSender {
            cid: self.cid,
            origin,
            codec: self.codec,
            tx: self.tx.clone(),
        };
        let receiver = ConferenceReceiver {
            cid: self.cid,
            origin,
            codec: self.codec,
            rx: self.tx.subscribe(),
        };
        (sender, receiver)
    }
}

/// Sending endpoint of one participant
#[derive(Debug, Clone)]
pub struct ConferenceSender {
    cid: u32,
    origin: u64,
    codec: Codec,
    tx: broadcast::Sender<Packet>,
}

impl ContainerSink for ConferenceSender {
    fn send(&self, container: &Container) -> Result<(), TransportError> {
        let bytes = self.codec.to_wire(container)?;
        trace!(cid = self.cid, data_type = container.data_type(), len = bytes.len(), "ConferenceSender::send");
        self.tx
            .send(Packet {
                origin: self.origin,
                bytes: bytes.into(),
            })
            .map(|_| ())
            .map_err(|_| TransportError::SendFailed(format!("conference {} has no listeners", self.cid)))
    }
}

/// Receiving endpoint of one participant
#[derive(Debug)]
pub struct ConferenceReceiver {
    cid: u32,
    origin: u64,
    codec: Codec,
    rx: broadcast::Receiver<Packet>,
}

impl ConferenceReceiver {
    /// Decode a packet from another participant, stamping the receive time
    fn accept(&self, packet: Packet) -> Option<Container> {
        if packet.origin == self.origin {
            return None;
        }
        match self.codec.from_wire(&packet.bytes) {
            Ok(container) => Some(container.with_received(TimeStamp::now())),
            Err(e) => {
                warn!(cid = self.cid, error = %e, "Dropping undecodable packet");
                None
            }
        }
    }
}

#[async_trait]
impl ContainerSource for ConferenceReceiver {
    async fn receive(&mut self) -> Result<Container, TransportError> {
        loop {
            match self.rx.recv().await {
                Ok(packet) => {
                    if let Some(container) = self.accept(packet) {
                        return Ok(container);
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    warn!(cid = self.cid, missed, "Receiver lagged, packets dropped");
                }
                Err(RecvError::Closed) => return Err(TransportError::Closed { cid: self.cid }),
            }
        }
    }

    fn try_receive(&mut self) -> Result<Container, TransportError> {
        loop {
            match self.rx.try_recv() {
                Ok(packet) => {
                    if let Some(container) = self.accept(packet) {
                        return Ok(container);
                    }
                }
                Err(TryRecvError::Empty) => return Err(TransportError::WouldBlock),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!(cid = self.cid, missed, "Receiver lagged, packets dropped");
                }
                Err(TryRecvError::Closed) => return Err(TransportError::Closed { cid: self.cid }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PulseAck;

    fn ack(cycle: u64) -> PulseAck {
        PulseAck {
            cycle,
            module: "player".into(),
        }
    }

    #[tokio::test]
    async fn test_delivery_to_others_only() {
        let codec = Codec::default();
        let conference = Conference::new(111, codec);
        let (a_tx, mut a_rx) = conference.join();
        let (_b_tx, mut b_rx) = conference.join();

        let sent = codec.pack(&ack(1), TimeStamp::from_micros(5)).unwrap();
        a_tx.send(&sent).unwrap();

        let got = b_rx.receive().await.unwrap();
        assert_eq!(got.sent(), TimeStamp::from_micros(5));
        assert!(got.received() > TimeStamp::default());
        assert_eq!(got.unpack::<PulseAck>(&codec).unwrap(), ack(1));

        assert_eq!(a_rx.try_receive().unwrap_err(), TransportError::WouldBlock);
    }

    #[tokio::test]
    async fn test_per_sender_order() {
        let codec = Codec::default();
        let conference = Conference::new(111, codec);
        let (tx, _own) = conference.join();
        let (_, mut rx) = conference.join();
        for cycle in 0..10 {
            tx.send(&codec.pack(&ack(cycle), TimeStamp::now()).unwrap()).unwrap();
        }
        for cycle in 0..10 {
            let got = rx.receive().await.unwrap();
            assert_eq!(got.unpack::<PulseAck>(&codec).unwrap().cycle, cycle);
        }
    }

    #[tokio::test]
    async fn test_lagged_receiver_drops_oldest() {
        let codec = Codec::default();
        let conference = Conference::with_capacity(111, codec, 4);
        let (tx, _own) = conference.join();
        let (_, mut rx) = conference.join();
        for cycle in 0..10 {
            tx.send(&codec.pack(&ack(cycle), TimeStamp::now()).unwrap()).unwrap();
        }
        let first = rx.try_receive().unwrap();
        assert_eq!(first.unpack::<PulseAck>(&codec).unwrap().cycle, 6);
    }

    #[tokio::test]
    async fn test_send_without_listeners_fails() {
        let codec = Codec::default();
        let conference = Conference::new(7, codec);
        let (tx, rx) = conference.join();
        drop(rx);
        let err = tx.send(&codec.pack(&ack(0), TimeStamp::now()).unwrap()).unwrap_err();
        assert!(matches!(err, TransportError::SendFailed(_)));
    }

    #[tokio::test]
    async fn test_oversized_container_is_refused() {
        let conference = Conference::new(7, Codec::with_max_message_size(16));
        let (tx, _rx) = conference.join();
        let container = Container::new(99, TimeStamp::now(), vec![0; 64]);
        assert!(matches!(tx.send(&container), Err(TransportError::Encode(_))));
    }
}
