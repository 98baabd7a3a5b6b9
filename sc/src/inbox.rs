//! Inbound container queue fed by a pump task

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};
use wirecodec::Container;

use crate::error::TransportError;
use crate::transport::ContainerSource;

/// Queue of containers received from a transport
///
/// A background task moves containers from the source into a bounded channel
/// so the owner can wait on them with a deadline. Dropping the inbox stops the
/// task.
#[derive(Debug)]
pub struct Inbox {
    rx: mpsc::Receiver<Container>,
    pump: JoinHandle<()>,
}

impl Inbox {
    /// Start pumping `source`; must be called inside a tokio runtime
    pub fn spawn<S>(mut source: S, capacity: usize) -> Self
    where
        S: ContainerSource + 'static,
    {
        debug!(capacity, "Inbox::spawn: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let pump = tokio::spawn(async move {
            loop {
                match source.receive().await {
                    Ok(container) => {
                        if tx.send(container).await.is_err() {
                            break;
                        }
                    }
                    Err(TransportError::Closed { cid }) => {
                        debug!(cid, "Inbox pump: transport closed");
                        break;
                    }
                    Err(TransportError::WouldBlock) => tokio::task::yield_now().await,
                    Err(e) => warn!(error = %e, "Inbox pump: receive failed"),
                }
            }
        });
        Self { rx, pump }
    }

    /// Wait for the next container; `None` once the transport is gone
    pub async fn next(&mut self) -> Option<Container> {
        self.rx.recv().await
    }

    /// Wait for the next container until `deadline`
    ///
    /// `None` means the deadline passed or the transport is gone; check
    /// [`Inbox::is_closed`] to tell them apart.
    pub async fn next_until(&mut self, deadline: Instant) -> Option<Container> {
        timeout_at(deadline, self.rx.recv()).await.ok().flatten()
    }

    /// Next queued container without waiting
    pub fn try_next(&mut self) -> Option<Container> {
        self.rx.try_recv().ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<Container> {
        let mut out = Vec::new();
        while let Some(container) = self.try_next() {
            out.push(container);
        }
        out
    }

    /// Whether the pump has stopped and the queue is empty
    pub fn is_closed(&self) -> bool {
        self.rx.is_closed() && self.rx.is_empty()
    }
}

impl Drop for Inbox {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Conference, ContainerSink};
    use std::time::Duration;
    use wirecodec::{Codec, TimeStamp};

    #[tokio::test(start_paused = true)]
    async fn test_next_until_times_out_exactly() {
        let conference = Conference::new(1, Codec::default());
        let (_tx, rx) = conference.join();
        let mut inbox = Inbox::spawn(rx, 8);
        let start = Instant::now();
        let deadline = start + Duration::from_millis(250);
        assert!(inbox.next_until(deadline).await.is_none());
        assert_eq!(Instant::now() - start, Duration::from_millis(250));
        assert!(!inbox.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_until_returns_early() {
        let codec = Codec::default();
        let conference = Conference::new(1, codec);
        let (tx, _own) = conference.join();
        let (_, rx) = conference.join();
        let mut inbox = Inbox::spawn(rx, 8);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(40)).await;
            tx.send(&Container::new(77, TimeStamp::now(), vec![1, 2])).unwrap();
        });

        let start = Instant::now();
        let got = inbox.next_until(start + Duration::from_secs(5)).await.unwrap();
        assert_eq!(got.data_type(), 77);
        assert_eq!(Instant::now() - start, Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_drain() {
        let conference = Conference::new(1, Codec::default());
        let (tx, _own) = conference.join();
        let (_, rx) = conference.join();
        let mut inbox = Inbox::spawn(rx, 8);
        for data_type in 100..103 {
            tx.send(&Container::new(data_type, TimeStamp::now(), Vec::new())).unwrap();
        }
        // let the pump catch up
        let first = inbox.next().await.unwrap();
        assert_eq!(first.data_type(), 100);
        while inbox.rx.len() < 2 {
            tokio::task::yield_now().await;
        }
        let rest: Vec<_> = inbox.drain().iter().map(Container::data_type).collect();
        assert_eq!(rest, vec![101, 102]);
        assert!(inbox.try_next().is_none());
    }

    #[tokio::test]
    async fn test_closed_after_transport_goes_away() {
        let conference = Conference::new(1, Codec::default());
        let (tx, rx) = conference.join();
        let mut inbox = Inbox::spawn(rx, 8);
        drop(tx);
        drop(conference);
        assert!(inbox.next().await.is_none());
        assert!(inbox.is_closed());
    }
}
