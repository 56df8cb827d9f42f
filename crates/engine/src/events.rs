//! Upload lifecycle event channels.
//!
//! The engine publishes one event per upload on the *created* channel once
//! the upload is persisted, and one on the *completed* channel once the
//! final byte is persisted. Each channel is bounded: a full channel makes the
//! publishing request wait for the consumer.
//!
//! The two channels are consumed independently, so every event is stamped
//! with a *created watermark*: the number of created events published on the
//! pair so far. A consumer of completed events can wait until that many
//! created events have been applied before acting on one.

use crate::traits::UploadInfo;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;

/// Which lifecycle transition an event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadEventKind {
    Created,
    Completed,
}

impl UploadEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadEventKind::Created => "created",
            UploadEventKind::Completed => "completed",
        }
    }
}

impl fmt::Display for UploadEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event carrying the upload's info at the time it fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub kind: UploadEventKind,
    pub upload: UploadInfo,
    /// Created events published on this channel pair up to and including
    /// this one. For a completed event this covers the upload's own
    /// created event.
    pub created_watermark: u64,
}

/// Returned when the receiving side has been closed or dropped.
#[derive(Debug, Error)]
#[error("{} event channel closed", .0.kind)]
pub struct ChannelClosed(pub UploadEvent);

/// Publishing half of an event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    kind: UploadEventKind,
    tx: mpsc::Sender<UploadEvent>,
    created: Arc<AtomicU64>,
}

impl EventSender {
    pub fn kind(&self) -> UploadEventKind {
        self.kind
    }

    /// Publish an event, waiting while the channel is full.
    pub async fn send(&self, upload: UploadInfo) -> Result<(), ChannelClosed> {
        let mut event = UploadEvent {
            kind: self.kind,
            upload,
            created_watermark: 0,
        };
        let Ok(permit) = self.tx.reserve().await else {
            return Err(ChannelClosed(event));
        };
        // Counted and sent with no await in between, so every counted
        // created event reaches the channel.
        event.created_watermark = match self.kind {
            UploadEventKind::Created => self.created.fetch_add(1, Ordering::SeqCst) + 1,
            UploadEventKind::Completed => self.created.load(Ordering::SeqCst),
        };
        permit.send(event);
        Ok(())
    }
}

/// Consuming half of an event channel.
#[derive(Debug)]
pub struct EventReceiver {
    kind: UploadEventKind,
    rx: mpsc::Receiver<UploadEvent>,
}

impl EventReceiver {
    pub fn kind(&self) -> UploadEventKind {
        self.kind
    }

    /// Wait for the next event. Returns `None` once the channel is closed
    /// and every buffered event has been received.
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        self.rx.recv().await
    }

    /// Whether no event is currently buffered.
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Stop accepting new events. Already buffered events can still be
    /// received.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

/// Create one bounded event channel with its own created counter.
pub fn channel(kind: UploadEventKind, capacity: usize) -> (EventSender, EventReceiver) {
    counted_channel(kind, capacity, Arc::default())
}

fn counted_channel(
    kind: UploadEventKind,
    capacity: usize,
    created: Arc<AtomicU64>,
) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { kind, tx, created }, EventReceiver { kind, rx })
}

/// Both publishing halves, owned by the engine.
#[derive(Debug, Clone)]
pub struct EventSenders {
    pub created: EventSender,
    pub completed: EventSender,
}

/// Both consuming halves, handed to the synchronizer.
#[derive(Debug)]
pub struct EventReceivers {
    pub created: EventReceiver,
    pub completed: EventReceiver,
}

/// Create the created/completed channel pair, sharing one created counter.
pub fn event_channels(capacity: usize) -> (EventSenders, EventReceivers) {
    let created = Arc::new(AtomicU64::new(0));
    let (created_tx, created_rx) =
        counted_channel(UploadEventKind::Created, capacity, created.clone());
    let (completed_tx, completed_rx) =
        counted_channel(UploadEventKind::Completed, capacity, created);
    (
        EventSenders {
            created: created_tx,
            completed: completed_tx,
        },
        EventReceivers {
            created: created_rx,
            completed: completed_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use upvault_core::{UploadId, UploadMetadata};

    fn upload(size: u64) -> UploadInfo {
        UploadInfo::new(UploadId::generate(), size, UploadMetadata::new())
    }

    #[tokio::test]
    async fn events_arrive_in_send_order() {
        let (tx, mut rx) = channel(UploadEventKind::Created, 8);
        let first = upload(1);
        let second = upload(2);

        tx.send(first.clone()).await.unwrap();
        tx.send(second.clone()).await.unwrap();

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert_eq!(a.kind, UploadEventKind::Created);
        assert_eq!(a.upload, first);
        assert_eq!(b.upload, second);
    }

    #[tokio::test]
    async fn close_drains_buffered_events_then_ends() {
        let (tx, mut rx) = channel(UploadEventKind::Completed, 8);
        tx.send(upload(1)).await.unwrap();
        tx.send(upload(2)).await.unwrap();

        rx.close();
        assert!(tx.send(upload(3)).await.is_err());

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_fails_after_receiver_dropped() {
        let (tx, rx) = channel(UploadEventKind::Created, 1);
        drop(rx);

        let err = tx.send(upload(7)).await.unwrap_err();
        assert_eq!(err.0.upload.size, 7);
        assert_eq!(err.to_string(), "created event channel closed");
    }

    #[tokio::test]
    async fn completed_events_carry_the_created_watermark() {
        let (senders, mut receivers) = event_channels(8);

        senders.completed.send(upload(0)).await.unwrap();
        senders.created.send(upload(1)).await.unwrap();
        senders.created.send(upload(2)).await.unwrap();
        senders.completed.send(upload(2)).await.unwrap();

        let created: Vec<_> = [
            receivers.created.recv().await.unwrap(),
            receivers.created.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.created_watermark)
        .collect();
        assert_eq!(created, vec![1, 2]);

        assert_eq!(receivers.completed.recv().await.unwrap().created_watermark, 0);
        assert_eq!(receivers.completed.recv().await.unwrap().created_watermark, 2);
    }

    #[tokio::test]
    async fn separate_pairs_count_independently() {
        let (first, _first_rx) = event_channels(4);
        let (second, mut second_rx) = event_channels(4);

        first.created.send(upload(1)).await.unwrap();
        second.completed.send(upload(1)).await.unwrap();

        assert_eq!(second_rx.completed.recv().await.unwrap().created_watermark, 0);
    }
}
