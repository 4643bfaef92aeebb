use std::net::SocketAddr;

use tokio::sync::mpsc;
use tracing::trace;

use crate::FailureKind;
use crate::progress::Progress;

/// Default capacity of an event channel.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A file offered by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub file_name: String,
    pub file_size: u64,
    pub file_hash: String,
    pub peer: Option<SocketAddr>,
}

/// Notifications emitted by a [`Link`](crate::Link).
///
/// Each transfer ends with exactly one of `Complete`, `Rejected`,
/// `Cancelled` or `Error`.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// The peer offered a file. Fired before the accept policy is consulted.
    Request(FileOffer),
    /// A chunk was sent or received.
    Progress(Progress),
    /// The transfer finished and the digest matched.
    Complete(Progress),
    /// The offer was declined, by either side.
    Rejected(Progress),
    Paused(Progress),
    Resumed(Progress),
    /// Cancelled locally.
    Cancelled(Progress),
    /// The transfer failed. `progress` is `None` when no session existed.
    Error {
        progress: Option<Progress>,
        kind: FailureKind,
        message: String,
    },
}

impl TransferEvent {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            TransferEvent::Request(_) => "request",
            TransferEvent::Progress(_) => "progress",
            TransferEvent::Complete(_) => "complete",
            TransferEvent::Rejected(_) => "rejected",
            TransferEvent::Paused(_) => "paused",
            TransferEvent::Resumed(_) => "resumed",
            TransferEvent::Cancelled(_) => "cancelled",
            TransferEvent::Error { .. } => "error",
        }
    }

    /// Whether this event ends a transfer.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Complete(_)
                | TransferEvent::Rejected(_)
                | TransferEvent::Cancelled(_)
                | TransferEvent::Error { .. }
        )
    }

    pub fn progress(&self) -> Option<&Progress> {
        match self {
            TransferEvent::Request(_) => None,
            TransferEvent::Progress(p)
            | TransferEvent::Complete(p)
            | TransferEvent::Rejected(p)
            | TransferEvent::Paused(p)
            | TransferEvent::Resumed(p)
            | TransferEvent::Cancelled(p) => Some(p),
            TransferEvent::Error { progress, .. } => progress.as_ref(),
        }
    }
}

/// Sending half of an event channel.
///
/// Progress events are dropped when the consumer falls behind; every other
/// event waits for capacity.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<TransferEvent>>,
}

impl EventSink {
    /// Creates a bounded event channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Non-blocking send for progress updates.
    pub(crate) fn progress(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx
            && let Err(mpsc::error::TrySendError::Full(ev)) = tx.try_send(event)
        {
            trace!(event = ev.name(), "event consumer lagging, progress dropped");
        }
    }

    /// Delivers an event. Must not be called while holding the link lock.
    pub(crate) async fn emit(&self, event: TransferEvent) {
        if let Some(tx) = &self.tx {
            // A closed receiver just means nobody is listening.
            let _ = tx.send(event).await;
        }
    }
}
