//! One connected peer.
//!
//! A link owns both halves of a socket. The read half belongs to the control
//! task for the lifetime of the link; the write half sits behind the link
//! lock together with the current transfer, so every frame sequence
//! (command + header, or `DATA` + chunk) is written atomically and state
//! changes are observed in a consistent order.

mod control;
mod sender;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use filebridge_protocol::{Command, ErrorHeader, FrameCodec, FrameError, RequestHeader};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunked::{ChunkReader, ChunkWriter};
use crate::config::TransferConfig;
use crate::events::{EventSink, TransferEvent};
use crate::policy::{AcceptAll, AcceptPolicy};
use crate::progress::Progress;
use crate::session::{Role, TransferSession, TransferState};
use crate::{TransferError, hash};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Longest failure reason forwarded in an `ERROR` header.
const MAX_REASON_CHARS: usize = 200;

/// Construction options for a [`Link`].
#[derive(Clone)]
pub struct LinkOptions {
    pub config: TransferConfig,
    pub policy: Arc<dyn AcceptPolicy>,
    pub events: EventSink,
    pub peer: Option<SocketAddr>,
    /// Parent token; the link derives a child from it.
    pub cancel: CancellationToken,
}

impl LinkOptions {
    /// Accepts every offer and discards events.
    pub fn new(config: TransferConfig) -> Self {
        Self {
            config,
            policy: Arc::new(AcceptAll),
            events: EventSink::disabled(),
            peer: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_policy<P: AcceptPolicy>(self, policy: P) -> Self {
        self.with_shared_policy(Arc::new(policy))
    }

    pub fn with_shared_policy(mut self, policy: Arc<dyn AcceptPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Result of [`Link::send_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The peer accepted; data streams from `offset`.
    Started { offset: u64 },
    /// The peer declined the offer.
    Rejected,
}

/// Handle to a connected peer. Cheap to clone.
#[derive(Clone)]
pub struct Link {
    inner: Arc<LinkInner>,
}

/// Published on every state change of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Phase {
    id: Uuid,
    role: Role,
    state: TransferState,
}

struct LinkInner {
    config: TransferConfig,
    codec: FrameCodec,
    policy: Arc<dyn AcceptPolicy>,
    events: EventSink,
    peer: Option<SocketAddr>,
    shared: Mutex<Shared>,
    phase: watch::Sender<Option<Phase>>,
    cancel: CancellationToken,
}

struct Shared {
    /// `None` once the link is closed.
    writer: Option<BoxedWriter>,
    transfer: Option<Transfer>,
    /// Set while `send_file` waits for the peer's answer.
    pending: Option<oneshot::Sender<Reply>>,
}

struct Transfer {
    session: TransferSession,
    /// Destination file while receiving.
    sink: Option<ChunkWriter>,
}

#[derive(Debug)]
enum Reply {
    Accept,
    Resume(u64),
    Reject,
    /// Something other than an answer arrived.
    Unexpected(String),
    /// The transfer ended before an answer arrived.
    Aborted(TransferError),
}

impl Link {
    /// Starts the control task for an already connected stream.
    ///
    /// The returned handle completes when the peer disconnects or the link
    /// is closed.
    pub fn spawn<R, W>(reader: R, writer: W, options: LinkOptions) -> (Self, JoinHandle<()>)
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (phase, _) = watch::channel(None);
        let inner = Arc::new(LinkInner {
            codec: options.config.codec(),
            config: options.config,
            policy: options.policy,
            events: options.events,
            peer: options.peer,
            shared: Mutex::new(Shared {
                writer: Some(Box::new(writer)),
                transfer: None,
                pending: None,
            }),
            phase,
            cancel: options.cancel.child_token(),
        });
        let task = tokio::spawn(control::run(Arc::clone(&inner), Box::new(reader)));
        (Self { inner }, task)
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.inner.peer
    }

    pub fn config(&self) -> &TransferConfig {
        &self.inner.config
    }

    /// State of the current (or most recent) transfer.
    pub fn state(&self) -> Option<TransferState> {
        self.inner.phase.borrow().map(|p| p.state)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Snapshot of the current (or most recent) transfer.
    pub async fn progress(&self) -> Option<Progress> {
        let shared = self.inner.shared.lock().await;
        shared.transfer.as_ref().map(|t| t.session.progress())
    }

    /// Waits until the current transfer reaches a terminal state.
    ///
    /// Returns immediately if the most recent transfer already finished.
    /// Returns the last known state if the link closes first.
    pub async fn wait_finished(&self) -> Option<TransferState> {
        let mut rx = self.inner.phase.subscribe();
        loop {
            if let Some(phase) = *rx.borrow_and_update()
                && phase.state.is_terminal()
            {
                return Some(phase.state);
            }
            let closed = tokio::select! {
                _ = self.inner.cancel.cancelled() => true,
                changed = rx.changed() => changed.is_err(),
            };
            if closed {
                return rx.borrow().map(|p| p.state);
            }
        }
    }

    /// Offers `path` to the peer and, once accepted, starts streaming it.
    ///
    /// Returns after the peer answers. Completion is reported through the
    /// event channel and [`wait_finished`](Self::wait_finished).
    pub async fn send_file(&self, path: impl AsRef<Path>) -> Result<SendOutcome, TransferError> {
        let path = path.as_ref();
        let inner = &self.inner;
        if self.is_closed() {
            return Err(TransferError::ConnectionClosed);
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TransferError::FileNotFound(path.to_path_buf()),
            _ => TransferError::Io(e),
        })?;
        if !metadata.is_file() {
            return Err(TransferError::FileNotFound(path.to_path_buf()));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(format!("no file name: {}", path.display())))?
            .to_string();
        let file_size = metadata.len();

        if inner.shared.lock().await.is_busy() {
            return Err(TransferError::Busy);
        }
        let file_hash =
            hash::file_digest_async(path.to_path_buf(), inner.config.hash_algorithm).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let id = {
            let mut shared = inner.shared.lock().await;
            if shared.is_busy() {
                return Err(TransferError::Busy);
            }
            let mut session = TransferSession::new(
                Role::Sender,
                path.to_path_buf(),
                file_name.clone(),
                file_size,
                file_hash.clone(),
            )
            .with_peer(inner.peer);
            let id = session.id();
            inner.transition(&mut session, TransferState::Requested)?;
            shared.transfer = Some(Transfer {
                session,
                sink: None,
            });
            shared.pending = Some(reply_tx);

            let header = RequestHeader {
                file_name: file_name.clone(),
                file_size,
                file_hash: file_hash.clone(),
            };
            if let Err(e) = shared
                .send_with_header(&inner.codec, Command::Request, &header)
                .await
            {
                shared.pending = None;
                return Err(inner.fail_with(shared, e.into(), false).await);
            }
            id
        };
        info!(session = %id, file = %file_name, size = file_size, hash = %file_hash, "offer sent");

        let offset = match reply_rx.await {
            Ok(Reply::Accept) => 0,
            Ok(Reply::Resume(offset)) => offset,
            Ok(Reply::Reject) => {
                let progress = {
                    let mut shared = inner.shared.lock().await;
                    let Some(transfer) = shared.live(id) else {
                        return Err(TransferError::Cancelled);
                    };
                    inner.transition(&mut transfer.session, TransferState::Rejected)?;
                    transfer.session.progress()
                };
                info!(session = %id, file = %file_name, "offer rejected by peer");
                inner.events.emit(TransferEvent::Rejected(progress)).await;
                return Ok(SendOutcome::Rejected);
            }
            Ok(Reply::Unexpected(what)) => {
                let shared = inner.shared.lock().await;
                let err = TransferError::ProtocolViolation(format!(
                    "expected ACCEPT, RESUME or REJECT, got {what}"
                ));
                return Err(inner.fail_with(shared, err, true).await);
            }
            Ok(Reply::Aborted(err)) => return Err(err),
            Err(_) => return Err(TransferError::ConnectionClosed),
        };

        let mut shared = inner.shared.lock().await;
        if shared.live(id).is_none() {
            return Err(TransferError::Cancelled);
        }
        if offset > file_size {
            let err = TransferError::ProtocolViolation(format!(
                "resume offset {offset} beyond file size {file_size}"
            ));
            return Err(inner.fail_with(shared, err, true).await);
        }
        let reader = match open_source(path, inner.config.effective_chunk_size(), offset).await {
            Ok(r) => r,
            Err(e) => return Err(inner.fail_with(shared, e, true).await),
        };
        let Some(transfer) = shared.live(id) else {
            return Err(TransferError::Cancelled);
        };
        inner.transition(&mut transfer.session, TransferState::Accepted)?;
        transfer.session.start_at(offset)?;
        inner.transition(&mut transfer.session, TransferState::Active)?;
        drop(shared);

        if offset > 0 {
            info!(session = %id, offset, "peer resumes partial file");
        } else {
            info!(session = %id, "offer accepted");
        }
        tokio::spawn(sender::run(
            Arc::clone(inner),
            reader,
            id,
            path.to_path_buf(),
        ));
        Ok(SendOutcome::Started { offset })
    }

    /// Pauses the active transfer.
    ///
    /// A paused sender stops issuing chunks; a paused receiver stops reading
    /// from the socket.
    pub async fn pause(&self) -> Result<(), TransferError> {
        let progress = {
            let mut shared = self.inner.shared.lock().await;
            let transfer = shared.transfer.as_mut().ok_or(TransferError::NotActive)?;
            self.inner
                .transition(&mut transfer.session, TransferState::Paused)?;
            let session = &transfer.session;
            if session.role() == Role::Receiver {
                crate::resume::save(
                    session.file_path(),
                    session.file_size(),
                    session.transferred_size(),
                )
                .await;
            }
            session.progress()
        };
        info!(
            session = %progress.session_id,
            transferred = progress.transferred_size,
            "transfer paused"
        );
        self.inner.events.emit(TransferEvent::Paused(progress)).await;
        Ok(())
    }

    /// Resumes a paused transfer.
    pub async fn resume(&self) -> Result<(), TransferError> {
        let progress = {
            let mut shared = self.inner.shared.lock().await;
            let transfer = shared.transfer.as_mut().ok_or(TransferError::NotActive)?;
            self.inner
                .transition(&mut transfer.session, TransferState::Active)?;
            transfer.session.restart_clock();
            transfer.session.progress()
        };
        info!(session = %progress.session_id, "transfer resumed");
        self.inner.events.emit(TransferEvent::Resumed(progress)).await;
        Ok(())
    }

    /// Cancels the current transfer and tells the peer.
    ///
    /// A partially received file and its resume record are kept.
    pub async fn cancel(&self) -> Result<(), TransferError> {
        let shared = self.inner.shared.lock().await;
        let live = shared
            .transfer
            .as_ref()
            .is_some_and(|t| !t.session.state().is_terminal());
        if !live {
            return Err(TransferError::NotActive);
        }
        self.inner
            .fail_with(shared, TransferError::Cancelled, true)
            .await;
        Ok(())
    }

    /// Cancels any live transfer and shuts the connection down.
    pub async fn close(&self) {
        if self.is_closed() {
            return;
        }
        let _ = self.cancel().await;
        {
            let mut shared = self.inner.shared.lock().await;
            if let Some(mut writer) = shared.writer.take()
                && let Err(e) = writer.shutdown().await
            {
                debug!(error = %e, "shutdown failed");
            }
        }
        self.inner.cancel.cancel();
        debug!(peer = ?self.inner.peer, "link closed");
    }
}

async fn open_source(path: &Path, chunk_size: usize, offset: u64) -> Result<ChunkReader, TransferError> {
    let mut reader = ChunkReader::open(path, chunk_size).await?;
    reader.seek_to(offset).await?;
    Ok(reader)
}

impl Shared {
    fn is_busy(&self) -> bool {
        self.pending.is_some()
            || self
                .transfer
                .as_ref()
                .is_some_and(|t| !t.session.state().is_terminal())
    }

    /// The transfer `id`, if it is still current and not finished.
    fn live(&mut self, id: Uuid) -> Option<&mut Transfer> {
        self.transfer
            .as_mut()
            .filter(|t| t.session.id() == id && !t.session.state().is_terminal())
    }

    async fn send(&mut self, codec: &FrameCodec, command: Command) -> Result<(), FrameError> {
        let writer = self.writer.as_mut().ok_or(FrameError::ConnectionClosed)?;
        codec.write_command(writer, command).await
    }

    async fn send_with_header<T: Serialize + Sync>(
        &mut self,
        codec: &FrameCodec,
        command: Command,
        header: &T,
    ) -> Result<(), FrameError> {
        let writer = self.writer.as_mut().ok_or(FrameError::ConnectionClosed)?;
        codec.write_command_with_header(writer, command, header).await
    }

    async fn send_chunk(&mut self, codec: &FrameCodec, data: &[u8]) -> Result<(), FrameError> {
        let writer = self.writer.as_mut().ok_or(FrameError::ConnectionClosed)?;
        codec.write_command(writer, Command::Data).await?;
        codec.write_chunk(writer, data).await
    }
}

impl LinkInner {
    fn publish(&self, session: &TransferSession) {
        self.phase.send_replace(Some(Phase {
            id: session.id(),
            role: session.role(),
            state: session.state(),
        }));
    }

    fn transition(
        &self,
        session: &mut TransferSession,
        next: TransferState,
    ) -> Result<(), TransferError> {
        session.transition(next)?;
        self.publish(session);
        Ok(())
    }

    /// Moves the current transfer to `Error`, at most once.
    ///
    /// Resolves a pending reply, closes the destination file and optionally
    /// reports the reason to the peer. Returns the final snapshot when this
    /// call was the one that ended the transfer.
    async fn abort_locked(
        &self,
        shared: &mut Shared,
        reason: &TransferError,
        notify_peer: bool,
    ) -> Option<Progress> {
        if let Some(tx) = shared.pending.take() {
            let _ = tx.send(Reply::Aborted(reason.replicate()));
        }
        let transfer = shared.transfer.as_mut()?;
        if !transfer.session.fail(reason.to_string()) {
            return None;
        }
        transfer.sink = None;
        self.publish(&transfer.session);
        let progress = transfer.session.progress();

        if notify_peer {
            let message: String = reason.to_string().chars().take(MAX_REASON_CHARS).collect();
            if let Err(e) = shared
                .send_with_header(&self.codec, Command::Error, &ErrorHeader::new(message))
                .await
            {
                debug!(error = %e, "could not report failure to peer");
            }
        }

        if matches!(reason, TransferError::Cancelled) {
            info!(
                session = %progress.session_id,
                transferred = progress.transferred_size,
                "transfer cancelled"
            );
        } else {
            warn!(
                session = %progress.session_id,
                file = %progress.file_name,
                error = %reason,
                "transfer failed"
            );
        }
        Some(progress)
    }

    /// Ends the current transfer, releases the lock, then emits the event.
    async fn fail_with(
        &self,
        mut shared: MutexGuard<'_, Shared>,
        reason: TransferError,
        notify_peer: bool,
    ) -> TransferError {
        let progress = self.abort_locked(&mut shared, &reason, notify_peer).await;
        drop(shared);
        if let Some(progress) = progress {
            self.events.emit(failure_event(progress, &reason)).await;
        }
        reason
    }

    async fn fail(&self, reason: TransferError, notify_peer: bool) {
        let shared = self.shared.lock().await;
        self.fail_with(shared, reason, notify_peer).await;
    }
}

fn failure_event(progress: Progress, reason: &TransferError) -> TransferEvent {
    match reason {
        TransferError::Cancelled => TransferEvent::Cancelled(progress),
        _ => TransferEvent::Error {
            kind: reason.kind(),
            message: reason.to_string(),
            progress: Some(progress),
        },
    }
}
