//! Control task: reads frames from the peer and drives the receive side.

use std::path::Path;
use std::sync::Arc;

use filebridge_protocol::{
    Command, CompleteHeader, ErrorHeader, FrameError, RequestHeader, ResumeHeader,
};
use tracing::{debug, error, info, warn};

use super::{BoxedReader, LinkInner, Phase, Reply, Transfer};
use crate::chunked::ChunkWriter;
use crate::config::TransferConfig;
use crate::events::{FileOffer, TransferEvent};
use crate::session::{Role, TransferSession, TransferState};
use crate::validation::validate_file_name;
use crate::{FailureKind, TransferError, hash, resume};

pub(super) async fn run(inner: Arc<LinkInner>, mut reader: BoxedReader) {
    match read_loop(&inner, &mut reader).await {
        Ok(()) => debug!("control loop stopped"),
        Err(FrameError::ConnectionClosed) => info!(peer = ?inner.peer, "peer disconnected"),
        Err(e) => warn!(peer = ?inner.peer, error = %e, "control loop failed"),
    }
    inner.disconnect().await;
}

async fn read_loop(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    loop {
        inner.hold_while_receive_paused().await;

        let token = tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => return Ok(()),
            read = inner.codec.read_command(reader) => read?,
        };
        let Ok(command) = token.parse::<Command>() else {
            warn!(command = %token, "ignoring unknown command");
            inner.reply_unexpected(&token).await;
            continue;
        };
        debug!(%command, "command received");

        if matches!(command, Command::Data | Command::Complete) {
            inner.reply_unexpected(command.as_str()).await;
        }
        let step = match command {
            Command::Request => handle_request(inner, reader).await,
            Command::Accept => {
                inner.deliver_reply(Reply::Accept).await;
                Ok(())
            }
            Command::Reject => {
                inner.deliver_reply(Reply::Reject).await;
                Ok(())
            }
            Command::Resume => handle_resume(inner, reader).await,
            Command::Data => handle_data(inner, reader).await,
            Command::Complete => handle_complete(inner, reader).await,
            Command::Error => handle_peer_error(inner, reader).await,
        };

        if let Err(e) = step {
            if misaligned(&e) {
                // The payload was never read, so nothing after it can be framed.
                error!(%command, error = %e, "stream out of sync, closing link");
                inner
                    .fail(TransferError::ProtocolViolation(e.to_string()), true)
                    .await;
                return Err(e);
            }
            if !recoverable(&e) {
                return Err(e);
            }
            warn!(%command, error = %e, "malformed frame");
            inner.fail(TransferError::from(e), true).await;
        }
    }
}

/// Decode faults that leave unread bytes in the stream while the socket is
/// still writable.
fn misaligned(err: &FrameError) -> bool {
    matches!(err, FrameError::ChunkTooLarge { .. })
}

/// Errors after which the stream is still aligned on a frame boundary.
fn recoverable(err: &FrameError) -> bool {
    matches!(
        err,
        FrameError::Json(_) | FrameError::Oversize { .. } | FrameError::Protocol(_)
    )
}

fn invalid(err: TransferError) -> FrameError {
    FrameError::Protocol(err.to_string())
}

async fn handle_request(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    let header: RequestHeader = inner.codec.read_header(reader).await?;
    // Both sides offered at once; ours loses.
    inner.reply_unexpected(Command::Request.as_str()).await;

    let offer = FileOffer {
        file_name: header.file_name,
        file_size: header.file_size,
        file_hash: header.file_hash,
        peer: inner.peer,
    };
    info!(
        file = %offer.file_name,
        size = offer.file_size,
        peer = ?offer.peer,
        "transfer requested"
    );

    let destination = inner.config.download_dir.join(&offer.file_name);
    let id = {
        let mut shared = inner.shared.lock().await;
        if shared.is_busy() {
            warn!(file = %offer.file_name, "rejecting offer: transfer already in progress");
            shared.send(&inner.codec, Command::Reject).await?;
            return Ok(());
        }
        if let Err(e) = validate_file_name(&offer.file_name) {
            warn!(error = %e, "rejecting offer");
            shared.send(&inner.codec, Command::Reject).await?;
            drop(shared);
            inner
                .events
                .emit(TransferEvent::Error {
                    progress: None,
                    kind: FailureKind::ProtocolViolation,
                    message: e.to_string(),
                })
                .await;
            return Ok(());
        }

        let mut session = TransferSession::new(
            Role::Receiver,
            destination.clone(),
            offer.file_name.clone(),
            offer.file_size,
            offer.file_hash.clone(),
        )
        .with_peer(inner.peer);
        inner
            .transition(&mut session, TransferState::Requested)
            .map_err(invalid)?;
        let id = session.id();
        shared.transfer = Some(Transfer {
            session,
            sink: None,
        });
        id
    };

    inner.events.emit(TransferEvent::Request(offer.clone())).await;
    let accepted = inner.policy.decide(&offer).await;

    if !accepted {
        let progress = {
            let mut shared = inner.shared.lock().await;
            let Some(transfer) = shared.live(id) else {
                return Ok(());
            };
            inner
                .transition(&mut transfer.session, TransferState::Rejected)
                .map_err(invalid)?;
            let progress = transfer.session.progress();
            shared.send(&inner.codec, Command::Reject).await?;
            progress
        };
        info!(file = %offer.file_name, "offer rejected");
        inner.events.emit(TransferEvent::Rejected(progress)).await;
        return Ok(());
    }

    let opened = open_destination(&inner.config, &destination, offer.file_size).await;

    let mut shared = inner.shared.lock().await;
    if shared.live(id).is_none() {
        debug!(file = %offer.file_name, "offer withdrawn before acceptance");
        return Ok(());
    }
    let (sink, offset) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            error!(path = %destination.display(), error = %e, "cannot open destination");
            inner.fail_with(shared, e, true).await;
            return Ok(());
        }
    };
    let Some(transfer) = shared.live(id) else {
        return Ok(());
    };
    inner
        .transition(&mut transfer.session, TransferState::Accepted)
        .map_err(invalid)?;
    transfer.session.start_at(offset).map_err(invalid)?;
    inner
        .transition(&mut transfer.session, TransferState::Active)
        .map_err(invalid)?;
    transfer.sink = Some(sink);

    if offset == 0 {
        shared.send(&inner.codec, Command::Accept).await?;
        info!(file = %offer.file_name, path = %destination.display(), "offer accepted");
    } else {
        let reply = ResumeHeader {
            file_name: offer.file_name.clone(),
            transferred_size: offset,
        };
        shared
            .send_with_header(&inner.codec, Command::Resume, &reply)
            .await?;
        info!(file = %offer.file_name, offset, "resuming partial file");
    }
    Ok(())
}

/// Opens the destination, continuing from a valid resume record if allowed.
async fn open_destination(
    config: &TransferConfig,
    destination: &Path,
    file_size: u64,
) -> Result<(ChunkWriter, u64), TransferError> {
    if config.resume_enabled
        && let Some(record) = resume::load(destination).await
    {
        let on_disk = tokio::fs::metadata(destination)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if record.is_resumable(file_size, on_disk) && record.transferred_size > 0 {
            match ChunkWriter::resume(destination, record.transferred_size).await {
                Ok(sink) => return Ok((sink, record.transferred_size)),
                Err(e) => warn!(error = %e, "cannot reopen partial file, restarting"),
            }
        } else {
            info!(
                recorded = record.transferred_size,
                recorded_size = record.file_size,
                on_disk,
                "discarding stale resume record"
            );
        }
    }
    let sink = ChunkWriter::create(destination).await?;
    // Supersedes any stale record for this path.
    resume::save(destination, file_size, 0).await;
    Ok((sink, 0))
}

async fn handle_resume(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    let header: ResumeHeader = inner.codec.read_header(reader).await?;
    inner
        .deliver_reply(Reply::Resume(header.transferred_size))
        .await;
    Ok(())
}

async fn handle_data(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    let data = inner.codec.read_chunk(reader).await?;
    let len = data.len() as u64;

    let mut shared = inner.shared.lock().await;
    let Some(transfer) = shared.transfer.as_mut().filter(|t| receiving(&t.session)) else {
        warn!(len, "discarding DATA outside an active receive");
        return Ok(());
    };
    let remaining = transfer.session.file_size() - transfer.session.transferred_size();
    if len > remaining {
        let err = TransferError::ProtocolViolation(format!(
            "chunk of {len} bytes overruns {}-byte file at offset {}",
            transfer.session.file_size(),
            transfer.session.transferred_size()
        ));
        inner.fail_with(shared, err, true).await;
        return Ok(());
    }
    let Some(sink) = transfer.sink.as_mut() else {
        warn!(len, "discarding DATA with no open destination");
        return Ok(());
    };
    if let Err(e) = sink.write_chunk(&data).await {
        inner.fail_with(shared, e, true).await;
        return Ok(());
    }
    let total = match transfer.session.record_chunk(len) {
        Ok(total) => total,
        Err(e) => {
            inner.fail_with(shared, e, true).await;
            return Ok(());
        }
    };
    resume::save(
        transfer.session.file_path(),
        transfer.session.file_size(),
        total,
    )
    .await;
    let progress = transfer.session.progress();
    drop(shared);

    inner.events.progress(TransferEvent::Progress(progress));
    Ok(())
}

async fn handle_complete(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    let header: CompleteHeader = inner.codec.read_header(reader).await?;

    let (id, sink, path) = {
        let mut shared = inner.shared.lock().await;
        let Some(transfer) = shared.transfer.as_mut().filter(|t| receiving(&t.session)) else {
            warn!("ignoring COMPLETE outside an active receive");
            return Ok(());
        };
        let Some(sink) = transfer.sink.take() else {
            return Ok(());
        };
        let path = sink.path().to_path_buf();
        (transfer.session.id(), sink, path)
    };

    // Hash outside the lock; pause and cancel stay responsive.
    let verdict = match sink.finish().await {
        Ok(()) => hash::file_digest_async(path.clone(), inner.config.hash_algorithm).await,
        Err(e) => Err(e),
    };

    let mut shared = inner.shared.lock().await;
    let Some(transfer) = shared.live(id) else {
        return Ok(());
    };
    match verdict {
        Ok(actual) if actual.eq_ignore_ascii_case(&header.file_hash) => {
            if transfer.session.state() == TransferState::Paused {
                inner
                    .transition(&mut transfer.session, TransferState::Active)
                    .map_err(invalid)?;
            }
            inner
                .transition(&mut transfer.session, TransferState::Completed)
                .map_err(invalid)?;
            resume::clear(&path).await;
            let progress = transfer.session.progress();
            drop(shared);

            info!(
                file = %progress.file_name,
                size = progress.file_size,
                path = %path.display(),
                "transfer complete, hash verified"
            );
            inner.events.emit(TransferEvent::Complete(progress)).await;
        }
        Ok(actual) => {
            error!(
                expected = %header.file_hash,
                %actual,
                path = %path.display(),
                "hash mismatch, received file kept"
            );
            // Rewind the record so a retry starts over instead of replaying
            // the same bytes.
            resume::save(&path, transfer.session.file_size(), 0).await;
            let err = TransferError::IntegrityMismatch {
                expected: header.file_hash,
                actual,
            };
            inner.fail_with(shared, err, true).await;
        }
        Err(e) => {
            inner.fail_with(shared, e, true).await;
        }
    }
    Ok(())
}

async fn handle_peer_error(inner: &Arc<LinkInner>, reader: &mut BoxedReader) -> Result<(), FrameError> {
    let header: ErrorHeader = inner.codec.read_header(reader).await?;
    error!(reason = %header.error, "peer reported an error");
    inner
        .fail(TransferError::PeerError(header.error), false)
        .await;
    Ok(())
}

fn receiving(session: &TransferSession) -> bool {
    session.role() == Role::Receiver
        && matches!(
            session.state(),
            TransferState::Active | TransferState::Paused
        )
}

impl LinkInner {
    /// Parks the read loop while a receive is paused.
    async fn hold_while_receive_paused(&self) {
        let mut rx = self.phase.subscribe();
        loop {
            let paused = matches!(
                *rx.borrow_and_update(),
                Some(Phase {
                    role: Role::Receiver,
                    state: TransferState::Paused,
                    ..
                })
            );
            if !paused {
                return;
            }
            debug!("receive paused, not reading from peer");
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn deliver_reply(&self, reply: Reply) {
        let pending = self.shared.lock().await.pending.take();
        match pending {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!(?reply, "ignoring unsolicited reply"),
        }
    }

    /// Fails a pending `send_file` that received something other than an answer.
    async fn reply_unexpected(&self, what: &str) {
        if let Some(tx) = self.shared.lock().await.pending.take() {
            let _ = tx.send(Reply::Unexpected(what.to_string()));
        }
    }

    async fn disconnect(&self) {
        let progress = {
            let mut shared = self.shared.lock().await;
            let progress = self
                .abort_locked(&mut shared, &TransferError::ConnectionClosed, false)
                .await;
            shared.writer = None;
            progress
        };
        if let Some(progress) = progress {
            self.events
                .emit(super::failure_event(progress, &TransferError::ConnectionClosed))
                .await;
        }
        self.cancel.cancel();
    }
}
