//! Data task: streams the file once the peer has accepted.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use filebridge_protocol::{Command, CompleteHeader};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{LinkInner, Phase};
use crate::chunked::ChunkReader;
use crate::events::TransferEvent;
use crate::session::TransferState;
use crate::{TransferError, hash};

enum Stop {
    /// Every byte up to the file size has been sent.
    Exhausted,
    /// The session ended or was replaced.
    Superseded,
}

pub(super) async fn run(
    inner: Arc<LinkInner>,
    mut reader: ChunkReader,
    id: Uuid,
    path: PathBuf,
) {
    let outcome = stream_chunks(&inner, &mut reader, id).await;
    drop(reader);

    match outcome {
        Ok(Stop::Exhausted) => finish(&inner, id, &path).await,
        Ok(Stop::Superseded) => debug!(session = %id, "data task stopped"),
        Err(e) => {
            let mut shared = inner.shared.lock().await;
            if shared.live(id).is_none() {
                return;
            }
            let notify = !matches!(e, TransferError::ConnectionClosed);
            inner.fail_with(shared, e, notify).await;
        }
    }
}

async fn stream_chunks(
    inner: &LinkInner,
    reader: &mut ChunkReader,
    id: Uuid,
) -> Result<Stop, TransferError> {
    let mut phase = inner.phase.subscribe();
    let pause = inner.config.chunk_pause();
    // A chunk read just before a pause is held until the transfer resumes.
    let mut held: Option<Vec<u8>> = None;

    loop {
        if !wait_until_active(inner, &mut phase, id).await {
            return Ok(Stop::Superseded);
        }
        let data = match held.take() {
            Some(data) => data,
            None => match reader.next_chunk().await? {
                Some(data) => data,
                None => return Ok(Stop::Exhausted),
            },
        };

        let progress = {
            let mut shared = inner.shared.lock().await;
            match shared.live(id).map(|t| t.session.state()) {
                Some(TransferState::Active) => {}
                Some(TransferState::Paused) => {
                    held = Some(data);
                    continue;
                }
                _ => return Ok(Stop::Superseded),
            }
            shared.send_chunk(&inner.codec, &data).await?;
            let Some(transfer) = shared.live(id) else {
                return Ok(Stop::Superseded);
            };
            transfer.session.record_chunk(data.len() as u64)?;
            transfer.session.progress()
        };
        inner.events.progress(TransferEvent::Progress(progress));

        if pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(pause).await;
        }
    }
}

/// Returns `false` when the session is no longer running.
async fn wait_until_active(
    inner: &LinkInner,
    phase: &mut watch::Receiver<Option<Phase>>,
    id: Uuid,
) -> bool {
    loop {
        let current = *phase.borrow_and_update();
        match current {
            Some(p) if p.id == id && p.state == TransferState::Active => return true,
            Some(p) if p.id == id && p.state == TransferState::Paused => {
                debug!(session = %id, "data task parked");
                tokio::select! {
                    _ = inner.cancel.cancelled() => return false,
                    changed = phase.changed() => {
                        if changed.is_err() {
                            return false;
                        }
                    }
                }
            }
            _ => return false,
        }
    }
}

/// Re-hashes the source and sends `COMPLETE` if it still matches the offer.
async fn finish(inner: &LinkInner, id: Uuid, path: &Path) {
    let current = hash::file_digest_async(path.to_path_buf(), inner.config.hash_algorithm).await;

    let mut shared = inner.shared.lock().await;
    let Some(transfer) = shared.live(id) else {
        return;
    };
    let expected = transfer.session.file_hash().to_string();
    let digest = match current {
        Ok(digest) if digest == expected => digest,
        Ok(actual) => {
            error!(path = %path.display(), "source file changed during transfer");
            let err = TransferError::IntegrityMismatch { expected, actual };
            inner.fail_with(shared, err, true).await;
            return;
        }
        Err(e) => {
            inner.fail_with(shared, e, true).await;
            return;
        }
    };

    let complete = CompleteHeader { file_hash: digest };
    if let Err(e) = shared
        .send_with_header(&inner.codec, Command::Complete, &complete)
        .await
    {
        inner.fail_with(shared, e.into(), false).await;
        return;
    }

    let Some(transfer) = shared.live(id) else {
        return;
    };
    if transfer.session.state() == TransferState::Paused
        && let Err(e) = inner.transition(&mut transfer.session, TransferState::Active)
    {
        warn!(error = %e, "cannot leave pause");
        return;
    }
    if let Err(e) = inner.transition(&mut transfer.session, TransferState::Completed) {
        warn!(error = %e, "cannot complete transfer");
        return;
    }
    let progress = transfer.session.progress();
    drop(shared);

    info!(
        session = %id,
        file = %progress.file_name,
        size = progress.file_size,
        "transfer complete"
    );
    inner.events.emit(TransferEvent::Complete(progress)).await;
}
