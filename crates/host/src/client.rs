//! Connecting side of the host.

use std::path::Path;
use std::time::Duration;

use filebridge_transfer::{Link, LinkOptions, SendOutcome, TransferError, TransferState};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::HostError;

/// Dials a listening peer.
pub struct TransferClient;

impl TransferClient {
    /// Connects to `addr` and starts a link over the socket.
    ///
    /// Gives up after `timeout` or when `options.cancel` fires.
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        timeout: Duration,
        options: LinkOptions,
    ) -> Result<(Link, JoinHandle<()>), HostError> {
        let stream = tokio::select! {
            biased;
            _ = options.cancel.cancelled() => {
                return Err(HostError::Cancelled);
            }
            result = tokio::time::timeout(timeout, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(s)) => s,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(HostError::Timeout),
                }
            }
        };

        let peer = stream.peer_addr()?;
        info!(%peer, "connected to peer");
        let (reader, writer) = stream.into_split();
        Ok(Link::spawn(reader, writer, options.with_peer(peer)))
    }

    /// Connects, offers one file and waits for the transfer to end.
    ///
    /// Returns the final state; the link is closed before returning.
    pub async fn send_file<A: ToSocketAddrs>(
        addr: A,
        path: impl AsRef<Path>,
        timeout: Duration,
        options: LinkOptions,
    ) -> Result<TransferState, HostError> {
        let (link, task) = Self::connect(addr, timeout, options).await?;

        let finished = match link.send_file(path).await {
            Ok(SendOutcome::Started { .. }) => link
                .wait_finished()
                .await
                .ok_or(TransferError::ConnectionClosed),
            Ok(SendOutcome::Rejected) => Ok(TransferState::Rejected),
            Err(e) => Err(e),
        };

        link.close().await;
        if let Err(e) = task.await {
            warn!(error = %e, "link task failed");
        }
        Ok(finished?)
    }
}
