//! Listening side of the host.
//!
//! Binds a TCP listener and turns each accepted connection into a
//! [`Link`]. Peers are served one after another.

use std::net::SocketAddr;

use filebridge_transfer::{Link, LinkOptions};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::HostError;

/// Accepts peers and runs a link for each.
pub struct TransferServer {
    listener: TcpListener,
    /// Template cloned for every accepted peer.
    options: LinkOptions,
}

impl TransferServer {
    /// Binds `addr`. Accepting stops when `options.cancel` fires.
    pub async fn bind<A: ToSocketAddrs>(addr: A, options: LinkOptions) -> Result<Self, HostError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "listening for peers");
        Ok(Self { listener, options })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, HostError> {
        Ok(self.listener.local_addr()?)
    }

    /// Waits for the next peer and starts its link.
    pub async fn accept(&self) -> Result<(Link, JoinHandle<()>), HostError> {
        let (stream, addr) = tokio::select! {
            biased;
            _ = self.options.cancel.cancelled() => {
                return Err(HostError::Cancelled);
            }
            result = self.listener.accept() => result?,
        };
        info!(%addr, "peer connected");

        let (reader, writer) = stream.into_split();
        let options = self.options.clone().with_peer(addr);
        Ok(Link::spawn(reader, writer, options))
    }

    /// Serves peers sequentially until `limit` peers have disconnected or
    /// the host is cancelled. Returns the number of peers served.
    pub async fn serve(&self, limit: Option<usize>) -> Result<usize, HostError> {
        let mut served = 0;
        while limit.is_none_or(|max| served < max) {
            let (link, task) = match self.accept().await {
                Ok(pair) => pair,
                Err(HostError::Cancelled) => break,
                Err(e) => return Err(e),
            };
            served += 1;
            if let Err(e) = task.await {
                warn!(error = %e, "link task failed");
            }
            debug!(peer = ?link.peer(), "peer disconnected");
        }
        Ok(served)
    }
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use filebridge_transfer::{RejectAll, TransferConfig, TransferState};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::TransferClient;

    const TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

    fn config(dir: &Path) -> TransferConfig {
        TransferConfig {
            chunk_size: 1024,
            chunk_pause_ms: 0,
            download_dir: dir.join("downloads"),
            ..TransferConfig::default()
        }
    }

    fn write_source(dir: &Path, name: &str, len: usize) -> (PathBuf, Vec<u8>) {
        let data: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let path = dir.join(name);
        std::fs::write(&path, &data).unwrap();
        (path, data)
    }

    #[tokio::test]
    async fn loopback_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let (source, data) = write_source(dir.path(), "report.bin", 5000);

        let server = TransferServer::bind("127.0.0.1:0", LinkOptions::new(config(dir.path())))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let accept = tokio::spawn(async move { server.accept().await });
        let client_options = LinkOptions::new(config(dir.path()));
        let state = TransferClient::send_file(addr, &source, TIMEOUT, client_options)
            .await
            .unwrap();
        assert_eq!(state, TransferState::Completed);

        let (link, task) = accept.await.unwrap().unwrap();
        assert_eq!(link.wait_finished().await, Some(TransferState::Completed));
        assert_eq!(link.peer().map(|p| p.ip()), Some(addr.ip()));
        task.await.unwrap();

        let received = std::fs::read(dir.path().join("downloads/report.bin")).unwrap();
        assert_eq!(received, data);
    }

    #[tokio::test]
    async fn rejecting_listener() {
        let dir = tempfile::tempdir().unwrap();
        let (source, _) = write_source(dir.path(), "unwanted.bin", 10);

        let options = LinkOptions::new(config(dir.path())).with_policy(RejectAll);
        let server = TransferServer::bind("127.0.0.1:0", options).await.unwrap();
        let addr = server.local_addr().unwrap();
        let serve = tokio::spawn(async move { server.serve(Some(1)).await });

        let state =
            TransferClient::send_file(addr, &source, TIMEOUT, LinkOptions::new(config(dir.path())))
                .await
                .unwrap();
        assert_eq!(state, TransferState::Rejected);
        assert_eq!(serve.await.unwrap().unwrap(), 1);
        assert!(!dir.path().join("downloads/unwanted.bin").exists());
    }

    #[tokio::test]
    async fn serves_peers_one_after_another() {
        let dir = tempfile::tempdir().unwrap();
        let (first, first_data) = write_source(dir.path(), "first.bin", 3000);
        let (second, second_data) = write_source(dir.path(), "second.bin", 700);

        let server = TransferServer::bind("127.0.0.1:0", LinkOptions::new(config(dir.path())))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let serve = tokio::spawn(async move { server.serve(Some(2)).await });

        for source in [&first, &second] {
            let options = LinkOptions::new(config(dir.path()));
            let state = TransferClient::send_file(addr, source, TIMEOUT, options)
                .await
                .unwrap();
            assert_eq!(state, TransferState::Completed);
        }
        assert_eq!(serve.await.unwrap().unwrap(), 2);

        let downloads = dir.path().join("downloads");
        assert_eq!(std::fs::read(downloads.join("first.bin")).unwrap(), first_data);
        assert_eq!(std::fs::read(downloads.join("second.bin")).unwrap(), second_data);
    }

    #[tokio::test]
    async fn cancelled_before_any_peer() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let options = LinkOptions::new(config(dir.path())).with_cancel(cancel.clone());
        let server = TransferServer::bind("127.0.0.1:0", options).await.unwrap();

        cancel.cancel();
        assert!(matches!(server.accept().await, Err(HostError::Cancelled)));
        assert_eq!(server.serve(None).await.unwrap(), 0);
    }
}
