//! Runs one command: wires the host, the accept prompt and event logging.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, bail};
use filebridge_host::{HostConfig, TransferClient, TransferServer};
use filebridge_transfer::{
    EventSink, FileOffer, Link, LinkOptions, PromptPolicy, SendOutcome, TransferEvent,
    TransferState,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cli::{Command, Endpoint, Target};

pub async fn run(command: Command, config: HostConfig) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("SIGINT received, shutting down");
            interrupt.cancel();
        }
    });

    let (events, rx) = EventSink::channel(config.event_buffer);
    let reporter = tokio::spawn(report(rx));
    let options = config
        .link_options()
        .with_events(events)
        .with_cancel(cancel.clone());

    let result = match command {
        Command::Send { file, endpoint } => send(&config, options, &file, &endpoint).await,
        Command::Receive {
            endpoint, yes, once, ..
        } => {
            let options = if yes {
                options
            } else {
                options.with_policy(prompt())
            };
            receive(&config, options, &endpoint, once).await
        }
    };

    // Stops any link still running so the event channel drains and closes.
    cancel.cancel();
    if let Err(e) = reporter.await {
        warn!(error = %e, "event reporter failed");
    }
    result
}

async fn send(
    config: &HostConfig,
    options: LinkOptions,
    file: &Path,
    endpoint: &Endpoint,
) -> anyhow::Result<()> {
    let state = match endpoint.target() {
        Target::Connect(addr) => {
            TransferClient::send_file(addr, file, config.connect_timeout(), options).await?
        }
        Target::Listen(addr) => {
            let server = TransferServer::bind(addr, options).await?;
            let (link, task) = server.accept().await?;
            drop(server);

            let state = offer(&link, file).await;
            link.close().await;
            if let Err(e) = task.await {
                warn!(error = %e, "link task failed");
            }
            state?
        }
    };

    match state {
        TransferState::Completed => Ok(()),
        TransferState::Rejected => bail!("{} was rejected by the peer", file.display()),
        other => bail!("transfer of {} ended in state {other}", file.display()),
    }
}

async fn offer(link: &Link, file: &Path) -> anyhow::Result<TransferState> {
    match link.send_file(file).await? {
        SendOutcome::Started { offset } => {
            if offset > 0 {
                info!(offset, "peer continues a partial download");
            }
            link.wait_finished()
                .await
                .context("link closed before the transfer finished")
        }
        SendOutcome::Rejected => Ok(TransferState::Rejected),
    }
}

async fn receive(
    config: &HostConfig,
    options: LinkOptions,
    endpoint: &Endpoint,
    once: bool,
) -> anyhow::Result<()> {
    info!(
        dir = %config.transfer.download_dir.display(),
        resume = config.transfer.resume_enabled,
        "receiving files"
    );

    match endpoint.target() {
        Target::Listen(addr) => {
            let server = TransferServer::bind(addr, options).await?;
            let served = server.serve(once.then_some(1)).await?;
            info!(peers = served, "stopped receiving");
        }
        Target::Connect(addr) => {
            let (_link, task) =
                TransferClient::connect(addr, config.connect_timeout(), options).await?;
            task.await.context("link task failed")?;
            info!("peer disconnected");
        }
    }
    Ok(())
}

/// Asks on the terminal before accepting each offer.
fn prompt() -> PromptPolicy {
    let (policy, mut offers) = PromptPolicy::channel(1);
    tokio::spawn(async move {
        while let Some(pending) = offers.recv().await {
            let question = describe(&pending.offer);
            match tokio::task::spawn_blocking(move || ask(&question)).await {
                Ok(Ok(answer)) => pending.answer(answer),
                Ok(Err(e)) => {
                    warn!(error = %e, "cannot read answer, rejecting");
                    pending.reject();
                }
                Err(e) => {
                    warn!(error = %e, "prompt failed, rejecting");
                    pending.reject();
                }
            }
        }
    });
    policy
}

fn ask(question: &str) -> std::io::Result<bool> {
    {
        let mut stderr = std::io::stderr().lock();
        write!(stderr, "{question} [y/N] ")?;
        stderr.flush()?;
    }
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(is_yes(&line))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn describe(offer: &FileOffer) -> String {
    let from = offer
        .peer
        .map(|p| p.to_string())
        .unwrap_or_else(|| "peer".into());
    format!(
        "Accept {} ({}) from {from}?",
        offer.file_name,
        human_bytes(offer.file_size)
    )
}

/// Logs events until every link has dropped its sink.
async fn report(mut rx: mpsc::Receiver<TransferEvent>) {
    // Progress is logged once per tenth of the file.
    let mut last_step = None;

    while let Some(event) = rx.recv().await {
        match &event {
            TransferEvent::Request(offer) => {
                info!(
                    file = %offer.file_name,
                    size = offer.file_size,
                    peer = ?offer.peer,
                    "incoming offer"
                );
            }
            TransferEvent::Progress(p) => {
                let step = (p.session_id, (p.percent() / 10.0) as u8);
                if last_step == Some(step) {
                    continue;
                }
                last_step = Some(step);
                info!(
                    file = %p.file_name,
                    percent = p.percent().round() as u64,
                    speed = %format!("{}/s", human_bytes(p.speed as u64)),
                    eta_secs = p.eta.map(|eta| eta.as_secs()),
                    "progress"
                );
            }
            TransferEvent::Complete(p) => {
                info!(
                    file = %p.file_name,
                    path = %p.file_path.display(),
                    size = %human_bytes(p.file_size),
                    role = %p.role,
                    "transfer complete"
                );
            }
            TransferEvent::Rejected(p) => warn!(file = %p.file_name, "offer rejected"),
            TransferEvent::Paused(p) | TransferEvent::Resumed(p) => {
                info!(file = %p.file_name, state = %p.state, "transfer {}", event.name());
            }
            TransferEvent::Cancelled(p) => warn!(file = %p.file_name, "transfer cancelled"),
            TransferEvent::Error {
                progress,
                kind,
                message,
            } => {
                let file = progress.as_ref().map(|p| p.file_name.as_str()).unwrap_or("-");
                error!(file, ?kind, %message, "transfer failed");
            }
        }
    }
    debug!("event channel closed");
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes("  YES \r\n"));
        assert!(!is_yes("\n"));
        assert!(!is_yes("no\n"));
        assert!(!is_yes("yep"));
    }

    #[test]
    fn byte_sizes() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(1023), "1023 B");
        assert_eq!(human_bytes(1536), "1.5 KiB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(human_bytes(5 * 1024 * 1024 * 1024), "5.0 GiB");
    }

    #[test]
    fn offer_question() {
        let offer = FileOffer {
            file_name: "photo.jpg".into(),
            file_size: 2048,
            file_hash: "d41d8cd98f00b204e9800998ecf8427e".into(),
            peer: Some("192.0.2.7:5001".parse().unwrap()),
        };
        assert_eq!(
            describe(&offer),
            "Accept photo.jpg (2.0 KiB) from 192.0.2.7:5001?"
        );

        let anonymous = FileOffer { peer: None, ..offer };
        assert_eq!(describe(&anonymous), "Accept photo.jpg (2.0 KiB) from peer?");
    }
}
