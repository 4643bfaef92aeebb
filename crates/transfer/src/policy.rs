//! Accept/reject decisions for incoming offers.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::events::FileOffer;

/// A boxed future returned by [`AcceptPolicy::decide`].
pub type DecisionFuture<'a> = Pin<Box<dyn Future<Output = bool> + Send + 'a>>;

/// Decides whether to receive an offered file.
///
/// The link awaits the decision without holding any lock, so an
/// implementation may take as long as it needs (e.g. asking a user).
pub trait AcceptPolicy: Send + Sync + 'static {
    fn decide<'a>(&'a self, offer: &'a FileOffer) -> DecisionFuture<'a>;
}

/// Accepts every offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl AcceptPolicy for AcceptAll {
    fn decide<'a>(&'a self, _offer: &'a FileOffer) -> DecisionFuture<'a> {
        Box::pin(async { true })
    }
}

/// Rejects every offer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl AcceptPolicy for RejectAll {
    fn decide<'a>(&'a self, _offer: &'a FileOffer) -> DecisionFuture<'a> {
        Box::pin(async { false })
    }
}

/// Forwards each offer to a consumer that answers through [`PendingOffer`].
///
/// Dropping a `PendingOffer` without answering rejects the offer.
#[derive(Debug, Clone)]
pub struct PromptPolicy {
    tx: mpsc::Sender<PendingOffer>,
}

impl PromptPolicy {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PendingOffer>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl AcceptPolicy for PromptPolicy {
    fn decide<'a>(&'a self, offer: &'a FileOffer) -> DecisionFuture<'a> {
        Box::pin(async move {
            let (respond, rx) = oneshot::channel();
            let pending = PendingOffer {
                offer: offer.clone(),
                respond,
            };
            if self.tx.send(pending).await.is_err() {
                warn!(file = %offer.file_name, "no one to answer offer, rejecting");
                return false;
            }
            rx.await.unwrap_or(false)
        })
    }
}

/// An offer awaiting an answer.
#[derive(Debug)]
pub struct PendingOffer {
    pub offer: FileOffer,
    respond: oneshot::Sender<bool>,
}

impl PendingOffer {
    pub fn answer(self, accept: bool) {
        let _ = self.respond.send(accept);
    }

    pub fn accept(self) {
        self.answer(true);
    }

    pub fn reject(self) {
        self.answer(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer() -> FileOffer {
        FileOffer {
            file_name: "a.bin".into(),
            file_size: 10,
            file_hash: "abc".into(),
            peer: None,
        }
    }

    #[tokio::test]
    async fn fixed_policies() {
        let o = offer();
        assert!(AcceptAll.decide(&o).await);
        assert!(!RejectAll.decide(&o).await);
    }

    #[tokio::test]
    async fn prompt_forwards_answer() {
        let (policy, mut rx) = PromptPolicy::channel(1);
        let answerer = tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            assert_eq!(pending.offer.file_name, "a.bin");
            pending.accept();
        });
        let o = offer();
        assert!(policy.decide(&o).await);
        answerer.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_offer_rejects() {
        let (policy, mut rx) = PromptPolicy::channel(1);
        tokio::spawn(async move {
            let pending = rx.recv().await.unwrap();
            drop(pending);
        });
        assert!(!policy.decide(&offer()).await);
    }

    #[tokio::test]
    async fn closed_prompt_rejects() {
        let (policy, rx) = PromptPolicy::channel(1);
        drop(rx);
        assert!(!policy.decide(&offer()).await);
    }
}
