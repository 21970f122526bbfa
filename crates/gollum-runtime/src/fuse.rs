//! Per-producer circuit breaker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use gollum_core::ControlMessage;

/// Tracks whether a producer has blown its fuse. Blowing is cheap and
/// synchronous (the producer's own loop sets it on failure); clearing
/// only happens once `CheckFuse` reports healthy again.
#[derive(Default)]
pub struct Fuse {
    blown: AtomicBool,
}

impl Fuse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blow(&self) {
        self.blown.store(true, Ordering::SeqCst);
    }

    pub fn clear(&self) {
        self.blown.store(false, Ordering::SeqCst);
    }

    pub fn is_blown(&self) -> bool {
        self.blown.load(Ordering::SeqCst)
    }
}

/// Polls `check_fuse` at `poll_interval` (bounded to at most 1s per the
/// fuse-cycle testable property) while the fuse is blown, clearing it
/// and posting `FuseActive` to the producer's control channel the first
/// time the check succeeds. Runs until `cancel` fires or the control
/// channel closes.
pub async fn monitor_fuse<F, Fut>(
    fuse: Arc<Fuse>,
    control_tx: mpsc::Sender<ControlMessage>,
    mut check_fuse: F,
    poll_interval: Duration,
    cancel: CancellationToken,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let poll_interval = poll_interval.min(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(poll_interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                if !fuse.is_blown() {
                    continue;
                }
                if check_fuse().await {
                    fuse.clear();
                    tracing::info!("fuse cleared, resuming delivery");
                    if control_tx.send(ControlMessage::FuseActive).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn starts_unblown() {
        let fuse = Fuse::new();
        assert!(!fuse.is_blown());
    }

    #[test]
    fn blow_then_clear_roundtrips() {
        let fuse = Fuse::new();
        fuse.blow();
        assert!(fuse.is_blown());
        fuse.clear();
        assert!(!fuse.is_blown());
    }

    #[tokio::test]
    async fn monitor_clears_fuse_and_notifies_once_healthy() {
        let fuse = Arc::new(Fuse::new());
        fuse.blow();
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let cancel_clone = cancel.clone();
        let fuse_clone = fuse.clone();
        let handle = tokio::spawn(async move {
            monitor_fuse(
                fuse_clone,
                tx,
                move || {
                    let calls = calls_clone.clone();
                    async move { calls.fetch_add(1, Ordering::SeqCst) >= 1 }
                },
                Duration::from_millis(5),
                cancel_clone,
            )
            .await;
        });

        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("monitor should notify within timeout")
            .expect("channel should still be open");
        assert_eq!(msg, ControlMessage::FuseActive);
        assert!(!fuse.is_blown());
        cancel.cancel();
        let _ = handle.await;
    }
}
