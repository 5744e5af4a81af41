use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Single-slot change signal.
///
/// Notices coalesce: however many arrive before the receiver wakes, it sees
/// one. Sending never blocks, and once the owning scope is cancelled the
/// signal is dropped.
#[derive(Debug)]
pub struct Noticer {
    notify: Notify,
    token: CancellationToken,
}

impl Noticer {
    pub fn new(token: CancellationToken) -> Self {
        Self {
            notify: Notify::new(),
            token,
        }
    }

    pub fn notice(&self) {
        if self.token.is_cancelled() {
            return;
        }
        self.notify.notify_one();
    }

    /// Resolves once a notice is pending, consuming it.
    pub async fn recv(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn pending_notice_is_delivered_once() {
        let n = Noticer::new(CancellationToken::new());
        n.notice();
        n.notice();
        n.notice();

        timeout(Duration::from_secs(1), n.recv()).await.unwrap();
        // Coalesced: no second signal is pending.
        assert!(timeout(Duration::from_millis(50), n.recv()).await.is_err());
    }

    #[tokio::test]
    async fn notice_wakes_a_waiting_receiver() {
        let n = std::sync::Arc::new(Noticer::new(CancellationToken::new()));
        let waiter = {
            let n = n.clone();
            tokio::spawn(async move { n.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        n.notice();
        timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancelled_scope_drops_notices() {
        let token = CancellationToken::new();
        let n = Noticer::new(token.clone());
        token.cancel();
        n.notice();
        assert!(timeout(Duration::from_millis(50), n.recv()).await.is_err());
    }
}
