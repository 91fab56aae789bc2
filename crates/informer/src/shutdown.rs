//! Cooperative shutdown broadcast shared by every coordinator.

use tokio_util::sync::CancellationToken;

/// Idempotently-closeable shutdown marker. Clones share the same signal;
/// triggering wakes every waiter simultaneously.
#[derive(Clone, Default)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Safe to invoke more than once.
    pub fn trigger(&self) {
        self.token.cancel();
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_is_idempotent_and_wakes_all_waiters() {
        let shutdown = Shutdown::new();
        let a = shutdown.clone();
        let b = shutdown.clone();

        let wait_a = tokio::spawn(async move { a.cancelled().await });
        let wait_b = tokio::spawn(async move { b.cancelled().await });

        shutdown.trigger();
        shutdown.trigger();

        wait_a.await.expect("waiter a woke");
        wait_b.await.expect("waiter b woke");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn cancelled_resolves_after_the_fact() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        // Already-fired signal must not park late subscribers.
        shutdown.cancelled().await;
    }
}
