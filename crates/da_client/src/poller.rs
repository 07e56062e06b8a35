//! Confirmation polling against the chain head and the Blobstream nonce.
//!
//! Every wait sleeps one interval before each read, so a condition that is
//! already true is still observed one interval later. Cancellation is
//! checked before each sleep and races both the sleep and the read.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_POLL_INTERVAL_SECS;
use crate::error::{DaError, Result};
use crate::ports::{AttestationBridge, HeaderReader};

/// Progress of a single wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling { polls: u64, last: Option<u64> },
    Satisfied(u64),
}

/// Sleep-then-read poller with an optional read budget.
#[derive(Debug, Clone)]
pub struct ConfirmationPoller {
    interval: Duration,
    max_polls: Option<u64>,
}

impl Default for ConfirmationPoller {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS))
    }
}

impl ConfirmationPoller {
    /// Create an unbounded poller.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_polls: None,
        }
    }

    /// Fail with [`DaError::PollLimitExceeded`] after `max_polls` unsatisfied reads.
    pub fn with_max_polls(mut self, max_polls: u64) -> Self {
        self.max_polls = Some(max_polls);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_polls(&self) -> Option<u64> {
        self.max_polls
    }

    /// Block until the local head is at least `target`. Returns the observed head.
    pub async fn wait_for_height<H: HeaderReader + ?Sized>(
        &self,
        cancel: &CancellationToken,
        headers: &H,
        target: u64,
    ) -> Result<u64> {
        let height = self
            .poll_until(cancel, "local head", move || headers.get_local_head(), |h| h >= target)
            .await?;
        info!("Local head reached {} (target {})", height, target);
        Ok(height)
    }

    /// Block until the bridge nonce is strictly greater than `nonce`.
    pub async fn wait_for_nonce<B: AttestationBridge + ?Sized>(
        &self,
        cancel: &CancellationToken,
        bridge: &B,
        nonce: u64,
    ) -> Result<u64> {
        let current = self
            .poll_until(cancel, "blobstream nonce", move || bridge.current_nonce(), |n| n > nonce)
            .await?;
        info!("Blobstream nonce advanced to {} (past {})", current, nonce);
        Ok(current)
    }

    async fn poll_until<R, Fut, P>(
        &self,
        cancel: &CancellationToken,
        what: &str,
        mut read: R,
        satisfied: P,
    ) -> Result<u64>
    where
        R: FnMut() -> Fut,
        Fut: Future<Output = Result<u64>>,
        P: Fn(u64) -> bool,
    {
        let mut state = PollState::Polling { polls: 0, last: None };
        loop {
            let polls = match state {
                PollState::Satisfied(value) => return Ok(value),
                PollState::Polling { polls, last } => {
                    if let Some(limit) = self.max_polls {
                        if polls >= limit {
                            warn!("Giving up on {} after {} polls (last {:?})", what, polls, last);
                            return Err(DaError::PollLimitExceeded { polls });
                        }
                    }
                    polls
                }
            };

            if cancel.is_cancelled() {
                return Err(DaError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DaError::Cancelled),
                _ = tokio::time::sleep(self.interval) => {}
            }

            let value = cancellable(cancel, read()).await.map_err(|e| {
                if !matches!(e, DaError::Cancelled) {
                    warn!("Reading {} failed: {}", what, e);
                }
                e
            })?;
            debug!(what, value, poll = polls + 1, "poll");

            state = if satisfied(value) {
                PollState::Satisfied(value)
            } else {
                PollState::Polling {
                    polls: polls + 1,
                    last: Some(value),
                }
            };
        }
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DaError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mock::{MockBridge, MockRpc};
    use std::sync::Arc;
    use tokio::time::Instant;

    fn poller() -> ConfirmationPoller {
        ConfirmationPoller::new(Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_height_polls_once_per_interval() {
        let rpc = MockRpc::new().with(|s| s.heads = vec![10, 11, 12, 13]);
        let start = Instant::now();
        let head = poller()
            .wait_for_height(&CancellationToken::new(), &rpc, 12)
            .await
            .unwrap();
        assert_eq!(head, 12);
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(rpc.state.lock().unwrap().head_reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_reached_still_waits_one_interval() {
        let rpc = MockRpc::new().with(|s| s.heads = vec![100]);
        let start = Instant::now();
        let head = poller()
            .wait_for_height(&CancellationToken::new(), &rpc, 50)
            .await
            .unwrap();
        assert_eq!(head, 100);
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_nonce_is_strict() {
        let bridge = MockBridge::new().with(|s| s.nonces = vec![7, 7, 8]);
        let nonce = poller()
            .wait_for_nonce(&CancellationToken::new(), &bridge, 7)
            .await
            .unwrap();
        assert_eq!(nonce, 8);
        assert_eq!(bridge.state.lock().unwrap().nonce_reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_error_propagates_without_retry() {
        let rpc = MockRpc::new().with(|s| s.head_fails = true);
        let err = poller()
            .wait_for_height(&CancellationToken::new(), &rpc, 1)
            .await
            .unwrap_err();
        assert!(err.is_transport());
        assert_eq!(rpc.calls(), vec!["get_local_head"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_sleep() {
        let rpc = Arc::new(MockRpc::new().with(|s| s.heads = vec![1]));
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let err = poller().wait_for_height(&cancel, rpc.as_ref(), 1_000).await.unwrap_err();
        assert!(matches!(err, DaError::Cancelled));
        // Returns at the cancellation instant, not at the next tick.
        assert_eq!(start.elapsed(), Duration::from_secs(12));
        assert_eq!(rpc.state.lock().unwrap().head_reads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_cancelled_does_not_read() {
        let rpc = MockRpc::new().with(|s| s.heads = vec![1]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = poller().wait_for_height(&cancel, &rpc, 1).await.unwrap_err();
        assert!(matches!(err, DaError::Cancelled));
        assert!(rpc.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_limit() {
        let bridge = MockBridge::new().with(|s| s.nonces = vec![3]);
        let start = Instant::now();
        let err = poller()
            .with_max_polls(4)
            .wait_for_nonce(&CancellationToken::new(), &bridge, 3)
            .await
            .unwrap_err();
        assert!(matches!(err, DaError::PollLimitExceeded { polls: 4 }));
        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn test_default_interval() {
        let poller = ConfirmationPoller::default();
        assert_eq!(poller.interval(), Duration::from_secs(5));
        assert_eq!(poller.max_polls(), None);
    }
}
