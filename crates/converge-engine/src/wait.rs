//! Polling for eventual consistency
//!
//! IAM and S3 are eventually consistent: a role that `CreateRole` just
//! returned may still be invisible to `GetRole`, and a deleted bucket keeps
//! showing up in `ListBuckets` for a while. [`PollingWaiter`] re-runs the
//! existence probe with exponential backoff until it reports the expected
//! state, the deadline passes, or the cancellation token fires.

use crate::oracle::probe;
use anyhow::{Result, bail};
use backon::{BackoffBuilder, ExponentialBuilder};
use converge_common::defaults::DEFAULT_WAIT_TIMEOUT_SECS;
use converge_common::{CloudApi, ResourceKind, Waiter};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Backoff and deadline for [`poll_until`]
#[derive(Debug, Clone)]
pub struct WaitConfig {
    /// First pause after a negative probe
    pub min_delay: Duration,
    /// Upper bound on a single pause
    pub max_delay: Duration,
    /// Give up once this much time has passed since the first probe
    pub deadline: Duration,
    pub jitter: bool,
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
            deadline: Duration::from_secs(DEFAULT_WAIT_TIMEOUT_SECS),
            jitter: true,
        }
    }
}

impl WaitConfig {
    pub fn with_timeout(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        let builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .without_max_times();
        if self.jitter {
            builder.with_jitter()
        } else {
            builder
        }
    }
}

/// Run `probe` until it returns `Ok(true)`.
///
/// A probe error ends the wait immediately. `what` names the awaited
/// condition in logs and errors.
pub async fn poll_until<F, Fut>(
    config: &WaitConfig,
    cancel: Option<&CancellationToken>,
    what: &str,
    probe: F,
) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let started = Instant::now();
    let mut delays = config.backoff().build();
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            bail!("cancelled while waiting for {what}");
        }

        match probe().await {
            Ok(true) => {
                debug!(condition = %what, attempt, "Condition reached");
                return Ok(());
            }
            Ok(false) => {}
            Err(e) => {
                warn!(condition = %what, attempt, error = %e, "Probe failed");
                return Err(e);
            }
        }

        let elapsed = started.elapsed();
        if elapsed >= config.deadline {
            bail!("gave up waiting for {what} after {elapsed:?} ({attempt} probes)");
        }

        let pause = delays
            .next()
            .unwrap_or(config.max_delay)
            .min(config.deadline - elapsed);
        debug!(condition = %what, attempt, pause_ms = pause.as_millis(), "Not yet, backing off");

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = token.cancelled() => bail!("cancelled while waiting for {what}"),
                }
            }
            None => tokio::time::sleep(pause).await,
        }
    }
}

/// [`Waiter`] backed by the existence probe of a [`CloudApi`]
pub struct PollingWaiter<C> {
    api: Arc<C>,
    config: WaitConfig,
    cancel: Option<CancellationToken>,
}

impl<C: CloudApi> PollingWaiter<C> {
    pub fn new(api: Arc<C>, config: WaitConfig) -> Self {
        Self {
            api,
            config,
            cancel: None,
        }
    }

    /// Abort in-flight waits when `token` is cancelled
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    async fn wait_for(&self, kind: ResourceKind, identifier: &str, present: bool) -> Result<()> {
        let what = if present {
            format!("{kind} {identifier} to appear")
        } else {
            format!("{kind} {identifier} to disappear")
        };
        poll_until(&self.config, self.cancel.as_ref(), &what, || async {
            let exists = probe(self.api.as_ref(), kind, identifier).await?;
            Ok::<_, anyhow::Error>(exists == present)
        })
        .await
    }
}

impl<C: CloudApi> Waiter for PollingWaiter<C> {
    async fn wait_until_exists(&self, kind: ResourceKind, identifier: &str) -> Result<()> {
        self.wait_for(kind, identifier, true).await
    }

    async fn wait_until_not_exists(&self, kind: ResourceKind, identifier: &str) -> Result<()> {
        self.wait_for(kind, identifier, false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge_test_utils::FakeCloud;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> WaitConfig {
        WaitConfig {
            min_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            deadline: Duration::from_secs(5),
            jitter: false,
        }
    }

    #[tokio::test]
    async fn stops_at_first_positive_probe() {
        let probes = AtomicU32::new(0);
        poll_until(&quick(), None, "third probe", || async {
            Ok::<_, anyhow::Error>(probes.fetch_add(1, Ordering::SeqCst) == 2)
        })
        .await
        .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_deadline() {
        let config = quick().with_timeout(Duration::from_millis(20));
        let err = poll_until(&config, None, "nothing", || async { Ok::<_, anyhow::Error>(false) })
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("gave up waiting for nothing"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let token = CancellationToken::new();
        let config = WaitConfig {
            min_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            ..quick()
        };
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = poll_until(&config, Some(&token), "never", || async {
            Ok::<_, anyhow::Error>(false)
        })
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[tokio::test]
    async fn probe_errors_end_the_wait() {
        let probes = AtomicU32::new(0);
        let err = poll_until(&quick(), None, "x", || async {
            probes.fetch_add(1, Ordering::SeqCst);
            Err::<bool, _>(anyhow::anyhow!("AccessDenied"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "AccessDenied");
        assert_eq!(probes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn polling_waiter_uses_existence_probe() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.seed(ResourceKind::Bucket, "logs", None);
        let waiter = PollingWaiter::new(Arc::clone(&cloud), quick());

        waiter.wait_until_exists(ResourceKind::Bucket, "logs").await.unwrap();
        waiter
            .wait_until_not_exists(ResourceKind::Role, "gone")
            .await
            .unwrap();

        let short = PollingWaiter::new(Arc::clone(&cloud), quick().with_timeout(Duration::from_millis(5)));
        assert!(short.wait_until_exists(ResourceKind::Role, "gone").await.is_err());

        let token = CancellationToken::new();
        token.cancel();
        let cancelled = PollingWaiter::new(cloud, quick()).with_cancellation(token);
        let err = cancelled
            .wait_until_exists(ResourceKind::Bucket, "logs")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }
}
