//! Fixed-interval polling with a wall-clock bound.
//!
//! Used for anything that completes asynchronously on the control plane
//! (service provisioning today). The combinator knows nothing about the
//! resource being polled: the check closure reports `Ready` or `Pending` with
//! the status it observed, and any error it returns ends polling at once.

use crate::error::{HarnessError, HarnessResult};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

/// Configuration for polling behavior.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two checks.
    pub interval: Duration,
    /// Upper bound on the total wall-clock time spent polling.
    pub max_wait: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(7),
            max_wait: Duration::from_secs(280),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }

    /// Create a config for quick polling (tests, local fakes).
    pub fn quick() -> Self {
        Self {
            interval: Duration::from_millis(50),
            max_wait: Duration::from_secs(2),
        }
    }
}

/// Result of a single check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    Ready(T),
    /// Not there yet; carries the status text observed on this check.
    Pending(String),
}

/// Poll `check` until it reports `Ready`, fails, or `max_wait` elapses.
///
/// The first check runs immediately. A final check always runs at the
/// deadline, so a resource that becomes ready during the last sleep is not
/// reported as timed out.
///
/// # Example
/// ```ignore
/// let instance = poll_until(&PollConfig::default(), "ias-authn", || async {
///     match provisioner.status("ias-authn").await? { ... }
/// }).await?;
/// ```
pub async fn poll_until<F, Fut, T>(
    config: &PollConfig,
    resource: &str,
    mut check: F,
) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<PollOutcome<T>>>,
{
    let start = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        let last_status = match check().await? {
            PollOutcome::Ready(value) => {
                info!(
                    resource,
                    attempt,
                    waited_secs = start.elapsed().as_secs(),
                    "Resource is ready"
                );
                return Ok(value);
            }
            PollOutcome::Pending(status) => status,
        };

        let elapsed = start.elapsed();
        if elapsed >= config.max_wait {
            warn!(
                resource,
                attempt,
                waited_secs = elapsed.as_secs(),
                last_status = %last_status,
                "Gave up waiting for resource"
            );
            return Err(HarnessError::Timeout {
                resource: resource.to_string(),
                waited: elapsed,
                last_status,
            });
        }

        let pause = config.interval.min(config.max_wait - elapsed);
        info!(
            resource,
            waited_secs = elapsed.as_secs(),
            status = %last_status,
            "Waiting for resource"
        );
        debug!(resource, pause_ms = pause.as_millis() as u64, "Sleeping before next check");
        sleep(pause).await;
    }
}
