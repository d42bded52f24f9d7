//! Outbound notification capability. Transport adapters (FCM/APNs, SMS
//! gateway) live outside this crate; everything here talks to the trait.
//! Legs are fire-and-forget with bounded retries — a notification that
//! cannot be submitted is logged and counted, never surfaced to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::metrics::Metrics;

/// Per-attempt deadline for a delivery leg.
pub const LEG_DEADLINE: Duration = Duration::from_secs(10);

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE_MS: u64 = 250;

#[derive(Debug, thiserror::Error)]
#[error("notification transport failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(
        &self,
        device_token: &str,
        title: &str,
        body: &str,
        data: &serde_json::Value,
    ) -> Result<(), NotifyError>;

    async fn sms(&self, phone_number: &str, body: &str) -> Result<(), NotifyError>;
}

/// Development/test adapter: logs instead of delivering.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn push(
        &self,
        device_token: &str,
        title: &str,
        _body: &str,
        _data: &serde_json::Value,
    ) -> Result<(), NotifyError> {
        info!(token = device_token, title, "push_submitted");
        Ok(())
    }

    async fn sms(&self, phone_number: &str, _body: &str) -> Result<(), NotifyError> {
        info!(phone = phone_number, "sms_submitted");
        Ok(())
    }
}

/// Run one delivery leg with retries and the per-attempt deadline. Returns
/// whether the leg was ultimately submitted.
pub async fn with_retries<F, Fut>(metrics: &Metrics, what: &str, mut attempt: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(), NotifyError>>,
{
    for n in 0..MAX_ATTEMPTS {
        match tokio::time::timeout(LEG_DEADLINE, attempt()).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => {
                warn!(what, attempt = n + 1, error = %e, "notify_attempt_failed");
            }
            Err(_) => {
                warn!(what, attempt = n + 1, "notify_attempt_deadline");
            }
        }
        if n + 1 < MAX_ATTEMPTS {
            tokio::time::sleep(Duration::from_millis(BACKOFF_BASE_MS << n)).await;
        }
    }
    Metrics::bump(&metrics.notify_failures);
    false
}

/// Shared handle type used across the app.
pub type SharedNotifier = Arc<dyn Notifier>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);
        let ok = with_retries(&metrics, "push", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(NotifyError("transient".into()))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().notify_failures, 0);
    }

    #[tokio::test]
    async fn gives_up_after_three_attempts() {
        let metrics = Metrics::new();
        let calls = AtomicU32::new(0);
        let ok = with_retries(&metrics, "sms", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(NotifyError("down".into())) }
        })
        .await;
        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(metrics.snapshot().notify_failures, 1);
    }

    #[tokio::test]
    async fn log_notifier_accepts() {
        let n = LogNotifier;
        assert!(n.push("tok", "t", "b", &serde_json::json!({})).await.is_ok());
        assert!(n.sms("+90", "b").await.is_ok());
    }
}
