//! Timeout enforcement.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Expiry surfaces as a retryable `ResilienceError::Timeout`

use std::future::Future;
use std::time::Duration;

use crate::error::{ResilienceError, Result};

/// Run `fut` with a deadline.
pub async fn with_timeout<F, T>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ResilienceError::Timeout {
            timeout_ms: limit.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_becomes_timeout_error() {
        let res = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(ResilienceError::Timeout { timeout_ms: 50 })));
    }

    #[tokio::test]
    async fn test_inner_result_passes_through() {
        let res = with_timeout(Duration::from_secs(1), async { Ok(3) }).await;
        assert_eq!(res.unwrap(), 3);
    }
}
