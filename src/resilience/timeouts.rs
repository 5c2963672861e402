//! Timeout enforcement.
//!
//! Every connect and probe goes through [`with_timeout`], so a timeout is
//! always reported as `FabricError::Timeout` carrying the bound that fired.
//! The wrapped future is dropped on expiry, which tears down any half-open
//! transport it owned.

use std::future::Future;
use std::time::Duration;

use crate::error::{FabricError, Result};

/// Run a fallible future with a deadline.
pub async fn with_timeout<F, T>(bound: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(bound, fut).await {
        Ok(result) => result,
        Err(_) => Err(FabricError::Timeout(bound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_result() {
        let value = with_timeout(Duration::from_secs(1), async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn reports_bound_on_expiry() {
        let bound = Duration::from_millis(10);
        let err = with_timeout(bound, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FabricError::Timeout(d) if d == bound));
    }
}
