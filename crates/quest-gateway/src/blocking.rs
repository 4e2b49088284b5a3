use std::time::Duration;

use quest_core::{CoreError, CoreResult};
use tracing::{error, warn};

/// Runs a storage-bound closure on the blocking pool, giving up after
/// `timeout`. The closure keeps running to completion if the caller gives up.
pub async fn run_blocking<F, T>(timeout: Duration, f: F) -> CoreResult<T>
where
    F: FnOnce() -> CoreResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::time::timeout(timeout, tokio::task::spawn_blocking(f)).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            error!("spawn_blocking join error: {}", e);
            Err(CoreError::Storage(anyhow::anyhow!("blocking task failed: {}", e)))
        }
        Err(_) => {
            warn!("Storage call exceeded {} ms", timeout.as_millis());
            Err(CoreError::Timeout)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_results_through() {
        let out = run_blocking(Duration::from_secs(1), || Ok(7)).await.unwrap();
        assert_eq!(out, 7);

        let err = run_blocking::<_, ()>(Duration::from_secs(1), || {
            Err(CoreError::NotFound("nope".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn slow_calls_time_out() {
        let err = run_blocking(Duration::from_millis(20), || {
            std::thread::sleep(Duration::from_millis(300));
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, CoreError::Timeout));
    }
}
