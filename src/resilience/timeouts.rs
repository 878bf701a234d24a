//! Timeout and cancellation enforcement.
//!
//! # Responsibilities
//! - Wrap every transport suspension point (connect, handshake, read, write)
//! - Enforce the configured per-operation deadline
//! - Abort promptly when the caller's cancellation token fires
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout and cancellation errors are distinct from I/O errors
//! - Cancellation wins over a simultaneously completed operation

use std::future::Future;
use std::io;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Run an I/O future under an optional deadline and a cancellation token.
pub async fn guarded<F, T>(
    operation: &'static str,
    cancel: &CancellationToken,
    timeout: Option<Duration>,
    fut: F,
) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fut).await {
                Ok(result) => result.map_err(Error::from),
                Err(_) => Err(Error::Timeout {
                    operation,
                    timeout: limit,
                }),
            },
            None => fut.await.map_err(Error::from),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::trace!(operation, "Operation cancelled");
            Err(Error::Cancelled)
        }
        result = bounded => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_results() {
        let cancel = CancellationToken::new();
        let value = guarded("read", &cancel, None, async { Ok::<_, io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn deadline_expires() {
        let cancel = CancellationToken::new();
        let err = guarded("read", &cancel, Some(Duration::from_millis(10)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, io::Error>(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Timeout { operation: "read", .. }));
    }

    #[tokio::test]
    async fn cancelled_token_aborts() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = guarded("write", &cancel, None, async { Ok::<_, io::Error>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
