//! Timing defaults and async timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for connect attempts
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a session in `Play` sends a keepalive and checks liveness
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Silence after which a session is closed as timed out
pub const KEEPALIVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Grace period for open sessions when the server shuts down
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Await `future`, failing with [`ProtocolError::Timeout`] after `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| ProtocolError::Timeout)
}

/// Like [`with_timeout`] for futures that already return a crate `Result`.
pub async fn with_timeout_error<F, T>(duration: Duration, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    with_timeout(duration, future).await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_fires() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::Timeout)));
    }

    #[tokio::test]
    async fn test_inner_error_is_preserved() {
        let result: Result<()> = with_timeout_error(Duration::from_secs(1), async {
            Err(ProtocolError::ConnectionClosed)
        })
        .await;
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}
