//! Rate-limit-aware retrying for upstream writes.

use std::future::Future;
use std::time::Duration;

use tracing::{error, info};

use warden_core::constants::ERROR_LIMIT_EXCEEDED;

use crate::error::ConnectorError;

const MAX_ATTEMPTS: u32 = 5;

/// Runs `operation`, retrying with linear backoff while the homeserver
/// answers `M_LIMIT_EXCEEDED`.
///
/// The wait before attempt `n+1` is `n * 5` seconds. Any other error (or
/// success) returns immediately. The homeserver only rate-limits certain
/// PUT/POST requests, so only those are worth wrapping.
pub async fn with_rate_limit_retries<T, F, Fut>(
    request_name: &str,
    mut operation: F,
) -> Result<T, ConnectorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
{
    let mut last_error = None;

    for attempt in 1..=MAX_ATTEMPTS {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_matrix_code(ERROR_LIMIT_EXCEEDED) => {
                let wait = Duration::from_secs(u64::from(attempt) * 5);
                info!(
                    request = request_name,
                    attempt,
                    wait_seconds = wait.as_secs(),
                    "request hit a rate limit, will retry"
                );
                last_error = Some(e);
                if attempt < MAX_ATTEMPTS {
                    tokio::time::sleep(wait).await;
                }
            }
            Err(e) => return Err(e),
        }
    }

    error!(
        request = request_name,
        attempts = MAX_ATTEMPTS,
        "request failed after exhausting rate-limit retries"
    );

    // Preserve the original error; callers may want to inspect it.
    Err(last_error.expect("loop always records an error before exhausting"))
}
