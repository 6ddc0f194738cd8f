// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::StoreError;

/// Attempts per operation, including the first.
const MAX_ATTEMPTS: u32 = 3;

/// Base backoff; each retry doubles it and adds up to 50% jitter.
const BASE_BACKOFF_MS: u64 = 50;

/// Run a storage operation, retrying transient failures.
///
/// Only [`StoreError::Transient`] is retried; every other error is
/// returned on first occurrence. Call this at the task boundary, not
/// inside the state machine, so a retried operation re-reads its inputs.
pub async fn with_retry<T, F, Fut>(op_name: &str, mut f: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BASE_BACKOFF_MS * 2u64.pow(attempt - 1);
                let jitter = rand::thread_rng().gen_range(0..=backoff / 2);
                warn!(op = op_name, attempt, "transient storage error, retrying: {e}");
                tokio::time::sleep(Duration::from_millis(backoff + jitter)).await;
            }
            Err(e) => return Err(e),
        }
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test]
    async fn succeeds_first_try_without_retry() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, StoreError>(42) }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_errors_are_retried_up_to_limit() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StoreError::Transient("flaky".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), MAX_ATTEMPTS);
    }

    #[tokio::test]
    async fn recovers_when_a_retry_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry("op", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StoreError::Transient("first call drops".into()))
                } else {
                    Ok(7)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_transient_errors_fail_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, _> = with_retry("op", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(StoreError::NotFound {
                    entity: "session",
                    id: "x".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
