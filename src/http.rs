//! JSON-over-HTTP calls to model providers with retry and backoff.
//!
//! Shared by the embedding and generation providers:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors, including a request hitting its timeout → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! The client's timeout bounds a single request. Callers that add an outer
//! deadline size it with [`retry_budget`] so retries still fit inside it.

use anyhow::{bail, Result};
use std::time::Duration;

/// Build a client whose every request is bounded by `timeout`.
pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

/// Sleep before retry number `attempt` (1-based).
pub(crate) fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(5))
}

/// Longest a [`post_json_with_retry`] call can take when every attempt
/// runs into `per_request`.
pub(crate) fn retry_budget(per_request: Duration, max_retries: u32) -> Duration {
    let sleeps: Duration = (1..=max_retries).map(backoff).sum();
    per_request * (max_retries + 1) + sleeps
}

/// POST `body` to `url` and return the decoded JSON response.
///
/// `label` names the provider in error messages (e.g. `"OpenAI"`).
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            tokio::time::sleep(backoff(attempt)).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::debug!(%status, attempt, "{} request failed, retrying", label);
                    last_err = Some(anyhow::anyhow!(
                        "{} API error {}: {}",
                        label,
                        status,
                        body_text
                    ));
                    continue;
                }

                let body_text = response.text().await.unwrap_or_default();
                bail!("{} API error {}: {}", label, status, body_text);
            }
            Err(e) => {
                tracing::debug!(attempt, timeout = e.is_timeout(), "{} request error, retrying", label);
                last_err = Some(anyhow::anyhow!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", label)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Status codes to answer with, one per request; 200 once exhausted.
    /// A `0` entry stalls that request instead of answering.
    struct Script {
        statuses: Vec<u16>,
        hits: AtomicUsize,
    }

    async fn handle(State(script): State<Arc<Script>>) -> (StatusCode, Json<serde_json::Value>) {
        let n = script.hits.fetch_add(1, Ordering::SeqCst);
        match script.statuses.get(n).copied() {
            Some(0) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                (StatusCode::OK, Json(serde_json::json!({ "late": true })))
            }
            Some(code) => (
                StatusCode::from_u16(code).unwrap(),
                Json(serde_json::json!({ "error": code })),
            ),
            None => (StatusCode::OK, Json(serde_json::json!({ "ok": n }))),
        }
    }

    async fn serve(statuses: Vec<u16>) -> (Arc<Script>, String) {
        let script = Arc::new(Script {
            statuses,
            hits: AtomicUsize::new(0),
        });
        let app = Router::new()
            .route("/v1", post(handle))
            .with_state(script.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (script, format!("http://127.0.0.1:{}/v1", port))
    }

    async fn call(url: &str, timeout: Duration, max_retries: u32) -> Result<serde_json::Value> {
        let client = client(timeout).unwrap();
        post_json_with_retry(
            &client,
            url,
            Some("key"),
            &serde_json::json!({ "input": ["hello"] }),
            max_retries,
            "Test",
        )
        .await
    }

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(6), Duration::from_secs(32));
        assert_eq!(backoff(9), Duration::from_secs(32));
    }

    #[test]
    fn budget_covers_every_attempt_and_sleep() {
        assert_eq!(retry_budget(Duration::from_secs(30), 0), Duration::from_secs(30));
        // 4 attempts of 30s plus 1 + 2 + 4 seconds of backoff
        assert_eq!(retry_budget(Duration::from_secs(30), 3), Duration::from_secs(127));
    }

    #[tokio::test]
    async fn rate_limit_and_server_error_are_retried() {
        let (script, url) = serve(vec![429, 503]).await;
        let json = call(&url, Duration::from_secs(5), 3).await.unwrap();
        assert_eq!(json["ok"], 2);
        assert_eq!(script.hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn client_error_fails_without_retry() {
        let (script, url) = serve(vec![400]).await;
        let err = call(&url, Duration::from_secs(5), 3).await.unwrap_err();
        assert!(err.to_string().contains("Test API error 400"));
        assert_eq!(script.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timed_out_request_is_retried() {
        let (script, url) = serve(vec![0]).await;
        let json = call(&url, Duration::from_millis(300), 1).await.unwrap();
        assert_eq!(json["ok"], 1);
        assert_eq!(script.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_exhausted_reports_last_error() {
        let (script, url) = serve(vec![500, 500]).await;
        let err = call(&url, Duration::from_secs(5), 1).await.unwrap_err();
        assert!(err.to_string().contains("500"));
        assert_eq!(script.hits.load(Ordering::SeqCst), 2);
    }
}
