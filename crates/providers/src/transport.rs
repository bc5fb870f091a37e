//! Transport: exactly one HTTP call, bounded by a deadline and a
//! cancellation token. Never retries.

use std::error::Error as _;
use std::time::Duration;

use kiln_core::{CancellationToken, EngineError, Result};
use tokio::time::Instant;
use tracing::{debug, warn};

/// How long to wait for a TCP connection before giving up.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest error body kept for diagnostics.
const ERROR_BODY_LIMIT: usize = 2048;

/// A single request to send.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: reqwest::Method,
    pub url: String,
    pub body: Option<serde_json::Value>,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: reqwest::Method::GET,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: reqwest::Method::POST,
            url: url.into(),
            body: Some(body),
        }
    }
}

/// Sends requests over a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport {
    pub fn new() -> Self {
        // Per-call deadlines are enforced in `send`, not on the client
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    /// Perform one call.
    ///
    /// A token that is already triggered fails with `Cancelled` before any
    /// I/O. The deadline and the token race the request; whichever loses is
    /// dropped with the `select!`, so nothing outlives the call.
    pub async fn send(
        &self,
        request: TransportRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let deadline = Instant::now() + timeout;
        let timeout_ms = timeout.as_millis() as u64;

        debug!(method = %request.method, url = %request.url, timeout_ms, "Sending request");

        let mut builder = self.client.request(request.method, &request.url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            sent = tokio::time::timeout_at(deadline, builder.send()) => match sent {
                Err(_) => return Err(EngineError::Timeout { timeout_ms }),
                Ok(Err(e)) => return Err(map_reqwest_error(e, timeout_ms)),
                Ok(Ok(response)) => response,
            },
        };

        let status = response.status();
        let response = TransportResponse {
            response,
            deadline,
            timeout_ms,
        };

        if !status.is_success() {
            // The body is diagnostic only; an unreadable one is left empty
            let mut body = match response.text(cancel).await {
                Ok(body) => body,
                Err(EngineError::Cancelled) => return Err(EngineError::Cancelled),
                Err(_) => String::new(),
            };
            if body.len() > ERROR_BODY_LIMIT {
                let mut end = ERROR_BODY_LIMIT;
                while !body.is_char_boundary(end) {
                    end -= 1;
                }
                body.truncate(end);
            }
            warn!(status = status.as_u16(), body = %body, "Backend returned error status");
            return Err(EngineError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }
}

/// A successful (2xx) response whose body has not been read yet.
#[derive(Debug)]
pub struct TransportResponse {
    response: reqwest::Response,
    deadline: Instant,
    timeout_ms: u64,
}

impl TransportResponse {
    pub fn status(&self) -> u16 {
        self.response.status().as_u16()
    }

    /// Read the whole body. Still bounded by the call's deadline.
    pub async fn text(self, cancel: &CancellationToken) -> Result<String> {
        let timeout_ms = self.timeout_ms;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            read = tokio::time::timeout_at(self.deadline, self.response.text()) => match read {
                Err(_) => Err(EngineError::Timeout { timeout_ms }),
                Ok(Err(e)) => Err(map_reqwest_error(e, timeout_ms)),
                Ok(Ok(text)) => Ok(text),
            },
        }
    }

    /// Hand over the raw response for incremental reading. The deadline no
    /// longer applies; the stream decoder observes cancellation instead.
    pub fn into_inner(self) -> reqwest::Response {
        self.response
    }
}

fn map_reqwest_error(error: reqwest::Error, timeout_ms: u64) -> EngineError {
    if error.is_timeout() {
        return EngineError::Timeout { timeout_ms };
    }
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    EngineError::Network(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let transport = HttpTransport::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        // Port 9 is never contacted; the token wins before any I/O
        let result = transport
            .send(
                TransportRequest::get("http://127.0.0.1:9/api/tags"),
                Duration::from_secs(1),
                &cancel,
            )
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }

    #[tokio::test]
    async fn refused_connection_is_a_network_error() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let result = HttpTransport::new()
            .send(
                TransportRequest::get(format!("http://127.0.0.1:{port}/api/tags")),
                Duration::from_secs(5),
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(EngineError::Network(_))), "{result:?}");
    }

    #[test]
    fn post_carries_body() {
        let req = TransportRequest::post("http://x/api/chat", serde_json::json!({"model": "m"}));
        assert_eq!(req.method, reqwest::Method::POST);
        assert_eq!(req.body.unwrap()["model"], "m");
    }
}
