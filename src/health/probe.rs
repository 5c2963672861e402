//! Live health probes.
//!
//! # Responsibilities
//! - HTTP GET against a declared health URL
//! - Transient WebSocket connect against a socket service
//! - Bound every probe by the configured timeout

use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;

use crate::error::FabricError;
use crate::resilience::with_timeout;

/// Largest health response body kept as payload.
const MAX_PROBE_BODY: usize = 256 * 1024;

/// A probe that reached the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSuccess {
    pub response_time_ms: u64,
    pub payload: Option<Value>,
    /// Set when the service answered but the body could not be decoded.
    pub note: Option<String>,
}

/// A probe that did not reach a healthy answer.
#[derive(Debug)]
pub struct ProbeFailure {
    pub error: FabricError,
    pub response_time_ms: u64,
    /// Best-effort body of a non-2xx answer.
    pub payload: Option<Value>,
}

pub type ProbeOutcome = Result<ProbeSuccess, ProbeFailure>;

/// Executes probes with a shared HTTP client and timeout.
#[derive(Clone)]
pub struct Prober {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl Prober {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// GET `url`; 2xx is healthy. The timeout covers headers and body.
    pub async fn probe_http(&self, url: &str) -> ProbeOutcome {
        let start = Instant::now();

        let request = Request::builder()
            .method("GET")
            .uri(url)
            .header("user-agent", "lightning-fabric-health-check")
            .header("accept", "application/json")
            .body(Body::empty())
            .map_err(|e| ProbeFailure {
                error: FabricError::Parse(format!("invalid health-check url `{url}`: {e}")),
                response_time_ms: 0,
                payload: None,
            })?;

        let client = self.client.clone();
        let exchange = with_timeout(self.timeout, async move {
            let response = client
                .request(request)
                .await
                .map_err(|e| FabricError::Network(e.to_string()))?;
            let status = response.status();
            let body = axum::body::to_bytes(Body::new(response.into_body()), MAX_PROBE_BODY)
                .await
                .map_err(|e| FabricError::Network(format!("failed to read body: {e}")))?;
            Ok((status, body))
        })
        .await;

        let response_time_ms = elapsed_ms(start);
        let (status, body) = exchange.map_err(|error| {
            tracing::debug!(url, error = %error, "HTTP probe failed");
            ProbeFailure {
                error,
                response_time_ms,
                payload: None,
            }
        })?;

        let decoded: Result<Value, _> = serde_json::from_slice(&body);

        if !status.is_success() {
            tracing::debug!(url, status = %status, "HTTP probe returned non-success status");
            let payload = match decoded {
                Ok(value) => Some(value),
                Err(_) if body.is_empty() => None,
                Err(_) => Some(Value::String(String::from_utf8_lossy(&body).into_owned())),
            };
            return Err(ProbeFailure {
                error: FabricError::Status(status.as_u16()),
                response_time_ms,
                payload,
            });
        }

        Ok(match decoded {
            Ok(value) => ProbeSuccess {
                response_time_ms,
                payload: Some(value),
                note: None,
            },
            Err(e) => ProbeSuccess {
                response_time_ms,
                payload: Some(Value::String(String::from_utf8_lossy(&body).into_owned())),
                note: Some(format!("response body is not valid JSON: {e}")),
            },
        })
    }

    /// Open a WebSocket to `address` and close it straight away with 1000.
    pub async fn probe_socket(&self, address: &str) -> ProbeOutcome {
        let start = Instant::now();
        let target = address.to_string();

        let result = with_timeout(self.timeout, async move {
            let (mut stream, _) = tokio_tungstenite::connect_async(target.as_str()).await?;
            let frame = CloseFrame {
                code: CloseCode::Normal,
                reason: String::from("health probe").into(),
            };
            // The service is up once the handshake completed; a failed close
            // handshake does not change that.
            if let Err(e) = stream.close(Some(frame)).await {
                tracing::trace!(address = %target, error = %e, "Probe close handshake failed");
            }
            Ok(())
        })
        .await;

        let response_time_ms = elapsed_ms(start);
        match result {
            Ok(()) => Ok(ProbeSuccess {
                response_time_ms,
                payload: None,
                note: None,
            }),
            Err(error) => {
                tracing::debug!(address, error = %error, "Socket probe failed");
                Err(ProbeFailure {
                    error,
                    response_time_ms,
                    payload: None,
                })
            }
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}
