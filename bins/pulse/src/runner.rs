use std::time::{Duration, Instant};

use async_trait::async_trait;
use pulse_core::probe::ProbeResult;
use tracing::debug;

/// Performs one liveness probe. Never fails: every failure mode is folded into the result.
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeResult;
}

/// `GET`-based prober backed by a shared reqwest client.
#[derive(Clone, Default)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, endpoint: &str, timeout: Duration) -> ProbeResult {
        let started = Instant::now();
        let resp = self
            .client
            .get(endpoint)
            .header(reqwest::header::USER_AGENT, concat!("pulse/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .send()
            .await;

        let resp = match resp {
            Ok(r) => r,
            Err(e) => {
                let elapsed = elapsed_ms(started);
                let reason = describe(&e, timeout);
                debug!(%endpoint, elapsed, %reason, "probe got no response");
                return ProbeResult::unreachable(endpoint, elapsed, reason);
            }
        };

        let code = resp.status().as_u16();
        // A body that fails to arrive or parse only loses the body signal.
        let body = match resp.bytes().await {
            Ok(b) => serde_json::from_slice::<serde_json::Value>(&b).ok(),
            Err(e) => {
                debug!(%endpoint, error = %e, "probe body read failed");
                None
            }
        };
        ProbeResult::from_response(endpoint, code, elapsed_ms(started), body.as_ref())
    }
}

fn describe(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!("request timed out after {}ms", timeout.as_millis())
    } else if e.is_connect() {
        format!("connection failed: {e}")
    } else if e.is_builder() {
        format!("invalid request: {e}")
    } else {
        e.to_string()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::probe::HealthVerdict;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve(status: u16, body: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(status).set_body_json(body))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn healthy_on_2xx() {
        let server = serve(200, json!({"status": "ok"})).await;
        let url = format!("{}/health", server.uri());
        let r = HttpProber::new().probe(&url, Duration::from_secs(2)).await;
        assert_eq!(r.status, HealthVerdict::Healthy);
        assert_eq!(r.http_status_code, 200);
        assert_eq!(r.endpoint, url);
        assert!(r.error.is_none());
    }

    #[tokio::test]
    async fn honors_degraded_body() {
        let server = serve(200, json!({"status": "degraded"})).await;
        let r = HttpProber::new()
            .probe(&format!("{}/health", server.uri()), Duration::from_secs(2))
            .await;
        assert_eq!(r.status, HealthVerdict::Degraded);
    }

    #[tokio::test]
    async fn classifies_error_statuses() {
        let server = serve(503, json!({"error": "db down"})).await;
        let r = HttpProber::new()
            .probe(&format!("{}/health", server.uri()), Duration::from_secs(2))
            .await;
        assert_eq!(r.status, HealthVerdict::Unhealthy);
        assert_eq!(r.http_status_code, 503);
        assert_eq!(r.error.as_deref(), Some("db down"));

        let r = HttpProber::new()
            .probe(&format!("{}/missing", server.uri()), Duration::from_secs(2))
            .await;
        assert_eq!(r.status, HealthVerdict::Degraded);
        assert_eq!(r.http_status_code, 404);
    }

    #[tokio::test]
    async fn timeout_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;
        let r = HttpProber::new()
            .probe(&format!("{}/health", server.uri()), Duration::from_millis(50))
            .await;
        assert_eq!(r.status, HealthVerdict::Unhealthy);
        assert_eq!(r.http_status_code, 0);
        assert!(r.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn refused_connection_is_captured() {
        let r = HttpProber::new()
            .probe("http://127.0.0.1:1/health", Duration::from_secs(2))
            .await;
        assert_eq!(r.status, HealthVerdict::Unhealthy);
        assert_eq!(r.http_status_code, 0);
        assert!(r.error.is_some());
    }

    #[tokio::test]
    async fn malformed_url_is_captured() {
        let r = HttpProber::new().probe("not a url", Duration::from_secs(1)).await;
        assert_eq!(r.http_status_code, 0);
        assert_eq!(r.status, HealthVerdict::Unhealthy);
    }
}
