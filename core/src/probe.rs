use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tri-state verdict produced once per probe and matched on everywhere else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthVerdict {
    /// 2xx response with no failure signal in the body.
    Healthy,
    /// Non-2xx, non-5xx response, or a 2xx whose body reports degradation.
    Degraded,
    /// 5xx, no response at all, or a body reporting failure.
    Unhealthy,
}

impl HealthVerdict {
    /// Upper-case label used by the text log format.
    pub fn label(self) -> &'static str {
        match self {
            HealthVerdict::Healthy => "HEALTHY",
            HealthVerdict::Degraded => "DEGRADED",
            HealthVerdict::Unhealthy => "UNHEALTHY",
        }
    }
}

impl fmt::Display for HealthVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthVerdict::Healthy => "healthy",
            HealthVerdict::Degraded => "degraded",
            HealthVerdict::Unhealthy => "unhealthy",
        };
        f.write_str(s)
    }
}

/// One liveness-check outcome. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    /// Classified verdict.
    pub status: HealthVerdict,
    /// When the probe completed.
    pub timestamp: DateTime<Utc>,
    /// Wall-clock duration of the HTTP call.
    pub response_time_ms: u64,
    /// Observed HTTP status, `0` when no response was received.
    pub http_status_code: u16,
    /// Full URL probed.
    pub endpoint: String,
    /// Human-readable detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure detail, set for every non-healthy outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeResult {
    /// Whether the HTTP status falls in `[200, 300)`.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_status_code)
    }

    /// Result for a call that never produced a response (refused, DNS, timeout).
    pub fn unreachable(endpoint: impl Into<String>, response_time_ms: u64, error: impl Into<String>) -> Self {
        Self {
            status: HealthVerdict::Unhealthy,
            timestamp: Utc::now(),
            response_time_ms,
            http_status_code: 0,
            endpoint: endpoint.into(),
            message: Some("Health check failed".to_string()),
            error: Some(error.into()),
        }
    }

    /// Result for a call that produced an HTTP response; `body` is the parsed JSON body, if any.
    pub fn from_response(
        endpoint: impl Into<String>,
        http_status_code: u16,
        response_time_ms: u64,
        body: Option<&serde_json::Value>,
    ) -> Self {
        let status = classify(Some(http_status_code), body);
        let (message, error) = match status {
            HealthVerdict::Healthy => (Some("Health check passed".to_string()), None),
            HealthVerdict::Degraded => (
                Some("Service degraded".to_string()),
                Some(body_detail(body).unwrap_or_else(|| format!("HTTP {http_status_code}"))),
            ),
            HealthVerdict::Unhealthy => (
                Some("Health check failed".to_string()),
                Some(body_detail(body).unwrap_or_else(|| format!("HTTP {http_status_code}"))),
            ),
        };
        Self {
            status,
            timestamp: Utc::now(),
            response_time_ms,
            http_status_code,
            endpoint: endpoint.into(),
            message,
            error,
        }
    }
}

/// Classify a probe outcome.
///
/// `None` means no response was received. A 2xx is healthy unless the JSON
/// body carries a `status` field that explicitly reports degraded or failing
/// state; 5xx is unhealthy; anything else is degraded.
pub fn classify(http_status: Option<u16>, body: Option<&serde_json::Value>) -> HealthVerdict {
    let Some(code) = http_status else {
        return HealthVerdict::Unhealthy;
    };
    match code {
        200..=299 => body_signal(body).unwrap_or(HealthVerdict::Healthy),
        500..=599 => HealthVerdict::Unhealthy,
        _ => HealthVerdict::Degraded,
    }
}

fn body_signal(body: Option<&serde_json::Value>) -> Option<HealthVerdict> {
    let status = body?.get("status")?.as_str()?;
    match status.to_ascii_lowercase().as_str() {
        "degraded" | "warn" | "warning" => Some(HealthVerdict::Degraded),
        "unhealthy" | "down" | "error" | "fail" | "failed" => Some(HealthVerdict::Unhealthy),
        _ => None,
    }
}

fn body_detail(body: Option<&serde_json::Value>) -> Option<String> {
    let body = body?;
    ["error", "message"]
        .iter()
        .find_map(|k| body.get(*k).and_then(|v| v.as_str()))
        .map(str::to_string)
}

/// Coarse application state recorded alongside each probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// The service answered with 2xx.
    Running,
    /// The service answered, but not with 2xx.
    Impaired,
    /// No response at all.
    Unreachable,
}

impl From<&ProbeResult> for ApplicationStatus {
    fn from(r: &ProbeResult) -> Self {
        match r.http_status_code {
            0 => ApplicationStatus::Unreachable,
            _ if r.is_success() => ApplicationStatus::Running,
            _ => ApplicationStatus::Impaired,
        }
    }
}
