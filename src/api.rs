//! Typed HTTP client for the gateway's account API.
//!
//! [`ApiClient`] wraps `reqwest::Client` with the session's proxy binding
//! and provides one method per endpoint. Which status endpoint a session
//! polls follows its auth mode: password-mode sessions use the web
//! dashboard, token-mode sessions use the mobile home endpoint (which also
//! reports the device id).
//!
//! ## Error handling
//!
//! Non-2xx responses are parsed for a `message` field in the JSON body. If
//! parsing fails, the raw response body is returned as the error message.

use std::fmt;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::AuthMode;
use crate::proxy::ProxyEndpoint;

/// Identity established by authentication, immutable for the session's life.
#[derive(Debug, Clone)]
pub struct AuthIdentity {
    /// Bearer credential for all subsequent HTTP calls. For token-mode
    /// sessions this is the pre-issued token, reused as-is.
    pub token: String,
    pub user_id: String,
    pub email: String,
}

/// Numeric account status from a poll, plus its log formatting.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSummary {
    pub total: f64,
    pub today: f64,
    pub earnings: Option<f64>,
}

impl fmt::Display for StatusSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "total points {}, today points {}", self.total, self.today)?;
        if let Some(earnings) = self.earnings {
            write!(f, ", earnings {earnings}")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct LoginEnvelope {
    data: LoginData,
}

#[derive(Deserialize)]
struct LoginData {
    token: String,
    user: LoginUser,
}

#[derive(Deserialize)]
struct LoginUser {
    email: String,
    uuid: String,
}

#[derive(Deserialize)]
struct MyInfoEnvelope {
    data: MyInfoData,
}

#[derive(Deserialize)]
struct MyInfoData {
    email: String,
    uuid: String,
}

#[derive(Deserialize)]
struct DashboardEnvelope {
    data: DashboardData,
}

// Missing score fields read as zero, matching the service's habit of
// omitting them for fresh accounts.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct DashboardData {
    total_score: f64,
    today_score: f64,
    earnings: Option<f64>,
}

#[derive(Deserialize)]
struct HomeEnvelope {
    data: HomeData,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
struct HomeData {
    total_points: f64,
    epoch_points: f64,
}

/// HTTP client for one session's API traffic.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    mode: AuthMode,
}

impl ApiClient {
    /// Build a client for the given API base URL, routed through `proxy`
    /// when one is bound.
    pub fn new(
        base_url: &str,
        mode: AuthMode,
        proxy: Option<&ProxyEndpoint>,
    ) -> Result<Self, String> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(30));
        if let Some(p) = proxy {
            let proxy = reqwest::Proxy::all(p.url())
                .map_err(|e| format!("invalid proxy url {}: {e}", p.url()))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            mode,
        })
    }

    /// `POST /web/v1/auth/emailLogin` — exchange an email/password pair for
    /// a token and account identity.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthIdentity, ApiError> {
        let resp = self
            .http
            .post(format!("{}/web/v1/auth/emailLogin", self.base_url))
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(ApiError::Request)?;
        let body: LoginEnvelope = Self::handle_response(resp).await?;
        Ok(AuthIdentity {
            token: body.data.token,
            user_id: body.data.user.uuid,
            email: body.data.user.email,
        })
    }

    /// `GET /mobile/v1/auth/myInfo` — resolve the identity behind a
    /// pre-issued token. The token itself stays the bearer credential.
    pub async fn my_info(&self, token: &str) -> Result<AuthIdentity, ApiError> {
        let resp = self
            .http
            .get(format!("{}/mobile/v1/auth/myInfo", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(ApiError::Request)?;
        let body: MyInfoEnvelope = Self::handle_response(resp).await?;
        Ok(AuthIdentity {
            token: token.to_string(),
            user_id: body.data.uuid,
            email: body.data.email,
        })
    }

    /// Poll the account's score status. The endpoint follows the session's
    /// auth mode; `device_id` is only sent on the mobile variant.
    pub async fn poll_status(
        &self,
        token: &str,
        device_id: &str,
    ) -> Result<StatusSummary, ApiError> {
        match self.mode {
            AuthMode::Password => {
                let resp = self
                    .http
                    .get(format!("{}/web/v1/dashBoard/info", self.base_url))
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(ApiError::Request)?;
                let body: DashboardEnvelope = Self::handle_response(resp).await?;
                Ok(StatusSummary {
                    total: body.data.total_score,
                    today: body.data.today_score,
                    earnings: body.data.earnings,
                })
            }
            AuthMode::Token => {
                let resp = self
                    .http
                    .get(format!("{}/mobile/v1/home", self.base_url))
                    .query(&[("imei", device_id)])
                    .bearer_auth(token)
                    .send()
                    .await
                    .map_err(ApiError::Request)?;
                let body: HomeEnvelope = Self::handle_response(resp).await?;
                Ok(StatusSummary {
                    total: body.data.total_points,
                    today: body.data.epoch_points,
                    earnings: None,
                })
            }
        }
    }

    /// Parse an HTTP response — returns the decoded body on success, or an
    /// [`ApiError`] carrying the service's error message on failure.
    async fn handle_response<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
        let status = resp.status();
        let body = resp.text().await.map_err(ApiError::Request)?;

        if status.is_success() {
            serde_json::from_str(&body)
                .map_err(|e| ApiError::Protocol(format!("invalid response body: {e}")))
        } else {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["message"].as_str().map(String::from))
                .unwrap_or(body);
            Err(ApiError::Service {
                status: status.as_u16(),
                message,
            })
        }
    }
}

/// Errors returned by [`ApiClient`] methods.
#[derive(Debug)]
pub enum ApiError {
    /// HTTP transport error (connection refused, timeout, DNS failure, etc.).
    Request(reqwest::Error),
    /// The service returned a non-2xx HTTP status.
    Service { status: u16, message: String },
    /// The response body was not the expected JSON shape.
    Protocol(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Request(e) => write!(f, "request failed: {e}"),
            ApiError::Service { status, message } => {
                write!(f, "service error (HTTP {status}): {message}")
            }
            ApiError::Protocol(msg) => write!(f, "protocol error: {msg}"),
        }
    }
}
