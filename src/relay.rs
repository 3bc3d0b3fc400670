//! Inbound task execution.
//!
//! The gateway pushes `request` frames asking the session to perform an HTTP
//! call on its behalf. [`TaskRelay`] parses the frame, performs the call with
//! the task's own timeout, and builds the reply frame. Every failure class —
//! timeout, DNS, refused connection, bad header — collapses into the same
//! wire-level error frame; the real cause only reaches the logs.
//!
//! This handler never escapes the socket read loop with a panic or error:
//! unusable frames are dropped, failed calls become error frames.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::protocol;
use crate::proxy::ProxyEndpoint;

fn default_task_timeout() -> u64 {
    30_000
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    taskid: Value,
    #[serde(default)]
    data: Option<TaskRequest>,
}

/// The HTTP call a `request` frame asks for.
#[derive(Debug, Deserialize)]
struct TaskRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Value,
    /// Milliseconds before the call is aborted.
    #[serde(default = "default_task_timeout")]
    timeout: u64,
}

/// Executes relayed HTTP tasks for one session, through its proxy binding.
pub struct TaskRelay {
    http: reqwest::Client,
}

impl TaskRelay {
    /// Build the relay's HTTP client. No overall timeout is set — each task
    /// carries its own.
    pub fn new(proxy: Option<&ProxyEndpoint>) -> Result<Self, String> {
        let mut builder = reqwest::Client::builder().connect_timeout(Duration::from_secs(10));
        if let Some(p) = proxy {
            let proxy = reqwest::Proxy::all(p.url())
                .map_err(|e| format!("invalid proxy url {}: {e}", p.url()))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| format!("failed to build relay HTTP client: {e}"))?;
        Ok(Self { http })
    }

    /// Handle one inbound text frame. Returns the serialized reply frame, or
    /// `None` when the frame warrants no reply (not an object, unparseable,
    /// or not a `request`).
    pub async fn handle_text(&self, account: usize, raw: &str) -> Option<String> {
        if !protocol::looks_like_object(raw) {
            return None;
        }
        let frame: InboundFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(account, "dropping unparseable frame: {e}");
                return None;
            }
        };
        if frame.kind != "request" {
            debug!(account, kind = %frame.kind, "unhandled message type");
            return None;
        }
        let Some(task) = frame.data else {
            debug!(account, "request frame without task data");
            return None;
        };

        match self.execute(&task).await {
            Ok(raw_status) => Some(protocol::response_frame(&frame.taskid, raw_status)),
            Err(message) => {
                debug!(account, url = %task.url, "relay task failed: {message}");
                Some(protocol::error_frame(&frame.taskid, &message))
            }
        }
    }

    /// Perform the task's HTTP call and report the upstream status. A non-2xx
    /// status is still a successful relay — only transport-level failures
    /// (including the task timeout) error.
    async fn execute(&self, task: &TaskRequest) -> Result<u16, String> {
        let method = reqwest::Method::from_bytes(task.method.as_bytes())
            .map_err(|_| format!("invalid method '{}'", task.method))?;

        let mut request = self.http.request(method.clone(), &task.url);
        for (name, value) in &task.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        // The body rides along only on POST; other methods send none.
        if method == reqwest::Method::POST {
            match &task.body {
                Value::Null => {}
                Value::String(s) => request = request.body(s.clone()),
                other => request = request.body(other.to_string()),
            }
        }

        let response = request
            .timeout(Duration::from_millis(task.timeout))
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Ok(response.status().as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::Router;
    use serde_json::json;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn request_frame(taskid: Value, method: &str, url: &str, timeout: u64) -> String {
        json!({
            "type": "request",
            "taskid": taskid,
            "data": {"method": method, "url": url, "headers": {}, "body": null, "timeout": timeout},
        })
        .to_string()
    }

    #[tokio::test]
    async fn reachable_url_yields_response_frame() {
        let base = serve(Router::new().route("/task", get(|| async { "ok" }))).await;
        let relay = TaskRelay::new(None).unwrap();
        let frame = request_frame(json!(7), "GET", &format!("{base}/task"), 5000);
        let reply = relay.handle_text(0, &frame).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["type"], "response");
        assert_eq!(parsed["taskid"], 7);
        assert_eq!(parsed["result"]["rawStatus"], 200);
        assert_eq!(parsed["result"]["parsed"], "");
        assert_eq!(parsed["result"]["html"], protocol::CANNED_FINGERPRINT);
    }

    #[tokio::test]
    async fn upstream_error_status_is_still_a_response() {
        let base = serve(Router::new().route(
            "/task",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        ))
        .await;
        let relay = TaskRelay::new(None).unwrap();
        let frame = request_frame(json!(1), "GET", &format!("{base}/task"), 5000);
        let reply = relay.handle_text(0, &frame).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["type"], "response");
        assert_eq!(parsed["result"]["rawStatus"], 503);
    }

    #[tokio::test]
    async fn unreachable_url_yields_error_frame() {
        let relay = TaskRelay::new(None).unwrap();
        // Port 1 on loopback: refused immediately.
        let frame = request_frame(json!("t-9"), "GET", "http://127.0.0.1:1/down", 5000);
        let reply = relay.handle_text(0, &frame).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["taskid"], "t-9");
        assert_eq!(parsed["errorCode"], 50_000_001);
        assert_eq!(parsed["rawStatus"], 500);
        assert!(!parsed["error"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn slow_upstream_hits_the_task_timeout() {
        let base = serve(Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                "late"
            }),
        ))
        .await;
        let relay = TaskRelay::new(None).unwrap();
        let frame = request_frame(json!(2), "GET", &format!("{base}/slow"), 100);
        let reply = relay.handle_text(0, &frame).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["type"], "error");
        assert_eq!(parsed["errorCode"], 50_000_001);
    }

    #[tokio::test]
    async fn body_rides_along_only_on_post() {
        let base = serve(Router::new().route(
            "/echo",
            post(|body: String| async move {
                if body == "payload" {
                    StatusCode::CREATED
                } else {
                    StatusCode::BAD_REQUEST
                }
            }),
        ))
        .await;
        let relay = TaskRelay::new(None).unwrap();
        let frame = json!({
            "type": "request",
            "taskid": 3,
            "data": {"method": "POST", "url": format!("{base}/echo"), "headers": {}, "body": "payload", "timeout": 5000},
        })
        .to_string();
        let reply = relay.handle_text(0, &frame).await.unwrap();
        let parsed: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(parsed["result"]["rawStatus"], 201);
    }

    #[tokio::test]
    async fn non_object_text_is_dropped_silently() {
        let relay = TaskRelay::new(None).unwrap();
        assert!(relay.handle_text(0, "hello").await.is_none());
        assert!(relay.handle_text(0, "[1,2,3]").await.is_none());
        assert!(relay.handle_text(0, "").await.is_none());
    }

    #[tokio::test]
    async fn unparseable_object_is_dropped() {
        let relay = TaskRelay::new(None).unwrap();
        assert!(relay.handle_text(0, "{not json}").await.is_none());
    }

    #[tokio::test]
    async fn non_request_types_get_no_reply() {
        let relay = TaskRelay::new(None).unwrap();
        let frame = json!({"type": "notice", "text": "hi"}).to_string();
        assert!(relay.handle_text(0, &frame).await.is_none());
    }

    #[tokio::test]
    async fn request_without_data_is_dropped() {
        let relay = TaskRelay::new(None).unwrap();
        let frame = json!({"type": "request", "taskid": 4}).to_string();
        assert!(relay.handle_text(0, &frame).await.is_none());
    }
}
