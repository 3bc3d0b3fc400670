//! Per-account session lifecycle.
//!
//! A [`Session`] runs the full account lifecycle as one independent tokio
//! task: authenticate once over HTTP, then hold a registered gateway
//! connection for the rest of the process — answering relayed tasks,
//! heartbeating, and reconnecting whenever the socket drops.
//!
//! ```text
//! Authenticating ──► Connecting ──► Registered ──► Disconnected
//!        │                ▲                             │
//!        └ (failure is    └──────── Reconnecting ◄──────┘
//!           terminal)
//! ```
//!
//! Authentication happens exactly once; reconnects only re-open the socket
//! and re-register. The first reconnect after a drop is immediate, later
//! attempts follow the configured backoff policy, and there is no retry
//! ceiling — a session keeps reconnecting until the process exits.
//!
//! The heartbeat runs on its own timer for the session's whole life. On a
//! tick where the socket is down it simply skips and stays armed, so a
//! disconnect/reconnect cycle never kills the cadence.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant, SystemTime};

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::Credential;
use crate::api::{ApiClient, ApiError, AuthIdentity};
use crate::config::{Config, ReconnectConfig, ReconnectPolicy};
use crate::net::{self, TransportError, WsStream};
use crate::protocol;
use crate::proxy::ProxyEndpoint;
use crate::relay::TaskRelay;

/// A connection that stayed registered this long resets backoff growth.
const STABLE_UPTIME_SECS: u64 = 60;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Connecting,
    Registered,
    Disconnected,
    Reconnecting,
}

impl SessionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticating => "authenticating",
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

type WsSink = SplitSink<WsStream, Message>;

/// The session's one connection. `None` whenever no socket is owned; the
/// read loop, heartbeat, and relay replies all send through this slot.
type SinkSlot = Arc<Mutex<Option<WsSink>>>;

/// Observable session fields, shared between the session task and whoever
/// holds the [`SessionHandle`].
#[derive(Debug)]
pub struct SessionShared {
    state: StdMutex<SessionState>,
    status: StdMutex<String>,
    device_id: StdMutex<String>,
    last_connected_at: StdMutex<Option<SystemTime>>,
}

impl SessionShared {
    fn new() -> Self {
        Self {
            state: StdMutex::new(SessionState::Authenticating),
            status: StdMutex::new("authenticating".to_string()),
            device_id: StdMutex::new(String::new()),
            last_connected_at: StdMutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Last human-readable status line, overwritten on every poll outcome.
    pub fn status_summary(&self) -> String {
        self.status.lock().unwrap().clone()
    }

    fn set_status(&self, status: String) {
        *self.status.lock().unwrap() = status;
    }

    /// Device id of the current registration (empty before the first one).
    pub fn device_id(&self) -> String {
        self.device_id.lock().unwrap().clone()
    }

    fn set_device_id(&self, device_id: String) {
        *self.device_id.lock().unwrap() = device_id;
    }

    pub fn last_connected_at(&self) -> Option<SystemTime> {
        *self.last_connected_at.lock().unwrap()
    }

    fn mark_connected(&self) {
        *self.last_connected_at.lock().unwrap() = Some(SystemTime::now());
    }
}

/// Generate a device identifier for one registration: 32 hex chars, unique
/// with overwhelming probability.
pub fn fresh_device_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Delay schedule between reconnection attempts. Unbounded; only spacing
/// varies. The first attempt after a drop is always immediate.
struct Backoff {
    config: ReconnectConfig,
    /// Closes observed since the last stable connection.
    strikes: u32,
}

impl Backoff {
    fn new(config: ReconnectConfig) -> Self {
        Self { config, strikes: 0 }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = match self.strikes {
            0 => Duration::ZERO,
            n => {
                let secs = match self.config.policy {
                    ReconnectPolicy::Fixed => self.config.delay_secs,
                    ReconnectPolicy::Exponential => {
                        let exponent = (n - 1).min(16);
                        self.config
                            .delay_secs
                            .saturating_mul(1_u64 << exponent)
                            .min(self.config.max_delay_secs)
                    }
                };
                Duration::from_secs(secs)
            }
        };
        self.strikes = self.strikes.saturating_add(1);
        delay
    }

    /// The last connection held long enough; start the schedule over.
    fn note_stable(&mut self) {
        self.strikes = 0;
    }
}

/// One account's authenticated gateway session.
pub struct Session {
    index: usize,
    proxy_index: Option<usize>,
    credential: Credential,
    proxy: Option<ProxyEndpoint>,
    api: ApiClient,
    relay: TaskRelay,
    config: Arc<Config>,
    shared: Arc<SessionShared>,
}

/// Handle to a running session task.
#[derive(Debug)]
pub struct SessionHandle {
    pub account: usize,
    pub proxy_index: Option<usize>,
    shared: Arc<SessionShared>,
    task: tokio::task::JoinHandle<()>,
}

impl SessionHandle {
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    pub fn status_summary(&self) -> String {
        self.shared.status_summary()
    }

    pub fn device_id(&self) -> String {
        self.shared.device_id()
    }

    pub fn last_connected_at(&self) -> Option<SystemTime> {
        self.shared.last_connected_at()
    }

    /// Whether the session task has ended (only happens on auth failure).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wait for the session task to end.
    pub async fn wait(&mut self) {
        let _ = (&mut self.task).await;
    }
}

impl Session {
    /// Build a session for one account, bound to `proxy` when given. The
    /// HTTP clients are built here so a bad proxy URL fails at startup.
    pub fn new(
        config: Arc<Config>,
        index: usize,
        proxy_index: Option<usize>,
        credential: Credential,
        proxy: Option<ProxyEndpoint>,
    ) -> Result<Self, String> {
        let api = ApiClient::new(&config.service.api_url, config.auth.mode, proxy.as_ref())?;
        let relay = TaskRelay::new(proxy.as_ref())?;
        Ok(Self {
            index,
            proxy_index,
            credential,
            proxy,
            api,
            relay,
            config,
            shared: Arc::new(SessionShared::new()),
        })
    }

    /// Launch the session as an independent task. `launch_seq` spaces the
    /// start when `startup_stagger_ms` is configured.
    pub fn spawn(self, launch_seq: u64) -> SessionHandle {
        let account = self.index;
        let proxy_index = self.proxy_index;
        let shared = Arc::clone(&self.shared);
        let stagger_ms = self.config.session.startup_stagger_ms;
        let task = tokio::spawn(async move {
            if stagger_ms > 0 {
                sleep(Duration::from_millis(stagger_ms.saturating_mul(launch_seq))).await;
            }
            self.run().await;
        });
        SessionHandle {
            account,
            proxy_index,
            shared,
            task,
        }
    }

    /// The session's whole life. Returns only when authentication fails —
    /// once connected, the reconnect loop runs until the process exits.
    pub async fn run(self) {
        let identity = match self.authenticate().await {
            Ok(identity) => identity,
            Err(e) => {
                let line = format!("authentication failed: {e}");
                warn!(account = self.index, credential = %self.credential.label(), "{line}");
                self.shared.set_status(line);
                return;
            }
        };
        info!(account = self.index, email = %identity.email, "authenticated");
        self.shared.set_status("authenticated".to_string());
        self.shared.set_device_id(fresh_device_id());
        self.shared.set_state(SessionState::Connecting);

        let slot: SinkSlot = Arc::new(Mutex::new(None));
        let heartbeat = heartbeat_loop(
            self.index,
            Arc::clone(&self.shared),
            Arc::clone(&slot),
            self.api.clone(),
            identity.clone(),
            Duration::from_secs(self.config.session.heartbeat_interval_secs.max(1)),
        );
        let connect = self.connect_cycle(&identity, &slot);
        // Both halves run for the session's lifetime; neither completes.
        tokio::join!(heartbeat, connect);
    }

    /// One HTTP call, once per process lifetime. Password credentials log
    /// in; pre-issued tokens look their identity up instead.
    async fn authenticate(&self) -> Result<AuthIdentity, ApiError> {
        match &self.credential {
            Credential::Password { email, password } => self.api.login(email, password).await,
            Credential::Token(token) => self.api.my_info(token).await,
        }
    }

    /// The unbounded connect/register/reconnect loop.
    async fn connect_cycle(&self, identity: &AuthIdentity, slot: &SinkSlot) {
        let mut backoff = Backoff::new(self.config.reconnect.clone());
        let mut first_attempt = true;
        loop {
            if !first_attempt {
                self.shared.set_state(SessionState::Reconnecting);
                let delay = backoff.next_delay();
                if !delay.is_zero() {
                    debug!(
                        account = self.index,
                        "next connection attempt in {}s",
                        delay.as_secs()
                    );
                    sleep(delay).await;
                }
            }
            first_attempt = false;

            let attempt_started = Instant::now();
            match self.connect_and_run(identity, slot).await {
                Ok(()) => {
                    if attempt_started.elapsed() >= Duration::from_secs(STABLE_UPTIME_SECS) {
                        backoff.note_stable();
                    }
                    info!(account = self.index, "disconnected");
                }
                Err(e) => {
                    warn!(account = self.index, "connection failed: {e}");
                }
            }
            self.shared.set_state(SessionState::Disconnected);
        }
    }

    /// One connection: dial, register, pump inbound frames until the socket
    /// closes. A read error tears the connection down through the same path
    /// as a close.
    async fn connect_and_run(
        &self,
        identity: &AuthIdentity,
        slot: &SinkSlot,
    ) -> Result<(), TransportError> {
        if slot.lock().await.is_some() {
            // Already own a live connection; opening another is a no-op.
            return Ok(());
        }

        let stream =
            net::connect_gateway(&self.config.service.gateway_url, self.proxy.as_ref()).await?;
        let (sink, mut reader) = stream.split();

        let device_id = {
            let current = self.shared.device_id();
            if self.config.session.persist_device_id && !current.is_empty() {
                current
            } else {
                fresh_device_id()
            }
        };
        self.shared.set_device_id(device_id.clone());
        self.shared.mark_connected();
        *slot.lock().await = Some(sink);
        self.shared.set_state(SessionState::Registered);
        info!(account = self.index, device = %device_id, "connected, registering device");

        // Fire-and-forget: no registration ack exists on this protocol.
        send_frame(
            slot,
            protocol::register_frame(&identity.user_id, &device_id),
        )
        .await;

        while let Some(message) = reader.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if let Some(reply) = self.relay.handle_text(self.index, &text).await {
                        send_frame(slot, reply).await;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {} // binary / ping / pong — the gateway sends none
                Err(e) => {
                    warn!(account = self.index, "socket error: {e}");
                    break;
                }
            }
        }

        slot.lock().await.take();
        Ok(())
    }
}

/// Send one text frame through the slot. Returns false when no connection
/// is owned or the send fails.
async fn send_frame(slot: &SinkSlot, frame: String) -> bool {
    let mut guard = slot.lock().await;
    match guard.as_mut() {
        Some(sink) => match sink.send(Message::Text(frame.into())).await {
            Ok(()) => true,
            Err(e) => {
                debug!("frame send failed: {e}");
                false
            }
        },
        None => false,
    }
}

/// Session-lifetime heartbeat: every tick, ping the gateway and poll the
/// status endpoint. Ticks while disconnected are skipped, never cancelled.
async fn heartbeat_loop(
    account: usize,
    shared: Arc<SessionShared>,
    slot: SinkSlot,
    api: ApiClient,
    identity: AuthIdentity,
    period: Duration,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if !send_frame(&slot, protocol::ping_frame()).await {
            // Socket not open this tick; timer stays armed.
            continue;
        }
        let device_id = shared.device_id();
        match api.poll_status(&identity.token, &device_id).await {
            Ok(summary) => {
                let line = summary.to_string();
                info!(account, "{line}");
                shared.set_status(line);
            }
            Err(e) => {
                let line = format!("status poll failed: {e}");
                warn!(account, "{line}");
                shared.set_status(line);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, SessionConfig};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    #[test]
    fn fixed_backoff_is_immediate_then_constant() {
        let mut backoff = Backoff::new(ReconnectConfig {
            policy: ReconnectPolicy::Fixed,
            delay_secs: 5,
            max_delay_secs: 60,
        });
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn exponential_backoff_doubles_to_the_cap() {
        let mut backoff = Backoff::new(ReconnectConfig {
            policy: ReconnectPolicy::Exponential,
            delay_secs: 5,
            max_delay_secs: 60,
        });
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![0, 5, 10, 20, 40, 60]);
        backoff.note_stable();
        assert_eq!(backoff.next_delay(), Duration::ZERO);
        assert_eq!(backoff.next_delay(), Duration::from_secs(5));
    }

    #[test]
    fn device_ids_are_32_hex_and_unique() {
        let a = fresh_device_id();
        let b = fresh_device_id();
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    /// Fixture API: login always succeeds with a fixed identity, the
    /// dashboard always reports 10/2.
    async fn fixture_api() -> String {
        let app = Router::new()
            .route(
                "/web/v1/auth/emailLogin",
                post(|| async {
                    Json(json!({
                        "data": {"token": "T", "user": {"email": "a@x.com", "uuid": "U"}}
                    }))
                }),
            )
            .route(
                "/web/v1/dashBoard/info",
                get(|| async { Json(json!({"data": {"totalScore": 10, "todayScore": 2}})) }),
            );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn test_config(api_base: &str, gateway: &str) -> Config {
        Config {
            service: ServiceConfig {
                api_url: api_base.to_string(),
                gateway_url: gateway.to_string(),
            },
            reconnect: ReconnectConfig {
                delay_secs: 0,
                ..ReconnectConfig::default()
            },
            session: SessionConfig {
                heartbeat_interval_secs: 1,
                ..SessionConfig::default()
            },
            ..Config::default()
        }
    }

    fn password_credential() -> Credential {
        Credential::Password {
            email: "a@x.com".into(),
            password: "p1".into(),
        }
    }

    /// Gateway fixture that accepts connections, forwards the first frame of
    /// each, and immediately closes — driving the reconnect path.
    async fn closing_gateway(frames: mpsc::UnboundedSender<String>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let frames = frames.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    if let Some(Ok(message)) = ws.next().await {
                        if let Ok(text) = message.into_text() {
                            let _ = frames.send(text.to_string());
                        }
                    }
                    let _ = ws.close(None).await;
                });
            }
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn reconnects_and_reregisters_with_fresh_device_ids() {
        let api_base = fixture_api().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gateway = closing_gateway(tx).await;
        let config = test_config(&api_base, &gateway);

        let session = Session::new(
            Arc::new(config),
            0,
            None,
            password_credential(),
            None,
        )
        .unwrap();
        let handle = session.spawn(0);

        let mut device_ids = Vec::new();
        while device_ids.len() < 3 {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("register frame within 10s")
                .unwrap();
            let parsed: Value = serde_json::from_str(&frame).unwrap();
            if parsed["type"] != "register" {
                continue; // a heartbeat ping can slip in between registrations
            }
            assert_eq!(parsed["user"], "U");
            device_ids.push(parsed["dev"].as_str().unwrap().to_string());
        }
        assert_ne!(device_ids[0], device_ids[1]);
        assert_ne!(device_ids[1], device_ids[2]);
        handle.abort();
    }

    #[tokio::test]
    async fn persisted_device_id_survives_reconnects() {
        let api_base = fixture_api().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let gateway = closing_gateway(tx).await;
        let mut config = test_config(&api_base, &gateway);
        config.session.persist_device_id = true;

        let session = Session::new(
            Arc::new(config),
            0,
            None,
            password_credential(),
            None,
        )
        .unwrap();
        let handle = session.spawn(0);

        let mut device_ids = Vec::new();
        while device_ids.len() < 2 {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("register frame within 10s")
                .unwrap();
            let parsed: Value = serde_json::from_str(&frame).unwrap();
            if parsed["type"] != "register" {
                continue;
            }
            device_ids.push(parsed["dev"].as_str().unwrap().to_string());
        }
        assert_eq!(device_ids[0], device_ids[1]);
        handle.abort();
    }

    #[tokio::test]
    async fn auth_failure_is_terminal() {
        let app = Router::new().route(
            "/web/v1/auth/emailLogin",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(json!({"message": "bad credentials"})),
                )
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = test_config(&format!("http://{addr}"), "ws://127.0.0.1:1");
        let session = Session::new(
            Arc::new(config),
            0,
            None,
            password_credential(),
            None,
        )
        .unwrap();
        let mut handle = session.spawn(0);
        tokio::time::timeout(Duration::from_secs(10), handle.wait())
            .await
            .expect("auth failure ends the session task");
        assert_eq!(handle.state(), SessionState::Authenticating);
        assert!(handle.status_summary().contains("authentication failed"));
        assert!(handle.status_summary().contains("bad credentials"));
    }

    /// End-to-end: login, register, then a heartbeat tick pings the gateway
    /// and polls the dashboard into the status summary.
    #[tokio::test]
    async fn registered_session_heartbeats_and_polls_status() {
        let api_base = fixture_api().await;

        // Gateway that stays open and forwards every inbound frame.
        let (tx, mut rx) = mpsc::unbounded_channel();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = listener.accept().await.unwrap();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
                    while let Some(Ok(message)) = ws.next().await {
                        if let Ok(text) = message.into_text() {
                            let _ = tx.send(text.to_string());
                        }
                    }
                });
            }
        });

        let config = test_config(&api_base, &format!("ws://{addr}"));
        let session = Session::new(
            Arc::new(config),
            0,
            None,
            password_credential(),
            None,
        )
        .unwrap();
        let handle = session.spawn(0);

        // Registration arrives first.
        let parsed = loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("register frame within 10s")
                .unwrap();
            let parsed: Value = serde_json::from_str(&frame).unwrap();
            if parsed["type"] == "register" {
                break parsed;
            }
        };
        assert_eq!(parsed["user"], "U");
        assert_eq!(parsed["dev"].as_str().unwrap().len(), 32);
        assert_eq!(handle.state(), SessionState::Registered);
        assert!(handle.last_connected_at().is_some());

        // A ping follows within the (shortened) heartbeat interval.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("heartbeat frame within 10s")
                .unwrap();
            let parsed: Value = serde_json::from_str(&frame).unwrap();
            if parsed["type"] == "ping" {
                break;
            }
            assert!(Instant::now() < deadline, "no ping before deadline");
        }

        // The poll lands in the status summary shortly after the ping.
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let summary = handle.status_summary();
            if summary.contains("10") && summary.contains('2') {
                break;
            }
            assert!(Instant::now() < deadline, "status summary never updated: {summary}");
            sleep(Duration::from_millis(100)).await;
        }
        handle.abort();
    }
}
