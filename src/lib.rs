#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

//! # streamnode
//!
//! Multi-account session keeper and task-relay client for stream gateway
//! networks.
//!
//! streamnode authenticates a list of accounts against the gateway's HTTP
//! API, opens one persistent WebSocket per account, registers a virtual
//! device on each, and then holds the connections open: answering the
//! gateway's relayed HTTP request tasks, sending keepalive pings, and
//! polling each account's score dashboard once a minute. Dropped sockets
//! are reconnected automatically for the life of the process.
//!
//! ## Architecture
//!
//! ```text
//! main.rs      — entry point, clap CLI, config loading, pool startup
//! config.rs    — TOML + env-var configuration
//! accounts.rs  — credential list loading (email:password or bearer tokens)
//! proxy.rs     — proxy list loading, URL normalization, per-session binding
//! api.rs       — typed HTTP client for login / identity / status endpoints
//! net.rs       — WebSocket dialing, optional CONNECT tunnel through a proxy
//! protocol.rs  — wire frames (register, ping, response, error)
//! relay.rs     — inbound task execution and reply construction
//! session.rs   — per-account state machine: connect, register, heartbeat,
//!                reconnect with configurable backoff
//! pool.rs      — builds and launches one session task per account
//! ```

pub mod accounts;
pub mod api;
pub mod config;
pub mod net;
pub mod pool;
pub mod protocol;
pub mod proxy;
pub mod relay;
pub mod session;

pub use accounts::Credential;
pub use config::Config;
pub use pool::SessionPool;
pub use session::{Session, SessionState};
