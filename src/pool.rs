//! Session pool construction.
//!
//! The pool validates the input lists, builds one [`Session`] per account
//! (or per account x proxy pair in fan-out mode), and launches them all as
//! independent tasks. It holds no cross-session state beyond the handles —
//! sessions never coordinate, and a failure in one cannot touch another.

use std::sync::Arc;

use tracing::info;

use crate::accounts::Credential;
use crate::config::Config;
use crate::proxy::ProxyEndpoint;
use crate::session::{Session, SessionHandle};

/// All running sessions, in launch order.
#[derive(Debug)]
pub struct SessionPool {
    handles: Vec<SessionHandle>,
}

impl SessionPool {
    /// Validate inputs and launch every session concurrently.
    ///
    /// Fails (before any session starts) when the account list is empty, or
    /// when proxy use is enabled and the proxy list is empty or — outside
    /// fan-out mode — shorter than the account list.
    pub fn spawn(
        config: Arc<Config>,
        credentials: Vec<Credential>,
        proxies: Vec<ProxyEndpoint>,
    ) -> Result<Self, String> {
        if credentials.is_empty() {
            return Err("no usable accounts loaded".to_string());
        }
        if config.proxy.enabled {
            if proxies.is_empty() {
                return Err("proxy use enabled but the proxy list is empty".to_string());
            }
            if !config.proxy.fan_out && proxies.len() < credentials.len() {
                return Err(format!(
                    "not enough proxies for the number of accounts ({} proxies < {} accounts)",
                    proxies.len(),
                    credentials.len()
                ));
            }
        }

        let mut handles = Vec::new();
        let mut launch_seq: u64 = 0;

        if config.proxy.enabled && config.proxy.fan_out {
            // One session per account x proxy pair.
            for (account_index, credential) in credentials.iter().enumerate() {
                for (proxy_index, proxy) in proxies.iter().enumerate() {
                    let session = Session::new(
                        Arc::clone(&config),
                        account_index,
                        Some(proxy_index),
                        credential.clone(),
                        Some(proxy.clone()),
                    )?;
                    handles.push(session.spawn(launch_seq));
                    launch_seq += 1;
                }
            }
        } else {
            for (account_index, credential) in credentials.into_iter().enumerate() {
                let (proxy_index, proxy) = if config.proxy.enabled {
                    let proxy_index = account_index % proxies.len();
                    (Some(proxy_index), Some(proxies[proxy_index].clone()))
                } else {
                    (None, None)
                };
                let session = Session::new(
                    Arc::clone(&config),
                    account_index,
                    proxy_index,
                    credential,
                    proxy,
                )?;
                handles.push(session.spawn(launch_seq));
                launch_seq += 1;
            }
        }

        info!("started {} session(s)", handles.len());
        Ok(Self { handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn handles(&self) -> &[SessionHandle] {
        &self.handles
    }

    /// Wait for every session task to end. Only completes when all sessions
    /// have stopped (each one only stops on authentication failure).
    pub async fn join(self) {
        for mut handle in self.handles {
            handle.wait().await;
            info!(
                account = handle.account,
                state = handle.state().as_str(),
                "session ended"
            );
        }
    }
}
