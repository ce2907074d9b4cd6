use super::{ClientState, ConnectionManager};
use crate::infrastructure::{LivenessMonitor, ws_endpoint};
use crate::transport::{SocketStatus, Transport, TransportOptions};
use crate::types::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_EXPIRY_INTERVAL, DEFAULT_RECONNECT_INTERVAL, Result,
    SERVICES_PATH, TorcError,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// Path of the discovery service
    pub services_path: String,
    /// Pre-issued WebSocket token; skips the token endpoint
    pub access_token: Option<String>,
    /// Milliseconds before an unanswered call fails
    pub call_timeout: Option<u64>,
    /// Milliseconds between expiry sweeps
    pub expiry_interval: Option<u64>,
    /// Milliseconds between reconnect polls
    pub reconnect_interval: Option<u64>,
    /// Whether the host starts visible (connects immediately)
    pub visible: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            services_path: SERVICES_PATH.to_string(),
            access_token: None,
            call_timeout: None,
            expiry_interval: None,
            reconnect_interval: None,
            visible: true,
        }
    }
}

impl ConnectionOptions {
    pub(crate) fn transport_options(&self, endpoint: &str) -> TransportOptions {
        TransportOptions {
            endpoint: endpoint.to_string(),
            services_path: self.services_path.clone(),
            call_timeout: Duration::from_millis(self.call_timeout.unwrap_or(DEFAULT_CALL_TIMEOUT)),
            expiry_interval: Duration::from_millis(
                self.expiry_interval.unwrap_or(DEFAULT_EXPIRY_INTERVAL),
            ),
            access_token: self.access_token.clone(),
        }
    }

    pub(crate) fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval.unwrap_or(DEFAULT_RECONNECT_INTERVAL))
    }
}

/// Builder for ConnectionManager that handles initialization
pub struct ConnectionManagerBuilder {
    endpoint: String,
    options: ConnectionOptions,
}

impl ConnectionManagerBuilder {
    /// Validates the endpoint and options
    pub fn new(endpoint: impl Into<String>, options: ConnectionOptions) -> Result<Self> {
        let endpoint = endpoint.into();
        ws_endpoint(&endpoint)?;

        if !options.services_path.starts_with('/') || !options.services_path.ends_with('/') {
            return Err(TorcError::Connection(format!(
                "Services path must start and end with '/': {}",
                options.services_path
            )));
        }

        for (name, value) in [
            ("call_timeout", options.call_timeout),
            ("expiry_interval", options.expiry_interval),
            ("reconnect_interval", options.reconnect_interval),
        ] {
            if value == Some(0) {
                return Err(TorcError::Connection(format!("{} must be greater than zero", name)));
            }
        }

        Ok(Self { endpoint, options })
    }

    /// Build the manager without background tasks; nothing connects until
    /// statuses are fed to it
    pub(crate) fn build_detached(self) -> (ConnectionManager, crate::transport::StatusEvents) {
        let (transport, events) = Transport::new(self.options.transport_options(&self.endpoint));
        let (visible, _) = watch::channel(self.options.visible);

        let manager = ConnectionManager {
            endpoint: self.endpoint,
            options: self.options,
            transport,
            state: Arc::new(RwLock::new(ClientState::new())),
            visible: Arc::new(visible),
        };
        (manager, events)
    }

    /// Build the manager and spawn the status watcher and liveness monitor.
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> ConnectionManager {
        let (manager, mut events) = self.build_detached();

        // Spawn status watcher task
        let weak = manager.downgrade();
        let watcher = tokio::spawn(async move {
            while let Some(status) = events.recv().await {
                let Some(manager) = weak.upgrade() else {
                    break;
                };

                match status {
                    SocketStatus::Connected => manager.handle_connected().await,
                    SocketStatus::NotConnected => manager.handle_disconnected().await,
                    _ => {}
                }
            }
            tracing::info!("Status watcher task finished");
        });

        let liveness = LivenessMonitor::new(&manager.transport, manager.visible.subscribe())
            .with_interval(manager.options.reconnect_interval())
            .spawn();

        match manager.state.try_write() {
            Ok(mut state) => {
                state.task_manager.track("status-watcher", watcher);
                state.task_manager.track("liveness", liveness);
            }
            Err(_) => tracing::warn!("Client state busy, background tasks left untracked"),
        }

        manager
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_endpoint() {
        let result = ConnectionManagerBuilder::new("torc.local", ConnectionOptions::default());
        assert!(matches!(result, Err(TorcError::UrlParse(_))));

        let result = ConnectionManagerBuilder::new("ftp://torc.local", ConnectionOptions::default());
        assert!(matches!(result, Err(TorcError::Connection(_))));
    }

    #[test]
    fn test_rejects_bad_options() {
        let options = ConnectionOptions {
            services_path: "services".to_string(),
            ..Default::default()
        };
        assert!(ConnectionManagerBuilder::new("http://localhost:4840", options).is_err());

        let options = ConnectionOptions {
            reconnect_interval: Some(0),
            ..Default::default()
        };
        assert!(ConnectionManagerBuilder::new("http://localhost:4840", options).is_err());
    }

    #[test]
    fn test_transport_options_defaults() {
        let options = ConnectionOptions {
            call_timeout: Some(5_000),
            ..Default::default()
        };
        let transport = options.transport_options("ws://localhost:4840/");
        assert_eq!(transport.call_timeout, Duration::from_secs(5));
        assert_eq!(transport.expiry_interval, Duration::from_millis(DEFAULT_EXPIRY_INTERVAL));
        assert_eq!(transport.services_path, SERVICES_PATH);
        assert_eq!(options.reconnect_interval(), Duration::from_millis(DEFAULT_RECONNECT_INTERVAL));
    }

    #[tokio::test]
    async fn test_hidden_manager_stays_disconnected() {
        let options = ConnectionOptions {
            visible: false,
            access_token: Some("token".to_string()),
            ..Default::default()
        };
        let manager = ConnectionManagerBuilder::new("ws://127.0.0.1:9/", options)
            .unwrap()
            .build();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(manager.status(), SocketStatus::NotConnected);
        manager.shutdown().await;
    }
}
