use crate::transport::{SocketStatus, Transport, TransportInner};
use crate::types::DEFAULT_RECONNECT_INTERVAL;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

/// Keeps the socket open while the host is visible.
///
/// Polls at a fixed interval and calls `start()` whenever the transport is
/// `NotConnected`. A hidden host closes any open socket and suppresses
/// reconnection until it becomes visible again.
pub struct LivenessMonitor {
    interval: Duration,
    transport: Weak<TransportInner>,
    visible: watch::Receiver<bool>,
}

impl LivenessMonitor {
    pub fn new(transport: &Transport, visible: watch::Receiver<bool>) -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_RECONNECT_INTERVAL),
            transport: transport.downgrade(),
            visible,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Spawns the poll task; it exits once the transport is dropped
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    changed = self.visible.changed() => {
                        if changed.is_err() {
                            tracing::debug!("Visibility sender dropped, stopping liveness monitor");
                            break;
                        }
                    }
                }

                let Some(transport) = Transport::upgrade(&self.transport) else {
                    break;
                };

                let visible = *self.visible.borrow_and_update();
                let status = transport.status();

                if !visible {
                    if status.is_active() {
                        tracing::info!("Host hidden, closing socket");
                        transport.stop().await;
                    }
                    continue;
                }

                if status == SocketStatus::NotConnected {
                    tracing::debug!("Socket not connected, attempting to connect");
                    if let Err(e) = transport.start().await {
                        tracing::debug!("Connection attempt failed: {}", e);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{OutboundFrame, TransportOptions};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    fn options_for(listener: &TcpListener) -> TransportOptions {
        TransportOptions {
            endpoint: format!("ws://{}/", listener.local_addr().unwrap()),
            access_token: Some("token".to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_hidden_host_does_not_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (transport, _events) = Transport::new(options_for(&listener));
        let (visible, visible_rx) = watch::channel(false);

        let monitor = LivenessMonitor::new(&transport, visible_rx)
            .with_interval(Duration::from_millis(20))
            .spawn();

        let attempt = time::timeout(Duration::from_millis(200), listener.accept()).await;
        assert!(attempt.is_err());

        visible.send(true).unwrap();
        let attempt = time::timeout(Duration::from_secs(5), listener.accept()).await;
        assert!(attempt.is_ok());

        monitor.abort();
    }

    #[tokio::test]
    async fn test_retries_after_failed_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (transport, _events) = Transport::new(options_for(&listener));
        let (_visible, visible_rx) = watch::channel(true);

        let monitor = LivenessMonitor::new(&transport, visible_rx)
            .with_interval(Duration::from_millis(20))
            .spawn();

        // drop each connection before the handshake so every attempt fails
        for _ in 0..2 {
            let (socket, _) = time::timeout(Duration::from_secs(5), listener.accept())
                .await
                .unwrap()
                .unwrap();
            drop(socket);
        }

        monitor.abort();
    }

    #[tokio::test]
    async fn test_hiding_closes_open_socket() {
        let (transport, _events) = Transport::new(TransportOptions::default());
        let (writer, mut frames) = mpsc::unbounded_channel();
        transport.set_writer(writer).await;
        transport.set_status(SocketStatus::Connecting);
        transport.set_status(SocketStatus::Connected);

        let (visible, visible_rx) = watch::channel(true);
        let monitor = LivenessMonitor::new(&transport, visible_rx)
            .with_interval(Duration::from_secs(3600))
            .spawn();

        visible.send(false).unwrap();
        let frame = time::timeout(Duration::from_secs(5), frames.recv()).await.unwrap();
        assert_eq!(frame, Some(OutboundFrame::Close));
        assert_eq!(transport.status(), SocketStatus::Disconnecting);

        monitor.abort();
    }

    #[tokio::test]
    async fn test_monitor_exits_when_transport_dropped() {
        let (transport, _events) = Transport::new(TransportOptions::default());
        let (_visible, visible_rx) = watch::channel(false);

        let monitor = LivenessMonitor::new(&transport, visible_rx)
            .with_interval(Duration::from_millis(10))
            .spawn();
        drop(transport);

        time::timeout(Duration::from_secs(5), monitor).await.unwrap().unwrap();
    }
}
