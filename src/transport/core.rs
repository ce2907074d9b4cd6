use super::pending::{PendingCalls, PendingResponse};
use super::state::{ListenerId, NotificationHandler, OutboundFrame, TransportState};
use super::status::SocketStatus;
use crate::infrastructure::{TokenFetcher, WebSocketFactory, WsStream, websocket_url};
use crate::messaging::MessageRouter;
use crate::types::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_EXPIRY_INTERVAL, Result, RpcRequest, SERVICES_PATH, TorcError,
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;

/// Settings the transport needs from the connection options
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// HTTP(S) or WS(S) base URL of the Torc server
    pub endpoint: String,
    /// Path of the discovery service, also hosts the token endpoint
    pub services_path: String,
    pub call_timeout: Duration,
    pub expiry_interval: Duration,
    /// Pre-issued token; skips the token endpoint when set
    pub access_token: Option<String>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:4840/".to_string(),
            services_path: SERVICES_PATH.to_string(),
            call_timeout: Duration::from_millis(DEFAULT_CALL_TIMEOUT),
            expiry_interval: Duration::from_millis(DEFAULT_EXPIRY_INTERVAL),
            access_token: None,
        }
    }
}

/// Every status transition, in order, for the connection manager
pub type StatusEvents = mpsc::UnboundedReceiver<SocketStatus>;

/// One element of a batched call
#[derive(Debug, Clone, PartialEq)]
pub struct BatchCall {
    pub method: String,
    pub params: Option<Value>,
    /// Notifications get no id and no response
    pub notification: bool,
}

impl BatchCall {
    pub fn call(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            notification: false,
        }
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
            notification: true,
        }
    }
}

pub(crate) struct TransportInner {
    options: TransportOptions,
    state: Arc<Mutex<TransportState>>,
    router: MessageRouter,
    status: watch::Sender<SocketStatus>,
    events: mpsc::UnboundedSender<SocketStatus>,
}

/// JSON-RPC 2.0 endpoint over a single WebSocket.
///
/// Owns id correlation, call expiry, notification listeners and the socket
/// state machine. Cheap to clone; all clones share one connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

impl Transport {
    pub fn new(options: TransportOptions) -> (Self, StatusEvents) {
        Self::with_pending(options, PendingCalls::new())
    }

    pub(crate) fn with_pending(options: TransportOptions, pending: PendingCalls) -> (Self, StatusEvents) {
        let state = Arc::new(Mutex::new(TransportState::new(pending)));
        let (status, _) = watch::channel(SocketStatus::NotConnected);
        let (events, events_rx) = mpsc::unbounded_channel();

        let transport = Self {
            inner: Arc::new(TransportInner {
                options,
                router: MessageRouter::new_with_state(Arc::clone(&state)),
                state,
                status,
                events,
            }),
        };
        (transport, events_rx)
    }

    pub(crate) fn downgrade(&self) -> Weak<TransportInner> {
        Arc::downgrade(&self.inner)
    }

    pub(crate) fn upgrade(weak: &Weak<TransportInner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.inner.options
    }

    /// Current socket status
    pub fn status(&self) -> SocketStatus {
        *self.inner.status.borrow()
    }

    /// Watch the socket status (latest value only)
    pub fn status_changes(&self) -> watch::Receiver<SocketStatus> {
        self.inner.status.subscribe()
    }

    /// Promotes `Connected` to `Ready`
    pub fn mark_ready(&self) -> bool {
        self.transition(|status| status == SocketStatus::Connected, SocketStatus::Ready)
    }

    pub(crate) fn set_status(&self, to: SocketStatus) {
        self.transition(|_| true, to);
    }

    /// Updates the status without notifying anyone
    fn set_status_silent(&self, to: SocketStatus) {
        self.inner.status.send_if_modified(|status| {
            *status = to;
            false
        });
    }

    /// Atomically moves to `to` when `allowed` accepts the current status
    fn transition(&self, allowed: impl Fn(SocketStatus) -> bool, to: SocketStatus) -> bool {
        let events = &self.inner.events;
        let changed = self.inner.status.send_if_modified(|status| {
            if *status == to || !allowed(*status) {
                return false;
            }
            *status = to;
            if events.send(to).is_err() {
                tracing::debug!("Status listener gone, could not notify status: {}", to);
            }
            true
        });

        if changed {
            tracing::info!("Socket status: {}", to);
        }
        changed
    }

    /// Sends a call and returns the future of its response.
    ///
    /// # Errors
    ///
    /// Returns [`TorcError::NotConnected`] when no socket is attached.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<PendingResponse> {
        let mut state = self.inner.state.lock().await;
        if state.writer.is_none() {
            return Err(TorcError::NotConnected);
        }

        let response = state.pending.register(Instant::now())?;
        let id = response.id();
        let request = RpcRequest::new(method, params).with_id(id);

        let frame = match serde_json::to_string(&request) {
            Ok(frame) => frame,
            Err(e) => {
                state.pending.cancel(id);
                return Err(e.into());
            }
        };

        if !state.send(OutboundFrame::Text(frame)) {
            state.pending.cancel(id);
            return Err(TorcError::NotConnected);
        }

        tracing::debug!("Sent call {} to {}", id, method);
        self.ensure_expiry(&mut state);
        Ok(response)
    }

    /// Sends a fire-and-forget notification
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::to_string(&RpcRequest::new(method, params))?;

        let state = self.inner.state.lock().await;
        if !state.send(OutboundFrame::Text(frame)) {
            return Err(TorcError::NotConnected);
        }

        tracing::debug!("Sent notification {}", method);
        Ok(())
    }

    /// Sends every entry as one array frame.
    ///
    /// Returns one slot per entry, in order: a response future for calls,
    /// `None` for notifications. Each call resolves independently.
    pub async fn call_batch(&self, calls: Vec<BatchCall>) -> Result<Vec<Option<PendingResponse>>> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.inner.state.lock().await;
        if state.writer.is_none() {
            return Err(TorcError::NotConnected);
        }

        let now = Instant::now();
        let mut requests = Vec::with_capacity(calls.len());
        let mut responses = Vec::with_capacity(calls.len());
        for call in calls {
            let request = RpcRequest::new(call.method, call.params);
            if call.notification {
                requests.push(request);
                responses.push(None);
            } else {
                match state.pending.register(now) {
                    Ok(response) => {
                        requests.push(request.with_id(response.id()));
                        responses.push(Some(response));
                    }
                    Err(e) => {
                        for response in responses.iter().flatten() {
                            state.pending.cancel(response.id());
                        }
                        return Err(e);
                    }
                }
            }
        }

        let ids: Vec<u64> = responses.iter().flatten().map(PendingResponse::id).collect();
        let sent = match serde_json::to_string(&requests) {
            Ok(frame) => state.send(OutboundFrame::Text(frame)),
            Err(e) => {
                tracing::error!("Failed to serialize batch: {}", e);
                false
            }
        };

        if !sent {
            for id in ids {
                state.pending.cancel(id);
            }
            return Err(TorcError::NotConnected);
        }

        tracing::debug!("Sent batch of {} ({} awaiting response)", requests.len(), ids.len());
        self.ensure_expiry(&mut state);
        Ok(responses)
    }

    /// Registers a handler for notifications with the given method name
    pub async fn listen(&self, method: &str, handler: NotificationHandler) -> ListenerId {
        self.inner.state.lock().await.add_listener(method, handler)
    }

    /// Removes a handler registered with [`listen`](Self::listen)
    pub async fn unlisten(&self, id: ListenerId) -> bool {
        self.inner.state.lock().await.remove_listener(id)
    }

    /// Number of calls awaiting a response
    pub async fn pending_calls(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    /// Whether the expiry sweep is currently scheduled
    pub async fn expiry_running(&self) -> bool {
        self.inner.state.lock().await.expiry_running
    }

    /// Processes one inbound text frame and sends any protocol-level reply
    pub async fn handle_frame(&self, text: &str) -> Result<()> {
        tracing::debug!("Received text message: {}", text);

        if let Some(reply) = self.inner.router.route_frame(text).await? {
            let state = self.inner.state.lock().await;
            if !state.send(OutboundFrame::Text(reply)) {
                tracing::warn!("Socket gone, dropping protocol reply");
            }
        }
        Ok(())
    }

    /// Attaches the queue feeding the socket writer
    pub async fn set_writer(&self, writer: mpsc::UnboundedSender<OutboundFrame>) {
        self.inner.state.lock().await.writer = Some(writer);
    }

    /// Fetches a token and opens the socket.
    ///
    /// Does nothing unless the status is `NotConnected`. A failed token fetch
    /// returns to `NotConnected` without a status event.
    pub async fn start(&self) -> Result<()> {
        if !self.transition(|status| status == SocketStatus::NotConnected, SocketStatus::Connecting) {
            return Ok(());
        }
        let attempt = self.inner.state.lock().await.next_attempt();

        let token = match self.fetch_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::debug!("Token request failed: {}", e);
                if self.is_current(attempt).await {
                    self.set_status_silent(SocketStatus::NotConnected);
                }
                return Err(e);
            }
        };

        let url = match websocket_url(&self.inner.options.endpoint, &token) {
            Ok(url) => url,
            Err(e) => {
                if self.is_current(attempt).await {
                    self.set_status_silent(SocketStatus::NotConnected);
                }
                return Err(e);
            }
        };

        tracing::info!("Connecting to {}", self.inner.options.endpoint);
        let stream = match WebSocketFactory::create(&url).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::error!("WebSocket connection failed: {}", e);
                if self.is_current(attempt).await {
                    self.set_status(SocketStatus::NotConnected);
                }
                return Err(e);
            }
        };

        if !self.attach(stream, attempt).await {
            tracing::info!("Connection attempt {} superseded, dropping its socket", attempt);
        }
        Ok(())
    }

    async fn is_current(&self, attempt: u64) -> bool {
        self.inner.state.lock().await.attempt == attempt
    }

    /// Closes the socket. The status returns to `NotConnected` once the read
    /// task observes the close.
    pub async fn stop(&self) {
        if !self.transition(|status| status.is_active(), SocketStatus::Disconnecting) {
            return;
        }

        tracing::info!("Disconnecting from WebSocket server");
        let sent = {
            let mut state = self.inner.state.lock().await;
            state.next_attempt();
            state.send(OutboundFrame::Close)
        };
        if !sent {
            self.set_status(SocketStatus::NotConnected);
        }
    }

    /// Aborts the socket tasks immediately
    pub async fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.next_attempt();
            state.task_manager.abort_all();
            state.writer = None;
        }
        self.set_status(SocketStatus::NotConnected);
    }

    async fn fetch_token(&self) -> Result<String> {
        let options = &self.inner.options;
        if let Some(token) = &options.access_token {
            return Ok(token.clone());
        }

        TokenFetcher::new(&options.endpoint, &options.services_path)?
            .fetch()
            .await
    }

    /// Hands the socket to reader and writer tasks. Returns false, dropping
    /// the socket, if `attempt` was superseded by a later start or stop.
    async fn attach(&self, stream: WsStream, attempt: u64) -> bool {
        {
            let mut state = self.inner.state.lock().await;
            if state.attempt != attempt || self.status() != SocketStatus::Connecting {
                return false;
            }

            let (mut write_half, read_half) = stream.split();
            let (writer, mut outbound) = mpsc::unbounded_channel::<OutboundFrame>();

            state.task_manager.abort_all();
            state.writer = Some(writer);

            state.task_manager.spawn("socket-writer", async move {
                while let Some(frame) = outbound.recv().await {
                    match frame {
                        OutboundFrame::Text(text) => {
                            if let Err(e) = write_half.send(Message::Text(text.into())).await {
                                tracing::error!("WebSocket write error: {}", e);
                                break;
                            }
                        }
                        OutboundFrame::Close => {
                            if let Err(e) = write_half.close().await {
                                tracing::debug!("WebSocket close error: {}", e);
                            }
                            break;
                        }
                    }
                }
            });

            let transport = self.clone();
            state.task_manager.spawn("socket-reader", async move {
                transport.read_loop(read_half).await;
            });
        }

        self.transition(|status| status == SocketStatus::Connecting, SocketStatus::Connected);
        tracing::info!("Connected to WebSocket server");
        true
    }

    async fn read_loop(&self, mut read_half: SplitStream<WsStream>) {
        tracing::info!("Starting read task");
        while let Some(msg_result) = read_half.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    if let Err(e) = self.handle_frame(&text).await {
                        tracing::error!("Failed to handle frame: {}", e);
                    }
                }
                Ok(Message::Close(frame)) => {
                    if let Some(close_frame) = frame {
                        tracing::info!(
                            "Server closed connection: code={:?}, reason='{}'",
                            close_frame.code,
                            close_frame.reason
                        );
                    } else {
                        tracing::warn!("Server closed connection without close frame");
                    }
                    break;
                }
                Ok(Message::Ping(data)) => {
                    tracing::debug!("Received ping ({} bytes)", data.len());
                }
                Ok(Message::Pong(data)) => {
                    tracing::debug!("Received pong ({} bytes)", data.len());
                }
                Ok(Message::Binary(data)) => {
                    tracing::warn!("Received unexpected binary message ({} bytes)", data.len());
                }
                Ok(Message::Frame(_)) => {
                    tracing::debug!("Received raw frame (internal)");
                }
                Err(e) => {
                    tracing::error!("WebSocket read error: {}", e);
                    break;
                }
            }
        }

        self.inner.state.lock().await.writer = None;
        self.set_status(SocketStatus::NotConnected);
        tracing::info!("Read task finished");
    }

    /// Starts the expiry sweep if calls are pending and it is not running.
    /// The sweep exits on its own once nothing is pending.
    fn ensure_expiry(&self, state: &mut TransportState) {
        if state.expiry_running || state.pending.is_empty() {
            return;
        }
        state.expiry_running = true;

        let shared = Arc::downgrade(&self.inner.state);
        let timeout = self.inner.options.call_timeout;
        let period = self.inner.options.expiry_interval;

        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;

                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let mut state = shared.lock().await;

                let expired = state.pending.expire(Instant::now(), timeout);
                if expired > 0 {
                    tracing::debug!("Expired {} call(s)", expired);
                }

                if state.pending.is_empty() {
                    state.expiry_running = false;
                    tracing::debug!("No calls pending, stopping expiry timer");
                    break;
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::http::test_server::serve_once;
    use crate::infrastructure::websocket::test_server::{TestServer, upgrade};
    use crate::types::CallError;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    async fn connected_transport() -> (Transport, mpsc::UnboundedReceiver<OutboundFrame>, StatusEvents) {
        let (transport, events) = Transport::new(TransportOptions::default());
        let (writer, frames) = mpsc::unbounded_channel();
        transport.set_writer(writer).await;
        transport.set_status(SocketStatus::Connecting);
        transport.set_status(SocketStatus::Connected);
        (transport, frames, events)
    }

    fn next_frame(frames: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Value {
        match frames.try_recv() {
            Ok(OutboundFrame::Text(text)) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected a text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_call_requires_socket() {
        let (transport, _) = Transport::new(TransportOptions::default());
        let result = transport.call("/services/GetServiceList", None).await;
        assert!(matches!(result, Err(TorcError::NotConnected)));
        assert_eq!(transport.pending_calls().await, 0);
    }

    #[tokio::test]
    async fn test_call_round_trip() {
        let (transport, mut frames, _) = connected_transport().await;

        let response = transport
            .call("/services/power/GetBatteryLevel", None)
            .await
            .unwrap();
        let sent = next_frame(&mut frames);
        assert_eq!(sent["jsonrpc"], "2.0");
        assert_eq!(sent["method"], "/services/power/GetBatteryLevel");
        assert_eq!(sent["id"], response.id());
        assert!(sent.get("params").is_none());

        let reply = json!({"jsonrpc": "2.0", "result": 82, "id": response.id()});
        transport.handle_frame(&reply.to_string()).await.unwrap();

        assert_eq!(response.await, Ok(json!(82)));
        assert_eq!(transport.pending_calls().await, 0);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_notify_sends_no_id_and_stores_nothing() {
        let (transport, mut frames, _) = connected_transport().await;

        transport
            .notify("/services/power/Suspend", Some(json!({})))
            .await
            .unwrap();
        let sent = next_frame(&mut frames);
        assert!(sent.get("id").is_none());
        assert_eq!(sent["params"], json!({}));
        assert_eq!(transport.pending_calls().await, 0);
        assert!(!transport.expiry_running().await);
    }

    #[tokio::test]
    async fn test_batch_is_one_frame_with_independent_outcomes() {
        let (transport, mut frames, _) = connected_transport().await;

        let mut responses = transport
            .call_batch(vec![
                BatchCall::call("/services/power/GetCanSuspend", None),
                BatchCall::call("/services/power/GetCanShutdown", None),
            ])
            .await
            .unwrap();
        assert_eq!(responses.len(), 2);

        let sent = next_frame(&mut frames);
        let elements = sent.as_array().unwrap();
        assert_eq!(elements.len(), 2);
        assert!(frames.try_recv().is_err());

        let second = responses.pop().unwrap().unwrap();
        let first = responses.pop().unwrap().unwrap();
        assert_eq!(elements[0]["id"], first.id());
        assert_eq!(elements[1]["id"], second.id());

        let reply = json!([
            {"jsonrpc": "2.0", "error": {"code": -32603, "message": "Internal error"}, "id": second.id()},
            {"jsonrpc": "2.0", "result": true, "id": first.id()}
        ]);
        transport.handle_frame(&reply.to_string()).await.unwrap();

        assert_eq!(first.await, Ok(json!(true)));
        assert_eq!(
            second.await,
            Err(CallError::Remote(crate::types::RpcErrorObject::new(
                -32603,
                "Internal error"
            )))
        );
    }

    #[tokio::test]
    async fn test_batch_with_notification_entry() {
        let (transport, mut frames, _) = connected_transport().await;

        let responses = transport
            .call_batch(vec![
                BatchCall::notification("/services/power/Suspend", None),
                BatchCall::call("/services/power/GetBatteryLevel", None),
            ])
            .await
            .unwrap();
        assert!(responses[0].is_none());
        assert!(responses[1].is_some());

        let sent = next_frame(&mut frames);
        assert!(sent[0].get("id").is_none());
        assert!(sent[1].get("id").is_some());
        assert_eq!(transport.pending_calls().await, 1);
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let (transport, mut frames, _) = connected_transport().await;
        let responses = transport.call_batch(Vec::new()).await.unwrap();
        assert!(responses.is_empty());
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_inbound_call_answered_with_method_not_found() {
        let (transport, mut frames, _) = connected_transport().await;

        let call = json!({"jsonrpc": "2.0", "method": "GetStatus", "id": 11});
        transport.handle_frame(&call.to_string()).await.unwrap();

        let reply = next_frame(&mut frames);
        assert_eq!(
            reply,
            json!({"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": 11})
        );
    }

    #[tokio::test]
    async fn test_listen_and_unlisten() {
        let (transport, _frames, _) = connected_transport().await;
        let seen = Arc::new(StdMutex::new(0));
        let counter = Arc::clone(&seen);

        let id = transport
            .listen(
                "/services/peers/peersChanged",
                Arc::new(move |_| *counter.lock().unwrap() += 1),
            )
            .await;

        let push = json!({"jsonrpc": "2.0", "method": "/services/peers/peersChanged", "params": {"value": []}});
        transport.handle_frame(&push.to_string()).await.unwrap();
        assert!(transport.unlisten(id).await);
        transport.handle_frame(&push.to_string()).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), 1);
        assert!(!transport.unlisten(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_expires_and_timer_stops() {
        let (transport, _frames, _) = connected_transport().await;
        assert!(!transport.expiry_running().await);

        let mut response = transport
            .call("/services/power/Suspend", None)
            .await
            .unwrap();
        assert!(transport.expiry_running().await);

        time::sleep(Duration::from_millis(59_000)).await;
        assert_eq!(response.try_result(), None);

        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(response.try_result(), Some(Err(CallError::Expired)));
        assert_eq!(transport.pending_calls().await, 0);
        assert!(!transport.expiry_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_expiry_is_ignored() {
        let (transport, mut frames, _) = connected_transport().await;

        let response = transport.call("/services/power/Restart", None).await.unwrap();
        let id = response.id();
        next_frame(&mut frames);

        time::sleep(Duration::from_millis(70_000)).await;
        let late = json!({"jsonrpc": "2.0", "result": true, "id": id});
        transport.handle_frame(&late.to_string()).await.unwrap();

        assert_eq!(response.await, Err(CallError::Expired));
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_restarts_for_new_calls() {
        let (transport, _frames, _) = connected_transport().await;

        let first = transport.call("/services/a", None).await.unwrap();
        time::sleep(Duration::from_millis(75_000)).await;
        assert_eq!(first.await, Err(CallError::Expired));
        assert!(!transport.expiry_running().await);

        let mut second = transport.call("/services/b", None).await.unwrap();
        assert!(transport.expiry_running().await);
        time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(second.try_result(), None);
    }

    #[tokio::test]
    async fn test_wrapped_ids_do_not_collide() {
        let (transport, _) = Transport::with_pending(TransportOptions::default(), PendingCalls::with_ceiling(3));
        let (writer, _frames) = mpsc::unbounded_channel();
        transport.set_writer(writer).await;

        let a = transport.call("/a", None).await.unwrap();
        let b = transport.call("/b", None).await.unwrap();
        let c = transport.call("/c", None).await.unwrap();
        assert_eq!((a.id(), b.id(), c.id()), (1, 2, 3));

        transport
            .handle_frame(&json!({"jsonrpc": "2.0", "result": 0, "id": 2}).to_string())
            .await
            .unwrap();
        let d = transport.call("/d", None).await.unwrap();
        assert_eq!(d.id(), 2);
    }

    #[tokio::test]
    async fn test_status_transitions_are_reported_in_order() {
        let (transport, mut frames, mut events) = connected_transport().await;
        assert_eq!(events.recv().await, Some(SocketStatus::Connecting));
        assert_eq!(events.recv().await, Some(SocketStatus::Connected));

        assert!(transport.mark_ready());
        assert!(!transport.mark_ready());
        assert_eq!(transport.status(), SocketStatus::Ready);

        transport.stop().await;
        assert_eq!(transport.status(), SocketStatus::Disconnecting);
        assert_eq!(frames.try_recv(), Ok(OutboundFrame::Close));

        assert_eq!(events.recv().await, Some(SocketStatus::Ready));
        assert_eq!(events.recv().await, Some(SocketStatus::Disconnecting));
    }

    #[tokio::test]
    async fn test_start_is_noop_while_connected() {
        let (transport, _frames, mut events) = connected_transport().await;
        events.recv().await;
        events.recv().await;

        transport.start().await.unwrap();
        assert_eq!(transport.status(), SocketStatus::Connected);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_without_socket_returns_to_not_connected() {
        let (transport, _) = Transport::new(TransportOptions::default());
        transport.stop().await;
        assert_eq!(transport.status(), SocketStatus::NotConnected);

        transport.set_status(SocketStatus::Connecting);
        transport.stop().await;
        assert_eq!(transport.status(), SocketStatus::NotConnected);
    }

    #[tokio::test]
    async fn test_batch_fails_whole_when_ids_run_out() {
        let (transport, _) = Transport::with_pending(TransportOptions::default(), PendingCalls::with_ceiling(2));
        let (writer, mut frames) = mpsc::unbounded_channel();
        transport.set_writer(writer).await;

        let result = transport
            .call_batch(vec![
                BatchCall::call("/a", None),
                BatchCall::notification("/b", None),
                BatchCall::call("/c", None),
                BatchCall::call("/d", None),
            ])
            .await;
        assert!(matches!(result, Err(TorcError::CallIdsExhausted(2))));
        assert_eq!(transport.pending_calls().await, 0);
        assert!(frames.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_token_failure_returns_to_not_connected_silently() {
        let (endpoint, server) = serve_once("401 Unauthorized", "{}").await;
        let (transport, mut events) = Transport::new(TransportOptions {
            endpoint,
            ..Default::default()
        });

        let result = transport.start().await;
        assert!(matches!(result, Err(TorcError::Auth(_))));
        assert_eq!(transport.status(), SocketStatus::NotConnected);
        assert_eq!(server.await.unwrap(), "GET /services/GetWebSocketToken HTTP/1.1");

        assert_eq!(events.try_recv(), Ok(SocketStatus::Connecting));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_socket_opened_before_stop_is_discarded() {
        let server = TestServer::bind().await;
        let (transport, _events) = Transport::new(TransportOptions {
            endpoint: server.endpoint(),
            access_token: Some("token".to_string()),
            ..Default::default()
        });
        let wait = Duration::from_secs(5);

        let stale = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.start().await })
        };
        let stale_tcp = time::timeout(wait, server.accept_tcp()).await.unwrap();

        transport.stop().await;
        assert_eq!(transport.status(), SocketStatus::NotConnected);

        let current = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.start().await })
        };
        let current_tcp = time::timeout(wait, server.accept_tcp()).await.unwrap();
        assert_eq!(transport.status(), SocketStatus::Connecting);

        // the handshake started before stop() completes first
        let (mut stale_socket, _, _) = upgrade(stale_tcp).await;
        time::timeout(wait, stale).await.unwrap().unwrap().unwrap();
        assert_eq!(transport.status(), SocketStatus::Connecting);

        let dropped = time::timeout(wait, stale_socket.next()).await.unwrap();
        assert!(!matches!(dropped, Some(Ok(Message::Text(_)))));

        let (mut socket, _, _) = upgrade(current_tcp).await;
        time::timeout(wait, current).await.unwrap().unwrap().unwrap();
        assert_eq!(transport.status(), SocketStatus::Connected);

        let response = transport.call("/services/GetServiceList", None).await.unwrap();
        let request: Value = match time::timeout(wait, socket.next()).await.unwrap() {
            Some(Ok(Message::Text(text))) => serde_json::from_str(&text).unwrap(),
            other => panic!("expected the call on the current socket, got {:?}", other),
        };
        assert_eq!(request["id"], response.id());

        let reply = json!({"jsonrpc": "2.0", "result": true, "id": request["id"]});
        socket.send(Message::Text(reply.to_string().into())).await.unwrap();
        assert_eq!(time::timeout(wait, response).await.unwrap(), Ok(json!(true)));

        transport.shutdown().await;
    }
}
