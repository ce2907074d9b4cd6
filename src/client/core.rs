use super::{ClientState, ConnectionManagerBuilder, ConnectionOptions};
use crate::subscription::{
    MethodSignature, PropertyDescriptor, ReturnFormat, ServiceList, ServiceSchema,
    ServiceSubscription, SubProtocolInfo, Subscription, SubscriptionEvent, SubscriptionInfo,
    SubscriptionMultiplexer, parse_return_formats, parse_service_list, parse_websocket_protocols,
};
use crate::transport::{BatchCall, PendingResponse, SocketStatus, Transport, TransportInner};
use crate::types::{
    CallError, Result, SERVICES_NAME, SubscriptionError, TorcError, discovery_properties,
    service_methods,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tokio::sync::{RwLock, mpsc, oneshot, watch};

/// One entry of [`ConnectionManager::call_batch`]
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCall {
    pub service: String,
    pub method: String,
    pub params: Option<Value>,
}

impl ServiceCall {
    pub fn new(service: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            params,
        }
    }
}

/// The main entry point for talking to a Torc server.
///
/// `ConnectionManager` keeps one WebSocket open while the host is visible,
/// learns the service catalog after every (re)connect, validates outbound
/// calls against what the server advertised, and hands out per-service
/// property subscriptions.
///
/// # Example
///
/// ```no_run
/// use torc_client::{ConnectionManager, ConnectionOptions, SocketStatus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = ConnectionManager::new("http://localhost:4840", ConnectionOptions::default())?;
///
/// let mut status = manager.status_changes();
/// status.wait_for(|status| *status == SocketStatus::Ready).await?;
///
/// let mut power = manager.subscribe("power", &["batteryLevel"]).await?;
/// while let Some(event) = power.next_event().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    pub(crate) endpoint: String,
    pub(crate) options: ConnectionOptions,

    pub(crate) transport: Transport,

    // Consolidated mutable state
    pub(crate) state: Arc<RwLock<ClientState>>,

    pub(crate) visible: Arc<watch::Sender<bool>>,
}

/// Non-owning handle used by background tasks
pub(crate) struct WeakConnectionManager {
    endpoint: String,
    options: ConnectionOptions,
    transport: Weak<TransportInner>,
    state: Weak<RwLock<ClientState>>,
    visible: Weak<watch::Sender<bool>>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        Some(ConnectionManager {
            endpoint: self.endpoint.clone(),
            options: self.options.clone(),
            transport: Transport::upgrade(&self.transport)?,
            state: self.state.upgrade()?,
            visible: self.visible.upgrade()?,
        })
    }
}

impl ConnectionManager {
    /// Creates a manager and starts connecting in the background.
    ///
    /// Must be called inside a tokio runtime. The manager connects as soon
    /// as the host is visible and keeps reconnecting until
    /// [`shutdown()`](Self::shutdown).
    ///
    /// # Errors
    ///
    /// Returns [`TorcError::UrlParse`] or [`TorcError::Connection`] if the
    /// endpoint or options are invalid.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use torc_client::{ConnectionManager, ConnectionOptions};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let manager = ConnectionManager::new(
    ///     "https://torc.local:4840",
    ///     ConnectionOptions {
    ///         call_timeout: Some(10_000),
    ///         ..Default::default()
    ///     },
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(endpoint: impl Into<String>, options: ConnectionOptions) -> Result<Self> {
        ConnectionManagerBuilder::new(endpoint, options).map(|builder| builder.build())
    }

    pub(crate) fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            endpoint: self.endpoint.clone(),
            options: self.options.clone(),
            transport: self.transport.downgrade(),
            state: Arc::downgrade(&self.state),
            visible: Arc::downgrade(&self.visible),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Current socket status
    pub fn status(&self) -> SocketStatus {
        self.transport.status()
    }

    /// Watch the socket status; `Ready` means the service list is known
    pub fn status_changes(&self) -> watch::Receiver<SocketStatus> {
        self.transport.status_changes()
    }

    /// Connects now instead of waiting for the next liveness poll
    pub async fn start(&self) -> Result<()> {
        self.transport.start().await
    }

    /// Closes the socket. The liveness monitor reconnects on its next poll
    /// unless the host is hidden.
    pub async fn stop(&self) {
        self.transport.stop().await;
    }

    /// Reports host visibility. Hidden closes the socket and suspends
    /// reconnection; visible resumes it.
    pub fn set_visible(&self, visible: bool) {
        let changed = self.visible.send_if_modified(|current| {
            if *current == visible {
                return false;
            }
            *current = visible;
            true
        });

        if changed {
            tracing::info!("Host visibility changed: {}", if visible { "visible" } else { "hidden" });
        }
    }

    pub fn is_visible(&self) -> bool {
        *self.visible.borrow()
    }

    /// Stops every background task and closes the socket.
    ///
    /// Subscriptions end as on any disconnect.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down connection to {}", self.endpoint);

        let tasks = std::mem::take(&mut self.state.write().await.task_manager);
        tracing::debug!("Stopping {} background task(s)", tasks.running());
        tasks.shutdown().await;

        self.transport.stop().await;
        self.transport.shutdown().await;
        self.handle_disconnected().await;
    }

    /// Subscribes to a service and listens to the requested properties.
    ///
    /// Fails immediately, without sending anything, if the service is not in
    /// the service list or a subscription for it already exists. Otherwise
    /// waits for the server's acknowledgement.
    ///
    /// Only properties the server advertises are bound; the returned
    /// [`SubscriptionInfo`] lists everything it advertised.
    ///
    /// # Errors
    ///
    /// - [`SubscriptionError::UnknownService`] / [`SubscriptionError::AlreadySubscribed`]
    /// - [`SubscriptionError::Rejected`] if the server answered with an error,
    ///   the ack expired, or it carried no version
    /// - [`SubscriptionError::Closed`] if the connection dropped first
    /// - [`SubscriptionError::Transport`] if no socket is attached
    ///
    /// # Example
    ///
    /// ```no_run
    /// use torc_client::{ConnectionManager, ConnectionOptions, SubscriptionEvent};
    ///
    /// # async fn example(manager: ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
    /// let mut power = manager.subscribe("power", &["batteryLevel", "onBattery"]).await?;
    /// println!("power service version {}", power.version());
    ///
    /// while let Some(SubscriptionEvent::PropertyChanged(change)) = power.next_event().await {
    ///     println!("{} = {}", change.name, change.value);
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe(
        &self,
        service: &str,
        properties: &[&str],
    ) -> std::result::Result<ServiceSubscription, SubscriptionError> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (abort_tx, abort_rx) = oneshot::channel();

        let (generation, path) = {
            let mut state = self.state.write().await;

            let Some(descriptor) = state.service_list.get(service) else {
                tracing::warn!("Cannot subscribe to unknown service '{}'", service);
                return Err(SubscriptionError::UnknownService(service.to_string()));
            };
            let path = descriptor.path.clone();

            if state.subscriptions.contains_key(service) {
                tracing::warn!("Already subscribed to '{}'", service);
                return Err(SubscriptionError::AlreadySubscribed(service.to_string()));
            }

            let requested = properties.iter().map(|name| name.to_string()).collect();
            let generation = state.next_generation();
            state.subscriptions.insert(
                service.to_string(),
                Subscription::new(generation, path.clone(), requested, events_tx, abort_tx),
            );
            (generation, path)
        };

        let method = format!("{}{}", path, service_methods::SUBSCRIBE);
        let response = match self.transport.call(&method, None).await {
            Ok(response) => response,
            Err(source) => {
                self.discard(service, generation).await;
                return Err(SubscriptionError::Transport {
                    service: service.to_string(),
                    source,
                });
            }
        };

        let outcome = tokio::select! {
            outcome = response => outcome,
            _ = abort_rx => {
                tracing::debug!("Subscription to '{}' closed before acknowledgement", service);
                return Err(SubscriptionError::Closed(service.to_string()));
            }
        };

        let schema = match outcome.map(|ack| ServiceSchema::from_value(&ack)) {
            Ok(schema) if schema.version.is_some() => schema,
            Ok(_) => {
                self.discard(service, generation).await;
                return Err(SubscriptionError::Rejected {
                    service: service.to_string(),
                    cause: CallError::InvalidResponse(
                        "Subscribe acknowledgement carries no version".to_string(),
                    ),
                });
            }
            Err(cause) => {
                tracing::warn!("Error subscribing to service '{}': {}", service, cause);
                self.discard(service, generation).await;
                return Err(SubscriptionError::Rejected {
                    service: service.to_string(),
                    cause,
                });
            }
        };

        let mut state = self.state.write().await;
        let Some(entry) = state
            .subscriptions
            .get_mut(service)
            .filter(|entry| entry.generation == generation)
        else {
            return Err(SubscriptionError::Closed(service.to_string()));
        };

        let mut multiplexer =
            SubscriptionMultiplexer::new(self.transport.clone(), path, schema.properties.clone());
        let bound = multiplexer.bind(&entry.requested, entry.events.clone()).await;

        let info = SubscriptionInfo {
            service: service.to_string(),
            version: schema.version.clone().unwrap_or_default(),
            methods: schema.methods.clone(),
            properties: schema.properties.clone(),
        };
        entry.establish(schema, multiplexer);
        drop(state);

        tracing::info!(
            "Subscribed to '{}' (version {}), listening to {:?}",
            service,
            info.version,
            bound
        );
        Ok(ServiceSubscription::new(info, events_rx))
    }

    /// Removes a failed subscription unless a newer one replaced it
    async fn discard(&self, service: &str, generation: u64) {
        let mut state = self.state.write().await;
        if state
            .subscriptions
            .get(service)
            .is_some_and(|entry| entry.generation == generation)
        {
            state.subscriptions.remove(service);
        }
    }

    /// Ends a subscription. No-op if there is none.
    ///
    /// The subscriber's event stream closes without an `Ended` event. If the
    /// service advertises `Unsubscribe`, the server is told to stop pushing.
    pub async fn unsubscribe(&self, service: &str) {
        let Some(subscription) = self.state.write().await.subscriptions.remove(service) else {
            return;
        };

        let notify_server = subscription.has_method(service_methods::UNSUBSCRIBE);
        let method = format!("{}{}", subscription.path, service_methods::UNSUBSCRIBE);
        subscription.close(false).await;
        tracing::info!("Unsubscribed from '{}'", service);

        if notify_server && let Err(e) = self.transport.notify(&method, None).await {
            tracing::debug!("Could not send {}: {}", method, e);
        }
    }

    pub async fn is_subscribed(&self, service: &str) -> bool {
        self.state
            .read()
            .await
            .subscriptions
            .get(service)
            .is_some_and(Subscription::is_live)
    }

    /// Calls `method` on `service`.
    ///
    /// The call must be recognized: either the live subscription to the
    /// service advertises the method, or the service is in the service list.
    ///
    /// # Errors
    ///
    /// Returns [`TorcError::UnrecognizedCall`] for anything else; nothing is
    /// sent and no response will ever arrive. Returns
    /// [`TorcError::NotConnected`] when no socket is open.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use torc_client::ConnectionManager;
    ///
    /// # async fn example(manager: ConnectionManager) -> Result<(), Box<dyn std::error::Error>> {
    /// let level = manager.call("power", "GetBatteryLevel", None).await?.await?;
    /// println!("battery at {}", level);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn call(&self, service: &str, method: &str, params: Option<Value>) -> Result<PendingResponse> {
        let target = self.recognize(service, method).await?;
        self.transport.call(&target, params).await
    }

    /// Sends a notification to `service`; same recognition rule as [`call`](Self::call)
    pub async fn notify(&self, service: &str, method: &str, params: Option<Value>) -> Result<()> {
        let target = self.recognize(service, method).await?;
        self.transport.notify(&target, params).await
    }

    /// Sends several calls as one frame.
    ///
    /// Returns one slot per entry, in order. Unrecognized entries are dropped
    /// before sending and get `None`. If nothing is recognized, nothing is sent.
    pub async fn call_batch(&self, calls: Vec<ServiceCall>) -> Result<Vec<Option<PendingResponse>>> {
        let mut accepted = Vec::new();
        let mut slots = Vec::with_capacity(calls.len());
        {
            let state = self.state.read().await;
            for call in calls {
                match state.call_target(&call.service, &call.method) {
                    Some(target) => {
                        slots.push(true);
                        accepted.push(BatchCall::call(target, call.params));
                    }
                    None => {
                        tracing::warn!("Dropping unrecognized call {}/{} from batch", call.service, call.method);
                        slots.push(false);
                    }
                }
            }
        }

        let mut responses = self.transport.call_batch(accepted).await?.into_iter();
        Ok(slots
            .into_iter()
            .map(|accepted| if accepted { responses.next().flatten() } else { None })
            .collect())
    }

    async fn recognize(&self, service: &str, method: &str) -> Result<String> {
        match self.state.read().await.call_target(service, method) {
            Some(target) => Ok(target),
            None => {
                tracing::warn!("Failed to call {}/{}", service, method);
                Err(TorcError::UnrecognizedCall {
                    service: service.to_string(),
                    method: method.to_string(),
                })
            }
        }
    }

    /// Fetches the methods and properties of a service without subscribing
    pub async fn describe_service(&self, service: &str) -> Result<ServiceSchema> {
        let params = json!({ "Service": service });
        let description = self
            .call(SERVICES_NAME, service_methods::GET_SERVICE_DESCRIPTION, Some(params))
            .await?
            .await?;
        Ok(ServiceSchema::from_value(&description))
    }

    /// Services known on the current connection
    pub async fn service_list(&self) -> ServiceList {
        self.state.read().await.service_list.clone()
    }

    /// Serialisers the server offers, once discovery completed
    pub async fn return_formats(&self) -> Option<Vec<ReturnFormat>> {
        self.state.read().await.return_formats.clone()
    }

    /// WebSocket sub-protocols the server offers, once discovery completed
    pub async fn websocket_protocols(&self) -> Option<Vec<SubProtocolInfo>> {
        self.state.read().await.websocket_protocols.clone()
    }

    /// Methods advertised by a live subscription
    pub async fn service_methods(&self, service: &str) -> Option<BTreeMap<String, MethodSignature>> {
        let state = self.state.read().await;
        let schema = state.subscriptions.get(service)?.schema.as_ref()?;
        Some(schema.methods.clone())
    }

    /// Properties of a live subscription with their latest pushed values
    pub async fn service_properties(&self, service: &str) -> Option<BTreeMap<String, PropertyDescriptor>> {
        let state = self.state.read().await;
        let multiplexer = state.subscriptions.get(service)?.multiplexer.as_ref()?;
        Some(multiplexer.properties())
    }

    /// Socket opened: learn the catalog in the background
    pub(crate) async fn handle_connected(&self) {
        tracing::info!("Connected, requesting service list");

        let manager = self.clone();
        let discovery = tokio::spawn(async move { manager.discover().await });

        if let Some(previous) = self.state.write().await.discovery.replace(discovery) {
            previous.abort();
        }
    }

    /// Socket closed: end every subscription and forget the catalog
    pub(crate) async fn handle_disconnected(&self) {
        let subscriptions = self.state.write().await.reset();
        tracing::info!("Disconnected, ending {} subscription(s)", subscriptions.len());

        for (service, subscription) in subscriptions {
            tracing::debug!("Ending subscription to '{}'", service);
            subscription.close(true).await;
        }
    }

    async fn discover(&self) {
        let subscription = match self
            .subscribe(SERVICES_NAME, &[discovery_properties::SERVICE_LIST])
            .await
        {
            Ok(subscription) => subscription,
            Err(SubscriptionError::Closed(_)) => {
                tracing::debug!("Connection closed during service discovery");
                return;
            }
            Err(e) => {
                tracing::error!("Service discovery failed: {}", e);
                self.state.write().await.service_list.clear();
                return;
            }
        };

        let (info, mut events) = subscription.into_parts();

        let discovered = {
            let mut state = self.state.write().await;
            match property_value(&info, discovery_properties::SERVICE_LIST) {
                Some(list) => {
                    state.service_list = parse_service_list(list);
                    state.return_formats = property_value(&info, discovery_properties::RETURN_FORMATS)
                        .map(parse_return_formats);
                    state.websocket_protocols =
                        property_value(&info, discovery_properties::WEBSOCKET_PROTOCOLS)
                            .map(parse_websocket_protocols);
                    Some(state.service_list.len())
                }
                None => {
                    state.service_list.clear();
                    None
                }
            }
        };

        match discovered {
            Some(count) => {
                tracing::info!("Service discovery complete: {} service(s)", count);
                self.transport.mark_ready();
            }
            None => tracing::error!("Discovery acknowledgement carries no service list"),
        }

        while let Some(event) = events.recv().await {
            match event {
                SubscriptionEvent::PropertyChanged(change)
                    if change.name == discovery_properties::SERVICE_LIST =>
                {
                    let list = parse_service_list(&change.value);
                    tracing::info!("Service list changed: {} service(s)", list.len());
                    self.state.write().await.service_list = list;
                }
                SubscriptionEvent::PropertyChanged(_) => {}
                SubscriptionEvent::Ended => break,
            }
        }
    }
}

fn property_value<'a>(info: &'a SubscriptionInfo, name: &str) -> Option<&'a Value> {
    info.properties.get(name).map(|property| &property.value)
}
