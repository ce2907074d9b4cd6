use super::multiplexer::SubscriptionMultiplexer;
use super::schema::{MethodSignature, PropertyDescriptor, ServiceSchema};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::{mpsc, oneshot};

/// A pushed property value
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub name: String,
    pub value: Value,
}

/// Events delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionEvent {
    /// One of the requested properties changed
    PropertyChanged(PropertyChange),
    /// The connection dropped; the subscription no longer exists
    Ended,
}

/// What the server acknowledged when the subscription was established
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub service: String,
    pub version: String,
    pub methods: BTreeMap<String, MethodSignature>,
    /// Every advertised property with its value at subscription time
    pub properties: BTreeMap<String, PropertyDescriptor>,
}

/// Caller's side of an established subscription.
///
/// Property changes for the requested properties arrive on the event stream,
/// followed by a single [`SubscriptionEvent::Ended`] if the connection drops.
/// After an explicit unsubscribe the stream simply closes.
#[derive(Debug)]
pub struct ServiceSubscription {
    info: SubscriptionInfo,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl ServiceSubscription {
    pub(crate) fn new(info: SubscriptionInfo, events: mpsc::UnboundedReceiver<SubscriptionEvent>) -> Self {
        Self { info, events }
    }

    pub fn info(&self) -> &SubscriptionInfo {
        &self.info
    }

    pub fn service(&self) -> &str {
        &self.info.service
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    /// Waits for the next event; `None` once the subscription is gone
    pub async fn next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Non-blocking variant of [`next_event`](Self::next_event)
    pub fn try_next_event(&mut self) -> Option<SubscriptionEvent> {
        self.events.try_recv().ok()
    }

    pub fn into_parts(self) -> (SubscriptionInfo, mpsc::UnboundedReceiver<SubscriptionEvent>) {
        (self.info, self.events)
    }
}

/// Per-service entry kept by the connection manager
pub(crate) struct Subscription {
    /// Distinguishes this entry from later ones for the same service
    pub generation: u64,
    pub path: String,
    pub requested: Vec<String>,
    pub events: mpsc::UnboundedSender<SubscriptionEvent>,
    /// Set once the server acknowledged
    pub schema: Option<ServiceSchema>,
    pub multiplexer: Option<SubscriptionMultiplexer>,
    /// Dropping this fails the `subscribe()` still awaiting the ack
    pub abort: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(
        generation: u64,
        path: impl Into<String>,
        requested: Vec<String>,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
        abort: oneshot::Sender<()>,
    ) -> Self {
        Self {
            generation,
            path: path.into(),
            requested,
            events,
            schema: None,
            multiplexer: None,
            abort: Some(abort),
        }
    }

    /// True between the server's acknowledgement and teardown
    pub fn is_live(&self) -> bool {
        self.schema.is_some()
    }

    pub fn has_method(&self, method: &str) -> bool {
        self.schema
            .as_ref()
            .is_some_and(|schema| schema.has_method(method))
    }

    /// Marks the subscription established
    pub fn establish(&mut self, schema: ServiceSchema, multiplexer: SubscriptionMultiplexer) {
        self.abort = None;
        self.schema = Some(schema);
        self.multiplexer = Some(multiplexer);
    }

    /// Releases the listeners. A live subscriber is told with one `Ended`
    /// when `notify` is set; a pending `subscribe()` fails with `Closed`.
    pub async fn close(mut self, notify: bool) {
        if let Some(mut multiplexer) = self.multiplexer.take() {
            multiplexer.release().await;
        }

        if notify && self.is_live() && self.events.send(SubscriptionEvent::Ended).is_err() {
            tracing::debug!("Subscriber at {} already gone", self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Transport, TransportOptions};
    use serde_json::json;

    fn info() -> SubscriptionInfo {
        SubscriptionInfo {
            service: "power".to_string(),
            version: "1".to_string(),
            methods: BTreeMap::new(),
            properties: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_close_ends_live_subscription_once() {
        let (transport, _) = Transport::new(TransportOptions::default());
        let (events, receiver) = mpsc::unbounded_channel();
        let (abort, _aborted) = oneshot::channel();

        let mut entry = Subscription::new(1, "/services/power/", Vec::new(), events, abort);
        entry.establish(
            ServiceSchema::from_value(&json!({"version": 1, "methods": ["Suspend"]})),
            SubscriptionMultiplexer::new(transport, "/services/power/", BTreeMap::new()),
        );
        assert!(entry.is_live());
        assert!(entry.has_method("Suspend"));

        let mut subscription = ServiceSubscription::new(info(), receiver);
        entry.close(true).await;

        assert_eq!(subscription.next_event().await, Some(SubscriptionEvent::Ended));
        assert_eq!(subscription.next_event().await, None);
    }

    #[tokio::test]
    async fn test_close_pending_fails_waiter() {
        let (events, mut receiver) = mpsc::unbounded_channel();
        let (abort, aborted) = oneshot::channel();

        let entry = Subscription::new(1, "/services/power/", Vec::new(), events, abort);
        assert!(!entry.is_live());
        assert!(!entry.has_method("Suspend"));

        entry.close(true).await;
        assert!(aborted.await.is_err());
        assert_eq!(receiver.recv().await, None);
    }

    #[tokio::test]
    async fn test_quiet_close_sends_nothing() {
        let (transport, _) = Transport::new(TransportOptions::default());
        let (events, receiver) = mpsc::unbounded_channel();
        let (abort, _aborted) = oneshot::channel();

        let mut entry = Subscription::new(2, "/services/power/", Vec::new(), events, abort);
        entry.establish(
            ServiceSchema::from_value(&json!({"version": "1"})),
            SubscriptionMultiplexer::new(transport, "/services/power/", BTreeMap::new()),
        );

        let mut subscription = ServiceSubscription::new(info(), receiver);
        entry.close(false).await;
        assert_eq!(subscription.try_next_event(), None);
        assert_eq!(subscription.service(), "power");
        assert_eq!(subscription.version(), "1");
    }
}
