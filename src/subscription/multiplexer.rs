use super::core::{PropertyChange, SubscriptionEvent};
use super::schema::PropertyDescriptor;
use crate::transport::{ListenerId, NotificationHandler, Transport};
use crate::types::Notification;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

type PropertyTable = Arc<RwLock<BTreeMap<String, PropertyDescriptor>>>;

/// Narrows a service's property notifications to what one caller asked for.
///
/// Holds the property set the server advertised, kept current with every
/// pushed value, and one transport listener per bound property.
pub struct SubscriptionMultiplexer {
    transport: Transport,
    path: String,
    properties: PropertyTable,
    listeners: Vec<(String, ListenerId)>,
}

impl SubscriptionMultiplexer {
    pub fn new(
        transport: Transport,
        path: impl Into<String>,
        properties: BTreeMap<String, PropertyDescriptor>,
    ) -> Self {
        Self {
            transport,
            path: path.into(),
            properties: Arc::new(RwLock::new(properties)),
            listeners: Vec::new(),
        }
    }

    /// Listens for every requested property the server advertises.
    ///
    /// Returns the names actually bound; unknown or repeated names are skipped.
    pub async fn bind(
        &mut self,
        requested: &[String],
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> Vec<String> {
        let mut bound = Vec::new();

        for name in requested {
            if self.is_bound(name) {
                continue;
            }

            let method = match self.read_properties().get(name) {
                Some(descriptor) => format!("{}{}", self.path, descriptor.notification_or(name)),
                None => {
                    tracing::debug!("Service at {} has no property '{}'", self.path, name);
                    continue;
                }
            };

            let handler = Self::handler(name.clone(), Arc::clone(&self.properties), events.clone());
            let id = self.transport.listen(&method, handler).await;
            tracing::debug!("Listening to {} for property '{}'", method, name);

            self.listeners.push((name.clone(), id));
            bound.push(name.clone());
        }

        bound
    }

    fn handler(
        name: String,
        properties: PropertyTable,
        events: mpsc::UnboundedSender<SubscriptionEvent>,
    ) -> NotificationHandler {
        Arc::new(move |notification: &Notification| {
            let value = match &notification.params {
                Some(Value::Object(params)) if params.contains_key("value") => {
                    params.get("value").cloned().unwrap_or_default()
                }
                Some(params) => params.clone(),
                None => Value::Null,
            };

            match properties.write() {
                Ok(mut properties) => {
                    if let Some(descriptor) = properties.get_mut(&name) {
                        descriptor.value = value.clone();
                    }
                }
                Err(e) => tracing::error!("Property table poisoned: {}", e),
            }

            let change = PropertyChange {
                name: name.clone(),
                value,
            };
            if events.send(SubscriptionEvent::PropertyChanged(change)).is_err() {
                tracing::debug!("Subscriber gone, dropping change of '{}'", name);
            }
        })
    }

    /// Names of the properties with a live listener
    pub fn bound(&self) -> Vec<String> {
        self.listeners.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.listeners.iter().any(|(bound, _)| bound == name)
    }

    /// Snapshot of the advertised properties with their latest values
    pub fn properties(&self) -> BTreeMap<String, PropertyDescriptor> {
        self.read_properties().clone()
    }

    /// Removes every listener this multiplexer registered
    pub async fn release(&mut self) {
        for (name, id) in self.listeners.drain(..) {
            if !self.transport.unlisten(id).await {
                tracing::debug!("Listener for '{}' was already gone", name);
            }
        }
    }

    fn read_properties(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, PropertyDescriptor>> {
        // a panicking handler cannot leave the table half-written
        self.properties
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
