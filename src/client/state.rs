use crate::infrastructure::TaskManager;
use crate::subscription::{ReturnFormat, ServiceList, SubProtocolInfo, Subscription, default_service_list};
use std::collections::HashMap;
use tokio::task::JoinHandle;

/// Consolidated mutable state for ConnectionManager
/// Using a single struct keeps catalog and subscriptions consistent
pub(crate) struct ClientState {
    /// Services known on the current connection
    pub service_list: ServiceList,

    /// At most one entry per service name
    pub subscriptions: HashMap<String, Subscription>,

    /// Discovery results, cleared on disconnect
    pub return_formats: Option<Vec<ReturnFormat>>,
    pub websocket_protocols: Option<Vec<SubProtocolInfo>>,

    /// Catalog task of the current connection
    pub discovery: Option<JoinHandle<()>>,

    /// Status watcher and liveness monitor
    pub task_manager: TaskManager,

    next_generation: u64,
}

impl ClientState {
    pub fn new() -> Self {
        Self {
            service_list: default_service_list(),
            subscriptions: HashMap::new(),
            return_formats: None,
            websocket_protocols: None,
            discovery: None,
            task_manager: TaskManager::new(),
            next_generation: 0,
        }
    }

    pub fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    /// Outbound method name for `service`/`method`, if the call is recognized.
    ///
    /// Recognized means the live subscription advertises the method, or the
    /// service is in the service list.
    pub fn call_target(&self, service: &str, method: &str) -> Option<String> {
        if let Some(subscription) = self.subscriptions.get(service)
            && subscription.has_method(method)
        {
            return Some(format!("{}{}", subscription.path, method));
        }

        self.service_list
            .get(service)
            .map(|descriptor| format!("{}{}", descriptor.path, method))
    }

    /// Back to the bootstrap catalog; returns the subscriptions to tear down
    pub fn reset(&mut self) -> HashMap<String, Subscription> {
        if let Some(discovery) = self.discovery.take() {
            discovery.abort();
        }
        self.service_list = default_service_list();
        self.return_formats = None;
        self.websocket_protocols = None;
        std::mem::take(&mut self.subscriptions)
    }
}

impl Default for ClientState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscription::{ServiceDescriptor, ServiceSchema, SubscriptionMultiplexer};
    use crate::transport::{Transport, TransportOptions};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::{mpsc, oneshot};

    #[tokio::test]
    async fn test_call_target_rules() {
        let mut state = ClientState::new();
        assert_eq!(
            state.call_target("services", "GetServiceList").as_deref(),
            Some("/services/GetServiceList")
        );
        assert_eq!(state.call_target("power", "Suspend"), None);

        // a live subscription recognizes its advertised methods
        let (transport, _) = Transport::new(TransportOptions::default());
        let (events, _receiver) = mpsc::unbounded_channel();
        let (abort, _aborted) = oneshot::channel();
        let mut entry = Subscription::new(1, "/services/power/", Vec::new(), events, abort);
        entry.establish(
            ServiceSchema::from_value(&json!({"version": 1, "methods": ["Suspend"]})),
            SubscriptionMultiplexer::new(transport, "/services/power/", BTreeMap::new()),
        );
        state.subscriptions.insert("power".to_string(), entry);

        assert_eq!(
            state.call_target("power", "Suspend").as_deref(),
            Some("/services/power/Suspend")
        );
        assert_eq!(state.call_target("power", "Restart"), None);

        state.service_list.insert(
            "power".to_string(),
            ServiceDescriptor {
                name: "Power".to_string(),
                path: "/services/power/".to_string(),
            },
        );
        assert_eq!(
            state.call_target("power", "Restart").as_deref(),
            Some("/services/power/Restart")
        );
    }

    #[test]
    fn test_reset_restores_bootstrap_catalog() {
        let mut state = ClientState::new();
        state.service_list.clear();
        state.return_formats = Some(Vec::new());

        let ended = state.reset();
        assert!(ended.is_empty());
        assert_eq!(state.service_list, default_service_list());
        assert_eq!(state.return_formats, None);
        assert_eq!(state.next_generation(), 1);
        assert_eq!(state.next_generation(), 2);
    }
}
