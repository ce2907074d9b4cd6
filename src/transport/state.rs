use super::pending::PendingCalls;
use crate::infrastructure::TaskManager;
use crate::types::Notification;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handler invoked for every notification whose method it was registered for
pub type NotificationHandler = Arc<dyn Fn(&Notification) + Send + Sync + 'static>;

/// Handle returned by `listen`, used to remove the handler again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Frames queued for the socket writer task
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

/// Consolidated mutable state for a Transport
pub(crate) struct TransportState {
    /// In-flight calls
    pub pending: PendingCalls,

    /// Notification handlers keyed by method name
    pub listeners: HashMap<String, Vec<(ListenerId, NotificationHandler)>>,

    next_listener_id: u64,

    /// Queue into the socket writer (None while disconnected)
    pub writer: Option<mpsc::UnboundedSender<OutboundFrame>>,

    /// Whether the expiry sweep task is alive
    pub expiry_running: bool,

    /// Read/write tasks of the current socket
    pub task_manager: TaskManager,

    /// Bumped by every `start()`, `stop()` and `shutdown()`; a handshake
    /// only attaches while its attempt is still the latest
    pub attempt: u64,
}

impl TransportState {
    pub fn new(pending: PendingCalls) -> Self {
        Self {
            pending,
            listeners: HashMap::new(),
            next_listener_id: 0,
            writer: None,
            expiry_running: false,
            task_manager: TaskManager::new(),
            attempt: 0,
        }
    }

    /// Starts a new connection attempt, invalidating any in flight
    pub fn next_attempt(&mut self) -> u64 {
        self.attempt += 1;
        self.attempt
    }

    pub fn add_listener(&mut self, method: &str, handler: NotificationHandler) -> ListenerId {
        self.next_listener_id += 1;
        let id = ListenerId(self.next_listener_id);
        self.listeners
            .entry(method.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let mut removed = false;
        self.listeners.retain(|_, handlers| {
            let before = handlers.len();
            handlers.retain(|(handler_id, _)| *handler_id != id);
            removed |= handlers.len() != before;
            !handlers.is_empty()
        });
        removed
    }

    pub fn handlers_for(&self, method: &str) -> Vec<NotificationHandler> {
        self.listeners
            .get(method)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default()
    }

    /// Queues a frame on the socket writer
    pub fn send(&self, frame: OutboundFrame) -> bool {
        match &self.writer {
            Some(writer) => writer.send(frame).is_ok(),
            None => false,
        }
    }
}
