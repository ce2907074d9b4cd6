use crate::types::{CallError, CallResult, MAX_RPC_ID, Result, TorcError};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::time::Instant;

/// A call awaiting its response
struct PendingCall {
    sent_at: Instant,
    completion: oneshot::Sender<CallResult>,
}

/// Future resolving to the outcome of one remote call.
///
/// Resolves exactly once: with the server's result, the server's error object,
/// [`CallError::Expired`] after the call timeout, or [`CallError::Dropped`] if
/// the transport is dropped first.
#[derive(Debug)]
pub struct PendingResponse {
    id: u64,
    receiver: oneshot::Receiver<CallResult>,
}

impl PendingResponse {
    /// The JSON-RPC id the call was sent with
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Non-blocking check for the outcome
    pub fn try_result(&mut self) -> Option<CallResult> {
        match self.receiver.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(CallError::Dropped)),
        }
    }
}

impl Future for PendingResponse {
    type Output = CallResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(CallError::Dropped)))
    }
}

/// Table of in-flight calls keyed by correlation id
pub struct PendingCalls {
    next_id: u64,
    ceiling: u64,
    calls: HashMap<u64, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::with_ceiling(MAX_RPC_ID)
    }

    /// Ids run from 1 to `ceiling` inclusive, then wrap
    pub(crate) fn with_ceiling(ceiling: u64) -> Self {
        Self {
            next_id: 1,
            ceiling: ceiling.max(1),
            calls: HashMap::new(),
        }
    }

    /// Allocates an id and stores the call.
    ///
    /// Fails with [`TorcError::CallIdsExhausted`] when every id is in flight.
    pub fn register(&mut self, sent_at: Instant) -> Result<PendingResponse> {
        let id = self.allocate_id()?;
        let (completion, receiver) = oneshot::channel();
        self.calls.insert(
            id,
            PendingCall {
                sent_at,
                completion,
            },
        );
        Ok(PendingResponse { id, receiver })
    }

    /// Removes a call without resolving it (send failed)
    pub fn cancel(&mut self, id: u64) {
        self.calls.remove(&id);
    }

    /// Resolves and removes the call. Returns false if no such call is pending.
    pub fn complete(&mut self, id: u64, result: CallResult) -> bool {
        let Some(call) = self.calls.remove(&id) else {
            return false;
        };

        if call.completion.send(result).is_err() {
            tracing::debug!("Caller stopped waiting for call {}", id);
        }
        true
    }

    /// Fails every call sent at least `timeout` ago. Returns how many expired.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> usize {
        let expired: Vec<u64> = self
            .calls
            .iter()
            .filter(|(_, call)| now.saturating_duration_since(call.sent_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in expired.iter() {
            tracing::debug!("Call {} expired without a response", id);
            self.complete(*id, Err(CallError::Expired));
        }

        expired.len()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    fn allocate_id(&mut self) -> Result<u64> {
        // skips ids still in flight after a wrap
        for _ in 0..self.ceiling {
            let id = self.next_id;
            self.next_id = if id >= self.ceiling { 1 } else { id + 1 };
            if !self.calls.contains_key(&id) {
                return Ok(id);
            }
        }
        Err(TorcError::CallIdsExhausted(self.ceiling))
    }
}

impl Default for PendingCalls {
    fn default() -> Self {
        Self::new()
    }
}
