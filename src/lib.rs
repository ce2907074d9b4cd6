//! # Torc Client
//!
//! A JSON-RPC 2.0 over WebSocket client for Torc media-center services,
//! with service discovery and live property subscriptions.
//!
//! ## Example
//!
//! ```no_run
//! use torc_client::{ConnectionManager, ConnectionOptions, SocketStatus, SubscriptionEvent};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = ConnectionManager::new("http://localhost:4840", ConnectionOptions::default())?;
//!
//!     let mut status = manager.status_changes();
//!     status.wait_for(|status| *status == SocketStatus::Ready).await?;
//!
//!     let mut power = manager.subscribe("power", &["batteryLevel"]).await?;
//!     while let Some(SubscriptionEvent::PropertyChanged(change)) = power.next_event().await {
//!         println!("{} = {}", change.name, change.value);
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod infrastructure;
pub mod messaging;
pub mod subscription;
pub mod transport;
pub mod types;

pub use client::{ConnectionManager, ConnectionManagerBuilder, ConnectionOptions, ServiceCall};
pub use subscription::{
    PropertyChange, ServiceSchema, ServiceSubscription, SubscriptionEvent, SubscriptionInfo,
};
pub use transport::{BatchCall, PendingResponse, SocketStatus, Transport, TransportOptions};
pub use types::{CallError, Result, SubscriptionError, TorcError};
