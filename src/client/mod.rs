// Client module - Connection lifecycle, service catalog and subscriptions
mod builder;
mod core;
mod state;

pub use builder::{ConnectionManagerBuilder, ConnectionOptions};
pub use self::core::{ConnectionManager, ServiceCall};
pub(crate) use state::ClientState;
