pub mod constants;
pub mod error;
pub mod message;

pub use constants::*;
pub use error::{CallError, CallResult, Result, SubscriptionError, TorcError};
pub use message::{Notification, RpcErrorObject, RpcErrorReply, RpcRequest};
