pub mod constants;
pub mod envelope;
pub mod types;

// Re-export primary types for convenience.
pub use constants::RpcMethod;
pub use envelope::{Incoming, Notification, Request, Response, RpcError};
pub use types::{BlockTag, LogFilter, RpcLog, SubscriptionKind};
