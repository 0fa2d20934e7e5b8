//! Resilient node connections.
//!
//! Keeps a JSON-RPC WebSocket subscription alive across network failures:
//! liveness probing, bounded reconnection with backoff, and replay of every
//! registered subscription on the new socket.

pub mod client;
pub mod error;
pub mod handle;
pub(crate) mod liveness;
pub mod pool;
pub(crate) mod pumps;
pub mod registry;
pub mod supervisor;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{ProtocolClient, SubscriptionCallback};
pub use error::ConnectionError;
pub use handle::ResilientHandle;
pub use pool::create_all;
pub use registry::{Registration, ReplayReport, SubscriptionKey, SubscriptionRegistry};
pub use supervisor::ConnectionSupervisor;
pub use transport::{Connector, RawSocket, TransportSocket, TungsteniteConnector};
pub use types::{
    Backoff, CloseReason, ConnectionEvent, ConnectionState, Endpoint, LivenessConfig,
    ReconnectConfig, SupervisorConfig,
};
