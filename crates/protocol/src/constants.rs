use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often the liveness monitor pings an open socket.
pub const KEEP_ALIVE_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// How long a ping may stay unanswered before the socket is terminated.
pub const EXPECTED_PONG_BACK: Duration = Duration::from_secs(15);

/// Consecutive failed attempts after which a supervisor gives up for good.
pub const MAX_RECONNECTION_ATTEMPTS: u32 = 5;

/// Fixed delay between a failed attempt and the next one.
pub const RECONNECTION_DELAY: Duration = Duration::from_millis(5000);

/// Upper bound for the readiness handshake after a socket opens.
pub const READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for a single JSON-RPC request/response exchange.
pub const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum accepted WebSocket message size (16 MB). Block headers and log
/// batches stay far below this.
pub const WS_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Interval of the operator-facing block height heartbeat.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

/// JSON-RPC protocol version tag.
pub const JSONRPC_VERSION: &str = "2.0";

/// Flow EVM mainnet chain id.
pub const FLOW_MAINNET: u64 = 747;

/// JSON-RPC method names used on the node connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RpcMethod {
    #[serde(rename = "eth_chainId")]
    ChainId,
    #[serde(rename = "eth_blockNumber")]
    BlockNumber,
    #[serde(rename = "eth_getBalance")]
    GetBalance,
    #[serde(rename = "eth_subscribe")]
    Subscribe,
    #[serde(rename = "eth_unsubscribe")]
    Unsubscribe,
    /// Server-pushed subscription notification.
    #[serde(rename = "eth_subscription")]
    Subscription,
}

impl RpcMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChainId => "eth_chainId",
            Self::BlockNumber => "eth_blockNumber",
            Self::GetBalance => "eth_getBalance",
            Self::Subscribe => "eth_subscribe",
            Self::Unsubscribe => "eth_unsubscribe",
            Self::Subscription => "eth_subscription",
        }
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
