//! Command line and environment configuration.

use std::time::Duration;

use alloy_primitives::Address;
use clap::Parser;

use mintdrip_connection::SupervisorConfig;
use mintdrip_funder::FundingPolicy;
use mintdrip_protocol::constants::{FLOW_MAINNET, HEARTBEAT_INTERVAL};

/// USDC.e on Flow EVM.
const DEFAULT_TOKEN: &str = "0x7f27352D5F83Db87a5A3E00f4B07Cc2138D8ee52";

#[derive(Parser, Debug, Clone)]
#[command(name = "mintdrip-faucet")]
#[command(about = "Tops up token mint recipients with native gas")]
pub struct Args {
    /// WebSocket RPC endpoint(s), comma separated
    #[arg(long, env = "WS_RPC_URL", value_delimiter = ',', required = true)]
    pub ws_rpc_url: Vec<String>,

    /// Hex private key of the funding wallet
    #[arg(long, env = "FUND_WALLET_PRIVATE_KEY", hide_env_values = true)]
    pub fund_wallet_private_key: String,

    /// Expected chain id of every endpoint
    #[arg(long, env = "CHAIN_ID", default_value_t = FLOW_MAINNET)]
    pub chain_id: u64,

    /// ERC-20 contract whose mints are watched
    #[arg(long, env = "TOKEN_ADDRESS", default_value = DEFAULT_TOKEN)]
    pub token_address: String,

    /// HTTP RPC used to send funding transactions (derived from the first
    /// WebSocket URL when unset)
    #[arg(long, env = "FUNDING_RPC_URL")]
    pub funding_rpc_url: Option<String>,

    /// Native amount sent per funding, in ether units
    #[arg(long, env = "FUND_AMOUNT", default_value = "0.05")]
    pub fund_amount: String,

    /// Recipients at or above this native balance are skipped
    #[arg(long, env = "BALANCE_THRESHOLD", default_value = "0.05")]
    pub balance_threshold: String,

    /// Explorer prefix for funding transaction links
    #[arg(long, env = "EXPLORER_TX_URL", default_value = "https://evm.flowscan.io/tx/")]
    pub explorer_tx_url: String,

    /// Seconds between block height heartbeats
    #[arg(long, env = "HEARTBEAT_SECS", default_value_t = HEARTBEAT_INTERVAL.as_secs())]
    pub heartbeat_secs: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Validated, immutable faucet settings.
#[derive(Clone)]
pub struct FaucetConfig {
    pub ws_urls: Vec<String>,
    pub funding_rpc_url: String,
    pub private_key: String,
    pub chain_id: u64,
    pub token: Address,
    pub policy: FundingPolicy,
    pub explorer_tx_url: String,
    pub heartbeat: Duration,
    pub supervisor: SupervisorConfig,
}

impl std::fmt::Debug for FaucetConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaucetConfig")
            .field("ws_urls", &self.ws_urls)
            .field("funding_rpc_url", &self.funding_rpc_url)
            .field("private_key", &"<redacted>")
            .field("chain_id", &self.chain_id)
            .field("token", &self.token)
            .field("policy", &self.policy)
            .field("heartbeat", &self.heartbeat)
            .finish_non_exhaustive()
    }
}

impl Args {
    pub fn validate(&self) -> Result<FaucetConfig, String> {
        let ws_urls: Vec<String> = self
            .ws_rpc_url
            .iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if ws_urls.is_empty() {
            return Err("WS_RPC_URL is required".to_string());
        }
        if let Some(bad) = ws_urls
            .iter()
            .find(|u| !(u.starts_with("ws://") || u.starts_with("wss://")))
        {
            return Err(format!("WS_RPC_URL entry is not a WebSocket URL: {bad}"));
        }

        if self.fund_wallet_private_key.trim().is_empty() {
            return Err("FUND_WALLET_PRIVATE_KEY is required".to_string());
        }

        let token: Address = self
            .token_address
            .trim()
            .parse()
            .map_err(|e| format!("TOKEN_ADDRESS is invalid: {e}"))?;

        let policy = FundingPolicy::from_ether(&self.balance_threshold, &self.fund_amount)
            .map_err(|e| e.to_string())?;

        if self.heartbeat_secs == 0 {
            return Err("HEARTBEAT_SECS must be greater than zero".to_string());
        }

        let funding_rpc_url = match &self.funding_rpc_url {
            Some(url) if !url.trim().is_empty() => url.trim().to_string(),
            _ => http_url_for(&ws_urls[0]),
        };

        Ok(FaucetConfig {
            ws_urls,
            funding_rpc_url,
            private_key: self.fund_wallet_private_key.trim().to_string(),
            chain_id: self.chain_id,
            token,
            policy,
            explorer_tx_url: self.explorer_tx_url.clone(),
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            supervisor: SupervisorConfig::default(),
        })
    }
}

/// `wss://` → `https://`, `ws://` → `http://`.
fn http_url_for(ws_url: &str) -> String {
    if let Some(rest) = ws_url.strip_prefix("wss://") {
        format!("https://{rest}")
    } else if let Some(rest) = ws_url.strip_prefix("ws://") {
        format!("http://{rest}")
    } else {
        ws_url.to_string()
    }
}
