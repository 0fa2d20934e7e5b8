//! Funding transactions.

use alloy::network::EthereumWallet;
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::transports::http::reqwest::Url;
use alloy_primitives::{Address, B256, U256};
use futures_util::future::BoxFuture;
use tracing::debug;

use crate::error::FunderError;

/// Sends native currency to a recipient and returns the transaction hash.
pub trait FundingSender: Send + Sync {
    fn send_funds(&self, to: Address, amount: U256) -> BoxFuture<'_, Result<B256, FunderError>>;
}

/// Wallet-backed sender over an HTTP provider.
pub struct WalletSender {
    provider: DynProvider,
    from: Address,
}

impl WalletSender {
    /// Builds a signing provider for `rpc_url` from a hex private key.
    pub fn connect(rpc_url: &str, private_key: &str) -> Result<Self, FunderError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| FunderError::InvalidKey(format!("{e}")))?;
        let from = signer.address();
        let url: Url = rpc_url
            .parse()
            .map_err(|e| FunderError::Send(format!("invalid funding RPC URL {rpc_url}: {e}")))?;

        let wallet = EthereumWallet::from(signer);
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(url)
            .erased();
        Ok(Self { provider, from })
    }

    /// Address the funds are sent from.
    pub fn address(&self) -> Address {
        self.from
    }
}

impl FundingSender for WalletSender {
    fn send_funds(&self, to: Address, amount: U256) -> BoxFuture<'_, Result<B256, FunderError>> {
        Box::pin(async move {
            let tx = TransactionRequest::default()
                .from(self.from)
                .to(to)
                .value(amount);
            debug!(%to, %amount, "sending funding transaction");
            let pending = self
                .provider
                .send_transaction(tx)
                .await
                .map_err(|e| FunderError::Send(e.to_string()))?;
            Ok(*pending.tx_hash())
        })
    }
}
