//! Native balance lookups.

use alloy_primitives::{Address, U256};
use futures_util::future::BoxFuture;
use tracing::debug;

use mintdrip_connection::ResilientHandle;
use mintdrip_protocol::BlockTag;

use crate::error::FunderError;

/// Source of native balances at the latest block.
pub trait BalanceSource: Send + Sync {
    fn balance_of(&self, address: Address) -> BoxFuture<'_, Result<U256, FunderError>>;
}

impl BalanceSource for ResilientHandle {
    fn balance_of(&self, address: Address) -> BoxFuture<'_, Result<U256, FunderError>> {
        Box::pin(async move { Ok(self.get_balance(address, BlockTag::Latest).await?) })
    }
}

/// Asks each live handle in turn; the first answer wins.
impl BalanceSource for Vec<ResilientHandle> {
    fn balance_of(&self, address: Address) -> BoxFuture<'_, Result<U256, FunderError>> {
        Box::pin(async move {
            let mut last_err = FunderError::NoEndpoint;
            for handle in self.iter().filter(|h| !h.is_terminated()) {
                match handle.get_balance(address, BlockTag::Latest).await {
                    Ok(balance) => return Ok(balance),
                    Err(e) => {
                        debug!(url = %handle.endpoint().url, error = %e, "balance lookup failed, trying next endpoint");
                        last_err = e.into();
                    }
                }
            }
            Err(last_err)
        })
    }
}
