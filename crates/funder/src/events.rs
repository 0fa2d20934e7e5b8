//! ERC-20 `Transfer` decoding.

use alloy_primitives::{Address, B256, U256};
use alloy_sol_types::{SolEvent, sol};
use chrono::{DateTime, Utc};

use mintdrip_protocol::{LogFilter, RpcLog};

use crate::error::FunderError;

sol! {
    /// Standard ERC-20 transfer; mints come from the zero address.
    #[derive(Debug)]
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// A decoded token transfer with its chain position.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferEvent {
    pub token: Address,
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub tx_hash: Option<B256>,
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub received_at: DateTime<Utc>,
}

impl TransferEvent {
    /// A mint is a transfer out of the zero address.
    pub fn is_mint(&self) -> bool {
        self.from == Address::ZERO
    }

    /// Identity of the underlying log, used to collapse copies delivered by
    /// several endpoints.
    pub fn log_id(&self) -> Option<(B256, u64)> {
        Some((self.tx_hash?, self.log_index?))
    }
}

/// Node-side filter for mints of `token`: `Transfer` with `from == 0`.
pub fn mint_filter(token: Address) -> LogFilter {
    LogFilter::new()
        .address(token)
        .event_signature(Transfer::SIGNATURE_HASH)
        .topic(1, Address::ZERO.into_word())
}

/// Decodes a subscription log into a [`TransferEvent`].
pub fn parse_transfer(log: &RpcLog) -> Result<TransferEvent, FunderError> {
    let topic0 = log
        .topics
        .first()
        .ok_or_else(|| FunderError::NotTransfer("log has no topics".into()))?;
    if *topic0 != Transfer::SIGNATURE_HASH {
        return Err(FunderError::NotTransfer(format!("unexpected topic0 {topic0}")));
    }

    let primitive = log
        .to_primitive()
        .ok_or_else(|| FunderError::Decode("too many topics".into()))?;
    let decoded =
        Transfer::decode_log(&primitive).map_err(|e| FunderError::Decode(e.to_string()))?;

    Ok(TransferEvent {
        token: log.address,
        from: decoded.from,
        to: decoded.to,
        amount: decoded.value,
        tx_hash: log.transaction_hash,
        block_number: log.block_number(),
        log_index: log.log_index(),
        received_at: Utc::now(),
    })
}
