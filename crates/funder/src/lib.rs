//! Mint-transfer funding.
//!
//! Decodes ERC-20 `Transfer` logs, recognises mints (transfers from the zero
//! address) and sends a fixed amount of native currency to recipients whose
//! balance is below a threshold.

pub mod balance;
pub mod error;
pub mod events;
pub mod listener;
pub mod policy;
pub mod sender;

pub use balance::BalanceSource;
pub use error::FunderError;
pub use events::{TransferEvent, mint_filter, parse_transfer};
pub use listener::{FundingOutcome, MintFunder};
pub use policy::FundingPolicy;
pub use sender::{FundingSender, WalletSender};
