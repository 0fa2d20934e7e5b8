use alloy_primitives::U256;
use alloy_primitives::utils::parse_ether;

use crate::error::FunderError;

/// Who gets funded, and with how much.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingPolicy {
    /// Recipients at or above this native balance (wei) are skipped.
    pub threshold: U256,
    /// Amount sent per funding transaction (wei).
    pub amount: U256,
}

impl Default for FundingPolicy {
    fn default() -> Self {
        // 0.05 native units for both.
        let fifty_milli = U256::from(50_000_000_000_000_000u64);
        Self {
            threshold: fifty_milli,
            amount: fifty_milli,
        }
    }
}

impl FundingPolicy {
    pub fn new(threshold: U256, amount: U256) -> Self {
        Self { threshold, amount }
    }

    /// Parses decimal ether strings such as `"0.05"`.
    pub fn from_ether(threshold: &str, amount: &str) -> Result<Self, FunderError> {
        let threshold = parse_ether(threshold)
            .map_err(|e| FunderError::InvalidAmount(format!("threshold {threshold:?}: {e}")))?;
        let amount = parse_ether(amount)
            .map_err(|e| FunderError::InvalidAmount(format!("amount {amount:?}: {e}")))?;
        Ok(Self { threshold, amount })
    }

    pub fn needs_funding(&self, balance: U256) -> bool {
        balance < self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ether(s: &str) -> U256 {
        parse_ether(s).unwrap()
    }

    #[test]
    fn default_is_five_hundredths() {
        let policy = FundingPolicy::default();
        assert_eq!(policy.threshold, ether("0.05"));
        assert_eq!(policy.amount, ether("0.05"));
    }

    #[test]
    fn below_threshold_is_funded() {
        let policy = FundingPolicy::default();
        assert!(policy.needs_funding(ether("0.04")));
        assert!(policy.needs_funding(U256::ZERO));
    }

    #[test]
    fn at_or_above_threshold_is_skipped() {
        let policy = FundingPolicy::default();
        assert!(!policy.needs_funding(ether("0.05")));
        assert!(!policy.needs_funding(ether("0.06")));
    }

    #[test]
    fn from_ether_parses_and_rejects() {
        let policy = FundingPolicy::from_ether("0.1", "0.02").unwrap();
        assert_eq!(policy.threshold, ether("0.1"));
        assert_eq!(policy.amount, ether("0.02"));
        assert!(matches!(
            FundingPolicy::from_ether("lots", "0.02"),
            Err(FunderError::InvalidAmount(msg)) if msg.starts_with("threshold")
        ));
        assert!(matches!(
            FundingPolicy::from_ether("0.1", "abc"),
            Err(FunderError::InvalidAmount(msg)) if msg.starts_with("amount")
        ));
    }
}
