use alloy_primitives::{Address, B256, Bytes, Log, U64};
use serde::{Deserialize, Serialize, Serializer};

/// Block selector for state queries such as `eth_getBalance`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    #[default]
    Latest,
    Pending,
    Earliest,
    Number(u64),
}

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Latest => f.write_str("latest"),
            Self::Pending => f.write_str("pending"),
            Self::Earliest => f.write_str("earliest"),
            Self::Number(n) => write!(f, "{n:#x}"),
        }
    }
}

impl Serialize for BlockTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Event type of an `eth_subscribe` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SubscriptionKind {
    NewHeads,
    Logs,
    NewPendingTransactions,
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewHeads => f.write_str("newHeads"),
            Self::Logs => f.write_str("logs"),
            Self::NewPendingTransactions => f.write_str("newPendingTransactions"),
        }
    }
}

/// Filter criteria for a `logs` subscription.
///
/// Positional topics: `None` matches anything at that position.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LogFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub address: Vec<Address>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<Option<B256>>,
}

impl LogFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a contract address to match.
    pub fn address(mut self, address: Address) -> Self {
        if !self.address.contains(&address) {
            self.address.push(address);
        }
        self
    }

    /// Sets topic0 (the event signature hash).
    pub fn event_signature(self, signature: B256) -> Self {
        self.topic(0, signature)
    }

    /// Sets the topic at `position`, padding earlier positions with wildcards.
    pub fn topic(mut self, position: usize, value: B256) -> Self {
        if self.topics.len() <= position {
            self.topics.resize(position + 1, None);
        }
        self.topics[position] = Some(value);
        self
    }
}

/// Log object as delivered by `eth_subscribe("logs")`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub transaction_hash: Option<B256>,
    #[serde(default)]
    pub log_index: Option<U64>,
    #[serde(default)]
    pub removed: bool,
}

impl RpcLog {
    /// Converts to a primitive log for ABI decoding. `None` if the topic
    /// count is invalid.
    pub fn to_primitive(&self) -> Option<Log> {
        Log::new(self.address, self.topics.clone(), self.data.clone())
    }

    pub fn block_number(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }

    pub fn log_index(&self) -> Option<u64> {
        self.log_index.map(|n| n.to::<u64>())
    }
}

/// Decodes a hex quantity (`"0x2eb"`) into a `u64`.
pub fn decode_quantity(value: serde_json::Value) -> Result<u64, serde_json::Error> {
    let quantity: U64 = serde_json::from_value(value)?;
    Ok(quantity.to::<u64>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn block_tag_wire_format() {
        assert_eq!(serde_json::to_value(BlockTag::Latest).unwrap(), json!("latest"));
        assert_eq!(serde_json::to_value(BlockTag::Number(255)).unwrap(), json!("0xff"));
    }

    #[test]
    fn subscription_kind_wire_format() {
        assert_eq!(serde_json::to_value(SubscriptionKind::NewHeads).unwrap(), json!("newHeads"));
        assert_eq!(serde_json::to_value(SubscriptionKind::Logs).unwrap(), json!("logs"));
        assert_eq!(SubscriptionKind::Logs.to_string(), "logs");
    }

    #[test]
    fn log_filter_pads_topics() {
        let sig = B256::repeat_byte(0xaa);
        let to = B256::repeat_byte(0xbb);
        let filter = LogFilter::new()
            .address(Address::repeat_byte(1))
            .event_signature(sig)
            .topic(2, to);
        assert_eq!(filter.topics, vec![Some(sig), None, Some(to)]);

        let value = serde_json::to_value(&filter).unwrap();
        assert!(value["topics"][1].is_null());
        assert_eq!(value["address"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn log_filter_identity_ignores_duplicate_address() {
        let a = LogFilter::new().address(Address::ZERO).address(Address::ZERO);
        let b = LogFilter::new().address(Address::ZERO);
        assert_eq!(a, b);
    }

    #[test]
    fn empty_filter_serializes_to_empty_object() {
        assert_eq!(serde_json::to_value(LogFilter::new()).unwrap(), json!({}));
    }

    #[test]
    fn rpc_log_from_node_json() {
        let raw = json!({
            "address": "0x7f27352d5f83db87a5a3e00f4b07cc2138d8ee52",
            "topics": [format!("{}", B256::repeat_byte(0x11))],
            "data": "0x01",
            "blockNumber": "0x1b4",
            "transactionHash": format!("{}", B256::repeat_byte(0x22)),
            "logIndex": "0x3",
            "removed": false
        });
        let log: RpcLog = serde_json::from_value(raw).unwrap();
        assert_eq!(log.block_number(), Some(436));
        assert_eq!(log.log_index(), Some(3));
        assert_eq!(log.data.as_ref(), &[0x01]);
        assert!(log.to_primitive().is_some());
    }

    #[test]
    fn decode_quantity_hex() {
        assert_eq!(decode_quantity(json!("0x2eb")).unwrap(), 747);
        assert!(decode_quantity(json!("nope")).is_err());
    }
}
