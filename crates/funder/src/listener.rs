//! Mint listener: turns `Transfer` notifications into funding decisions.
//!
//! Every failure is contained per event. A bad log, a failed balance
//! lookup or a rejected transaction is logged and the next event is still
//! processed.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use alloy_primitives::utils::format_ether;
use alloy_primitives::{B256, U256};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mintdrip_connection::SubscriptionCallback;
use mintdrip_protocol::RpcLog;

use crate::balance::BalanceSource;
use crate::events::{TransferEvent, parse_transfer};
use crate::policy::FundingPolicy;
use crate::sender::FundingSender;

/// Number of recent log ids remembered for de-duplication.
const SEEN_CAPACITY: usize = 4096;

/// What happened to one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// Not a mint of interest (or not decodable).
    Ignored,
    /// Same log already handled via another endpoint.
    Duplicate,
    AlreadyFunded { balance: U256 },
    Funded { tx_hash: B256 },
    Failed,
}

/// Bounded FIFO set of processed log ids.
struct SeenLogs {
    order: VecDeque<(B256, u64)>,
    set: HashSet<(B256, u64)>,
}

impl SeenLogs {
    fn new() -> Self {
        Self {
            order: VecDeque::with_capacity(SEEN_CAPACITY),
            set: HashSet::with_capacity(SEEN_CAPACITY),
        }
    }

    /// Returns `false` if `id` was already present.
    fn insert(&mut self, id: (B256, u64)) -> bool {
        if !self.set.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(old) = self.order.pop_front() {
                self.set.remove(&old);
            }
        }
        true
    }
}

/// Funds recipients of token mints.
pub struct MintFunder<B, S> {
    balances: B,
    sender: S,
    policy: FundingPolicy,
    explorer_tx_url: String,
    seen: Mutex<SeenLogs>,
}

impl<B, S> MintFunder<B, S>
where
    B: BalanceSource + 'static,
    S: FundingSender + 'static,
{
    pub fn new(balances: B, sender: S, policy: FundingPolicy, explorer_tx_url: impl Into<String>) -> Self {
        Self {
            balances,
            sender,
            policy,
            explorer_tx_url: explorer_tx_url.into(),
            seen: Mutex::new(SeenLogs::new()),
        }
    }

    pub fn policy(&self) -> &FundingPolicy {
        &self.policy
    }

    /// Starts the worker and returns the subscription listener feeding it.
    ///
    /// Notifications are processed one at a time in arrival order, so two
    /// mints to the same address never race into a double funding. The
    /// worker exits once every clone of the listener is dropped.
    pub fn spawn_worker(self: Arc<Self>) -> (SubscriptionCallback, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
        let listener: SubscriptionCallback = Arc::new(move |value| {
            if tx.send(value).is_err() {
                warn!("funding worker stopped, dropping notification");
            }
        });
        let handle = tokio::spawn(async move {
            while let Some(value) = rx.recv().await {
                self.handle_notification(value).await;
            }
            debug!("funding worker stopped");
        });
        (listener, handle)
    }

    /// Handles one raw `logs` notification payload.
    pub async fn handle_notification(&self, value: serde_json::Value) -> FundingOutcome {
        let log: RpcLog = match serde_json::from_value(value) {
            Ok(log) => log,
            Err(e) => {
                warn!(error = %e, "malformed log notification");
                return FundingOutcome::Ignored;
            }
        };
        if log.removed {
            debug!(tx = ?log.transaction_hash, "log removed by reorg, ignoring");
            return FundingOutcome::Ignored;
        }
        match parse_transfer(&log) {
            Ok(event) => self.on_transfer(event).await,
            Err(e) => {
                warn!(error = %e, "undecodable transfer log");
                FundingOutcome::Ignored
            }
        }
    }

    /// Funds the recipient of a mint if their balance is below threshold.
    pub async fn on_transfer(&self, event: TransferEvent) -> FundingOutcome {
        if !event.is_mint() {
            return FundingOutcome::Ignored;
        }
        if let Some(id) = event.log_id() {
            if !self.seen.lock().await.insert(id) {
                debug!(tx = %id.0, log_index = id.1, "duplicate mint event");
                return FundingOutcome::Duplicate;
            }
        }

        info!(
            to = %event.to,
            amount = %event.amount,
            token = %event.token,
            tx = ?event.tx_hash,
            block = ?event.block_number,
            "mint detected"
        );

        let balance = match self.balances.balance_of(event.to).await {
            Ok(balance) => balance,
            Err(e) => {
                error!(to = %event.to, error = %e, "balance lookup failed");
                return FundingOutcome::Failed;
            }
        };

        if !self.policy.needs_funding(balance) {
            info!(
                to = %event.to,
                balance = %format_ether(balance),
                "recipient already funded"
            );
            return FundingOutcome::AlreadyFunded { balance };
        }

        match self.sender.send_funds(event.to, self.policy.amount).await {
            Ok(tx_hash) => {
                info!(
                    from = %event.from,
                    to = %event.to,
                    amount = %format_ether(self.policy.amount),
                    mint_tx = ?event.tx_hash,
                    funding_tx = %tx_hash,
                    explorer = %format!("{}{tx_hash}", self.explorer_tx_url),
                    "funded recipient"
                );
                FundingOutcome::Funded { tx_hash }
            }
            Err(e) => {
                error!(to = %event.to, error = %e, "funding failed");
                FundingOutcome::Failed
            }
        }
    }
}

impl<B, S> std::fmt::Debug for MintFunder<B, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MintFunder")
            .field("policy", &self.policy)
            .field("explorer_tx_url", &self.explorer_tx_url)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FunderError;
    use crate::events::tests::transfer_log;
    use alloy_primitives::Address;
    use alloy_primitives::utils::parse_ether;
    use futures_util::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Balances {
        by_address: HashMap<Address, U256>,
        lookups: AtomicUsize,
    }

    impl BalanceSource for Arc<Balances> {
        fn balance_of(&self, address: Address) -> BoxFuture<'_, Result<U256, FunderError>> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let result = self
                .by_address
                .get(&address)
                .copied()
                .ok_or(FunderError::NoEndpoint);
            Box::pin(async move { result })
        }
    }

    #[derive(Default)]
    struct Sender {
        sent: std::sync::Mutex<Vec<(Address, U256)>>,
        fail: bool,
    }

    impl FundingSender for Arc<Sender> {
        fn send_funds(&self, to: Address, amount: U256) -> BoxFuture<'_, Result<B256, FunderError>> {
            let result = if self.fail {
                Err(FunderError::Send("nonce too low".into()))
            } else {
                self.sent.lock().unwrap().push((to, amount));
                Ok(B256::repeat_byte(0x99))
            };
            Box::pin(async move { result })
        }
    }

    const A: Address = Address::repeat_byte(0xaa);
    const B: Address = Address::repeat_byte(0xbb);

    fn setup(fail: bool) -> (Arc<Balances>, Arc<Sender>, Arc<MintFunder<Arc<Balances>, Arc<Sender>>>) {
        let balances = Arc::new(Balances {
            by_address: HashMap::from([
                (A, parse_ether("0.04").unwrap()),
                (B, parse_ether("0.06").unwrap()),
            ]),
            lookups: AtomicUsize::new(0),
        });
        let sender = Arc::new(Sender {
            fail,
            ..Default::default()
        });
        let funder = Arc::new(MintFunder::new(
            balances.clone(),
            sender.clone(),
            FundingPolicy::default(),
            "https://evm.flowscan.io/tx/",
        ));
        (balances, sender, funder)
    }

    fn mint_to(to: Address, log_index: u64) -> serde_json::Value {
        serde_json::to_value(transfer_log(Address::ZERO, to, U256::from(1_000_000u64), log_index))
            .unwrap()
    }

    #[tokio::test]
    async fn low_balance_recipient_is_funded() {
        let (_, sender, funder) = setup(false);
        let outcome = funder.handle_notification(mint_to(A, 0)).await;
        assert_eq!(
            outcome,
            FundingOutcome::Funded {
                tx_hash: B256::repeat_byte(0x99)
            }
        );
        assert_eq!(
            sender.sent.lock().unwrap().as_slice(),
            &[(A, parse_ether("0.05").unwrap())]
        );
    }

    #[tokio::test]
    async fn funded_recipient_is_skipped() {
        let (_, sender, funder) = setup(false);
        let outcome = funder.handle_notification(mint_to(B, 0)).await;
        assert_eq!(
            outcome,
            FundingOutcome::AlreadyFunded {
                balance: parse_ether("0.06").unwrap()
            }
        );
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_mint_skips_balance_lookup() {
        let (balances, sender, funder) = setup(false);
        let transfer =
            serde_json::to_value(transfer_log(B, A, U256::from(5u64), 0)).unwrap();
        assert_eq!(
            funder.handle_notification(transfer).await,
            FundingOutcome::Ignored
        );
        assert_eq!(balances.lookups.load(Ordering::SeqCst), 0);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn same_log_from_two_endpoints_funds_once() {
        let (_, sender, funder) = setup(false);
        assert!(matches!(
            funder.handle_notification(mint_to(A, 7)).await,
            FundingOutcome::Funded { .. }
        ));
        assert_eq!(
            funder.handle_notification(mint_to(A, 7)).await,
            FundingOutcome::Duplicate
        );
        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_failure_does_not_stop_listener() {
        let (_, _, funder) = setup(true);
        assert_eq!(
            funder.handle_notification(mint_to(A, 0)).await,
            FundingOutcome::Failed
        );
        // Next event is still handled.
        assert!(matches!(
            funder.handle_notification(mint_to(B, 1)).await,
            FundingOutcome::AlreadyFunded { .. }
        ));
    }

    #[tokio::test]
    async fn lookup_failure_is_contained() {
        let (_, sender, funder) = setup(false);
        let unknown = Address::repeat_byte(0xcc);
        assert_eq!(
            funder.handle_notification(mint_to(unknown, 0)).await,
            FundingOutcome::Failed
        );
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_and_removed_logs_are_ignored() {
        let (_, _, funder) = setup(false);
        assert_eq!(
            funder.handle_notification(serde_json::json!({"foo": 1})).await,
            FundingOutcome::Ignored
        );

        let mut removed = mint_to(A, 0);
        removed["removed"] = serde_json::json!(true);
        assert_eq!(
            funder.handle_notification(removed).await,
            FundingOutcome::Ignored
        );
    }

    #[tokio::test]
    async fn worker_processes_listener_input() {
        let (_, sender, funder) = setup(false);
        let (listener, handle) = funder.spawn_worker();

        listener(mint_to(A, 0));
        listener(mint_to(B, 1));
        drop(listener);
        handle.await.unwrap();

        assert_eq!(sender.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn seen_logs_evicts_oldest() {
        let mut seen = SeenLogs::new();
        for i in 0..=SEEN_CAPACITY as u64 {
            assert!(seen.insert((B256::ZERO, i)));
        }
        assert_eq!(seen.set.len(), SEEN_CAPACITY);
        // The first id was evicted and is accepted again.
        assert!(seen.insert((B256::ZERO, 0)));
        assert!(!seen.insert((B256::ZERO, SEEN_CAPACITY as u64)));
    }
}
