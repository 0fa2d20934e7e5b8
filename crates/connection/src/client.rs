//! JSON-RPC client bound to one transport socket.
//!
//! Implements the request-response pattern with numeric id correlation and
//! routes `eth_subscription` pushes to per-subscription listeners.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, U256};
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, trace, warn};

use mintdrip_protocol::types::decode_quantity;
use mintdrip_protocol::{BlockTag, Incoming, LogFilter, Request, Response, RpcMethod, SubscriptionKind};

use crate::error::ConnectionError;
use crate::transport::TransportSocket;

/// Listener for the `result` payload of subscription notifications.
pub type SubscriptionCallback = Arc<dyn Fn(Value) + Send + Sync>;

struct Pending {
    tx: oneshot::Sender<Response>,
    /// Installed by the dispatch task before the response is delivered, so
    /// no notification can slip in between.
    on_subscribe: Option<SubscriptionCallback>,
}

type PendingMap = Arc<Mutex<HashMap<u64, Pending>>>;
type Listeners = Arc<Mutex<HashMap<String, SubscriptionCallback>>>;

/// Protocol client over a single [`TransportSocket`].
pub struct ProtocolClient {
    socket: Arc<TransportSocket>,
    next_id: AtomicU64,
    pending: PendingMap,
    listeners: Listeners,
    ready: AtomicBool,
    request_timeout: Duration,
    dispatch_abort: AbortHandle,
}

impl ProtocolClient {
    /// Binds a client to `socket`, consuming its inbound frames.
    pub fn bind(
        socket: Arc<TransportSocket>,
        inbound: mpsc::Receiver<String>,
        request_timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let listeners: Listeners = Arc::new(Mutex::new(HashMap::new()));
        let dispatch_task = tokio::spawn(dispatch(inbound, pending.clone(), listeners.clone()));
        let dispatch_abort = dispatch_task.abort_handle();
        tokio::spawn(watch_dispatch(dispatch_task, socket.clone(), pending.clone()));

        Self {
            socket,
            next_id: AtomicU64::new(1),
            pending,
            listeners,
            ready: AtomicBool::new(false),
            request_timeout,
            dispatch_abort,
        }
    }

    pub fn socket(&self) -> &Arc<TransportSocket> {
        &self.socket
    }

    /// `true` once [`wait_ready`](Self::wait_ready) succeeded and the socket
    /// is still open.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && self.socket.is_open()
    }

    /// Readiness handshake: `eth_chainId` must answer within `ready_timeout`
    /// with the expected chain.
    pub async fn wait_ready(
        &self,
        expected_chain_id: u64,
        ready_timeout: Duration,
    ) -> Result<(), ConnectionError> {
        let actual = tokio::time::timeout(ready_timeout, self.chain_id())
            .await
            .map_err(|_| ConnectionError::NotReady(ready_timeout))??;
        if actual != expected_chain_id {
            return Err(ConnectionError::ChainMismatch {
                expected: expected_chain_id,
                actual,
            });
        }
        self.ready.store(true, Ordering::Release);
        Ok(())
    }

    /// Sends a request and waits for its raw result.
    pub async fn call(&self, method: RpcMethod, params: Value) -> Result<Value, ConnectionError> {
        self.call_inner(method, params, None).await
    }

    /// Sends a request and deserializes its result.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: RpcMethod,
        params: Value,
    ) -> Result<T, ConnectionError> {
        let value = self.call(method, params).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn call_inner(
        &self,
        method: RpcMethod,
        params: Value,
        on_subscribe: Option<SubscriptionCallback>,
    ) -> Result<Value, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let text = serde_json::to_string(&Request::new(id, method, params))?;

        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(id, Pending { tx, on_subscribe });

        trace!(id, %method, "sending request");
        if let Err(e) = self.socket.send_text(text).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let result = tokio::time::timeout(self.request_timeout, rx).await;

        // Clean up pending entry on any exit path.
        self.pending.lock().await.remove(&id);

        match result {
            Ok(Ok(resp)) => Ok(resp.into_result()?),
            Ok(Err(_)) => Err(ConnectionError::Closed),
            Err(_) => Err(ConnectionError::Timeout),
        }
    }

    pub async fn chain_id(&self) -> Result<u64, ConnectionError> {
        let value = self.call(RpcMethod::ChainId, json!([])).await?;
        Ok(decode_quantity(value)?)
    }

    pub async fn get_block_number(&self) -> Result<u64, ConnectionError> {
        let value = self.call(RpcMethod::BlockNumber, json!([])).await?;
        Ok(decode_quantity(value)?)
    }

    pub async fn get_balance(
        &self,
        address: Address,
        block: BlockTag,
    ) -> Result<U256, ConnectionError> {
        self.request(RpcMethod::GetBalance, json!([address, block]))
            .await
    }

    /// Opens a subscription; `listener` receives every notification's
    /// `result`. Returns the node-assigned subscription id.
    pub async fn subscribe(
        &self,
        kind: SubscriptionKind,
        filter: Option<&LogFilter>,
        listener: SubscriptionCallback,
    ) -> Result<String, ConnectionError> {
        let params = match filter {
            Some(filter) => json!([kind, filter]),
            None => json!([kind]),
        };
        match self
            .call_inner(RpcMethod::Subscribe, params, Some(listener))
            .await?
        {
            Value::String(id) => {
                debug!(url = self.socket.url(), %kind, subscription = %id, "subscribed");
                Ok(id)
            }
            other => Err(ConnectionError::Protocol(format!(
                "subscription id must be a string, got {other}"
            ))),
        }
    }

    /// Cancels a subscription. The local listener is removed even if the
    /// node call fails.
    pub async fn unsubscribe(&self, subscription: &str) -> Result<bool, ConnectionError> {
        self.listeners.lock().await.remove(subscription);
        self.request(RpcMethod::Unsubscribe, json!([subscription]))
            .await
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.dispatch_abort.abort();
    }
}

/// Routes inbound frames until the socket's inbound stream ends.
async fn dispatch(mut inbound: mpsc::Receiver<String>, pending: PendingMap, listeners: Listeners) {
    while let Some(text) = inbound.recv().await {
        handle_text_message(&text, &pending, &listeners).await;
    }
    // Dropping the senders fails every in-flight request with `Closed`.
    pending.lock().await.clear();
    listeners.lock().await.clear();
}

/// A panicking listener kills the dispatch task. The socket is useless
/// without it, so it is terminated and the supervisor reconnects.
async fn watch_dispatch(task: JoinHandle<()>, socket: Arc<TransportSocket>, pending: PendingMap) {
    if let Err(e) = task.await {
        if e.is_panic() {
            error!(url = socket.url(), "dispatch task panicked, terminating socket");
            pending.lock().await.clear();
            socket.terminate();
        }
    }
}

async fn handle_text_message(text: &str, pending: &PendingMap, listeners: &Listeners) {
    let incoming = match Incoming::parse(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("failed to parse node message: {e}");
            return;
        }
    };

    match incoming {
        Incoming::Response(resp) => {
            let Some(entry) = pending.lock().await.remove(&resp.id) else {
                debug!(id = resp.id, "response for unknown request");
                return;
            };
            if let (Some(listener), Some(Value::String(subscription))) =
                (entry.on_subscribe, resp.result.as_ref())
            {
                listeners
                    .lock()
                    .await
                    .insert(subscription.clone(), listener);
            }
            let _ = entry.tx.send(resp);
        }
        Incoming::Notification(note) => {
            let listener = listeners
                .lock()
                .await
                .get(&note.params.subscription)
                .cloned();
            match listener {
                Some(listener) => listener(note.params.result),
                None => trace!(
                    subscription = %note.params.subscription,
                    "notification for unknown subscription"
                ),
            }
        }
    }
}
