//! Stable logical handle over a supervised connection.

use std::sync::Arc;

use alloy_primitives::{Address, U256};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use mintdrip_protocol::{BlockTag, LogFilter, SubscriptionKind};

use crate::client::{ProtocolClient, SubscriptionCallback};
use crate::error::ConnectionError;
use crate::registry::{Registration, SubscriptionKey};
use crate::supervisor::Shared;
use crate::types::{ConnectionEvent, ConnectionState, Endpoint};

/// Caller-facing view of a supervised connection.
///
/// Stays valid while the underlying socket is replaced. Every `register`
/// goes through the supervisor's registry, so subscriptions survive
/// reconnects without the caller doing anything.
#[derive(Clone)]
pub struct ResilientHandle {
    shared: Arc<Shared>,
}

impl ResilientHandle {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.state().await
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    /// Takes the supervisor's event receiver. Can only be called once per
    /// supervisor.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.shared.take_events().await
    }

    async fn client(&self) -> Result<Arc<ProtocolClient>, ConnectionError> {
        if self.shared.is_terminated() {
            return Err(ConnectionError::Terminated);
        }
        self.shared
            .client
            .lock()
            .await
            .clone()
            .ok_or(ConnectionError::Closed)
    }

    /// Registers a subscription and, when connected, opens it right away.
    ///
    /// The registration is kept even if the live subscribe fails; it is
    /// retried on the next reconnect. While disconnected the call only
    /// records the intent.
    pub async fn register(
        &self,
        kind: SubscriptionKind,
        filter: Option<LogFilter>,
        listener: SubscriptionCallback,
    ) -> Result<SubscriptionKey, ConnectionError> {
        if self.shared.is_terminated() {
            return Err(ConnectionError::Terminated);
        }
        let key = SubscriptionKey::new(kind, filter);
        let bound = self.shared.client.lock().await;

        let dispatcher = match self.shared.registry.register(key.clone(), listener).await {
            Registration::Joined => return Ok(key),
            Registration::New(dispatcher) => dispatcher,
        };

        let Some(client) = bound.as_ref() else {
            debug!(url = %self.shared.endpoint.url, %kind, "not connected, subscription deferred");
            return Ok(key);
        };

        match client.subscribe(kind, key.filter.as_ref(), dispatcher).await {
            Ok(id) => {
                self.shared.registry.set_remote_id(&key, Some(id)).await;
                Ok(key)
            }
            Err(e) => {
                warn!(url = %self.shared.endpoint.url, %kind, error = %e, "subscribe failed, kept for replay");
                Err(e)
            }
        }
    }

    /// `true` if `key` currently has a live subscription on the node.
    pub async fn is_subscribed(&self, key: &SubscriptionKey) -> bool {
        self.shared.registry.remote_id(key).await.is_some()
    }

    /// Removes a registration and cancels its live subscription.
    pub async fn unregister(&self, key: &SubscriptionKey) -> Result<(), ConnectionError> {
        let bound = self.shared.client.lock().await;
        let Some(id) = self.shared.registry.unregister(key).await else {
            return Ok(());
        };
        if let Some(client) = bound.as_ref() {
            client.unsubscribe(&id).await?;
        }
        Ok(())
    }

    pub async fn get_balance(
        &self,
        address: Address,
        block: BlockTag,
    ) -> Result<U256, ConnectionError> {
        self.client().await?.get_balance(address, block).await
    }

    pub async fn get_block_number(&self) -> Result<u64, ConnectionError> {
        self.client().await?.get_block_number().await
    }

    pub async fn chain_id(&self) -> Result<u64, ConnectionError> {
        self.client().await?.chain_id().await
    }

    /// Shuts the supervisor down. Affects every clone of this handle.
    pub async fn shutdown(&self) {
        self.shared.shutdown().await;
    }
}

impl std::fmt::Debug for ResilientHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientHandle")
            .field("endpoint", &self.shared.endpoint)
            .field("terminated", &self.shared.is_terminated())
            .finish()
    }
}
