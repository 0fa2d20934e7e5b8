//! Registry of subscription intents, replayed on every new socket.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Mutex;
use tracing::{info, warn};

use mintdrip_protocol::{LogFilter, SubscriptionKind};

use crate::client::{ProtocolClient, SubscriptionCallback};

/// Identity of a registration. Registrations with equal keys share one
/// node subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionKey {
    pub kind: SubscriptionKind,
    pub filter: Option<LogFilter>,
}

impl SubscriptionKey {
    pub fn new(kind: SubscriptionKind, filter: Option<LogFilter>) -> Self {
        Self { kind, filter }
    }

    pub fn logs(filter: LogFilter) -> Self {
        Self::new(SubscriptionKind::Logs, Some(filter))
    }
}

/// Result of [`SubscriptionRegistry::register`].
pub enum Registration {
    /// First listener for this key; subscribe with the returned fan-out
    /// callback.
    New(SubscriptionCallback),
    /// Added to an existing record; nothing to send.
    Joined,
}

/// Outcome of a replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub restored: usize,
    pub failed: usize,
}

struct Record {
    listeners: Arc<RwLock<Vec<SubscriptionCallback>>>,
    dispatcher: SubscriptionCallback,
    remote_id: Option<String>,
}

impl Record {
    fn new(listener: SubscriptionCallback) -> Self {
        let listeners = Arc::new(RwLock::new(vec![listener]));
        let dispatcher: SubscriptionCallback = {
            let listeners = listeners.clone();
            Arc::new(move |value| {
                let snapshot = listeners
                    .read()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .clone();
                for listener in snapshot {
                    listener(value.clone());
                }
            })
        };
        Self {
            listeners,
            dispatcher,
            remote_id: None,
        }
    }
}

/// Per-supervisor record of what the application subscribed to.
#[derive(Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, Record>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `listener` under `key`.
    pub async fn register(&self, key: SubscriptionKey, listener: SubscriptionCallback) -> Registration {
        let mut entries = self.entries.lock().await;
        if let Some(record) = entries.get(&key) {
            record
                .listeners
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .push(listener);
            return Registration::Joined;
        }
        let record = Record::new(listener);
        let dispatcher = record.dispatcher.clone();
        entries.insert(key, record);
        Registration::New(dispatcher)
    }

    /// Records the live subscription id for `key`.
    pub async fn set_remote_id(&self, key: &SubscriptionKey, id: Option<String>) {
        if let Some(record) = self.entries.lock().await.get_mut(key) {
            record.remote_id = id;
        }
    }

    pub async fn remote_id(&self, key: &SubscriptionKey) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(key)
            .and_then(|r| r.remote_id.clone())
    }

    /// Removes `key` and all of its listeners. Returns the live subscription
    /// id, if one was bound.
    pub async fn unregister(&self, key: &SubscriptionKey) -> Option<String> {
        self.entries
            .lock()
            .await
            .remove(key)
            .and_then(|r| r.remote_id)
    }

    /// Forgets every live subscription id (the socket they belonged to is gone).
    pub async fn clear_remote_ids(&self) {
        for record in self.entries.lock().await.values_mut() {
            record.remote_id = None;
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    pub async fn keys(&self) -> Vec<SubscriptionKey> {
        self.entries.lock().await.keys().cloned().collect()
    }

    /// Reissues every record on `client`. A failing entry is logged and
    /// counted; the rest are still replayed.
    pub async fn replay_all(&self, client: &ProtocolClient) -> ReplayReport {
        let snapshot: Vec<(SubscriptionKey, SubscriptionCallback)> = self
            .entries
            .lock()
            .await
            .iter()
            .map(|(key, record)| (key.clone(), record.dispatcher.clone()))
            .collect();

        let mut report = ReplayReport::default();
        for (key, dispatcher) in snapshot {
            match client
                .subscribe(key.kind, key.filter.as_ref(), dispatcher)
                .await
            {
                Ok(id) => {
                    self.set_remote_id(&key, Some(id)).await;
                    report.restored += 1;
                }
                Err(e) => {
                    warn!(url = client.socket().url(), kind = %key.kind, "failed to restore subscription: {e}");
                    self.set_remote_id(&key, None).await;
                    report.failed += 1;
                }
            }
        }

        if report.restored + report.failed > 0 {
            info!(
                url = client.socket().url(),
                restored = report.restored,
                failed = report.failed,
                "subscriptions replayed"
            );
        }
        report
    }
}
