//! Connection supervisor: owns one socket at a time and keeps it alive.
//!
//! Drives `Idle → Connecting → Ready → Degraded → Connecting … | Terminated`
//! with a bounded attempt counter, and replays the subscription registry on
//! every new socket.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::ProtocolClient;
use crate::error::ConnectionError;
use crate::handle::ResilientHandle;
use crate::liveness::liveness_monitor;
use crate::registry::SubscriptionRegistry;
use crate::transport::{Connector, TransportSocket};
use crate::types::{ConnectionEvent, ConnectionState, Endpoint, SupervisorConfig};

/// State shared by a supervisor, its background tasks and its handles.
pub(crate) struct Shared {
    pub(crate) endpoint: Endpoint,
    config: SupervisorConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
    /// Set by the first `connect`; later calls wait for that attempt instead
    /// of opening a second socket.
    started: AtomicBool,
    /// Never reset once set.
    terminated: AtomicBool,
    /// Cancels backoff sleeps, pending opens and every per-socket token.
    stop: CancellationToken,
    /// Currently bound client. Also the lock that serialises registration
    /// against replay.
    pub(crate) client: Mutex<Option<Arc<ProtocolClient>>>,
    pub(crate) registry: SubscriptionRegistry,
    /// Cancels the liveness monitor of the current socket.
    teardown: Mutex<Option<CancellationToken>>,
    events_tx: mpsc::Sender<ConnectionEvent>,
    events_rx: Mutex<Option<mpsc::Receiver<ConnectionEvent>>>,
}

impl Shared {
    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) async fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Waits until the in-flight connection attempt settles. `true` if it
    /// ended `Ready`.
    async fn settled(&self) -> bool {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|s| matches!(s, ConnectionState::Ready | ConnectionState::Terminated))
            .await
        {
            Ok(state) => *state == ConnectionState::Ready,
            Err(_) => false,
        }
    }

    pub(crate) async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Updates the state and emits an event. `Terminated` is final.
    async fn set_state(&self, new_state: ConnectionState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Terminated || *state == new_state {
                return false;
            }
            *state = new_state.clone();
            true
        });
        if !changed {
            return;
        }
        debug!(url = %self.endpoint.url, state = ?new_state, "state changed");
        self.emit(ConnectionEvent::StateChanged {
            url: self.endpoint.url.clone(),
            state: new_state,
        });
    }

    /// Events are best-effort: a full or untaken channel drops them.
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events_tx.try_send(event);
    }

    async fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
        self.stop.cancel();
        self.set_state(ConnectionState::Terminated).await;
    }

    pub(crate) async fn shutdown(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Closing).await;
        self.stop.cancel();
        if let Some(client) = self.client.lock().await.take() {
            client.socket().close();
        }
        self.registry.clear_remote_ids().await;
        self.set_state(ConnectionState::Terminated).await;
        info!(url = %self.endpoint.url, "connection shut down");
    }
}

/// Owns the socket lifecycle for one endpoint.
pub struct ConnectionSupervisor {
    shared: Arc<Shared>,
}

impl ConnectionSupervisor {
    pub fn new(endpoint: Endpoint, config: SupervisorConfig, connector: Arc<dyn Connector>) -> Self {
        let (events_tx, events_rx) = mpsc::channel(64);
        let shared = Shared {
            endpoint,
            config,
            connector,
            state: watch::Sender::new(ConnectionState::Idle),
            attempts: AtomicU32::new(0),
            started: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            stop: CancellationToken::new(),
            client: Mutex::new(None),
            registry: SubscriptionRegistry::new(),
            teardown: Mutex::new(None),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        };
        Self {
            shared: Arc::new(shared),
        }
    }

    /// Connects, retrying with backoff until the socket is ready or the
    /// attempt limit is reached.
    ///
    /// `None` means the endpoint is permanently unavailable. Only the first
    /// call drives the connect loop; later calls (including while a
    /// reconnect is in progress) wait for the outcome.
    pub async fn connect(&self) -> Option<ResilientHandle> {
        if self.shared.is_terminated() {
            return None;
        }
        let ready = if self.shared.started.swap(true, Ordering::SeqCst) {
            self.shared.settled().await
        } else {
            establish(self.shared.clone()).await
        };
        ready.then(|| self.handle())
    }

    /// Logical handle that stays valid across socket replacement.
    pub fn handle(&self) -> ResilientHandle {
        ResilientHandle::new(self.shared.clone())
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.shared.endpoint
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.state().await
    }

    /// Consecutive failed attempts in the current failure episode.
    pub fn attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.is_terminated()
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.shared.registry
    }

    /// Takes the event receiver. Can only be called once.
    pub async fn take_events(&self) -> Option<mpsc::Receiver<ConnectionEvent>> {
        self.shared.take_events().await
    }

    /// Stops for good: closes the socket and cancels all timers.
    pub async fn shutdown(&self) {
        self.shared.shutdown().await;
    }
}

/// Bounded connect loop. Returns `true` once a socket is ready.
///
/// Boxed to break the recursive type cycle with [`watch_connection`].
fn establish(shared: Arc<Shared>) -> Pin<Box<dyn Future<Output = bool> + Send>> {
    Box::pin(async move {
        let url = shared.endpoint.url.clone();
        let max_attempts = shared.config.reconnect.max_attempts;

        loop {
            if shared.is_terminated() {
                return false;
            }

            let attempts = shared.attempts.load(Ordering::SeqCst);
            if attempts >= max_attempts {
                error!(url = %url, attempts, "reconnection attempts exhausted, giving up on endpoint");
                shared.terminate().await;
                return false;
            }

            shared
                .set_state(ConnectionState::Connecting {
                    attempt: attempts + 1,
                })
                .await;
            info!(url = %url, attempt = attempts + 1, "connecting");

            match open_once(&shared).await {
                Ok(socket) => {
                    tokio::spawn(watch_connection(shared.clone(), socket));
                    return true;
                }
                Err(ConnectionError::Terminated) => return false,
                Err(e) => {
                    warn!(url = %url, attempt = attempts + 1, error = %e, "connection attempt failed");
                    if !record_failure(&shared).await {
                        return false;
                    }
                }
            }
        }
    })
}

/// Counts a failed attempt and waits the backoff delay. Returns `false` if
/// the supervisor was stopped while waiting.
async fn record_failure(shared: &Shared) -> bool {
    let attempt = shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
    if attempt >= shared.config.reconnect.max_attempts {
        return true;
    }

    let delay = shared.config.reconnect.delay_for_attempt(attempt);
    let delay_secs = delay.as_secs_f64();
    shared.emit(ConnectionEvent::Reconnecting {
        url: shared.endpoint.url.clone(),
        attempt,
        next_retry_secs: delay_secs,
    });
    info!(
        url = %shared.endpoint.url,
        attempt,
        delay_secs = format_args!("{delay_secs:.1}"),
        "reconnecting"
    );

    tokio::select! {
        _ = shared.stop.cancelled() => {
            debug!(url = %shared.endpoint.url, "reconnect cancelled");
            false
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// One attempt: open, start liveness, handshake, bind, replay.
async fn open_once(shared: &Arc<Shared>) -> Result<Arc<TransportSocket>, ConnectionError> {
    let url = shared.endpoint.url.clone();

    let raw = tokio::select! {
        _ = shared.stop.cancelled() => return Err(ConnectionError::Terminated),
        raw = shared.connector.open(&url) => raw?,
    };
    let (socket, inbound) = TransportSocket::from_raw(url.clone(), raw);
    let socket = Arc::new(socket);
    debug!(url = %url, "socket opened");

    let teardown = shared.stop.child_token();
    tokio::spawn(liveness_monitor(
        socket.clone(),
        shared.config.liveness.clone(),
        teardown.clone(),
    ));

    let client = Arc::new(ProtocolClient::bind(
        socket.clone(),
        inbound,
        shared.config.request_timeout,
    ));
    let ready = tokio::select! {
        _ = shared.stop.cancelled() => Err(ConnectionError::Terminated),
        ready = client.wait_ready(shared.endpoint.chain_id, shared.config.reconnect.ready_timeout) => ready,
    };
    if let Err(e) = ready {
        teardown.cancel();
        socket.terminate();
        return Err(e);
    }

    let mut bound = shared.client.lock().await;
    if shared.is_terminated() {
        teardown.cancel();
        socket.close();
        return Err(ConnectionError::Terminated);
    }
    *bound = Some(client.clone());
    shared.attempts.store(0, Ordering::SeqCst);
    if let Some(previous) = shared.teardown.lock().await.replace(teardown) {
        previous.cancel();
    }

    let report = shared.registry.replay_all(&client).await;
    shared.emit(ConnectionEvent::Resubscribed {
        url: url.clone(),
        restored: report.restored,
        failed: report.failed,
    });
    shared.set_state(ConnectionState::Ready).await;
    drop(bound);

    info!(url = %url, subscriptions = report.restored, "connection ready");
    Ok(socket)
}

/// Waits for `socket` to close, tears it down and reconnects unless the
/// supervisor has been terminated.
fn watch_connection(
    shared: Arc<Shared>,
    socket: Arc<TransportSocket>,
) -> Pin<Box<dyn Future<Output = ()> + Send>> {
    Box::pin(async move {
        let reason = tokio::select! {
            reason = socket.closed() => reason,
            _ = shared.stop.cancelled() => return,
        };

        if let Some(token) = shared.teardown.lock().await.take() {
            token.cancel();
        }
        {
            let mut bound = shared.client.lock().await;
            if bound
                .as_ref()
                .is_some_and(|client| Arc::ptr_eq(client.socket(), &socket))
            {
                *bound = None;
            }
        }
        shared.registry.clear_remote_ids().await;

        if shared.is_terminated() {
            return;
        }

        warn!(url = %shared.endpoint.url, %reason, "connection lost");
        shared.set_state(ConnectionState::Degraded).await;
        if record_failure(&shared).await {
            establish(shared).await;
        }
    })
}
