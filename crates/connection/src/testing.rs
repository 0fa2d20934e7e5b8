//! In-memory sockets and a scripted JSON-RPC node for tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use alloy_primitives::U256;
use futures_util::future::BoxFuture;
use futures_util::{sink, stream};
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

use mintdrip_protocol::{Notification, Request, RpcMethod};

use crate::error::ConnectionError;
use crate::transport::{Connector, RawSocket};

/// Test side of an in-memory socket.
pub(crate) struct Peer {
    pub to_client: mpsc::UnboundedSender<Result<Message, tungstenite::Error>>,
    pub from_client: mpsc::UnboundedReceiver<Message>,
}

/// A connected (client, peer) pair backed by unbounded channels.
pub(crate) fn socket_pair() -> (RawSocket, Peer) {
    let (to_client, client_rx) = mpsc::unbounded_channel();
    let (client_tx, from_client) = mpsc::unbounded_channel::<Message>();

    let source = stream::unfold(client_rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    let sink = sink::unfold(client_tx, |tx, msg: Message| async move {
        tx.send(msg)
            .map_err(|_| tungstenite::Error::ConnectionClosed)?;
        Ok::<_, tungstenite::Error>(tx)
    });

    let raw = RawSocket {
        sink: Box::pin(sink),
        source: Box::pin(source),
    };
    (raw, Peer {
        to_client,
        from_client,
    })
}

/// How a mock node answers.
#[derive(Debug, Clone)]
pub(crate) struct NodeBehavior {
    pub chain_id: u64,
    pub answer_pings: bool,
    /// Ignore every JSON-RPC request.
    pub mute: bool,
    pub reject_subscribe: bool,
    pub balance: U256,
    pub block_number: u64,
}

impl Default for NodeBehavior {
    fn default() -> Self {
        Self {
            chain_id: 747,
            answer_pings: true,
            mute: false,
            reject_subscribe: false,
            balance: U256::ZERO,
            block_number: 1000,
        }
    }
}

/// Control and observation handle for one mock node connection.
#[derive(Clone)]
pub(crate) struct PeerHandle {
    kill: CancellationToken,
    push: mpsc::UnboundedSender<(String, Value)>,
    subscribes: Arc<Mutex<Vec<Value>>>,
    unsubscribes: Arc<Mutex<Vec<String>>>,
}

impl PeerHandle {
    /// Drops the connection without a close frame.
    pub fn kill(&self) {
        self.kill.cancel();
    }

    /// Pushes an `eth_subscription` notification.
    pub fn notify(&self, subscription: &str, result: Value) {
        let _ = self.push.send((subscription.to_owned(), result));
    }

    /// Params of every `eth_subscribe` received, in order.
    pub fn subscribes(&self) -> Vec<Value> {
        self.subscribes.lock().unwrap().clone()
    }

    pub fn unsubscribes(&self) -> Vec<String> {
        self.unsubscribes.lock().unwrap().clone()
    }
}

/// Spawns a mock node behind an in-memory socket.
pub(crate) fn spawn_node(behavior: NodeBehavior) -> (RawSocket, PeerHandle) {
    let (raw, peer) = socket_pair();
    let (push_tx, push_rx) = mpsc::unbounded_channel();
    let handle = PeerHandle {
        kill: CancellationToken::new(),
        push: push_tx,
        subscribes: Arc::default(),
        unsubscribes: Arc::default(),
    };
    tokio::spawn(run_node(behavior, peer, push_rx, handle.clone()));
    (raw, handle)
}

async fn run_node(
    behavior: NodeBehavior,
    peer: Peer,
    mut push_rx: mpsc::UnboundedReceiver<(String, Value)>,
    handle: PeerHandle,
) {
    let Peer {
        to_client,
        mut from_client,
    } = peer;
    let mut next_sub = 0u32;

    loop {
        tokio::select! {
            _ = handle.kill.cancelled() => break,
            Some((sub, result)) = push_rx.recv() => {
                let text = serde_json::to_string(&Notification::new(sub, result)).unwrap();
                let _ = to_client.send(Ok(Message::Text(text.into())));
            }
            msg = from_client.recv() => match msg {
                Some(Message::Ping(data)) if behavior.answer_pings => {
                    let _ = to_client.send(Ok(Message::Pong(data)));
                }
                Some(Message::Text(text)) if !behavior.mute => {
                    let req: Request = serde_json::from_str(text.as_str()).unwrap();
                    let resp = match req.method {
                        RpcMethod::ChainId => req.reply(json!(format!("{:#x}", behavior.chain_id))),
                        RpcMethod::BlockNumber => {
                            req.reply(json!(format!("{:#x}", behavior.block_number)))
                        }
                        RpcMethod::GetBalance => req.reply(json!(behavior.balance)),
                        RpcMethod::Subscribe if behavior.reject_subscribe => {
                            req.reply_error(-32602, "invalid params")
                        }
                        RpcMethod::Subscribe => {
                            next_sub += 1;
                            handle.subscribes.lock().unwrap().push(req.params.clone());
                            req.reply(json!(format!("0xsub{next_sub}")))
                        }
                        RpcMethod::Unsubscribe => {
                            let id = req.params[0].as_str().unwrap_or_default().to_owned();
                            handle.unsubscribes.lock().unwrap().push(id);
                            req.reply(json!(true))
                        }
                        RpcMethod::Subscription => req.reply_error(-32601, "method not found"),
                    };
                    let text = serde_json::to_string(&resp).unwrap();
                    let _ = to_client.send(Ok(Message::Text(text.into())));
                }
                Some(Message::Close(_)) | None => break,
                Some(_) => {}
            }
        }
    }
}

/// What the next `open` call does.
#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Refuse,
    Accept(NodeBehavior),
}

/// Connector that follows a script, then repeats a fallback outcome.
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    opens: AtomicUsize,
    peers_tx: mpsc::UnboundedSender<PeerHandle>,
}

impl MockConnector {
    pub fn new(
        script: impl IntoIterator<Item = Outcome>,
        fallback: Outcome,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<PeerHandle>) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            opens: AtomicUsize::new(0),
            peers_tx,
        };
        (Arc::new(connector), peers_rx)
    }

    /// Number of `open` calls so far.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn open(&self, _url: &str) -> BoxFuture<'static, Result<RawSocket, ConnectionError>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match outcome {
            Outcome::Refuse => Box::pin(async {
                Err(ConnectionError::Ws(tungstenite::Error::Io(
                    std::io::ErrorKind::ConnectionRefused.into(),
                )))
            }),
            Outcome::Accept(behavior) => {
                let (raw, peer) = spawn_node(behavior);
                let _ = self.peers_tx.send(peer);
                Box::pin(async move { Ok(raw) })
            }
        }
    }
}
