//! WebSocket read pump: forwards text frames in arrival order.

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use mintdrip_protocol::constants::WS_MAX_MESSAGE_SIZE;

use crate::types::CloseReason;

/// Reads frames from the WebSocket until it closes.
///
/// Text frames go to `inbound` unchanged; every pong stamps `pongs` for the
/// liveness monitor; pings are answered through `write_tx`. Returns why the
/// stream stopped.
pub(crate) async fn read_pump<S>(
    mut read: S,
    inbound: mpsc::Sender<String>,
    pongs: watch::Sender<Instant>,
    write_tx: mpsc::Sender<tungstenite::Message>,
    cancel: CancellationToken,
) -> CloseReason
where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return CloseReason::Terminated,

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => match msg {
                        tungstenite::Message::Text(text) => {
                            let text = text.as_str();
                            if text.len() > WS_MAX_MESSAGE_SIZE {
                                warn!("message too large ({} bytes), dropping", text.len());
                                continue;
                            }
                            if inbound.send(text.to_owned()).await.is_err() {
                                trace!("no inbound consumer, dropping frame");
                            }
                        }
                        tungstenite::Message::Ping(data) => {
                            trace!("received ping, sending pong");
                            let _ = write_tx.send(tungstenite::Message::Pong(data)).await;
                        }
                        tungstenite::Message::Pong(_) => {
                            trace!("received pong");
                            pongs.send_replace(Instant::now());
                        }
                        tungstenite::Message::Close(frame) => {
                            let code = frame.map(|f| u16::from(f.code));
                            debug!(?code, "received close frame");
                            return CloseReason::Remote { code };
                        }
                        _ => {} // Binary, raw frames
                    },
                    Some(Err(e)) if is_fatal(&e) => {
                        warn!("WebSocket read error: {e}");
                        return CloseReason::Error(e.to_string());
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket read error (ignored): {e}");
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        return CloseReason::StreamEnded;
                    }
                }
            }
        }
    }
}

/// Capacity errors reject one frame and leave the stream usable.
fn is_fatal(err: &tungstenite::Error) -> bool {
    !matches!(err, tungstenite::Error::Capacity(_))
}
