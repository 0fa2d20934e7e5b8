//! WebSocket write pump: serialises outbound frames.

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// Writes frames to the WebSocket until cancelled or the sink fails.
///
/// A failed write cancels `cancel` so the read side stops too. On a clean
/// stop a close frame is sent.
pub(crate) async fn write_pump<S>(
    mut write: S,
    mut write_rx: mpsc::Receiver<tungstenite::Message>,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            msg = write_rx.recv() => {
                match msg {
                    Some(m) => {
                        if let Err(e) = write.send(m).await {
                            error!("WebSocket write error: {e}");
                            cancel.cancel();
                            return;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    debug!("write pump stopping, sending close frame");
    let _ = write.send(tungstenite::Message::Close(None)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{Sink, sink};

    fn recording_sink(
        tx: mpsc::Sender<tungstenite::Message>,
    ) -> impl Sink<tungstenite::Message, Error = tungstenite::Error> + Unpin {
        Box::pin(sink::unfold(
            tx,
            |tx, msg: tungstenite::Message| async move {
                let _ = tx.send(msg).await;
                Ok::<_, tungstenite::Error>(tx)
            },
        ))
    }

    #[tokio::test]
    async fn write_pump_stops_on_cancel() {
        let (sink_tx, mut sink_rx) = mpsc::channel::<tungstenite::Message>(16);
        let cancel = CancellationToken::new();

        let (_write_tx, write_rx) = mpsc::channel(16);
        let c = cancel.clone();
        let handle = tokio::spawn(async move {
            write_pump(recording_sink(sink_tx), write_rx, c).await;
        });

        cancel.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("should stop")
            .expect("no panic");

        let close_msg = sink_rx.recv().await;
        assert!(matches!(close_msg, Some(tungstenite::Message::Close(_))));
    }

    #[tokio::test]
    async fn write_pump_forwards_in_order() {
        let (sink_tx, mut sink_rx) = mpsc::channel::<tungstenite::Message>(16);
        let (write_tx, write_rx) = mpsc::channel(16);

        write_tx
            .send(tungstenite::Message::Text("a".into()))
            .await
            .unwrap();
        write_tx
            .send(tungstenite::Message::Text("b".into()))
            .await
            .unwrap();
        drop(write_tx);

        write_pump(recording_sink(sink_tx), write_rx, CancellationToken::new()).await;

        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("a".into()))
        );
        assert_eq!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Text("b".into()))
        );
        assert!(matches!(
            sink_rx.recv().await,
            Some(tungstenite::Message::Close(None))
        ));
    }

    #[tokio::test]
    async fn write_error_cancels_token() {
        let failing = Box::pin(sink::unfold((), |(), _msg: tungstenite::Message| async {
            Err::<(), _>(tungstenite::Error::ConnectionClosed)
        }));
        let (write_tx, write_rx) = mpsc::channel(16);
        write_tx.send(tungstenite::Message::Ping(vec![].into())).await.unwrap();

        let cancel = CancellationToken::new();
        write_pump(failing, write_rx, cancel.clone()).await;

        assert!(cancel.is_cancelled());
    }
}
