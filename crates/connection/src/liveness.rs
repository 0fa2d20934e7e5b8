//! Ping/pong liveness monitor.
//!
//! The only detector of half-open sockets: a connection that never reports
//! closure would otherwise stay `Ready` forever.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{trace, warn};

use crate::transport::TransportSocket;
use crate::types::LivenessConfig;

/// Probes `socket` every `config.interval`; terminates it when a pong does
/// not arrive within `config.expected_pong_back`.
pub(crate) async fn liveness_monitor(
    socket: Arc<TransportSocket>,
    config: LivenessConfig,
    cancel: CancellationToken,
) {
    let mut pongs = socket.pongs();
    let mut interval = tokio::time::interval(config.interval);
    interval.tick().await; // Skip immediate first tick.

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = socket.closed() => return,
            _ = interval.tick() => {}
        }

        pongs.borrow_and_update();
        if socket.ping().await.is_err() {
            return;
        }
        trace!(url = socket.url(), "liveness probe sent");

        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = pongs.changed() => {
                if changed.is_err() {
                    return;
                }
                trace!(url = socket.url(), "liveness probe acknowledged");
            }
            () = tokio::time::sleep(config.expected_pong_back) => {
                warn!(
                    url = socket.url(),
                    deadline = ?config.expected_pong_back,
                    "no pong before deadline, terminating socket"
                );
                socket.terminate();
                return;
            }
        }
    }
}
