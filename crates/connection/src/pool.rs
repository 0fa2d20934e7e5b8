//! Concurrent connection setup across several endpoints.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info};

use crate::handle::ResilientHandle;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Connector;
use crate::types::{Endpoint, SupervisorConfig};

/// Connects to every URL concurrently and returns the handles that reached
/// `Ready`, in input order. Endpoints that exhaust their attempts are
/// dropped.
pub async fn create_all(
    urls: &[String],
    chain_id: u64,
    config: &SupervisorConfig,
    connector: Arc<dyn Connector>,
) -> Vec<ResilientHandle> {
    let attempts = urls.iter().map(|url| {
        let supervisor = ConnectionSupervisor::new(
            Endpoint::new(url.clone(), chain_id),
            config.clone(),
            connector.clone(),
        );
        async move {
            let handle = supervisor.connect().await;
            if handle.is_none() {
                error!(url = %url, "endpoint unavailable, dropping from pool");
            }
            handle
        }
    });

    let handles: Vec<ResilientHandle> = join_all(attempts).await.into_iter().flatten().collect();
    info!(
        requested = urls.len(),
        connected = handles.len(),
        "provider pool ready"
    );
    handles
}
