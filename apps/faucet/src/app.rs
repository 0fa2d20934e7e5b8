//! Faucet wiring: endpoint pool, mint subscription, heartbeat.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use mintdrip_connection::{
    ConnectionEvent, Connector, ResilientHandle, SubscriptionCallback, TungsteniteConnector,
    create_all,
};
use mintdrip_funder::{MintFunder, WalletSender, mint_filter};
use mintdrip_protocol::{LogFilter, SubscriptionKind};

use crate::config::FaucetConfig;

pub async fn run(config: FaucetConfig) -> anyhow::Result<()> {
    let connector: Arc<dyn Connector> = Arc::new(TungsteniteConnector);
    let handles = create_all(
        &config.ws_urls,
        config.chain_id,
        &config.supervisor,
        connector,
    )
    .await;
    if handles.is_empty() {
        bail!("none of the {} endpoint(s) could be reached", config.ws_urls.len());
    }

    for handle in &handles {
        if let Some(events) = handle.take_events().await {
            tokio::spawn(log_events(events));
        }
    }

    let sender = WalletSender::connect(&config.funding_rpc_url, &config.private_key)
        .context("failed to set up funding wallet")?;
    info!(
        wallet = %sender.address(),
        rpc = %config.funding_rpc_url,
        token = %config.token,
        endpoints = handles.len(),
        "faucet starting"
    );

    let funder = Arc::new(MintFunder::new(
        handles.clone(),
        sender,
        config.policy,
        config.explorer_tx_url.clone(),
    ));
    let (listener, mut worker) = funder.spawn_worker();

    let active = subscribe_mints(&handles, mint_filter(config.token), listener.clone()).await?;
    drop(listener);
    info!(token = %config.token, active, "listening for mints");

    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
        r = heartbeat(&handles, config.heartbeat) => r,
        r = &mut worker => match r {
            Ok(()) => Err(anyhow!("funding worker stopped")),
            Err(e) => Err(anyhow!("funding worker failed: {e}")),
        },
    };

    for handle in &handles {
        handle.shutdown().await;
    }
    worker.abort();
    result
}

/// Registers the mint filter on every handle. Fails unless at least one
/// endpoint has a live subscription; the others retry on reconnect.
async fn subscribe_mints(
    handles: &[ResilientHandle],
    filter: LogFilter,
    listener: SubscriptionCallback,
) -> anyhow::Result<usize> {
    let mut active = 0;
    for handle in handles {
        match handle
            .register(SubscriptionKind::Logs, Some(filter.clone()), listener.clone())
            .await
        {
            Ok(key) if handle.is_subscribed(&key).await => active += 1,
            Ok(_) => warn!(url = %handle.endpoint().url, "mint subscription deferred until reconnect"),
            Err(e) => {
                warn!(url = %handle.endpoint().url, error = %e, "mint subscription not yet active")
            }
        }
    }
    if active == 0 {
        bail!("mint subscription failed on every endpoint");
    }
    Ok(active)
}

/// Logs block height on every live endpoint. Returns an error once every
/// endpoint has terminated.
async fn heartbeat(handles: &[ResilientHandle], every: Duration) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for handle in handles {
            let url = &handle.endpoint().url;
            if handle.is_terminated() {
                error!(url = %url, "endpoint terminated");
                continue;
            }
            match handle.get_block_number().await {
                Ok(block) => info!(url = %url, block, "heartbeat"),
                // Reconnecting; the supervisor reports progress itself.
                Err(e) => warn!(url = %url, error = %e, "heartbeat failed"),
            }
        }
        if handles.iter().all(ResilientHandle::is_terminated) {
            bail!("all endpoints terminated");
        }
    }
}

async fn log_events(mut events: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::StateChanged { url, state } => {
                info!(url = %url, ?state, "connection state changed");
            }
            ConnectionEvent::Reconnecting {
                url,
                attempt,
                next_retry_secs,
            } => {
                warn!(url = %url, attempt, next_retry_secs, "reconnect scheduled");
            }
            ConnectionEvent::Resubscribed {
                url,
                restored,
                failed,
            } => {
                if failed > 0 {
                    warn!(url = %url, restored, failed, "subscriptions partially restored");
                } else {
                    info!(url = %url, restored, "subscriptions restored");
                }
            }
        }
    }
}
