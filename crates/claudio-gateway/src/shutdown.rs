//! Graceful shutdown (SIGTERM) and config reload (SIGHUP) signal handling.

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::state::GatewayState;

/// Spawn a task that reloads the bot registry every time SIGHUP arrives.
/// Runs for the lifetime of the process; errors are logged, never fatal.
pub fn spawn_reload_listener(state: GatewayState) {
    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(err) => {
                error!(error = %err, "failed to install SIGHUP handler");
                return;
            }
        };
        loop {
            sighup.recv().await;
            match state.rebuild_bots() {
                Ok(()) => info!("bot registry reloaded via SIGHUP"),
                Err(err) => warn!(error = %err, "SIGHUP reload failed"),
            }
        }
    });
}

/// Resolves once SIGTERM (or SIGINT, for local dev) arrives, after running
/// the five-step graceful shutdown: stop accepting new work, flush pending
/// media groups, then let the caller stop serving new connections while
/// workers drain.
pub async fn wait_for_shutdown_signal(state: GatewayState) {
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
    }

    // Step 1: stop accepting new work (webhooks start returning 503).
    state.dispatcher.begin_shutdown();

    // Step 2: flush every pending media-group timer immediately.
    let dispatcher = state.dispatcher.clone();
    state
        .media_groups
        .flush_all(std::sync::Arc::new(move |bot_id, msg| {
            let key = claudio_core::ChatQueueKey::new(bot_id, msg.chat_id.clone());
            dispatcher.enqueue(key, msg);
        }))
        .await;
}

/// Step 4: join every in-flight worker before the process exits.
pub async fn drain_workers(state: &GatewayState) {
    state.dispatcher.drain().await;
}
