use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use axum::routing::{get, post};
use axum::Router;
use clap::Parser;
use claudio_core::filelog;
use tracing::{info, warn};

mod alexa_session;
mod alexa_verify;
mod bot_context;
mod dispatch;
mod error;
mod handlers;
mod media_group;
mod parse;
mod shutdown;
mod state;

use alexa_session::AlexaSessions;
use alexa_verify::AlexaVerifier;
use dispatch::Dispatcher;
use media_group::MediaGroupCoalescer;
use state::GatewayState;

const COMPONENT: &str = "gateway";

#[derive(Parser, Debug)]
#[command(name = "claudio-gateway", about = "Webhook dispatcher bridging Telegram/WhatsApp/Alexa to the AI pipeline")]
struct Cli {
    /// Root of the installation: holds `service.env`, `bots/`, and `memory.sock`.
    #[arg(long, env = "CLAUDIO_HOME", default_value = "~/.claudio")]
    installation_root: PathBuf,

    /// Path to the `claude` CLI binary. Resolved from PATH if unset.
    #[arg(long)]
    claude_cli: Option<PathBuf>,
}

fn expand_home(path: PathBuf) -> PathBuf {
    let Some(raw) = path.to_str() else { return path };
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "claudio_gateway=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let installation_root = expand_home(cli.installation_root);
    let log_file = installation_root.join("claudio.log");
    filelog::info(&log_file, COMPONENT, "Starting Claudio server");

    let install = Arc::new(claudio_config::InstallationConfig::load(installation_root.clone()));
    let registry = Arc::new(claudio_config::BotRegistry::load(installation_root.clone())?);
    if registry.is_empty() {
        warn!(root = %installation_root.display(), "no bots configured yet; webhooks will all 401 until one is added");
    }

    let claude_cli = match cli.claude_cli {
        Some(path) => path,
        None => which::which("claude").map_err(|err| anyhow::anyhow!("claude CLI not found on PATH: {err}"))?,
    };
    let agent = Arc::new(claudio_agent::AgentRunner::new(claude_cli).with_log_file(log_file.clone()));

    // The memory engine runs as its own long-lived daemon process (started
    // and supervised independently, alongside the gateway); we only ever
    // dial its socket here, never own its lifecycle.
    let memory_socket = installation_root.join("memory.sock");
    let memory = Arc::new(claudio_pipeline::MemoryClient::new(memory_socket));

    let dispatcher_bots: Arc<RwLock<HashMap<String, Arc<bot_context::BuiltBot>>>> = Arc::new(RwLock::new(HashMap::new()));
    let process_bots = dispatcher_bots.clone();
    let dispatcher = Dispatcher::new(Arc::new(move |key, msg| {
        let bots = process_bots.clone();
        Box::pin(async move {
            let built = bots.read().unwrap().get(&key.bot_id).cloned();
            let Some(built) = built else {
                warn!(bot_id = %key.bot_id, "dropping message for a bot that is no longer registered");
                return;
            };
            if let Err(err) = claudio_pipeline::process(&built.ctx, msg, &built.persister).await {
                warn!(bot_id = %key.bot_id, error = %err, "pipeline run failed");
            }
        })
    }));

    let state = GatewayState {
        install,
        registry,
        bots: dispatcher_bots,
        agent,
        memory,
        dispatcher,
        media_groups: MediaGroupCoalescer::new(),
        alexa_sessions: Arc::new(AlexaSessions::new()),
        alexa_verifier: Arc::new(AlexaVerifier::new()),
    };
    state.rebuild_bots()?;
    info!(bots = state.registry.len(), "bot contexts built");

    shutdown::spawn_reload_listener(state.clone());

    let router = Router::new()
        .route("/telegram/webhook", post(handlers::telegram_webhook))
        .route("/whatsapp/webhook", post(handlers::whatsapp_webhook))
        .route("/alexa", post(handlers::alexa_webhook))
        .route("/health", get(handlers::health))
        .route("/reload", get(handlers::reload))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr: SocketAddr = format!("0.0.0.0:{}", state.install.port).parse()?;
    info!(%addr, "claudio gateway listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown::wait_for_shutdown_signal(state.clone()))
        .await?;

    // Step 4: let every worker finish its current message before exiting.
    shutdown::drain_workers(&state).await;
    info!("all workers drained, exiting");

    Ok(())
}
