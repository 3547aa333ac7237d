use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use clap::{Parser, Subcommand};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

use bs_brain::api;
use bs_brain::extensions::{watch_companions, ExtensionTracker};
use bs_brain::jobs::dispatcher::Dispatcher;
use bs_brain::jobs::status::StatusTracker;
use bs_brain::jobs::worker::Worker;
use bs_brain::lifecycle::{BrainState, BrainStateMachine, TransferHandler};
use bs_brain::memory::{HttpMemoryRetriever, MemoryRetriever, NoopMemoryRetriever};
use bs_brain::registry::{JobsPlugin, SkillRegistry, ToolPlugin, UnifiedToolRegistry, UtilPlugin};
use bs_brain::sched::Scheduler;
use bs_brain::state::AppState;
use bs_bus::{publish_json, subjects, Bus, JetStreamBus};
use bs_domain::config::{BrainRole, Config};
use bs_providers::ModelRouter;
use bs_store::Store;

#[derive(Parser)]
#[command(name = "bakerstreet", about = "Baker Street brain service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the brain (default).
    Serve,
    /// Run a job worker.
    Worker,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_brain().await
        }
        Some(Command::Worker) => {
            init_tracing();
            run_worker().await
        }
        Some(Command::Version) => {
            println!("bakerstreet {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Structured JSON logging with env-filter control.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,bs_brain=debug")),
        )
        .json()
        .init();
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Brain
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_brain() -> anyhow::Result<()> {
    tracing::info!("Baker Street brain starting");
    let config = Arc::new(Config::from_env().context("loading configuration")?);

    // ── Store ────────────────────────────────────────────────────────
    let db_path = Path::new(&config.server.data_dir).join("bakerst.db");
    let store = Arc::new(Store::open(&db_path).context("opening bakerst.db")?);
    tracing::info!(path = %db_path.display(), "store ready");

    // ── Bus ──────────────────────────────────────────────────────────
    let bus: Arc<dyn Bus> = Arc::new(
        JetStreamBus::connect(&config.bus.url)
            .await
            .context("connecting to the message bus")?,
    );

    // ── ModelRouter ──────────────────────────────────────────────────
    let router = Arc::new(
        ModelRouter::from_config(config.router.clone()).context("initializing model router")?,
    );
    tracing::info!(use_oauth = router.use_oauth(), "model router ready");

    // ── Dispatcher + status tracker ──────────────────────────────────
    let dispatcher = Arc::new(Dispatcher::new(store.clone(), bus.clone()));
    {
        let tracker = StatusTracker::new(store.clone(), bus.clone());
        tokio::spawn(async move {
            if let Err(e) = tracker.run().await {
                tracing::error!(error = %e, "status tracker stopped");
            }
        });
    }

    // ── Tool registry (skills + plugins) ─────────────────────────────
    let skills = Arc::new(SkillRegistry::new());
    skills
        .startup(&store)
        .await
        .context("loading skills from the store")?;
    let plugins: Vec<Arc<dyn ToolPlugin>> = vec![
        Arc::new(UtilPlugin),
        Arc::new(JobsPlugin::new(dispatcher.clone())),
    ];
    let registry = Arc::new(UnifiedToolRegistry::new(skills, plugins));
    let tool_count = registry.all_tool_definitions().await.len();
    tracing::info!(tools = tool_count, "tool registry ready");

    // ── Memory retriever ─────────────────────────────────────────────
    let retriever: Arc<dyn MemoryRetriever> = match &config.memory.retriever_url {
        Some(url) => {
            tracing::info!(url = %url, "memory retriever ready");
            Arc::new(HttpMemoryRetriever::new(url.clone()))
        }
        None => {
            tracing::info!("no memory retriever configured");
            Arc::new(NoopMemoryRetriever)
        }
    };

    // ── Scheduler ────────────────────────────────────────────────────
    let scheduler = Arc::new(Scheduler::new(store.clone(), dispatcher.clone()));
    scheduler.load_at_startup().context("loading schedules")?;

    // ── Brain state machine + transfer handler ───────────────────────
    let initial_state = if !config.brain.transfer_enabled {
        BrainState::Active
    } else {
        match config.brain.role {
            BrainRole::Active => BrainState::Active,
            BrainRole::Pending => BrainState::Pending,
        }
    };
    let machine = BrainStateMachine::new(initial_state, config.brain.version.clone());
    tracing::info!(
        state = machine.state().as_str(),
        version = machine.version(),
        "brain state machine ready"
    );
    {
        let handler = TransferHandler::new(
            machine.clone(),
            bus.clone(),
            store.clone(),
            config.brain.clone(),
        );
        let starts_pending = initial_state == BrainState::Pending;
        tokio::spawn(async move {
            if starts_pending {
                if let Err(e) = handler.run_pending().await {
                    tracing::error!(error = %e, "pending transfer protocol failed");
                    return;
                }
            }
            if let Err(e) = handler.run_active().await {
                tracing::error!(error = %e, "transfer handler stopped");
            }
        });
    }

    // ── Extension heartbeats + companion traffic ─────────────────────
    let extensions = ExtensionTracker::new();
    {
        let tracker = extensions.clone();
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = tracker.run(bus).await {
                tracing::warn!(error = %e, "extension tracker stopped");
            }
        });
    }
    {
        let bus = bus.clone();
        tokio::spawn(async move {
            if let Err(e) = watch_companions(bus).await {
                tracing::warn!(error = %e, "companion watcher stopped");
            }
        });
    }
    {
        let tracker = extensions.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                tracker.prune_stale();
            }
        });
    }

    // ── Heartbeat publisher (30s) ────────────────────────────────────
    {
        let bus = bus.clone();
        let machine = machine.clone();
        let agent_name = config.server.agent_name.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                let beat = serde_json::json!({
                    "id": agent_name,
                    "uptime": machine.uptime_secs(),
                    "timestamp": bs_store::now_iso(),
                });
                if let Err(e) =
                    publish_json(bus.as_ref(), subjects::HEARTBEAT_BRAIN, &beat).await
                {
                    tracing::debug!(error = %e, "heartbeat publish failed");
                }
            }
        });
    }

    // ── Auth token (read once, hash for constant-time comparison) ────
    let auth_token_hash = match &config.server.auth_token {
        Some(token) if !token.is_empty() => {
            tracing::info!("bearer-token auth enabled");
            Some(api::auth::hash_token(token))
        }
        _ => {
            tracing::warn!("bearer-token auth DISABLED: set AUTH_TOKEN to enable");
            None
        }
    };

    // ── App state + HTTP server ──────────────────────────────────────
    let state = AppState {
        config: config.clone(),
        store,
        bus,
        router,
        registry: registry.clone(),
        retriever,
        dispatcher,
        scheduler: scheduler.clone(),
        machine: machine.clone(),
        extensions,
        auth_token_hash,
    };

    let app = api::router(state.clone())
        .layer(build_cors_layer(&config.server.cors_origins))
        .with_state(state);

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    tracing::info!(addr = %addr, "Baker Street listening");

    let mut shutdown_rx = machine.shutdown_signal();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("interrupt received, shutting down");
                }
                _ = shutdown_rx.changed() => {
                    tracing::info!("transfer complete, shutting down");
                }
            }
        })
        .await
        .context("http server error")?;

    scheduler.shutdown();
    registry.shutdown().await;
    tracing::info!("goodbye");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Worker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_worker() -> anyhow::Result<()> {
    let config = Config::from_env().context("loading configuration")?;
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let worker_id = format!("worker-{}", &suffix[..8]);
    tracing::info!(worker_id = %worker_id, "worker starting");

    let bus: Arc<dyn Bus> = Arc::new(
        JetStreamBus::connect(&config.bus.url)
            .await
            .context("connecting to the message bus")?,
    );
    let router = Arc::new(
        ModelRouter::from_config(config.router.clone()).context("initializing model router")?,
    );

    let worker = Worker::new(worker_id, bus, router, config.jobs.clone());
    worker.run().await.context("worker loop failed")?;
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CORS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Build the CORS layer. No configured origins = dev-permissive.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = [header::CONTENT_TYPE, header::AUTHORIZATION];

    if origins.is_empty() {
        tracing::warn!("CORS_ORIGINS not set: allowing all origins (dev mode)");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods(methods)
            .allow_headers(headers);
    }

    let exact: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(hv) => Some(hv),
            Err(_) => {
                tracing::warn!(origin = %origin, "invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(exact))
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(true)
}
