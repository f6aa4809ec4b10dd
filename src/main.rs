use std::sync::Arc;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use coach_relay::chat::BroadcastPublisher;
use coach_relay::chat::ws::chat_routes;
use coach_relay::config::EngineConfig;
use coach_relay::engine::{IngressCoordinator, IngressDeps, spawn_sweep};
use coach_relay::llm::{LlmConfig, create_provider};
use coach_relay::policy::SettingsPolicyStore;
use coach_relay::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Keep the guard alive so buffered file logs are flushed on exit.
    let (file_layer, _log_guard) = match std::env::var("COACH_RELAY_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "coach-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    let config = EngineConfig::from_env().context("invalid configuration")?;
    let llm_config = LlmConfig::from_env().map_err(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export ANTHROPIC_API_KEY=sk-ant-...");
        e
    })?;

    eprintln!("🏋️  Coach Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Coach: {}", config.coach_id);
    eprintln!("   Chat WS: ws://0.0.0.0:{}/ws", config.port);
    eprintln!("   Chat API: http://0.0.0.0:{}/api/chat/messages", config.port);
    eprintln!("   Scheduled: http://0.0.0.0:{}/api/scheduled", config.port);

    let llm = create_provider(&llm_config)?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Engine ───────────────────────────────────────────────────────────
    let publisher = BroadcastPublisher::new();
    let coordinator = Arc::new(IngressCoordinator::new(IngressDeps {
        db: Arc::clone(&db),
        policies: Arc::new(SettingsPolicyStore::new(Arc::clone(&db))),
        llm,
        publisher: publisher.clone(),
        config: config.clone(),
    }));

    let (sweep_handle, sweep_shutdown) =
        spawn_sweep(Arc::clone(&coordinator), config.sweep_interval);
    eprintln!(
        "   Sweep: every {}s, lookback {}s\n",
        config.sweep_interval.as_secs(),
        config.sweep_lookback.as_secs()
    );

    // ── Server ───────────────────────────────────────────────────────────
    let app = chat_routes(Arc::clone(&coordinator), publisher);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!(port = config.port, "Chat server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown requested");
        })
        .await
        .context("server error")?;

    sweep_shutdown.store(true, Ordering::Relaxed);
    sweep_handle.abort();
    Ok(())
}
