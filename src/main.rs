use std::sync::Arc;

use anyhow::Context;
use space_onboarding::channels::{LedgerChannels, LocalLedger};
use space_onboarding::config::OnboardingConfig;
use space_onboarding::onboarding::{
    Identity, OnboardingEngine, OnboardingRouteState, onboarding_routes, spawn_identity_follower,
};
use space_onboarding::repl::Console;
use space_onboarding::store::{CompletionStore, LibSqlCompletionStore};
use tokio::io::BufReader;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = OnboardingConfig::from_env().context("invalid onboarding configuration")?;

    eprintln!("Space Onboarding v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Getting started: {}", config.getting_started_path);
    eprintln!(
        "   Status API: http://0.0.0.0:{}/api/onboarding/status",
        config.http_port
    );

    // ── Completion store ────────────────────────────────────────────────
    let store: Arc<dyn CompletionStore> = Arc::new(
        LibSqlCompletionStore::new_local(&config.db_path, &config.completion_key)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Engine ──────────────────────────────────────────────────────────
    let ledger = LocalLedger::new();
    let http_port = config.http_port;
    let engine = Arc::new(OnboardingEngine::new(
        config,
        Arc::clone(&ledger) as Arc<dyn LedgerChannels>,
        store,
    ));

    let (identity_tx, identity_rx) = watch::channel(Identity::logged_out());
    let follower = spawn_identity_follower(Arc::clone(&engine), identity_rx);

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = onboarding_routes(OnboardingRouteState {
        engine: Arc::clone(&engine),
    })
    .layer(CorsLayer::permissive());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", http_port))
        .await
        .with_context(|| format!("failed to bind port {http_port}"))?;
    tracing::info!(port = http_port, "Onboarding HTTP server started");
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "HTTP server stopped");
        }
    });

    eprintln!("   Type `help` for commands, `quit` to exit.\n");

    // ── Console ─────────────────────────────────────────────────────────
    let console = Console::new(Arc::clone(&engine), ledger, identity_tx);
    console.run(BufReader::new(tokio::io::stdin())).await?;

    // Dropping the console closes the identity source and ends the follower.
    drop(console);
    follower.await.ok();
    engine.dispose();
    server.abort();

    Ok(())
}
