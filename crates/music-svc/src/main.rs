//! `music-svc` — binary entry point.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise structured logging.
//! 3. Initialise the telemetry pipeline (OTLP traces + metrics).
//! 4. Open the database, create the schema, and seed sample data.
//! 5. Build the Axum router and serve until SIGINT/SIGTERM.
//! 6. Flush telemetry within the shutdown deadline and close the pool.

use anyhow::{Context, Result};
use tracing::{info, warn};

use music_svc::config::Config;
use music_svc::db::{seed_sample_data, Database, InstrumentedDb};
use music_svc::server::{self, state::AppState};
use music_svc::telemetry::{self, ShutdownOutcome, TelemetryPipeline};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cfg = Config::from_env().map_err(|e| {
        // Logging is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Logging
    // -----------------------------------------------------------------------
    telemetry::init_logging(&cfg.log_level, &cfg.log_format)?;
    info!(
        version = %cfg.service_version,
        http_port = cfg.http_port,
        "music-svc starting"
    );

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    let (telemetry, pipeline) = TelemetryPipeline::init(&cfg.telemetry_settings())
        .context("failed to initialise telemetry")?;

    // -----------------------------------------------------------------------
    // 4. Database
    // -----------------------------------------------------------------------
    let database = Database::connect(&cfg.database_url).await?;
    database.create_tables().await?;
    let db = InstrumentedDb::new(database.clone(), telemetry.clone());
    seed_sample_data(&db).await?;

    // -----------------------------------------------------------------------
    // 5. HTTP server
    // -----------------------------------------------------------------------
    let router = server::router::build(AppState::new(db, telemetry));

    let addr: std::net::SocketAddr = ([0, 0, 0, 0], cfg.http_port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "listening");

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    if let Err(e) = &served {
        warn!(error = %e, "HTTP server stopped with error");
    }

    // -----------------------------------------------------------------------
    // 6. Shutdown
    // -----------------------------------------------------------------------
    match pipeline.shutdown(cfg.shutdown_timeout()).await {
        ShutdownOutcome::Clean => {}
        outcome => warn!(?outcome, "telemetry was not flushed cleanly"),
    }
    database.close().await;
    info!("music-svc stopped");

    served.context("HTTP server failed")
}

/// Resolve on the first SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("shutdown signal received");
}
