//! Tollgate - automated toll collection pipeline
//!
//! Main entry point for the tollgate service.

use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tollgate::{
    barrier_actuator::ShellBarrier,
    capture_service::CommandCapturer,
    ledger_gateway::SqlLedgerGateway,
    recognition_client::PlateRecognizerClient,
    run_coordinator::{PipelineConfig, RunCoordinator},
    run_log::RunLogService,
    state::{AppConfig, AppState},
    transcode_client::FfmpegTranscoder,
    trigger_watcher::TriggerWatcher,
    web_api,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tollgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Tollgate v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        database_url = %config.database_url,
        recognition_url = %config.recognition_url,
        capture_dir = %config.capture_dir.display(),
        frames_dir = %config.frames_dir.display(),
        trigger_dir = %config.trigger_dir.display(),
        location = %config.location,
        "Configuration loaded"
    );

    // Create database pool
    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(&config.database_url)
        .await?;
    tracing::info!("Database connected");

    // Verify ffmpeg before accepting any trigger
    match FfmpegTranscoder::check_ffmpeg().await {
        Ok(version) => tracing::info!(version = %version, "ffmpeg available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg not available, transcoding will fail"),
    }

    // Initialize components
    let capturer = Arc::new(
        CommandCapturer::new(
            config.capture_cmd.clone(),
            config.capture_dir.clone(),
            config.capture_secs,
        )
        .await?,
    );
    tracing::info!("CaptureService initialized");

    let transcoder = Arc::new(FfmpegTranscoder::new(config.frames_dir.clone()).await?);
    tracing::info!("TranscodeClient initialized");

    let recognition = Arc::new(PlateRecognizerClient::new(config.recognition_url.clone()));
    tracing::info!(url = %config.recognition_url, "RecognitionClient initialized");

    let ledger = Arc::new(SqlLedgerGateway::new(pool.clone()));
    tracing::info!("LedgerGateway initialized");

    let actuator = Arc::new(ShellBarrier::new(
        config.barrier_open_cmd.clone(),
        config.barrier_close_cmd.clone(),
        Duration::from_secs(config.dwell_secs),
    ));
    tracing::info!(dwell_sec = config.dwell_secs, "BarrierActuator initialized");

    let run_log = Arc::new(RunLogService::default());

    let coordinator = Arc::new(RunCoordinator::new(
        capturer,
        transcoder,
        recognition.clone(),
        ledger.clone(),
        actuator,
        run_log.clone(),
        PipelineConfig::from_app(&config),
    ));
    tracing::info!("RunCoordinator initialized");

    // Start watching for sensor triggers
    let watcher = TriggerWatcher::new(
        config.trigger_dir.clone(),
        Duration::from_millis(config.trigger_poll_ms),
        coordinator.clone(),
    );
    watcher.start().await;

    // Build application state
    let state = AppState {
        pool,
        config: config.clone(),
        coordinator,
        ledger,
        recognition,
        run_log,
    };

    // Build router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
