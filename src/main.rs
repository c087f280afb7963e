use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use storefront_api::gateway::RazorpayGateway;
use storefront_api::services::AppServices;
use storefront_api::{app_router, config, db, events, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_config().context("failed to load configuration")?;
    config::init_tracing(app_config.log_level(), app_config.log_json);

    info!(
        environment = %app_config.environment,
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let pool = db::establish_connection_from_app_config(&app_config)
        .await
        .context("failed to connect to database")?;

    if app_config.auto_migrate {
        db::run_migrations(&pool).await.context("migrations failed")?;
    }

    let db = Arc::new(pool);
    let (event_sender, event_rx) = events::event_channel(1024);
    let event_sender = Arc::new(event_sender);
    tokio::spawn(events::process_events(event_rx));

    let gateway = Arc::new(RazorpayGateway::new(
        app_config.gateway_base_url.clone(),
        app_config.razorpay_key_id.clone(),
        app_config.razorpay_key_secret.clone(),
        Duration::from_secs(app_config.gateway_timeout_secs),
    ));

    let services = AppServices::new(db.clone(), event_sender.clone(), gateway, &app_config);

    let addr = format!("{}:{}", app_config.host, app_config.port);
    let state = AppState {
        db,
        config: Arc::new(app_config),
        event_sender,
        services,
    };

    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
