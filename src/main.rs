use std::net::SocketAddr;
use std::sync::Arc;

use tokengate::core::auth::{
    AuthApiState, AuthService, CredentialPolicy, JwtConfig, JwtService, LogNotifier,
    MemoryRefreshCredentialStore, RefreshCredentialStore, auth_api_router,
};
use tokengate::core::config::Config;
use tokengate::core::db::{DbConfig, RefreshCredentialRepository, create_pool_with_migrations};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load .env file (if exists)
    let _ = dotenvy::dotenv();

    // Initialize tracing, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(err) = run().await {
        tracing::error!(error = %err, "could not run application");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let jwt_config = JwtConfig::from_env()?;
    let policy = CredentialPolicy::from_env()?;

    // Log config status (without revealing secrets)
    tracing::info!(
        database = config.has_database(),
        signing_key = jwt_config.keys.active_kid(),
        rotate_on_refresh = policy.rotate_on_refresh,
        "Config loaded"
    );

    let store: Arc<dyn RefreshCredentialStore> = if config.has_database() {
        let pool = create_pool_with_migrations(&DbConfig::from_env()?).await?;
        Arc::new(RefreshCredentialRepository::new(pool))
    } else {
        tracing::warn!("DATABASE_URL not set, refresh credentials are kept in memory");
        Arc::new(MemoryRefreshCredentialStore::new())
    };

    let auth_service = AuthService::new(
        JwtService::new(jwt_config),
        store,
        Arc::new(LogNotifier),
        policy,
    )?;

    let app = auth_api_router(AuthApiState { auth_service }).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "starting server");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("stopping server");
}
