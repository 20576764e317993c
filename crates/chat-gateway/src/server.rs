//! Server startup and router assembly
//!
//! Every handler reads from one `AppState`. Layer order, outermost first:
//! request tracing → CORS negotiation → body limit → routing. The protected
//! routes additionally sit behind the session gate, and every matched route
//! is counted in the request metrics.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    api,
    auth::{require_session, GoTrueClient, IdentityProvider},
    chat_db::{ChatDatabase, ConversationStore},
    config::Config,
    cors::negotiate,
    metrics::{get_metrics, track_requests},
    shared_state::AppState,
    upstream::{CompletionBackend, ImageBackend, OpenAiClient},
};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Build the application router over a ready state.
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/chat", post(api::chat_stream))
        .route("/api/image", post(api::generate_image))
        .route("/api/auth/update-password", post(api::update_password))
        .route("/api/auth/profile", post(api::update_profile))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.authenticator),
            require_session,
        ));

    let public = Router::new()
        .route("/api/auth/signup", post(api::sign_up))
        .route("/api/auth/signin", post(api::sign_in))
        .route("/api/auth/signout", post(api::sign_out))
        .route("/api/auth/reset-password", post(api::reset_password))
        .route("/api/download-image", post(api::download_image))
        .route("/api/test-connection", get(api::test_connection))
        .route("/api/test-openai", get(api::test_openai))
        .route("/api/placeholder/:width/:height", get(api::placeholder))
        .route("/healthz", get(api::healthz))
        .route("/metrics", get(get_metrics));

    let cors = Arc::clone(&state.cors);

    Router::new()
        .merge(protected)
        .merge(public)
        .route_layer(middleware::from_fn(track_requests))
        .with_state(state)
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(middleware::from_fn_with_state(cors, negotiate))
        .layer(TraceLayer::new_for_http())
}

/// Wire the adapters from configuration.
pub fn build_state(cfg: Config) -> anyhow::Result<AppState> {
    let http_client = reqwest::Client::new();

    let provider: Arc<dyn IdentityProvider> = Arc::new(GoTrueClient::new(
        cfg.gotrue_url.clone(),
        cfg.gotrue_api_key.clone(),
        http_client.clone(),
    ));

    let (completions, images) = match &cfg.openai_api_key {
        Some(key) => {
            let client = Arc::new(OpenAiClient::new(
                key.clone(),
                cfg.openai_base_url.clone(),
                http_client.clone(),
            ));
            (
                Some(Arc::clone(&client) as Arc<dyn CompletionBackend>),
                Some(client as Arc<dyn ImageBackend>),
            )
        }
        None => (None, None),
    };

    let db_path = Path::new(&cfg.database_path);
    let database = match ChatDatabase::open(db_path) {
        Ok(db) => {
            info!("Chat database initialized at: {}", db_path.display());
            db
        }
        Err(e) => {
            warn!("Failed to initialize chat database: {:#}. Falling back to in-memory.", e);
            ChatDatabase::open_in_memory()?
        }
    };
    let conversations: Arc<dyn ConversationStore> = Arc::new(database.conversations());

    Ok(AppState::new(cfg, provider, completions, images, conversations).with_http_client(http_client))
}

/// Run the HTTP server until ctrl-c.
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::metrics::init_metrics();
    cfg.print_config();

    let bind_addr = cfg.api_addr()?;
    let state = build_state(cfg)?;
    let app = build_router(state);

    info!("Starting HTTP server on {}", bind_addr);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
