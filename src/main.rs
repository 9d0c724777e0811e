mod auth;
mod clients;
mod config;
mod docs;
mod gateway;
mod handlers;
mod models;
mod routes;
mod services;
mod ws;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use std::panic;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use clients::fleet_api_client::FleetApiClient;
use config::Config;
use docs::ApiDoc;
use gateway::{EntryGateway, MemoryEntryGateway};
use routes::create_api_routes;
use ws::hub::CollabHub;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // Default to info level, but allow debug for our app
            "fleetform_colab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());

    // Initialize caches
    services::auth_service::init_identity_cache();

    if config.auth_jwt_secret.is_none() {
        warn!("No auth JWT secret configured - WebSocket connections will be rejected");
    }

    // Pick the persistence gateway
    let entry_gateway: Arc<dyn EntryGateway> =
        match (&config.fleet_api_url, &config.fleet_api_jwt_secret) {
            (Some(url), Some(secret)) => {
                info!("Using fleet API persistence gateway at {}", url);
                Arc::new(FleetApiClient::new(
                    url.clone(),
                    secret.clone(),
                    config.service_name.clone(),
                ))
            }
            (Some(_), None) => {
                error!("fleet_api_url set but fleet_api_jwt_secret missing");
                warn!("Falling back to in-memory entry store - edits will not be persisted");
                Arc::new(MemoryEntryGateway::new())
            }
            _ => {
                warn!("No fleet API configured - using in-memory entry store, edits will not be persisted");
                Arc::new(MemoryEntryGateway::new())
            }
        };

    let hub = Arc::new(CollabHub::new(entry_gateway));

    // CORS policy
    let cors = match &config.cors_origins {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|o| o.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::permissive(),
    };

    // Create API routes
    let api_routes = create_api_routes(hub.clone());

    // Collaboration socket
    let ws_routes = Router::new()
        .route("/ws", get(ws::handler::websocket_handler))
        .with_state(hub);

    // Combine all routes
    let app_routes = Router::new()
        // Mount API routes
        .nest("/api", api_routes)
        // Mount the WebSocket endpoint
        .merge(ws_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start the server
    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 Collaboration socket at ws://{}/ws", config.server_address());
    info!("📚 Swagger UI available at http://{}/swagger", config.server_address());

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
