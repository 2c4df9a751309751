mod config;
mod constants;
mod error;
mod routes;
mod session;
mod transforms;

use axum::ServiceExt;
use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use clap::Parser;
use config::Config;
use reqwest::{Client, redirect};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::normalize_path::NormalizePath;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIME: &str = env!("BUILD_TIME");

pub struct AppState {
    pub http_client: Client,
    /// Scheme + authority of the upstream, no trailing slash
    pub upstream_base: String,
}

#[derive(Parser)]
#[command(name = "codex-session-shim")]
#[command(about = "Sticky-session shim in front of the Codex responses API")]
struct Args {
    /// Host to bind to
    #[arg(short = 'H', long, env = "CODEX_SHIM_HOST")]
    host: Option<String>,

    /// Port to bind to
    #[arg(short, long, env = "CODEX_SHIM_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = Config::from_env();

    let host = args.host.unwrap_or(config.host);
    let port = args.port.unwrap_or(config.port);

    // Shared HTTP client with connection pooling. No redirect following and
    // no client timeout: 3xx responses and long-lived SSE streams belong to
    // the caller.
    let http_client = Client::builder()
        .redirect(redirect::Policy::none())
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to create HTTP client");

    let state = Arc::new(AppState {
        http_client,
        upstream_base: config.upstream_base,
    });

    // Browser clients call from arbitrary origins with credentialed
    // requests, so the origin and requested headers are reflected back
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true);

    let app = NormalizePath::trim_trailing_slash(
        Router::new()
            .route("/health", get(routes::health::health))
            .route("/version", get(routes::health::version))
            .route(
                constants::RESPONSES_PATH,
                post(routes::responses::responses).fallback(routes::passthrough::passthrough),
            )
            .route(
                constants::RESPONSES_ALIAS_PATH,
                post(routes::responses::responses).fallback(routes::passthrough::passthrough),
            )
            .fallback(routes::passthrough::passthrough)
            .layer(cors)
            .with_state(state.clone()),
    );

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .expect("Invalid address");
    info!(
        "Starting codex-session-shim v{}-{} (built {})",
        VERSION, GIT_HASH, BUILD_TIME
    );
    info!("Listening on http://{}", addr);
    info!("Forwarding to {}", state.upstream_base);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(
        listener,
        ServiceExt::<axum::extract::Request>::into_make_service(app),
    )
    .await
    .unwrap();
}
