//! Case Backend - library for app logic and testing

pub mod config;
pub mod db;
pub mod error;
pub mod forms;
pub mod images;
pub mod logging;
pub mod routes;
pub mod services;

#[cfg(test)]
pub(crate) mod test_utils;

use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use sqlx::SqlitePool;
use tower_http::{
    compression::CompressionLayer, cors::CorsLayer, limit::RequestBodyLimitLayer,
    services::ServeDir, trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::error::StartupError;
use crate::images::ImageStore;
use crate::services::{cases::CaseService, users::UserService};

/// Default cap on request bodies: three fixed images plus section images.
const DEFAULT_MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Shared handles passed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub cases: CaseService,
    pub users: UserService,
}

impl AppState {
    pub fn new(pool: SqlitePool, images: ImageStore) -> Self {
        Self {
            cases: CaseService::new(pool.clone(), images),
            users: UserService::new(pool.clone()),
            pool,
        }
    }
}

/// Configure CORS from environment variables.
/// Uses ALLOWED_ORIGINS (comma-separated) or FRONTEND_ORIGIN.
pub fn configure_cors() -> CorsLayer {
    let allowed_origins = std::env::var("ALLOWED_ORIGINS")
        .ok()
        .and_then(|s| {
            let origins: Vec<HeaderValue> = s
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                None
            } else {
                Some(origins)
            }
        })
        .or_else(|| {
            std::env::var("FRONTEND_ORIGIN")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(|origin| vec![origin])
        })
        .unwrap_or_else(|| {
            vec![
                HeaderValue::from_static("http://localhost:3000"),
                HeaderValue::from_static("http://127.0.0.1:3000"),
            ]
        });

    CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// Keeps dot-prefixed entries, the image staging area among them, out of
/// static file serving.
async fn hide_dot_paths(request: Request, next: Next) -> Response {
    let hidden = request.uri().path().split('/').any(|segment| {
        segment.starts_with('.')
            || segment
                .get(..3)
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case("%2e"))
    });
    if hidden {
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Create and configure the application router.
pub fn create_app(state: AppState) -> Router {
    create_app_with_limit(state, DEFAULT_MAX_BODY_BYTES)
}

pub fn create_app_with_limit(state: AppState, max_body_bytes: usize) -> Router {
    let cors = configure_cors();
    let static_files = Router::new()
        .fallback_service(ServeDir::new(state.cases.image_store().root()))
        .layer(middleware::from_fn(hide_dot_paths));

    Router::new()
        .route(
            "/case",
            get(routes::case::list_cases).post(routes::case::create_case),
        )
        .route(
            "/case/{id}",
            get(routes::case::get_case)
                .patch(routes::case::update_case)
                .delete(routes::case::delete_case),
        )
        .route("/case/link/{case_link}", get(routes::case::get_case_by_link))
        .route("/user/registration", post(routes::user::registration))
        .route("/user/login", post(routes::user::login))
        .route("/user/check", get(routes::user::check))
        .route("/health", get(routes::health::health_ping))
        .route("/health/database", get(routes::health::health_database))
        .fallback_service(static_files)
        .with_state(state)
        .layer(logging::middleware::propagate_request_id_layer())
        .layer(middleware::from_fn(logging::middleware::log_request))
        .layer(logging::middleware::request_id_layer())
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        // Multipart bodies are bounded by the layer below instead of axum's 2 MB default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
}

/// Run the server (used by main).
pub async fn run() -> Result<(), StartupError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::default();

    // Dropping the guards stops the background log writers.
    let _log_guards = logging::init(&config.log);

    let pool = db::init_pool(&config.db).await?;
    db::run_migrations(&pool).await?;

    let images = ImageStore::open(&config.static_dir).await?;
    tracing::info!("Image store at {}", images.root().display());

    let app = create_app_with_limit(AppState::new(pool, images), config.max_body_bytes);

    let addr = config.addr()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
