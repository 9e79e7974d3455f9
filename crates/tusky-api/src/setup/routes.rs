//! Route configuration and setup

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::get,
    Json, Router,
};
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tusky_core::Config;
use utoipa::OpenApi;

use crate::api_doc::ApiDoc;
use crate::constants::{headers, BODY_LIMIT_SLACK};
use crate::handlers::{files, health, multipart, tus};
use crate::middleware::tus_middleware;
use crate::state::AppState;

/// The full application router, state applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    let config = &state.config;
    let cors = setup_cors(config);

    // Streaming bodies are capped by the upload size, not axum's 2 MB default.
    let body_limit = usize::try_from(config.max_upload_size().saturating_add(BODY_LIMIT_SLACK))
        .unwrap_or(usize::MAX);
    let http_concurrency_limit = config.http_concurrency_limit().max(1);
    tracing::info!(
        http_concurrency_limit,
        body_limit,
        "HTTP limits configured"
    );

    let upload_routes = Router::new()
        .route(
            "/files",
            get(multipart::list_files)
                .post(files::post_files)
                .delete(multipart::delete_files)
                .options(files::options_files),
        )
        .route(
            "/files/{id}",
            get(multipart::download_file)
                .head(files::head_file)
                .put(multipart::put_file)
                .patch(tus::patch_upload)
                .delete(files::delete_file)
                .options(files::options_file),
        )
        .route("/files/{id}/metadata", get(multipart::get_metadata))
        .layer(axum::middleware::from_fn(tus_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/live", get(health::liveness_check))
        .route(
            "/api/openapi.json",
            get(|| async { Json(ApiDoc::openapi()) }),
        )
        .merge(upload_routes)
        .merge(utoipa_rapidoc::RapiDoc::new("/api/openapi.json").path("/docs"))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(ConcurrencyLimitLayer::new(http_concurrency_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Setup CORS configuration
fn setup_cors(config: &Config) -> CorsLayer {
    let methods = [
        Method::GET,
        Method::HEAD,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    // Browsers hide response headers from scripts unless exposed.
    let exposed = [
        header::LOCATION,
        header::CONTENT_RANGE,
        header::CONTENT_DISPOSITION,
        header::RANGE,
        HeaderName::from_static(headers::TUS_RESUMABLE),
        HeaderName::from_static(headers::TUS_VERSION),
        HeaderName::from_static(headers::TUS_EXTENSION),
        HeaderName::from_static(headers::TUS_MAX_SIZE),
        HeaderName::from_static(headers::TUS_CHECKSUM_ALGORITHM),
        HeaderName::from_static(headers::UPLOAD_OFFSET),
        HeaderName::from_static(headers::UPLOAD_LENGTH),
        HeaderName::from_static(headers::UPLOAD_DEFER_LENGTH),
        HeaderName::from_static(headers::UPLOAD_METADATA),
        HeaderName::from_static(headers::UPLOAD_EXPIRES),
        HeaderName::from_static(headers::X_RANGE_HASH),
    ];

    let cors = if config.cors_origins().iter().any(|origin| origin == "*") {
        tracing::warn!("CORS configured to allow all origins - not recommended for production");
        CorsLayer::new().allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .cors_origins()
            .iter()
            .filter_map(|origin| match origin.parse() {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "Ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        CorsLayer::new().allow_origin(origins)
    };

    cors.allow_methods(methods)
        .allow_headers(Any)
        .expose_headers(exposed)
}
