//! TUS protocol version negotiation
//!
//! A request that names a `Tus-Resumable` version other than ours is refused
//! with `412` before any handler runs. Every response advertises the version.

use axum::{
    extract::Request,
    http::{HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tusky_core::AppError;

use crate::constants::{headers, TUS_VERSION};
use crate::error::HttpAppError;

pub async fn tus_middleware(request: Request, next: Next) -> Response {
    let requested = request
        .headers()
        .get(headers::TUS_RESUMABLE)
        .map(|value| value.to_str().unwrap_or_default().trim().to_string());

    let mut response = match requested {
        Some(version) if version != TUS_VERSION && request.method() != Method::OPTIONS => {
            let mut response = HttpAppError(AppError::PreconditionFailed(format!(
                "Unsupported Tus-Resumable version: {}",
                version
            )))
            .into_response();
            response
                .headers_mut()
                .insert(headers::TUS_VERSION, HeaderValue::from_static(TUS_VERSION));
            response
        }
        _ => next.run(request).await,
    };

    response
        .headers_mut()
        .insert(headers::TUS_RESUMABLE, HeaderValue::from_static(TUS_VERSION));
    response
}
