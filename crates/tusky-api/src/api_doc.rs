//! OpenAPI documentation.

use utoipa::OpenApi;

use crate::error;
use crate::handlers;
use crate::services::upload;
use tusky_core::models;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Tusky API",
        description = "Resumable file uploads over plain HTTP (multipart, raw body, Content-Range) and the TUS 1.0.0 protocol, stored on local disk, S3 or GCS."
    ),
    paths(
        // Uploads
        handlers::files::post_files,
        handlers::files::head_file,
        handlers::files::delete_file,
        handlers::files::options_files,
        handlers::multipart::put_file,
        handlers::multipart::download_file,
        handlers::multipart::get_metadata,
        handlers::multipart::list_files,
        handlers::multipart::delete_files,
        // TUS
        handlers::tus::patch_upload,
        // Health
        handlers::health::health_check,
        handlers::health::liveness_check,
    ),
    components(
        schemas(
            models::UploadRecord,
            models::UploadStatus,
            handlers::multipart::ListResponse,
            handlers::multipart::BatchDeleteRequest,
            handlers::multipart::BatchDeleteResponse,
            upload::BatchDeleteResult,
            upload::BatchDeleteStatus,
            handlers::health::HealthCheckResponse,
            error::ErrorResponse,
        )
    ),
    tags(
        (name = "files", description = "Upload, download and delete files"),
        (name = "tus", description = "TUS 1.0.0 resumable upload protocol"),
        (name = "health", description = "Health checks")
    )
)]
pub struct ApiDoc;
