//! Tusky API Library
//!
//! HTTP surface of the upload engine: multipart/raw uploads, the TUS 1.0.0
//! protocol, downloads, and application setup.

mod api_doc;
pub mod constants;
pub mod error;
mod handlers;
mod middleware;
pub mod services;
pub mod setup;
pub mod state;
mod telemetry;
mod utils;

pub use api_doc::ApiDoc;
pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
