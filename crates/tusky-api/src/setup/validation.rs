//! Configuration validation
//!
//! Checks run at startup on top of `Config::validate`, for settings that
//! only matter once the HTTP server is exposed.

use anyhow::Result;
use tusky_core::Config;

pub fn validate_config(config: &Config) -> Result<()> {
    config.validate()?;

    if config.is_production() && config.cors_origins().iter().any(|origin| origin == "*") {
        anyhow::bail!(
            "CORS configured to allow all origins (*) in production. \
            Set specific allowed origins via CORS_ORIGINS."
        );
    }

    if config.ttl().is_none() && config.cleanup_interval_secs() > 0 {
        tracing::warn!("CLEANUP_INTERVAL_SECS is set but UPLOAD_TTL is not; nothing will expire");
    }

    Ok(())
}
