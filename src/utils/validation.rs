//! URL and input validation utilities

use anyhow::{anyhow, bail, Result};
use url::Url;

use crate::core::models::{AppError, AppResult};

/// Parse an absolute http(s) URL
pub fn validate_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url.trim()).map_err(|e| anyhow!("Invalid URL format: {}", e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        bail!("URL must be http or https, got {}", parsed.scheme());
    }
    Ok(parsed)
}

/// Trimmed `value`, or [`AppError::InvalidInput`] when it is blank
pub fn require_non_blank<'a>(value: &'a str, field: &str) -> AppResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::InvalidInput(format!("{} cannot be empty", field)));
    }
    Ok(trimmed)
}
