//! Reverse geocoding of a bag's first GPS fix.
//!
//! Lookups may be slow or fail; ingestion never waits on them while holding
//! the catalog lock, and a failed lookup only leaves `location_name` empty.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;

use crate::config::GeocodingConfig;

/// Maps a coordinate to a human-readable place name.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    /// Returns `Ok(None)` when the service has no name for the coordinate.
    async fn resolve(&self, latitude: f64, longitude: f64) -> Result<Option<String>>;
}

/// Resolver used when geocoding is disabled.
pub struct DisabledResolver;

#[async_trait]
impl LocationResolver for DisabledResolver {
    async fn resolve(&self, _latitude: f64, _longitude: f64) -> Result<Option<String>> {
        Ok(None)
    }
}

/// Nominatim-compatible reverse geocoding over HTTP.
pub struct NominatimResolver {
    client: reqwest::Client,
    url: String,
}

#[derive(Deserialize)]
struct ReverseResponse {
    display_name: Option<String>,
    error: Option<String>,
}

impl NominatimResolver {
    pub fn new(config: &GeocodingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build geocoding HTTP client")?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }
}

#[async_trait]
impl LocationResolver for NominatimResolver {
    async fn resolve(&self, latitude: f64, longitude: f64) -> Result<Option<String>> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[
                ("format", "jsonv2".to_string()),
                ("lat", latitude.to_string()),
                ("lon", longitude.to_string()),
            ])
            .send()
            .await
            .context("Reverse geocoding request failed")?;

        let status = resp.status();
        if !status.is_success() {
            bail!("Reverse geocoding returned HTTP {}", status);
        }

        let body: ReverseResponse = resp
            .json()
            .await
            .context("Failed to parse reverse geocoding response")?;
        if let Some(err) = body.error {
            // "Unable to geocode" for coordinates in the ocean and similar.
            tracing::debug!(latitude, longitude, error = %err, "no place name");
            return Ok(None);
        }
        Ok(body.display_name)
    }
}

/// Build the resolver selected by `[geocoding]`.
pub fn create_resolver(config: &GeocodingConfig) -> Result<Arc<dyn LocationResolver>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledResolver)),
        "nominatim" => Ok(Arc::new(NominatimResolver::new(config)?)),
        other => bail!("Unknown geocoding provider: '{}'", other),
    }
}
