use anyhow::{Context, Result};

use crate::billing_config::ProductCatalog;
use crate::polar_webhooks::validate_secret;

/// Configuration for the Polar integration
#[derive(Clone)]
pub struct PolarConfig {
    pub webhook_secret: String,
    pub catalog: ProductCatalog,
}

impl PolarConfig {
    /// Rejects an empty secret or a `whsec_` secret that is not valid base64
    pub fn new(webhook_secret: String, catalog: ProductCatalog) -> Result<Self> {
        if webhook_secret.trim().is_empty() {
            anyhow::bail!("POLAR_WEBHOOK_SECRET must not be empty");
        }
        validate_secret(&webhook_secret)
            .context("POLAR_WEBHOOK_SECRET has a whsec_ prefix but is not valid base64")?;

        Ok(Self {
            webhook_secret,
            catalog,
        })
    }

    /// Initialize Polar configuration from the environment and the billing config file
    pub fn from_env() -> Result<Self> {
        let webhook_secret =
            std::env::var("POLAR_WEBHOOK_SECRET").context("POLAR_WEBHOOK_SECRET must be set")?;
        Self::new(webhook_secret, ProductCatalog::load_default()?)
    }
}

impl std::fmt::Debug for PolarConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolarConfig")
            .field("webhook_secret", &"[REDACTED]")
            .field("products", &self.catalog.len())
            .finish()
    }
}
