use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::subscriptions::SubscriptionTier;

/// One billing-provider product and the tier it grants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductEntry {
    pub id: String,
    pub tier: SubscriptionTier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Top-level billing configuration file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BillingConfigFile {
    #[serde(default)]
    pub products: Vec<ProductEntry>,
}

impl BillingConfigFile {
    /// Load config from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        let config: BillingConfigFile =
            toml::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))?;
        Ok(config)
    }

    /// Save config to a TOML file (atomic: write to .tmp then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        let tmp_path = path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, &contents)
            .with_context(|| format!("Failed to write {:?}", tmp_path))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", tmp_path, path))?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<ProductCatalog> {
        ProductCatalog::new(self.products.iter().map(|p| (p.id.clone(), p.tier)))
    }
}

/// Static lookup from product id to tier
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductCatalog {
    products: HashMap<String, SubscriptionTier>,
}

impl ProductCatalog {
    /// Build a catalog. The same product id listed under two different tiers is an error.
    pub fn new(entries: impl IntoIterator<Item = (String, SubscriptionTier)>) -> Result<Self> {
        let mut products = HashMap::new();
        for (id, tier) in entries {
            let id = id.trim().to_string();
            if id.is_empty() {
                continue;
            }
            if let Some(existing) = products.insert(id.clone(), tier)
                && existing != tier
            {
                anyhow::bail!(
                    "Product {} is mapped to both {} and {}",
                    id,
                    existing,
                    tier
                );
            }
        }
        Ok(Self { products })
    }

    pub fn resolve(&self, product_id: &str) -> Option<SubscriptionTier> {
        self.products.get(product_id).copied()
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }

    /// File form of this catalog, products sorted by id
    pub fn to_config_file(&self) -> BillingConfigFile {
        let mut products: Vec<ProductEntry> = self
            .products
            .iter()
            .map(|(id, tier)| ProductEntry {
                id: id.clone(),
                tier: *tier,
                name: None,
            })
            .collect();
        products.sort_by(|a, b| a.id.cmp(&b.id));
        BillingConfigFile { products }
    }

    /// Build a catalog from `POLAR_PRODUCT_ID_PRO` / `POLAR_PRODUCT_ID_TEAM`
    /// (comma-separated, so monthly and yearly products can share a tier)
    pub fn from_env() -> Result<Self> {
        let mut entries = Vec::new();
        for (var, tier) in [
            ("POLAR_PRODUCT_ID_PRO", SubscriptionTier::Pro),
            ("POLAR_PRODUCT_ID_TEAM", SubscriptionTier::Team),
        ] {
            if let Ok(ids) = std::env::var(var) {
                entries.extend(ids.split(',').map(|id| (id.to_string(), tier)));
            }
        }
        Self::new(entries)
    }

    /// Load from the billing config file if it exists, otherwise from the environment
    pub fn load_default() -> Result<Self> {
        let path = billing_config_path();
        let catalog = if path.exists() {
            BillingConfigFile::load(&path)?.catalog()?
        } else {
            Self::from_env()?
        };
        info!(
            products = catalog.len(),
            path = %path.display(),
            "Loaded billing product catalog"
        );
        Ok(catalog)
    }
}

/// Resolve the billing config file path.
///
/// Priority:
/// 1. `CONTRIBUTOR_BILLING_CONFIG` env var
/// 2. `/etc/contributor-info/billing.toml` (production/staging)
/// 3. `./billing.toml` (development)
pub fn billing_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CONTRIBUTOR_BILLING_CONFIG") {
        return PathBuf::from(path);
    }

    match std::env::var("CONTRIBUTOR_ENV").as_deref() {
        Ok("production") | Ok("staging") => PathBuf::from("/etc/contributor-info/billing.toml"),
        _ => PathBuf::from("./billing.toml"),
    }
}
