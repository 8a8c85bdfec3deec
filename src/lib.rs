//! contributor.info billing and spam presentation services.
//!
//! Maps Polar subscription webhooks onto plan tiers and feature limits, and
//! classifies contribution spam scores into display tiers and badges.

use diesel_migrations::{EmbeddedMigrations, embed_migrations};

pub mod actions;
pub mod auth;
pub mod billing_config;
pub mod log_format;
pub mod metrics;
pub mod polar_config;
pub mod polar_webhooks;
pub mod polar_webhooks_repo;
pub mod schema;
pub mod spam;
pub mod spam_repo;
pub mod subscriptions;
pub mod subscriptions_repo;
pub mod telemetry;
pub mod tier_mapper;
pub mod web;

pub use spam::{SpamIndicator, SpamScore, SpamTier};
pub use subscriptions::{SubscriptionTier, TierLimits};
pub use tier_mapper::TierMapper;

// Embed migrations into the binary
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations/");
