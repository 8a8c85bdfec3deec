//! Polar webhook deliveries: signature verification, typed event parsing, and
//! the Diesel models for the delivery ledger.
//!
//! Polar signs deliveries with the Standard Webhooks scheme. The signed content
//! is `{webhook-id}.{webhook-timestamp}.{body}`, HMAC-SHA256 keyed by the
//! endpoint secret, base64 encoded and sent as one or more space-separated
//! `v1,<signature>` entries in the `webhook-signature` header.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const WEBHOOK_ID_HEADER: &str = "webhook-id";
pub const WEBHOOK_TIMESTAMP_HEADER: &str = "webhook-timestamp";
pub const WEBHOOK_SIGNATURE_HEADER: &str = "webhook-signature";

/// Maximum allowed distance between the delivery timestamp and now
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),
    #[error("Webhook secret is not valid base64")]
    InvalidSecret,
    #[error("Webhook signature does not match")]
    InvalidSignature,
    #[error("Webhook timestamp is outside the allowed tolerance")]
    TimestampOutOfTolerance,
    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// The three signing headers of a delivery
#[derive(Debug, Clone, Copy)]
pub struct WebhookHeaders<'a> {
    pub id: &'a str,
    pub timestamp: &'a str,
    pub signature: &'a str,
}

/// Check that a secret can be used as a signing key
pub fn validate_secret(secret: &str) -> Result<(), WebhookError> {
    signing_key(secret).map(|_| ())
}

fn signing_key(secret: &str) -> Result<Vec<u8>, WebhookError> {
    match secret.strip_prefix("whsec_") {
        Some(encoded) => STANDARD
            .decode(encoded)
            .map_err(|_| WebhookError::InvalidSecret),
        None => Ok(secret.as_bytes().to_vec()),
    }
}

fn signing_mac(key: &[u8], headers: &WebhookHeaders<'_>, body: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(headers.id.as_bytes());
    mac.update(b".");
    mac.update(headers.timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    mac
}

/// Compute the `v1,<signature>` header value for a delivery.
pub fn sign(
    secret: &str,
    id: &str,
    timestamp: i64,
    body: &[u8],
) -> Result<String, WebhookError> {
    let key = signing_key(secret)?;
    let timestamp = timestamp.to_string();
    let headers = WebhookHeaders {
        id,
        timestamp: &timestamp,
        signature: "",
    };
    let digest = signing_mac(&key, &headers, body).finalize().into_bytes();
    Ok(format!("v1,{}", STANDARD.encode(digest)))
}

/// Verify a delivery against the endpoint secret.
pub fn verify_signature(
    secret: &str,
    headers: &WebhookHeaders<'_>,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), WebhookError> {
    let timestamp: i64 = headers
        .timestamp
        .trim()
        .parse()
        .map_err(|_| WebhookError::TimestampOutOfTolerance)?;
    let skew = now
        .timestamp()
        .checked_sub(timestamp)
        .map(i64::unsigned_abs)
        .ok_or(WebhookError::TimestampOutOfTolerance)?;
    if skew > SIGNATURE_TOLERANCE_SECS.unsigned_abs() {
        return Err(WebhookError::TimestampOutOfTolerance);
    }

    let key = signing_key(secret)?;
    let mac = signing_mac(&key, headers, body);

    let matched = headers
        .signature
        .split_whitespace()
        .filter_map(|entry| entry.split_once(','))
        .filter(|(version, _)| *version == "v1")
        .filter_map(|(_, sig)| STANDARD.decode(sig).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());

    if matched {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

/// Subscription lifecycle events we act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionEventKind {
    Created,
    Updated,
    Active,
    Canceled,
    Uncanceled,
    Revoked,
}

impl SubscriptionEventKind {
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "subscription.created" => Some(Self::Created),
            "subscription.updated" => Some(Self::Updated),
            "subscription.active" => Some(Self::Active),
            "subscription.canceled" => Some(Self::Canceled),
            "subscription.uncanceled" => Some(Self::Uncanceled),
            "subscription.revoked" => Some(Self::Revoked),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "subscription.created",
            Self::Updated => "subscription.updated",
            Self::Active => "subscription.active",
            Self::Canceled => "subscription.canceled",
            Self::Uncanceled => "subscription.uncanceled",
            Self::Revoked => "subscription.revoked",
        }
    }
}

/// Subscription status as reported by Polar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolarSubscriptionStatus {
    Incomplete,
    IncompleteExpired,
    Trialing,
    Active,
    PastDue,
    Canceled,
    Unpaid,
}

/// Metadata values Polar allows on a subscription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

/// The `data` object of a `subscription.*` event. Fields we don't use are ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolarSubscription {
    pub id: String,
    pub status: PolarSubscriptionStatus,
    pub customer_id: String,
    pub product_id: String,
    #[serde(default)]
    pub recurring_interval: Option<String>,
    pub current_period_start: DateTime<Utc>,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
    /// Null values are dropped, so a null key reads as absent
    #[serde(default, deserialize_with = "deserialize_metadata")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

fn deserialize_metadata<'de, D>(deserializer: D) -> Result<BTreeMap<String, MetadataValue>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: Option<BTreeMap<String, Option<MetadataValue>>> = Option::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
        .collect())
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    event_type: String,
    data: serde_json::Value,
}

/// A parsed delivery
#[derive(Debug, Clone, PartialEq)]
pub enum PolarEvent {
    Subscription {
        kind: SubscriptionEventKind,
        subscription: PolarSubscription,
    },
    /// Event types we acknowledge without acting on (checkout, order, customer, ...)
    Ignored { event_type: String },
}

impl PolarEvent {
    /// Parse a raw body. Known event types must match their shape exactly;
    /// unknown types are acknowledged as [`PolarEvent::Ignored`].
    pub fn parse(body: &[u8]) -> Result<Self, WebhookError> {
        let envelope: Envelope = serde_json::from_slice(body)
            .map_err(|e| WebhookError::MalformedPayload(e.to_string()))?;

        match SubscriptionEventKind::from_event_type(&envelope.event_type) {
            Some(kind) => {
                let subscription: PolarSubscription = serde_json::from_value(envelope.data)
                    .map_err(|e| {
                        WebhookError::MalformedPayload(format!("{}: {}", envelope.event_type, e))
                    })?;
                Ok(PolarEvent::Subscription { kind, subscription })
            }
            None => Ok(PolarEvent::Ignored {
                event_type: envelope.event_type,
            }),
        }
    }

    pub fn event_type(&self) -> &str {
        match self {
            PolarEvent::Subscription { kind, .. } => kind.as_str(),
            PolarEvent::Ignored { event_type } => event_type,
        }
    }
}

/// Diesel model for the polar_webhook_events table
#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = crate::schema::polar_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PolarWebhookEventModel {
    pub id: Uuid,
    pub polar_event_id: String,
    pub event_type: String,
    pub processed: bool,
    pub processing_error: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Insert model for new webhook events
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::polar_webhook_events)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct NewPolarWebhookEvent {
    pub polar_event_id: String,
    pub event_type: String,
    pub payload: serde_json::Value,
}
