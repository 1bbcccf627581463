//! Board vendor client contracts + the Kilter implementation.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crux_core::BoardType;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

pub mod kilter;

pub use kilter::{KilterClient, SyncPage, SyncPager};

pub const CRATE_NAME: &str = "crux-adapters";

/// Authenticated vendor session, owned by a single sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorSession {
    pub token: String,
    pub vendor_user_id: i64,
}

/// One logged climb as reported by the vendor.
///
/// Not unique per record: overlapping watermark windows replay the same
/// climb/angle/timestamp tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorAscentRecord {
    pub climb_uuid: String,
    #[serde(default)]
    pub user_id: i64,
    pub angle: i32,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_mirror: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub bid_count: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub quality: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub difficulty: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_benchmark: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub comment: String,
    pub climbed_at: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_listed: bool,
    #[serde(default)]
    pub attempt_id: Option<i64>,
}

/// Climb setup metadata; only used to give imported ascents a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorClimbRecord {
    pub uuid: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub setter_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub layout_id: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub is_draft: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub frames_count: i64,
    #[serde(default)]
    pub angle: Option<i32>,
}

/// Flattened result of one logical sync pull, in page order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VendorSyncResult {
    pub ascents: Vec<VendorAscentRecord>,
    pub climbs: Vec<VendorClimbRecord>,
}

#[derive(Debug, Error)]
pub enum VendorError {
    #[error("invalid board username or password")]
    InvalidCredentials,
    #[error("board vendor unavailable: {message}")]
    Unavailable { status: Option<u16>, message: String },
    #[error("malformed board vendor response: {0}")]
    Malformed(String),
}

impl VendorError {
    pub fn status(&self) -> Option<u16> {
        match self {
            VendorError::Unavailable { status, .. } => *status,
            _ => None,
        }
    }

    fn from_transport(err: reqwest::Error) -> Self {
        let message = if err.is_timeout() {
            "request timed out".to_string()
        } else {
            err.to_string()
        };
        VendorError::Unavailable {
            status: err.status().map(|s| s.as_u16()),
            message,
        }
    }
}

#[async_trait]
pub trait BoardClient: Send + Sync {
    fn board_type(&self) -> BoardType;

    async fn authenticate(&self, username: &str, password: &str)
        -> Result<VendorSession, VendorError>;

    /// Pull ascents and climbs logged since `since` (or the whole history).
    ///
    /// Hitting the page cap is not an error: the partial result is returned.
    async fn fetch_ascents_and_climbs(
        &self,
        token: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<VendorSyncResult, VendorError>;

    /// Public page for a climb on the vendor's site.
    fn climb_url(&self, climb_uuid: &str) -> String;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub max_pages: usize,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            max_pages: kilter::DEFAULT_MAX_PAGES,
        }
    }
}

pub fn build_http_client(config: &HttpClientConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .gzip(true)
        .brotli(true)
        .timeout(config.timeout);

    if let Some(user_agent) = &config.user_agent {
        builder = builder.user_agent(user_agent.clone());
    }

    builder.build().context("building reqwest client")
}

/// First `max_chars` characters of a vendor payload, for diagnostics.
pub fn payload_prefix(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascent_record_tolerates_nulls_and_missing_fields() {
        let record: VendorAscentRecord = serde_json::from_value(serde_json::json!({
            "climb_uuid": "c1",
            "angle": 40,
            "bid_count": null,
            "comment": null,
            "difficulty": 25.4,
            "climbed_at": "2024-03-01 10:00:00"
        }))
        .unwrap();
        assert_eq!(record.bid_count, 0);
        assert_eq!(record.comment, "");
        assert!(!record.is_mirror);
        assert_eq!(record.attempt_id, None);
    }

    #[test]
    fn ascent_record_requires_key_fields() {
        let missing_angle = serde_json::from_value::<VendorAscentRecord>(serde_json::json!({
            "climb_uuid": "c1",
            "climbed_at": "2024-03-01 10:00:00"
        }));
        assert!(missing_angle.is_err());
    }

    #[test]
    fn payload_prefix_respects_char_boundaries() {
        assert_eq!(payload_prefix("héllo", 2), "hé");
        assert_eq!(payload_prefix("ok", 300), "ok");
    }
}
