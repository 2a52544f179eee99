//! Time-bounded access links for persisted archives.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::{StoreError, StoreResult};

/// Default link lifetime.
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(5 * 60);

/// Longest lifetime an S3 presigned URL may carry (SigV4 limit).
pub const MAX_LINK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// A publicly resolvable URL for a persisted archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessLink {
    pub url: String,
    /// Key of the blob the link resolves to, relative to the destination.
    pub key: String,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
}

impl AccessLink {
    pub fn new(url: impl Into<String>, key: impl Into<String>, ttl: Duration) -> Self {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            url: url.into(),
            key: key.into(),
            ttl,
            expires_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Issues time-bounded links for blobs already in the destination store.
#[async_trait]
pub trait AccessPublisher: Send + Sync {
    /// Issue a GET link for `key` valid for `ttl`.
    ///
    /// Fails with `StoreError::NotFound` if nothing is stored at `key`.
    async fn presign(&self, key: &str, ttl: Duration) -> StoreResult<AccessLink>;
}

/// Reject lifetimes no backend can honour.
pub fn check_ttl(ttl: Duration) -> StoreResult<()> {
    if ttl.is_zero() {
        return Err(StoreError::InvalidTtl {
            ttl,
            reason: "link lifetime must be positive".to_string(),
        });
    }
    if ttl > MAX_LINK_TTL {
        return Err(StoreError::InvalidTtl {
            ttl,
            reason: format!(
                "link lifetime exceeds {}",
                humantime::format_duration(MAX_LINK_TTL)
            ),
        });
    }
    Ok(())
}
