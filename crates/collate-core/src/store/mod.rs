//! Bucket access for the pipeline.
//!
//! This module is a thin adapter between the pipeline and S3-compatible
//! object storage. It reads source objects as byte streams, uploads sealed
//! archives, and lists keys for store-backed manifests. Nothing here knows
//! about archives or manifests.
//!
//! # Store URLs
//!
//! ```text
//! s3://images-bucket/prefix?region=eu-west-1
//! file:///srv/collate/uploads
//! memory://scratch  (for testing)
//! ```

pub mod error;
pub mod naming;
pub mod object_store_backend;

use std::path::Path;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

pub use error::{StoreError, StoreResult};
pub use naming::KeyBuilder;
pub use object_store_backend::ObjectStoreBackend;

/// Chunked body of a remote object.
pub type ByteStream = BoxStream<'static, StoreResult<Bytes>>;

/// Parsed store URL from CLI/config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSpec {
    /// The scheme (s3, file, memory)
    pub scheme: String,
    /// Bucket name (empty for file://)
    pub bucket: Option<String>,
    /// Base prefix/path within the bucket
    pub prefix: String,
    /// Optional region (for S3)
    pub region: Option<String>,
}

impl StoreSpec {
    /// Parse a store URL like `s3://bucket/prefix` or `file:///path`.
    pub fn parse(url: &str) -> StoreResult<Self> {
        let parsed = url::Url::parse(url).map_err(|e| StoreError::InvalidSpec {
            spec: url.to_string(),
            reason: e.to_string(),
        })?;

        let scheme = parsed.scheme().to_string();
        if !matches!(scheme.as_str(), "s3" | "file" | "memory") {
            return Err(StoreError::InvalidSpec {
                spec: url.to_string(),
                reason: format!("unsupported scheme: {}", scheme),
            });
        }

        let bucket = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .map(|s| s.to_string());
        let prefix = parsed.path().trim_start_matches('/').to_string();

        if scheme == "s3" && bucket.is_none() {
            return Err(StoreError::InvalidSpec {
                spec: url.to_string(),
                reason: "S3 URL must include bucket name".to_string(),
            });
        }

        // Extract region from query params if present
        let region = parsed
            .query_pairs()
            .find(|(k, _)| k == "region")
            .map(|(_, v)| v.to_string());

        Ok(Self {
            scheme,
            bucket,
            prefix,
            region,
        })
    }

    /// Check if this is a memory store (for testing).
    pub fn is_memory(&self) -> bool {
        self.scheme == "memory"
    }

    /// Check if this is a local file store.
    pub fn is_file(&self) -> bool {
        self.scheme == "file"
    }

    /// Human-readable location, used in logs.
    pub fn display_name(&self) -> String {
        match &self.bucket {
            Some(bucket) if self.prefix.is_empty() => format!("{}://{}", self.scheme, bucket),
            Some(bucket) => format!("{}://{}/{}", self.scheme, bucket, self.prefix),
            None => format!("{}:///{}", self.scheme, self.prefix),
        }
    }
}

impl std::str::FromStr for StoreSpec {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Remote object store client, bound to a single bucket and prefix.
///
/// Implementations must be safe for concurrent use: the pipeline may fetch
/// several keys at once.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open the object at `key` as a chunked stream.
    ///
    /// # Returns
    ///
    /// - `Ok(ByteStream)`; errors may still surface mid-stream
    /// - `Err(StoreError::NotFound)` if the object doesn't exist
    async fn get(&self, key: &str) -> StoreResult<ByteStream>;

    /// Upload a local file as a single object. Never overwrites.
    ///
    /// # Returns
    ///
    /// - `Ok(size)` with the number of bytes uploaded
    /// - `Err(StoreError::AlreadyExists)` if an object already exists at `key`
    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<u64>;

    /// List relative keys under an optional sub-prefix, sorted.
    async fn list_keys(&self, prefix: Option<&str>) -> StoreResult<Vec<String>>;
}

/// Read a stream to completion. Test and tooling helper; the pipeline
/// itself never buffers whole objects.
pub async fn collect_stream(mut stream: ByteStream) -> StoreResult<Vec<u8>> {
    use futures::StreamExt;

    let mut out = Vec::new();
    while let Some(chunk) = stream.next().await {
        out.extend_from_slice(&chunk?);
    }
    Ok(out)
}
