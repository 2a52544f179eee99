//! Object store implementation of [`RemoteStore`] and [`AccessPublisher`].
//!
//! Supports S3 and local filesystem via the `object_store` crate, plus an
//! in-memory backend for tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use object_store::buffered::BufWriter;
use object_store::signer::Signer;
use object_store::{ObjectStore, ObjectStoreExt, PutMode, PutOptions, PutPayload};
use tokio::io::AsyncWriteExt;

use super::{ByteStream, KeyBuilder, RemoteStore, StoreError, StoreResult, StoreSpec};
use crate::publish::{check_ttl, AccessLink, AccessPublisher};

/// Archives larger than this are uploaded in parts.
pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 16 * 1024 * 1024;

/// How links are minted for a backend.
enum LinkSigner {
    /// Cloud-native presigned URLs.
    Presigned(Arc<dyn Signer>),
    /// `file://` URL of the object under the store root.
    LocalFile(PathBuf),
    /// Descriptive link for the in-memory backend.
    Memory(String),
}

/// Bucket client backed by `object_store`.
///
/// Supports:
/// - S3 and S3-compatible (MinIO, R2, Wasabi)
/// - Local filesystem
/// - In-memory (for testing)
pub struct ObjectStoreBackend {
    inner: Arc<dyn ObjectStore>,
    keys: KeyBuilder,
    links: LinkSigner,
    multipart_threshold: u64,
}

impl ObjectStoreBackend {
    /// Create a store from a parsed spec.
    pub async fn from_spec(spec: &StoreSpec) -> StoreResult<Self> {
        let (inner, keys, links): (Arc<dyn ObjectStore>, KeyBuilder, LinkSigner) =
            match spec.scheme.as_str() {
                "memory" => {
                    let name = spec.bucket.clone().unwrap_or_else(|| "memory".to_string());
                    let inner: Arc<dyn ObjectStore> = Arc::new(object_store::memory::InMemory::new());
                    (
                        inner,
                        KeyBuilder::new(&spec.prefix),
                        LinkSigner::Memory(name),
                    )
                }
                "file" => {
                    let path = if let Some(bucket) = &spec.bucket {
                        format!("/{}/{}", bucket, spec.prefix)
                    } else {
                        format!("/{}", spec.prefix)
                    };
                    // Ensure directory exists
                    std::fs::create_dir_all(&path).map_err(|e| StoreError::Io {
                        message: format!("failed to create store directory {}: {}", path, e),
                    })?;
                    let root = std::fs::canonicalize(&path).map_err(|e| StoreError::Io {
                        message: format!("failed to resolve store directory {}: {}", path, e),
                    })?;
                    let fs = object_store::local::LocalFileSystem::new_with_prefix(&root)
                        .map_err(|e| StoreError::Io {
                            message: format!("failed to create local store at {}: {}", path, e),
                        })?;
                    let inner: Arc<dyn ObjectStore> = Arc::new(fs);
                    // The prefix is the root directory itself, keys start below it.
                    (inner, KeyBuilder::new(""), LinkSigner::LocalFile(root))
                }
                "s3" => {
                    let bucket = spec
                        .bucket
                        .as_ref()
                        .ok_or_else(|| StoreError::InvalidSpec {
                            spec: spec.display_name(),
                            reason: "S3 URL must include bucket name".to_string(),
                        })?;

                    let mut builder = object_store::aws::AmazonS3Builder::from_env()
                        .with_bucket_name(bucket)
                        .with_allow_http(false);

                    if let Some(region) = &spec.region {
                        builder = builder.with_region(region);
                    }

                    let s3 = Arc::new(builder.build().map_err(|e| StoreError::Io {
                        message: format!("failed to create S3 client: {}", e),
                    })?);
                    let signer: Arc<dyn Signer> = s3.clone();
                    let inner: Arc<dyn ObjectStore> = s3;
                    (
                        inner,
                        KeyBuilder::new(&spec.prefix),
                        LinkSigner::Presigned(signer),
                    )
                }
                scheme => {
                    return Err(StoreError::InvalidSpec {
                        spec: spec.display_name(),
                        reason: format!("unsupported scheme: {}", scheme),
                    })
                }
            };

        tracing::debug!(store = %spec.display_name(), "connected object store");

        Ok(Self {
            inner,
            keys,
            links,
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        })
    }

    /// Create a store from a URL string.
    pub async fn from_url(url: &str) -> StoreResult<Self> {
        let spec = StoreSpec::parse(url)?;
        Self::from_spec(&spec).await
    }

    /// Create an in-memory store for testing.
    pub fn memory() -> Self {
        Self::memory_with_prefix("")
    }

    /// Create an in-memory store with a prefix for testing.
    pub fn memory_with_prefix(prefix: &str) -> Self {
        Self::from_store(Arc::new(object_store::memory::InMemory::new()), prefix)
    }

    /// Wrap an existing `object_store` handle. Links are descriptive only.
    pub fn from_store(inner: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        Self {
            inner,
            keys: KeyBuilder::new(prefix),
            links: LinkSigner::Memory("memory".to_string()),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
        }
    }

    /// Upload files above `threshold` bytes in parts.
    pub fn with_multipart_threshold(mut self, threshold: u64) -> Self {
        self.multipart_threshold = threshold;
        self
    }

    /// Store `bytes` at `key`, overwriting. Used to seed fixtures.
    pub async fn put_bytes(&self, key: &str, bytes: impl Into<Bytes>) -> StoreResult<()> {
        let location = self.keys.object_key(key);
        self.inner
            .put(&location, PutPayload::from_bytes(bytes.into()))
            .await
            .map_err(|e| StoreError::from_object_store(e, key))?;
        Ok(())
    }

    /// Attempt a conditional put (If-None-Match: "*").
    /// Falls back to check-then-put if conditional writes aren't supported.
    async fn put_if_not_exists(
        &self,
        location: &object_store::path::Path,
        key: &str,
        bytes: Bytes,
    ) -> StoreResult<()> {
        let opts = PutOptions {
            mode: PutMode::Create, // Fails if object exists
            ..Default::default()
        };

        match self
            .inner
            .put_opts(location, PutPayload::from_bytes(bytes.clone()), opts)
            .await
        {
            Ok(_) => return Ok(()),
            Err(object_store::Error::NotSupported { .. }) => {
                tracing::warn!(
                    "Conditional writes not supported by backend, falling back to check-then-put"
                );
            }
            Err(e) => return Err(StoreError::from_object_store(e, key)),
        }

        // Racy, but best-effort for non-compliant backends
        self.ensure_absent(location, key).await?;

        self.inner
            .put(location, PutPayload::from_bytes(bytes))
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to put object: {}", e),
            })?;

        Ok(())
    }

    async fn ensure_absent(&self, location: &object_store::path::Path, key: &str) -> StoreResult<()> {
        match self.inner.head(location).await {
            Ok(_) => Err(StoreError::AlreadyExists {
                key: key.to_string(),
            }),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(StoreError::from_object_store(e, key)),
        }
    }

    async fn put_multipart_file(
        &self,
        location: &object_store::path::Path,
        key: &str,
        path: &Path,
    ) -> StoreResult<()> {
        self.ensure_absent(location, key).await?;

        let mut file = tokio::fs::File::open(path).await?;
        let mut writer = BufWriter::new(Arc::clone(&self.inner), location.clone());
        tokio::io::copy(&mut file, &mut writer)
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to stream {} to {}: {}", path.display(), key, e),
            })?;
        writer.shutdown().await.map_err(|e| StoreError::Io {
            message: format!("failed to complete upload of {}: {}", key, e),
        })?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for ObjectStoreBackend {
    async fn get(&self, key: &str) -> StoreResult<ByteStream> {
        let location = self.keys.object_key(key);
        let result = self
            .inner
            .get(&location)
            .await
            .map_err(|e| StoreError::from_object_store(e, key))?;

        let key = key.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| StoreError::from_object_store(e, &key))
            .boxed())
    }

    async fn put_file(&self, key: &str, path: &Path) -> StoreResult<u64> {
        let location = self.keys.object_key(key);
        let size = tokio::fs::metadata(path).await?.len();

        if size > self.multipart_threshold {
            tracing::debug!(key, bytes = size, "uploading in parts");
            self.put_multipart_file(&location, key, path).await?;
        } else {
            let bytes = tokio::fs::read(path).await?;
            self.put_if_not_exists(&location, key, Bytes::from(bytes))
                .await?;
        }

        Ok(size)
    }

    async fn list_keys(&self, prefix: Option<&str>) -> StoreResult<Vec<String>> {
        let list_prefix = self.keys.list_prefix(prefix);

        let entries: Vec<_> = self
            .inner
            .list(list_prefix.as_ref())
            .try_collect()
            .await
            .map_err(|e| StoreError::Io {
                message: format!("failed to list objects: {}", e),
            })?;

        let mut keys: Vec<String> = entries
            .iter()
            .filter_map(|meta| self.keys.relative_key(&meta.location))
            .collect();
        keys.sort();

        Ok(keys)
    }
}

#[async_trait]
impl AccessPublisher for ObjectStoreBackend {
    async fn presign(&self, key: &str, ttl: Duration) -> StoreResult<AccessLink> {
        check_ttl(ttl)?;
        let location = self.keys.object_key(key);

        // Never hand out a link to something that isn't there.
        self.inner
            .head(&location)
            .await
            .map_err(|e| StoreError::from_object_store(e, key))?;

        let url = match &self.links {
            LinkSigner::Presigned(signer) => signer
                .signed_url(http::Method::GET, &location, ttl)
                .await
                .map_err(|e| StoreError::from_object_store(e, key))?
                .to_string(),
            LinkSigner::LocalFile(root) => {
                let path = root.join(location.as_ref());
                url::Url::from_file_path(&path)
                    .map_err(|()| StoreError::Io {
                        message: format!("not an absolute path: {}", path.display()),
                    })?
                    .to_string()
            }
            LinkSigner::Memory(name) => format!(
                "memory://{}/{}?expires={}",
                name,
                location.as_ref(),
                ttl.as_secs()
            ),
        };

        Ok(AccessLink::new(url, key, ttl))
    }
}
