use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use tokio_stream::StreamExt;

use crate::conf::{DestinationConfig, LocalDestinationConfig, S3DestinationConfig};
use crate::core::SluiceError;

use super::Destination;

/// Creates a LocalFileSystem ObjectStore rooted at the configured directory.
pub fn create_local_store(
    config: &LocalDestinationConfig,
) -> Result<Arc<dyn ObjectStore>, SluiceError> {
    std::fs::create_dir_all(&config.path).map_err(|e| {
        SluiceError::StorageError(format!(
            "creating destination directory {}: {}",
            config.path.display(),
            e
        ))
    })?;
    let store = LocalFileSystem::new_with_prefix(&config.path)?;
    Ok(Arc::new(store))
}

/// Creates an S3 ObjectStore from S3DestinationConfig.
pub fn create_s3_store(config: &S3DestinationConfig) -> Result<Arc<dyn ObjectStore>, SluiceError> {
    let mut builder = AmazonS3Builder::new()
        .with_bucket_name(&config.bucket)
        .with_region(&config.region);

    if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
        builder = builder
            .with_access_key_id(key_id)
            .with_secret_access_key(secret);
    }

    // Optional custom endpoint (for MinIO, LocalStack, etc.)
    if let Some(endpoint) = &config.endpoint {
        builder = builder.with_endpoint(endpoint);
        if endpoint.starts_with("http://") {
            builder = builder.with_allow_http(true);
        }
    }

    let store = builder.build().map_err(|e| {
        SluiceError::StorageError(format!(
            "Failed to create S3 store for bucket '{}': {}",
            config.bucket, e
        ))
    })?;

    Ok(Arc::new(store))
}

pub fn open_destination(config: &DestinationConfig) -> Result<ObjectStoreDestination, SluiceError> {
    match config {
        DestinationConfig::Local(c) => Ok(ObjectStoreDestination::new(
            create_local_store(c)?,
            &c.prefix,
        )),
        DestinationConfig::S3(c) => Ok(ObjectStoreDestination::new(
            create_s3_store(c)?,
            &c.prefix,
        )),
    }
}

/// [`Destination`] over any `object_store` backend, with keys placed under an
/// optional root prefix.
///
/// Keys returned by `list` are in stored (percent-encoded) form and are
/// accepted unchanged by `delete`.
pub struct ObjectStoreDestination {
    store: Arc<dyn ObjectStore>,
    root: ObjectPath,
}

impl ObjectStoreDestination {
    pub fn new(store: Arc<dyn ObjectStore>, root: &str) -> Self {
        Self {
            store,
            root: ObjectPath::from(root.trim_matches('/')),
        }
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        self.store.clone()
    }

    fn path(&self, key: &str) -> ObjectPath {
        key.split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.child(part))
    }

    /// Location of a key already in stored form.
    fn stored_path(&self, key: &str) -> Result<ObjectPath, SluiceError> {
        let relative = ObjectPath::parse(key)
            .map_err(|e| SluiceError::StorageError(format!("invalid key '{key}': {e}")))?;
        Ok(relative
            .parts()
            .fold(self.root.clone(), |path, part| path.child(part)))
    }

    fn relative(&self, location: &ObjectPath) -> Option<String> {
        let parts: Vec<String> = location
            .prefix_match(&self.root)?
            .map(|part| part.as_ref().to_string())
            .collect();
        Some(parts.join("/"))
    }
}

#[async_trait]
impl Destination for ObjectStoreDestination {
    async fn put(&self, key: &str, payload: Bytes) -> Result<(), SluiceError> {
        self.store
            .put(&self.path(key), PutPayload::from(payload))
            .await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, SluiceError> {
        let prefix_path = self.path(prefix);
        let mut keys = Vec::new();
        let mut stream = self.store.list(Some(&prefix_path));

        while let Some(result) = stream.next().await {
            let meta = result?;
            if let Some(key) = self.relative(&meta.location) {
                keys.push(key);
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), SluiceError> {
        match self.store.delete(&self.stored_path(key)?).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
