// src/storage.rs
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object storage is not configured")]
    NotConfigured,
    #[error("File type '{0}' is not allowed")]
    InvalidFileType(String),
    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("URL parsing failed: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Storage rejected upload: {status} - {body}")]
    Rejected { status: u16, body: String },
}

impl StorageError {
    pub fn code(&self) -> &'static str {
        match self {
            StorageError::NotConfigured => "STORAGE_NOT_CONFIGURED",
            StorageError::InvalidFileType(_) => "INVALID_FILE_TYPE",
            StorageError::Timeout(_) => "UPLOAD_TIMEOUT",
            StorageError::Request(_) | StorageError::UrlParse(_) | StorageError::Rejected { .. } => {
                "UPLOAD_FAILED"
            }
        }
    }
}

/// A file handed in by a caller, not yet stored anywhere.
#[derive(Debug, Clone)]
pub struct UploadDocument {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

impl UploadDocument {
    /// Lower-cased extension including the dot, or an empty string.
    pub fn extension(&self) -> String {
        match self.file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!(".{}", ext.to_lowercase()),
            _ => String::new(),
        }
    }

    pub fn ensure_extension(&self, allowed: &[&str]) -> Result<(), StorageError> {
        if allowed.contains(&self.extension().as_str()) {
            Ok(())
        } else {
            Err(StorageError::InvalidFileType(self.file_name.clone()))
        }
    }

    /// Object key under `prefix`, derived from the content hash so re-uploads
    /// of the same bytes land on the same key.
    pub fn object_key(&self, prefix: &str) -> String {
        let digest = Sha256::digest(&self.bytes);
        format!(
            "{}/{}{}",
            prefix.trim_end_matches('/'),
            &hex::encode(digest)[..32],
            self.extension()
        )
    }
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stores the bytes and returns their public URL.
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError>;
}

/// Uploads `doc` under `prefix` with an upper bound on the wait.
pub async fn upload_document(
    storage: &dyn ObjectStorage,
    bucket: &str,
    prefix: &str,
    doc: &UploadDocument,
    timeout: Duration,
) -> Result<String, StorageError> {
    let key = doc.object_key(prefix);
    debug!("Uploading {} ({} bytes) as {}", doc.file_name, doc.bytes.len(), key);
    match tokio::time::timeout(
        timeout,
        storage.upload(bucket, &key, &doc.content_type, doc.bytes.clone()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => {
            error!("Upload of {} timed out after {:?}", doc.file_name, timeout);
            Err(StorageError::Timeout(timeout))
        }
    }
}

// --- HTTP object storage ---

/// Bucket-style HTTP storage: `PUT {base}/object/{bucket}/{key}`, public read at
/// `{base}/object/public/{bucket}/{key}`.
pub struct HttpObjectStorage {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpObjectStorage {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, StorageError> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
        bytes: Bytes,
    ) -> Result<String, StorageError> {
        let upload_url = self.base_url.join(&format!("object/{bucket}/{key}"))?;
        let public_url = self.base_url.join(&format!("object/public/{bucket}/{key}"))?;

        let mut request = self
            .client
            .put(upload_url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read response body".to_string());
            error!("Object storage rejected {}: {} - {}", key, status, body);
            return Err(StorageError::Rejected { status, body });
        }

        info!("Uploaded object {}/{}", bucket, key);
        Ok(public_url.to_string())
    }
}

/// Used when no storage endpoint is configured; every upload fails.
pub struct DisabledStorage;

#[async_trait]
impl ObjectStorage for DisabledStorage {
    async fn upload(&self, _: &str, _: &str, _: &str, _: Bytes) -> Result<String, StorageError> {
        Err(StorageError::NotConfigured)
    }
}

#[cfg(test)]
pub use memory::InMemoryStorage;

#[cfg(test)]
mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    };

    #[derive(Clone, Default)]
    pub struct InMemoryStorage {
        objects: Arc<Mutex<HashMap<String, Bytes>>>,
        failing: Arc<AtomicBool>,
        delay: Arc<Mutex<Option<Duration>>>,
    }

    impl InMemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn set_delay(&self, delay: Duration) {
            *self.delay.lock().unwrap() = Some(delay);
        }

        pub fn object_count(&self) -> usize {
            self.objects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ObjectStorage for InMemoryStorage {
        async fn upload(
            &self,
            bucket: &str,
            key: &str,
            _content_type: &str,
            bytes: Bytes,
        ) -> Result<String, StorageError> {
            let delay = *self.delay.lock().unwrap();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Rejected {
                    status: 503,
                    body: "storage offline".into(),
                });
            }
            self.objects
                .lock()
                .unwrap()
                .insert(format!("{bucket}/{key}"), bytes);
            Ok(format!("memory://{bucket}/{key}"))
        }
    }
}
