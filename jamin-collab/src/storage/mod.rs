use async_trait::async_trait;
use chrono::Utc;
use log::warn;
use std::time::Duration;
use thiserror::Error;

mod http;
pub use http::*;

mod memory;
pub use memory::*;

use crate::{util::sanitize_file_name, NormalizedMedia, PrimaryKey};

#[derive(Debug, Error)]
pub enum StorageError {
    /// The storage backend could not be reached or misbehaved mid-request
    #[error("Storage request failed: {0}")]
    Unreachable(String),
    /// The storage backend refused the request
    #[error("Storage rejected {key} with status {status}")]
    Rejected { key: String, status: u16 },
    #[error("Object {0} doesn't exist")]
    NotFound(String),
}

/// Represents a type that can store uploaded recordings and hand out URLs
/// for them
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Stores the media under `key`, returning the URL it is reachable at
    async fn upload(&self, key: &str, media: &NormalizedMedia) -> Result<String, StorageError>;

    /// Returns a short-lived signed URL for an object. `key` also accepts a
    /// full URL previously returned by [Storage::upload].
    async fn signed_url(&self, key: &str) -> Result<String, StorageError>;
}

/// Builds the canonical object key for an uploaded recording:
/// `{entity}/{parent-id?}/{timestamp}-{name}`. The timestamp keeps repeated
/// uploads of the same file name from colliding.
pub fn object_key(entity: &str, parent_id: Option<PrimaryKey>, file_name: &str) -> String {
    let name = sanitize_file_name(file_name);
    let stamp = Utc::now().timestamp_millis();

    match parent_id {
        Some(parent_id) => format!("{entity}/{parent_id}/{stamp}-{name}"),
        None => format!("{entity}/{stamp}-{name}"),
    }
}

const UPLOAD_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(250);

/// Calls [Storage::upload], retrying transient failures with a doubling
/// backoff. Rejections that won't change on a retry are returned immediately.
pub async fn upload_with_retry<S>(
    storage: &S,
    key: &str,
    media: &NormalizedMedia,
) -> Result<String, StorageError>
where
    S: Storage,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 1;

    loop {
        match storage.upload(key, media).await {
            Ok(url) => return Ok(url),
            Err(e) if attempt < UPLOAD_ATTEMPTS && is_transient(&e) => {
                warn!("Upload of {key} failed on attempt {attempt}: {e}");

                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_transient(error: &StorageError) -> bool {
    match error {
        StorageError::Unreachable(_) => true,
        StorageError::Rejected { status, .. } => *status >= 500,
        StorageError::NotFound(_) => false,
    }
}

#[cfg(test)]
mod test {
    use super::{object_key, upload_with_retry, MemoryStorage, StorageError};
    use crate::NormalizedMedia;

    fn media() -> NormalizedMedia {
        NormalizedMedia {
            bytes: vec![1, 2, 3],
            mime: "audio/wav".to_string(),
            file_name: "take.wav".to_string(),
        }
    }

    #[test]
    fn object_keys_are_namespaced() {
        let theme_key = object_key("themes", None, "my take.wav");
        assert!(theme_key.starts_with("themes/"));
        assert!(theme_key.ends_with("-my_take.wav"));

        let layer_key = object_key("layers", Some(7), "solo.webm");
        assert!(layer_key.starts_with("layers/7/"));
        assert!(layer_key.ends_with("-solo.webm"));
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let storage = MemoryStorage::new();
        storage.fail_next(2);

        let url = upload_with_retry(&storage, "themes/1-take.wav", &media())
            .await
            .unwrap();

        assert_eq!(url, "memory://themes/1-take.wav");
        assert!(storage.object("themes/1-take.wav").is_some());
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let storage = MemoryStorage::new();
        storage.fail_next(3);

        let result = upload_with_retry(&storage, "themes/1-take.wav", &media()).await;

        assert!(matches!(result, Err(StorageError::Unreachable(_))));
        assert!(storage.object("themes/1-take.wav").is_none());
    }
}
