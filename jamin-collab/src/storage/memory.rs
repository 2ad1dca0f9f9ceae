use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{Storage, StorageError};
use crate::NormalizedMedia;

const SCHEME: &str = "memory://";

/// An in-memory [Storage] implementation used by tests. Can be told to fail
/// upcoming uploads to exercise retry behavior.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
    failures_left: AtomicU32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the next `count` uploads with a transient error
    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    fn key_of<'a>(&self, key_or_url: &'a str) -> &'a str {
        key_or_url.strip_prefix(SCHEME).unwrap_or(key_or_url)
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload(&self, key: &str, media: &NormalizedMedia) -> Result<String, StorageError> {
        let failures = self.failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(StorageError::Unreachable("simulated outage".to_string()));
        }

        self.objects.lock().insert(
            key.to_string(),
            StoredObject {
                bytes: media.bytes.clone(),
                mime: media.mime.clone(),
            },
        );

        Ok(format!("{SCHEME}{key}"))
    }

    async fn signed_url(&self, key: &str) -> Result<String, StorageError> {
        let key = self.key_of(key);

        if self.objects.lock().contains_key(key) {
            Ok(format!("{SCHEME}{key}?signed"))
        } else {
            Err(StorageError::NotFound(key.to_string()))
        }
    }
}
