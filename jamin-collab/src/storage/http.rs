use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, Client, StatusCode};
use serde::Deserialize;
use url::Url;

use super::{Storage, StorageError};
use crate::NormalizedMedia;

/// Object storage reached over HTTP: objects are PUT under their key and the
/// store signs read URLs on request.
pub struct HttpStorage {
    base: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct SignedResponse {
    url: String,
}

impl HttpStorage {
    pub fn new(base_url: &str) -> Result<Self, url::ParseError> {
        // Parsed only to reject a malformed base early
        let _ = Url::parse(base_url)?;

        Ok(Self {
            base: base_url.trim_end_matches('/').to_string(),
            client: Client::new(),
        })
    }

    /// Strips the store's own base from a previously issued URL, leaving the
    /// object key untouched otherwise
    fn key_of<'a>(&self, key_or_url: &'a str) -> &'a str {
        key_or_url
            .strip_prefix(&self.base)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(key_or_url)
    }
}

#[async_trait]
impl Storage for HttpStorage {
    async fn upload(&self, key: &str, media: &NormalizedMedia) -> Result<String, StorageError> {
        let url = format!("{}/{}", self.base, key);

        let response = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, &media.mime)
            .body(media.bytes.clone())
            .send()
            .await
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(url)
    }

    async fn signed_url(&self, key: &str) -> Result<String, StorageError> {
        let key = self.key_of(key);
        let url = format!("{}/sign/{}", self.base, key);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;

        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }

        if !status.is_success() {
            return Err(StorageError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        let signed: SignedResponse = response
            .json()
            .await
            .map_err(|e| StorageError::Unreachable(e.to_string()))?;

        Ok(signed.url)
    }
}

#[cfg(test)]
mod test {
    use super::HttpStorage;

    #[test]
    fn key_extraction_handles_urls_and_bare_keys() {
        let storage = HttpStorage::new("https://media.jamin.example/store/").unwrap();

        assert_eq!(
            storage.key_of("https://media.jamin.example/store/themes/1-take.wav"),
            "themes/1-take.wav"
        );
        assert_eq!(storage.key_of("themes/1-take.wav"), "themes/1-take.wav");
    }
}
