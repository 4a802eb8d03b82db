//! Object storage client for product images.

use shopfront_core::ProductId;
use tracing::{info, instrument};

use crate::client::BackendClient;
use crate::error::BackendError;
use crate::retry::Replay;

/// Client for the hosted object storage.
#[derive(Debug, Clone)]
pub struct StorageClient {
    client: BackendClient,
}

impl StorageClient {
    #[must_use]
    pub const fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Upload `bytes` to `bucket/path`, replacing any existing object.
    ///
    /// Returns the object's public URL.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Validation` for an empty path, otherwise any
    /// transport or API failure.
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, BackendError> {
        let path = checked_path(path)?;
        let url = self
            .client
            .config()
            .storage_url(&format!("object/{bucket}/{path}"));

        self.client
            .send("storage.upload", Replay::Safe, || {
                self.client
                    .authorize(self.client.http().post(&url))
                    .header("content-type", content_type)
                    .header("x-upsert", "true")
                    .body(bytes.clone())
            })
            .await?;

        info!(bucket, path = %path, "Uploaded object");
        Ok(self.public_url(bucket, &path))
    }

    /// Delete `bucket/path`.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` on transport or API failure.
    #[instrument(skip(self))]
    pub async fn delete(&self, bucket: &str, path: &str) -> Result<(), BackendError> {
        let path = checked_path(path)?;
        let url = self
            .client
            .config()
            .storage_url(&format!("object/{bucket}/{path}"));
        self.client
            .send("storage.delete", Replay::Safe, || {
                self.client.authorize(self.client.http().delete(&url))
            })
            .await?;
        Ok(())
    }

    /// Public URL of an object in a public bucket.
    #[must_use]
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        self.client
            .config()
            .storage_url(&format!("object/public/{bucket}/{}", sanitize_path(path)))
    }
}

fn checked_path(path: &str) -> Result<String, BackendError> {
    let path = sanitize_path(path);
    if path.is_empty() {
        return Err(shopfront_core::ValidationErrors::single("path", "is required").into());
    }
    Ok(path)
}

/// Normalize an object path: lowercase ASCII letters, digits, `-`, `_`, `.`
/// and `/` separators; no empty, `.` or `..` segments.
#[must_use]
pub fn sanitize_path(path: &str) -> String {
    path.split(['/', '\\'])
        .map(|segment| {
            segment
                .trim()
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                        c.to_ascii_lowercase()
                    } else {
                        '-'
                    }
                })
                .collect::<String>()
        })
        .filter(|s| !s.is_empty() && s.chars().any(|c| c != '.'))
        .collect::<Vec<_>>()
        .join("/")
}

/// Storage path for a product image: `products/<id>/<timestamp>-<name>`.
#[must_use]
pub fn object_path_for(product_id: ProductId, filename: &str) -> String {
    let name = sanitize_path(filename.rsplit(['/', '\\']).next().unwrap_or(filename));
    let name = if name.is_empty() { "image".to_string() } else { name };
    let stamp = chrono::Utc::now().timestamp_millis();
    format!("products/{product_id}/{stamp}-{name}")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use crate::config::BackendConfig;

    use super::*;

    fn storage() -> StorageClient {
        let config = BackendConfig::new("https://proj.backend.test", "anon").unwrap();
        StorageClient::new(BackendClient::new(config).unwrap())
    }

    #[test]
    fn test_sanitize_path() {
        assert_eq!(sanitize_path("Products/My Photo.PNG"), "products/my-photo.png");
        assert_eq!(sanitize_path("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize_path("a//b/./c\\d"), "a/b/c/d");
        assert_eq!(sanitize_path("  "), "");
    }

    #[test]
    fn test_public_url() {
        assert_eq!(
            storage().public_url("product-images", "products/x/a.png"),
            "https://proj.backend.test/storage/v1/object/public/product-images/products/x/a.png"
        );
    }

    #[test]
    fn test_object_path_for() {
        let id = ProductId::generate();
        let path = object_path_for(id, "C:\\Users\\me\\Hero Shot.JPG");
        assert!(path.starts_with(&format!("products/{id}/")));
        assert!(path.ends_with("-hero-shot.jpg"));
        assert!(object_path_for(id, "..").ends_with("-image"));
    }

    #[tokio::test]
    async fn test_upload_rejects_empty_path() {
        let err = storage()
            .upload("product-images", "/../", vec![1], "image/png")
            .await
            .unwrap_err();
        assert!(err.validation_errors().is_some());
    }
}
