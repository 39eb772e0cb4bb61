// Image hosting. Only the returned URL is ever stored.

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("media host rejected the upload: {0}")]
    Rejected(String),
    #[error("media host request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for MediaError {
    fn from(e: reqwest::Error) -> Self {
        MediaError::Transport(e.to_string())
    }
}

impl From<MediaError> for ApiError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::Rejected(msg) => ApiError::BadRequest("UPLOAD_REJECTED", msg),
            MediaError::Transport(msg) => ApiError::Upstream(msg),
        }
    }
}

#[async_trait]
pub trait MediaHost: Send + Sync {
    /// Uploads the bytes into `folder` and returns the public https URL.
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        folder: &str,
    ) -> Result<String, MediaError>;
}

pub struct HttpMediaHost {
    client: reqwest::Client,
    upload_url: String,
    upload_preset: String,
}

impl HttpMediaHost {
    pub fn new(client: reqwest::Client, upload_url: &str, upload_preset: &str) -> Self {
        Self {
            client,
            upload_url: upload_url.to_string(),
            upload_preset: upload_preset.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    error: Option<UploadError>,
}

#[derive(Debug, Deserialize)]
struct UploadError {
    message: String,
}

#[async_trait]
impl MediaHost for HttpMediaHost {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        folder: &str,
    ) -> Result<String, MediaError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("folder", folder.to_string());

        let resp = self
            .client
            .post(&self.upload_url)
            .multipart(form)
            .send()
            .await?;

        let status = resp.status();
        let body: UploadResponse = resp.json().await?;
        match (body.secure_url, body.error) {
            (Some(url), _) if status.is_success() => Ok(url),
            (_, Some(err)) => Err(MediaError::Rejected(err.message)),
            _ => Err(MediaError::Rejected(format!("upload failed with status {status}"))),
        }
    }
}

/// Folder names are path segments on the media host.
pub fn sanitize_folder(folder: &str) -> Option<String> {
    let f = folder.trim().trim_matches('/');
    let ok = !f.is_empty()
        && f.len() <= 64
        && f.split('/').all(|seg| {
            !seg.is_empty()
                && seg != ".."
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    ok.then(|| f.to_string())
}

#[cfg(test)]
pub mod fake {
    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeMediaHost {
        pub uploads: Mutex<Vec<(String, String, usize)>>,
    }

    #[async_trait]
    impl MediaHost for FakeMediaHost {
        async fn upload(
            &self,
            bytes: Vec<u8>,
            file_name: &str,
            folder: &str,
        ) -> Result<String, MediaError> {
            self.uploads
                .lock()
                .unwrap()
                .push((folder.to_string(), file_name.to_string(), bytes.len()));
            Ok(format!("https://media.test/{folder}/{file_name}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_folder() {
        assert_eq!(sanitize_folder("pets"), Some("pets".into()));
        assert_eq!(sanitize_folder("/users/avatars/"), Some("users/avatars".into()));
        assert_eq!(sanitize_folder("../secrets"), None);
        assert_eq!(sanitize_folder("a//b"), None);
        assert_eq!(sanitize_folder("pets photos"), None);
        assert_eq!(sanitize_folder(""), None);
    }

    #[test]
    fn test_rejection_maps_to_bad_request() {
        let err: ApiError = MediaError::Rejected("bad format".into()).into();
        assert!(matches!(err, ApiError::BadRequest("UPLOAD_REJECTED", _)));
    }
}
