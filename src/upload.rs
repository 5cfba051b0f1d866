//! File upload to a conversation
//!
//! `POST /chat/upload/<conversation>/` with a multipart body holding one
//! `file` field. The server announces the stored file to the conversation
//! itself, as a `chat_message` with `file_url`, so nothing is sent over the
//! chat channel here.
//!
//! Every call is independent: after a failure the same file can be sent
//! again right away.

use crate::config::{ClientConfig, ConfigError};
use crate::notice::{Notice, Notifier};
use reqwest::header::COOKIE;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    InvalidEndpoint(#[from] ConfigError),

    #[error("Upload request failed: {0}")]
    Http(String),

    #[error("Upload rejected with HTTP {status}")]
    Rejected { status: u16 },

    #[error("Unexpected upload response: {0}")]
    InvalidResponse(String),

    #[error("No conversation is open")]
    NoConversation,
}

/// What the server stored
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

// ============================================================================
// UPLOADER
// ============================================================================

pub struct Uploader {
    config: Arc<ClientConfig>,
    notifier: Arc<dyn Notifier>,
    client: reqwest::Client,
}

impl Uploader {
    pub fn new(config: Arc<ClientConfig>, notifier: Arc<dyn Notifier>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            config,
            notifier,
            client,
        }
    }

    /// Reads `path` and uploads it under its file name
    pub async fn upload_file(&self, conversation_id: &str, path: &Path) -> Result<UploadedFile, UploadError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot read {}: {}", path.display(), e);
                self.notifier.notify(Notice::UploadFailed(e.to_string()));
                return Err(e.into());
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        self.upload_bytes(conversation_id, &file_name, bytes).await
    }

    /// Uploads `bytes` as `file_name`. Any failure is also reported as
    /// [`Notice::UploadFailed`].
    pub async fn upload_bytes(
        &self,
        conversation_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile, UploadError> {
        let result = self.send(conversation_id, file_name, bytes).await;
        match &result {
            Ok(uploaded) => tracing::info!("File uploaded: {:?}", uploaded),
            Err(e) => {
                tracing::error!("Upload of {} failed: {}", file_name, e);
                self.notifier.notify(Notice::UploadFailed(e.to_string()));
            }
        }
        result
    }

    async fn send(&self, conversation_id: &str, file_name: &str, bytes: Vec<u8>) -> Result<UploadedFile, UploadError> {
        let url = self.config.http_url(&format!("chat/upload/{}/", conversation_id))?;
        tracing::debug!("Uploading {} ({} bytes) to {}", file_name, bytes.len(), url);

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name.to_string()));

        let mut request = self.client.post(url).multipart(form);
        if let Some(token) = &self.config.csrf_token {
            request = request.header("X-CSRFToken", token.as_str());
        }
        if let Some(cookie) = self.config.cookie_header() {
            request = request.header(COOKIE, cookie);
        }

        let response = request.send().await.map_err(|e| UploadError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
            });
        }

        response
            .json::<UploadedFile>()
            .await
            .map_err(|e| UploadError::InvalidResponse(e.to_string()))
    }
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader").field("host", &self.config.host).finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
