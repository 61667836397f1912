//! Messaging collaborator: Slack webhook for text, Web API for file uploads.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, SlackConfig};

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("endpoint returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("API error: {error}")]
    Api { error: String },

    #[error("failed to read attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DeliveryError {
    /// Whether the failure looks like missing or rejected credentials.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            DeliveryError::Http { status, .. } => *status == 401 || *status == 403,
            DeliveryError::Api { error } => matches!(
                error.as_str(),
                "not_authed" | "invalid_auth" | "account_inactive" | "token_revoked" | "missing_scope"
            ),
            DeliveryError::Config(_) => true,
            _ => false,
        }
    }
}

/// A file to attach to the messaging channel.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub path: PathBuf,
    pub filename: String,
    pub title: String,
    pub initial_comment: String,
}

/// Delivery seam for reports.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Post a plain-text alert.
    async fn post_text(&self, text: &str) -> Result<(), DeliveryError>;

    /// Upload a file to the configured channel.
    async fn upload_file(&self, upload: &FileUpload) -> Result<(), DeliveryError>;

    /// Fail before any message is sent when uploads cannot be authorised.
    fn ensure_upload_credentials(&self) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Slack-backed [`Notifier`].
pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
    config: SlackConfig,
}

impl SlackNotifier {
    /// Build from settings. The webhook URL is mandatory; the API token is
    /// only required by stages that upload files.
    pub fn from_settings(config: &SlackConfig) -> Result<Self, DeliveryError> {
        let webhook_url = config.require_webhook_url()?.to_string();
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            client,
            webhook_url,
            config: config.clone(),
        })
    }

    fn upload_url(&self) -> String {
        format!("{}/files.upload", self.config.api_base.trim_end_matches('/'))
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn post_text(&self, text: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                body,
            });
        }
        debug!(status = status.as_u16(), bytes = text.len(), "webhook message accepted");
        Ok(())
    }

    fn ensure_upload_credentials(&self) -> Result<(), DeliveryError> {
        self.config.require_api_token()?;
        Ok(())
    }

    async fn upload_file(&self, upload: &FileUpload) -> Result<(), DeliveryError> {
        let token = self.config.require_api_token()?;

        let bytes = tokio::fs::read(&upload.path)
            .await
            .map_err(|source| DeliveryError::Attachment {
                path: upload.path.clone(),
                source,
            })?;

        let file_part = Part::bytes(bytes)
            .file_name(upload.filename.clone())
            .mime_str("image/png")?;
        let form = Form::new()
            .text("channels", self.config.channel.clone())
            .text("filename", upload.filename.clone())
            .text("title", upload.title.clone())
            .text("initial_comment", upload.initial_comment.clone())
            .part("file", file_part);

        let response = self
            .client
            .post(self.upload_url())
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(DeliveryError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ApiResponse = serde_json::from_str(&body).map_err(|_| DeliveryError::Api {
            error: format!("unparseable response: {}", body),
        })?;
        if !parsed.ok {
            return Err(DeliveryError::Api {
                error: parsed.error.unwrap_or_else(|| "unknown_error".to_string()),
            });
        }

        info!(filename = %upload.filename, channel = %self.config.channel, "file uploaded");
        Ok(())
    }
}

/// Prints payloads to stdout instead of sending them. Used for dry runs.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn post_text(&self, text: &str) -> Result<(), DeliveryError> {
        println!("{}", text);
        Ok(())
    }

    async fn upload_file(&self, upload: &FileUpload) -> Result<(), DeliveryError> {
        println!(
            "[dry-run] would upload {} as {:?} ({})",
            upload.path.display(),
            upload.filename,
            upload.title
        );
        Ok(())
    }
}
