//! Webhook storage backend
//!
//! Stores chunks as attachment messages posted through a Discord webhook.
//! No bot token is involved: the webhook URL carries its own credential,
//! and chunks are retrieved through the webhook message endpoint.

use crate::backend::bot_channel::download_first_attachment;
use crate::backend::validator::WebhookConfigValidator;
use crate::backend::{
    CHUNK_TIMEOUT, DEFAULT_MAX_CHUNK_SIZE, DISCORD_API_BASE, FileMeta, JsonMap, PREPARE_TIMEOUT,
    StorageBackend, StorageError, StorageResult, id_string, require_str,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Bookmark message content cap, below Discord's 2000-char message limit
const MAX_BOOKMARK_CONTENT: usize = 1950;

#[derive(Debug)]
pub struct WebhookBackend {
    http: reqwest::Client,
    webhook_url: String,
    server_id: String,
    channel_id: String,
    webhook_id: String,
    webhook_token: String,
    max_chunk_size: usize,
    api_base: String,
}

/// Identity advertised by the webhook endpoint itself
#[derive(Debug, serde::Deserialize)]
struct WebhookIdentity {
    guild_id: String,
    channel_id: String,
    id: String,
    token: String,
}

impl WebhookBackend {
    /// Build a driver from a backend config object. Fetches the webhook
    /// identity (guild, channel, id, token) from the webhook URL, so
    /// construction performs one network round trip.
    pub async fn new(
        http: reqwest::Client,
        config: &JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Self> {
        if !skip_validation {
            let mut validator =
                WebhookConfigValidator::new(Value::Object(config.clone()), http.clone());
            if !validator.validate(false, false).await {
                return Err(StorageError::ConfigInvalid {
                    report: validator.report().render(),
                });
            }
        }

        let webhook_url = config
            .get("webhook_url")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StorageError::usage("backend config is missing 'webhook_url'"))?
            .to_string();
        let max_chunk_size = config
            .get("max_chunk_size")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHUNK_SIZE);

        let identity = fetch_identity(&http, &webhook_url).await?;

        Ok(Self {
            http,
            webhook_url,
            server_id: identity.guild_id,
            channel_id: identity.channel_id,
            webhook_id: identity.id,
            webhook_token: identity.token,
            max_chunk_size,
            api_base: DISCORD_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

async fn fetch_identity(http: &reqwest::Client, webhook_url: &str) -> StorageResult<WebhookIdentity> {
    debug!(target: "backend::webhook", "fetching webhook identity");

    let response = http
        .get(webhook_url)
        .timeout(PREPARE_TIMEOUT)
        .send()
        .await
        .map_err(|e| StorageError::upload_prep(format!("network error fetching webhook: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::upload_prep(format!(
            "Discord API error (status {status}): {body}"
        )));
    }

    response
        .json()
        .await
        .map_err(|e| StorageError::upload_prep(format!("invalid webhook identity response: {e}")))
}

#[async_trait]
impl StorageBackend for WebhookBackend {
    /// Posts a short bookmark message to anchor the file and returns the
    /// captured identifiers as storage context.
    async fn prepare_storage(&self, file_meta: &FileMeta) -> StorageResult<JsonMap> {
        let filename = file_meta.filename.as_deref().unwrap_or("Unknown");
        let mut content = format!("Preparing for the upload of {filename}...");
        if content.chars().count() > MAX_BOOKMARK_CONTENT {
            info!(target: "backend::webhook", "bookmark content too long, truncating");
            content = content.chars().take(MAX_BOOKMARK_CONTENT).collect::<String>() + "...";
        }

        info!(target: "backend::webhook", filename = %filename, "posting bookmark message");

        let url = format!("{}?wait=true", self.webhook_url);
        let response = self
            .http
            .post(&url)
            .json(&json!({ "content": content }))
            .timeout(PREPARE_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::upload_prep(format!("network error posting bookmark: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_prep(format!(
                "Discord API error (status {status}): {body}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| StorageError::upload_prep(format!("invalid bookmark response: {e}")))?;

        let message_id = data
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::upload_prep("bookmark response missing 'id'"))?;
        let channel_id = data
            .get("channel_id")
            .and_then(id_string)
            .unwrap_or_else(|| self.channel_id.clone());

        let mut context = JsonMap::new();
        if let Some(timestamp) = data.get("timestamp") {
            context.insert("timestamp".to_string(), timestamp.clone());
        }
        if let Some(webhook_id) = data.get("webhook_id") {
            context.insert("webhook_id".to_string(), webhook_id.clone());
        }
        context.insert(
            "message_url".to_string(),
            Value::String(format!(
                "https://discord.com/channels/{}/{}/{}",
                self.server_id, channel_id, message_id
            )),
        );
        context.insert("message_id".to_string(), Value::String(message_id));
        context.insert("channel_id".to_string(), Value::String(channel_id));
        context.insert(
            "server_id".to_string(),
            Value::String(self.server_id.clone()),
        );
        context.insert(
            "webhook_token".to_string(),
            Value::String(self.webhook_token.clone()),
        );

        info!(
            target: "backend::webhook",
            message_id = ?context.get("message_id"),
            "bookmark message sent"
        );
        Ok(context)
    }

    /// Posts the chunk through the webhook and synthesizes both a human
    /// message URL and the retrievable webhook message URL.
    async fn upload_chunk(
        &self,
        chunk: Bytes,
        storage_context: &JsonMap,
    ) -> StorageResult<JsonMap> {
        require_str(storage_context, "server_id", "storage_context")
            .map_err(StorageError::usage)?;
        require_str(storage_context, "channel_id", "storage_context")
            .map_err(StorageError::usage)?;

        debug!(target: "backend::webhook", size = chunk.len(), "uploading chunk");

        let url = format!("{}?wait=true", self.webhook_url);
        let part = reqwest::multipart::Part::bytes(chunk.to_vec())
            .file_name("chunk.enc")
            .mime_str("application/octet-stream")
            .map_err(|e| StorageError::upload(format!("invalid attachment part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .part("files[0]", part)
            .text("payload_json", "{}");

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .timeout(CHUNK_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::upload(format!("network error uploading chunk: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::upload(format!(
                "Discord API error (status {status}): {body}"
            )));
        }

        let mut reference: JsonMap = response
            .json()
            .await
            .map_err(|e| StorageError::upload(format!("invalid message response: {e}")))?;

        let message_id = reference
            .remove("id")
            .and_then(|id| id_string(&id))
            .ok_or_else(|| StorageError::upload("Discord API response missing 'id' field"))?;

        // The synthesized message_url is for operators; only
        // webhook_message_url is retrievable through the API.
        let message_url = format!(
            "https://discord.com/channels/{}/{}/{}",
            self.server_id, self.channel_id, message_id
        );
        if let (Some(ctx_server), Some(ctx_channel)) = (
            storage_context.get("server_id").and_then(id_string),
            storage_context.get("channel_id").and_then(id_string),
        ) {
            if ctx_server != self.server_id || ctx_channel != self.channel_id {
                debug!(
                    target: "backend::webhook",
                    "storage context ids differ from webhook identity, message_url uses the identity"
                );
            }
        }
        let webhook_message_url = format!(
            "{}/webhooks/{}/{}/messages/{}",
            self.api_base, self.webhook_id, self.webhook_token, message_id
        );

        reference.insert("message_id".to_string(), Value::String(message_id));
        reference.insert("message_url".to_string(), Value::String(message_url));
        reference.insert(
            "webhook_message_url".to_string(),
            Value::String(webhook_message_url),
        );

        debug!(
            target: "backend::webhook",
            message_url = ?reference.get("message_url"),
            "chunk uploaded"
        );
        Ok(reference)
    }

    /// Retrieves the message through its webhook message URL and downloads
    /// the first attachment.
    async fn download_chunk(
        &self,
        chunk_ref: &JsonMap,
        _storage_context: &JsonMap,
    ) -> StorageResult<Bytes> {
        let webhook_message_url = chunk_ref
            .get("webhook_message_url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StorageError::download("chunk reference must contain 'webhook_message_url'")
            })?;
        let message_id = chunk_ref
            .get("message_id")
            .and_then(id_string)
            .unwrap_or_else(|| {
                warn!(target: "backend::webhook", "chunk reference is missing 'message_id'");
                "[unknown id]".to_string()
            });

        debug!(
            target: "backend::webhook",
            message_id = %message_id,
            "fetching chunk message"
        );

        let response = self
            .http
            .get(webhook_message_url)
            .timeout(CHUNK_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::download(format!("network error fetching message: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::download(format!(
                "Discord API error (status {status}): {body}"
            )));
        }

        let message: Value = response
            .json()
            .await
            .map_err(|e| StorageError::download(format!("invalid message response: {e}")))?;
        download_first_attachment(&self.http, &message, &message_id).await
    }

    /// Webhooks may delete their own messages through the same endpoint
    /// that retrieves them.
    async fn delete_chunk(
        &self,
        chunk_ref: &JsonMap,
        _storage_context: &JsonMap,
    ) -> StorageResult<()> {
        let webhook_message_url = chunk_ref
            .get("webhook_message_url")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                StorageError::delete("chunk reference must contain 'webhook_message_url'")
            })?;

        let response = self
            .http
            .delete(webhook_message_url)
            .timeout(CHUNK_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::delete(format!("network error deleting message: {e}")))?;

        let status = response.status();
        if status.as_u16() != 204 {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::delete(format!(
                "Discord API error (status {status}): {body}"
            )));
        }

        info!(target: "backend::webhook", "chunk deleted");
        Ok(())
    }

    fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}
