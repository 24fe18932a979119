//! Bot-channel storage backend
//!
//! Stores each file in its own public thread under a configured channel,
//! one message per ciphertext chunk, authenticated as a bot.

use crate::backend::validator::BotChannelConfigValidator;
use crate::backend::{
    CHUNK_TIMEOUT, DEFAULT_MAX_CHUNK_SIZE, DISCORD_API_BASE, FileMeta, JsonMap, PREPARE_TIMEOUT,
    StorageBackend, StorageError, StorageResult, id_string, require_str,
};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

/// Thread names are capped well below Discord's 100-char limit
const MAX_THREAD_NAME: usize = 90;

#[derive(Debug)]
pub struct BotChannelBackend {
    http: reqwest::Client,
    bot_token: String,
    server_id: String,
    channel_id: String,
    max_chunk_size: usize,
    api_base: String,
}

impl BotChannelBackend {
    /// Build a driver from a backend config object, validating it first
    /// unless `skip_validation` is set (test harnesses only).
    pub async fn new(
        http: reqwest::Client,
        config: &JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Self> {
        if !skip_validation {
            let mut validator =
                BotChannelConfigValidator::new(Value::Object(config.clone()), http.clone());
            if !validator.validate(false, false).await {
                return Err(StorageError::ConfigInvalid {
                    report: validator.report().render(),
                });
            }
        }

        let bot_token = config
            .get("bot_token")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StorageError::usage("backend config is missing 'bot_token'"))?
            .to_string();
        let server_id = config
            .get("server_id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::usage("backend config is missing 'server_id'"))?;
        let channel_id = config
            .get("channel_id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::usage("backend config is missing 'channel_id'"))?;
        let max_chunk_size = config
            .get("max_chunk_size")
            .and_then(Value::as_u64)
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_CHUNK_SIZE);

        Ok(Self {
            http,
            bot_token,
            server_id,
            channel_id,
            max_chunk_size,
            api_base: DISCORD_API_BASE.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }
}

#[async_trait]
impl StorageBackend for BotChannelBackend {
    /// Creates a new thread under the configured channel and returns
    /// `{"thread_id": ...}` as storage context.
    async fn prepare_storage(&self, file_meta: &FileMeta) -> StorageResult<JsonMap> {
        let filename = file_meta.filename.as_deref().unwrap_or("Untitled");
        let mut thread_name = format!("[FILE] {filename}");
        if thread_name.chars().count() > MAX_THREAD_NAME {
            info!(target: "backend::bot_channel", "thread name too long, truncating");
            thread_name = thread_name.chars().take(MAX_THREAD_NAME).collect::<String>() + "...";
        }

        info!(target: "backend::bot_channel", thread_name = %thread_name, "creating thread");

        let url = format!("{}/channels/{}/threads", self.api_base, self.channel_id);
        let payload = json!({
            "name": thread_name,
            "type": 11, // PUBLIC_THREAD
            "auto_archive_duration": 10080, // 7 days
        });

        let response = self
            .http
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&payload)
            .timeout(PREPARE_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::upload_prep(format!("network error creating thread: {e}")))?;

        let status = response.status();
        if status.as_u16() != 201 {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::upload_prep(format!(
                "Discord API error (status {status}): {body}"
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| StorageError::upload_prep(format!("invalid thread response: {e}")))?;
        let thread_id = data
            .get("id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::upload_prep("thread response missing 'id'"))?;

        info!(target: "backend::bot_channel", thread_id = %thread_id, "thread created");

        let mut context = JsonMap::new();
        context.insert("thread_id".to_string(), Value::String(thread_id));
        Ok(context)
    }

    /// Posts the chunk as a `chunk.enc` attachment in the file's thread.
    async fn upload_chunk(
        &self,
        chunk: Bytes,
        storage_context: &JsonMap,
    ) -> StorageResult<JsonMap> {
        let thread_id = require_str(storage_context, "thread_id", "storage_context")
            .map_err(StorageError::usage)?;

        debug!(
            target: "backend::bot_channel",
            thread_id = %thread_id,
            size = chunk.len(),
            "uploading chunk"
        );

        let url = format!("{}/channels/{}/messages", self.api_base, thread_id);
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
            .header("Authorization", self.auth_header())
            .multipart(form)
            .timeout(CHUNK_TIMEOUT)
            .send()
            .await
            .map_err(|e| StorageError::upload(format!("network error uploading chunk: {e}")))?;

        let status = response.status();
        if status.as_u16() != 200 {
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
            .ok_or_else(|| StorageError::upload("Discord API response missing 'id' field"))?;
        reference.insert("message_id".to_string(), message_id);
        reference.insert(
            "thread_id".to_string(),
            Value::String(thread_id.to_string()),
        );

        debug!(
            target: "backend::bot_channel",
            message_id = ?reference.get("message_id"),
            "chunk uploaded"
        );
        Ok(reference)
    }

    /// Fetches the carrying message, then downloads its first attachment.
    async fn download_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<Bytes> {
        let chunk_thread_id = chunk_ref.get("thread_id").and_then(id_string);
        let file_thread_id = storage_context.get("thread_id").and_then(id_string);
        if let (Some(from_chunk), Some(from_file)) = (&chunk_thread_id, &file_thread_id) {
            if from_chunk != from_file {
                warn!(
                    target: "backend::bot_channel",
                    "thread_id mismatch between chunk reference and storage context, using storage context"
                );
            }
        }
        let thread_id = file_thread_id.or(chunk_thread_id).ok_or_else(|| {
            StorageError::download(
                "either chunk reference or storage context must contain 'thread_id'",
            )
        })?;
        let message_id = chunk_ref
            .get("message_id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::download("chunk reference must contain 'message_id'"))?;

        debug!(
            target: "backend::bot_channel",
            thread_id = %thread_id,
            message_id = %message_id,
            "fetching chunk message"
        );

        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, thread_id, message_id
        );
        let response = self
            .http
            .get(&url)
            .header("Authorization", self.auth_header())
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

    /// Deletes the message carrying the chunk. The thread itself is left
    /// behind; Discord archives empty threads on its own schedule.
    async fn delete_chunk(
        &self,
        chunk_ref: &JsonMap,
        storage_context: &JsonMap,
    ) -> StorageResult<()> {
        let thread_id = storage_context
            .get("thread_id")
            .or_else(|| chunk_ref.get("thread_id"))
            .and_then(id_string)
            .ok_or_else(|| {
                StorageError::delete(
                    "either chunk reference or storage context must contain 'thread_id'",
                )
            })?;
        let message_id = chunk_ref
            .get("message_id")
            .and_then(id_string)
            .ok_or_else(|| StorageError::delete("chunk reference must contain 'message_id'"))?;

        let url = format!(
            "{}/channels/{}/messages/{}",
            self.api_base, thread_id, message_id
        );
        let response = self
            .http
            .delete(&url)
            .header("Authorization", self.auth_header())
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

        info!(target: "backend::bot_channel", message_id = %message_id, "chunk deleted");
        Ok(())
    }

    fn max_chunk_size(&self) -> usize {
        self.max_chunk_size
    }
}

/// Pick the first attachment off a Discord message and fetch its bytes.
/// Bot uploads carry exactly one chunk per message.
pub(crate) async fn download_first_attachment(
    http: &reqwest::Client,
    message: &Value,
    message_id: &str,
) -> StorageResult<Bytes> {
    let attachment_url = message
        .get("attachments")
        .and_then(Value::as_array)
        .and_then(|attachments| attachments.first())
        .and_then(|attachment| attachment.get("url"))
        .and_then(Value::as_str)
        .ok_or_else(|| {
            StorageError::download(format!("no attachments found in message {message_id}"))
        })?;

    debug!(target: "backend::bot_channel", url = %attachment_url, "downloading attachment");

    let response = http
        .get(attachment_url)
        .timeout(CHUNK_TIMEOUT)
        .send()
        .await
        .map_err(|e| StorageError::download(format!("network error downloading attachment: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StorageError::download(format!(
            "failed to download attachment (status {status}): {body}"
        )));
    }

    response
        .bytes()
        .await
        .map_err(|e| StorageError::download(format!("error reading attachment body: {e}")))
}
