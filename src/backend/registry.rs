//! Platform registry
//!
//! Maps a backend platform tag to a driver factory. The registry is
//! populated once at startup and then shared read-only; an unknown tag is
//! a fatal configuration error.

use crate::backend::{
    BotChannelBackend, JsonMap, StorageBackend, StorageError, StorageResult, WebhookBackend,
};
use async_trait::async_trait;
use std::collections::HashMap;

/// Platform tag for the bot-channel driver
pub const PLATFORM_DISCORD: &str = "Discord";
/// Platform tag for the webhook driver
pub const PLATFORM_DISCORD_WEBHOOK: &str = "Discord_Webhook";

/// Constructs one driver variant from a stored backend config.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn build(
        &self,
        http: reqwest::Client,
        config: JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Box<dyn StorageBackend>>;
}

struct BotChannelFactory;

#[async_trait]
impl BackendFactory for BotChannelFactory {
    async fn build(
        &self,
        http: reqwest::Client,
        config: JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = BotChannelBackend::new(http, &config, skip_validation).await?;
        Ok(Box::new(backend))
    }
}

struct WebhookFactory;

#[async_trait]
impl BackendFactory for WebhookFactory {
    async fn build(
        &self,
        http: reqwest::Client,
        config: JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        let backend = WebhookBackend::new(http, &config, skip_validation).await?;
        Ok(Box::new(backend))
    }
}

/// Immutable-after-init mapping from platform tag to driver factory.
pub struct BackendRegistry {
    factories: HashMap<String, Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    /// An empty registry, for callers that bring their own platforms.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// The registry with all built-in platforms.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(PLATFORM_DISCORD, Box::new(BotChannelFactory));
        registry.register(PLATFORM_DISCORD_WEBHOOK, Box::new(WebhookFactory));
        registry
    }

    /// Register a platform. Meant to be called during initialization,
    /// before the registry is shared.
    pub fn register(&mut self, platform: impl Into<String>, factory: Box<dyn BackendFactory>) {
        self.factories.insert(platform.into(), factory);
    }

    pub fn contains(&self, platform: &str) -> bool {
        self.factories.contains_key(platform)
    }

    /// All registered platform tags, sorted for stable display.
    pub fn platforms(&self) -> Vec<&str> {
        let mut platforms: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        platforms.sort_unstable();
        platforms
    }

    /// Construct a driver for `platform` from its stored config.
    pub async fn build(
        &self,
        platform: &str,
        http: reqwest::Client,
        config: JsonMap,
        skip_validation: bool,
    ) -> StorageResult<Box<dyn StorageBackend>> {
        let factory = self
            .factories
            .get(platform)
            .ok_or_else(|| StorageError::UnsupportedPlatform(platform.to_string()))?;
        factory.build(http, config, skip_validation).await
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
