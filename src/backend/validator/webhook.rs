//! Validator for webhook backend configurations

use super::{ValidationReport, check_chunk_size, check_optional_int_field, check_required_field};
use crate::backend::PREPARE_TIMEOUT;
use serde_json::Value;
use url::Url;

/// Validates a webhook backend configuration.
///
/// Same four layers as the bot-channel validator. The live layer fetches
/// the webhook identity, which is also what the driver does at
/// construction, so a config that passes here will construct.
pub struct WebhookConfigValidator {
    config: Value,
    http: reqwest::Client,
    report: ValidationReport,
}

impl WebhookConfigValidator {
    pub fn new(config: Value, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            report: ValidationReport::default(),
        }
    }

    /// Run all validation layers. Same contract as the bot-channel
    /// validator's `validate`.
    pub async fn validate(&mut self, allow_errors: bool, skip_live: bool) -> bool {
        self.report = ValidationReport::default();

        self.check_schema();
        if !self.report.has_errors() {
            self.check_formats();
        }
        if !self.report.has_errors() {
            check_chunk_size(&self.config, &mut self.report);
        }
        if !self.report.has_errors() && !skip_live {
            self.check_live_api().await;
        }

        self.report.log("Discord_Webhook");

        if allow_errors {
            tracing::info!(
                target: "backend::validator",
                errors = self.report.errors().len(),
                "validation errors allowed by caller"
            );
            return true;
        }
        !self.report.has_errors()
    }

    pub fn report(&self) -> &ValidationReport {
        &self.report
    }

    fn check_schema(&mut self) {
        if !self.config.is_object() {
            self.report.add_error("Config must be a JSON object");
            return;
        }
        check_required_field(&self.config, "webhook_url", false, &mut self.report);
        check_optional_int_field(&self.config, "max_chunk_size", &mut self.report);
    }

    fn check_formats(&mut self) {
        let Some(raw) = self.config.get("webhook_url").and_then(Value::as_str) else {
            return;
        };
        let url = match Url::parse(raw) {
            Ok(url) => url,
            Err(err) => {
                self.report
                    .add_error(format!("'webhook_url' is not a valid URL: {err}"));
                return;
            }
        };
        if url.scheme() != "https" {
            self.report
                .add_error(format!("'webhook_url' must use https, got '{}'", url.scheme()));
            return;
        }
        let host = url.host_str().unwrap_or_default();
        if host != "discord.com" && host != "discordapp.com" {
            self.report.add_warning(format!(
                "'webhook_url' host ({host}) is not discord.com. \
                 This might be a proxy or a test endpoint."
            ));
        }
        if !url.path().contains("/api/webhooks/") {
            self.report.add_warning(
                "'webhook_url' does not look like a Discord webhook URL \
                 (expected a path under /api/webhooks/)",
            );
        }
    }

    async fn check_live_api(&mut self) {
        let raw = self
            .config
            .get("webhook_url")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let response = self.http.get(raw).timeout(PREPARE_TIMEOUT).send().await;
        match response {
            Ok(response) if response.status().is_success() => {}
            Ok(response) if response.status().as_u16() == 401 => {
                self.report.add_error("Webhook is invalid or unauthorized.");
            }
            Ok(response) => {
                self.report.add_error(format!(
                    "Unexpected response from Discord API when validating webhook: HTTP {}",
                    response.status().as_u16()
                ));
            }
            Err(err) => {
                self.report
                    .add_error(format!("Failed to validate webhook: {err}"));
            }
        }
    }
}
