//! Validator for bot-channel backend configurations

use super::{ValidationReport, check_chunk_size, check_optional_int_field, check_required_field};
use crate::backend::{DISCORD_API_BASE, PREPARE_TIMEOUT};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

// Example shape: MTk4NjIyNDgzNDcxOTI1MjQ4.Cl2FMQ.ZnCjm1XVW7vRze4b7Cq4se7kKWs
static BOT_TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{20,}\.[A-Za-z0-9_-]{6,}\.[A-Za-z0-9_-]{27,}$")
        .expect("bot token pattern")
});

// Discord snowflake ids are 17-19 decimal digits
static SNOWFLAKE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{17,19}$").expect("snowflake pattern"));

/// Validates a bot-channel backend configuration.
///
/// Layers: schema (required keys, types), format (token and snowflake
/// patterns), business rules (chunk size bounds), live API (the bot token
/// is probed against `/users/@me`).
pub struct BotChannelConfigValidator {
    config: Value,
    http: reqwest::Client,
    api_base: String,
    report: ValidationReport,
}

impl BotChannelConfigValidator {
    pub fn new(config: Value, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            api_base: DISCORD_API_BASE.to_string(),
            report: ValidationReport::default(),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    /// Run all validation layers.
    ///
    /// `allow_errors` makes the call return `true` even when errors were
    /// recorded; reserved for test harnesses. `skip_live` skips the
    /// network probe.
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

        self.report.log("Discord");

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
        check_required_field(&self.config, "bot_token", false, &mut self.report);
        check_required_field(&self.config, "server_id", true, &mut self.report);
        check_required_field(&self.config, "channel_id", true, &mut self.report);
        check_optional_int_field(&self.config, "max_chunk_size", &mut self.report);
    }

    fn check_formats(&mut self) {
        if let Some(token) = self.config.get("bot_token").and_then(Value::as_str) {
            if !token.is_empty() && !BOT_TOKEN_RE.is_match(token) {
                self.report.add_warning(
                    "Bot token doesn't match the expected Discord token format. \
                     This might be a test token or incorrectly formatted.",
                );
            }
        }

        for field in ["server_id", "channel_id"] {
            if let Some(value) = self.config.get(field) {
                let value_str = match value {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    _ => continue,
                };
                if !SNOWFLAKE_RE.is_match(&value_str) {
                    self.report.add_error(format!(
                        "'{field}' ({value_str}) doesn't match Discord snowflake id format (17-19 digits)"
                    ));
                }
            }
        }
    }

    async fn check_live_api(&mut self) {
        let token = self
            .config
            .get("bot_token")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let url = format!("{}/users/@me", self.api_base);

        let response = self
            .http
            .get(&url)
            .header("Authorization", format!("Bot {token}"))
            .timeout(PREPARE_TIMEOUT)
            .send()
            .await;

        match response {
            Ok(response) if response.status().is_success() => {}
            Ok(response) if response.status().as_u16() == 401 => {
                self.report
                    .add_error("Bot token is invalid or unauthorized.");
            }
            Ok(response) => {
                self.report.add_error(format!(
                    "Unexpected response from Discord API when validating bot token: HTTP {}",
                    response.status().as_u16()
                ));
            }
            Err(err) => {
                self.report
                    .add_error(format!("Failed to validate bot token: {err}"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn valid_config() -> Value {
        json!({
            "bot_token": "MTk4NjIyNDgzNDcxOTI1MjQ4.Cl2FMQ.ZnCjm1XVW7vRze4b7Cq4se7kKWs",
            "server_id": "123456789012345678",
            "channel_id": "876543210987654321",
        })
    }

    #[tokio::test]
    async fn accepts_valid_config_offline() {
        let mut validator = BotChannelConfigValidator::new(valid_config(), reqwest::Client::new());
        assert!(validator.validate(false, true).await);
        assert!(validator.report().warnings().is_empty());
    }

    #[tokio::test]
    async fn missing_bot_token_is_an_error() {
        let mut config = valid_config();
        config.as_object_mut().unwrap().remove("bot_token");
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(!validator.validate(false, true).await);
        assert!(validator.report().errors()[0].contains("bot_token"));
    }

    #[tokio::test]
    async fn empty_channel_id_is_an_error() {
        let mut config = valid_config();
        config["channel_id"] = json!("");
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(!validator.validate(false, true).await);
    }

    #[tokio::test]
    async fn malformed_token_is_only_a_warning() {
        let mut config = valid_config();
        config["bot_token"] = json!("test-token");
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(validator.validate(false, true).await);
        assert_eq!(validator.report().warnings().len(), 1);
    }

    #[tokio::test]
    async fn short_server_id_is_an_error() {
        let mut config = valid_config();
        config["server_id"] = json!("123");
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(!validator.validate(false, true).await);
        assert!(validator.report().errors()[0].contains("snowflake"));
    }

    #[tokio::test]
    async fn numeric_ids_are_accepted() {
        let mut config = valid_config();
        config["server_id"] = json!(123456789012345678i64);
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(validator.validate(false, true).await);
    }

    #[tokio::test]
    async fn allow_errors_reports_valid_anyway() {
        let mut config = valid_config();
        config["server_id"] = json!("123");
        let mut validator = BotChannelConfigValidator::new(config, reqwest::Client::new());
        assert!(validator.validate(true, true).await);
        assert!(validator.report().has_errors());
    }

    #[tokio::test]
    async fn live_probe_accepts_authorized_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "1", "bot": true})))
            .mount(&server)
            .await;

        let mut validator = BotChannelConfigValidator::new(valid_config(), reqwest::Client::new())
            .with_api_base(server.uri());
        assert!(validator.validate(false, false).await);
    }

    #[tokio::test]
    async fn live_probe_rejects_unauthorized_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let mut validator = BotChannelConfigValidator::new(valid_config(), reqwest::Client::new())
            .with_api_base(server.uri());
        assert!(!validator.validate(false, false).await);
        assert!(validator.report().errors()[0].contains("unauthorized"));
    }

    #[tokio::test]
    async fn live_probe_rejects_unexpected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut validator = BotChannelConfigValidator::new(valid_config(), reqwest::Client::new())
            .with_api_base(server.uri());
        assert!(!validator.validate(false, false).await);
        assert!(validator.report().errors()[0].contains("HTTP 500"));
    }
}
