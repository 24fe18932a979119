//! Backend configuration validation
//!
//! One validator per backend platform. Validation runs in four layers
//! (schema, format, business rules, live API), short-circuiting on the
//! first layer that records errors. Format and business-rule findings that only
//! indicate suspicious (not fatal) values are recorded as warnings so test
//! credentials keep working.

mod bot_channel;
mod webhook;

pub use bot_channel::BotChannelConfigValidator;
pub use webhook::WebhookConfigValidator;

use serde_json::Value;

/// Smallest accepted `max_chunk_size` (1 KiB)
pub const MIN_CHUNK_SIZE: i64 = 1024;
/// Largest accepted `max_chunk_size` (Discord's 10 MiB free-tier cap)
pub const MAX_CHUNK_SIZE: i64 = 10 * 1024 * 1024;
/// Recommended ceiling, leaving headroom for encryption overhead (8 MiB)
pub const RECOMMENDED_MAX_CHUNK_SIZE: i64 = 8 * 1024 * 1024;

/// Collected validation findings plus a formatted report.
#[derive(Debug, Default, Clone)]
pub struct ValidationReport {
    errors: Vec<String>,
    warnings: Vec<String>,
}

impl ValidationReport {
    pub fn add_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Human-readable report of all findings.
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        if self.errors.is_empty() && self.warnings.is_empty() {
            lines.push("[+] Configuration is valid".to_string());
        } else {
            if !self.errors.is_empty() {
                lines.push(format!("[x] {} error(s) found:", self.errors.len()));
                for error in &self.errors {
                    lines.push(format!("  - {error}"));
                }
            }
            if !self.warnings.is_empty() {
                lines.push(format!("[!] {} warning(s):", self.warnings.len()));
                for warning in &self.warnings {
                    lines.push(format!("  - {warning}"));
                }
            }
        }
        lines.join("\n")
    }

    /// Log findings and a summary the way every validator does.
    fn log(&self, platform: &str) {
        for error in &self.errors {
            tracing::error!(target: "backend::validator", platform, "config validation error: {error}");
        }
        for warning in &self.warnings {
            tracing::warn!(target: "backend::validator", platform, "config validation warning: {warning}");
        }
        tracing::info!(
            target: "backend::validator",
            platform,
            errors = self.errors.len(),
            warnings = self.warnings.len(),
            "config validation completed"
        );
        tracing::debug!(target: "backend::validator", "{}", self.render());
    }
}

/// Business-rule check shared by all Discord-backed platforms: the chunk
/// size must sit inside the platform's attachment limits. Out-of-bounds
/// values are warnings, not errors.
fn check_chunk_size(config: &Value, report: &mut ValidationReport) {
    let Some(size) = config.get("max_chunk_size") else {
        return;
    };
    let Some(size) = size.as_i64() else {
        // Schema layer already rejected non-integer values
        return;
    };
    if size < MIN_CHUNK_SIZE {
        report.add_warning(format!(
            "max_chunk_size ({size}) is too small. Minimum is {MIN_CHUNK_SIZE} bytes"
        ));
    } else if size > MAX_CHUNK_SIZE {
        report.add_warning(format!(
            "max_chunk_size ({size}) exceeds Discord's limit. Maximum is {MAX_CHUNK_SIZE} bytes"
        ));
    } else if size > RECOMMENDED_MAX_CHUNK_SIZE {
        report.add_warning(format!(
            "max_chunk_size ({size}) is larger than recommended ({RECOMMENDED_MAX_CHUNK_SIZE}). \
             Large chunks leave no headroom for encryption overhead"
        ));
    }
}

/// Schema helper: a required field that must be present, non-empty, and a
/// string (or, when `allow_int`, an integer).
fn check_required_field(
    config: &Value,
    field: &str,
    allow_int: bool,
    report: &mut ValidationReport,
) {
    let Some(value) = config.get(field) else {
        report.add_error(format!("Missing required field: '{field}'"));
        return;
    };
    match value {
        Value::Null => report.add_error(format!("Field '{field}' cannot be empty")),
        Value::String(s) if s.is_empty() => {
            report.add_error(format!("Field '{field}' cannot be empty"));
        }
        Value::String(_) => {}
        Value::Number(n) if allow_int && (n.is_i64() || n.is_u64()) => {}
        other => {
            let expected = if allow_int { "string or integer" } else { "string" };
            report.add_error(format!(
                "Field '{field}' must be {expected}, got {}",
                json_type_name(other)
            ));
        }
    }
}

/// Schema helper: an optional field that, when present, must be an integer.
fn check_optional_int_field(config: &Value, field: &str, report: &mut ValidationReport) {
    if let Some(value) = config.get(field) {
        if !value.is_null() && !value.is_i64() && !value.is_u64() {
            report.add_error(format!(
                "Optional field '{field}' must be integer, got {}",
                json_type_name(value)
            ));
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
