use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use renobudget_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field<'a> {
    key: &'static str,
    env_key: &'static str,
    value: &'a str,
}

pub fn run(options: LoadOptions) -> String {
    let explicit_path = options.config_path.clone();
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = explicit_path.or_else(detect_config_path);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let max_connections = config.database.max_connections.to_string();
    let db_timeout = config.database.timeout_secs.to_string();
    let warning_pct = config.budget.default_alert_threshold_pct.to_string();
    let critical_pct = config.budget.critical_threshold_pct.to_string();
    let notifications_enabled = config.notifications.enabled.to_string();
    let api_token = config
        .notifications
        .api_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    let notify_timeout = config.notifications.timeout_secs.to_string();
    let log_format = format!("{:?}", config.logging.format);

    let fields = [
        Field { key: "database.url", env_key: "RENOBUDGET_DATABASE_URL", value: &config.database.url },
        Field {
            key: "database.max_connections",
            env_key: "RENOBUDGET_DATABASE_MAX_CONNECTIONS",
            value: &max_connections,
        },
        Field {
            key: "database.timeout_secs",
            env_key: "RENOBUDGET_DATABASE_TIMEOUT_SECS",
            value: &db_timeout,
        },
        Field {
            key: "budget.default_alert_threshold_pct",
            env_key: "RENOBUDGET_BUDGET_DEFAULT_ALERT_THRESHOLD_PCT",
            value: &warning_pct,
        },
        Field {
            key: "budget.critical_threshold_pct",
            env_key: "RENOBUDGET_BUDGET_CRITICAL_THRESHOLD_PCT",
            value: &critical_pct,
        },
        Field {
            key: "notifications.enabled",
            env_key: "RENOBUDGET_NOTIFICATIONS_ENABLED",
            value: &notifications_enabled,
        },
        Field {
            key: "notifications.webhook_url",
            env_key: "RENOBUDGET_NOTIFICATIONS_WEBHOOK_URL",
            value: config.notifications.webhook_url.as_deref().unwrap_or("<unset>"),
        },
        Field {
            key: "notifications.api_token",
            env_key: "RENOBUDGET_NOTIFICATIONS_API_TOKEN",
            value: &api_token,
        },
        Field {
            key: "notifications.timeout_secs",
            env_key: "RENOBUDGET_NOTIFICATIONS_TIMEOUT_SECS",
            value: &notify_timeout,
        },
        Field { key: "logging.level", env_key: "RENOBUDGET_LOGGING_LEVEL", value: &config.logging.level },
        Field { key: "logging.format", env_key: "RENOBUDGET_LOGGING_FORMAT", value: &log_format },
    ];

    let mut lines = vec!["effective config (source precedence: flag > env > file > default):".to_string()];
    for field in &fields {
        lines.push(render_line(
            field.key,
            field.value,
            field_source(
                field.key,
                Some(field.env_key),
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("renobudget.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/renobudget.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('_') {
        return format!("{prefix}_***");
    }

    "<redacted>".to_string()
}
