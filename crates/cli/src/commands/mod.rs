pub mod approval;
pub mod config;
pub mod evaluate;
pub mod migrate;
pub mod project;
pub mod seed;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Runtime;

use renobudget_core::config::{AppConfig, LoadOptions};
use renobudget_core::errors::{ApplicationError, InterfaceError};
use renobudget_db::{connect_with_settings, migrations, SqlStore};
use renobudget_notify::ConfiguredNotifier;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success carrying a structured report for the caller to consume.
    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        correlation_id: &str,
        data: impl Serialize,
    ) -> Self {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: Some(correlation_id.to_string()),
            data: Some(data),
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Failure raised by an engine operation, classified through [`InterfaceError`].
    pub fn from_application_error(
        command: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let interface = error.into_interface(correlation_id);
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(interface.error_class().to_string()),
            message: format!("{} ({interface})", interface.user_message()),
            correlation_id: Some(correlation_id.to_string()),
            data: None,
        };
        Self { exit_code: interface_exit_code(&interface), output: serialize_payload(payload) }
    }
}

fn interface_exit_code(error: &InterfaceError) -> u8 {
    match error {
        InterfaceError::BadRequest { .. } => 7,
        InterfaceError::NotFound { .. } => 8,
        InterfaceError::Conflict { .. } => 9,
        InterfaceError::ServiceUnavailable { .. } => 10,
        InterfaceError::Internal { .. } => 11,
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    let config = AppConfig::load(options).map_err(|error| {
        CommandResult::failure(command, "config_validation", format!("configuration issue: {error}"), 2)
    })?;
    crate::init_logging(&config);
    Ok(config)
}

pub(crate) fn runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Connects and brings the schema up to date before handing out a store.
pub(crate) async fn open_store(config: &AppConfig) -> Result<SqlStore, (&'static str, String, u8)> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;
    Ok(SqlStore::new(pool))
}

pub(crate) fn new_correlation_id() -> String {
    format!("cli-{}", uuid::Uuid::new_v4())
}

/// Failure of an engine-backed command: either setup or the operation itself.
pub(crate) enum CommandError {
    Setup { error_class: &'static str, message: String, exit_code: u8 },
    Application(ApplicationError),
}

impl From<(&'static str, String, u8)> for CommandError {
    fn from((error_class, message, exit_code): (&'static str, String, u8)) -> Self {
        Self::Setup { error_class, message, exit_code }
    }
}

impl From<ApplicationError> for CommandError {
    fn from(error: ApplicationError) -> Self {
        Self::Application(error)
    }
}

impl CommandError {
    pub(crate) fn into_result(self, command: &str, correlation_id: &str) -> CommandResult {
        match self {
            Self::Setup { error_class, message, exit_code } => {
                CommandResult::failure(command, error_class, message, exit_code)
            }
            Self::Application(error) => {
                CommandResult::from_application_error(command, error, correlation_id)
            }
        }
    }
}

pub(crate) fn notifier(config: &AppConfig) -> Result<ConfiguredNotifier, CommandError> {
    ConfiguredNotifier::from_config(&config.notifications).map_err(|error| CommandError::Setup {
        error_class: "notifier_init",
        message: error.to_string(),
        exit_code: 3,
    })
}
