use std::fs;
use std::path::Path;

use renobudget_core::config::LoadOptions;
use renobudget_core::domain::project::NewProject;
use renobudget_core::ProjectEngine;

use crate::commands::{
    load_config, new_correlation_id, open_store, runtime, CommandError, CommandResult,
};

/// Creates a project and its categories from a JSON definition file.
pub fn create(options: LoadOptions, definition_path: &Path) -> CommandResult {
    let request = match read_definition(definition_path) {
        Ok(request) => request,
        Err(message) => return CommandResult::failure("create-project", "validation", message, 7),
    };
    let config = match load_config("create-project", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("create-project") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = new_correlation_id();

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let engine =
            ProjectEngine::new(store.clone(), config.budget.thresholds().default_warning_pct);
        let created = engine.create_project(request, &correlation_id).await?;
        store.pool().close().await;
        Ok::<_, CommandError>(created)
    });

    match result {
        Ok(created) => CommandResult::success_with_data(
            "create-project",
            format!(
                "project `{}` created with {} categories",
                created.project.id.0,
                created.categories.len()
            ),
            &correlation_id,
            &created,
        ),
        Err(error) => error.into_result("create-project", &correlation_id),
    }
}

fn read_definition(path: &Path) -> Result<NewProject, String> {
    let raw = fs::read_to_string(path)
        .map_err(|error| format!("could not read `{}`: {error}", path.display()))?;
    serde_json::from_str(&raw)
        .map_err(|error| format!("`{}` is not a valid project definition: {error}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use rust_decimal::Decimal;

    use super::read_definition;

    #[test]
    fn definition_file_parses_decimal_amounts() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{
                "name": "Bathroom Refresh",
                "description": null,
                "total_budget": "8000",
                "owner_id": "u-homeowner",
                "auto_approval_ceiling": "250",
                "categories": [
                    {{ "name": "Tiles", "description": null, "budgeted_amount": "2500", "alert_threshold": null }}
                ]
            }}"#
        )
        .expect("write definition");

        let request = read_definition(file.path()).expect("definition");
        assert_eq!(request.total_budget, Decimal::from(8_000));
        assert_eq!(request.auto_approval_ceiling, Some(Decimal::from(250)));
        assert_eq!(request.categories[0].alert_threshold, None);
    }

    #[test]
    fn missing_file_is_reported_with_path() {
        let error = read_definition(std::path::Path::new("/nonexistent/project.json"))
            .expect_err("missing file");
        assert!(error.contains("/nonexistent/project.json"));
    }
}
