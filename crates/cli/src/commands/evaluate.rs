use renobudget_core::config::LoadOptions;
use renobudget_core::domain::project::ProjectId;
use renobudget_core::{BudgetAlertEngine, BudgetAlertEvaluator};

use crate::commands::{
    load_config, new_correlation_id, notifier, open_store, runtime, CommandError, CommandResult,
};

/// What to evaluate: one project, or every active project.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvaluateTarget {
    Project(String),
    AllActive,
}

pub fn run(options: LoadOptions, target: EvaluateTarget) -> CommandResult {
    let config = match load_config("evaluate", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("evaluate") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = new_correlation_id();

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let engine = BudgetAlertEngine::new(
            store.clone(),
            notifier(&config)?,
            BudgetAlertEvaluator::new(config.budget.thresholds()),
        );

        let outcome = match &target {
            EvaluateTarget::Project(project_id) => {
                let report = engine.evaluate(&ProjectId(project_id.clone()), &correlation_id).await?;
                let summary = report.summary;
                let message = format!(
                    "project `{project_id}`: {} warning, {} critical, {} exceeded, {} failed categories",
                    summary.warning_count,
                    summary.critical_count,
                    summary.exceeded_count,
                    report.failures.len()
                );
                (message, serde_json::to_value(&report))
            }
            EvaluateTarget::AllActive => {
                let sweep = engine.evaluate_active(&correlation_id).await?;
                let summary = sweep.summary();
                let message = format!(
                    "{} active project(s) evaluated, {} skipped: {} warning, {} critical, {} exceeded",
                    sweep.reports.len(),
                    sweep.failures.len(),
                    summary.warning_count,
                    summary.critical_count,
                    summary.exceeded_count
                );
                (message, serde_json::to_value(&sweep))
            }
        };

        store.pool().close().await;
        Ok::<_, CommandError>(outcome)
    });

    match result {
        Ok((message, Ok(data))) => {
            CommandResult::success_with_data("evaluate", message, &correlation_id, data)
        }
        Ok((_, Err(error))) => {
            CommandResult::failure("evaluate", "serialization", error.to_string(), 1)
        }
        Err(error) => error.into_result("evaluate", &correlation_id),
    }
}
