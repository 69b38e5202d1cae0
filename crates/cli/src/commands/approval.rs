use renobudget_core::config::LoadOptions;
use renobudget_core::domain::approval::ApprovalAction;
use renobudget_core::domain::purchase::PurchaseId;
use renobudget_core::domain::UserId;
use renobudget_core::ApprovalEngine;

use crate::commands::{
    load_config, new_correlation_id, notifier, open_store, runtime, CommandError, CommandResult,
};

pub fn resolve(options: LoadOptions, purchase_id: &str) -> CommandResult {
    let config = match load_config("resolve", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("resolve") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = new_correlation_id();
    let purchase_id = PurchaseId(purchase_id.to_string());

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let engine = ApprovalEngine::new(store.clone(), notifier(&config)?);
        let report = engine.resolve(&purchase_id, &correlation_id).await?;
        store.pool().close().await;
        Ok::<_, CommandError>(report)
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "resolve",
            format!("purchase `{}` resolved: {}", purchase_id.0, report.result.reason()),
            &correlation_id,
            &report,
        ),
        Err(error) => error.into_result("resolve", &correlation_id),
    }
}

pub fn decide(
    options: LoadOptions,
    purchase_id: &str,
    approver_id: &str,
    action: &str,
    comments: Option<&str>,
) -> CommandResult {
    let Some(action) = ApprovalAction::parse(action) else {
        return CommandResult::failure(
            "decide",
            "validation",
            format!("action must be `approve` or `reject`, got `{action}`"),
            7,
        );
    };
    let config = match load_config("decide", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("decide") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = new_correlation_id();
    let purchase_id = PurchaseId(purchase_id.to_string());
    let approver_id = UserId(approver_id.to_string());

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let engine = ApprovalEngine::new(store.clone(), notifier(&config)?);
        let report =
            engine.decide(&purchase_id, &approver_id, action, comments, &correlation_id).await?;
        store.pool().close().await;
        Ok::<_, CommandError>(report)
    });

    match result {
        Ok(report) => CommandResult::success_with_data(
            "decide",
            format!("purchase `{}` is now {}", purchase_id.0, report.status.as_str()),
            &correlation_id,
            &report,
        ),
        Err(error) => error.into_result("decide", &correlation_id),
    }
}

pub fn pay(options: LoadOptions, purchase_id: &str) -> CommandResult {
    let config = match load_config("pay", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("pay") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };
    let correlation_id = new_correlation_id();
    let purchase_id = PurchaseId(purchase_id.to_string());

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;
        let engine = ApprovalEngine::new(store.clone(), notifier(&config)?);
        let purchase = engine.mark_paid(&purchase_id, &correlation_id).await?;
        store.pool().close().await;
        Ok::<_, CommandError>(purchase)
    });

    match result {
        Ok(purchase) => CommandResult::success_with_data(
            "pay",
            format!("purchase `{}` marked paid", purchase_id.0),
            &correlation_id,
            &purchase,
        ),
        Err(error) => error.into_result("pay", &correlation_id),
    }
}
