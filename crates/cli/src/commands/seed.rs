use renobudget_core::config::LoadOptions;
use renobudget_db::{KitchenRemodelSeed, SeedResult};

use crate::commands::{load_config, open_store, runtime, CommandResult};

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let store = open_store(&config).await?;

        let seeded = KitchenRemodelSeed::load(&store)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;
        let verification = KitchenRemodelSeed::verify(store.pool())
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let outcome = if verification.all_present {
            Ok(seeded)
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        store.pool().close().await;
        outcome
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "Kitchen Remodel demo loaded as `{}`: {} categories, {} purchases, {} approval rule(s)",
        seeded.project_id, seeded.categories_seeded, seeded.purchases_seeded, seeded.rules_seeded
    )
}

fn verification_failure_message(checks: &[(&'static str, bool)]) -> String {
    let failed_checks =
        checks.iter().filter_map(|(check, passed)| (!passed).then_some(*check)).collect::<Vec<_>>();
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}
