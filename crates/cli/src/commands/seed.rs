use shopper_core::config::LoadOptions;
use shopper_db::{connect_from_config, migrations, DemoCatalog, SeedResult};

use crate::commands::{async_runtime, load_config, CommandResult};

pub fn run(options: &LoadOptions) -> CommandResult {
    let config = match load_config("seed", options) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("seed") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_from_config(&config.analytics)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DemoCatalog::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoCatalog::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verification.all_present {
            Ok(seeded)
        } else {
            let failed_checks: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            Err(("seed_verification", verification_message(&failed_checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", seed_message(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn seed_message(seeded: &SeedResult) -> String {
    format!(
        "demo catalog loaded: {} items, {} reviews",
        seeded.items_seeded, seeded.reviews_seeded
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_error_message_targets_failed_checks() {
        assert_eq!(
            verification_message(&["item B0SANDAL02", "B0SANDAL01 review count"]),
            "Seed verification failed for checks: item B0SANDAL02, B0SANDAL01 review count"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }
}
