use boilerbrain_db::{KnowledgeSeedDataset, SeedFaultCode, SEED_FAULT_CODES};

use crate::commands::{load_config, open_database, runtime, CommandResult, StepFailure};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_database(&config).await?;

        let seed_result = KnowledgeSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = KnowledgeSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result: Result<usize, StepFailure> = if verification.all_present {
            Ok(seed_result.fault_codes_seeded)
        } else {
            Err(("seed_verification", verification_failure_message(&verification.checks), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success(
            "seed",
            format!(
                "knowledge seed loaded with {seeded} documented fault codes:\n{}",
                describe_fault_codes(SEED_FAULT_CODES)
            ),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn verification_failure_message(checks: &[(String, bool)]) -> String {
    let failed_checks = checks
        .iter()
        .filter_map(|(check, present)| (!present).then_some(check.as_str()))
        .collect::<Vec<_>>();

    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn describe_fault_codes(fault_codes: &[SeedFaultCode]) -> String {
    fault_codes
        .iter()
        .map(|code| {
            format!(
                "  - {} {} {}: {} ({} steps)",
                code.manufacturer, code.model_name, code.fault_code, code.description, code.step_count
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use boilerbrain_db::SEED_FAULT_CODES;

    use super::{describe_fault_codes, verification_failure_message};

    #[test]
    fn verification_error_message_targets_failed_checks() {
        let checks = vec![
            ("boiler_models#9001".to_string(), true),
            ("boiler_fault_codes#9201".to_string(), false),
            ("knowledge_base#9701".to_string(), false),
        ];

        assert_eq!(
            verification_failure_message(&checks),
            "Seed verification failed for checks: boiler_fault_codes#9201, knowledge_base#9701"
        );
    }

    #[test]
    fn verification_error_message_falls_back_to_generic_when_no_labels() {
        let checks = vec![("boiler_models#9001".to_string(), true)];

        assert_eq!(verification_failure_message(&checks), "Some seed data failed to load");
    }

    #[test]
    fn fault_code_listing_names_model_and_code() {
        let listing = describe_fault_codes(&SEED_FAULT_CODES[..1]);
        assert_eq!(listing, "  - Ideal Logic Combi 30 F1: Low system water pressure (3 steps)");
    }
}
