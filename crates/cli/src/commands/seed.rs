use crate::commands::{exit, with_database, CommandResult};
use deedline_db::{migrations, DemoSeedDataset, PropertySeedInfo, VerificationResult};

pub fn run() -> CommandResult {
    let result = with_database("seed", |_config, pool| async move {
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), exit::MIGRATION))?;

        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), exit::SEED))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), exit::SEED))?;

        if verification.all_present {
            Ok(seeded.properties_seeded)
        } else {
            Err(("seed_verification", verification_failure(&verification), exit::SEED))
        }
    });

    match result {
        Ok(properties) => CommandResult::success("seed", success_message(&properties)),
        Err(failure) => failure,
    }
}

fn success_message(properties: &[PropertySeedInfo]) -> String {
    let lines: Vec<String> = properties
        .iter()
        .map(|property| {
            format!(
                "  - {} (seller {}, {} document(s)): {}",
                property.property_id,
                property.seller_id,
                property.document_count,
                property.description
            )
        })
        .collect();
    format!("demo listings loaded:\n{}", lines.join("\n"))
}

fn verification_failure(verification: &VerificationResult) -> String {
    let failed: Vec<String> = verification
        .checks
        .iter()
        .filter(|check| !check.ok)
        .map(|check| format!("{}:{}", check.property_id, check.check))
        .collect();

    if failed.is_empty() {
        "some seed data failed to load".to_string()
    } else {
        format!("seed verification failed for checks: {}", failed.join(", "))
    }
}
