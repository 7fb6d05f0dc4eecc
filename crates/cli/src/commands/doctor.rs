use deedline_core::config::{AppConfig, LoadOptions};
use deedline_core::{Role, TicketSigner};
use deedline_db::{connect_from_config, migrations};
use serde::Serialize;

use crate::commands::CommandResult;

const DOCTOR_FAILURE_EXIT: u8 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code =
        if report.overall_status == CheckStatus::Fail { DOCTOR_FAILURE_EXIT } else { 0 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                concat!(
                    "{{\"overall_status\":\"fail\",",
                    "\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}"
                ),
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_ticket_signer(&config));
            checks.push(check_identity_tokens(&config));
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            let dependent =
                ["ticket_signer", "identity_tokens", "database_connectivity", "schema_migrations"];
            for name in dependent {
                checks
                    .push(DoctorCheck::skipped(name, "skipped because configuration did not load"));
            }
        }
    }

    // Skipped checks are informational; only an explicit failure fails the run.
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_ticket_signer(config: &AppConfig) -> DoctorCheck {
    match TicketSigner::new(&config.auth.ticket_secret, config.grants.ticket_ttl_hours) {
        Ok(_) => DoctorCheck::pass(
            "ticket_signer",
            format!("download tickets valid for {}h", config.grants.ticket_ttl_hours),
        ),
        Err(error) => DoctorCheck::fail("ticket_signer", error.to_string()),
    }
}

fn check_identity_tokens(config: &AppConfig) -> DoctorCheck {
    let tokens = &config.auth.tokens;
    if tokens.is_empty() {
        return DoctorCheck::skipped(
            "identity_tokens",
            "no [[auth.tokens]] configured; every API call will be anonymous",
        );
    }

    let buyers = tokens.iter().filter(|token| token.role == Role::Buyer).count();
    let sellers = tokens.len() - buyers;
    DoctorCheck::pass("identity_tokens", format!("{buyers} buyer and {sellers} seller token(s)"))
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![
                DoctorCheck::fail(
                    "database_connectivity",
                    format!("failed to initialize async runtime: {error}"),
                ),
                DoctorCheck::skipped("schema_migrations", "skipped because runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_from_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped(
                        "schema_migrations",
                        "skipped because database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = DoctorCheck::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        );
        let schema = match migrations::pending_count(&pool).await {
            Ok(0) => DoctorCheck::pass("schema_migrations", "all migrations applied"),
            Ok(pending) => DoctorCheck::fail(
                "schema_migrations",
                format!("{pending} migration(s) pending; run `deedline migrate`"),
            ),
            Err(error) => DoctorCheck::fail(
                "schema_migrations",
                format!("could not read migration state: {error}"),
            ),
        };

        pool.close().await;
        vec![connectivity, schema]
    })
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
