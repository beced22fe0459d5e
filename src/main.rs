use std::process::ExitCode;

use anyhow::{Context, Result};
use drift_migrate_lib::db::migrator::{UnitReport, UnitStatus};
use drift_migrate_lib::plan::PlanFile;
use drift_migrate_lib::runner::run_plan;
use drift_migrate_lib::security::EnvCredentialStore;

fn progress(report: &UnitReport) {
    match report.status {
        UnitStatus::Completed => println!("Migrated {} table.", report.unit),
        UnitStatus::CompletedWithErrors => println!(
            "Migrated {} table ({} row(s) skipped).",
            report.unit,
            report.row_errors.len()
        ),
        UnitStatus::Skipped => println!("Skipped {} table.", report.unit),
        UnitStatus::Failed => println!("Failed {} table.", report.unit),
    }
}

async fn run() -> Result<bool> {
    let path = PlanFile::path_from_env();
    let mut plan = PlanFile::load(&path)?;
    plan.resolve_credentials(&EnvCredentialStore)
        .context("Failed to resolve database credentials")?;

    let summary = run_plan(&plan, progress).await?;
    if let Some(ref e) = summary.aborted {
        eprintln!("Migration aborted: {}", e);
        return Ok(false);
    }
    Ok(true)
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
