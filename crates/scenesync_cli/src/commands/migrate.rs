//! Migrate command implementation.

use super::check_format;
use crate::workspace::Workspace;
use scenesync_engine::{EngineConfig, MigrationResult};
use scenesync_store::ProjectScope;
use serde::Serialize;
use std::path::Path;
use tracing::info;

/// Migration report.
#[derive(Debug, Serialize)]
pub struct MigrateReport<'a> {
    /// Migration id.
    pub id: &'a str,
    /// Full migration result.
    #[serde(flatten)]
    pub result: &'a MigrationResult,
}

/// Runs the migrate command.
///
/// A failed migration restores `state.json` from the pre-migration backup
/// and exits with an error.
pub async fn run(
    path: &Path,
    project: Option<String>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    check_format(format)?;
    let workspace = Workspace::open(path)?;
    let engine = workspace.engine(EngineConfig::new());

    let scope = project.map(ProjectScope::new);
    info!("Migrating {:?}", path);
    let (id, result) = engine.migrate_all(scope.as_ref()).await?;
    if !result.rollback_backup_ids.is_empty() {
        workspace.save_state().await?;
    }

    if format == "json" {
        let report = MigrateReport {
            id: &id,
            result: &result,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&id, &result);
    }

    if result.success {
        Ok(())
    } else {
        Err(format!("Migration {id} failed and was rolled back").into())
    }
}

fn print_text(id: &str, result: &MigrationResult) {
    if result.success {
        println!("✓ Migration completed successfully");
    } else {
        println!("✗ Migration failed");
    }
    println!("  Id: {id}");
    println!("  Migrated: {}", result.migrated_count);
    println!("  Skipped (already durable): {}", result.skipped_count);
    println!("  Duration: {} ms", result.duration_ms());
    for error in &result.errors {
        let kind = if error.retryable { "retryable" } else { "permanent" };
        println!(
            "  Error [{kind}] {}/{}: {}",
            error.entity_type, error.entity_id, error.message
        );
    }
    for backup_id in &result.rollback_backup_ids {
        println!("  Rolled back from: {backup_id}");
    }
}
