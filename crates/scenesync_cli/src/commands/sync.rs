//! Sync command implementation.

use super::check_format;
use crate::workspace::Workspace;
use scenesync_engine::{EngineConfig, SyncResult};
use scenesync_protocol::Resolution;
use scenesync_store::ProjectScope;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Options for one sync run.
pub struct SyncOptions {
    /// Project to restrict the cycle to.
    pub project: Option<String>,
    /// Conflict threshold in milliseconds.
    pub threshold_ms: u64,
    /// Resolution applied to detected conflicts.
    pub resolution: Resolution,
}

/// Sync report.
#[derive(Debug, Serialize)]
pub struct SyncReport {
    /// Whether the cycle finished without errors.
    pub success: bool,
    /// Entities written durably.
    pub synced: u64,
    /// Detected conflicts as `type/id`.
    pub conflicts: Vec<String>,
    /// Durable-only entities as `type/id`.
    pub untracked: Vec<String>,
    /// Error messages.
    pub errors: Vec<String>,
    /// Cycle duration in milliseconds.
    pub duration_ms: u128,
}

impl From<&SyncResult> for SyncReport {
    fn from(result: &SyncResult) -> Self {
        Self {
            success: result.success,
            synced: result.synced_count,
            conflicts: result
                .conflicts
                .iter()
                .map(|c| c.entity_ref().to_string())
                .collect(),
            untracked: result.untracked.iter().map(ToString::to_string).collect(),
            errors: result.errors.clone(),
            duration_ms: result.duration_ms(),
        }
    }
}

/// Parses the `--resolution` flag. Manual resolution needs a payload per
/// conflict, so it is not accepted here.
pub fn parse_resolution(value: &str) -> Result<Resolution, String> {
    let resolution: Resolution = value.parse()?;
    if resolution.is_automatic() {
        Ok(resolution)
    } else {
        Err(format!(
            "Resolution {resolution} cannot be applied automatically \
             (expected local-wins, durable-wins or merge)"
        ))
    }
}

/// Runs the sync command.
pub async fn run(
    path: &Path,
    options: SyncOptions,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    check_format(format)?;
    let workspace = Workspace::open(path)?;
    let config = EngineConfig::new()
        .with_conflict_threshold(Duration::from_millis(options.threshold_ms))
        .with_auto_resolution(options.resolution);
    let engine = workspace.engine(config);

    let scope = options.project.map(ProjectScope::new);
    info!("Syncing {:?}", path);
    let result = engine.full_sync(scope.as_ref()).await;
    if options.resolution != Resolution::LocalWins && !result.conflicts.is_empty() {
        // Durable-wins and merge change the in-memory version too.
        workspace.save_state().await?;
    }

    let report = SyncReport::from(&result);
    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }

    if report.success {
        Ok(())
    } else {
        Err(format!("Sync finished with {} error(s)", report.errors.len()).into())
    }
}

fn print_text(report: &SyncReport) {
    let mark = if report.success { "✓" } else { "✗" };
    println!("{mark} Sync finished in {} ms", report.duration_ms);
    println!("  Synced: {}", report.synced);
    println!("  Conflicts: {}", report.conflicts.len());
    for conflict in &report.conflicts {
        println!("    {conflict}");
    }
    if !report.untracked.is_empty() {
        println!("  Untracked (durable only): {}", report.untracked.len());
        for entity in &report.untracked {
            println!("    {entity}");
        }
    }
    for error in &report.errors {
        println!("  Error: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenesync_store::{Entity, EntityType, PersistenceService, StateStore};

    #[tokio::test]
    async fn sync_writes_state_into_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        workspace
            .state
            .upsert(EntityType::World, Entity::new("w1").with("name", "Eldoria"));
        workspace.save_state().await.unwrap();

        let options = SyncOptions {
            project: None,
            threshold_ms: 5000,
            resolution: Resolution::LocalWins,
        };
        run(dir.path(), options, "json").await.unwrap();

        assert!(dir.path().join("data/world/w1.json").is_file());
    }

    #[test]
    fn manual_resolution_flag_is_rejected() {
        assert_eq!(parse_resolution("merge"), Ok(Resolution::Merge));
        assert_eq!(parse_resolution("durable-wins"), Ok(Resolution::DurableWins));
        assert!(parse_resolution("manual").is_err());
        assert!(parse_resolution("newest").is_err());
    }

    #[tokio::test]
    async fn durable_wins_is_saved_to_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::open(dir.path()).unwrap();
        workspace.state.upsert(
            EntityType::World,
            Entity::new("w1")
                .with("updatedAt", "2024-01-01T00:00:00Z")
                .with("name", "local"),
        );
        workspace.save_state().await.unwrap();
        workspace
            .persistence
            .save(
                EntityType::World,
                &Entity::new("w1")
                    .with("updatedAt", "2024-01-01T00:01:00Z")
                    .with("name", "durable"),
            )
            .await
            .unwrap();

        let options = SyncOptions {
            project: None,
            threshold_ms: 5000,
            resolution: Resolution::DurableWins,
        };
        run(dir.path(), options, "text").await.unwrap();

        let reopened = Workspace::open(dir.path()).unwrap();
        let worlds = reopened.state.collection(EntityType::World);
        assert_eq!(worlds[0].get("name").and_then(|v| v.as_str()), Some("durable"));
    }

    #[tokio::test]
    async fn unknown_format_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let options = SyncOptions {
            project: None,
            threshold_ms: 5000,
            resolution: Resolution::LocalWins,
        };
        assert!(run(dir.path(), options, "yaml").await.is_err());
    }
}
