//! Backup commands.
//!
//! Backups cover `state.json` only; the durable layer is never rewritten by
//! a restore.

use crate::workspace::Workspace;
use scenesync_engine::EngineConfig;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Creates a backup of the in-memory state.
pub async fn create(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::open(path)?;
    let engine = workspace.engine(EngineConfig::new());

    let id = engine.create_backup().await?;

    println!("✓ Backup created successfully");
    println!("  Id: {id}");
    println!("  Entities: {}", workspace.state.len());
    Ok(())
}

/// Lists backups, oldest first.
pub async fn list(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::open(path)?;
    let backups = workspace.engine(EngineConfig::new()).list_backups().await?;

    if backups.is_empty() {
        println!("No backups found");
        return Ok(());
    }

    println!("Backups");
    println!("=======");
    for info in backups {
        let total: usize = info.counts.values().sum();
        println!(
            "  {}  {}  {} entities",
            info.id,
            info.created_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            total
        );
    }
    Ok(())
}

/// Restores the in-memory state from a backup and saves it.
pub async fn restore(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!("Restoring {:?} from backup {}", path, id);
    let workspace = Workspace::open(path)?;
    let engine = workspace.engine(EngineConfig::new());

    let stats = engine.restore_from_backup(id).await?;
    workspace.save_state().await?;

    println!("✓ State restored successfully");
    println!("  Backup: {}", stats.backup_id);
    println!("  Entities restored: {}", stats.entities_restored);
    Ok(())
}

/// Removes backups older than `max_age_days`.
pub async fn cleanup(path: &Path, max_age_days: u64) -> Result<(), Box<dyn std::error::Error>> {
    let workspace = Workspace::open(path)?;
    let config = EngineConfig::new()
        .with_backup_retention(Duration::from_secs(max_age_days.saturating_mul(24 * 60 * 60)));
    let removed = workspace.engine(config).cleanup_backups().await?;

    println!("✓ Removed {removed} backup(s) older than {max_age_days} days");
    Ok(())
}
