//! Status command implementation.

use super::check_format;
use crate::workspace::Workspace;
use scenesync_store::{BackupStore, EntityType, PersistenceService, StateStore};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Per-type comparison of in-memory and durable entities.
#[derive(Debug, Serialize)]
pub struct TypeStatus {
    /// Entity type.
    pub entity_type: EntityType,
    /// Entities in `state.json`.
    pub in_memory: usize,
    /// Entities under `data/`.
    pub durable: usize,
    /// In-memory entities with no durable record.
    pub pending: usize,
    /// Durable entities with no in-memory counterpart.
    pub untracked: usize,
}

/// Workspace status.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    /// Workspace path.
    pub path: String,
    /// Per-type counts.
    pub types: Vec<TypeStatus>,
    /// Number of stored backups.
    pub backups: usize,
}

/// Runs the status command.
pub async fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    check_format(format)?;
    let report = collect(path).await?;

    if format == "json" {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_text(&report);
    }
    Ok(())
}

/// Compares `state.json` with the durable layer.
pub async fn collect(path: &Path) -> Result<StatusReport, Box<dyn std::error::Error>> {
    let workspace = Workspace::open(path)?;

    let mut types = Vec::with_capacity(EntityType::ALL.len());
    for entity_type in EntityType::ALL {
        let local = workspace.state.collection(entity_type);
        let durable: HashSet<String> = workspace
            .persistence
            .list_ids(entity_type)
            .await?
            .unwrap_or_default()
            .into_iter()
            .collect();
        let local_ids: HashSet<&str> = local.iter().map(|e| e.id()).collect();

        types.push(TypeStatus {
            entity_type,
            in_memory: local.len(),
            durable: durable.len(),
            pending: local_ids.iter().filter(|id| !durable.contains(**id)).count(),
            untracked: durable
                .iter()
                .filter(|id| !local_ids.contains(id.as_str()))
                .count(),
        });
    }

    Ok(StatusReport {
        path: path.display().to_string(),
        types,
        backups: workspace.backups.list().await?.len(),
    })
}

fn print_text(report: &StatusReport) {
    println!("Workspace: {}", report.path);
    println!(
        "  {:<10} {:>9} {:>8} {:>8} {:>10}",
        "type", "in-memory", "durable", "pending", "untracked"
    );
    for t in &report.types {
        println!(
            "  {:<10} {:>9} {:>8} {:>8} {:>10}",
            t.entity_type.as_str(),
            t.in_memory,
            t.durable,
            t.pending,
            t.untracked
        );
    }
    println!("  Backups: {}", report.backups);
}
