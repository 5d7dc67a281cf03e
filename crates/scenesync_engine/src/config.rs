//! Configuration for the sync and migration engine.

use scenesync_protocol::{Resolution, DEFAULT_CONFLICT_THRESHOLD};
use scenesync_store::EntityType;
use std::time::Duration;

/// Configuration for sync cycles, migrations and retention.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Timestamp difference above which two versions conflict.
    pub conflict_threshold: Duration,
    /// Interval for timer-triggered sync; `None` disables the timer.
    pub sync_interval: Option<Duration>,
    /// How long detected conflicts stay in the conflict log.
    pub conflict_retention: Duration,
    /// How long migration records stay in the history.
    pub migration_retention: Duration,
    /// Age after which backups are removed by cleanup.
    pub backup_retention: Duration,
    /// Number of conflicts returned in a status report.
    pub recent_conflicts_limit: usize,
    /// Entity types handled by sync and migration, in fan-out order.
    pub entity_types: Vec<EntityType>,
    /// Resolution applied automatically during a sync cycle.
    pub auto_resolution: Resolution,
}

impl EngineConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            conflict_threshold: DEFAULT_CONFLICT_THRESHOLD,
            sync_interval: Some(Duration::from_secs(5 * 60)),
            conflict_retention: Duration::from_secs(24 * 60 * 60),
            migration_retention: Duration::from_secs(30 * 24 * 60 * 60),
            backup_retention: Duration::from_secs(30 * 24 * 60 * 60),
            recent_conflicts_limit: 10,
            entity_types: EntityType::ALL.to_vec(),
            auto_resolution: Resolution::LocalWins,
        }
    }

    /// Sets the conflict threshold.
    pub fn with_conflict_threshold(mut self, threshold: Duration) -> Self {
        self.conflict_threshold = threshold;
        self
    }

    /// Sets the timer interval for automatic sync.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disables timer-triggered sync.
    pub fn without_sync_timer(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Sets the conflict log retention.
    pub fn with_conflict_retention(mut self, retention: Duration) -> Self {
        self.conflict_retention = retention;
        self
    }

    /// Sets the migration history retention.
    pub fn with_migration_retention(mut self, retention: Duration) -> Self {
        self.migration_retention = retention;
        self
    }

    /// Sets the backup retention.
    pub fn with_backup_retention(mut self, retention: Duration) -> Self {
        self.backup_retention = retention;
        self
    }

    /// Sets how many conflicts a status report includes.
    pub fn with_recent_conflicts_limit(mut self, limit: usize) -> Self {
        self.recent_conflicts_limit = limit;
        self
    }

    /// Restricts the handled entity types.
    pub fn with_entity_types(mut self, types: Vec<EntityType>) -> Self {
        self.entity_types = types;
        self
    }

    /// Sets the automatic resolution. Manual resolution cannot be automatic
    /// and is ignored.
    pub fn with_auto_resolution(mut self, resolution: Resolution) -> Self {
        if resolution.is_automatic() {
            self.auto_resolution = resolution;
        }
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a retention window to a cutoff instant.
pub(crate) fn cutoff(retention: Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| chrono::Utc::now().checked_sub_signed(retention))
        .unwrap_or(chrono::DateTime::<chrono::Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.conflict_threshold, Duration::from_millis(5000));
        assert_eq!(config.sync_interval, Some(Duration::from_secs(300)));
        assert_eq!(config.conflict_retention, Duration::from_secs(86_400));
        assert_eq!(config.migration_retention, Duration::from_secs(2_592_000));
        assert_eq!(config.entity_types.len(), 5);
        assert_eq!(config.auto_resolution, Resolution::LocalWins);
    }

    #[test]
    fn builder() {
        let config = EngineConfig::new()
            .with_conflict_threshold(Duration::from_secs(1))
            .without_sync_timer()
            .with_recent_conflicts_limit(3)
            .with_entity_types(vec![EntityType::World])
            .with_auto_resolution(Resolution::Manual);

        assert_eq!(config.conflict_threshold, Duration::from_secs(1));
        assert!(config.sync_interval.is_none());
        assert_eq!(config.recent_conflicts_limit, 3);
        assert_eq!(config.entity_types, vec![EntityType::World]);
        assert_eq!(config.auto_resolution, Resolution::LocalWins);
    }

    #[test]
    fn cutoff_saturates() {
        let far = cutoff(Duration::from_secs(u64::MAX));
        assert!(far < chrono::Utc::now());
        let recent = cutoff(Duration::from_secs(60));
        assert!(recent > far);
    }
}
