//! Background sync triggers.
//!
//! Cycles are started by a periodic timer, by project-change notifications
//! and on demand. Triggers go through a channel of depth one: a trigger that
//! arrives while a cycle is running, or while another trigger is already
//! queued or being picked up, is dropped.

use crate::orchestrator::{SyncOrchestrator, SyncResult};
use parking_lot::RwLock;
use scenesync_store::ProjectScope;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What started a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// The periodic timer fired.
    Timer,
    /// The current project changed.
    ProjectChanged,
    /// Requested explicitly.
    Manual,
}

struct Shared {
    orchestrator: Arc<SyncOrchestrator>,
    scope: RwLock<Option<ProjectScope>>,
    last_result: RwLock<Option<SyncResult>>,
    /// Set from an accepted trigger until its cycle has finished.
    pending: AtomicBool,
    completed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn new(orchestrator: Arc<SyncOrchestrator>, scope: Option<ProjectScope>) -> Self {
        Self {
            orchestrator,
            scope: RwLock::new(scope),
            last_result: RwLock::new(None),
            pending: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    fn offer(&self, tx: &mpsc::Sender<SyncTrigger>, trigger: SyncTrigger) -> bool {
        if self.orchestrator.is_sync_in_progress() {
            return self.drop_trigger(trigger, "sync in progress, trigger dropped");
        }
        if self
            .pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.drop_trigger(trigger, "sync already queued, trigger dropped");
        }
        match tx.try_send(trigger) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.drop_trigger(trigger, "sync already queued, trigger dropped")
            }
            Err(TrySendError::Closed(_)) => {
                self.pending.store(false, Ordering::Release);
                false
            }
        }
    }

    fn drop_trigger(&self, trigger: SyncTrigger, reason: &str) -> bool {
        debug!(?trigger, "{reason}");
        self.dropped.fetch_add(1, Ordering::Relaxed);
        false
    }

    async fn run_cycle(&self, trigger: SyncTrigger) {
        let scope = self.scope.read().clone();
        debug!(?trigger, "running triggered sync");
        let result = self.orchestrator.full_sync(scope.as_ref()).await;
        info!(
            ?trigger,
            success = result.success,
            synced = result.synced_count,
            conflicts = result.conflicts.len(),
            "triggered sync finished"
        );
        *self.last_result.write() = Some(result);
        self.pending.store(false, Ordering::Release);
        self.completed.fetch_add(1, Ordering::Release);
    }
}

/// Starts the background trigger loop for an orchestrator.
pub struct SyncScheduler;

impl SyncScheduler {
    /// Spawns the trigger consumer and, if the orchestrator's configuration
    /// has a sync interval, the periodic timer.
    ///
    /// Must be called within a tokio runtime.
    pub fn spawn(
        orchestrator: Arc<SyncOrchestrator>,
        scope: Option<ProjectScope>,
    ) -> SchedulerHandle {
        let interval = orchestrator.config().sync_interval;
        let (tx, mut rx) = mpsc::channel(1);
        let shared = Arc::new(Shared::new(orchestrator, scope));

        let consumer = {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(trigger) = rx.recv().await {
                    shared.run_cycle(trigger).await;
                }
            })
        };

        let timer = interval.map(|period| {
            let shared = shared.clone();
            let tx = tx.clone();
            tokio::spawn(async move { run_timer(shared, tx, period).await })
        });

        info!(interval_secs = ?interval.map(|d| d.as_secs()), "sync scheduler started");
        SchedulerHandle {
            shared,
            tx,
            consumer,
            timer,
        }
    }
}

async fn run_timer(shared: Arc<Shared>, tx: mpsc::Sender<SyncTrigger>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        shared.offer(&tx, SyncTrigger::Timer);
    }
}

/// Handle to a running scheduler.
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    tx: mpsc::Sender<SyncTrigger>,
    consumer: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Switches the current project and requests a sync for it.
    ///
    /// Returns false if the request was dropped.
    pub fn notify_project_changed(&self, scope: Option<ProjectScope>) -> bool {
        *self.shared.scope.write() = scope;
        self.shared.offer(&self.tx, SyncTrigger::ProjectChanged)
    }

    /// Requests a sync now. Returns false if the request was dropped.
    pub fn trigger_now(&self) -> bool {
        self.shared.offer(&self.tx, SyncTrigger::Manual)
    }

    /// Result of the most recent triggered cycle.
    pub fn last_result(&self) -> Option<SyncResult> {
        self.shared.last_result.read().clone()
    }

    /// Number of triggered cycles that finished.
    pub fn completed_cycles(&self) -> u64 {
        self.shared.completed.load(Ordering::Acquire)
    }

    /// Number of triggers dropped.
    pub fn dropped_triggers(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Stops the timer and waits for a queued or running cycle to finish.
    pub async fn shutdown(self) {
        if let Some(timer) = self.timer {
            timer.abort();
            let _ = timer.await;
        }
        // Dropping the last sender closes the channel and ends the consumer.
        drop(self.tx);
        let _ = self.consumer.await;
        info!("sync scheduler stopped");
    }
}
