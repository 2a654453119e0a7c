//! Fixed-interval background tasks that can be started, stopped and ticked
//! directly from tests.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::Instrument;

#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs one cycle. Failures are handled inside the task; the next cycle
    /// runs regardless.
    async fn tick(&self);
}

struct ScheduledTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Owns the running periodic tasks and a shared stop signal.
pub struct Scheduler {
    stop_tx: watch::Sender<bool>,
    tasks: Vec<ScheduledTask>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            tasks: Vec::new(),
        }
    }

    /// Spawns `task` to tick every `every`, starting after one full period.
    pub fn start(&mut self, task: Arc<dyn PeriodicTask>, every: Duration) {
        let name = task.name();
        let mut stop_rx = self.stop_tx.subscribe();
        let handle = tokio::spawn(
            async move {
                let mut interval =
                    tokio::time::interval_at(tokio::time::Instant::now() + every, every);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = interval.tick() => task.tick().await,
                        changed = stop_rx.changed() => {
                            if changed.is_err() || *stop_rx.borrow() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!("Periodic task stopped");
            }
            .instrument(tracing::info_span!("periodic_task", task = name)),
        );
        tracing::info!(task = name, every_ms = every.as_millis() as u64, "Periodic task started");
        self.tasks.push(ScheduledTask { name, handle });
    }

    pub fn running(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.name).collect()
    }

    /// Signals every task and waits for them. A tick in progress finishes
    /// first.
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.handle.await {
                tracing::warn!(task = task.name, error = %err, "Periodic task ended abnormally");
            }
        }
    }
}
