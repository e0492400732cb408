//! Background cache maintenance
//!
//! Reacts to lifecycle signals from the host application using tokio
//! channels: a memory warning drops the memory tier, entering the background
//! sweeps expired entries off disk. An optional timer runs the same sweep
//! while idle. Each action is reported back on the `reports` channel.

use std::future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::cache::CacheManager;

/// Signals from the host application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// The system is low on memory
    MemoryWarning,
    /// The application moved to the background or went idle
    EnteredBackground,
}

/// What triggered a sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTrigger {
    Background,
    Timer,
}

/// Messages sent from the maintenance task back to the application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaintenanceReport {
    /// The memory tier was emptied
    MemoryCleared { entries: usize },
    /// Expired disk entries were deleted
    Swept { removed: usize, trigger: SweepTrigger },
}

/// Configuration for the maintenance task
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Interval between idle sweeps
    pub sweep_interval: Duration,
    /// Whether the idle sweep timer runs at all
    pub periodic_sweep: bool,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(900), // 15 minutes
            periodic_sweep: true,
        }
    }
}

/// Handle for controlling the maintenance task
pub struct MaintenanceHandle {
    /// Channel for receiving maintenance reports
    pub reports: mpsc::Receiver<MaintenanceReport>,
    events_tx: mpsc::Sender<LifecycleEvent>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Spawns the maintenance task for `cache`
    pub fn spawn(cache: CacheManager, config: MaintenanceConfig) -> Self {
        let (report_tx, report_rx) = mpsc::channel(32);
        let (events_tx, mut events_rx) = mpsc::channel::<LifecycleEvent>(16);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let mut timer = config.periodic_sweep.then(|| {
            let mut interval = tokio::time::interval(config.sweep_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let task = tokio::spawn(async move {
            // Skip the first tick (immediate)
            if let Some(interval) = timer.as_mut() {
                interval.tick().await;
            }

            loop {
                let report = tokio::select! {
                    event = events_rx.recv() => match event {
                        Some(LifecycleEvent::MemoryWarning) => {
                            let entries = cache.memory_entry_count();
                            cache.handle_memory_warning();
                            MaintenanceReport::MemoryCleared { entries }
                        }
                        Some(LifecycleEvent::EnteredBackground) => MaintenanceReport::Swept {
                            removed: cache.sweep_expired().await,
                            trigger: SweepTrigger::Background,
                        },
                        None => break,
                    },
                    _ = next_tick(&mut timer) => MaintenanceReport::Swept {
                        removed: cache.sweep_expired().await,
                        trigger: SweepTrigger::Timer,
                    },
                    _ = shutdown_rx.recv() => break,
                };

                debug!(?report, "Cache maintenance ran");
                if report_tx.try_send(report).is_err() {
                    debug!("Maintenance report dropped, receiver is full or gone");
                }
            }

            info!("Cache maintenance stopped");
        });

        Self {
            reports: report_rx,
            events_tx,
            shutdown_tx,
            task,
        }
    }

    /// Forwards a lifecycle signal; returns false once the task has stopped
    pub async fn notify(&self, event: LifecycleEvent) -> bool {
        self.events_tx.send(event).await.is_ok()
    }

    /// Returns a pending report without waiting
    pub fn try_report(&mut self) -> Option<MaintenanceReport> {
        self.reports.try_recv().ok()
    }

    /// Stops the task and waits for it to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        let _ = self.task.await;
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending::<()>().await,
    }
}
