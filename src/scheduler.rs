use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::monitor::{CycleError, CycleReport, PriceMonitor, TriggerSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A cycle will start as soon as the worker is free.
    Queued,
    /// A run was already pending; this request was folded into it.
    Coalesced,
    Stopped,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchedulerStats {
    pub cycles_completed: u64,
    pub cycles_failed: u64,
    pub triggers_coalesced: u64,
    pub is_running: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub last_report: Option<CycleReport>,
    pub uptime_seconds: u64,
}

/// Cloneable handle for requesting a cycle.
#[derive(Clone)]
pub struct TriggerHandle {
    tx: mpsc::Sender<TriggerSource>,
    coalesced: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl TriggerHandle {
    pub fn request(&self, source: TriggerSource) -> TriggerOutcome {
        if self.shutdown.is_cancelled() {
            return TriggerOutcome::Stopped;
        }

        match self.tx.try_send(source) {
            Ok(()) => {
                tracing::debug!("Queued monitoring cycle ({})", source);
                TriggerOutcome::Queued
            }
            Err(TrySendError::Full(_)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Cycle already pending, coalescing {} trigger", source);
                TriggerOutcome::Coalesced
            }
            Err(TrySendError::Closed(_)) => TriggerOutcome::Stopped,
        }
    }
}

#[derive(Default)]
struct WorkerStats {
    cycles_completed: u64,
    cycles_failed: u64,
    last_run: Option<DateTime<Utc>>,
    last_report: Option<CycleReport>,
}

/// Drives [`PriceMonitor`] cycles from a fixed-interval timer and on demand.
///
/// Triggers go through a single-slot channel: while a cycle runs at most one
/// further request is kept and every other one is dropped.
pub struct MonitorScheduler {
    scheduler: JobScheduler,
    monitor: Arc<PriceMonitor>,
    interval: Duration,
    run_on_startup: bool,
    handle: TriggerHandle,
    trigger_rx: Option<mpsc::Receiver<TriggerSource>>,
    stats: Arc<RwLock<WorkerStats>>,
    worker: Option<JoinHandle<()>>,
    start_time: DateTime<Utc>,
}

impl MonitorScheduler {
    pub async fn new(monitor: Arc<PriceMonitor>, config: &SchedulerConfig) -> Result<Self> {
        let scheduler = JobScheduler::new().await?;
        let (tx, rx) = mpsc::channel(1);

        Ok(Self {
            scheduler,
            monitor,
            interval: config.interval(),
            run_on_startup: config.run_on_startup,
            handle: TriggerHandle {
                tx,
                coalesced: Arc::new(AtomicU64::new(0)),
                shutdown: CancellationToken::new(),
            },
            trigger_rx: Some(rx),
            stats: Arc::new(RwLock::new(WorkerStats::default())),
            worker: None,
            start_time: Utc::now(),
        })
    }

    pub async fn start(&mut self) -> Result<()> {
        let rx = self
            .trigger_rx
            .take()
            .ok_or_else(|| anyhow!("scheduler already started"))?;

        self.worker = Some(tokio::spawn(run_worker(
            Arc::clone(&self.monitor),
            rx,
            self.handle.shutdown.clone(),
            Arc::clone(&self.stats),
        )));

        let handle = self.handle.clone();
        let job = Job::new_repeated_async(self.interval, move |_uuid, _l| {
            let handle = handle.clone();
            Box::pin(async move {
                handle.request(TriggerSource::Timer);
            })
        })?;
        self.scheduler.add(job).await?;
        self.scheduler.start().await?;

        tracing::info!("Monitor scheduler started, interval {}s", self.interval.as_secs());

        if self.run_on_startup {
            self.handle.request(TriggerSource::Startup);
        }
        Ok(())
    }

    pub fn trigger(&self, source: TriggerSource) -> TriggerOutcome {
        self.handle.request(source)
    }

    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Stop the timer, cancel the running cycle and wait for the worker.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.handle.shutdown.cancel();
        self.scheduler.shutdown().await?;

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!("Scheduler worker ended abnormally: {}", e);
            }
        }

        tracing::info!("Monitor scheduler shutdown");
        Ok(())
    }

    pub async fn stats(&self) -> SchedulerStats {
        let stats = self.stats.read().await;
        let uptime = Utc::now().signed_duration_since(self.start_time);

        SchedulerStats {
            cycles_completed: stats.cycles_completed,
            cycles_failed: stats.cycles_failed,
            triggers_coalesced: self.handle.coalesced.load(Ordering::Relaxed),
            is_running: self.monitor.is_running(),
            last_run: stats.last_run,
            last_report: stats.last_report.clone(),
            uptime_seconds: uptime.num_seconds().max(0) as u64,
        }
    }
}

async fn run_worker(
    monitor: Arc<PriceMonitor>,
    mut rx: mpsc::Receiver<TriggerSource>,
    shutdown: CancellationToken,
    stats: Arc<RwLock<WorkerStats>>,
) {
    loop {
        let source = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = rx.recv() => match next {
                Some(source) => source,
                None => break,
            },
        };

        let result = monitor.run_cycle(source, &shutdown).await;
        let mut stats = stats.write().await;
        stats.last_run = Some(Utc::now());

        match result {
            Ok(report) => {
                stats.cycles_completed += 1;
                stats.last_report = Some(report);
            }
            Err(CycleError::AlreadyRunning) => {
                tracing::debug!("Cycle started elsewhere, skipping {} trigger", source);
            }
            Err(e) => {
                stats.cycles_failed += 1;
                tracing::error!("Monitoring cycle failed: {}", e);
            }
        }
    }

    tracing::debug!("Scheduler worker stopped");
}
