//! Scheduler loop: one background task running the tick phases in order.
//!
//! Tick order is fixed:
//! 1. advance schedule timestamps (collect due sensors)
//! 2. compress the current minute for every sensor
//! 3. write scheduled reads for the sensors found due in step 1
//! 4. check alerts
//! 5. retention purge, only when a retention age is configured
//!
//! A failing phase is logged and the tick moves on; the loop itself only
//! ends on [`Scheduler::stop`]. Stopping is cooperative: an in-flight tick
//! always completes, only the sleep between ticks is cut short.

use anyhow::{anyhow, bail, Result};
use chrono::{NaiveDateTime, Utc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info, info_span, Instrument};

use crate::context::AppContext;
use crate::models::minute_key;
use crate::retention::{self, Purged};
use crate::schedule::{self, DueSensor};
use crate::{alerts, compression};

// ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Stopped,
    Running,
}

/// What one tick wrote.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub due: Vec<DueSensor>,
    pub clean_reads: usize,
    pub scheduled_reads: usize,
    pub warnings: usize,
    pub purged: Purged,
}

pub struct Scheduler {
    ctx: AppContext,
    stop_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            stop_tx: None,
            handle: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        match &self.handle {
            Some(handle) if !handle.is_finished() => SchedulerState::Running,
            _ => SchedulerState::Stopped,
        }
    }

    /// STOPPED -> RUNNING: spawn the tick loop on the tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        // ---
        if self.state() == SchedulerState::Running {
            bail!("scheduler is already running");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let ctx = self.ctx.clone();
        ctx.set_scheduler_running(true);
        self.handle = Some(tokio::spawn(run_loop(ctx, stop_rx)));
        self.stop_tx = Some(stop_tx);

        info!(
            "Scheduler started (check interval {}s)",
            self.ctx.config.check_interval.as_secs_f64()
        );
        Ok(())
    }

    /// RUNNING -> STOPPED: signal the loop and wait for the current tick to
    /// finish. A no-op when already stopped.
    pub async fn stop(&mut self) -> Result<()> {
        // ---
        if let Some(stop_tx) = self.stop_tx.take() {
            // The loop may already be gone; nothing to signal then.
            let _ = stop_tx.send(true);
        }
        if let Some(handle) = self.handle.take() {
            handle
                .await
                .map_err(|e| anyhow!("scheduler task failed: {}", e))?;
            info!("Scheduler stopped");
        }
        self.ctx.set_scheduler_running(false);
        Ok(())
    }
}

async fn run_loop(ctx: AppContext, mut stop_rx: watch::Receiver<bool>) {
    // ---
    loop {
        if *stop_rx.borrow() {
            break;
        }

        let now = Utc::now().naive_utc();
        let span = info_span!("tick", now = %minute_key(now));
        run_tick(&ctx, now).instrument(span).await;

        tokio::select! {
            _ = tokio::time::sleep(ctx.config.check_interval) => {}
            changed = stop_rx.changed() => {
                // Sender dropped: the owning Scheduler is gone.
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    ctx.set_scheduler_running(false);
}

/// Run every phase once against `now`.
pub async fn run_tick(ctx: &AppContext, now: NaiveDateTime) -> TickReport {
    // ---
    debug!("--- Scheduler tick started ---");
    let store = ctx.store.as_ref();
    let config = &ctx.config;
    let mut report = TickReport::default();

    match schedule::register_schedule_timestamps(store, now, config.schedule_window).await {
        Ok(due) => report.due = due,
        Err(e) => error!("Schedule timestamp phase failed: {:#}", e),
    }

    let minute = minute_key(now);
    match compression::compress_minute_all(store, &minute).await {
        Ok(n) => report.clean_reads = n,
        Err(e) => error!("Minute compression phase failed: {:#}", e),
    }

    report.scheduled_reads = schedule::register_scheduled_reads(store, &report.due).await;

    match alerts::check_alerts(store, config.warning_dedup).await {
        Ok(n) => report.warnings = n,
        Err(e) => error!("Alert phase failed: {:#}", e),
    }

    if config.raw_retention.is_some() || config.warning_retention.is_some() {
        match retention::purge(store, now, config.raw_retention, config.warning_retention).await {
            Ok(purged) => report.purged = purged,
            Err(e) => error!("Retention phase failed: {:#}", e),
        }
    }

    debug!(
        "--- Scheduler tick finished: {} due, {} clean, {} scheduled, {} warnings ---",
        report.due.len(),
        report.clean_reads,
        report.scheduled_reads,
        report.warnings
    );
    report
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use tokio::sync::Notify;

    use crate::models::{
        AlertPolicy, CleanRead, RawRead, SchedulePolicy, ScheduledRead, Sensor, Warning,
    };
    use crate::store::{MemoryStore, Store};
    use crate::Config;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 26)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn context(store: Arc<dyn Store>) -> AppContext {
        AppContext::new(
            store,
            Config {
                check_interval: Duration::from_millis(20),
                ..Config::default()
            },
        )
    }

    #[tokio::test]
    async fn test_tick_runs_all_phases() -> Result<()> {
        // ---
        let store = Arc::new(MemoryStore::new());
        for (ts, temp) in [("2025-03-26T12:30:05", 20.0), ("2025-03-26T12:30:35", 36.0)] {
            store
                .insert_raw_read(&RawRead::new("AA", ts, Some(temp), Some(50.0)))
                .await?;
        }
        store.set_schedule_policy("AA", 300).await?;
        store
            .set_alert_policy(&AlertPolicy {
                mac: "AA".to_string(),
                temp_max: Some(30.0),
                ..Default::default()
            })
            .await?;

        let ctx = context(store.clone());
        let report = run_tick(&ctx, at(12, 30, 50)).await;

        assert_eq!(report.due.len(), 1);
        assert_eq!(report.clean_reads, 1);
        assert_eq!(report.scheduled_reads, 1);
        assert_eq!(report.warnings, 1);

        let clean = store.latest_clean_reads("AA", 10).await?;
        assert_eq!(clean[0].timestamp, "2025-03-26T12:30");
        assert_eq!(clean[0].stats.avg_temp, Some(28.0));
        assert_eq!(store.scheduled_reads("AA").await?[0].timestamp, "2025-03-26T12:00:00");
        Ok(())
    }

    /// Store whose sensor "BAD" fails every per-sensor lookup. Optionally the
    /// first `list_sensors` call fails, and warning inserts can be slowed down.
    struct FlakyStore {
        inner: MemoryStore,
        fail_list_once: AtomicBool,
        slow_warnings: Option<Arc<Notify>>,
    }

    impl FlakyStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                fail_list_once: AtomicBool::new(false),
                slow_warnings: None,
            }
        }
    }

    fn check(mac: &str) -> Result<()> {
        if mac == "BAD" {
            bail!("connection reset");
        }
        Ok(())
    }

    #[async_trait]
    impl Store for FlakyStore {
        async fn list_sensors(&self) -> Result<Vec<Sensor>> {
            if self.fail_list_once.swap(false, Ordering::SeqCst) {
                bail!("statement timeout");
            }
            self.inner.list_sensors().await
        }
        async fn rename_sensor(&self, mac: &str, n: Option<&str>, l: Option<&str>) -> Result<()> {
            self.inner.rename_sensor(mac, n, l).await
        }
        async fn get_alert_policy(&self, mac: &str) -> Result<Option<AlertPolicy>> {
            check(mac)?;
            self.inner.get_alert_policy(mac).await
        }
        async fn set_alert_policy(&self, policy: &AlertPolicy) -> Result<()> {
            self.inner.set_alert_policy(policy).await
        }
        async fn get_schedule_policy(&self, mac: &str) -> Result<Option<SchedulePolicy>> {
            check(mac)?;
            self.inner.get_schedule_policy(mac).await
        }
        async fn set_schedule_policy(&self, mac: &str, delta_time: i64) -> Result<()> {
            self.inner.set_schedule_policy(mac, delta_time).await
        }
        async fn update_schedule_last_update(
            &self,
            mac: &str,
            previous: Option<&str>,
            ts: &str,
        ) -> Result<bool> {
            self.inner.update_schedule_last_update(mac, previous, ts).await
        }
        async fn insert_raw_read(&self, read: &RawRead) -> Result<()> {
            self.inner.insert_raw_read(read).await
        }
        async fn latest_raw_reads(&self, mac: &str, limit: usize) -> Result<Vec<RawRead>> {
            self.inner.latest_raw_reads(mac, limit).await
        }
        async fn raw_reads_in_minute(&self, mac: &str, minute: &str) -> Result<Vec<RawRead>> {
            check(mac)?;
            self.inner.raw_reads_in_minute(mac, minute).await
        }
        async fn raw_reads_in_range(&self, mac: &str, s: &str, e: &str) -> Result<Vec<RawRead>> {
            self.inner.raw_reads_in_range(mac, s, e).await
        }
        async fn raw_read_minutes(&self, mac: &str) -> Result<Vec<String>> {
            self.inner.raw_read_minutes(mac).await
        }
        async fn delete_raw_reads_older_than(&self, mac: &str, ts: &str) -> Result<u64> {
            self.inner.delete_raw_reads_older_than(mac, ts).await
        }
        async fn clean_read_exists(&self, mac: &str, minute: &str) -> Result<bool> {
            self.inner.clean_read_exists(mac, minute).await
        }
        async fn insert_clean_read(&self, read: &CleanRead) -> Result<()> {
            self.inner.insert_clean_read(read).await
        }
        async fn latest_clean_reads(&self, mac: &str, limit: usize) -> Result<Vec<CleanRead>> {
            self.inner.latest_clean_reads(mac, limit).await
        }
        async fn scheduled_read_exists(&self, mac: &str, start: &str) -> Result<bool> {
            self.inner.scheduled_read_exists(mac, start).await
        }
        async fn insert_scheduled_read(&self, read: &ScheduledRead) -> Result<()> {
            self.inner.insert_scheduled_read(read).await
        }
        async fn scheduled_reads(&self, mac: &str) -> Result<Vec<ScheduledRead>> {
            self.inner.scheduled_reads(mac).await
        }
        async fn insert_warning(&self, warning: &Warning) -> Result<()> {
            if let Some(entered) = &self.slow_warnings {
                entered.notify_one();
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.insert_warning(warning).await
        }
        async fn warnings(&self, mac: Option<&str>) -> Result<Vec<Warning>> {
            self.inner.warnings(mac).await
        }
        async fn latest_warning(&self, mac: &str, kind: &str) -> Result<Option<Warning>> {
            self.inner.latest_warning(mac, kind).await
        }
        async fn delete_warnings_older_than(&self, ts: &str) -> Result<u64> {
            self.inner.delete_warnings_older_than(ts).await
        }
    }

    #[tokio::test]
    async fn test_failing_sensor_does_not_block_others() -> Result<()> {
        // ---
        let inner = MemoryStore::new();
        for mac in ["AA", "BAD", "ZZ"] {
            inner
                .insert_raw_read(&RawRead::new(mac, "2025-03-26T12:30:05", Some(40.0), None))
                .await?;
            inner.set_schedule_policy(mac, 60).await?;
            inner
                .set_alert_policy(&AlertPolicy {
                    mac: mac.to_string(),
                    temp_max: Some(30.0),
                    ..Default::default()
                })
                .await?;
        }
        let store = Arc::new(FlakyStore::new(inner));

        let report = run_tick(&context(store.clone()), at(12, 30, 50)).await;

        assert_eq!(report.due.len(), 2);
        assert_eq!(report.clean_reads, 2);
        assert_eq!(report.scheduled_reads, 2);
        assert_eq!(report.warnings, 2);
        assert!(!store.clean_read_exists("BAD", "2025-03-26T12:30").await?);
        Ok(())
    }

    async fn hot_sensor(store: &MemoryStore, ts: &str) -> Result<()> {
        store
            .insert_raw_read(&RawRead::new("AA", ts, Some(40.0), None))
            .await?;
        store.set_schedule_policy("AA", 60).await?;
        store
            .set_alert_policy(&AlertPolicy {
                mac: "AA".to_string(),
                temp_max: Some(30.0),
                ..Default::default()
            })
            .await
    }

    #[tokio::test]
    async fn test_failed_phase_does_not_stop_the_tick() -> Result<()> {
        // ---
        let inner = MemoryStore::new();
        hot_sensor(&inner, "2025-03-26T12:30:05").await?;
        let store = Arc::new(FlakyStore::new(inner));
        store.fail_list_once.store(true, Ordering::SeqCst);
        let ctx = context(store.clone());

        // Phase 1 loses its sensor list; compression and alerts still run.
        let report = run_tick(&ctx, at(12, 30, 50)).await;
        assert!(report.due.is_empty());
        assert_eq!(report.clean_reads, 1);
        assert_eq!(report.scheduled_reads, 0);
        assert_eq!(report.warnings, 1);
        assert!(store.clean_read_exists("AA", "2025-03-26T12:30").await?);
        assert_eq!(store.warnings(Some("AA")).await?.len(), 1);
        assert_eq!(store.get_schedule_policy("AA").await?.unwrap().last_update, None);

        // The next tick picks the schedule up again.
        let report = run_tick(&ctx, at(12, 31, 50)).await;
        assert_eq!(report.due.len(), 1);
        assert_eq!(report.scheduled_reads, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_tick() -> Result<()> {
        // ---
        let inner = MemoryStore::new();
        hot_sensor(&inner, "2025-03-26T12:30:05").await?;
        let entered = Arc::new(Notify::new());
        let store = Arc::new(FlakyStore {
            slow_warnings: Some(entered.clone()),
            ..FlakyStore::new(inner)
        });
        let mut scheduler = Scheduler::new(context(store.clone()));

        scheduler.start()?;
        entered.notified().await;
        scheduler.stop().await?;

        // The warning insert was mid-flight when stop() was called.
        assert_eq!(store.warnings(Some("AA")).await?.len(), 1);
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        Ok(())
    }

    #[tokio::test]
    async fn test_start_stop_restart() -> Result<()> {
        // ---
        let store = Arc::new(MemoryStore::new());
        let ctx = context(store.clone());
        let mut scheduler = Scheduler::new(ctx.clone());
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.start()?;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(ctx.scheduler_running());
        assert!(scheduler.start().is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        scheduler.stop().await?;
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!ctx.scheduler_running());

        // Stopping twice is harmless, and the scheduler can be started again.
        scheduler.stop().await?;
        scheduler.start()?;
        assert_eq!(scheduler.state(), SchedulerState::Running);
        scheduler.stop().await?;
        Ok(())
    }
}
