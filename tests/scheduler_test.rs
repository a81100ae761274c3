use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};

use sensorflow_compactor::{
    models::{iso, minute_key, AlertPolicy, RawRead},
    scheduler::run_tick,
    store::{MemoryStore, Store},
    AppContext, Config, Scheduler, SchedulerState,
};

const MAC: &str = "C4:7C:8D:6A:00:01";

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 26)
        .unwrap()
        .and_hms_opt(h, m, s)
        .unwrap()
}

fn context(store: Arc<MemoryStore>, check_interval: Duration) -> AppContext {
    AppContext::new(
        store,
        Config {
            check_interval,
            ..Config::default()
        },
    )
}

#[tokio::test]
async fn background_loop_compresses_current_minute() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now().naive_utc();
    // Seed this minute and the next so a rollover before the first tick still
    // finds data.
    let minutes = [minute_key(now), minute_key(now + TimeDelta::minutes(1))];
    for minute in &minutes {
        for second in ["00", "00.5"] {
            let ts = format!("{}:{}", minute, second);
            store
                .insert_raw_read(&RawRead::new(MAC, ts, Some(21.0), Some(48.0)))
                .await?;
        }
    }
    store.set_schedule_policy(MAC, 3600).await?;

    let ctx = context(store.clone(), Duration::from_millis(25));
    let mut scheduler = Scheduler::new(ctx.clone());
    scheduler.start()?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.stop().await?;
    assert_eq!(scheduler.state(), SchedulerState::Stopped);

    let clean = store.latest_clean_reads(MAC, 10).await?;
    assert!(!clean.is_empty(), "current minute was compressed");
    for row in &clean {
        assert!(minutes.contains(&row.timestamp));
        assert_eq!(row.stats.avg_temp, Some(21.0));
        assert_eq!(row.stats.avg_hum, Some(48.0));
    }

    // Many ticks, but delta_time is an hour: only the first tick was due.
    let policy = store.get_schedule_policy(MAC).await?.unwrap();
    assert!(policy.last_update.is_some());
    assert_eq!(store.scheduled_reads(MAC).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn ticks_over_an_hour_follow_delta_time() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    for minute in 0..60u32 {
        let ts = iso(at(14, minute, 30));
        store
            .insert_raw_read(&RawRead::new(MAC, ts, Some(20.0 + f64::from(minute % 5)), Some(50.0)))
            .await?;
    }
    store.set_schedule_policy(MAC, 900).await?;
    let ctx = context(store.clone(), Duration::from_secs(60));

    let mut due_ticks = Vec::new();
    for minute in 0..60u32 {
        let report = run_tick(&ctx, at(14, minute, 45)).await;
        assert_eq!(report.clean_reads, 1, "minute {minute} compressed once");
        if !report.due.is_empty() {
            due_ticks.push(minute);
        }
    }

    // First tick is always due, then every 15 minutes.
    assert_eq!(due_ticks, [0, 15, 30, 45]);
    assert_eq!(store.latest_clean_reads(MAC, 100).await?.len(), 60);

    // Every due tick in this hour shares the hour-start key, so only the
    // first one produced a row.
    let scheduled = store.scheduled_reads(MAC).await?;
    assert_eq!(scheduled.len(), 1);
    assert_eq!(scheduled[0].timestamp, "2025-03-26T14:00:00");
    assert_eq!(scheduled[0].stats.avg_temp, Some(20.0));
    Ok(())
}

#[tokio::test]
async fn alerts_fire_on_every_tick_while_out_of_range() -> Result<()> {
    // ---
    let store = Arc::new(MemoryStore::new());
    store
        .insert_raw_read(&RawRead::new(MAC, "2025-03-26T14:00:10", Some(30.0), Some(15.0)))
        .await?;
    store
        .set_alert_policy(&AlertPolicy {
            mac: MAC.to_string(),
            temp_max: Some(30.0),
            humidity_min: Some(20.0),
            ..Default::default()
        })
        .await?;
    let ctx = context(store.clone(), Duration::from_secs(60));

    for minute in 0..3 {
        let report = run_tick(&ctx, at(14, minute, 30)).await;
        assert_eq!(report.warnings, 1);
    }

    let warnings = store.warnings(Some(MAC)).await?;
    assert_eq!(warnings.len(), 3);
    assert!(warnings.iter().all(|w| w.kind == "humidity_low"));
    Ok(())
}
