//! Schedule tracker: decides when a sensor's configured interval has elapsed.
//!
//! The decision is taken once per tick, in [`register_schedule_timestamps`],
//! which advances `last_update` and hands back the due set. The later
//! [`register_scheduled_reads`] phase emits aggregates for exactly that set,
//! so it never re-derives elapsed time from the timestamp it just wrote.

use anyhow::{Context, Result};
use chrono::{NaiveDateTime, TimeDelta};
use tracing::{debug, warn};

use crate::compression;
use crate::config::ScheduleWindow;
use crate::models::{hour_start, iso, parse_iso, SchedulePolicy};
use crate::store::Store;

// ---

/// A sensor whose interval elapsed this tick, with the window to aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueSensor {
    pub mac: String,
    pub window_start: String,
    pub window_end: String,
}

/// Evaluate one policy at `now`.
///
/// A sensor that was never updated (or whose `last_update` cannot be parsed)
/// is always due. A `last_update` in the future is never due, which keeps
/// the bookkeeping timestamp monotonic when the clock steps back.
pub fn evaluate(
    policy: &SchedulePolicy,
    now: NaiveDateTime,
    window: ScheduleWindow,
) -> Option<DueSensor> {
    // ---
    let delta = TimeDelta::try_seconds(policy.delta_time).unwrap_or(TimeDelta::MAX);
    let last_update = match policy.last_update.as_deref() {
        None => None,
        Some(raw) => {
            let parsed = parse_iso(raw);
            if parsed.is_none() {
                warn!(
                    "Unparsable last_update {:?} for sensor {}, treating as unset",
                    raw, policy.mac
                );
            }
            parsed
        }
    };

    let due = match last_update {
        None => true,
        Some(last) => now - last >= delta,
    };
    if !due {
        return None;
    }

    let window_start = match window {
        ScheduleWindow::HourStart => hour_start(now),
        ScheduleWindow::SinceLastUpdate => {
            let fallback = now.checked_sub_signed(delta).unwrap_or(now);
            iso(last_update.unwrap_or(fallback))
        }
    };

    Some(DueSensor {
        mac: policy.mac.clone(),
        window_start,
        window_end: iso(now),
    })
}

/// Phase 1: advance `last_update` to `now` for every due sensor.
///
/// Sensors without a schedule policy are skipped. A failing sensor is logged
/// and left out of the due set.
pub async fn register_schedule_timestamps(
    store: &dyn Store,
    now: NaiveDateTime,
    window: ScheduleWindow,
) -> Result<Vec<DueSensor>> {
    // ---
    let sensors = store.list_sensors().await.context("schedule: list sensors")?;
    let mut due = Vec::new();

    for sensor in &sensors {
        match advance_sensor(store, &sensor.mac, now, window).await {
            Ok(Some(d)) => due.push(d),
            Ok(None) => {}
            Err(e) => warn!("Schedule tracking failed for sensor {}: {:#}", sensor.mac, e),
        }
    }

    debug!("{} of {} sensors due for a scheduled read", due.len(), sensors.len());
    Ok(due)
}

async fn advance_sensor(
    store: &dyn Store,
    mac: &str,
    now: NaiveDateTime,
    window: ScheduleWindow,
) -> Result<Option<DueSensor>> {
    let Some(policy) = store.get_schedule_policy(mac).await? else {
        return Ok(None);
    };
    let Some(due) = evaluate(&policy, now, window) else {
        return Ok(None);
    };

    // Ordering is decided on parsed time in `evaluate`; the store only swaps
    // against the value read above.
    let previous = policy.last_update.as_deref();
    if !store
        .update_schedule_last_update(mac, previous, &due.window_end)
        .await?
    {
        debug!("Schedule timestamp for sensor {} changed concurrently, skipping", mac);
        return Ok(None);
    }
    debug!("Updated schedule timestamp for sensor {} to {}", mac, due.window_end);
    Ok(Some(due))
}

/// Phase 3: write a scheduled read for every sensor found due in phase 1.
///
/// Returns the number of rows written.
pub async fn register_scheduled_reads(store: &dyn Store, due: &[DueSensor]) -> usize {
    // ---
    let mut written = 0;
    for d in due {
        match compression::compress_interval(store, &d.mac, &d.window_start, &d.window_end).await
        {
            Ok(Some(_)) => {
                written += 1;
                debug!(
                    "Registered scheduled read for sensor {} from {} to {}",
                    d.mac, d.window_start, d.window_end
                );
            }
            Ok(None) => {}
            Err(e) => warn!("Scheduled read failed for sensor {}: {:#}", d.mac, e),
        }
    }
    written
}
