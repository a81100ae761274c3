//! Alert evaluator: compare each sensor's latest reading with its thresholds.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, warn};

use crate::models::{parse_iso, AlertKind, AlertPolicy, RawRead, Warning};
use crate::store::Store;

// ---

/// Bounds violated by `read`, in temp_high, temp_low, humidity_high,
/// humidity_low order.
///
/// Comparisons are strict: a value equal to a bound does not trigger. A
/// missing bound or a missing reading value never triggers.
pub fn evaluate(policy: &AlertPolicy, read: &RawRead) -> Vec<AlertKind> {
    // ---
    let mut triggered = Vec::new();
    if above(read.temperature, policy.temp_max) {
        triggered.push(AlertKind::TempHigh);
    }
    if below(read.temperature, policy.temp_min) {
        triggered.push(AlertKind::TempLow);
    }
    if above(read.humidity, policy.humidity_max) {
        triggered.push(AlertKind::HumidityHigh);
    }
    if below(read.humidity, policy.humidity_min) {
        triggered.push(AlertKind::HumidityLow);
    }
    triggered
}

/// Check every sensor that has an alert policy and append one warning per
/// violated bound.
///
/// With `dedup` set, a warning is skipped when the sensor already has one of
/// the same type stamped within that window before this reading. Returns the
/// number of warnings inserted.
pub async fn check_alerts(store: &dyn Store, dedup: Option<Duration>) -> Result<usize> {
    // ---
    let sensors = store.list_sensors().await.context("alerts: list sensors")?;
    let mut inserted = 0;

    for sensor in &sensors {
        match check_sensor(store, &sensor.mac, dedup).await {
            Ok(n) => inserted += n,
            Err(e) => warn!("Alert check failed for sensor {}: {:#}", sensor.mac, e),
        }
    }

    debug!("Alert check inserted {} warnings", inserted);
    Ok(inserted)
}

fn above(value: Option<f64>, bound: Option<f64>) -> bool {
    matches!((value, bound), (Some(v), Some(b)) if v > b)
}

fn below(value: Option<f64>, bound: Option<f64>) -> bool {
    matches!((value, bound), (Some(v), Some(b)) if v < b)
}

async fn check_sensor(store: &dyn Store, mac: &str, dedup: Option<Duration>) -> Result<usize> {
    // ---
    let Some(policy) = store.get_alert_policy(mac).await? else {
        return Ok(0);
    };
    let Some(last_read) = store.latest_raw_read(mac).await? else {
        return Ok(0);
    };

    let mut inserted = 0;
    for kind in evaluate(&policy, &last_read) {
        if let Some(window) = dedup {
            if recently_warned(store, mac, kind, &last_read.timestamp, window).await? {
                debug!("Suppressed duplicate {} warning for sensor {}", kind, mac);
                continue;
            }
        }
        let warning = Warning::new(mac, kind, last_read.timestamp.clone());
        store.insert_warning(&warning).await?;
        inserted += 1;
        debug!("Inserted warning for sensor {}: {}", mac, kind);
    }
    Ok(inserted)
}

async fn recently_warned(
    store: &dyn Store,
    mac: &str,
    kind: AlertKind,
    timestamp: &str,
    window: Duration,
) -> Result<bool> {
    // ---
    let Some(previous) = store.latest_warning(mac, kind.as_str()).await? else {
        return Ok(false);
    };
    let (Some(prev), Some(now)) = (parse_iso(&previous.timestamp), parse_iso(timestamp)) else {
        // Unparsable stamps: fall back to exact-match suppression.
        return Ok(previous.timestamp == timestamp);
    };
    Ok(within(prev, now, window))
}

fn within(prev: NaiveDateTime, now: NaiveDateTime, window: Duration) -> bool {
    let Ok(window) = chrono::Duration::from_std(window) else {
        return true;
    };
    now - prev < window
}
