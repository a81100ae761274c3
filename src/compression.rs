//! Compression engine: reduce raw reads into minute and interval aggregates.
//!
//! Both writers are idempotent on their key, so the live tick and the
//! historical backfill can revisit a bucket in any order.

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::models::{CleanRead, RawRead, ReadStats, ScheduledRead};
use crate::store::Store;

// ---

#[derive(Default)]
struct Accumulator {
    sum: f64,
    count: u32,
    min: Option<f64>,
    max: Option<f64>,
}

impl Accumulator {
    fn push(&mut self, value: Option<f64>) {
        // Nulls don't participate, same as SQL AVG/MIN/MAX.
        let Some(v) = value else { return };
        self.sum += v;
        self.count += 1;
        self.min = Some(self.min.map_or(v, |m| m.min(v)));
        self.max = Some(self.max.map_or(v, |m| m.max(v)));
    }

    fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / f64::from(self.count))
    }
}

/// Reduce a set of raw reads to avg/min/max of temperature and humidity.
///
/// Returns `None` when there is nothing to aggregate: no reads, or every
/// temperature and humidity value is null.
pub fn summarize(reads: &[RawRead]) -> Option<ReadStats> {
    // ---
    let mut temp = Accumulator::default();
    let mut hum = Accumulator::default();
    for read in reads {
        temp.push(read.temperature);
        hum.push(read.humidity);
    }

    let stats = ReadStats {
        avg_temp: temp.avg(),
        min_temp: temp.min,
        max_temp: temp.max,
        avg_hum: hum.avg(),
        min_hum: hum.min,
        max_hum: hum.max,
    };
    (!stats.is_empty()).then_some(stats)
}

/// Write the clean read for `(mac, minute)` if it is missing.
///
/// `minute` is a `YYYY-MM-DDTHH:MM` prefix; every raw read whose timestamp
/// starts with it belongs to the bucket. Returns the row written, or `None`
/// when the row already existed or the bucket had no data.
pub async fn compress_minute(
    store: &dyn Store,
    mac: &str,
    minute: &str,
) -> Result<Option<CleanRead>> {
    // ---
    if store.clean_read_exists(mac, minute).await? {
        debug!("Clean read for {} at {} already present", mac, minute);
        return Ok(None);
    }

    let reads = store.raw_reads_in_minute(mac, minute).await?;
    let Some(stats) = summarize(&reads) else {
        return Ok(None);
    };

    let clean = CleanRead {
        timestamp: minute.to_string(),
        mac: mac.to_string(),
        stats,
        flags: String::new(),
    };
    store.insert_clean_read(&clean).await?;
    debug!(
        "Compressed {} raw reads for {} at {}: {:?}",
        reads.len(),
        mac,
        minute,
        clean.stats
    );
    Ok(Some(clean))
}

/// Compress `minute` for every known sensor.
///
/// A failing sensor is logged and skipped. Returns the number of clean reads
/// written.
pub async fn compress_minute_all(store: &dyn Store, minute: &str) -> Result<usize> {
    // ---
    let sensors = store.list_sensors().await.context("compress: list sensors")?;
    let mut written = 0;

    for sensor in &sensors {
        match compress_minute(store, &sensor.mac, minute).await {
            Ok(Some(_)) => written += 1,
            Ok(None) => {}
            Err(e) => warn!(
                "Minute compression failed for sensor {} at {}: {:#}",
                sensor.mac, minute, e
            ),
        }
    }
    Ok(written)
}

/// Write the scheduled read for `(mac, start)` over `start..=end` if it is
/// missing.
pub async fn compress_interval(
    store: &dyn Store,
    mac: &str,
    start: &str,
    end: &str,
) -> Result<Option<ScheduledRead>> {
    // ---
    if store.scheduled_read_exists(mac, start).await? {
        debug!("Scheduled read for {} at {} already present", mac, start);
        return Ok(None);
    }

    let reads = store.raw_reads_in_range(mac, start, end).await?;
    let Some(stats) = summarize(&reads) else {
        return Ok(None);
    };

    let scheduled = ScheduledRead {
        timestamp: start.to_string(),
        mac: mac.to_string(),
        stats,
        flags: String::new(),
    };
    store.insert_scheduled_read(&scheduled).await?;
    debug!(
        "Compressed {} raw reads for {} from {} to {}",
        reads.len(),
        mac,
        start,
        end
    );
    Ok(Some(scheduled))
}

/// On-demand statistics for reporting; nothing is written.
pub async fn statistics(
    store: &dyn Store,
    mac: &str,
    start: &str,
    end: &str,
) -> Result<Option<ReadStats>> {
    let reads = store.raw_reads_in_range(mac, start, end).await?;
    Ok(summarize(&reads))
}

/// Compress every historical minute of every sensor.
///
/// A failing sensor is logged and skipped. Returns the number of clean reads
/// written.
pub async fn backfill_clean_reads(store: &dyn Store) -> Result<usize> {
    // ---
    let sensors = store.list_sensors().await.context("backfill: list sensors")?;
    let mut written = 0;

    for sensor in &sensors {
        match backfill_sensor(store, &sensor.mac).await {
            Ok(n) => written += n,
            Err(e) => warn!("Backfill failed for sensor {}: {:#}", sensor.mac, e),
        }
    }

    info!(
        "Backfill wrote {} clean reads across {} sensors",
        written,
        sensors.len()
    );
    Ok(written)
}

async fn backfill_sensor(store: &dyn Store, mac: &str) -> Result<usize> {
    let mut written = 0;
    for minute in store.raw_read_minutes(mac).await? {
        if compress_minute(store, mac, &minute).await?.is_some() {
            written += 1;
        }
    }
    Ok(written)
}
