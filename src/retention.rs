//! Retention: purge raw reads and warnings past their configured age.
//!
//! Aggregates are never purged; raw reads are only removed here.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::models::iso;
use crate::store::Store;

// ---

/// Rows removed by one retention pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Purged {
    pub raw_reads: u64,
    pub warnings: u64,
}

fn cutoff(now: NaiveDateTime, age: Duration) -> Option<String> {
    let age = chrono::Duration::from_std(age).ok()?;
    now.checked_sub_signed(age).map(iso)
}

/// Delete raw reads older than `now - raw_age` for every sensor, and warnings
/// older than `now - warning_age`. A `None` age leaves that table alone.
pub async fn purge(
    store: &dyn Store,
    now: NaiveDateTime,
    raw_age: Option<Duration>,
    warning_age: Option<Duration>,
) -> Result<Purged> {
    // ---
    let mut purged = Purged::default();

    if let Some(before) = raw_age.and_then(|age| cutoff(now, age)) {
        let sensors = store.list_sensors().await.context("retention: list sensors")?;
        for sensor in &sensors {
            match store.delete_raw_reads_older_than(&sensor.mac, &before).await {
                Ok(n) => purged.raw_reads += n,
                Err(e) => warn!("Raw read purge failed for sensor {}: {:#}", sensor.mac, e),
            }
        }
    }

    if let Some(before) = warning_age.and_then(|age| cutoff(now, age)) {
        purged.warnings = store
            .delete_warnings_older_than(&before)
            .await
            .context("retention: purge warnings")?;
    }

    if purged != Purged::default() {
        info!(
            "Retention purged {} raw reads and {} warnings",
            purged.raw_reads, purged.warnings
        );
    } else {
        debug!("Retention purged nothing");
    }
    Ok(purged)
}
