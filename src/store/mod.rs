//! Store: the persistence seam the scheduler depends on.
//!
//! Every operation is individually atomic; nothing spans a whole tick, so
//! writers on the request path may interleave with scheduler reads.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{
    AlertPolicy, CleanRead, RawRead, SchedulePolicy, ScheduledRead, Sensor, Warning,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

/// Durable keyed storage for sensors, policies, readings and warnings.
#[async_trait]
pub trait Store: Send + Sync {
    // --- sensors

    async fn list_sensors(&self) -> Result<Vec<Sensor>>;

    /// Update display name and location; unknown MACs are ignored.
    async fn rename_sensor(
        &self,
        mac: &str,
        name: Option<&str>,
        location: Option<&str>,
    ) -> Result<()>;

    // --- policies

    async fn get_alert_policy(&self, mac: &str) -> Result<Option<AlertPolicy>>;

    async fn set_alert_policy(&self, policy: &AlertPolicy) -> Result<()>;

    async fn get_schedule_policy(&self, mac: &str) -> Result<Option<SchedulePolicy>>;

    /// Create or change a sensor's interval. An existing `last_update` is kept.
    async fn set_schedule_policy(&self, mac: &str, delta_time: i64) -> Result<()>;

    /// Set `last_update` to `timestamp` if it still holds `previous`.
    ///
    /// Returns `false` when the stored value changed since the caller read
    /// it, or when the sensor has no schedule policy.
    async fn update_schedule_last_update(
        &self,
        mac: &str,
        previous: Option<&str>,
        timestamp: &str,
    ) -> Result<bool>;

    // --- raw reads

    /// Append a reading, creating the sensor on first sight and bumping its
    /// `last_read`.
    async fn insert_raw_read(&self, read: &RawRead) -> Result<()>;

    /// Newest first.
    async fn latest_raw_reads(&self, mac: &str, limit: usize) -> Result<Vec<RawRead>>;

    /// Most recent reading. Stores with a cheaper lookup may override this.
    async fn latest_raw_read(&self, mac: &str) -> Result<Option<RawRead>> {
        Ok(self.latest_raw_reads(mac, 1).await?.into_iter().next())
    }

    /// Reads whose timestamp starts with `minute_prefix`.
    async fn raw_reads_in_minute(&self, mac: &str, minute_prefix: &str) -> Result<Vec<RawRead>>;

    /// Reads with `start <= timestamp <= end`, compared as strings.
    async fn raw_reads_in_range(&self, mac: &str, start: &str, end: &str)
        -> Result<Vec<RawRead>>;

    /// Distinct `YYYY-MM-DDTHH:MM` prefixes that have raw data, oldest first.
    async fn raw_read_minutes(&self, mac: &str) -> Result<Vec<String>>;

    /// Returns the number of rows removed.
    async fn delete_raw_reads_older_than(&self, mac: &str, timestamp: &str) -> Result<u64>;

    // --- aggregates

    async fn clean_read_exists(&self, mac: &str, minute: &str) -> Result<bool>;

    async fn insert_clean_read(&self, read: &CleanRead) -> Result<()>;

    /// Newest first.
    async fn latest_clean_reads(&self, mac: &str, limit: usize) -> Result<Vec<CleanRead>>;

    async fn scheduled_read_exists(&self, mac: &str, start: &str) -> Result<bool>;

    async fn insert_scheduled_read(&self, read: &ScheduledRead) -> Result<()>;

    /// Oldest first.
    async fn scheduled_reads(&self, mac: &str) -> Result<Vec<ScheduledRead>>;

    // --- warnings

    async fn insert_warning(&self, warning: &Warning) -> Result<()>;

    /// All warnings, or only those of one sensor; oldest first.
    async fn warnings(&self, mac: Option<&str>) -> Result<Vec<Warning>>;

    /// Newest warning of `kind` for `mac`.
    async fn latest_warning(&self, mac: &str, kind: &str) -> Result<Option<Warning>>;

    /// Returns the number of rows removed.
    async fn delete_warnings_older_than(&self, timestamp: &str) -> Result<u64>;
}
