//! In-memory [`Store`] used by tests and local runs without Postgres.
//!
//! Not durable. Mirrors the Postgres semantics: composite keys on the
//! aggregate tables, insert-if-absent on conflict, string comparison on
//! timestamps.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::Store;
use crate::models::{
    AlertPolicy, CleanRead, RawRead, SchedulePolicy, ScheduledRead, Sensor, Warning,
};

#[derive(Default)]
struct Tables {
    sensors: BTreeMap<String, Sensor>,
    alert_policies: BTreeMap<String, AlertPolicy>,
    schedule_policies: BTreeMap<String, SchedulePolicy>,
    raw_reads: Vec<RawRead>,
    clean_reads: BTreeMap<(String, String), CleanRead>,
    scheduled_reads: BTreeMap<(String, String), ScheduledRead>,
    warnings: Vec<Warning>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every clean read, ordered by (mac, minute).
    pub async fn clean_reads(&self) -> Vec<CleanRead> {
        let tables = self.tables.lock().await;
        tables.clean_reads.values().cloned().collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        let tables = self.tables.lock().await;
        Ok(tables.sensors.values().cloned().collect())
    }

    async fn rename_sensor(
        &self,
        mac: &str,
        name: Option<&str>,
        location: Option<&str>,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(sensor) = tables.sensors.get_mut(mac) {
            sensor.name = name.map(str::to_string);
            sensor.location = location.map(str::to_string);
        }
        Ok(())
    }

    async fn get_alert_policy(&self, mac: &str) -> Result<Option<AlertPolicy>> {
        let tables = self.tables.lock().await;
        Ok(tables.alert_policies.get(mac).cloned())
    }

    async fn set_alert_policy(&self, policy: &AlertPolicy) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .alert_policies
            .insert(policy.mac.clone(), policy.clone());
        Ok(())
    }

    async fn get_schedule_policy(&self, mac: &str) -> Result<Option<SchedulePolicy>> {
        let tables = self.tables.lock().await;
        Ok(tables.schedule_policies.get(mac).cloned())
    }

    async fn set_schedule_policy(&self, mac: &str, delta_time: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .schedule_policies
            .entry(mac.to_string())
            .and_modify(|p| p.delta_time = delta_time)
            .or_insert_with(|| SchedulePolicy {
                mac: mac.to_string(),
                delta_time,
                last_update: None,
            });
        Ok(())
    }

    async fn update_schedule_last_update(
        &self,
        mac: &str,
        previous: Option<&str>,
        timestamp: &str,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        let Some(policy) = tables.schedule_policies.get_mut(mac) else {
            tracing::warn!("Schedule policy for sensor {} not found", mac);
            return Ok(false);
        };
        if policy.last_update.as_deref() != previous {
            return Ok(false);
        }
        policy.last_update = Some(timestamp.to_string());
        Ok(true)
    }

    async fn insert_raw_read(&self, read: &RawRead) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let sensor = tables
            .sensors
            .entry(read.mac.clone())
            .or_insert_with(|| Sensor::new(read.mac.clone()));
        sensor.last_read = Some(read.timestamp.clone());
        tables.raw_reads.push(read.clone());
        Ok(())
    }

    async fn latest_raw_reads(&self, mac: &str, limit: usize) -> Result<Vec<RawRead>> {
        let tables = self.tables.lock().await;
        // Reverse first so the later insert wins a timestamp tie.
        let mut reads: Vec<RawRead> = tables
            .raw_reads
            .iter()
            .rev()
            .filter(|r| r.mac == mac)
            .cloned()
            .collect();
        reads.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        reads.truncate(limit);
        Ok(reads)
    }

    async fn raw_reads_in_minute(&self, mac: &str, minute_prefix: &str) -> Result<Vec<RawRead>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .raw_reads
            .iter()
            .filter(|r| r.mac == mac && r.timestamp.starts_with(minute_prefix))
            .cloned()
            .collect())
    }

    async fn raw_reads_in_range(
        &self,
        mac: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<RawRead>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .raw_reads
            .iter()
            .filter(|r| {
                r.mac == mac && r.timestamp.as_str() >= start && r.timestamp.as_str() <= end
            })
            .cloned()
            .collect())
    }

    async fn raw_read_minutes(&self, mac: &str) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        let mut minutes: Vec<String> = tables
            .raw_reads
            .iter()
            .filter(|r| r.mac == mac)
            .filter_map(|r| r.timestamp.get(..16).map(str::to_string))
            .collect();
        minutes.sort();
        minutes.dedup();
        Ok(minutes)
    }

    async fn delete_raw_reads_older_than(&self, mac: &str, timestamp: &str) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.raw_reads.len();
        tables
            .raw_reads
            .retain(|r| !(r.mac == mac && r.timestamp.as_str() < timestamp));
        Ok((before - tables.raw_reads.len()) as u64)
    }

    async fn clean_read_exists(&self, mac: &str, minute: &str) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .clean_reads
            .contains_key(&(mac.to_string(), minute.to_string())))
    }

    async fn insert_clean_read(&self, read: &CleanRead) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .clean_reads
            .entry((read.mac.clone(), read.timestamp.clone()))
            .or_insert_with(|| read.clone());
        Ok(())
    }

    async fn latest_clean_reads(&self, mac: &str, limit: usize) -> Result<Vec<CleanRead>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .clean_reads
            .values()
            .rev()
            .filter(|r| r.mac == mac)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn scheduled_read_exists(&self, mac: &str, start: &str) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .scheduled_reads
            .contains_key(&(mac.to_string(), start.to_string())))
    }

    async fn insert_scheduled_read(&self, read: &ScheduledRead) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables
            .scheduled_reads
            .entry((read.mac.clone(), read.timestamp.clone()))
            .or_insert_with(|| read.clone());
        Ok(())
    }

    async fn scheduled_reads(&self, mac: &str) -> Result<Vec<ScheduledRead>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .scheduled_reads
            .values()
            .filter(|r| r.mac == mac)
            .cloned()
            .collect())
    }

    async fn insert_warning(&self, warning: &Warning) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.warnings.push(warning.clone());
        Ok(())
    }

    async fn warnings(&self, mac: Option<&str>) -> Result<Vec<Warning>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .warnings
            .iter()
            .filter(|w| mac.map_or(true, |m| w.mac == m))
            .cloned()
            .collect())
    }

    async fn latest_warning(&self, mac: &str, kind: &str) -> Result<Option<Warning>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .warnings
            .iter()
            .filter(|w| w.mac == mac && w.kind == kind)
            .max_by(|a, b| a.timestamp.cmp(&b.timestamp))
            .cloned())
    }

    async fn delete_warnings_older_than(&self, timestamp: &str) -> Result<u64> {
        let mut tables = self.tables.lock().await;
        let before = tables.warnings.len();
        tables.warnings.retain(|w| w.timestamp.as_str() >= timestamp);
        Ok((before - tables.warnings.len()) as u64)
    }
}
