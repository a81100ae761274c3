//! Postgres-backed [`Store`] over a shared `sqlx` connection pool.
//!
//! Timestamps live in TEXT columns; see `schema.rs`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::Store;
use crate::models::{
    AlertPolicy, CleanRead, RawRead, SchedulePolicy, ScheduledRead, Sensor, Warning,
};

// ---

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

const RAW_COLUMNS: &str = r#"timestamp, mac, temperature, humidity, rssi, "type", flags"#;
const AGG_COLUMNS: &str =
    "timestamp, mac, avg_temp, min_temp, max_temp, avg_hum, min_hum, max_hum, flags";
const WARNING_COLUMNS: &str = r#"timestamp, mac, "type", message, read, posted"#;

#[async_trait]
impl Store for PgStore {
    async fn list_sensors(&self) -> Result<Vec<Sensor>> {
        // ---
        let sensors = sqlx::query_as::<_, Sensor>(
            "SELECT mac, name, location, last_read, is_active FROM sensors ORDER BY mac",
        )
        .fetch_all(&self.pool)
        .await
        .context("list sensors")?;
        Ok(sensors)
    }

    async fn rename_sensor(
        &self,
        mac: &str,
        name: Option<&str>,
        location: Option<&str>,
    ) -> Result<()> {
        // ---
        sqlx::query("UPDATE sensors SET name = $2, location = $3 WHERE mac = $1")
            .bind(mac)
            .bind(name)
            .bind(location)
            .execute(&self.pool)
            .await
            .with_context(|| format!("rename sensor {mac}"))?;
        Ok(())
    }

    async fn get_alert_policy(&self, mac: &str) -> Result<Option<AlertPolicy>> {
        // ---
        let policy = sqlx::query_as::<_, AlertPolicy>(
            r#"
            SELECT mac, temp_min, temp_max, humidity_min, humidity_max
              FROM alert_policies
             WHERE mac = $1
            "#,
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("get alert policy for {mac}"))?;
        Ok(policy)
    }

    async fn set_alert_policy(&self, policy: &AlertPolicy) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO alert_policies (mac, temp_min, temp_max, humidity_min, humidity_max)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (mac) DO UPDATE SET
                temp_min     = EXCLUDED.temp_min,
                temp_max     = EXCLUDED.temp_max,
                humidity_min = EXCLUDED.humidity_min,
                humidity_max = EXCLUDED.humidity_max
            "#,
        )
        .bind(&policy.mac)
        .bind(policy.temp_min)
        .bind(policy.temp_max)
        .bind(policy.humidity_min)
        .bind(policy.humidity_max)
        .execute(&self.pool)
        .await
        .with_context(|| format!("set alert policy for {}", policy.mac))?;
        Ok(())
    }

    async fn get_schedule_policy(&self, mac: &str) -> Result<Option<SchedulePolicy>> {
        // ---
        let policy = sqlx::query_as::<_, SchedulePolicy>(
            "SELECT mac, delta_time, last_update FROM schedule_policies WHERE mac = $1",
        )
        .bind(mac)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("get schedule policy for {mac}"))?;
        Ok(policy)
    }

    async fn set_schedule_policy(&self, mac: &str, delta_time: i64) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO schedule_policies (mac, delta_time)
            VALUES ($1, $2)
            ON CONFLICT (mac) DO UPDATE SET delta_time = EXCLUDED.delta_time
            "#,
        )
        .bind(mac)
        .bind(delta_time)
        .execute(&self.pool)
        .await
        .with_context(|| format!("set schedule policy for {mac}"))?;
        Ok(())
    }

    async fn update_schedule_last_update(
        &self,
        mac: &str,
        previous: Option<&str>,
        timestamp: &str,
    ) -> Result<bool> {
        // ---
        let result = sqlx::query(
            r#"
            UPDATE schedule_policies
               SET last_update = $2
             WHERE mac = $1
               AND last_update IS NOT DISTINCT FROM $3
            "#,
        )
        .bind(mac)
        .bind(timestamp)
        .bind(previous)
        .execute(&self.pool)
        .await
        .with_context(|| format!("update last_update for {mac}"))?;

        let advanced = result.rows_affected() > 0;
        if !advanced {
            tracing::debug!("last_update for {} not advanced to {}", mac, timestamp);
        }
        Ok(advanced)
    }

    async fn insert_raw_read(&self, read: &RawRead) -> Result<()> {
        // ---
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO sensors (mac, last_read) VALUES ($1, $2)
            ON CONFLICT (mac) DO UPDATE SET last_read = EXCLUDED.last_read
            "#,
        )
        .bind(&read.mac)
        .bind(&read.timestamp)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("register sensor {}", read.mac))?;

        sqlx::query(
            r#"
            INSERT INTO reads_raw (timestamp, mac, temperature, humidity, rssi, "type", flags)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&read.timestamp)
        .bind(&read.mac)
        .bind(read.temperature)
        .bind(read.humidity)
        .bind(read.rssi)
        .bind(&read.kind)
        .bind(&read.flags)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("insert raw read for {}", read.mac))?;

        tx.commit().await?;
        Ok(())
    }

    async fn latest_raw_reads(&self, mac: &str, limit: usize) -> Result<Vec<RawRead>> {
        // ---
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM reads_raw WHERE mac = $1 ORDER BY timestamp DESC, id DESC LIMIT $2"
        );
        let reads = sqlx::query_as::<_, RawRead>(&sql)
            .bind(mac)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("latest raw reads for {mac}"))?;
        Ok(reads)
    }

    async fn raw_reads_in_minute(&self, mac: &str, minute_prefix: &str) -> Result<Vec<RawRead>> {
        // ---
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM reads_raw WHERE mac = $1 AND LEFT(timestamp, LENGTH($2)) = $2"
        );
        let reads = sqlx::query_as::<_, RawRead>(&sql)
            .bind(mac)
            .bind(minute_prefix)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("raw reads for {mac} in {minute_prefix}"))?;
        Ok(reads)
    }

    async fn raw_reads_in_range(
        &self,
        mac: &str,
        start: &str,
        end: &str,
    ) -> Result<Vec<RawRead>> {
        // ---
        let sql = format!(
            "SELECT {RAW_COLUMNS} FROM reads_raw WHERE mac = $1 AND timestamp BETWEEN $2 AND $3"
        );
        let reads = sqlx::query_as::<_, RawRead>(&sql)
            .bind(mac)
            .bind(start)
            .bind(end)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("raw reads for {mac} in [{start}, {end}]"))?;
        Ok(reads)
    }

    async fn raw_read_minutes(&self, mac: &str) -> Result<Vec<String>> {
        // ---
        let minutes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT DISTINCT LEFT(timestamp, 16) AS minute
              FROM reads_raw
             WHERE mac = $1 AND LENGTH(timestamp) >= 16
             ORDER BY minute
            "#,
        )
        .bind(mac)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("raw read minutes for {mac}"))?;
        Ok(minutes)
    }

    async fn delete_raw_reads_older_than(&self, mac: &str, timestamp: &str) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM reads_raw WHERE mac = $1 AND timestamp < $2")
            .bind(mac)
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .with_context(|| format!("purge raw reads for {mac}"))?;
        Ok(result.rows_affected())
    }

    async fn clean_read_exists(&self, mac: &str, minute: &str) -> Result<bool> {
        // ---
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reads_clean WHERE mac = $1 AND timestamp = $2)",
        )
        .bind(mac)
        .bind(minute)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("clean read lookup for {mac} at {minute}"))?;
        Ok(exists)
    }

    async fn insert_clean_read(&self, read: &CleanRead) -> Result<()> {
        // ---
        let sql = format!(
            "INSERT INTO reads_clean ({AGG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (mac, timestamp) DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(&read.timestamp)
            .bind(&read.mac)
            .bind(read.stats.avg_temp)
            .bind(read.stats.min_temp)
            .bind(read.stats.max_temp)
            .bind(read.stats.avg_hum)
            .bind(read.stats.min_hum)
            .bind(read.stats.max_hum)
            .bind(&read.flags)
            .execute(&self.pool)
            .await
            .with_context(|| format!("insert clean read for {} at {}", read.mac, read.timestamp))?;
        Ok(())
    }

    async fn latest_clean_reads(&self, mac: &str, limit: usize) -> Result<Vec<CleanRead>> {
        // ---
        let sql = format!(
            "SELECT {AGG_COLUMNS} FROM reads_clean WHERE mac = $1 ORDER BY timestamp DESC LIMIT $2"
        );
        let reads = sqlx::query_as::<_, CleanRead>(&sql)
            .bind(mac)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("latest clean reads for {mac}"))?;
        Ok(reads)
    }

    async fn scheduled_read_exists(&self, mac: &str, start: &str) -> Result<bool> {
        // ---
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reads_scheduled WHERE mac = $1 AND timestamp = $2)",
        )
        .bind(mac)
        .bind(start)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("scheduled read lookup for {mac} at {start}"))?;
        Ok(exists)
    }

    async fn insert_scheduled_read(&self, read: &ScheduledRead) -> Result<()> {
        // ---
        let sql = format!(
            "INSERT INTO reads_scheduled ({AGG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (mac, timestamp) DO NOTHING"
        );
        sqlx::query(&sql)
            .bind(&read.timestamp)
            .bind(&read.mac)
            .bind(read.stats.avg_temp)
            .bind(read.stats.min_temp)
            .bind(read.stats.max_temp)
            .bind(read.stats.avg_hum)
            .bind(read.stats.min_hum)
            .bind(read.stats.max_hum)
            .bind(&read.flags)
            .execute(&self.pool)
            .await
            .with_context(|| {
                format!("insert scheduled read for {} at {}", read.mac, read.timestamp)
            })?;
        Ok(())
    }

    async fn scheduled_reads(&self, mac: &str) -> Result<Vec<ScheduledRead>> {
        // ---
        let sql =
            format!("SELECT {AGG_COLUMNS} FROM reads_scheduled WHERE mac = $1 ORDER BY timestamp");
        let reads = sqlx::query_as::<_, ScheduledRead>(&sql)
            .bind(mac)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("scheduled reads for {mac}"))?;
        Ok(reads)
    }

    async fn insert_warning(&self, warning: &Warning) -> Result<()> {
        // ---
        sqlx::query(
            r#"
            INSERT INTO warnings (timestamp, mac, "type", message, read, posted)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&warning.timestamp)
        .bind(&warning.mac)
        .bind(&warning.kind)
        .bind(&warning.message)
        .bind(warning.read)
        .bind(warning.posted)
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert {} warning for {}", warning.kind, warning.mac))?;
        Ok(())
    }

    async fn warnings(&self, mac: Option<&str>) -> Result<Vec<Warning>> {
        // ---
        let sql = format!(
            "SELECT {WARNING_COLUMNS} FROM warnings WHERE ($1::TEXT IS NULL OR mac = $1) ORDER BY id"
        );
        let warnings = sqlx::query_as::<_, Warning>(&sql)
            .bind(mac)
            .fetch_all(&self.pool)
            .await
            .context("list warnings")?;
        Ok(warnings)
    }

    async fn latest_warning(&self, mac: &str, kind: &str) -> Result<Option<Warning>> {
        // ---
        let sql = format!(
            r#"SELECT {WARNING_COLUMNS} FROM warnings WHERE mac = $1 AND "type" = $2
               ORDER BY timestamp DESC, id DESC LIMIT 1"#
        );
        let warning = sqlx::query_as::<_, Warning>(&sql)
            .bind(mac)
            .bind(kind)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("latest {kind} warning for {mac}"))?;
        Ok(warning)
    }

    async fn delete_warnings_older_than(&self, timestamp: &str) -> Result<u64> {
        // ---
        let result = sqlx::query("DELETE FROM warnings WHERE timestamp < $1")
            .bind(timestamp)
            .execute(&self.pool)
            .await
            .context("purge warnings")?;
        Ok(result.rows_affected())
    }
}
