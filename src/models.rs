//! Data models for sensors, readings, policies and warnings.
//!
//! Timestamps are ISO-8601 strings throughout. Minute buckets are keyed by the
//! `YYYY-MM-DDTHH:MM` prefix, so string prefix and lexical range comparisons
//! are the bucket semantics; the helpers at the bottom produce those strings.

use std::fmt;

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---

/// A BLE beacon, identified by its MAC address.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Sensor {
    // ---
    pub mac: String,
    pub name: Option<String>,
    pub location: Option<String>,
    pub last_read: Option<String>,
    pub is_active: bool,
}

impl Sensor {
    pub fn new(mac: impl Into<String>) -> Self {
        Sensor {
            mac: mac.into(),
            name: None,
            location: None,
            last_read: None,
            is_active: true,
        }
    }
}

/// One untouched sample relayed by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawRead {
    // ---
    pub timestamp: String,
    pub mac: String,
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub rssi: Option<i32>,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub flags: Option<String>,
}

impl RawRead {
    pub fn new(
        mac: impl Into<String>,
        timestamp: impl Into<String>,
        temperature: Option<f64>,
        humidity: Option<f64>,
    ) -> Self {
        RawRead {
            timestamp: timestamp.into(),
            mac: mac.into(),
            temperature,
            humidity,
            rssi: None,
            kind: None,
            flags: None,
        }
    }
}

/// avg/min/max over temperature and humidity for one bucket.
///
/// A field is `None` when no reading in the bucket carried that value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, sqlx::FromRow)]
pub struct ReadStats {
    // ---
    pub avg_temp: Option<f64>,
    pub min_temp: Option<f64>,
    pub max_temp: Option<f64>,
    pub avg_hum: Option<f64>,
    pub min_hum: Option<f64>,
    pub max_hum: Option<f64>,
}

impl ReadStats {
    pub fn is_empty(&self) -> bool {
        self.avg_temp.is_none()
            && self.min_temp.is_none()
            && self.max_temp.is_none()
            && self.avg_hum.is_none()
            && self.min_hum.is_none()
            && self.max_hum.is_none()
    }
}

/// One-minute aggregate, keyed by (mac, minute).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CleanRead {
    // ---
    pub timestamp: String,
    pub mac: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub stats: ReadStats,
    pub flags: String,
}

/// Aggregate over a sensor's configured interval, keyed by (mac, start).
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ScheduledRead {
    // ---
    pub timestamp: String,
    pub mac: String,
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub stats: ReadStats,
    pub flags: String,
}

/// Per-sensor thresholds. An absent bound is disabled.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AlertPolicy {
    // ---
    pub mac: String,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub humidity_min: Option<f64>,
    pub humidity_max: Option<f64>,
}

/// Per-sensor scheduled aggregation interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct SchedulePolicy {
    // ---
    pub mac: String,
    /// Interval length in seconds.
    pub delta_time: i64,
    pub last_update: Option<String>,
}

/// Which threshold a reading crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    TempHigh,
    TempLow,
    HumidityHigh,
    HumidityLow,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::TempHigh => "temp_high",
            AlertKind::TempLow => "temp_low",
            AlertKind::HumidityHigh => "humidity_high",
            AlertKind::HumidityLow => "humidity_low",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only alert event.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct Warning {
    // ---
    pub timestamp: String,
    pub mac: String,
    #[sqlx(rename = "type")]
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    pub read: bool,
    pub posted: bool,
}

impl Warning {
    pub fn new(mac: &str, kind: AlertKind, timestamp: impl Into<String>) -> Self {
        Warning {
            timestamp: timestamp.into(),
            mac: mac.to_string(),
            kind: kind.as_str().to_string(),
            message: format!("{kind} alert triggered for sensor {mac}"),
            read: false,
            posted: false,
        }
    }
}

// ---

/// `YYYY-MM-DDTHH:MM`, the clean read key for the minute containing `ts`.
pub fn minute_key(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M").to_string()
}

/// `YYYY-MM-DDTHH:00:00`, the top of the hour containing `ts`.
pub fn hour_start(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:00:00").to_string()
}

/// `YYYY-MM-DDTHH:MM:SS.ffffff`.
pub fn iso(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Parse an ISO timestamp written by this service or by the gateway.
///
/// Accepts a naive timestamp with optional fractional seconds, a bare
/// minute, or an RFC 3339 timestamp with offset (converted to UTC).
pub fn parse_iso(value: &str) -> Option<NaiveDateTime> {
    // ---
    let value = value.trim();
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(ts);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M") {
        return Some(ts);
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|ts| ts.naive_utc())
}
