//! Database schema management for `sensorflow-compactor`.
//!
//! Ensures required tables and indexes exist before the scheduler starts.
//! Applied once on startup from `main.rs` (EMBP: single gateway call).
//!
//! Timestamps are TEXT holding ISO-8601 strings: clean reads are keyed by the
//! `YYYY-MM-DDTHH:MM` prefix and ranges compare lexically.

use anyhow::Result;
use sqlx::PgPool;

// ---

const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS sensors (
        mac        TEXT PRIMARY KEY,
        name       TEXT,
        location   TEXT,
        last_read  TEXT,
        is_active  BOOLEAN NOT NULL DEFAULT TRUE
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS alert_policies (
        mac           TEXT PRIMARY KEY REFERENCES sensors (mac),
        temp_min      DOUBLE PRECISION,
        temp_max      DOUBLE PRECISION,
        humidity_min  DOUBLE PRECISION,
        humidity_max  DOUBLE PRECISION
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_policies (
        mac          TEXT PRIMARY KEY REFERENCES sensors (mac),
        delta_time   BIGINT NOT NULL,
        last_update  TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reads_raw (
        id           BIGSERIAL PRIMARY KEY,
        timestamp    TEXT NOT NULL,
        mac          TEXT NOT NULL REFERENCES sensors (mac),
        temperature  DOUBLE PRECISION,
        humidity     DOUBLE PRECISION,
        rssi         INTEGER,
        "type"       TEXT,
        flags        TEXT
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reads_clean (
        timestamp  TEXT NOT NULL,
        mac        TEXT NOT NULL REFERENCES sensors (mac),
        avg_temp   DOUBLE PRECISION,
        min_temp   DOUBLE PRECISION,
        max_temp   DOUBLE PRECISION,
        avg_hum    DOUBLE PRECISION,
        min_hum    DOUBLE PRECISION,
        max_hum    DOUBLE PRECISION,
        flags      TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (mac, timestamp)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS reads_scheduled (
        timestamp  TEXT NOT NULL,
        mac        TEXT NOT NULL REFERENCES sensors (mac),
        avg_temp   DOUBLE PRECISION,
        min_temp   DOUBLE PRECISION,
        max_temp   DOUBLE PRECISION,
        avg_hum    DOUBLE PRECISION,
        min_hum    DOUBLE PRECISION,
        max_hum    DOUBLE PRECISION,
        flags      TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (mac, timestamp)
    );
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS warnings (
        id         BIGSERIAL PRIMARY KEY,
        timestamp  TEXT NOT NULL,
        mac        TEXT NOT NULL REFERENCES sensors (mac),
        "type"     TEXT NOT NULL,
        message    TEXT NOT NULL,
        read       BOOLEAN NOT NULL DEFAULT FALSE,
        posted     BOOLEAN NOT NULL DEFAULT FALSE
    );
    "#,
    // Latest-N and minute-prefix lookups both walk (mac, timestamp).
    r#"
    CREATE INDEX IF NOT EXISTS idx_reads_raw_mac_timestamp
        ON reads_raw (mac, timestamp);
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_warnings_mac_type_timestamp
        ON warnings (mac, "type", timestamp);
    "#,
];

/// Create or update the database schema (idempotent).
///
/// Safe to call on every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool) -> Result<()> {
    // ---
    let mut tx = pool.begin().await?;

    for statement in STATEMENTS {
        sqlx::query(*statement).execute(&mut *tx).await?;
    }

    tx.commit().await?;
    Ok(())
}
