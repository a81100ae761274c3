//! Background compaction and alerting for BLE environmental sensor readings.
//!
//! The gateway's raw temperature/humidity samples land in a [`store::Store`].
//! A single [`scheduler::Scheduler`] task then, every `check_interval`:
//! - advances each sensor's schedule bookkeeping ([`schedule`])
//! - folds the current minute into one clean read per sensor ([`compression`])
//! - writes interval aggregates for sensors whose `delta_time` elapsed
//! - raises warnings for readings outside their alert policy ([`alerts`])
//! - optionally purges old raw reads and warnings ([`retention`])
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): each exposes a
//! small surface and `main.rs` wires them together through [`AppContext`].

pub mod alerts;
pub mod compression;
pub mod config;
pub mod context;
pub mod models;
pub mod retention;
pub mod routes;
pub mod schedule;
pub mod scheduler;
pub mod schema;
pub mod store;

pub use config::Config;
pub use context::AppContext;
pub use scheduler::{Scheduler, SchedulerState};
