//! Media compression job system
//!
//! Jobs are recorded in PostgreSQL, handed to workers through a Redis list
//! and carried to a terminal state even when workers crash: workers hold a
//! fenced, heartbeated claim on each job and a watchdog reclaims jobs whose
//! heartbeat goes stale, failing them once their retries are spent.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod telemetry;
