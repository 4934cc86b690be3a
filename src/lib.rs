//! TaskFlow distributed job processing system
//!
//! Clients submit job descriptions over an HTTP API; a pool of workers pulls
//! work from a shared Redis-backed queue, runs type-specific handlers, and
//! records outcomes in PostgreSQL. Execution is durable and at-least-once
//! with bounded retries.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
pub mod shutdown;
pub mod worker;
