//! procwatch - Process Lifecycle Monitoring Library
//!
//! Subscribes to process start/stop notifications from an instrumentation
//! source and delivers them to a consumer through a bounded pull queue or a
//! push callback.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod constants;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod output;
