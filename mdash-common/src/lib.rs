//! # mdash Common Library
//!
//! Shared code for the metrics dashboard services:
//! - Error and result types
//! - Configuration loading (TOML + environment + OS defaults)
//! - Database initialization and schema migrations
//! - Sync status events (EventBus)
//! - Date range helpers
//! - Secret redaction for persisted messages

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod redaction;
pub mod time;

pub use error::{Error, Result};
