//! vdisk-ops Common - Shared types and utilities
//!
//! This crate provides the identifiers, error definitions, configuration
//! and clock used by the snapshot retention engine and the MDS safety
//! engine.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    EngineConfig, MdsDefaults, RetentionConfig, RetentionPolicy, RetentionRule, VolumeDriverConfig,
};
pub use error::{Error, Result};
pub use types::*;

/// Seconds in one day, used to turn policy days into bucket widths
pub const SECONDS_PER_DAY: i64 = 86_400;
