//! Shared utilities for the MCP Gateway

pub mod clock;

pub use clock::{
    chrono_duration, millis_between, saturating_add, saturating_sub, system_clock, Clock, DefaultClock,
    ManualClock, SharedClock,
};
