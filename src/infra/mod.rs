//! Infrastructure adapters and runtime bootstrap.

pub mod chrome;
pub mod error;
pub mod roster;
pub mod smtp;
pub mod telemetry;
