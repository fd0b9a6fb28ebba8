//! Capture coordinator daemon
//!
//! Hosts a [`coordinator_lib::CaptureCoordinator`] behind an HTTP API and
//! feeds it from a sysfs thermal zone.

pub mod api;
pub mod config;
