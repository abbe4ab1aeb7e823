//! Offline-resilient upload queue for captured check-ins.

pub mod engine;
pub mod ports;
