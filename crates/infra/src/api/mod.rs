//! HTTP client for the collector service.

pub mod client;

pub use client::CollectorClient;
