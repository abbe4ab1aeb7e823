//! Shared test doubles for the queue engine integration tests.

pub mod queue;
