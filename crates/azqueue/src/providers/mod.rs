//! Queue service implementations.
//!
//! This module contains concrete implementations of the `QueueService` trait.

pub mod memory;

pub use memory::{InMemoryConfig, InMemoryQueueService, ServiceOperation};
