//! Common test utilities for azqueue integration tests
//!
//! This module provides:
//! - Factories over a shared in-memory service
//! - Fast retry configuration so failure scenarios finish quickly
//! - Shared payload types

use azqueue::{
    InMemoryQueueService, QueueClient, QueueClientConfig, QueueClientFactory, ServiceError,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;

/// Configuration with a short retry schedule: 3 retries, 1s apart
#[allow(dead_code)]
pub fn fast_config() -> QueueClientConfig {
    let mut config = QueueClientConfig::default();
    config.retry.max_retries = 3;
    config.retry.delay_seconds = 1;
    config
}

/// A service plus a factory bound to it
pub struct TestEnv {
    pub service: Arc<InMemoryQueueService>,
    pub factory: QueueClientFactory,
}

impl TestEnv {
    #[allow(dead_code)]
    pub fn new() -> Self {
        Self::with_config(fast_config())
    }

    #[allow(dead_code)]
    pub fn with_config(config: QueueClientConfig) -> Self {
        let service = Arc::new(InMemoryQueueService::default());
        let factory = QueueClientFactory::new(service.clone(), config)
            .expect("test configuration must be valid");
        Self { service, factory }
    }

    /// Client for `name`, creating the queue first
    #[allow(dead_code)]
    pub async fn queue(&self, name: &str) -> QueueClient {
        let client = self.factory.queue(Some(name)).expect("valid queue name");
        client.create(false).await.expect("create queue");
        client
    }
}

#[allow(dead_code)]
pub fn connection_refused() -> ServiceError {
    ServiceError::Io(io::Error::new(
        io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

#[allow(dead_code)]
pub fn dns_failure() -> ServiceError {
    ServiceError::AddressResolution {
        host: "account.queue.example".to_string(),
        message: "no such host".to_string(),
    }
}

/// Payload used by packed delivery scenarios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub sensor: String,
    pub value: f64,
    pub sequence: u32,
}

#[allow(dead_code)]
pub fn reading(sequence: u32) -> Reading {
    Reading {
        sensor: format!("sensor-{}", sequence % 4),
        value: f64::from(sequence) * 0.5,
        sequence,
    }
}
