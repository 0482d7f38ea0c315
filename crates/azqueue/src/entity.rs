//! Shared reference to a named entity on a queue service.

use crate::error::{QueueError, ValidationError};
use crate::message::QueueName;
use crate::service::QueueService;
use std::sync::Arc;

/// A service handle plus an optional, normalized entity name.
///
/// `name == None` means no entity is selected; operations that need a name
/// fail with [`QueueError::PreconditionFailed`] before touching the service.
#[derive(Clone)]
pub struct EntityRef {
    service: Arc<dyn QueueService>,
    name: Option<QueueName>,
}

impl EntityRef {
    pub fn new(service: Arc<dyn QueueService>, name: Option<&str>) -> Result<Self, ValidationError> {
        Ok(Self {
            service,
            name: name.map(QueueName::new).transpose()?,
        })
    }

    /// Point the reference at another entity, or at none
    pub fn select(&mut self, name: Option<&str>) -> Result<(), ValidationError> {
        self.name = name.map(QueueName::new).transpose()?;
        Ok(())
    }

    pub fn name(&self) -> Option<&QueueName> {
        self.name.as_ref()
    }

    /// The selected name, or a precondition failure
    pub fn require_name(&self) -> Result<&QueueName, QueueError> {
        self.name.as_ref().ok_or_else(|| QueueError::PreconditionFailed {
            field: "queue_name".to_string(),
        })
    }

    pub fn service(&self) -> &dyn QueueService {
        self.service.as_ref()
    }
}

impl std::fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityRef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
