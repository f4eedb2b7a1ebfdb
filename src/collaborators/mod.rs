//! # External Collaborators
//!
//! Abstract contracts for the services the orchestrator calls out to. Concrete
//! HTTP clients live outside this crate; a deployment wires whichever are
//! available into a [`Collaborators`] bundle. Asking the bundle for a missing
//! service yields `COLLABORATOR_NOT_CONFIGURED`, distinct from a failed call.

pub mod deployment;
pub mod error;
pub mod in_memory;
pub mod object_storage;
pub mod observability;
pub mod source_control;

use std::sync::Arc;

use crate::error::{OrchestratorError, Result};

pub use deployment::{
    Application, ApplicationResource, DeploymentSync, HistoryEntry, SyncOptions, SyncResult,
};
pub use error::{CollaboratorError, CollaboratorResult};
pub use in_memory::{
    InMemoryDeploymentSync, InMemoryObjectStorage, InMemoryObservability, InMemorySourceControl,
};
pub use object_storage::{
    ObjectPage, ObjectStorage, SignedUrlMethod, SignedUrlOptions, StoredObject,
};
pub use observability::{
    Alert, Dashboard, Folder, ObservabilityRenderer, RenderParams, RenderStream,
};
pub use source_control::{
    Branch, FileContent, FileWrite, NewPullRequest, PullRequest, PullRequestState, Repository,
    SourceControl,
};

pub const SOURCE_CONTROL: &str = "source control";
pub const DEPLOYMENT_SYNC: &str = "deployment sync";
pub const OBJECT_STORAGE: &str = "object storage";
pub const OBSERVABILITY: &str = "observability";

/// The collaborator clients available to this process
#[derive(Clone, Default)]
pub struct Collaborators {
    source_control: Option<Arc<dyn SourceControl>>,
    deployment: Option<Arc<dyn DeploymentSync>>,
    object_storage: Option<Arc<dyn ObjectStorage>>,
    observability: Option<Arc<dyn ObservabilityRenderer>>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("source_control", &self.source_control.is_some())
            .field("deployment", &self.deployment.is_some())
            .field("object_storage", &self.object_storage.is_some())
            .field("observability", &self.observability.is_some())
            .finish()
    }
}

impl Collaborators {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source_control(mut self, client: Arc<dyn SourceControl>) -> Self {
        self.source_control = Some(client);
        self
    }

    pub fn with_deployment(mut self, client: Arc<dyn DeploymentSync>) -> Self {
        self.deployment = Some(client);
        self
    }

    pub fn with_object_storage(mut self, client: Arc<dyn ObjectStorage>) -> Self {
        self.object_storage = Some(client);
        self
    }

    pub fn with_observability(mut self, client: Arc<dyn ObservabilityRenderer>) -> Self {
        self.observability = Some(client);
        self
    }

    pub fn source_control(&self) -> Result<&Arc<dyn SourceControl>> {
        self.source_control
            .as_ref()
            .ok_or_else(|| OrchestratorError::not_configured(SOURCE_CONTROL))
    }

    pub fn deployment(&self) -> Result<&Arc<dyn DeploymentSync>> {
        self.deployment
            .as_ref()
            .ok_or_else(|| OrchestratorError::not_configured(DEPLOYMENT_SYNC))
    }

    pub fn object_storage(&self) -> Result<&Arc<dyn ObjectStorage>> {
        self.object_storage
            .as_ref()
            .ok_or_else(|| OrchestratorError::not_configured(OBJECT_STORAGE))
    }

    pub fn observability(&self) -> Result<&Arc<dyn ObservabilityRenderer>> {
        self.observability
            .as_ref()
            .ok_or_else(|| OrchestratorError::not_configured(OBSERVABILITY))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_collaborator_is_not_configured() {
        let collaborators = Collaborators::new();
        let err = collaborators.deployment().err().unwrap();
        assert_eq!(err.code(), "COLLABORATOR_NOT_CONFIGURED");
        assert_eq!(err.details.unwrap()["service"], DEPLOYMENT_SYNC);
    }
}
