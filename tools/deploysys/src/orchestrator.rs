//! The boundary between the deployment trigger and the container orchestration service.

use crate::definition::ContainerDefinitions;
use async_trait::async_trait;

/// The two calls a deployment makes against the orchestration service.
#[async_trait]
pub(crate) trait Orchestrator {
    /// Registers a new revision of `family` and returns its task definition ARN.
    async fn register_task_definition(
        &self,
        family: &str,
        definitions: &ContainerDefinitions,
    ) -> Result<String>;

    /// Points the service at a task definition.  The rollout itself happens remotely and is not
    /// awaited.
    async fn update_service(&self, update: &ServiceUpdate) -> Result<()>;
}

/// Everything `UpdateService` needs to roll a service forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ServiceUpdate {
    pub(crate) cluster: String,
    pub(crate) service: String,
    pub(crate) desired_count: i32,
    pub(crate) task_definition_arn: String,
}

pub(crate) mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub(crate) enum Error {
        #[snafu(display("Failed to build {} request: {}", operation, message))]
        InvalidRequest {
            operation: &'static str,
            message: String,
        },

        #[snafu(display("{} response did not include '{}'", operation, field))]
        MissingField {
            operation: &'static str,
            field: &'static str,
        },

        /// The service understood the request and refused it.
        #[snafu(display("{} was rejected by the service ({}): {}", operation, code, message))]
        RemoteRejection {
            operation: &'static str,
            code: String,
            message: String,
        },

        /// The request never got a usable answer, or the caller could not be authenticated.
        #[snafu(display("{} failed to reach the service: {}", operation, message))]
        Transport {
            operation: &'static str,
            message: String,
        },
    }
}
pub(crate) use error::Error;
pub(crate) type Result<T> = std::result::Result<T, error::Error>;
