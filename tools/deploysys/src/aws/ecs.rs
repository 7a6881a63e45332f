//! ECS implementation of the orchestrator boundary.

use crate::definition::{self, ContainerDefinition, ContainerDefinitions};
use crate::orchestrator::{error, Orchestrator, Result, ServiceUpdate};
use async_trait::async_trait;
use aws_sdk_ecs::error::{BuildError, ProvideErrorMetadata, SdkError};
use aws_sdk_ecs::types::{
    self, ContainerCondition, KeyValuePair, LogDriver, TransportProtocol, UlimitName,
};
use aws_smithy_types::error::display::DisplayErrorContext;
use aws_types::SdkConfig;
use log::{debug, trace};
use snafu::OptionExt;
use std::collections::HashMap;

const REGISTER_TASK_DEFINITION: &str = "RegisterTaskDefinition";
const UPDATE_SERVICE: &str = "UpdateService";

// Service error codes that mean the caller couldn't be authenticated or authorized, rather than
// that the request itself was refused.
const AUTH_ERROR_CODES: &[&str] = &[
    "AccessDeniedException",
    "ExpiredTokenException",
    "InvalidClientTokenId",
    "InvalidSignatureException",
    "UnrecognizedClientException",
];

pub(crate) struct EcsOrchestrator {
    client: aws_sdk_ecs::Client,
}

impl EcsOrchestrator {
    pub(crate) fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ecs::Client::new(config),
        }
    }
}

#[async_trait]
impl Orchestrator for EcsOrchestrator {
    async fn register_task_definition(
        &self,
        family: &str,
        definitions: &ContainerDefinitions,
    ) -> Result<String> {
        let containers = definitions
            .iter()
            .map(container_definition)
            .collect::<Result<Vec<_>>>()?;
        trace!("Container definitions for {}: {:?}", family, containers);

        let response = self
            .client
            .register_task_definition()
            .family(family)
            .set_container_definitions(Some(containers))
            .send()
            .await
            .map_err(|e| classify(REGISTER_TASK_DEFINITION, e))?;

        response
            .task_definition()
            .and_then(|task_definition| task_definition.task_definition_arn())
            .map(str::to_string)
            .context(error::MissingFieldSnafu {
                operation: REGISTER_TASK_DEFINITION,
                field: "taskDefinition.taskDefinitionArn",
            })
    }

    async fn update_service(&self, update: &ServiceUpdate) -> Result<()> {
        let response = self
            .client
            .update_service()
            .cluster(&update.cluster)
            .service(&update.service)
            .desired_count(update.desired_count)
            .task_definition(&update.task_definition_arn)
            .send()
            .await
            .map_err(|e| classify(UPDATE_SERVICE, e))?;

        if let Some(service) = response.service() {
            debug!(
                "Service {} now targets {}",
                service.service_arn().unwrap_or(update.service.as_str()),
                service.task_definition().unwrap_or("<missing>")
            );
        }
        Ok(())
    }
}

/// Maps a payload container onto the SDK's request type.  Empty lists are left unset.
fn container_definition(container: &ContainerDefinition) -> Result<types::ContainerDefinition> {
    let mut builder = types::ContainerDefinition::builder()
        .name(&container.name)
        .image(&container.image)
        .set_cpu(container.cpu)
        .set_memory(container.memory)
        .set_memory_reservation(container.memory_reservation)
        .set_essential(container.essential)
        .set_working_directory(container.working_directory.clone())
        .set_hostname(container.hostname.clone())
        .set_user(container.user.clone())
        .set_privileged(container.privileged)
        .set_readonly_root_filesystem(container.readonly_root_filesystem)
        .set_start_timeout(container.start_timeout)
        .set_stop_timeout(container.stop_timeout);

    for mapping in &container.port_mappings {
        builder = builder.port_mappings(
            types::PortMapping::builder()
                .container_port(i32::from(mapping.container_port))
                .set_host_port(mapping.host_port.map(i32::from))
                .set_protocol(
                    mapping
                        .protocol
                        .map(|protocol| TransportProtocol::from(protocol.as_str())),
                )
                .build(),
        );
    }
    for variable in &container.environment {
        builder = builder.environment(
            KeyValuePair::builder()
                .name(&variable.name)
                .value(&variable.value)
                .build(),
        );
    }
    for arg in &container.command {
        builder = builder.command(arg);
    }
    for arg in &container.entry_point {
        builder = builder.entry_point(arg);
    }
    for link in &container.links {
        builder = builder.links(link);
    }
    if let Some(log_configuration) = &container.log_configuration {
        builder = builder.log_configuration(log_config(log_configuration)?);
    }
    for mount_point in &container.mount_points {
        builder = builder.mount_points(
            types::MountPoint::builder()
                .set_source_volume(mount_point.source_volume.clone())
                .set_container_path(mount_point.container_path.clone())
                .set_read_only(mount_point.read_only)
                .build(),
        );
    }
    for volume in &container.volumes_from {
        builder = builder.volumes_from(
            types::VolumeFrom::builder()
                .set_source_container(volume.source_container.clone())
                .set_read_only(volume.read_only)
                .build(),
        );
    }
    for secret in &container.secrets {
        builder = builder.secrets(secret_ref(secret)?);
    }
    if let Some(health_check) = &container.health_check {
        let mut health = types::HealthCheck::builder()
            .set_interval(health_check.interval)
            .set_timeout(health_check.timeout)
            .set_retries(health_check.retries)
            .set_start_period(health_check.start_period);
        for arg in &health_check.command {
            health = health.command(arg);
        }
        builder = builder.health_check(health.build().map_err(invalid_request)?);
    }
    for (key, value) in &container.docker_labels {
        builder = builder.docker_labels(key, value);
    }
    for ulimit in &container.ulimits {
        builder = builder.ulimits(
            types::Ulimit::builder()
                .name(UlimitName::from(ulimit.name.as_str()))
                .soft_limit(ulimit.soft_limit)
                .hard_limit(ulimit.hard_limit)
                .build()
                .map_err(invalid_request)?,
        );
    }
    for dependency in &container.depends_on {
        builder = builder.depends_on(
            types::ContainerDependency::builder()
                .container_name(&dependency.container_name)
                .condition(ContainerCondition::from(dependency.condition.as_str()))
                .build()
                .map_err(invalid_request)?,
        );
    }

    Ok(builder.build())
}

fn secret_ref(secret: &definition::Secret) -> Result<types::Secret> {
    types::Secret::builder()
        .name(&secret.name)
        .value_from(&secret.value_from)
        .build()
        .map_err(invalid_request)
}

fn log_config(log_configuration: &definition::LogConfiguration) -> Result<types::LogConfiguration> {
    let options = if log_configuration.options.is_empty() {
        None
    } else {
        Some(
            log_configuration
                .options
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<HashMap<_, _>>(),
        )
    };
    let secret_options = log_configuration
        .secret_options
        .iter()
        .map(secret_ref)
        .collect::<Result<Vec<_>>>()?;
    types::LogConfiguration::builder()
        .log_driver(LogDriver::from(log_configuration.log_driver.as_str()))
        .set_options(options)
        .set_secret_options(if secret_options.is_empty() {
            None
        } else {
            Some(secret_options)
        })
        .build()
        .map_err(invalid_request)
}

/// Builders for types with required members fail only if one of them was never set.
fn invalid_request(e: BuildError) -> crate::orchestrator::Error {
    error::InvalidRequestSnafu {
        operation: REGISTER_TASK_DEFINITION,
        message: e.to_string(),
    }
    .build()
}

/// Sorts an SDK failure into a rejection or a transport problem.
fn classify<E, R>(operation: &'static str, err: SdkError<E, R>) -> crate::orchestrator::Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = DisplayErrorContext(&err).to_string();
    match err.as_service_error() {
        Some(service_error) => classify_code(
            operation,
            service_error.code().unwrap_or("Unknown"),
            service_error.message().unwrap_or(&detail),
        ),
        None => error::TransportSnafu {
            operation,
            message: detail,
        }
        .build(),
    }
}

fn classify_code(operation: &'static str, code: &str, message: &str) -> crate::orchestrator::Error {
    if AUTH_ERROR_CODES.contains(&code) {
        error::TransportSnafu {
            operation,
            message: format!("{}: {}", code, message),
        }
        .build()
    } else {
        error::RemoteRejectionSnafu {
            operation,
            code,
            message,
        }
        .build()
    }
}
