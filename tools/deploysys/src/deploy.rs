//! The deploy module owns the 'deploy' and 'validate' subcommands: registering a new task
//! definition revision and rolling a service forward to it.

use crate::aws::{ecs::EcsOrchestrator, sdk_config};
use crate::config::{self, DeployConfig, DeploymentTarget, PayloadArgs, TargetArgs};
use crate::definition::ContainerDefinitions;
use crate::orchestrator::{Orchestrator, ServiceUpdate};
use crate::Args;
use clap::Parser;
use log::{info, trace, warn};
use serde::Serialize;
use snafu::ResultExt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Registers a task definition from local container definitions and points a service at it
#[derive(Debug, Parser)]
pub(crate) struct DeployArgs {
    #[command(flatten)]
    pub(crate) target: TargetArgs,

    /// If specified, save a JSON record of the deployment at this path
    #[arg(long)]
    pub(crate) output: Option<PathBuf>,
}

/// Checks container definitions without contacting ECS
#[derive(Debug, Parser)]
pub(crate) struct ValidateArgs {
    #[command(flatten)]
    payload: PayloadArgs,
}

/// What a successful run changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Deployment {
    pub(crate) region: String,
    #[serde(flatten)]
    pub(crate) target: DeploymentTarget,
    pub(crate) task_definition_arn: String,
}

/// Drives one deployment against an orchestrator.
pub(crate) struct DeploymentTrigger<O> {
    orchestrator: O,
    config: DeployConfig,
}

impl<O> DeploymentTrigger<O>
where
    O: Orchestrator,
{
    pub(crate) fn new(orchestrator: O, config: DeployConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Loads the container definitions, registers them, and updates the service with the
    /// returned ARN.  The payload is read before any request is made.  If the update fails the
    /// registered revision is left in place.
    pub(crate) async fn run(&self) -> Result<Deployment> {
        let definitions = ContainerDefinitions::from_path(&self.config.payload_path)
            .context(error::DefinitionsSnafu)?;
        info!(
            "Loaded {} container definition(s) from {}: {}",
            definitions.len(),
            self.config.payload_path.display(),
            definitions.names().join(", ")
        );

        let target = &self.config.target;
        info!(
            "Registering task definition family '{}' in {}",
            target.family, self.config.region
        );
        let task_definition_arn = self
            .orchestrator
            .register_task_definition(&target.family, &definitions)
            .await
            .context(error::RegisterSnafu {
                family: &target.family,
            })?;
        info!("Registered {}", task_definition_arn);

        let update = ServiceUpdate {
            cluster: target.cluster.clone(),
            service: target.service.clone(),
            desired_count: target.desired_count,
            task_definition_arn: task_definition_arn.clone(),
        };
        info!(
            "Updating service '{}' in cluster '{}' to {} with desired count {}",
            update.service, update.cluster, update.task_definition_arn, update.desired_count
        );
        if let Err(source) = self.orchestrator.update_service(&update).await {
            warn!(
                "{} was registered but service '{}' was not updated to use it",
                task_definition_arn, update.service
            );
            return Err(source).context(error::UpdateServiceSnafu {
                cluster: &update.cluster,
                service: &update.service,
                task_definition_arn: &task_definition_arn,
            });
        }
        info!(
            "Service '{}' is rolling out {}",
            update.service, task_definition_arn
        );

        Ok(Deployment {
            region: self.config.region.clone(),
            target: target.clone(),
            task_definition_arn,
        })
    }
}

/// Common entrypoint from main() for the 'deploy' subcommand
pub(crate) async fn run(args: &Args, deploy_args: &DeployArgs) -> Result<Deployment> {
    let config = DeployConfig::load(args.config_path.as_deref(), &deploy_args.target)
        .context(error::ConfigSnafu)?;
    trace!("Resolved deploy config: {:?}", config);

    let shared_config = sdk_config(&config.region, config.profile.as_deref()).await;
    let trigger = DeploymentTrigger::new(EcsOrchestrator::new(&shared_config), config);
    trigger.run().await
}

/// Saves the record of a finished deployment as pretty-printed JSON.
pub(crate) fn write_record(path: &Path, deployment: &Deployment) -> Result<()> {
    let file = File::create(path).context(error::FileCreateSnafu { path })?;
    serde_json::to_writer_pretty(file, deployment).context(error::SerializeSnafu { path })?;
    info!("Wrote deployment record to {}", path.display());
    Ok(())
}

/// Common entrypoint from main() for the 'validate' subcommand
pub(crate) fn validate(args: &Args, validate_args: &ValidateArgs) -> Result<()> {
    let path = config::load_payload_path(args.config_path.as_deref(), &validate_args.payload)
        .context(error::ConfigSnafu)?;
    let definitions = ContainerDefinitions::from_path(&path).context(error::DefinitionsSnafu)?;
    info!(
        "{} is valid: {} container(s): {}",
        path.display(),
        definitions.len(),
        definitions.names().join(", ")
    );
    Ok(())
}

mod error {
    use crate::{config, definition, orchestrator};
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Error reading config: {}", source))]
        Config { source: config::Error },

        #[snafu(display("{}", source))]
        Definitions { source: definition::Error },

        #[snafu(display("Failed to create file '{}': {}", path.display(), source))]
        FileCreate {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display(
            "Failed to register task definition family '{}': {}",
            family,
            source
        ))]
        Register {
            family: String,
            source: orchestrator::Error,
        },

        #[snafu(display("Failed to serialize output to '{}': {}", path.display(), source))]
        Serialize {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display(
            "Failed to update service '{}' in cluster '{}' to {} (the revision remains registered): {}",
            service,
            cluster,
            task_definition_arn,
            source
        ))]
        UpdateService {
            cluster: String,
            service: String,
            task_definition_arn: String,
            source: orchestrator::Error,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;
