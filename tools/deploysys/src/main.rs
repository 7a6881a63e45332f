/*!
`deploysys` rolls an ECS service forward to a new task definition.

Currently implemented:
* registering a new task definition revision from a local JSON file of container definitions
* updating a service in a cluster to run that revision at a given desired count
* validating container definitions without contacting ECS

The rollout that ECS starts after the update is not awaited, and nothing is rolled back: if the
update fails, the newly registered revision stays registered and is reported in the error.

Configuration comes from:
* command-line parameters, or the matching `DEPLOYSYS_*` environment variables
* an optional Deploy.toml, given with `--config-path`
* built-in defaults for the opentraffic datastore service
*/

mod aws;
mod config;
mod definition;
mod deploy;
mod orchestrator;

use clap::{Parser, Subcommand};
use simplelog::{CombinedLogger, Config as LogConfig, ConfigBuilder, LevelFilter, SimpleLogger};
use snafu::ResultExt;
use std::path::PathBuf;
use std::process;
use tokio::runtime::Builder;

fn run() -> Result<()> {
    // Parse and store the args passed to the program
    let args = Args::parse();

    // SimpleLogger will send errors to stderr and anything less to stdout.
    // The AWS SDK is chatty at INFO, so at that level we run a second logger that only passes
    // its warnings through.
    match args.log_level {
        LevelFilter::Info => {
            CombinedLogger::init(vec![
                SimpleLogger::new(
                    LevelFilter::Info,
                    ConfigBuilder::new()
                        .add_filter_ignore_str("aws_config")
                        .add_filter_ignore_str("aws_credential_types")
                        .add_filter_ignore_str("aws_sdk_ecs")
                        .add_filter_ignore_str("aws_smithy")
                        .add_filter_ignore_str("tracing::span")
                        .build(),
                ),
                SimpleLogger::new(
                    LevelFilter::Warn,
                    ConfigBuilder::new()
                        .add_filter_allow_str("aws_config")
                        .add_filter_allow_str("aws_credential_types")
                        .add_filter_allow_str("aws_sdk_ecs")
                        .add_filter_allow_str("aws_smithy")
                        .add_filter_allow_str("tracing::span")
                        .build(),
                ),
            ])
            .context(error::LoggerSnafu)?;
        }
        _ => {
            SimpleLogger::init(args.log_level, LogConfig::default()).context(error::LoggerSnafu)?
        }
    }

    match args.subcommand {
        SubCommands::Deploy(ref deploy_args) => {
            // Requests are strictly sequential, so a single-threaded runtime is enough.
            let rt = Builder::new_current_thread()
                .enable_all()
                .build()
                .context(error::RuntimeSnafu)?;
            let deployment = rt.block_on(async {
                deploy::run(&args, deploy_args)
                    .await
                    .context(error::DeploySnafu)
            })?;

            // The service has already been updated; a failure here only loses the record.
            if let Some(ref path) = deploy_args.output {
                deploy::write_record(path, &deployment).context(error::RecordSnafu {
                    task_definition_arn: &deployment.task_definition_arn,
                })?;
            }
            Ok(())
        }
        SubCommands::Validate(ref validate_args) => {
            deploy::validate(&args, validate_args).context(error::ValidateSnafu)
        }
    }
}

fn main() {
    if let Err(e) = run() {
        eprintln!("{}", e);
        process::exit(1);
    }
}

/// Deploys new task definitions to ECS services
#[derive(Debug, Parser)]
pub(crate) struct Args {
    #[arg(global = true, long, default_value = "INFO")]
    /// How much detail to log; from least to most: ERROR, WARN, INFO, DEBUG, TRACE
    log_level: LevelFilter,

    #[arg(long, env = "DEPLOYSYS_CONFIG_PATH")]
    /// Path to Deploy.toml (NOTE: must be specified before subcommand)
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    subcommand: SubCommands,
}

#[derive(Debug, Subcommand)]
enum SubCommands {
    Deploy(deploy::DeployArgs),
    Validate(deploy::ValidateArgs),
}

mod error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(super) enum Error {
        #[snafu(display("Failed to deploy: {}", source))]
        Deploy { source: crate::deploy::Error },

        #[snafu(display("Logger setup error: {}", source))]
        Logger { source: log::SetLoggerError },

        #[snafu(display(
            "Deployed {} but failed to write the deployment record: {}",
            task_definition_arn,
            source
        ))]
        Record {
            task_definition_arn: String,
            source: crate::deploy::Error,
        },

        #[snafu(display("Failed to create async runtime: {}", source))]
        Runtime { source: std::io::Error },

        #[snafu(display("Failed to validate container definitions: {}", source))]
        Validate { source: crate::deploy::Error },
    }
}
type Result<T> = std::result::Result<T, error::Error>;
