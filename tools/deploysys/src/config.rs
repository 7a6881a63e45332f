//! The config module owns the definition and loading process for our configuration sources.
//!
//! Each setting is taken from the command line (or its environment variable), then from the
//! optional config file, then from the built-in default.

use clap::Args;
use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt, ResultExt};
use std::fs;
use std::path::{Path, PathBuf};

pub(crate) const DEFAULT_REGION: &str = "us-east-1";
pub(crate) const DEFAULT_FAMILY: &str = "opentraffic-datastore-prod";
pub(crate) const DEFAULT_CLUSTER: &str = "opentraffic-prod";
pub(crate) const DEFAULT_SERVICE: &str = "opentraffic-datastore";
pub(crate) const DEFAULT_DESIRED_COUNT: u32 = 1;
pub(crate) const DEFAULT_PAYLOAD_PATH: &str = "container-definitions.json";

// ECS limit on task definition family names.
const MAX_FAMILY_LEN: usize = 255;

/// Contents of the optional config file (Deploy.toml)
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub(crate) struct DeployFile {
    pub(crate) region: Option<String>,
    pub(crate) profile: Option<String>,
    pub(crate) family: Option<String>,
    pub(crate) cluster: Option<String>,
    pub(crate) service: Option<String>,
    pub(crate) desired_count: Option<u32>,
    pub(crate) payload_path: Option<PathBuf>,
}

impl DeployFile {
    /// Deserializes a DeployFile from a given path
    pub(crate) fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let deploy_file_str = fs::read_to_string(path).context(error::FileSnafu { path })?;
        toml::from_str(&deploy_file_str).context(error::InvalidTomlSnafu { path })
    }
}

/// Overrides accepted on the command line
#[derive(Debug, Default, Args)]
pub(crate) struct TargetArgs {
    /// AWS region to deploy in
    #[arg(long, env = "DEPLOYSYS_REGION")]
    pub(crate) region: Option<String>,

    /// AWS profile whose credentials are used
    #[arg(long, env = "DEPLOYSYS_PROFILE")]
    pub(crate) profile: Option<String>,

    /// Task definition family to register a new revision of
    #[arg(long, env = "DEPLOYSYS_FAMILY")]
    pub(crate) family: Option<String>,

    /// Cluster the service runs in
    #[arg(long, env = "DEPLOYSYS_CLUSTER")]
    pub(crate) cluster: Option<String>,

    /// Service to point at the new task definition
    #[arg(long, env = "DEPLOYSYS_SERVICE")]
    pub(crate) service: Option<String>,

    /// Number of tasks the service should run
    #[arg(long, env = "DEPLOYSYS_DESIRED_COUNT")]
    pub(crate) desired_count: Option<u32>,

    #[command(flatten)]
    pub(crate) payload: PayloadArgs,
}

#[derive(Debug, Default, Args)]
pub(crate) struct PayloadArgs {
    /// Path to the JSON container definitions
    #[arg(long, env = "DEPLOYSYS_PAYLOAD_PATH")]
    pub(crate) payload_path: Option<PathBuf>,
}

/// Where a new task definition is registered and which service adopts it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct DeploymentTarget {
    pub(crate) family: String,
    pub(crate) cluster: String,
    pub(crate) service: String,
    pub(crate) desired_count: i32,
}

/// Fully resolved settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DeployConfig {
    pub(crate) region: String,
    pub(crate) profile: Option<String>,
    pub(crate) target: DeploymentTarget,
    pub(crate) payload_path: PathBuf,
}

impl DeployConfig {
    /// Loads the config file, if one was given, and layers the command line over it.
    pub(crate) fn load(config_path: Option<&Path>, args: &TargetArgs) -> Result<Self> {
        let (file, base_dir) = match config_path {
            Some(path) => (DeployFile::from_path(path)?, path.parent()),
            None => (DeployFile::default(), None),
        };
        Self::resolve(args, file, base_dir)
    }

    /// Relative payload paths are taken from `base_dir`, the config file's directory, when
    /// there is one.
    pub(crate) fn resolve(
        args: &TargetArgs,
        file: DeployFile,
        base_dir: Option<&Path>,
    ) -> Result<Self> {
        let desired_count = args
            .desired_count
            .or(file.desired_count)
            .unwrap_or(DEFAULT_DESIRED_COUNT);
        let target = DeploymentTarget {
            family: pick(&args.family, file.family, DEFAULT_FAMILY),
            cluster: pick(&args.cluster, file.cluster, DEFAULT_CLUSTER),
            service: pick(&args.service, file.service, DEFAULT_SERVICE),
            desired_count: i32::try_from(desired_count)
                .ok()
                .context(error::DesiredCountSnafu { desired_count })?,
        };
        target.validate()?;

        Ok(Self {
            region: pick(&args.region, file.region, DEFAULT_REGION),
            profile: args.profile.clone().or(file.profile),
            target,
            payload_path: payload_path(&args.payload, file.payload_path, base_dir),
        })
    }
}

impl DeploymentTarget {
    fn validate(&self) -> Result<()> {
        ensure!(
            !self.family.is_empty()
                && self.family.len() <= MAX_FAMILY_LEN
                && self
                    .family
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            error::InvalidSnafu {
                field: "family",
                value: &self.family,
                reason: "must be 1-255 letters, numbers, hyphens or underscores",
            }
        );
        for (field, value) in [("cluster", &self.cluster), ("service", &self.service)] {
            ensure!(
                !value.is_empty(),
                error::InvalidSnafu {
                    field,
                    value,
                    reason: "must not be empty",
                }
            );
        }
        Ok(())
    }
}

/// Resolves the payload path alone, for commands that don't need a deployment target.
pub(crate) fn load_payload_path(config_path: Option<&Path>, args: &PayloadArgs) -> Result<PathBuf> {
    let (file, base_dir) = match config_path {
        Some(path) => (DeployFile::from_path(path)?, path.parent()),
        None => (DeployFile::default(), None),
    };
    Ok(payload_path(args, file.payload_path, base_dir))
}

fn payload_path(args: &PayloadArgs, from_file: Option<PathBuf>, base_dir: Option<&Path>) -> PathBuf {
    // A path given on the command line is taken as-is, relative to the working directory.
    if let Some(path) = &args.payload_path {
        return path.clone();
    }
    let path = from_file.unwrap_or_else(|| PathBuf::from(DEFAULT_PAYLOAD_PATH));
    match base_dir {
        Some(dir) if path.is_relative() => dir.join(path),
        _ => path,
    }
}

// Surrounding whitespace is dropped; names are sent to ECS exactly as they end up here.
fn pick(arg: &Option<String>, from_file: Option<String>, default: &str) -> String {
    arg.as_deref()
        .or(from_file.as_deref())
        .unwrap_or(default)
        .trim()
        .to_string()
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Desired count {} is too large", desired_count))]
        DesiredCount { desired_count: u32 },

        #[snafu(display("Failed to read '{}': {}", path.display(), source))]
        File {
            path: PathBuf,
            source: std::io::Error,
        },

        #[snafu(display("Invalid {} '{}': {}", field, value, reason))]
        Invalid {
            field: &'static str,
            value: String,
            reason: &'static str,
        },

        #[snafu(display("Invalid config file at '{}': {}", path.display(), source))]
        InvalidToml {
            path: PathBuf,
            source: toml::de::Error,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{
        DeployConfig, DeployFile, Error, PayloadArgs, TargetArgs, DEFAULT_CLUSTER,
        DEFAULT_FAMILY, DEFAULT_PAYLOAD_PATH, DEFAULT_REGION, DEFAULT_SERVICE,
    };
    use std::fs;
    use std::path::{Path, PathBuf};

    #[test]
    fn defaults() {
        let config = DeployConfig::resolve(&TargetArgs::default(), DeployFile::default(), None)
            .unwrap();
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.profile, None);
        assert_eq!(config.target.family, DEFAULT_FAMILY);
        assert_eq!(config.target.cluster, DEFAULT_CLUSTER);
        assert_eq!(config.target.service, DEFAULT_SERVICE);
        assert_eq!(config.target.desired_count, 1);
        assert_eq!(config.payload_path, PathBuf::from(DEFAULT_PAYLOAD_PATH));
    }

    #[test]
    fn args_override_file() {
        let args = TargetArgs {
            cluster: Some("staging".to_string()),
            desired_count: Some(3),
            ..Default::default()
        };
        let file = DeployFile {
            region: Some("us-west-2".to_string()),
            cluster: Some("prod".to_string()),
            desired_count: Some(2),
            ..Default::default()
        };
        let config = DeployConfig::resolve(&args, file, None).unwrap();
        assert_eq!(config.region, "us-west-2");
        assert_eq!(config.target.cluster, "staging");
        assert_eq!(config.target.desired_count, 3);
        assert_eq!(config.target.service, DEFAULT_SERVICE);
    }

    #[test]
    fn zero_desired_count_is_allowed() {
        let args = TargetArgs {
            desired_count: Some(0),
            ..Default::default()
        };
        let config = DeployConfig::resolve(&args, DeployFile::default(), None).unwrap();
        assert_eq!(config.target.desired_count, 0);
    }

    #[test]
    fn desired_count_must_fit() {
        let args = TargetArgs {
            desired_count: Some(u32::MAX),
            ..Default::default()
        };
        let result = DeployConfig::resolve(&args, DeployFile::default(), None);
        assert!(matches!(result, Err(Error::DesiredCount { .. })));
    }

    #[test]
    fn bad_family() {
        for family in ["", "has space", "slash/family"] {
            let args = TargetArgs {
                family: Some(family.to_string()),
                ..Default::default()
            };
            let result = DeployConfig::resolve(&args, DeployFile::default(), None);
            assert!(
                matches!(result, Err(Error::Invalid { field: "family", .. })),
                "{}",
                family
            );
        }
    }

    #[test]
    fn empty_service() {
        let args = TargetArgs {
            service: Some(" ".to_string()),
            ..Default::default()
        };
        let result = DeployConfig::resolve(&args, DeployFile::default(), None);
        assert!(matches!(result, Err(Error::Invalid { field: "service", .. })));
    }

    #[test]
    fn names_are_trimmed() {
        let args = TargetArgs {
            cluster: Some(" opentraffic-prod ".to_string()),
            ..Default::default()
        };
        let file = DeployFile {
            service: Some("opentraffic-datastore\n".to_string()),
            family: Some("  opentraffic-datastore-prod".to_string()),
            ..Default::default()
        };
        let config = DeployConfig::resolve(&args, file, None).unwrap();
        assert_eq!(config.target.cluster, "opentraffic-prod");
        assert_eq!(config.target.service, "opentraffic-datastore");
        assert_eq!(config.target.family, "opentraffic-datastore-prod");
    }

    #[test]
    fn payload_relative_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("Deploy.toml");
        fs::write(
            &config_path,
            r#"
region = "eu-west-1"
profile = "deployer"
family = "datastore-staging"
payload_path = "defs/staging.json"
"#,
        )
        .unwrap();

        let config = DeployConfig::load(Some(&config_path), &TargetArgs::default()).unwrap();
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.profile.as_deref(), Some("deployer"));
        assert_eq!(config.target.family, "datastore-staging");
        assert_eq!(config.payload_path, dir.path().join("defs/staging.json"));
    }

    #[test]
    fn default_payload_sits_next_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("Deploy.toml");
        fs::write(&config_path, "").unwrap();

        let config = DeployConfig::load(Some(&config_path), &TargetArgs::default()).unwrap();
        assert_eq!(config.payload_path, dir.path().join(DEFAULT_PAYLOAD_PATH));
    }

    #[test]
    fn payload_arg_is_not_rebased() {
        let args = TargetArgs {
            payload: PayloadArgs {
                payload_path: Some(PathBuf::from("local.json")),
            },
            ..Default::default()
        };
        let config =
            DeployConfig::resolve(&args, DeployFile::default(), Some(Path::new("/etc/deploy")))
                .unwrap();
        assert_eq!(config.payload_path, PathBuf::from("local.json"));
    }

    #[test]
    fn unknown_key_in_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("Deploy.toml");
        fs::write(&config_path, "clusters = \"typo\"\n").unwrap();

        let result = DeployConfig::load(Some(&config_path), &TargetArgs::default());
        assert!(matches!(result, Err(Error::InvalidToml { .. })));
    }

    #[test]
    fn missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            DeployConfig::load(Some(&dir.path().join("Deploy.toml")), &TargetArgs::default());
        assert!(matches!(result, Err(Error::File { .. })));
    }
}
