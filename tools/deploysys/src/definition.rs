//! The definition module owns the container definition payload: the typed form of the JSON file
//! that is submitted when registering a task definition, and the checks applied to it before any
//! request is made.

use serde::Deserialize;
use snafu::{ensure, ResultExt};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// The ordered list of containers making up a task definition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub(crate) struct ContainerDefinitions(Vec<ContainerDefinition>);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ContainerDefinition {
    pub(crate) name: String,
    pub(crate) image: String,
    pub(crate) cpu: Option<i32>,
    /// Hard memory limit in MiB
    pub(crate) memory: Option<i32>,
    /// Soft memory limit in MiB
    pub(crate) memory_reservation: Option<i32>,
    pub(crate) essential: Option<bool>,
    #[serde(default)]
    pub(crate) port_mappings: Vec<PortMapping>,
    #[serde(default)]
    pub(crate) environment: Vec<EnvironmentVariable>,
    #[serde(default)]
    pub(crate) command: Vec<String>,
    #[serde(default)]
    pub(crate) entry_point: Vec<String>,
    pub(crate) working_directory: Option<String>,
    #[serde(default)]
    pub(crate) links: Vec<String>,
    pub(crate) log_configuration: Option<LogConfiguration>,
    #[serde(default)]
    pub(crate) mount_points: Vec<MountPoint>,
    #[serde(default)]
    pub(crate) volumes_from: Vec<VolumeFrom>,
    #[serde(default)]
    pub(crate) secrets: Vec<Secret>,
    pub(crate) health_check: Option<HealthCheck>,
    #[serde(default)]
    pub(crate) docker_labels: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) ulimits: Vec<Ulimit>,
    pub(crate) hostname: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) privileged: Option<bool>,
    pub(crate) readonly_root_filesystem: Option<bool>,
    #[serde(default)]
    pub(crate) depends_on: Vec<ContainerDependency>,
    /// Seconds to wait for dependencies before giving up on starting
    pub(crate) start_timeout: Option<i32>,
    /// Seconds to wait after SIGTERM before the container is killed
    pub(crate) stop_timeout: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct PortMapping {
    pub(crate) container_port: u16,
    pub(crate) host_port: Option<u16>,
    pub(crate) protocol: Option<Protocol>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Protocol {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct EnvironmentVariable {
    pub(crate) name: String,
    pub(crate) value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct LogConfiguration {
    pub(crate) log_driver: String,
    #[serde(default)]
    pub(crate) options: BTreeMap<String, String>,
    #[serde(default)]
    pub(crate) secret_options: Vec<Secret>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct MountPoint {
    pub(crate) source_volume: Option<String>,
    pub(crate) container_path: Option<String>,
    pub(crate) read_only: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct VolumeFrom {
    pub(crate) source_container: Option<String>,
    pub(crate) read_only: Option<bool>,
}

/// A value injected from Secrets Manager or SSM Parameter Store
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct Secret {
    pub(crate) name: String,
    pub(crate) value_from: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct HealthCheck {
    pub(crate) command: Vec<String>,
    pub(crate) interval: Option<i32>,
    pub(crate) timeout: Option<i32>,
    pub(crate) retries: Option<i32>,
    pub(crate) start_period: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct Ulimit {
    pub(crate) name: String,
    pub(crate) soft_limit: i32,
    pub(crate) hard_limit: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ContainerDependency {
    pub(crate) container_name: String,
    pub(crate) condition: DependencyCondition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub(crate) enum DependencyCondition {
    Start,
    Complete,
    Success,
    Healthy,
}

impl ContainerDefinitions {
    /// Reads the payload at `path` in full, parses it, and checks it.  The file is closed before
    /// this returns.
    pub(crate) fn from_path<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let payload = fs::read_to_string(path).context(error::ReadSnafu { path })?;
        let definitions: Self =
            serde_json::from_str(&payload).context(error::ParseSnafu { path })?;
        definitions.validate()?;
        Ok(definitions)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &ContainerDefinition> {
        self.0.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    pub(crate) fn names(&self) -> Vec<&str> {
        self.0.iter().map(|c| c.name.as_str()).collect()
    }

    /// Checks the constraints that serde's typing can't express.
    pub(crate) fn validate(&self) -> Result<()> {
        ensure!(!self.0.is_empty(), error::EmptySnafu);

        let mut seen = HashSet::new();
        for container in &self.0 {
            container.validate()?;
            ensure!(
                seen.insert(container.name.as_str()),
                error::DuplicateNameSnafu {
                    name: &container.name
                }
            );
        }
        Ok(())
    }
}

impl ContainerDefinition {
    fn validate(&self) -> Result<()> {
        let name = &self.name;
        ensure!(!name.trim().is_empty(), error::MissingFieldSnafu { field: "name" });
        ensure!(
            !self.image.trim().is_empty(),
            error::InvalidSnafu {
                name,
                reason: "image must not be empty",
            }
        );

        if let Some(cpu) = self.cpu {
            ensure!(
                cpu >= 0,
                error::InvalidSnafu {
                    name,
                    reason: format!("cpu must not be negative, got {}", cpu),
                }
            );
        }
        for (field, value) in [
            ("memory", self.memory),
            ("memoryReservation", self.memory_reservation),
        ] {
            if let Some(value) = value {
                ensure!(
                    value > 0,
                    error::InvalidSnafu {
                        name,
                        reason: format!("{} must be positive, got {}", field, value),
                    }
                );
            }
        }
        if let (Some(memory), Some(reservation)) = (self.memory, self.memory_reservation) {
            ensure!(
                reservation <= memory,
                error::InvalidSnafu {
                    name,
                    reason: format!(
                        "memoryReservation ({}) exceeds memory ({})",
                        reservation, memory
                    ),
                }
            );
        }

        for mapping in &self.port_mappings {
            ensure!(
                mapping.container_port != 0,
                error::InvalidSnafu {
                    name,
                    reason: "containerPort must not be 0",
                }
            );
        }
        for variable in &self.environment {
            ensure!(
                !variable.name.is_empty(),
                error::InvalidSnafu {
                    name,
                    reason: "environment variable names must not be empty",
                }
            );
        }
        if let Some(log_configuration) = &self.log_configuration {
            ensure!(
                !log_configuration.log_driver.is_empty(),
                error::InvalidSnafu {
                    name,
                    reason: "logDriver must not be empty",
                }
            );
        }
        Ok(())
    }
}

impl DependencyCondition {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            DependencyCondition::Start => "START",
            DependencyCondition::Complete => "COMPLETE",
            DependencyCondition::Success => "SUCCESS",
            DependencyCondition::Healthy => "HEALTHY",
        }
    }
}

impl Protocol {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
        }
    }
}

mod error {
    use snafu::Snafu;
    use std::path::PathBuf;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(super)))]
    pub(crate) enum Error {
        #[snafu(display("Container '{}' appears more than once", name))]
        DuplicateName { name: String },

        #[snafu(display("Container definitions must list at least one container"))]
        Empty,

        #[snafu(display("Invalid container '{}': {}", name, reason))]
        Invalid { name: String, reason: String },

        #[snafu(display("Container definition is missing '{}'", field))]
        MissingField { field: &'static str },

        #[snafu(display("Failed to parse container definitions {}: {}", path.display(), source))]
        Parse {
            path: PathBuf,
            source: serde_json::Error,
        },

        #[snafu(display("Failed to read container definitions {}: {}", path.display(), source))]
        Read {
            path: PathBuf,
            source: std::io::Error,
        },
    }
}
pub(crate) use error::Error;
type Result<T> = std::result::Result<T, error::Error>;

#[cfg(test)]
mod test {
    use super::{ContainerDefinitions, DependencyCondition, Error, Protocol};
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TWO_CONTAINERS: &str = r#"[
        {
            "name": "datastore",
            "image": "opentraffic/datastore:latest",
            "cpu": 512,
            "memory": 1024,
            "memoryReservation": 512,
            "essential": true,
            "portMappings": [{ "containerPort": 8003, "hostPort": 8003, "protocol": "tcp" }],
            "environment": [
                { "name": "POSTGRES_HOST", "value": "db.internal" },
                { "name": "POSTGRES_PORT", "value": "5432" }
            ],
            "logConfiguration": {
                "logDriver": "awslogs",
                "options": { "awslogs-group": "opentraffic-prod", "awslogs-region": "us-east-1" }
            }
        },
        {
            "name": "sidecar",
            "image": "busybox:1.36",
            "essential": false,
            "command": ["sh", "-c", "sleep infinity"]
        }
    ]"#;

    fn parse(json: &str) -> super::Result<ContainerDefinitions> {
        let definitions: ContainerDefinitions = serde_json::from_str(json).unwrap();
        definitions.validate()?;
        Ok(definitions)
    }

    #[test]
    fn loads_two_containers() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(TWO_CONTAINERS.as_bytes()).unwrap();

        let definitions = ContainerDefinitions::from_path(file.path()).unwrap();
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions.names(), vec!["datastore", "sidecar"]);

        let datastore = definitions.iter().next().unwrap();
        assert_eq!(datastore.memory, Some(1024));
        assert_eq!(datastore.port_mappings[0].protocol, Some(Protocol::Tcp));
        assert_eq!(datastore.environment.len(), 2);
        assert_eq!(
            datastore.log_configuration.as_ref().unwrap().options["awslogs-group"],
            "opentraffic-prod"
        );
    }

    #[test]
    fn loads_extended_keys() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(
            br#"[{
                "name": "datastore",
                "image": "opentraffic/datastore:latest",
                "hostname": "datastore",
                "user": "1000:1000",
                "privileged": false,
                "readonlyRootFilesystem": true,
                "startTimeout": 60,
                "stopTimeout": 30,
                "mountPoints": [{ "sourceVolume": "data", "containerPath": "/data", "readOnly": false }],
                "volumesFrom": [{ "sourceContainer": "config" }],
                "secrets": [{ "name": "POSTGRES_PASSWORD", "valueFrom": "arn:aws:ssm:us-east-1:123456789012:parameter/pg" }],
                "healthCheck": { "command": ["CMD-SHELL", "curl -f localhost:8003"], "interval": 30, "retries": 3 },
                "dockerLabels": { "team": "opentraffic" },
                "ulimits": [{ "name": "nofile", "softLimit": 4096, "hardLimit": 8192 }],
                "dependsOn": [{ "containerName": "config", "condition": "HEALTHY" }]
            }, {
                "name": "config",
                "image": "busybox:1.36",
                "essential": false
            }]"#,
        )
        .unwrap();

        let definitions = ContainerDefinitions::from_path(file.path()).unwrap();
        let datastore = definitions.iter().next().unwrap();
        assert_eq!(datastore.hostname.as_deref(), Some("datastore"));
        assert_eq!(datastore.readonly_root_filesystem, Some(true));
        assert_eq!(datastore.stop_timeout, Some(30));
        assert_eq!(datastore.mount_points[0].container_path.as_deref(), Some("/data"));
        assert_eq!(datastore.volumes_from.len(), 1);
        assert_eq!(datastore.secrets[0].name, "POSTGRES_PASSWORD");
        assert_eq!(datastore.health_check.as_ref().unwrap().retries, Some(3));
        assert_eq!(datastore.docker_labels["team"], "opentraffic");
        assert_eq!(datastore.ulimits[0].hard_limit, 8192);
        assert_eq!(
            datastore.depends_on[0].condition,
            DependencyCondition::Healthy
        );
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = ContainerDefinitions::from_path(dir.path().join("nope.json"));
        assert!(matches!(result, Err(Error::Read { .. })));
    }

    #[test]
    fn not_json() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"family: nope").unwrap();
        let result = ContainerDefinitions::from_path(file.path());
        assert!(matches!(result, Err(Error::Parse { .. })));
    }

    #[test]
    fn object_instead_of_array() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"name": "a", "image": "b"}"#).unwrap();
        let result = ContainerDefinitions::from_path(file.path());
        assert!(matches!(result, Err(Error::Parse { .. })));
    }

    #[test]
    fn unknown_field_is_rejected() {
        let result: Result<ContainerDefinitions, _> =
            serde_json::from_str(r#"[{"name": "a", "image": "b", "imag": "typo"}]"#);
        assert!(result.unwrap_err().to_string().contains("imag"));
    }

    #[test]
    fn bad_protocol_is_rejected() {
        let result: Result<ContainerDefinitions, _> = serde_json::from_str(
            r#"[{"name": "a", "image": "b", "portMappings": [{"containerPort": 80, "protocol": "sctp"}]}]"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_list() {
        assert!(matches!(parse("[]"), Err(Error::Empty)));
    }

    #[test]
    fn duplicate_names() {
        let result = parse(r#"[{"name": "a", "image": "b"}, {"name": "a", "image": "c"}]"#);
        assert!(matches!(result, Err(Error::DuplicateName { name }) if name == "a"));
    }

    #[test]
    fn blank_name() {
        let result = parse(r#"[{"name": " ", "image": "b"}]"#);
        assert!(matches!(result, Err(Error::MissingField { field: "name" })));
    }

    #[test]
    fn blank_image() {
        let result = parse(r#"[{"name": "a", "image": ""}]"#);
        assert!(matches!(result, Err(Error::Invalid { name, .. }) if name == "a"));
    }

    #[test]
    fn reservation_above_limit() {
        let result = parse(r#"[{"name": "a", "image": "b", "memory": 256, "memoryReservation": 512}]"#);
        assert!(matches!(result, Err(Error::Invalid { .. })));
    }

    #[test]
    fn non_positive_memory() {
        assert!(parse(r#"[{"name": "a", "image": "b", "memory": 0}]"#).is_err());
        assert!(parse(r#"[{"name": "a", "image": "b", "cpu": -1}]"#).is_err());
    }

    #[test]
    fn zero_container_port() {
        let result = parse(r#"[{"name": "a", "image": "b", "portMappings": [{"containerPort": 0}]}]"#);
        assert!(matches!(result, Err(Error::Invalid { .. })));
    }
}
