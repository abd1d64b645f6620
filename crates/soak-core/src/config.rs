use crate::error::SoakError;
use crate::instance::LaunchSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Provider key handled by the AWS provisioner.
pub const AWS_PROVIDER: &str = "aws";

/// Soak configuration as written on disk.
/// Loaded from ~/.config/soak/soak-config.yaml unless `--config` is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub cloud_provider: BTreeMap<String, serde_yaml::Value>,
    #[serde(default = "default_instance_wait_time")]
    pub instance_wait_time: u64,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default = "default_bootstrap_script")]
    pub bootstrap_script: PathBuf,
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    #[serde(default)]
    pub teardown_on_abort: bool,
}

/// The `cloud_provider.aws` block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfigFile {
    pub access_key: Secret,
    pub secret_access_key: Secret,
    pub region: String,
    #[serde(default = "default_resource_type")]
    pub resource_type: String,
    pub keypair: String,
    pub image_id: String,
    pub instance_type: String,
    #[serde(default = "default_volume_size")]
    pub volume_size: u32,
    #[serde(default = "default_count")]
    pub min: u32,
    #[serde(default = "default_count")]
    pub max: u32,
    pub username: String,
    #[serde(default)]
    pub terminate: bool,
    #[serde(default = "default_tags")]
    pub tags: BTreeMap<String, String>,
}

/// A credential field: either the literal value or the name of an
/// environment variable holding it.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Secret {
    Literal(String),
    Env { env: String },
}

impl Secret {
    /// Resolve to a concrete value. An unset or empty variable is an error,
    /// never an empty credential.
    pub fn resolve<F>(&self, field: &str, lookup: &F) -> Result<String, SoakError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            Secret::Literal(value) if value.is_empty() => {
                Err(SoakError::Config(format!("'{}' is empty", field)))
            }
            Secret::Literal(value) => Ok(value.clone()),
            Secret::Env { env } => match lookup(env) {
                Some(value) if !value.is_empty() => Ok(value),
                _ => Err(SoakError::Config(format!(
                    "'{}' references environment variable {} which is not set",
                    field, env
                ))),
            },
        }
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Secret::Literal(_) => write!(f, "Secret(<redacted>)"),
            Secret::Env { env } => write!(f, "Secret(env:{})", env),
        }
    }
}

/// Resolved cloud credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &redact(&self.access_key_id))
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

/// Keep the last four characters of an identifier for display.
pub fn redact(value: &str) -> String {
    let tail: String = value
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

/// Fully resolved AWS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsSettings {
    pub credentials: Credentials,
    pub region: String,
    pub resource_type: String,
    pub keypair: String,
    pub image_id: String,
    pub instance_type: String,
    pub volume_size: u32,
    pub min: u32,
    pub max: u32,
    pub username: String,
    pub terminate: bool,
    pub tags: BTreeMap<String, String>,
}

impl AwsSettings {
    /// Batch launch request for the configured instance set.
    pub fn launch_spec(&self) -> LaunchSpec {
        LaunchSpec {
            image_id: self.image_id.clone(),
            instance_type: self.instance_type.clone(),
            volume_size: self.volume_size,
            min_count: self.min,
            max_count: self.max,
            key_name: self.keypair.clone(),
            tags: self.tags.clone(),
            ..LaunchSpec::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    Aws(AwsSettings),
    Unsupported(String),
}

impl Provider {
    pub fn name(&self) -> &str {
        match self {
            Provider::Aws(_) => AWS_PROVIDER,
            Provider::Unsupported(name) => name,
        }
    }
}

/// Immutable configuration for one soak run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub provider: Provider,
    pub instance_wait_time: Duration,
    pub jobs: Vec<String>,
    pub bootstrap_script: PathBuf,
    pub command_timeout: Option<Duration>,
    pub teardown_on_abort: bool,
}

impl Config {
    /// AWS settings, if that provider is selected.
    pub fn aws(&self) -> Option<&AwsSettings> {
        match &self.provider {
            Provider::Aws(settings) => Some(settings),
            Provider::Unsupported(_) => None,
        }
    }
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub key_name: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_access_key: Option<String>,
    pub instance_wait_time: Option<u64>,
    pub no_terminate: bool,
    pub jobs: Vec<String>,
}

/// Reads a config file, applies overrides and resolves credentials.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    overrides: ConfigOverrides,
}

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            overrides: ConfigOverrides::default(),
        }
    }

    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("soak")
            .join("soak-config.yaml")
    }

    /// Load against the process environment.
    pub fn load(&self) -> Result<Config, SoakError> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Load, resolving `{ env: NAME }` references through `lookup`.
    pub fn load_with_env<F>(&self, lookup: F) -> Result<Config, SoakError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            SoakError::Config(format!("cannot read {}: {}", self.path.display(), e))
        })?;
        let file: ConfigFile = serde_yaml::from_str(&contents).map_err(|e| {
            SoakError::Config(format!("cannot parse {}: {}", self.path.display(), e))
        })?;
        let base_dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        file.resolve(&self.overrides, base_dir, &lookup)
    }
}

impl ConfigFile {
    /// Apply overrides and resolve into an immutable [`Config`].
    pub fn resolve<F>(
        self,
        overrides: &ConfigOverrides,
        base_dir: &Path,
        lookup: &F,
    ) -> Result<Config, SoakError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let selected = self
            .cloud_provider
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(AWS_PROVIDER))
            .map(|(_, value)| value);
        let provider = match selected {
            Some(value) => {
                let mut aws: AwsConfigFile = serde_yaml::from_value(value.clone())
                    .map_err(|e| SoakError::Config(format!("cloud_provider.aws: {}", e)))?;
                aws.apply(overrides);
                Provider::Aws(aws.resolve(lookup)?)
            }
            None if self.cloud_provider.is_empty() => {
                return Err(SoakError::Config("no cloud_provider configured".into()));
            }
            None => Provider::Unsupported(
                self.cloud_provider
                    .keys()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
        };

        let jobs = if overrides.jobs.is_empty() {
            self.jobs
        } else {
            overrides.jobs.clone()
        };
        if let Some(blank) = jobs.iter().position(|j| j.trim().is_empty()) {
            return Err(SoakError::Config(format!("jobs[{}] is empty", blank)));
        }

        let bootstrap_script = if self.bootstrap_script.is_absolute() {
            self.bootstrap_script
        } else {
            base_dir.join(self.bootstrap_script)
        };

        Ok(Config {
            provider,
            instance_wait_time: Duration::from_secs(
                overrides
                    .instance_wait_time
                    .unwrap_or(self.instance_wait_time),
            ),
            jobs,
            bootstrap_script,
            command_timeout: self
                .command_timeout_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            teardown_on_abort: self.teardown_on_abort,
        })
    }
}

impl AwsConfigFile {
    fn apply(&mut self, overrides: &ConfigOverrides) {
        if let Some(key_name) = &overrides.key_name {
            self.keypair = key_name.clone();
        }
        if let Some(region) = &overrides.region {
            self.region = region.clone();
        }
        if let Some(access_key) = &overrides.access_key {
            self.access_key = Secret::Literal(access_key.clone());
        }
        if let Some(secret) = &overrides.secret_access_key {
            self.secret_access_key = Secret::Literal(secret.clone());
        }
        if overrides.no_terminate {
            self.terminate = false;
        }
    }

    fn resolve<F>(self, lookup: &F) -> Result<AwsSettings, SoakError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credentials = Credentials {
            access_key_id: self.access_key.resolve("access_key", lookup)?,
            secret_access_key: self
                .secret_access_key
                .resolve("secret_access_key", lookup)?,
        };

        for (field, value) in [
            ("region", &self.region),
            ("keypair", &self.keypair),
            ("image_id", &self.image_id),
            ("instance_type", &self.instance_type),
            ("username", &self.username),
        ] {
            if value.trim().is_empty() {
                return Err(SoakError::Config(format!("cloud_provider.aws.{} is empty", field)));
            }
        }
        if self.min == 0 {
            return Err(SoakError::Config("cloud_provider.aws.min must be at least 1".into()));
        }
        if self.min > self.max {
            return Err(SoakError::Config(format!(
                "cloud_provider.aws.min ({}) exceeds max ({})",
                self.min, self.max
            )));
        }
        if self.volume_size == 0 {
            return Err(SoakError::Config("cloud_provider.aws.volume_size must be positive".into()));
        }

        Ok(AwsSettings {
            credentials,
            region: self.region,
            resource_type: self.resource_type,
            keypair: self.keypair,
            image_id: self.image_id,
            instance_type: self.instance_type,
            volume_size: self.volume_size,
            min: self.min,
            max: self.max,
            username: self.username,
            terminate: self.terminate,
            tags: self.tags,
        })
    }
}

fn default_instance_wait_time() -> u64 {
    120
}

fn default_bootstrap_script() -> PathBuf {
    PathBuf::from("soak-addon.sh")
}

fn default_resource_type() -> String {
    "ec2".to_string()
}

fn default_volume_size() -> u32 {
    20
}

fn default_count() -> u32 {
    1
}

fn default_tags() -> BTreeMap<String, String> {
    BTreeMap::from([("Name".to_string(), "signalfx-agent-soak".to_string())])
}
