pub mod config;
pub mod error;
pub mod instance;
pub mod job;
pub mod keys;
pub mod orchestrator;
pub mod provisioner;
pub mod remote;
pub mod report;
pub mod session;

pub use config::{AwsSettings, Config, ConfigOverrides, ConfigSource, Credentials, Provider, Secret};
pub use error::SoakError;
pub use instance::{Instance, InstanceSet, InstanceState, LaunchSpec};
pub use job::{CommandOutput, JobKind, JobResult};
pub use keys::{GeneratedKey, KeyMaterial};
pub use orchestrator::Orchestrator;
pub use provisioner::Provisioner;
pub use remote::RemoteShell;
pub use report::{HostReport, RunReport};
pub use session::SessionId;
