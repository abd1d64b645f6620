use soak_aws::Ec2Provisioner;
use soak_core::config::{Config, Provider};
use soak_core::error::SoakError;
use soak_core::Orchestrator;
use soak_ssh::SshShell;
use tokio_util::sync::CancellationToken;

/// Resource type assumed when the provider has none to offer.
const DEFAULT_RESOURCE_TYPE: &str = "ec2";

/// Build the orchestrator for the configured provider.
///
/// Unsupported providers still get an orchestrator so the run is reported
/// the same way; it never calls the provisioner for them. `cancel` stops
/// both the orchestrator and any remote command in flight.
pub fn create_orchestrator(
    config: &Config,
    cancel: CancellationToken,
) -> Result<Orchestrator<Ec2Provisioner, SshShell>, SoakError> {
    let resource_type = match &config.provider {
        Provider::Aws(aws) => aws.resource_type.as_str(),
        Provider::Unsupported(_) => DEFAULT_RESOURCE_TYPE,
    };
    let provisioner = Ec2Provisioner::for_resource_type(resource_type)?;
    let shell = SshShell::new().with_cancellation(cancel.clone());
    Ok(Orchestrator::new(provisioner, shell).with_cancellation(cancel))
}
