use crate::config::Credentials;
use crate::error::SoakError;
use crate::instance::{InstanceSet, LaunchSpec};
use crate::keys::{GeneratedKey, KeyMaterial};

/// Cloud provisioning backend. Every provider implements this.
///
/// The provider session is an explicit value returned by `open_session`
/// and passed back into every other call; implementations hold no
/// per-run state of their own.
#[async_trait::async_trait]
pub trait Provisioner: Send + Sync {
    type Session: Send + Sync;

    /// Provider name as used in the config ("aws").
    fn name(&self) -> &str;

    /// Create a credentialed session. Invalid credentials fail with `Auth`.
    async fn open_session(
        &self,
        credentials: &Credentials,
        region: &str,
    ) -> Result<Self::Session, SoakError>;

    /// Generate a key pair server-side and return its private half.
    /// An existing key pair with the same name fails with `Provision`.
    async fn create_key_pair(
        &self,
        session: &Self::Session,
        name: &str,
    ) -> Result<GeneratedKey, SoakError>;

    /// Launch the whole set in one call and return as soon as the provider
    /// has assigned identifiers. Members may still be pending.
    async fn launch_instances(
        &self,
        session: &Self::Session,
        spec: &LaunchSpec,
    ) -> Result<InstanceSet, SoakError>;

    /// Block until every member of the set is running. Gives up with
    /// `Timeout` after an internal bound.
    async fn wait_until_running(
        &self,
        session: &Self::Session,
        instances: &InstanceSet,
    ) -> Result<InstanceSet, SoakError>;

    /// Re-query the set by identifier and return public hostnames in the
    /// set's order.
    async fn resolve_hostnames(
        &self,
        session: &Self::Session,
        instances: &InstanceSet,
    ) -> Result<Vec<String>, SoakError>;

    /// Terminate every instance in the set. Instances that are already gone
    /// count as terminated; one failure does not stop the rest.
    async fn terminate(
        &self,
        session: &Self::Session,
        instances: &InstanceSet,
    ) -> Result<(), SoakError>;

    /// Remove the provider-side key pair registration. The local key file is
    /// left alone.
    async fn delete_key_pair(
        &self,
        session: &Self::Session,
        key: &KeyMaterial,
    ) -> Result<(), SoakError>;
}
