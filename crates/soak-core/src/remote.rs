use crate::error::SoakError;
use crate::job::CommandOutput;
use crate::keys::KeyMaterial;
use crate::session::SessionId;
use std::path::Path;
use std::time::Duration;

/// Remote shell transport: authenticated sessions, file upload and
/// command execution on a provisioned host.
#[async_trait::async_trait]
pub trait RemoteShell: Send + Sync {
    type Session: Send;

    /// Open an authenticated session using the private key file.
    /// Host keys are trusted on first use.
    async fn connect(
        &self,
        host: &str,
        username: &str,
        key: &KeyMaterial,
    ) -> Result<Self::Session, SoakError>;

    /// Identity of an open session.
    fn session_id<'a>(&self, session: &'a Self::Session) -> &'a SessionId;

    /// Copy a local file to `remote_path` (relative paths land in the
    /// login user's home directory).
    async fn upload(
        &self,
        session: &mut Self::Session,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SoakError>;

    /// Run a command to completion, draining stdout and stderr together.
    /// `None` waits indefinitely.
    async fn run(
        &self,
        session: &mut Self::Session,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SoakError>;

    /// Release the connection. Closing a closed session is a no-op.
    async fn close(&self, session: &mut Self::Session);
}
