use thiserror::Error;

#[derive(Error, Debug)]
pub enum SoakError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported cloud provider: {0}")]
    UnsupportedProvider(String),

    #[error("Cloud authentication failed: {0}")]
    Auth(String),

    #[error("Provisioning failed: {0}")]
    Provision(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("SSH connection failed: {0}")]
    Connect(String),

    #[error("File transfer failed: {0}")]
    Transfer(String),

    #[error("Remote command failed: {0}")]
    Command(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SoakError {
    /// Whether this error should abort the remaining phases on a host.
    /// Command-level failures are recorded and the run moves on.
    pub fn is_host_fatal(&self) -> bool {
        !matches!(self, SoakError::Command(_) | SoakError::Timeout(_))
    }
}
