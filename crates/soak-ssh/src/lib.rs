mod ssh_shell;

pub use ssh_shell::{SshSession, SshShell};
