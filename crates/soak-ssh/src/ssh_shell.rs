use soak_core::job::CommandOutput;
use soak_core::{KeyMaterial, RemoteShell, SessionId, SoakError};
use ssh2::{HashType, Session};
use std::io::{ErrorKind, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 22;
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// SSH remote shell: public key auth with the run's private key file,
/// SFTP upload, and command execution with both output streams drained
/// together. Every libssh2 call runs on the blocking thread pool.
#[derive(Debug, Clone)]
pub struct SshShell {
    port: u16,
    connect_timeout: Duration,
    cancel: CancellationToken,
}

/// An open SSH connection to one host.
pub struct SshSession {
    id: SessionId,
    host: String,
    inner: Option<Session>,
}

impl SshSession {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn take(&mut self) -> Result<Session, SoakError> {
        self.inner
            .take()
            .ok_or_else(|| SoakError::Command(format!("session to {} is closed", self.host)))
    }
}

impl SshShell {
    pub fn new() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Token that stops a running remote command and closes its channel.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteShell for SshShell {
    type Session = SshSession;

    async fn connect(
        &self,
        host: &str,
        username: &str,
        key: &KeyMaterial,
    ) -> Result<SshSession, SoakError> {
        let target = host.to_string();
        let user = username.to_string();
        let key_path = key.path.clone();
        let port = self.port;
        let timeout = self.connect_timeout;

        let sess = tokio::task::spawn_blocking(move || {
            open_session(&target, port, &user, &key_path, timeout)
        })
        .await
        .map_err(|e| SoakError::Connect(format!("connect task failed: {}", e)))??;

        let id = SessionId::new();
        info!(host, session = %id, "SSH connected to {}@{}:{}", username, host, port);
        Ok(SshSession {
            id,
            host: host.to_string(),
            inner: Some(sess),
        })
    }

    fn session_id<'a>(&self, session: &'a SshSession) -> &'a SessionId {
        &session.id
    }

    async fn upload(
        &self,
        session: &mut SshSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), SoakError> {
        let sess = session.take()?;
        let local = local_path.to_path_buf();
        let remote = PathBuf::from(remote_path);

        let (sess, result) = tokio::task::spawn_blocking(move || {
            let result = sftp_put(&sess, &local, &remote);
            (sess, result)
        })
        .await
        .map_err(|e| SoakError::Transfer(format!("upload task failed: {}", e)))?;

        session.inner = Some(sess);
        result
    }

    async fn run(
        &self,
        session: &mut SshSession,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, SoakError> {
        let sess = session.take()?;
        let cmd = command.to_string();
        let cancel = self.cancel.clone();

        let (sess, result) = tokio::task::spawn_blocking(move || {
            let result = exec(&sess, &cmd, timeout, &cancel);
            (sess, result)
        })
        .await
        .map_err(|e| SoakError::Command(format!("exec task failed: {}", e)))?;

        session.inner = Some(sess);
        result
    }

    async fn close(&self, session: &mut SshSession) {
        let Some(sess) = session.inner.take() else {
            return;
        };
        let host = session.host.clone();
        let closed = tokio::task::spawn_blocking(move || {
            sess.disconnect(None, "soak run finished", None)
        })
        .await;
        match closed {
            Ok(Ok(())) => debug!(host = %host, session = %session.id, "SSH session closed"),
            Ok(Err(e)) => debug!(host = %host, "SSH disconnect: {}", e),
            Err(e) => warn!(host = %host, "SSH disconnect task failed: {}", e),
        }
    }
}

/// Establish an authenticated SSH session.
fn open_session(
    host: &str,
    port: u16,
    user: &str,
    key_path: &Path,
    timeout: Duration,
) -> Result<Session, SoakError> {
    debug!("Connecting to {}@{}:{}", user, host, port);
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| SoakError::Connect(format!("resolve {}: {}", host, e)))?
        .next()
        .ok_or_else(|| SoakError::Connect(format!("no address for {}", host)))?;
    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| SoakError::Connect(format!("TCP connect to {}:{}: {}", host, port, e)))?;

    let mut sess =
        Session::new().map_err(|e| SoakError::Connect(format!("Session::new: {}", e)))?;
    sess.set_tcp_stream(tcp);
    sess.handshake()
        .map_err(|e| SoakError::Connect(format!("Handshake with {}: {}", host, e)))?;

    // Trust on first use: the host was provisioned for this run and has no
    // recorded identity to check against.
    if let Some(hash) = sess.host_key_hash(HashType::Sha256) {
        info!(host, "Accepting host key SHA256:{}", fingerprint(hash));
    }

    sess.userauth_pubkey_file(user, None, key_path, None)
        .map_err(|e| SoakError::Connect(format!("Pubkey auth as {}: {}", user, e)))?;
    if !sess.authenticated() {
        return Err(SoakError::Connect("Authentication failed".into()));
    }
    Ok(sess)
}

fn sftp_put(sess: &Session, local: &Path, remote: &Path) -> Result<(), SoakError> {
    let mut src = std::fs::File::open(local)
        .map_err(|e| SoakError::Transfer(format!("open {}: {}", local.display(), e)))?;
    let sftp = sess
        .sftp()
        .map_err(|e| SoakError::Transfer(format!("SFTP subsystem: {}", e)))?;
    let mut dst = sftp
        .create(remote)
        .map_err(|e| SoakError::Transfer(format!("create {}: {}", remote.display(), e)))?;
    let bytes = std::io::copy(&mut src, &mut dst)
        .map_err(|e| SoakError::Transfer(format!("write {}: {}", remote.display(), e)))?;
    debug!("Uploaded {} bytes to {}", bytes, remote.display());
    Ok(())
}

/// Execute a command and collect both output streams.
fn exec(
    sess: &Session,
    cmd: &str,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, SoakError> {
    debug!("Remote exec: {}", cmd);
    let mut channel = sess
        .channel_session()
        .map_err(|e| SoakError::Command(format!("Channel: {}", e)))?;
    channel
        .exec(cmd)
        .map_err(|e| SoakError::Command(format!("Exec '{}': {}", cmd, e)))?;

    // Non-blocking so neither stream can fill its window while we wait on
    // the other.
    sess.set_blocking(false);
    let drained = drain(&mut channel, timeout, cancel, cmd);
    sess.set_blocking(true);

    let (stdout, stderr) = match drained {
        Ok(streams) => streams,
        Err(e) => {
            // Later commands reuse this session.
            if let Err(close) = channel.close() {
                debug!("Closing abandoned channel: {}", close);
            }
            return Err(e);
        }
    };

    channel.wait_close().ok();
    let exit_status = channel.exit_status().ok();
    if let Some(code) = exit_status.filter(|c| *c != 0) {
        debug!("Remote command exited with {}", code);
    }

    Ok(CommandOutput::from_streams(
        &String::from_utf8_lossy(&stdout),
        &String::from_utf8_lossy(&stderr),
        exit_status,
    ))
}

/// The two output streams of a running command.
trait CommandStreams {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn finished(&self) -> bool;
}

impl CommandStreams for ssh2::Channel {
    fn read_stdout(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.read(buf)
    }

    fn read_stderr(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.stderr().read(buf)
    }

    fn finished(&self) -> bool {
        self.eof()
    }
}

fn drain<C: CommandStreams>(
    channel: &mut C,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    cmd: &str,
) -> Result<(Vec<u8>, Vec<u8>), SoakError> {
    let started = Instant::now();
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        let mut progressed = read_available(|b| channel.read_stdout(b), &mut buf, &mut stdout)?;
        progressed |= read_available(|b| channel.read_stderr(b), &mut buf, &mut stderr)?;

        if progressed {
            continue;
        }
        if channel.finished() {
            break;
        }
        if cancel.is_cancelled() {
            return Err(SoakError::Cancelled);
        }
        if let Some(limit) = timeout {
            if started.elapsed() >= limit {
                return Err(SoakError::Timeout(format!(
                    "'{}' still running after {}s",
                    cmd,
                    limit.as_secs()
                )));
            }
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    Ok((stdout, stderr))
}

/// Read whatever is buffered right now. Returns whether anything was read.
fn read_available<F>(mut read: F, buf: &mut [u8], out: &mut Vec<u8>) -> Result<bool, SoakError>
where
    F: FnMut(&mut [u8]) -> std::io::Result<usize>,
{
    let mut progressed = false;
    loop {
        match read(buf) {
            Ok(0) => return Ok(progressed),
            Ok(n) => {
                out.extend_from_slice(&buf[..n]);
                progressed = true;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(progressed),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(SoakError::Command(format!("Read output: {}", e))),
        }
    }
}

fn fingerprint(hash: &[u8]) -> String {
    hash.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}
