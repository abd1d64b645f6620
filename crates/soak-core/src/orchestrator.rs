use crate::config::{AwsSettings, Config, Provider};
use crate::error::SoakError;
use crate::instance::InstanceSet;
use crate::job::{job_command, JobKind, JobResult, BOOTSTRAP_PHASES, BOOTSTRAP_REMOTE_PATH};
use crate::keys::KeyMaterial;
use crate::provisioner::Provisioner;
use crate::remote::RemoteShell;
use crate::report::{HostReport, RunReport};
use chrono::Utc;
use std::future::Future;
use std::path::PathBuf;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Resources acquired so far in a run. Teardown releases whatever is set.
struct Acquired<S> {
    session: Option<S>,
    key: Option<KeyMaterial>,
    instances: Option<InstanceSet>,
}

impl<S> Default for Acquired<S> {
    fn default() -> Self {
        Self {
            session: None,
            key: None,
            instances: None,
        }
    }
}

/// Drives one soak run: provision, wait, bootstrap and run jobs on every
/// host in order, then optionally tear everything down.
pub struct Orchestrator<P, R> {
    provisioner: P,
    remote: R,
    key_dir: PathBuf,
    cancel: CancellationToken,
}

impl<P, R> Orchestrator<P, R>
where
    P: Provisioner,
    R: RemoteShell,
{
    pub fn new(provisioner: P, remote: R) -> Self {
        Self {
            provisioner,
            remote,
            key_dir: KeyMaterial::default_dir(),
            cancel: CancellationToken::new(),
        }
    }

    /// Directory the private key file is written to.
    pub fn with_key_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.key_dir = dir.into();
        self
    }

    /// Token that aborts the run at the next suspension point.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn provisioner(&self) -> &P {
        &self.provisioner
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Run the whole soak setup for `config`. Errors are reported in the
    /// returned [`RunReport`] rather than raised.
    pub async fn create_setup(&self, config: &Config) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(config.provider.name());

        let settings = match &config.provider {
            Provider::Aws(settings) => settings,
            Provider::Unsupported(name) => {
                let err = SoakError::UnsupportedProvider(name.clone());
                error!("Unknown cloud provider {} in soak config, exiting", name);
                report.error = Some(err.to_string());
                report.finish(started.elapsed());
                return report;
            }
        };

        let mut acquired = Acquired::default();
        let outcome = self
            .drive(config, settings, &mut acquired, &mut report)
            .await;

        let teardown = match &outcome {
            Ok(()) => settings.terminate,
            Err(e) => {
                error!("Soak run aborted: {}", e);
                report.error = Some(e.to_string());
                if config.teardown_on_abort {
                    info!("teardown_on_abort is set, releasing acquired resources");
                }
                config.teardown_on_abort
            }
        };

        if teardown {
            self.teardown(&acquired, &mut report).await;
        } else if let Some(key) = &acquired.key {
            info!(
                "Leaving instances running; connect with: ssh -i {} {}@<host>",
                key.path.display(),
                settings.username
            );
        }

        report.finish(started.elapsed());
        info!("Total time taken: {:.2} minutes", report.elapsed_minutes());
        report
    }

    async fn drive(
        &self,
        config: &Config,
        settings: &AwsSettings,
        acquired: &mut Acquired<P::Session>,
        report: &mut RunReport,
    ) -> Result<(), SoakError> {
        info!("Creating {} instances in {}", self.provisioner.name(), settings.region);
        let session = self
            .cancellable(
                self.provisioner
                    .open_session(&settings.credentials, &settings.region),
            )
            .await?;
        let session = acquired.session.insert(session);

        let generated = self
            .cancellable(self.provisioner.create_key_pair(session, &settings.keypair))
            .await?;
        acquired.key = Some(KeyMaterial {
            name: generated.name.clone(),
            path: KeyMaterial::path_for(&self.key_dir, &generated.name),
        });
        let key = KeyMaterial::persist(generated, &self.key_dir)?;
        info!("Pemfile location: {}", key.path.display());
        report.key_path = Some(key.path.clone());
        acquired.key = Some(key.clone());

        // Not cancellable: launched ids must land in `acquired`.
        let spec = settings.launch_spec();
        let launched = self.provisioner.launch_instances(session, &spec).await?;
        report.instance_ids = launched.ids();
        let launched = acquired.instances.insert(launched);

        info!("Waiting for instances {:?} to run", report.instance_ids);
        let running = self
            .cancellable(self.provisioner.wait_until_running(session, launched))
            .await?;
        let instances = acquired.instances.insert(running);

        info!("Fetching instance hostnames");
        let hostnames = self
            .cancellable(self.provisioner.resolve_hostnames(session, instances))
            .await?;
        report.hostnames = hostnames.clone();

        info!(
            "Created instances {:?}, waiting {}s for them to come up",
            report.instance_ids,
            config.instance_wait_time.as_secs()
        );
        self.cancellable(async {
            tokio::time::sleep(config.instance_wait_time).await;
            Ok(())
        })
        .await?;

        for host in &hostnames {
            let mut host_report = HostReport::new(host);
            let result = self
                .run_host(config, settings, &key, host, &mut host_report)
                .await;
            match result {
                Ok(()) => {}
                Err(SoakError::Cancelled) => {
                    report.hosts.push(host_report);
                    return Err(SoakError::Cancelled);
                }
                Err(e) => {
                    error!(host = %host, "Host aborted: {}", e);
                    host_report.error = Some(e.to_string());
                }
            }
            report.hosts.push(host_report);
        }

        Ok(())
    }

    /// Bootstrap one host, then run the configured jobs over a new session.
    async fn run_host(
        &self,
        config: &Config,
        settings: &AwsSettings,
        key: &KeyMaterial,
        host: &str,
        host_report: &mut HostReport,
    ) -> Result<(), SoakError> {
        // install/checkout may change the login environment, so jobs get a
        // fresh session that picks it up.
        let mut session = self
            .cancellable(self.remote.connect(host, &settings.username, key))
            .await?;
        debug!(host, session = %self.remote.session_id(&session), "Bootstrap session open");
        let bootstrap = self
            .bootstrap(config, host, &mut session, host_report)
            .await;
        self.remote.close(&mut session).await;
        bootstrap?;

        if config.jobs.is_empty() {
            debug!(host, "No jobs configured");
            return Ok(());
        }

        let mut session = self
            .cancellable(self.remote.connect(host, &settings.username, key))
            .await?;
        debug!(host, session = %self.remote.session_id(&session), "Job session open");
        let mut jobs = Ok(());
        for job in &config.jobs {
            if let Err(e) = self
                .run_phase(config, host, &mut session, job, JobKind::Job, host_report)
                .await
            {
                jobs = Err(e);
                break;
            }
        }
        self.remote.close(&mut session).await;
        jobs
    }

    async fn bootstrap(
        &self,
        config: &Config,
        host: &str,
        session: &mut R::Session,
        host_report: &mut HostReport,
    ) -> Result<(), SoakError> {
        self.cancellable(self.remote.upload(
            session,
            &config.bootstrap_script,
            BOOTSTRAP_REMOTE_PATH,
        ))
        .await?;
        info!(host, "{} file transfer completed", BOOTSTRAP_REMOTE_PATH);

        for phase in BOOTSTRAP_PHASES {
            self.run_phase(config, host, session, phase, JobKind::Bootstrap, host_report)
                .await?;
        }
        Ok(())
    }

    /// Run one phase or job. Command-level failures are recorded and
    /// swallowed; only host-fatal errors propagate.
    async fn run_phase(
        &self,
        config: &Config,
        host: &str,
        session: &mut R::Session,
        name: &str,
        kind: JobKind,
        host_report: &mut HostReport,
    ) -> Result<(), SoakError> {
        let command = job_command(name);
        info!(host, job = name, "Executing `{}` command", command);
        let started_at = Utc::now();

        let result = self
            .cancellable(self.remote.run(session, &command, config.command_timeout))
            .await;

        match result {
            Ok(output) => {
                for line in &output.stdout {
                    info!(host, job = name, "{}", line);
                }
                if !output.stderr.is_empty() {
                    warn!(host, job = name, "STDERR OF SSH");
                    for line in &output.stderr {
                        warn!(host, job = name, "{}", line);
                    }
                }
                host_report
                    .jobs
                    .push(JobResult::completed(host, name, kind, command, output, started_at));
                Ok(())
            }
            Err(e) if !e.is_host_fatal() => {
                warn!(host, job = name, "Command did not complete: {}", e);
                host_report.jobs.push(JobResult::failed(
                    host,
                    name,
                    kind,
                    command,
                    e.to_string(),
                    started_at,
                ));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Terminate instances, delete the key pair and the local key file.
    /// Each step runs even if an earlier one failed.
    async fn teardown(&self, acquired: &Acquired<P::Session>, report: &mut RunReport) {
        let Some(session) = &acquired.session else {
            return;
        };

        if let Some(instances) = &acquired.instances {
            info!("Terminating instances (ids: {:?})", instances.ids());
            if let Err(e) = self.provisioner.terminate(session, instances).await {
                error!("Instance termination incomplete: {}", e);
                report.teardown_errors.push(e.to_string());
            }
            report.terminated = true;
        }

        if let Some(key) = &acquired.key {
            info!("Removing key pair {}", key.name);
            if let Err(e) = self.provisioner.delete_key_pair(session, key).await {
                error!("Key pair deletion failed: {}", e);
                report.teardown_errors.push(e.to_string());
            }
            info!("Removing pem file (path: {})", key.path.display());
            if let Err(e) = key.remove_file() {
                error!("Pem file removal failed: {}", e);
                report.teardown_errors.push(e.to_string());
            }
        }
    }

    async fn cancellable<T, F>(&self, fut: F) -> Result<T, SoakError>
    where
        F: Future<Output = Result<T, SoakError>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(SoakError::Cancelled),
            result = fut => result,
        }
    }
}
