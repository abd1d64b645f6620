use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use soak_core::config::{ConfigOverrides, ConfigSource};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod dispatch;

#[derive(Parser)]
#[command(name = "soak-test")]
#[command(about = "Provision cloud hosts and run agent soak jobs on them", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision instances, bootstrap them and run the soak jobs
    Run {
        #[command(flatten)]
        overrides: OverrideArgs,

        /// Write the run report as JSON
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Validate the config and print a redacted summary
    Check {
        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Show or initialize the config file
    Config {
        /// Print the default config path
        #[arg(long)]
        path: bool,

        /// Write a sample config
        #[arg(long)]
        init: bool,
    },
}

#[derive(Args, Default)]
struct OverrideArgs {
    /// Key pair name to create
    #[arg(long)]
    key_name: Option<String>,

    /// Provider region
    #[arg(long)]
    region: Option<String>,

    #[arg(long, env = "AWS_ACCESS_KEY_ID", hide_env_values = true)]
    access_key: Option<String>,

    #[arg(long, env = "AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    secret_access_key: Option<String>,

    /// Seconds to wait for instances before connecting
    #[arg(long)]
    wait: Option<u64>,

    /// Leave instances and key pair in place
    #[arg(long)]
    no_terminate: bool,

    /// Job to run (repeatable, replaces the configured list)
    #[arg(short, long = "job")]
    jobs: Vec<String>,
}

impl From<OverrideArgs> for ConfigOverrides {
    fn from(args: OverrideArgs) -> Self {
        ConfigOverrides {
            key_name: args.key_name,
            region: args.region,
            access_key: args.access_key,
            secret_access_key: args.secret_access_key,
            instance_wait_time: args.wait,
            no_terminate: args.no_terminate,
            jobs: args.jobs,
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .init();
}

fn source(path: Option<PathBuf>, overrides: OverrideArgs) -> ConfigSource {
    ConfigSource::new(path.unwrap_or_else(ConfigSource::default_path))
        .with_overrides(overrides.into())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    use Commands::*;

    match cli.command {
        Run { overrides, report } => {
            let source = source(cli.config, overrides);
            commands::run::run(&source, report.as_deref()).await?;
        }
        Check { overrides } => {
            let source = source(cli.config, overrides);
            commands::check::run(&source)?;
        }
        Config { path, init } => {
            let target = cli.config.unwrap_or_else(ConfigSource::default_path);
            commands::config::run(&target, path, init)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn repeated_jobs_replace_config_list() {
        let cli = Cli::try_parse_from([
            "soak-test", "run", "--job", "build", "-j", "test", "--no-terminate", "--wait", "0",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { overrides, report } => {
                let overrides: ConfigOverrides = overrides.into();
                assert_eq!(overrides.jobs, vec!["build", "test"]);
                assert!(overrides.no_terminate);
                assert_eq!(overrides.instance_wait_time, Some(0));
                assert!(report.is_none());
            }
            _ => panic!("expected run"),
        }
    }
}
