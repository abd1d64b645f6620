use crate::dispatch;
use anyhow::Context;
use soak_core::config::ConfigSource;
use soak_core::report::RunReport;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const INTERRUPTED_EXIT_CODE: i32 = 130;

pub async fn run(source: &ConfigSource, report_path: Option<&Path>) -> anyhow::Result<()> {
    let config = source
        .load()
        .with_context(|| format!("loading {}", source.path().display()))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, stopping the soak run (Ctrl-C again to exit now)");
        on_signal.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Interrupted twice, exiting without cleanup");
            std::process::exit(INTERRUPTED_EXIT_CODE);
        }
    });

    let orchestrator = dispatch::create_orchestrator(&config, cancel)?;
    let report = orchestrator.create_setup(&config).await;

    if let Some(path) = report_path {
        report
            .write_to(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    print_summary(&report);

    if !report.succeeded() {
        anyhow::bail!("soak run {} failed", report.run_id);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    println!("Run:        {}", report.run_id);
    println!("Provider:   {}", report.provider);
    println!("Instances:  {}", report.instance_ids.join(", "));
    for host in &report.hosts {
        let status = match &host.error {
            Some(e) => format!("failed ({})", e),
            None => format!("{} phases, {} warnings", host.jobs.len(), host.warnings()),
        };
        println!("  - {}: {}", host.hostname, status);
    }
    println!("Terminated: {}", report.terminated);
    for err in &report.teardown_errors {
        println!("  teardown: {}", err);
    }
    if let Some(err) = &report.error {
        println!("Error:      {}", err);
    }
    println!("Elapsed:    {:.2} minutes", report.elapsed_minutes());
}
