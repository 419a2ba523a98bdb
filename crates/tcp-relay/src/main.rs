mod cli;
mod config;
mod journal;
mod rules;
mod shell;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;
use tracing::{info, warn};

use audit_log::AuditSink;

use crate::cli::Cli;
use crate::config::Config;
use crate::rules::RuleTable;
use crate::shell::Shell;

/// How long runtime shutdown waits for blocking workers, such as a stdin
/// read that will never complete, before abandoning them.
const RUNTIME_SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(RUNTIME_SHUTDOWN_GRACE);
    result
}

async fn run(cli: Cli) -> Result<()> {
    // 2. Load config, then merge CLI overrides.
    let loaded = config::load(&cli.config)?;
    let config_found = loaded.is_some();
    let mut cfg = loaded.unwrap_or_default();
    cfg.merge_cli(&cli);
    let settings = cfg.rule_settings()?;

    // 3. Init tracing-subscriber with JSON format on stderr; stdout belongs
    //    to the shell.
    init_tracing(&cfg);

    if !config_found {
        warn!(
            path = %cli.config.display(),
            "configuration file not found; using defaults"
        );
    }
    info!(
        config_file = %cli.config.display(),
        buffer_size = settings.buffer_size,
        idle_timeout_secs = settings.idle_timeout.as_secs(),
        bind_host = %settings.bind_host,
        journal = ?cfg.logging.journal_path,
        "tcp-relay starting"
    );

    // 4. Start the journal, if configured.
    let (journal, journal_task) = match &cfg.logging.journal_path {
        Some(path) => {
            let (sink, task) = AuditSink::start(path)
                .await
                .with_context(|| format!("failed to open journal {}", path.display()))?;
            (Some(sink), Some(task))
        }
        None => (None, None),
    };

    // 5. Run the operator shell until exit, end of input, or a signal.
    let mut rules = RuleTable::new(settings, journal.clone());
    let mut shell = Shell::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout());

    let outcome = tokio::select! {
        r = shell.run(&mut rules) => r.context("operator shell failed"),
        () = shutdown_signal() => Ok(()),
    };

    // 6. Stop every rule before the runtime goes away.
    info!(rules = rules.len(), "tcp-relay shutting down");
    rules.shutdown().await;
    drop(rules);

    // The writer finishes once the last sink clone is gone.
    drop(journal);
    if let Some(task) = journal_task {
        if let Err(err) = task.await {
            warn!(%err, "journal writer did not finish cleanly");
        }
    }

    outcome
}

fn init_tracing(cfg: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on ctrl-c or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(%err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    {
        let sigterm = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(err) => {
                    warn!(%err, "failed to register SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        tokio::select! {
            () = ctrl_c => info!("received SIGINT (ctrl-c)"),
            () = sigterm => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
        info!("received SIGINT (ctrl-c)");
    }
}
