use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use voipdiag::cli::{self, Command};
use voipdiag::config::Config;
use voipdiag::diagnostics::Diagnostics;
use voipdiag::health::{self, MonitorMetrics};
use voipdiag::scheduler::{run_scheduler, CycleOutcome, QosMonitor};
use voipdiag::store::{MemoryStore, MetricsStore};

#[tokio::main]
async fn main() -> Result<()> {
    let args = match cli::parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}\n", e);
            cli::print_help();
            std::process::exit(2);
        }
    };

    if args.help {
        cli::print_help();
        return Ok(());
    }

    // Initialize logging
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("voipdiag=info".parse()?),
        )
        .init();

    info!("voipdiag v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  AMI: {}:{} as {}", config.ami_host, config.ami_port, voipdiag::redact::principal(&config.ami_username));
    info!("  QoS reference target: {}", config.qos_reference_target);
    info!("  Monitor interval: {}s", config.monitor_interval_secs);
    info!("  Call records: {}", config.cdr_path.display());

    // Handle --validate mode
    if args.validate {
        info!("Validating configuration...");
        match config.validate() {
            Ok(()) => {
                info!("Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("{}", e);
                std::process::exit(1);
            }
        }
    }

    let store: Arc<dyn MetricsStore> = Arc::new(MemoryStore::new());
    let diagnostics = Arc::new(Diagnostics::from_config(&config, store.clone()));

    if let Some(command) = args.command {
        let outcome = run_one_shot(&diagnostics, &command).await;
        diagnostics.shutdown().await;
        return outcome;
    }

    config.validate()?;
    let monitor = Arc::new(QosMonitor::from_config(&config, diagnostics.ami().clone(), store));
    let metrics = Arc::new(MonitorMetrics::new());

    if !diagnostics.ami().connect().await {
        warn!("AMI unavailable at startup, cycles will be skipped until it answers");
    }

    if args.once {
        info!("Running single monitor cycle (--once mode)");
        run_cycle(&monitor, &diagnostics, &metrics).await;
        diagnostics.shutdown().await;
        return Ok(());
    }

    let cancel = CancellationToken::new();

    // Start health check server if configured
    if let Some(port) = config.health_port {
        let metrics = metrics.clone();
        let traffic = diagnostics.traffic().clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            health::run_health_server(port, metrics, Some(traffic), cancel).await;
        });
    }

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                return;
            }
            info!("Received shutdown signal, stopping...");
            cancel.cancel();
        });
    }

    run_scheduler(config.monitor_interval(), cancel.clone(), || {
        let monitor = monitor.clone();
        let diagnostics = diagnostics.clone();
        let metrics = metrics.clone();
        async move {
            run_cycle(&monitor, &diagnostics, &metrics).await;
        }
    })
    .await;

    cancel.cancel();
    diagnostics.shutdown().await;
    Ok(())
}

async fn run_one_shot(diagnostics: &Diagnostics, command: &Command) -> Result<()> {
    let principal = cli::current_principal();
    let value = cli::run_command(diagnostics, command, &principal).await?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

async fn run_cycle(monitor: &QosMonitor, diagnostics: &Diagnostics, metrics: &MonitorMetrics) {
    match monitor.run_cycle().await {
        Ok(outcome) => {
            metrics.record_outcome(&outcome);
            if outcome == CycleOutcome::Skipped && !diagnostics.ami().connect().await {
                warn!("AMI still unavailable");
            }
        }
        Err(e) => {
            error!("Monitor cycle failed: {:#}", e);
            metrics.record_failure();
        }
    }
}
