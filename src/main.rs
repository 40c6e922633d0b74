mod cache;
mod cgroup;
mod config;
mod delete;
mod errors;
mod logging;
mod metrics_server;
mod reconciler;
mod telemetry;

use std::sync::Arc;

use clap::Parser;
use dotenv::dotenv;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;
use slog::{error, info, Logger};
use tokio_util::sync::CancellationToken;

use config::Opts;
use errors::StartupError;

#[tokio::main]
async fn main() {
    dotenv().ok();

    let opts = Opts::parse();
    let (log, _guard) = logging::build_logger(&opts.logging_opts);

    info!(log, "starting up"; "version" => env!("CARGO_PKG_VERSION"));

    let code = match run(log.clone(), opts).await {
        Ok(()) => 0,
        Err(err) => {
            error!(log, "unrecoverable error"; "error" => %err);
            1
        }
    };

    info!(log, "exiting"; "code" => code);
    std::process::exit(code);
}

async fn run(log: Logger, opts: Opts) -> Result<(), StartupError> {
    let config = opts.args.resolve()?;

    let scanner = cgroup::Scanner::new(
        config.cgroup_root.clone(),
        log.new(slog::o!("component" => "scanner")),
    );
    scanner.validate_environment()?;

    let client = build_client(&config.kubeconfig_path).await?;

    let stop = CancellationToken::new();

    let cache = Arc::new(cache::PodCache::new(
        client.clone(),
        config.node_name.clone(),
        config.resync_period,
        log.new(slog::o!("component" => "cache")),
    ));

    let cache_handle = {
        let cache = cache.clone();
        let stop = stop.clone();
        tokio::spawn(async move { cache.start(stop).await })
    };

    if !cache.wait_for_initial_sync(stop.clone()).await {
        info!(log, "shut down before pod cache finished syncing");
        return Ok(());
    }

    let counters = Arc::new(telemetry::Counters::new());

    let terminator = delete::DeletionPath::new(
        client,
        cache.clone(),
        config.dry_run,
        config.node_name.clone(),
        config.agent_name.clone(),
        log.new(slog::o!("component" => "delete")),
        counters.clone(),
    );

    let reconciler = reconciler::Reconciler::new(
        scanner.clone(),
        cache.clone(),
        terminator,
        config.clone(),
        log.new(slog::o!("component" => "reconciler")),
    );
    reconciler.startup_scan();

    let metrics_handle = {
        let metrics_config = metrics_server::MetricsConfig {
            bind_address: config.metrics_bind_address,
            swap_threshold_percent: config.swap_threshold_percent,
            dry_run: config.dry_run,
        };
        let stop = stop.clone();
        let logger = log.new(slog::o!("component" => "metrics"));
        tokio::spawn(metrics_server::run(
            scanner,
            cache,
            counters,
            metrics_config,
            logger,
            stop,
        ))
    };

    let mut ticker = tokio::time::interval(config.poll_interval);
    loop {
        tokio::select! {
            _ = shutdown_signal() => {
                info!(log, "shutdown signal received");
                stop.cancel();
                break;
            }
            _ = stop.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let outcome = reconciler.tick().await;
                if !outcome.acted_on.is_empty() {
                    info!(log, "tick completed"; "acted_on" => outcome.acted_on.len(),
                        "skipped_unknown" => outcome.skipped_unknown,
                        "skipped_terminating" => outcome.skipped_terminating,
                        "skipped_protected" => outcome.skipped_protected);
                }
            }
        }
    }

    if let Ok(Err(err)) = metrics_handle.await {
        error!(log, "metrics server exited with an error"; "error" => %err);
    }
    match cache_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(log, "pod cache watch loop exited with an error"; "error" => %err),
        Err(err) => error!(log, "pod cache task panicked"; "error" => %err),
    }

    Ok(())
}

async fn build_client(kubeconfig_path: &Option<String>) -> Result<Client, StartupError> {
    match kubeconfig_path {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| StartupError::Config(format!("failed to read kubeconfig: {e}")))?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| StartupError::Config(format!("invalid kubeconfig: {e}")))?;
            Client::try_from(config).map_err(StartupError::Client)
        }
        None => Client::try_default().await.map_err(StartupError::Client),
    }
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
