// herakles-cluster-snapshot - version 0.1.0
// Cluster metric collectors and time-aligned snapshot aggregator
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use prometheus::Registry;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, level_filters::LevelFilter, warn};

use herakles_cluster_snapshot::{
    aggregator::Aggregator,
    cli::{Args, Commands},
    client::{AggregatorClient, HttpAggregatorClient},
    collector::{ClusterCollector, Collector, NodeCollector},
    commands,
    config::{self, Config, DEFAULT_BIND_ADDR, DEFAULT_PORT},
    handlers,
    health_stats::HealthStats,
    metrics::AggregatorMetrics,
    provider::{ClusterInfoProvider, LocalClusterInfo},
    service::SnapshotService,
    state::{AppState, SharedState},
    store::open_store,
};

/// Grace period for in-flight HTTPS requests on shutdown.
const TLS_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Initializes tracing logging subsystem with configured log level
fn setup_logging(config: &Config) -> anyhow::Result<()> {
    let log_level = match config.log_level.as_deref().unwrap_or("info") {
        "off" => LevelFilter::OFF,
        "error" => LevelFilter::ERROR,
        "warn" => LevelFilter::WARN,
        "debug" => LevelFilter::DEBUG,
        "trace" => LevelFilter::TRACE,
        _ => LevelFilter::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging initialized with level: {}", log_level);
    Ok(())
}

/// Cancels `cancel` on SIGINT or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
        _ = cancel.cancelled() => return,
    }
    cancel.cancel();
}

fn http_client(config: &Config) -> anyhow::Result<HttpAggregatorClient> {
    HttpAggregatorClient::new(config.aggregator_url(), config.request_timeout())
        .context("Failed to create aggregator client")
}

fn build_router(state: SharedState, config: &Config) -> Router {
    let mut app = Router::new()
        .route(
            "/queues/{name}",
            post(handlers::put_data_handler).get(handlers::get_data_handler),
        )
        .route(
            "/snapshots",
            get(handlers::get_snapshots_handler).delete(handlers::delete_snapshots_handler),
        )
        .route("/snapshots/average", get(handlers::average_snapshots_handler))
        .route("/doc", get(handlers::doc_handler));

    // Conditionally add telemetry and health endpoints
    if config.enable_telemetry.unwrap_or(true) {
        app = app.route("/metrics", get(handlers::metrics_handler));
    }
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(handlers::health_handler));
    }

    app.with_state(state)
}

/// Runs the aggregator loop and the HTTP server until shutdown.
async fn run_aggregator_server(
    config: Config,
    health: Arc<HealthStats>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("Starting herakles-cluster-snapshot aggregator");

    let bind_ip_str = config.bind.clone().unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let port = config.port.unwrap_or(DEFAULT_PORT);

    match &config.data_dir {
        Some(dir) => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create data_dir {}", dir.display()))?;
            info!("Queues are journaled under {}", dir.display());
        }
        None => warn!("No data_dir configured, queues are kept in memory"),
    }
    let store = open_store(config.data_dir.as_deref());

    let registry = Registry::new();
    let metrics = AggregatorMetrics::new(&registry)?;
    debug!("All metrics registered successfully");

    let provider: Arc<dyn ClusterInfoProvider> =
        Arc::new(LocalClusterInfo::new(config.local_cluster_config()?));
    let nodes = provider.list_nodes()?;
    info!("Aggregating {} node queues: {}", nodes.len(), nodes.join(", "));

    let config = Arc::new(config);
    let state = Arc::new(AppState {
        registry,
        metrics: metrics.clone(),
        service: SnapshotService::new(store.clone()),
        config: config.clone(),
        health_stats: health.clone(),
    });

    let aggregator = Aggregator::new(store, provider, config.interval_ms(), health)
        .with_metrics(metrics);
    let aggregator_cancel = cancel.clone();
    let aggregator_task = tokio::spawn(async move { aggregator.run(aggregator_cancel).await });

    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;
    let app = build_router(state, &config);

    let served = if config.enable_tls.unwrap_or(false) {
        serve_tls(app, addr, &config, cancel.clone()).await
    } else {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("listening on {addr}"))?;
        info!(
            "herakles-cluster-snapshot listening on http://{}:{}",
            bind_ip_str, port
        );
        let shutdown = cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server error")
    };

    // Stop the aggregator whatever ended the server
    cancel.cancel();
    let aggregated = aggregator_task.await.context("aggregator task panicked")?;

    served?;
    aggregated.context("aggregator failed")?;
    info!("herakles-cluster-snapshot stopped gracefully");
    Ok(())
}

async fn serve_tls(
    app: Router,
    addr: SocketAddr,
    config: &Config,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let (Some(cert), Some(key)) = (&config.tls_cert_path, &config.tls_key_path) else {
        anyhow::bail!("enable_tls requires tls_cert_path and tls_key_path");
    };
    let tls = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert, key)
        .await
        .context("Failed to load TLS certificate or key")?;

    let handle = axum_server::Handle::new();
    let shutdown = handle.clone();
    tokio::spawn(async move {
        cancel.cancelled().await;
        shutdown.graceful_shutdown(Some(TLS_SHUTDOWN_GRACE));
    });

    info!("herakles-cluster-snapshot listening on https://{}", addr);
    axum_server::bind_rustls(addr, tls)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .context("HTTPS server error")
}

async fn run_node_collector(
    config: &Config,
    node: Option<String>,
    health: Arc<HealthStats>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let mut cluster_cfg = config.local_cluster_config()?;
    if let Some(node) = node {
        cluster_cfg.node_name = node;
    }
    let node_name = cluster_cfg.node_name.clone();
    info!("Starting node collector for {}", node_name);

    let provider: Arc<dyn ClusterInfoProvider> = Arc::new(LocalClusterInfo::new(cluster_cfg));
    let client: Arc<dyn AggregatorClient> = Arc::new(http_client(config)?);
    let collector = Collector::new(
        NodeCollector::new(provider, node_name),
        client,
        config.interval_ms(),
        config.merge_options(),
        health,
    );
    collector.run(cancel).await.context("node collector failed")
}

async fn run_cluster_collector(
    config: &Config,
    health: Arc<HealthStats>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    info!("Starting cluster collector");
    let provider: Arc<dyn ClusterInfoProvider> =
        Arc::new(LocalClusterInfo::new(config.local_cluster_config()?));
    let client: Arc<dyn AggregatorClient> = Arc::new(http_client(config)?);
    let collector = Collector::new(
        ClusterCollector::new(provider),
        client,
        config.interval_ms(),
        config.merge_options(),
        health,
    );
    collector.run(cancel).await.context("cluster collector failed")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = config::resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = config::validate_effective_config(&config) {
                eprintln!("❌ Configuration invalid: {:#}", e);
                std::process::exit(1);
            }
            println!("✅ Configuration is valid");
            return Ok(());
        }

        return config::show_config(&config, &args.config_format);
    }

    let config = config::resolve_config(&args)?;
    if let Err(e) = config::validate_effective_config(&config) {
        eprintln!("❌ Configuration invalid: {:#}", e);
        std::process::exit(1);
    }

    // Config generation prints to stdout, before logging is set up
    if let Some(Commands::Config {
        output,
        format,
        commented,
    }) = &args.command
    {
        return commands::command_config(output.clone(), format.clone(), *commented);
    }

    setup_logging(&config)?;

    // Configure parallel /proc scanning thread pool if specified
    if let Some(threads) = config.parallelism {
        if threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build_global()
                .unwrap_or_else(|e| error!("Failed to set rayon thread pool: {}", e));
            debug!("Rayon thread pool configured with {} threads", threads);
        }
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    let health = Arc::new(HealthStats::new());

    match args.command {
        None => run_aggregator_server(config, health, cancel).await,
        Some(Commands::Collect { node }) => run_node_collector(&config, node, health, cancel).await,
        Some(Commands::CollectCluster) => run_cluster_collector(&config, health, cancel).await,
        Some(Commands::Query {
            from,
            to,
            average,
            format,
        }) => {
            let client = http_client(&config)?;
            commands::command_query(&client, from, to, average, format, &config.merge_options())
                .await
        }
        Some(Commands::DeleteSnapshots { yes }) => {
            let client = http_client(&config)?;
            commands::command_delete_snapshots(&client, yes).await
        }
        Some(Commands::Check { proc, store, all }) => {
            commands::command_check(proc, store, all, &config).await
        }
        Some(Commands::GenerateTestdata {
            nodes,
            intervals,
            output,
            push,
        }) => {
            let client = if push { Some(http_client(&config)?) } else { None };
            commands::command_generate_testdata(
                nodes,
                intervals,
                config.interval_ms(),
                output,
                client.as_ref().map(|c| c as &dyn AggregatorClient),
            )
            .await
        }
        Some(Commands::Config { .. }) => Ok(()),
    }
}
