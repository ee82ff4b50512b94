//! Storage Job Orchestrator
//!
//! Runs a YAML list of configuration jobs through the job service and
//! serves health and Prometheus metrics endpoints while it does.
//!
//! ```text
//!  jobs.yaml ──► JobService ──► JobStateMachine ──► GraphClient
//!                   │                                   │
//!                   ▼                                   ▼
//!           /metrics, /healthz               ChannelTransport ──► array
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use storage_job_orchestrator::job::JobMetrics;
use storage_job_orchestrator::{
    BroadcastNotifier, ChannelTransport, CompositeNotifier, GraphClient, JobCommand, JobService,
    JobStateMachine, LoggingNotifier, NotifyingKeyManager, OrchestratorConfig, SimulatedArray,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Storage Job Orchestrator - transactional jobs against a storage array
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Orchestrator configuration file (YAML)
    #[arg(long, env = "ORCHESTRATOR_CONFIG")]
    config: Option<PathBuf>,

    /// Job list to run (YAML)
    #[arg(long, env = "ORCHESTRATOR_JOBS")]
    jobs: Option<PathBuf>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Run against the built-in simulated array
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Keep serving health and metrics after the job list finishes
    #[arg(long, env = "KEEP_RUNNING")]
    keep_running: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args);

    info!("Starting Storage Job Orchestrator");
    info!("  Version: {}", storage_job_orchestrator::VERSION);
    info!("  Standalone mode: {}", args.standalone);

    let config = match &args.config {
        Some(path) => OrchestratorConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => OrchestratorConfig::default(),
    };

    let jobs = match &args.jobs {
        Some(path) => {
            let source = std::fs::read_to_string(path)
                .with_context(|| format!("reading job list {}", path.display()))?;
            JobCommand::list_from_yaml(&source)
                .with_context(|| format!("parsing job list {}", path.display()))?
        }
        None => Vec::new(),
    };

    if !args.standalone {
        bail!("no array transport configured; run with --standalone to use the simulated array");
    }

    let cancel = CancellationToken::new();

    // Wire the pipeline
    let array = Arc::new(SimulatedArray::demo());
    info!(objects = array.object_count(), "Simulated array ready");
    let (transport, transport_task) =
        ChannelTransport::spawn(array, &config.transport, cancel.child_token());
    let graph = GraphClient::new(transport);

    let broadcast = Arc::new(BroadcastNotifier::new(config.notifications.broadcast_capacity));
    let mut sinks = CompositeNotifier::new().with_sink(broadcast.clone());
    if config.notifications.log_events {
        sinks = sinks.with_sink(Arc::new(LoggingNotifier::info_level()));
    }
    let notifier = Arc::new(sinks);
    let keys = Arc::new(NotifyingKeyManager::new(notifier.clone()));

    let metrics = Arc::new(JobMetrics::new().context("registering job metrics")?);
    let config = Arc::new(config);
    let machine = JobStateMachine::new(graph, notifier, keys, Arc::clone(&config));
    let (service, worker) =
        JobService::spawn(machine, &config, Arc::clone(&metrics), cancel.child_token());

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {:#}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    let exported = Arc::clone(&metrics);
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr, exported).await {
            error!("Metrics server error: {:#}", e);
        }
    });

    // Run the job list in submission order
    let submitted = jobs.len();
    let mut failed = 0usize;
    for command in jobs {
        let job_type = command.job_type();
        let job_number = service
            .enqueue(command)
            .await
            .with_context(|| format!("queueing {} job", job_type))?;
        let record = service.wait_for(job_number).await?;
        if record.error_code.is_error() {
            failed += 1;
            warn!(
                %job_number,
                %job_type,
                error_code = %record.error_code,
                failure = record.failure.as_deref().unwrap_or(""),
                "Job failed"
            );
        } else {
            info!(%job_number, %job_type, object_id = %record.object_id, "Job succeeded");
        }
    }
    info!(submitted, failed, "Job list complete");

    if args.keep_running {
        info!("Serving until interrupted");
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
    }

    service.shutdown();
    cancel.cancel();
    let _ = worker.await;
    let _ = transport_task.await;

    info!("Orchestrator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    if let Ok(directive) = "hyper=warn".parse() {
        filter = filter.add_directive(directive);
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn plain(status: hyper::StatusCode, body: &'static str) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(hyper::Body::from(body));
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> anyhow::Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => plain(StatusCode::OK, "ok"),
                _ => plain(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid health server address {}", addr))?;

    info!("Health server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str, metrics: Arc<JobMetrics>) -> anyhow::Result<()> {
    use hyper::header::{HeaderValue, CONTENT_TYPE};
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Response, Server, StatusCode};

    let make_svc = make_service_fn(move |_conn| {
        let metrics = Arc::clone(&metrics);
        async move {
            Ok::<_, std::convert::Infallible>(service_fn(move |req: Request<Body>| {
                let metrics = Arc::clone(&metrics);
                async move {
                    let response = match req.uri().path() {
                        "/metrics" => match metrics.encode() {
                            Ok((content_type, buffer)) => {
                                let mut response = Response::new(Body::from(buffer));
                                if let Ok(value) = HeaderValue::from_str(&content_type) {
                                    response.headers_mut().insert(CONTENT_TYPE, value);
                                }
                                response
                            }
                            Err(e) => {
                                warn!("Metrics encoding failed: {}", e);
                                plain(StatusCode::INTERNAL_SERVER_ERROR, "encoding failed")
                            }
                        },
                        _ => plain(StatusCode::NOT_FOUND, "not found"),
                    };
                    Ok::<_, std::convert::Infallible>(response)
                }
            }))
        }
    });

    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid metrics server address {}", addr))?;

    info!("Metrics server listening on {}", addr);
    Server::try_bind(&addr)?.serve(make_svc).await?;
    Ok(())
}
