use anyhow::Context;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use clap::Parser;
use prometheus::{Encoder, Registry, TextEncoder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use hwtelem::common::{cpuid, identify_online_threads, LinuxRegisterAccess};
use hwtelem::{AgentConfig, EngineConfig, PrometheusSink, SamplingCollector, TelemetryEngine};

#[derive(Parser, Debug)]
#[command(name = "hwtelem")]
#[command(about = "Temperature, power, clock and cache telemetry for AMD Zen and Intel CPUs")]
struct Args {
    #[arg(long, default_value = "0.0.0.0:9184", help = "Address serving /metrics")]
    listen: SocketAddr,

    #[arg(long, default_value_t = 1000, help = "Sampling interval in milliseconds")]
    interval_ms: u64,

    #[arg(
        long,
        help = "Time stamp counter frequency in MHz (measured at startup when omitted)"
    )]
    reference_clock_mhz: Option<f64>,

    #[arg(
        long = "ccx-thread",
        help = "Representative thread of each AMD core complex, in CCX order (--ccx-thread 0,8 or repeated)",
        value_delimiter = ',',
        action = clap::ArgAction::Append
    )]
    ccx_threads: Vec<u32>,

    #[arg(
        long = "param",
        help = "Sensor parameter override <sensor>/<position>=<value>, e.g. \"CPU Core #1/0=95\"",
        action = clap::ArgAction::Append
    )]
    params: Vec<String>,

    #[arg(short, long, help = "Enable verbose logging (debug level unless RUST_LOG is set)")]
    verbose: bool,
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions() -> anyhow::Result<()> {
    let msr_path = "/dev/cpu/0/msr";
    if std::fs::metadata(msr_path).is_err() {
        anyhow::bail!("Cannot access {msr_path}; the msr kernel module may not be loaded (sudo modprobe msr)");
    }

    if let Err(e) = std::fs::File::open(msr_path) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            anyhow::bail!("Permission denied accessing {msr_path}; run as root or grant CAP_SYS_RAWIO");
        }
    }
    Ok(())
}

fn reference_clock(requested: Option<f64>) -> f64 {
    if let Some(mhz) = requested {
        return mhz;
    }
    match cpuid::estimate_tsc_mhz(Duration::from_millis(100)) {
        Some(mhz) => {
            tracing::info!("Measured time stamp counter at {mhz:.1} MHz");
            mhz
        }
        None => {
            let fallback = EngineConfig::default().reference_clock_mhz;
            tracing::warn!("Could not measure the time stamp counter, assuming {fallback} MHz");
            fallback
        }
    }
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    tracing::info!("Installing signal handlers...");

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::warn!("Shutdown triggered by Ctrl+C");
        },
        _ = terminate => {
            tracing::warn!("Shutdown triggered by SIGTERM");
        },
    }

    cancel_token.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    check_permissions()?;

    let mut engine_config = EngineConfig {
        reference_clock_mhz: reference_clock(args.reference_clock_mhz),
        ..EngineConfig::default()
    };
    if !args.ccx_threads.is_empty() {
        engine_config.ccx_threads = args.ccx_threads.clone();
    }

    let config = AgentConfig::new(
        args.listen,
        Duration::from_millis(args.interval_ms),
        engine_config,
        &args.params,
    )
    .context("Invalid configuration")?;

    let registry = Registry::new();
    #[cfg(target_os = "linux")]
    registry
        .register(Box::new(prometheus::process_collector::ProcessCollector::for_self()))
        .context("Failed to register the process collector")?;

    let sink = PrometheusSink::new(registry.clone(), config.parameter_overrides.clone());
    let engine_config = config.engine.clone();
    let engine = tokio::task::spawn_blocking(move || {
        let records = identify_online_threads()?;
        TelemetryEngine::new(LinuxRegisterAccess::new(), sink, records, &engine_config)
    })
    .await?
    .context("Failed to initialize the telemetry engine")?;

    tracing::info!(
        "Monitoring {} ({} cores)",
        engine.processor().identity().brand,
        engine.processor().core_count()
    );

    let cancel_token = CancellationToken::new();
    let collection_handle = SamplingCollector::new(engine, config.interval).start(cancel_token.clone());

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(registry);

    tracing::warn!("Starting HTTP server on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel_token))
        .await?;

    tracing::info!("Server shutdown complete, waiting for the sampling loop to finish...");
    if let Err(e) = collection_handle.await {
        tracing::error!("Sampling loop ended abnormally: {}", e);
    }

    Ok(())
}
