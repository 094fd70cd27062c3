//! Process entry point: loads configuration, constructs the axis registry,
//! rehydrates persisted state, spawns one tick task per axis plus the
//! HTTP/websocket surface, and drives graceful shutdown on `SIGINT`/`SIGTERM`
//! per §5.

use clap::Parser;
use ethernet_encoder_servo::actuator::{EncoderSource, SerialStepperSink, SimulatedPlant, StepperSink};
use ethernet_encoder_servo::config::{self, ServerConfig};
use ethernet_encoder_servo::registry::AxisRegistry;
use ethernet_encoder_servo::servo::AxisState;
use ethernet_encoder_servo::{http, state_store, tick};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the server configuration JSON file.
    #[arg(short, long, env = "SERVO_CONFIG", default_value = "config.json")]
    config: PathBuf,

    /// Overrides `dry_run` from the config file, wiring simulated axes
    /// instead of real hardware.
    #[arg(long)]
    dry_run: bool,

    /// Logging verbosity, forwarded to `tracing_subscriber::EnvFilter` when
    /// `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Builds the encoder source and stepper sink for one axis. Dry-run mode (or
/// a plain startup with no fieldbus client available — the CIP/EtherNet-IP
/// client itself is out of scope, §1) wires a closed-loop simulated plant so
/// the control pipeline can still be exercised end-to-end; only the stepper
/// sink has a real hardware implementation (`SerialStepperSink`).
fn build_actuators(
    config: &config::AxisConfig,
    com: &config::ComSettings,
    dry_run: bool,
) -> (Box<dyn EncoderSource>, Box<dyn StepperSink>) {
    let plant = SimulatedPlant::new(config::COUNTS_PER_REVOLUTION, config.counts_per_step(), 0);
    let encoder = Box::new(plant.encoder_source());

    if dry_run {
        let stepper = Box::new(plant.stepper_sink(Duration::from_millis(config.interval_ms as u64)));
        (encoder, stepper)
    } else {
        warn!(
            axis = %config.name,
            "no fieldbus client wired; encoder samples are simulated. \
             only the stepper serial sink talks to real hardware"
        );
        let stepper = Box::new(SerialStepperSink::new(
            com.path.clone(),
            com.baud_rate,
            Duration::from_millis(com.timeout_ms as u64),
        ));
        (encoder, stepper as Box<dyn StepperSink>)
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut config = match ServerConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, path = %args.config.display(), "failed to load configuration");
            std::process::exit(1);
        }
    };
    if args.dry_run {
        config.dry_run = true;
    }

    info!(axes = config.axes.len(), dry_run = config.dry_run, "starting");

    let registry = AxisRegistry::from_config(&config);

    let persisted = state_store::load(&config.state_file);
    state_store::rehydrate(&registry, &persisted).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (states_tx, _states_rx) = broadcast::channel::<AxisState>(256);

    let mut tick_handles = Vec::new();
    for axis_config in &config.axes {
        let axis = registry.get(&axis_config.name).expect("just constructed");
        let (encoder, stepper) = build_actuators(axis_config, &config.com_settings, config.dry_run);
        let handle = tokio::spawn(tick::run(
            axis,
            encoder,
            stepper,
            shutdown_rx.clone(),
            states_tx.clone(),
        ));
        tick_handles.push(handle);
    }

    let app_state = http::AppState {
        registry: registry.clone(),
        states: states_tx,
    };
    let app = http::routes(app_state).layer(tower_http::trace::TraceLayer::new_for_http());
    let addr = config.listen_addr;
    info!(%addr, "listening");

    let server = tokio::spawn(async move {
        if let Err(e) = axum::Server::bind(&addr)
            .serve(app.into_make_service())
            .await
        {
            error!(error = %e, "http server stopped unexpectedly");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining axes");

    let _ = shutdown_tx.send(true);
    for handle in tick_handles {
        let _ = handle.await;
    }
    server.abort();

    if let Err(e) = state_store::save(&config.state_file, &registry).await {
        error!(error = %e, "failed to persist axis state on shutdown");
    }
    info!("shutdown complete");
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
