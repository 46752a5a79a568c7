// PoseSync Exporter - HTTP control surface and Prometheus exporter
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # PoseSync Exporter
//!
//! Runs a live session against a simulated sensor rig and exposes the
//! pose, status flags and Prometheus metrics over HTTP, together with the
//! three operator controls.
//!
//! ## Usage
//!
//! ```bash
//! # Four allow-listed sensors plus one stranger, ready after 2 seconds
//! posesync-exporter --devices 4 --unknown-devices 1 --auto-ready 2
//!
//! # Static session config from a file, custom port
//! posesync-exporter --config session.json --port 9300
//!
//! # Drive the session by hand
//! curl -X POST localhost:9200/control/ready
//! curl -X POST localhost:9200/control/calibrate
//! curl -X POST localhost:9200/control/shutdown
//! ```

mod error;
mod metrics;
mod publisher;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use error::Result;
use metrics::{encode_metrics, record_control_request};
use posesync::{
    ConnectionState, MetricsSnapshot, PoseSnapshot, Quaternion, Session, SessionConfig,
    SessionHandle, SessionStatus,
};
use posesync_sim::{SimConfig, SimulatedHardware};
use publisher::{Publisher, PublisherConfig, SessionOutcome};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// PoseSync HTTP exporter
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "9200")]
    port: u16,

    /// Session configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Simulated rig description (JSON); overrides --devices
    #[arg(long)]
    rig: Option<PathBuf>,

    /// Number of allow-listed simulated sensors
    #[arg(short, long, default_value = "4")]
    devices: usize,

    /// Number of simulated sensors that are on no allow-list
    #[arg(long, default_value = "0")]
    unknown_devices: usize,

    /// Target update rate in Hz (overrides the config file)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Random seed for simulated motion
    #[arg(long)]
    seed: Option<u64>,

    /// Signal ready automatically after this many seconds
    #[arg(long)]
    auto_ready: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Application state shared across handlers.
struct AppState {
    session: SessionHandle,
    outcome: Arc<RwLock<Option<SessionOutcome>>>,
    start_time: Instant,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize tracing; also captures the core library's `log` records
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match args.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("PoseSync Exporter v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(args).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn session_config(args: &Args) -> Result<SessionConfig> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading session config from {}", path.display());
            SessionConfig::from_json_file(path)?
        }
        None => SessionConfig::default(),
    };
    Ok(match args.rate {
        Some(rate) => config.with_update_rate(rate),
        None => config,
    })
}

fn rig_config(args: &Args) -> Result<SimConfig> {
    let rig = match &args.rig {
        Some(path) => SimConfig::from_json_file(path)?,
        None => SimConfig::rig(args.devices, args.unknown_devices),
    };
    let rig = match args.seed {
        Some(seed) => rig.with_seed(seed),
        None => rig,
    };
    rig.validate()?;
    Ok(rig)
}

async fn run(args: Args) -> Result<()> {
    let config = session_config(&args)?;
    let rig = rig_config(&args)?;
    info!(
        "Simulated rig: {} sensors on {}",
        rig.children.len(),
        rig.port
    );

    let session = Session::new(Box::new(SimulatedHardware::new(rig)), config)?;
    let handle = session.handle();

    let publisher = Publisher::new(
        handle.clone(),
        PublisherConfig {
            auto_ready: args.auto_ready.map(Duration::from_secs),
            ..Default::default()
        },
    );
    let state = Arc::new(AppState {
        session: handle.clone(),
        outcome: publisher.outcome(),
        start_time: Instant::now(),
    });
    let session_task = publisher.start(session);

    let app = router(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("Starting server on http://{}", addr);
    info!("Metrics endpoint: http://{}/metrics", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    handle.request_shutdown();
    if tokio::time::timeout(Duration::from_secs(5), session_task)
        .await
        .is_err()
    {
        warn!("Session did not stop within 5s");
    }
    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/pose", get(pose_handler))
        .route("/pose/ack", post(pose_ack_handler))
        .route("/control/ready", post(ready_handler))
        .route("/control/calibrate", post(calibrate_handler))
        .route("/control/shutdown", post(shutdown_handler))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Ctrl-C received, shutting down");
}

/// Root handler - shows a simple HTML page.
async fn root_handler() -> Html<&'static str> {
    Html(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>PoseSync Exporter</title>
    <style>
        body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; max-width: 800px; margin: 50px auto; padding: 20px; }
        h1 { color: #2c3e50; }
        a { color: #3498db; text-decoration: none; }
        a:hover { text-decoration: underline; }
        .endpoints { background: #f8f9fa; padding: 20px; border-radius: 8px; margin: 20px 0; }
        .endpoint { margin: 10px 0; }
        code { background: #e9ecef; padding: 2px 6px; border-radius: 4px; }
    </style>
</head>
<body>
    <h1>PoseSync Exporter</h1>
    <p>Live orientation pose from a wireless sensor rig.</p>

    <div class="endpoints">
        <h2>Endpoints</h2>
        <div class="endpoint"><a href="/pose">/pose</a> - Current pose (JSON)</div>
        <div class="endpoint"><a href="/status">/status</a> - Session status (JSON)</div>
        <div class="endpoint"><a href="/metrics">/metrics</a> - Prometheus metrics</div>
        <div class="endpoint"><a href="/health">/health</a> - Health check</div>
    </div>

    <h2>Controls</h2>
    <ul>
        <li><code>POST /pose/ack</code> - Read the pose and clear the new-data flag</li>
        <li><code>POST /control/ready</code> - Stop waiting for sensors and start measuring</li>
        <li><code>POST /control/calibrate</code> - Capture a reference pose</li>
        <li><code>POST /control/shutdown</code> - End the session</li>
    </ul>
</body>
</html>"#,
    )
}

/// Metrics handler - returns Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    publisher::publish(&state.session);
    (
        StatusCode::OK,
        [("Content-Type", "text/plain; charset=utf-8")],
        encode_metrics(),
    )
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Status information response.
#[derive(Serialize)]
struct StatusResponse {
    version: String,
    uptime_secs: u64,
    session: SessionStatus,
    metrics: MetricsSnapshot,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<SessionOutcome>,
}

/// Status handler - returns JSON status information.
async fn status_handler(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        session: state.session.status(),
        metrics: state.session.metrics(),
        outcome: state.outcome.read().await.clone(),
    })
}

/// One segment as served on `/pose`.
#[derive(Serialize)]
struct SegmentView {
    slot: usize,
    device: Option<String>,
    orientation: Option<Quaternion>,
    calibrated: Option<Quaternion>,
    calibrated_reference: bool,
}

#[derive(Serialize)]
struct PoseResponse {
    version: u64,
    new_data: bool,
    segments: Vec<SegmentView>,
}

impl PoseResponse {
    fn new(pose: PoseSnapshot, new_data: bool) -> Self {
        Self {
            version: pose.version,
            new_data,
            segments: pose
                .slots
                .iter()
                .map(|slot| SegmentView {
                    slot: slot.index,
                    device: slot.device.as_ref().map(|d| d.serial().to_string()),
                    orientation: slot.orientation(),
                    calibrated: slot.calibrated(),
                    calibrated_reference: slot.reference.is_some(),
                })
                .collect(),
        }
    }
}

/// Pose handler - returns the live pose; the new-data flag is left set.
async fn pose_handler(State(state): State<Arc<AppState>>) -> Json<PoseResponse> {
    let new_data = state.session.new_data_available();
    Json(PoseResponse::new(state.session.pose(), new_data))
}

/// Acknowledge handler - returns the live pose and clears the new-data flag.
async fn pose_ack_handler(State(state): State<Arc<AppState>>) -> Json<PoseResponse> {
    let new_data = state.session.take_new_data();
    Json(PoseResponse::new(state.session.pose(), new_data))
}

#[derive(Serialize)]
struct ControlResponse {
    action: &'static str,
    state: ConnectionState,
}

fn control(
    state: &AppState,
    action: &'static str,
    apply: impl FnOnce(&SessionHandle),
) -> (StatusCode, Json<ControlResponse>) {
    record_control_request(action);
    let current = state.session.state();
    if current.is_terminal() {
        warn!("Ignoring {} request: session is {:?}", action, current);
        return (
            StatusCode::CONFLICT,
            Json(ControlResponse {
                action,
                state: current,
            }),
        );
    }
    info!("Control request: {}", action);
    apply(&state.session);
    (
        StatusCode::ACCEPTED,
        Json(ControlResponse {
            action,
            state: current,
        }),
    )
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    control(&state, "ready", SessionHandle::request_ready)
}

async fn calibrate_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    control(&state, "calibrate", SessionHandle::request_calibration)
}

async fn shutdown_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    control(&state, "shutdown", SessionHandle::request_shutdown)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idle_state() -> Arc<AppState> {
        let session = Session::new(
            Box::new(SimulatedHardware::new(SimConfig::rig(2, 0))),
            SessionConfig::default(),
        )
        .unwrap();
        Arc::new(AppState {
            session: session.handle(),
            outcome: Arc::new(RwLock::new(None)),
            start_time: Instant::now(),
        })
    }

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["posesync-exporter"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_args_defaults() {
        let args = args(&[]);
        assert_eq!(args.port, 9200);
        assert_eq!(args.devices, 4);
        assert_eq!(args.unknown_devices, 0);
        assert!(args.auto_ready.is_none());
    }

    #[test]
    fn test_rate_overrides_config() {
        let config = session_config(&args(&["--rate", "100"])).unwrap();
        assert_eq!(config.target_update_rate, 100);
        assert_eq!(config.radio_channel, 19);
    }

    #[test]
    fn test_config_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, r#"{"radio_channel": 11, "allow_list": ["00B4391F"]}"#).unwrap();
        let config = session_config(&args(&["--config", path.to_str().unwrap()])).unwrap();
        assert_eq!(config.radio_channel, 11);
        assert_eq!(config.allow_list, vec!["00B4391F".to_string()]);
    }

    #[test]
    fn test_rig_from_flags() {
        let rig = rig_config(&args(&["--devices", "3", "--unknown-devices", "2", "--seed", "5"]))
            .unwrap();
        assert_eq!(rig.children.len(), 5);
        assert_eq!(rig.seed, Some(5));
    }

    #[tokio::test]
    async fn test_status_handler() {
        let state = idle_state();
        let Json(status) = status_handler(State(state)).await;
        assert_eq!(status.session.state, ConnectionState::Idle);
        assert!(!status.session.running);
        assert!(status.outcome.is_none());
    }

    #[tokio::test]
    async fn test_pose_handler_lists_every_slot() {
        let state = idle_state();
        let Json(pose) = pose_handler(State(state)).await;
        assert_eq!(pose.segments.len(), 10);
        assert!(!pose.new_data);
        assert!(pose.segments.iter().all(|s| s.device.is_none()));
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        for _ in 0..2_000 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_pose_read_keeps_new_data_flag() {
        let config = SessionConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_tick_interval(Duration::from_millis(1));
        let hardware = SimulatedHardware::new(SimConfig::rig(1, 0).with_seed(1));
        let mut session = Session::new(Box::new(hardware), config).unwrap();
        let handle = session.handle();
        let state = Arc::new(AppState {
            session: handle.clone(),
            outcome: Arc::new(RwLock::new(None)),
            start_time: Instant::now(),
        });
        let runner = std::thread::spawn(move || session.run());

        assert!(wait_for(|| handle.status().connected_devices == 1).await);
        handle.request_ready();
        assert!(wait_for(|| handle.new_data_available()).await);

        let Json(first) = pose_handler(State(Arc::clone(&state))).await;
        let Json(second) = pose_handler(State(Arc::clone(&state))).await;
        assert!(first.new_data);
        assert!(second.new_data);
        assert!(handle.new_data_available());

        let Json(acked) = pose_ack_handler(State(Arc::clone(&state))).await;
        assert!(acked.new_data);
        assert_eq!(acked.segments[0].device.as_deref(), Some("00B4391F"));

        handle.request_shutdown();
        assert!(runner.join().unwrap().unwrap().shutdown_succeeded);
    }

    #[test]
    fn test_control_accepted_while_live() {
        let state = idle_state();
        let (code, Json(body)) = control(&state, "shutdown", SessionHandle::request_shutdown);
        assert_eq!(code, StatusCode::ACCEPTED);
        assert_eq!(body.action, "shutdown");
    }

    #[test]
    fn test_control_rejected_after_session_end() {
        let mut session = Session::new(
            Box::new(SimulatedHardware::new(
                SimConfig::rig(1, 0).with_fault(posesync_sim::Fault::EmptyScan),
            )),
            SessionConfig::default(),
        )
        .unwrap();
        let state = AppState {
            session: session.handle(),
            outcome: Arc::new(RwLock::new(None)),
            start_time: Instant::now(),
        };
        assert!(session.run().is_err());

        let (code, Json(body)) = control(&state, "ready", SessionHandle::request_ready);
        assert_eq!(code, StatusCode::CONFLICT);
        assert_eq!(body.state, ConnectionState::Failed);
    }
}
