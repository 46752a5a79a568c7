// PoseSync Exporter - Session publisher
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Runs a session on a blocking thread and mirrors it into Prometheus.
//!
//! The session itself is synchronous; it gets a dedicated thread from
//! tokio's blocking pool. A lightweight async task polls the session
//! handle and refreshes the gauges until the session has ended.

use std::sync::Arc;
use std::time::Duration;

use posesync::{Session, SessionHandle, SessionReport};
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::metrics::{update_pose_metrics, update_session_metrics, update_status_metrics};

/// How a finished session ended.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed { report: SessionReport },
    Failed { error: String },
}

/// Configuration for the publisher.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Interval between gauge refreshes.
    pub refresh_interval: Duration,
    /// Signal ready automatically after this delay.
    pub auto_ready: Option<Duration>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_millis(250),
            auto_ready: None,
        }
    }
}

/// Owns the running session and its published outcome.
pub struct Publisher {
    handle: SessionHandle,
    outcome: Arc<RwLock<Option<SessionOutcome>>>,
    config: PublisherConfig,
}

impl Publisher {
    /// Create a publisher for `handle`.
    pub fn new(handle: SessionHandle, config: PublisherConfig) -> Self {
        Self {
            handle,
            outcome: Arc::new(RwLock::new(None)),
            config,
        }
    }

    /// Shared slot the outcome is written to once the session ends.
    pub fn outcome(&self) -> Arc<RwLock<Option<SessionOutcome>>> {
        Arc::clone(&self.outcome)
    }

    /// Start `session` and the refresh loop.
    ///
    /// The returned task resolves once the session has ended and the final
    /// metrics are published.
    pub fn start(self, mut session: Session) -> JoinHandle<()> {
        let runner = tokio::task::spawn_blocking(move || session.run());

        if let Some(delay) = self.config.auto_ready {
            let handle = self.handle.clone();
            tokio::spawn(async move {
                sleep(delay).await;
                info!("Auto-ready after {:?}", delay);
                handle.request_ready();
            });
        }

        tokio::spawn(async move {
            let refresh =
                tokio::spawn(refresh_loop(self.handle.clone(), self.config.refresh_interval));

            let outcome = match runner.await {
                Ok(Ok(report)) => {
                    info!(
                        "Session ended: {:?}, {} segments",
                        report.state,
                        report.slots.len()
                    );
                    SessionOutcome::Completed { report }
                }
                Ok(Err(e)) => {
                    error!("Session failed: {}", e);
                    SessionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
                Err(e) => {
                    error!("Session thread aborted: {}", e);
                    SessionOutcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            refresh.abort();
            publish(&self.handle);
            *self.outcome.write().await = Some(outcome);
        })
    }
}

/// Refresh every gauge from one read of the session handle.
pub fn publish(handle: &SessionHandle) {
    update_status_metrics(&handle.status());
    update_session_metrics(&handle.metrics());
    update_pose_metrics(&handle.pose());
}

async fn refresh_loop(handle: SessionHandle, interval: Duration) {
    let mut last_devices: Option<usize> = None;
    loop {
        publish(&handle);

        let devices = handle.status().connected_devices;
        if let Some(last) = last_devices {
            if devices < last {
                warn!("Connected devices dropped from {} to {}", last, devices);
            }
        }
        last_devices = Some(devices);
        sleep(interval).await;
    }
}
