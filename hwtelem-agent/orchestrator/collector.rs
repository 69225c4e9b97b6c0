// Periodic sampling driver around one telemetry engine

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::access::RegisterAccess;
use crate::orchestrator::TelemetryEngine;
use crate::sink::TelemetrySink;

/// Samples the engine on a fixed interval until cancelled
///
/// Every pass runs on the blocking pool: register I/O and affinity changes
/// must not stall the async runtime.
pub struct SamplingCollector<A: RegisterAccess, S: TelemetrySink> {
    engine: Arc<Mutex<TelemetryEngine<A, S>>>,
    interval: Duration,
}

impl<A, S> SamplingCollector<A, S>
where
    A: RegisterAccess + Send + 'static,
    S: TelemetrySink + Send + 'static,
{
    pub fn new(engine: TelemetryEngine<A, S>, interval: Duration) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
            interval,
        }
    }

    pub fn engine(&self) -> Arc<Mutex<TelemetryEngine<A, S>>> {
        Arc::clone(&self.engine)
    }

    /// Start the sampling loop
    pub fn start(self, cancel_token: CancellationToken) -> JoinHandle<()> {
        tracing::info!("Starting sampling loop every {:?}", self.interval);

        tokio::spawn(async move {
            self.collection_loop(cancel_token).await;
        })
    }

    async fn collection_loop(self, cancel_token: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    tracing::info!("Sampling loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    let engine = Arc::clone(&self.engine);
                    if let Err(e) = tokio::task::spawn_blocking(move || engine.lock().sample()).await {
                        tracing::error!("Sampling task failed: {}", e);
                    }
                }
            }
        }
    }
}
