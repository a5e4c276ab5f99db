//! Background task that periodically resets lapsed claims.
//!
//! Read paths already treat a lapsed claim as available, so the sweeper only
//! has to be eventually correct: it keeps the stored rows tidy between reads.

use crate::services::claim_manager::ClaimManager;
use chrono::Utc;
use std::time::Duration;
use tokio::{
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Sweep period used when none is configured.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct RunningSweep {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Owned handle on the sweep loop. Created stopped; `start` spawns the loop on
/// the current tokio runtime and `stop` waits for it to exit.
pub struct ExpirySweeper {
    claims: ClaimManager,
    period: Duration,
    running: Option<RunningSweep>,
}

impl ExpirySweeper {
    pub fn new(claims: ClaimManager, period: Duration) -> Self {
        Self {
            claims,
            period,
            running: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|run| !run.handle.is_finished())
    }

    /// Spawn the sweep loop. The first sweep runs immediately. Returns `false`
    /// if the loop is already running.
    pub fn start(&mut self) -> bool {
        if self.is_running() {
            return false;
        }

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let claims = self.claims.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(period_ms = period.as_millis() as u64, "expiry sweeper started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Arm bodies run after the select resolves: a stop
                        // request waits for this sweep, it never interrupts it.
                        match claims.release_expired(Utc::now()).await {
                            Ok(0) => debug!("sweep found no expired claims"),
                            Ok(released) => info!(released, "sweep released expired claims"),
                            Err(err) => error!(error = %err, "expiry sweep failed"),
                        }
                    }
                }
            }

            info!("expiry sweeper stopped");
        });

        self.running = Some(RunningSweep { cancel, handle });
        true
    }

    /// Stop the loop and wait for an in-flight sweep to finish. No sweep
    /// starts after this returns. Calling it on a stopped sweeper is a no-op.
    pub async fn stop(&mut self) {
        let Some(run) = self.running.take() else {
            return;
        };
        run.cancel.cancel();
        if let Err(err) = run.handle.await {
            warn!(error = %err, "expiry sweeper task ended abnormally");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if let Some(run) = self.running.take() {
            run.cancel.cancel();
        }
    }
}
