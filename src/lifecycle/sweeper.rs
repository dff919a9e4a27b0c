//! Background maintenance tasks.
//!
//! # Responsibilities
//! - Periodic CSRF token sweep, decoupled from request traffic
//! - Periodic rate-limit counter and violation pruning
//!
//! # Design Decisions
//! - Each task runs on its own jittered timer under the shutdown broadcast
//! - Sweeps iterate incrementally over shared maps; no table-wide lock is
//!   held for the duration of a pass

use std::sync::Arc;
use std::time::Duration;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time;

use crate::security::SecurityOrchestrator;

/// Start the CSRF sweep loop. `interval_secs` comes from the CSRF config.
pub fn spawn_csrf_sweep(
    orchestrator: Arc<SecurityOrchestrator>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(jittered(interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    orchestrator.csrf.sweep(Utc::now());
                }
                _ = shutdown.recv() => {
                    tracing::info!("CSRF sweep task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

/// Start the rate-limit prune loop.
pub fn spawn_rate_limit_prune(
    orchestrator: Arc<SecurityOrchestrator>,
    interval_secs: u64,
    mut shutdown: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(jittered(interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now_ms = Utc::now().timestamp_millis() as u64;
                    orchestrator.rate_limiter.prune(now_ms);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rate-limit prune task received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    })
}

/// Spread periodic work out so co-started instances do not sweep in step.
fn jittered(interval_secs: u64) -> Duration {
    let base_ms = interval_secs.max(1) * 1000;
    Duration::from_millis(base_ms + fastrand::u64(0..base_ms / 10 + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_ten_percent() {
        for _ in 0..100 {
            let d = jittered(60);
            assert!(d >= Duration::from_secs(60));
            assert!(d <= Duration::from_millis(66_000));
        }
    }
}
