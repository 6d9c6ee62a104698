//! Background expiry of TTL-bound rules.
//!
//! # Responsibilities
//! - Periodically remove rules whose `expires_at` has passed
//!
//! An expired rule may keep matching for up to one sweep interval.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time;

use crate::rules::registry::RuleRegistry;

pub struct RuleSweeper {
    registry: Arc<RuleRegistry>,
    interval: Duration,
}

impl RuleSweeper {
    pub fn new(registry: Arc<RuleRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Rule sweeper starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = self.registry.sweep_expired(Utc::now());
                    if swept > 0 {
                        tracing::debug!(swept, live = self.registry.len(), "Sweep complete");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Rule sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
