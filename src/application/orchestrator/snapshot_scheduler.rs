//! Background scheduler: hourly/daily/weekly performance snapshots plus the
//! 00:00 UTC daily risk baseline reset.

use crate::application::orchestrator::reflection::ReflectionEngine;
use crate::application::orchestrator::risk_gate::RiskGate;
use crate::domain::repositories::{PerformanceSnapshotRepository, TradeRepository};
use anyhow::Result;
use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tracing::{error, info};

const TICK_INTERVAL: Duration = Duration::from_secs(60);
const METRICS_TRADE_WINDOW: usize = 1000;

pub struct SnapshotScheduler {
    trade_repo: Arc<dyn TradeRepository>,
    snapshot_repo: Arc<dyn PerformanceSnapshotRepository>,
    risk_gate: Arc<RwLock<RiskGate>>,
}

impl SnapshotScheduler {
    pub fn new(
        trade_repo: Arc<dyn TradeRepository>,
        snapshot_repo: Arc<dyn PerformanceSnapshotRepository>,
        risk_gate: Arc<RwLock<RiskGate>>,
    ) -> Self {
        Self {
            trade_repo,
            snapshot_repo,
            risk_gate,
        }
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut last_fired_minute: Option<DateTime<Utc>> = None;

        info!("Snapshot scheduler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    let now = Utc::now();
                    let minute_key = now.with_second(0).and_then(|t| t.with_nanosecond(0));
                    if minute_key.is_some() && minute_key == last_fired_minute {
                        continue;
                    }
                    last_fired_minute = minute_key;
                    if let Err(e) = self.on_tick(now).await {
                        error!(error = %e, "Snapshot scheduler tick failed");
                    }
                }
            }
        }
        info!("Snapshot scheduler stopped");
    }

    async fn on_tick(&self, now: DateTime<Utc>) -> Result<()> {
        if Self::is_hourly(now) {
            self.take_snapshot("hourly").await?;
        }
        if Self::is_daily(now) {
            self.risk_gate.write().await.reset_daily();
            self.take_snapshot("daily").await?;
        }
        if Self::is_weekly(now) {
            self.take_snapshot("weekly").await?;
        }
        Ok(())
    }

    async fn take_snapshot(&self, snapshot_type: &str) -> Result<()> {
        let trades = self.trade_repo.get_recent_closed(METRICS_TRADE_WINDOW).await?;
        let metrics = ReflectionEngine::snapshot_metrics(&trades);
        self.snapshot_repo.save(snapshot_type, metrics).await?;
        info!(snapshot_type, trades = trades.len(), "Performance snapshot saved");
        Ok(())
    }

    fn is_hourly(now: DateTime<Utc>) -> bool {
        now.minute() == 0
    }

    fn is_daily(now: DateTime<Utc>) -> bool {
        now.hour() == 0 && now.minute() == 0
    }

    fn is_weekly(now: DateTime<Utc>) -> bool {
        now.weekday() == Weekday::Sun && now.hour() == 0 && now.minute() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_schedule_predicates() {
        // 2026-08-02 is a Sunday.
        let sunday_midnight = Utc.with_ymd_and_hms(2026, 8, 2, 0, 0, 30).unwrap();
        assert!(SnapshotScheduler::is_hourly(sunday_midnight));
        assert!(SnapshotScheduler::is_daily(sunday_midnight));
        assert!(SnapshotScheduler::is_weekly(sunday_midnight));

        let monday_midnight = Utc.with_ymd_and_hms(2026, 8, 3, 0, 0, 0).unwrap();
        assert!(SnapshotScheduler::is_daily(monday_midnight));
        assert!(!SnapshotScheduler::is_weekly(monday_midnight));

        let mid_hour = Utc.with_ymd_and_hms(2026, 8, 3, 14, 30, 0).unwrap();
        assert!(!SnapshotScheduler::is_hourly(mid_hour));
        assert!(!SnapshotScheduler::is_daily(mid_hour));

        let on_hour = Utc.with_ymd_and_hms(2026, 8, 3, 14, 0, 0).unwrap();
        assert!(SnapshotScheduler::is_hourly(on_hour));
        assert!(!SnapshotScheduler::is_daily(on_hour));
    }
}
