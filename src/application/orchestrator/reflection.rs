//! Post-trade and periodic deep reflection.
//!
//! Every close produces a self-review stored on the trade record. On the
//! reflection schedule, all closed trades since the last deep pass are
//! summarized, sent to the analyst, and the returned playbook becomes a new
//! immutable version.

use crate::application::orchestrator::playbook_manager::PlaybookManager;
use crate::application::orchestrator::prompt_builder::PromptBuilder;
use crate::domain::decision::{DeepReflectionResult, TradeReview};
use crate::domain::messages::{StreamMessage, sources, streams};
use crate::domain::ports::{Analyst, MessageBus};
use crate::domain::repositories::{ReflectionRepository, TradePatch, TradeRepository};
use crate::domain::trading::TradeRecord;
use anyhow::Result;
use serde::Serialize;
use serde_json::{Value, json};
use statrs::statistics::Statistics;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct Breakdown {
    pub trades: u64,
    pub wins: u64,
    pub pnl: f64,
    pub win_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PerformanceSummary {
    pub total_trades: u64,
    pub win_rate: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
    pub total_pnl_usd: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub by_strategy: BTreeMap<String, Breakdown>,
    pub by_regime: BTreeMap<String, Breakdown>,
}

pub struct ReflectionEngine {
    analyst: Arc<dyn Analyst>,
    playbook_manager: Arc<PlaybookManager>,
    prompts: PromptBuilder,
    trade_repo: Arc<dyn TradeRepository>,
    reflection_repo: Arc<dyn ReflectionRepository>,
    bus: Arc<dyn MessageBus>,
}

impl ReflectionEngine {
    pub fn new(
        analyst: Arc<dyn Analyst>,
        playbook_manager: Arc<PlaybookManager>,
        trade_repo: Arc<dyn TradeRepository>,
        reflection_repo: Arc<dyn ReflectionRepository>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        Self {
            analyst,
            playbook_manager,
            prompts: PromptBuilder::new(),
            trade_repo,
            reflection_repo,
            bus,
        }
    }

    /// After every close: review the trade and store the result on the
    /// record plus the reflection log.
    pub async fn post_trade_reflection(&self, trade: &TradeRecord) -> Result<TradeReview> {
        let prompt = self.prompts.build_post_trade_prompt(trade);
        let review = self.analyst.reflect_trade(&prompt).await;
        let review_json = serde_json::to_value(&review)?;

        self.trade_repo
            .update(
                trade.trade_id,
                TradePatch {
                    self_review: Some(review_json.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.reflection_repo
            .save("post_trade", Some(trade.trade_id), review_json)
            .await?;

        info!(trade_id = %trade.trade_id, outcome = %review.outcome, "Post-trade reflection complete");
        Ok(review)
    }

    /// Deep pass over all closed trades since the last one. Saves a new
    /// playbook version and announces the discipline score.
    pub async fn periodic_deep_reflection(&self) -> Result<DeepReflectionResult> {
        let trades = self.reflection_repo.get_trades_since_last().await?;
        if trades.is_empty() {
            info!("Deep reflection skipped: no trades");
            return Ok(DeepReflectionResult {
                summary: "No trades to reflect on".to_string(),
                ..Default::default()
            });
        }

        let performance = Self::compute_performance_summary(&trades);
        let playbook = self.playbook_manager.get_latest().await?;
        let prompt = self.prompts.build_deep_reflection_prompt(
            &trades,
            &playbook,
            &serde_json::to_value(&performance)?,
        );

        let result = self.analyst.deep_reflect(&prompt).await;

        let version = self
            .playbook_manager
            .save_version(&result.updated_playbook, &result.summary, "deep_reflection")
            .await?;
        self.reflection_repo
            .save("deep", None, serde_json::to_value(&result)?)
            .await?;

        let alert = StreamMessage::system_alert(
            sources::ORCHESTRATOR,
            json!({
                "severity": "INFO",
                "reason": format!(
                    "Deep reflection complete: {}",
                    result.summary.chars().take(100).collect::<String>()
                ),
                "discipline_score": result.discipline_score,
                "playbook_version": version,
            }),
        );
        if let Err(e) = self.bus.publish(streams::SYSTEM_ALERTS, &alert).await {
            warn!(error = %e, "Reflection alert publish failed");
        }

        info!(
            discipline_score = result.discipline_score,
            insights = result.pattern_insights.len(),
            playbook_version = version,
            "Deep reflection complete"
        );
        Ok(result)
    }

    pub fn compute_performance_summary(trades: &[TradeRecord]) -> PerformanceSummary {
        if trades.is_empty() {
            return PerformanceSummary::default();
        }

        let total = trades.len() as u64;
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl_usd.unwrap_or(0.0)).collect();
        let wins: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losses: Vec<f64> = pnls.iter().copied().filter(|p| *p < 0.0).collect();

        let total_pnl: f64 = pnls.iter().sum();
        let win_rate = wins.len() as f64 / total as f64;
        let avg_win = if wins.is_empty() {
            0.0
        } else {
            wins.iter().sum::<f64>() / wins.len() as f64
        };
        let avg_loss = if losses.is_empty() {
            0.0
        } else {
            losses.iter().sum::<f64>() / losses.len() as f64
        };

        let sum_wins: f64 = wins.iter().sum();
        let sum_losses: f64 = losses.iter().sum::<f64>().abs();
        let profit_factor = if sum_losses > 0.0 {
            sum_wins / sum_losses
        } else if sum_wins > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };

        // Sample standard deviation over the PnL series.
        let sharpe_ratio = if pnls.len() > 1 {
            let mean = pnls.iter().mean();
            let std = pnls.iter().std_dev();
            if std > 0.0 { mean / std } else { 0.0 }
        } else {
            0.0
        };

        let mut by_strategy: BTreeMap<String, Breakdown> = BTreeMap::new();
        let mut by_regime: BTreeMap<String, Breakdown> = BTreeMap::new();
        for trade in trades {
            let pnl = trade.pnl_usd.unwrap_or(0.0);
            let strategy_key = if trade.strategy_used.is_empty() {
                "unknown".to_string()
            } else {
                trade.strategy_used.clone()
            };
            let regime_key = if trade.market_regime.is_empty() {
                "unknown".to_string()
            } else {
                trade.market_regime.clone()
            };
            for (map, key) in [(&mut by_strategy, strategy_key), (&mut by_regime, regime_key)] {
                let entry = map.entry(key).or_default();
                entry.trades += 1;
                entry.pnl += pnl;
                if pnl > 0.0 {
                    entry.wins += 1;
                }
            }
        }
        for entry in by_strategy.values_mut().chain(by_regime.values_mut()) {
            entry.win_rate = entry.wins as f64 / entry.trades as f64;
        }

        PerformanceSummary {
            total_trades: total,
            win_rate,
            profit_factor,
            sharpe_ratio,
            total_pnl_usd: total_pnl,
            avg_win,
            avg_loss,
            by_strategy,
            by_regime,
        }
    }

    /// Metrics for the periodic performance snapshots.
    pub fn snapshot_metrics(trades: &[TradeRecord]) -> Value {
        let summary = Self::compute_performance_summary(trades);
        let pnls: Vec<f64> = trades.iter().map(|t| t.pnl_usd.unwrap_or(0.0)).collect();

        let mut cumulative = 0.0;
        let mut peak = 0.0f64;
        let mut max_drawdown = 0.0f64;
        for pnl in pnls {
            cumulative += pnl;
            peak = peak.max(cumulative);
            max_drawdown = max_drawdown.max(peak - cumulative);
        }

        json!({
            "total_trades": summary.total_trades,
            "win_rate": summary.win_rate,
            "profit_factor": if summary.profit_factor.is_finite() {
                Value::from(summary.profit_factor)
            } else {
                Value::Null
            },
            "sharpe_ratio": summary.sharpe_ratio,
            "total_pnl": summary.total_pnl_usd,
            "max_drawdown": max_drawdown,
        })
    }
}
