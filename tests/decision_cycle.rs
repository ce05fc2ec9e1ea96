//! End-to-end decision-cycle scenarios over the in-memory bus and mocks.

mod common;

use common::{close_position, harness, open_long_decision, publish_snapshot, set_equity, snapshot};
use opustrade::application::orchestrator::OrchestratorState;
use opustrade::domain::decision::OpusDecision;
use opustrade::domain::market::Regime;
use opustrade::domain::messages::{StreamMessage, streams};
use opustrade::domain::repositories::TradeRepository;
use opustrade::domain::trading::{Direction, TradeStatus};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_happy_path_open_publishes_order_and_journals() {
    let h = harness(open_long_decision(), true);
    set_equity(&h, 10000.0).await;
    publish_snapshot(&h, &snapshot(Regime::TrendingUp, 50000.0, 0.01, 0.0001)).await;

    // Play the trade service: answer the published intent with a fill.
    let responder = {
        let bus = Arc::clone(&h.bus);
        let orchestrator = Arc::clone(&h.orchestrator);
        tokio::spawn(async move {
            for _ in 0..200 {
                let orders = bus.published(streams::TRADE_ORDERS).await;
                if let Some(order) = orders.first() {
                    let decision_id = order.payload_str("decision_id").unwrap().to_string();
                    let fill = StreamMessage::trade_fill(json!({
                        "decision_id": decision_id,
                        "symbol": "BTC-USDT-SWAP",
                        "action": "OPEN_LONG",
                        "success": true,
                        "ord_id": "okx-123",
                        "fill_price": 50010.0,
                    }));
                    orchestrator
                        .handle_stream_event(streams::TRADE_FILLS.to_string(), fill)
                        .await
                        .unwrap();
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!("no trade order observed");
        })
    };

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();
    responder.await.unwrap();

    let orders = h.bus.published(streams::TRADE_ORDERS).await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].payload_str("action"), Some("OPEN_LONG"));
    assert_eq!(orders[0].payload_str("symbol"), Some("BTC-USDT-SWAP"));
    assert_eq!(orders[0].payload_str("stop_loss"), Some("49500"));
    assert_eq!(orders[0].payload_str("take_profit"), Some("51500"));

    let decisions = h.bus.published(streams::OPUS_DECISIONS).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].payload_str("action"), Some("OPEN_LONG"));

    let open = h.trade_repo.get_open().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].status, TradeStatus::Open);
    assert_eq!(open[0].direction, Direction::Long);
    assert_eq!(h.orchestrator.state().await, OrchestratorState::Idle);
}

#[tokio::test]
async fn test_hold_publishes_decision_without_order() {
    let h = harness(OpusDecision::default(), true);
    set_equity(&h, 10000.0).await;
    publish_snapshot(&h, &snapshot(Regime::Ranging, 50000.0, 0.0, 0.0)).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert!(h.bus.published(streams::TRADE_ORDERS).await.is_empty());
    let decisions = h.bus.published(streams::OPUS_DECISIONS).await;
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].payload_str("action"), Some("HOLD"));
    assert!(h.trade_repo.get_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_risk_rejection_blocks_order_and_persists_rules() {
    let mut oversized = open_long_decision();
    oversized.decision.size_pct = 0.10;
    let h = harness(oversized, true);
    set_equity(&h, 10000.0).await;
    publish_snapshot(&h, &snapshot(Regime::TrendingUp, 50000.0, 0.01, 0.0001)).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert!(h.bus.published(streams::TRADE_ORDERS).await.is_empty());
    let rejections = h.risk_rejections.rows.read().await;
    assert_eq!(rejections.len(), 1);
    assert!(rejections[0].1.contains(&"trade_size".to_string()));
}

#[tokio::test]
async fn test_daily_loss_halts_and_raises_critical_alert() {
    let h = harness(open_long_decision(), true);
    set_equity(&h, 10000.0).await;
    set_equity(&h, 9600.0).await;
    publish_snapshot(&h, &snapshot(Regime::TrendingUp, 50000.0, 0.01, 0.0001)).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert_eq!(h.orchestrator.state().await, OrchestratorState::Halted);
    assert!(h.bus.published(streams::TRADE_ORDERS).await.is_empty());
    let alerts = h.bus.published(streams::SYSTEM_ALERTS).await;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].payload_str("severity"), Some("CRITICAL"));

    // Subsequent cycles are no-ops.
    let analyst_calls = h.analyst.call_count();
    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();
    assert_eq!(h.analyst.call_count(), analyst_calls);
    assert_eq!(h.orchestrator.state().await, OrchestratorState::Halted);
}

#[tokio::test]
async fn test_consecutive_loss_cooldown_skips_analysis() {
    let h = harness(open_long_decision(), true);
    set_equity(&h, 10000.0).await;

    close_position(&h, "BTC-USDT-SWAP", -50.0).await;
    close_position(&h, "BTC-USDT-SWAP", -30.0).await;
    close_position(&h, "BTC-USDT-SWAP", -20.0).await;

    assert_eq!(h.orchestrator.state().await, OrchestratorState::Cooldown);
    {
        let gate = h.orchestrator.risk_gate.read().await;
        let until = gate.cooldown_until.expect("cooldown must be set");
        let expected = chrono::Utc::now() + chrono::Duration::seconds(1800);
        assert!((expected - until).num_seconds().abs() <= 2);
    }

    publish_snapshot(&h, &snapshot(Regime::TrendingUp, 50000.0, 0.01, 0.0001)).await;
    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert_eq!(h.analyst.call_count(), 0);
    assert_eq!(h.screener.call_count(), 0);
    assert_eq!(h.orchestrator.state().await, OrchestratorState::Cooldown);
}

#[tokio::test]
async fn test_screener_bypassed_when_position_open() {
    let h = harness(OpusDecision::default(), true);
    set_equity(&h, 10000.0).await;

    // Mirror an open position on the instrument.
    let update = StreamMessage::position_update(json!({
        "event": "update",
        "symbol": "BTC-USDT-SWAP",
        "pos_side": "long",
        "position": {
            "instId": "BTC-USDT-SWAP",
            "posSide": "long",
            "pos": 1.0,
            "avgPx": 50000.0,
            "upl": 10.0,
            "uplRatio": 0.001,
            "lever": 2.0,
            "liqPx": 40000.0,
            "margin": 250.0,
            "mgnRatio": 0.5,
            "uTime": null,
        },
    }));
    h.orchestrator
        .handle_stream_event(streams::TRADE_POSITIONS.to_string(), update)
        .await
        .unwrap();

    publish_snapshot(&h, &snapshot(Regime::Ranging, 50000.0, 0.0, 0.0)).await;
    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    // Screener never consulted; analysis proceeded directly.
    assert_eq!(h.screener.call_count(), 0);
    assert_eq!(h.analyst.call_count(), 1);
}

#[tokio::test]
async fn test_screener_no_signal_stops_cycle() {
    let h = harness(open_long_decision(), false);
    set_equity(&h, 10000.0).await;
    publish_snapshot(&h, &snapshot(Regime::Ranging, 50000.0, 0.0, 0.0)).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert_eq!(h.screener.call_count(), 1);
    assert_eq!(h.analyst.call_count(), 0);
    assert!(h.bus.published(streams::TRADE_ORDERS).await.is_empty());
    assert_eq!(h.orchestrator.state().await, OrchestratorState::Idle);
}

#[tokio::test]
async fn test_no_snapshot_stays_idle() {
    let h = harness(open_long_decision(), true);
    set_equity(&h, 10000.0).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert_eq!(h.screener.call_count(), 0);
    assert_eq!(h.orchestrator.state().await, OrchestratorState::Idle);
}

#[tokio::test]
async fn test_volatile_market_triggers_research() {
    let h = harness(open_long_decision(), true);
    set_equity(&h, 10000.0).await;
    // 4% hourly move bypasses the screener AND triggers research.
    publish_snapshot(&h, &snapshot(Regime::Volatile, 50000.0, 0.04, 0.0001)).await;

    h.orchestrator.run_cycle("BTC-USDT-SWAP").await.unwrap();

    assert_eq!(h.screener.call_count(), 0);
    assert_eq!(
        h.research.calls.load(std::sync::atomic::Ordering::SeqCst),
        1
    );
    assert_eq!(h.analyst.call_count(), 1);
}
