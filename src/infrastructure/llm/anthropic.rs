//! Anthropic Messages API adapter: fast screening on the small model, full
//! analysis and reflection on the large one.
//!
//! Failure policy: the screener fails OPEN (signal = true, so a broken
//! screener never blocks analysis); the analyst fails to HOLD / empty
//! reviews, so a broken analyst never trades.

use crate::infrastructure::core::truncate_utf8;
use crate::config::LlmConfig;
use crate::domain::decision::{DeepReflectionResult, OpusDecision, ScreenResult, TradeReview};
use crate::domain::market::MarketSnapshot;
use crate::domain::ports::{Analyst, Screener};
use crate::infrastructure::llm::extract_json;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{info, warn};

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

const SCREENER_SYSTEM_PROMPT: &str = "\
You are a quick crypto market screener.
Given a market snapshot, determine if there's an actionable trading setup RIGHT NOW.
Signal = true ONLY if:
- Clear breakout/breakdown with volume
- RSI extreme (<30 or >70) in ranging market
- Strong trend pullback to EMA support
- Significant divergence between indicators
Signal = false if market is choppy, unclear, or already priced in.
Respond ONLY with JSON: {\"signal\": true/false, \"reason\": \"...\"}";

const ANALYSIS_SYSTEM_PROMPT: &str = "\
You are an expert crypto trading analyst.
Analyze the market data and make a trading decision.
Follow the playbook rules strictly. Only trade when you have high conviction.
Default to HOLD if uncertain. Always include stop loss and take profit.
Respond ONLY with a single JSON object matching the output_format.";

const REFLECTION_SYSTEM_PROMPT: &str = "\
You are a trading performance coach.
Review the completed trade objectively. Identify what went right and wrong.
Be honest and specific. Focus on actionable lessons.
Respond ONLY with a single JSON object matching the output_format.";

const DEEP_REFLECTION_SYSTEM_PROMPT: &str = "\
You are a trading system optimizer.
Analyze the full trading history and current playbook.
Identify patterns, biases, and areas for improvement.
Propose specific, evidence-based playbook updates.
Respond ONLY with a single JSON object matching the output_format.";

pub struct AnthropicClient {
    http: reqwest::Client,
    config: LlmConfig,
}

impl AnthropicClient {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, config })
    }

    async fn call(
        &self,
        model: &str,
        max_tokens: u32,
        system: &str,
        user: &str,
        temperature: f64,
    ) -> Result<(String, u64)> {
        let body = json!({
            "model": model,
            "max_tokens": max_tokens,
            "temperature": temperature,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", &self.config.anthropic_api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Messages API request failed")?
            .error_for_status()
            .context("Messages API returned an error status")?;

        let value: Value = response.json().await.context("Malformed API response")?;
        let text = value["content"][0]["text"].as_str().unwrap_or("").to_string();
        let tokens = value["usage"]["input_tokens"].as_u64().unwrap_or(0)
            + value["usage"]["output_tokens"].as_u64().unwrap_or(0);
        Ok((text, tokens))
    }

    /// Large-model call under the hard decision timeout. Empty text on
    /// timeout or error.
    async fn call_opus(&self, system: &str, user: &str, temperature: f64) -> String {
        let deadline = Duration::from_secs(self.config.max_opus_timeout_secs);
        let call = self.call(
            &self.config.opus_model,
            self.config.opus_max_tokens,
            system,
            user,
            temperature,
        );
        match timeout(deadline, call).await {
            Ok(Ok((text, _))) => {
                info!(model = %self.config.opus_model, chars = text.len(), "Analysis call complete");
                text
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Analysis call failed");
                String::new()
            }
            Err(_) => {
                warn!(timeout_secs = self.config.max_opus_timeout_secs, "Analysis call timed out");
                String::new()
            }
        }
    }

    /// Compact screener prompt from the snapshot (~500 input tokens).
    fn build_screen_prompt(snapshot: &MarketSnapshot) -> String {
        let mut parts = vec![
            format!("Symbol: {}", snapshot.ticker.symbol),
            format!("Price: {}", snapshot.ticker.last),
            format!("Regime: {}", snapshot.market_regime),
            format!("1H Change: {:.4}", snapshot.price_change_1h),
            format!("Funding: {:.6}", snapshot.funding_rate.current),
            format!("L/S Ratio: {:.2}", snapshot.long_short_ratio),
        ];
        for (tf, ind) in &snapshot.indicators {
            parts.push(format!(
                "[{}] RSI:{} ADX:{} BB:{} EMA:{} MACD:{}",
                tf,
                ind.rsi.map_or("N/A".to_string(), |v| format!("{:.1}", v)),
                ind.adx.map_or("N/A".to_string(), |v| format!("{:.1}", v)),
                ind.bb_position,
                ind.ema_alignment,
                ind.macd_signal,
            ));
        }
        parts.join("\n")
    }
}

#[async_trait]
impl Screener for AnthropicClient {
    async fn screen(&self, snapshot: &MarketSnapshot) -> ScreenResult {
        let prompt = Self::build_screen_prompt(snapshot);
        let started = std::time::Instant::now();
        let call = self.call(
            &self.config.haiku_model,
            self.config.haiku_max_tokens,
            SCREENER_SYSTEM_PROMPT,
            &prompt,
            0.0,
        );
        match call.await {
            Ok((text, tokens)) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                let mut result = match extract_json(&text) {
                    Some(value) => ScreenResult {
                        signal: value["signal"].as_bool().unwrap_or(true),
                        reason: value["reason"].as_str().unwrap_or("").to_string(),
                        tokens_used: 0,
                        latency_ms: 0.0,
                    },
                    None => {
                        warn!(raw = truncate_utf8(&text, 200), "Screener parse error");
                        ScreenResult::fail_open("Parse error: malformed response")
                    }
                };
                result.tokens_used = tokens;
                result.latency_ms = latency_ms;
                info!(signal = result.signal, reason = %result.reason, tokens, "Screen complete");
                result
            }
            Err(e) => {
                warn!(error = %e, "Screener call failed");
                ScreenResult::fail_open(format!("Screener error: {}", e))
            }
        }
    }
}

#[async_trait]
impl Analyst for AnthropicClient {
    async fn analyze(&self, prompt: &str) -> OpusDecision {
        let text = self.call_opus(ANALYSIS_SYSTEM_PROMPT, prompt, 0.2).await;
        if text.is_empty() {
            return OpusDecision::default();
        }
        match extract_json(&text).and_then(|v| serde_json::from_value(v).ok()) {
            Some(decision) => decision,
            None => {
                warn!(raw = truncate_utf8(&text, 200), "Decision parse error, defaulting to HOLD");
                OpusDecision::default()
            }
        }
    }

    async fn reflect_trade(&self, prompt: &str) -> TradeReview {
        let text = self.call_opus(REFLECTION_SYSTEM_PROMPT, prompt, 0.3).await;
        if text.is_empty() {
            return TradeReview::default();
        }
        match extract_json(&text).and_then(|v| serde_json::from_value(v).ok()) {
            Some(review) => review,
            None => {
                warn!(raw = truncate_utf8(&text, 200), "Review parse error");
                TradeReview::default()
            }
        }
    }

    async fn deep_reflect(&self, prompt: &str) -> DeepReflectionResult {
        let text = self
            .call_opus(DEEP_REFLECTION_SYSTEM_PROMPT, prompt, 0.3)
            .await;
        if text.is_empty() {
            return DeepReflectionResult::default();
        }
        match extract_json(&text).and_then(|v| serde_json::from_value(v).ok()) {
            Some(result) => result,
            None => {
                warn!(raw = truncate_utf8(&text, 200), "Deep reflection parse error");
                DeepReflectionResult::default()
            }
        }
    }
}
