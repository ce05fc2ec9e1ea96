//! Perplexity research adapter with a 1-hour exact-query cache.
//!
//! Transient HTTP failures are retried by the middleware; anything that
//! survives the retries degrades to an empty research result so the decision
//! cycle proceeds without research context.

use crate::config::LlmConfig;
use crate::domain::decision::ResearchResult;
use crate::domain::ports::ResearchProvider;
use crate::domain::repositories::ResearchCacheRepository;
use crate::infrastructure::llm::extract_json;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const API_URL: &str = "https://api.perplexity.ai/chat/completions";
const CACHE_TTL_SECONDS: i64 = 3600;

const RESEARCH_SYSTEM_PROMPT: &str = "\
You are a crypto market research analyst.
Provide concise, factual analysis. Include:
1. Key facts & data points
2. Market sentiment assessment (bullish/bearish/neutral)
3. Potential impact on BTC/ETH price (high/medium/low)
4. Time horizon of impact (immediate/short/medium term)
5. Sources cited
Respond in structured JSON format.";

pub struct PerplexityClient {
    http: ClientWithMiddleware,
    config: LlmConfig,
    cache: Arc<dyn ResearchCacheRepository>,
}

impl PerplexityClient {
    pub fn new(config: LlmConfig, cache: Arc<dyn ResearchCacheRepository>) -> Result<Self> {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_secs(1), Duration::from_secs(10))
            .build_with_max_retries(3);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        let http = ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            http,
            config,
            cache,
        })
    }

    async fn call_api(&self, query: &str) -> Result<Value> {
        let body = json!({
            "model": self.config.perplexity_model,
            "messages": [
                {"role": "system", "content": RESEARCH_SYSTEM_PROMPT},
                {"role": "user", "content": query},
            ],
        });

        let response = self
            .http
            .post(API_URL)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.perplexity_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Research API request failed")?
            .error_for_status()
            .context("Research API returned an error status")?;

        let value: Value = response.json().await.context("Malformed API response")?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("");
        extract_json(content).context("Research content is not JSON")
    }

    fn build_result(query: &str, raw: &Value) -> ResearchResult {
        let strings = |key: &str| -> Vec<String> {
            raw.get(key)
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        ResearchResult {
            query: query.to_string(),
            summary: raw["summary"].as_str().unwrap_or("").to_string(),
            sentiment: raw["sentiment"].as_str().unwrap_or("neutral").to_string(),
            impact_level: raw["impact_level"].as_str().unwrap_or("low").to_string(),
            time_horizon: raw["time_horizon"].as_str().unwrap_or("medium").to_string(),
            key_points: strings("key_points"),
            trading_implication: raw["trading_implication"].as_str().unwrap_or("").to_string(),
            confidence: raw["confidence"].as_f64().unwrap_or(0.0),
            sources: strings("sources"),
            timestamp: chrono::Utc::now(),
        }
    }
}

#[async_trait]
impl ResearchProvider for PerplexityClient {
    async fn research(&self, query: &str) -> ResearchResult {
        match self.cache.get_cached(query, CACHE_TTL_SECONDS).await {
            Ok(Some(cached)) => {
                info!(query = &query[..query.len().min(50)], "Research cache hit");
                if let Ok(result) = serde_json::from_value::<ResearchResult>(cached) {
                    return result;
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Research cache read failed"),
        }

        let raw = match self.call_api(query).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "Research call failed, returning empty");
                return ResearchResult::empty(query);
            }
        };

        let result = Self::build_result(query, &raw);
        match serde_json::to_value(&result) {
            Ok(value) => {
                if let Err(e) = self.cache.save(query, value).await {
                    warn!(error = %e, "Research cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "Research result serialization failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_result_maps_fields() {
        let raw = json!({
            "summary": "ETF inflows accelerating",
            "sentiment": "bullish",
            "impact_level": "high",
            "key_points": ["inflow record", "supply squeeze"],
            "confidence": 0.7,
            "sources": ["example.com"],
        });
        let result = PerplexityClient::build_result("btc etf news", &raw);
        assert_eq!(result.sentiment, "bullish");
        assert_eq!(result.key_points.len(), 2);
        assert_eq!(result.time_horizon, "medium");
        assert_eq!(result.confidence, 0.7);
    }

    #[test]
    fn test_build_result_defaults_on_empty() {
        let result = PerplexityClient::build_result("q", &json!({}));
        assert_eq!(result.sentiment, "neutral");
        assert_eq!(result.impact_level, "low");
        assert!(result.key_points.is_empty());
    }
}
