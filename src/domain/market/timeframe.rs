use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle timeframes supported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    FiveMin,
    #[serde(rename = "15m")]
    FifteenMin,
    #[serde(rename = "1H")]
    OneHour,
    #[serde(rename = "4H")]
    FourHour,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
        }
    }

    pub fn to_seconds(&self) -> i64 {
        self.to_minutes() * 60
    }

    /// OKX REST `bar` parameter / config string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1H",
            Timeframe::FourHour => "4H",
        }
    }

    /// OKX public WebSocket candle channel name.
    pub fn ws_channel(&self) -> &'static str {
        match self {
            Timeframe::FiveMin => "candle5m",
            Timeframe::FifteenMin => "candle15m",
            Timeframe::OneHour => "candle1H",
            Timeframe::FourHour => "candle4H",
        }
    }

    /// Parse a WS channel name back to a timeframe.
    pub fn from_ws_channel(channel: &str) -> Option<Timeframe> {
        match channel {
            "candle5m" => Some(Timeframe::FiveMin),
            "candle15m" => Some(Timeframe::FifteenMin),
            "candle1H" => Some(Timeframe::OneHour),
            "candle4H" => Some(Timeframe::FourHour),
            _ => None,
        }
    }

    /// Aligns a millisecond timestamp down to the start of its period.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let period_ms = self.to_seconds() * 1000;
        timestamp_ms - timestamp_ms.rem_euclid(period_ms)
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "5m" => Ok(Timeframe::FiveMin),
            "15m" => Ok(Timeframe::FifteenMin),
            "1h" => Ok(Timeframe::OneHour),
            "4h" => Ok(Timeframe::FourHour),
            _ => Err(anyhow!(
                "Invalid timeframe: '{}'. Valid options: 5m, 15m, 1H, 4H",
                s
            )),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_minutes() {
        assert_eq!(Timeframe::FiveMin.to_minutes(), 5);
        assert_eq!(Timeframe::FifteenMin.to_minutes(), 15);
        assert_eq!(Timeframe::OneHour.to_minutes(), 60);
        assert_eq!(Timeframe::FourHour.to_minutes(), 240);
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Timeframe::from_str("5m").unwrap(), Timeframe::FiveMin);
        assert_eq!(Timeframe::from_str("1H").unwrap(), Timeframe::OneHour);
        assert_eq!(Timeframe::from_str("4h").unwrap(), Timeframe::FourHour);
        assert!(Timeframe::from_str("1d").is_err());
    }

    #[test]
    fn test_ws_channel_roundtrip() {
        for tf in [
            Timeframe::FiveMin,
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
        ] {
            assert_eq!(Timeframe::from_ws_channel(tf.ws_channel()), Some(tf));
        }
        assert_eq!(Timeframe::from_ws_channel("tickers"), None);
    }

    #[test]
    fn test_period_start() {
        let tf = Timeframe::FiveMin;
        // 2024-01-01 00:00:00 UTC
        let base = 1704067200000i64;
        assert_eq!(tf.period_start(base), base);
        assert_eq!(tf.period_start(base + 3 * 60 * 1000), base);
        assert_eq!(tf.period_start(base + 7 * 60 * 1000), base + 5 * 60 * 1000);
    }
}
