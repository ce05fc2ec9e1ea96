//! IndicatorSet computation over an OHLCV window.
//!
//! RSI / MACD / Bollinger / EMA / ATR / OBV come from the `ta` crate; ADX,
//! StochRSI, VWAP, Ichimoku and support/resistance are computed here since
//! the crate does not provide them. Every helper returns `None` when the
//! window is too short, and the caller carries that absence through.

use crate::domain::market::Candle;
use crate::domain::market::indicator_set::{
    BollingerValues, IchimokuValues, IndicatorSet, MacdValues, StochRsiValues,
};
use rust_decimal::prelude::ToPrimitive;
use std::collections::BTreeMap;
use ta::indicators::{
    AverageTrueRange, BollingerBands, ExponentialMovingAverage,
    MovingAverageConvergenceDivergence, OnBalanceVolume, RelativeStrengthIndex,
};
use ta::{DataItem, Next};

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BB_PERIOD: usize = 20;
const BB_STD: f64 = 2.0;
const EMA_PERIODS: [usize; 3] = [20, 50, 200];
const ATR_PERIOD: usize = 14;
const ADX_PERIOD: usize = 14;
const STOCH_RSI_PERIOD: usize = 14;
const STOCH_SMOOTH: usize = 3;
const ICHIMOKU_TENKAN: usize = 9;
const ICHIMOKU_KIJUN: usize = 26;
const ICHIMOKU_SENKOU_B: usize = 52;
const VOLUME_AVG_WINDOW: usize = 20;
const SWING_LOOKBACK: usize = 50;
const SWING_WING: usize = 2;

#[derive(Debug, Default)]
pub struct TechnicalIndicators;

struct Ohlcv {
    open: Vec<f64>,
    high: Vec<f64>,
    low: Vec<f64>,
    close: Vec<f64>,
    volume: Vec<f64>,
}

impl Ohlcv {
    fn from_candles(candles: &[Candle]) -> Self {
        let mut series = Ohlcv {
            open: Vec::with_capacity(candles.len()),
            high: Vec::with_capacity(candles.len()),
            low: Vec::with_capacity(candles.len()),
            close: Vec::with_capacity(candles.len()),
            volume: Vec::with_capacity(candles.len()),
        };
        for candle in candles {
            series.open.push(candle.open.to_f64().unwrap_or(0.0));
            series.high.push(candle.high.to_f64().unwrap_or(0.0));
            series.low.push(candle.low.to_f64().unwrap_or(0.0));
            series.close.push(candle.close.to_f64().unwrap_or(0.0));
            series.volume.push(candle.volume.to_f64().unwrap_or(0.0));
        }
        series
    }

    fn len(&self) -> usize {
        self.close.len()
    }

    fn items(&self) -> Vec<DataItem> {
        (0..self.len())
            .filter_map(|i| {
                DataItem::builder()
                    .open(self.open[i])
                    .high(self.high[i])
                    .low(self.low[i])
                    .close(self.close[i])
                    .volume(self.volume[i])
                    .build()
                    .ok()
            })
            .collect()
    }
}

impl TechnicalIndicators {
    pub fn new() -> Self {
        Self
    }

    pub fn compute(&self, candles: &[Candle]) -> IndicatorSet {
        let series = Ohlcv::from_candles(candles);
        let mut set = IndicatorSet::default();
        if series.len() < 2 {
            return set;
        }

        set.rsi = self.rsi(&series.close, RSI_PERIOD);
        set.macd = self.macd(&series.close);
        set.bollinger = self.bollinger(&series.close);
        set.ema = self.emas(&series.close);
        set.atr = self.atr(&series);
        set.vwap = self.vwap(&series);
        set.adx = self.adx(&series, ADX_PERIOD);
        set.stoch_rsi = self.stoch_rsi(&series.close);
        set.obv = self.obv(&series);
        set.ichimoku = self.ichimoku(&series);
        let (support, resistance) = self.support_resistance(&series);
        set.support_levels = support;
        set.resistance_levels = resistance;
        set.volume_ratio = self.volume_ratio(&series.volume);

        let last_close = *series.close.last().unwrap_or(&0.0);
        set.bb_position = bb_position(last_close, set.bollinger.as_ref());
        set.ema_alignment = ema_alignment(&set.ema);
        set.macd_signal = macd_signal(set.macd.as_ref());
        set
    }

    fn rsi(&self, closes: &[f64], period: usize) -> Option<f64> {
        if closes.len() < period + 1 {
            return None;
        }
        let mut rsi = RelativeStrengthIndex::new(period).ok()?;
        Some(closes.iter().fold(0.0, |_, &price| rsi.next(price)))
    }

    fn macd(&self, closes: &[f64]) -> Option<MacdValues> {
        if closes.len() < MACD_SLOW + MACD_SIGNAL {
            return None;
        }
        let mut macd =
            MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL).ok()?;
        let mut out = None;
        for &price in closes {
            let value = macd.next(price);
            out = Some(MacdValues {
                line: value.macd,
                signal: value.signal,
                histogram: value.histogram,
            });
        }
        out
    }

    fn bollinger(&self, closes: &[f64]) -> Option<BollingerValues> {
        if closes.len() < BB_PERIOD {
            return None;
        }
        let mut bb = BollingerBands::new(BB_PERIOD, BB_STD).ok()?;
        let mut out = None;
        for &price in closes {
            let value = bb.next(price);
            out = Some(BollingerValues {
                upper: value.upper,
                middle: value.average,
                lower: value.lower,
            });
        }
        out
    }

    fn emas(&self, closes: &[f64]) -> BTreeMap<u32, f64> {
        let mut out = BTreeMap::new();
        for period in EMA_PERIODS {
            if closes.len() < period {
                continue;
            }
            if let Ok(mut ema) = ExponentialMovingAverage::new(period) {
                let value = closes.iter().fold(0.0, |_, &price| ema.next(price));
                out.insert(period as u32, value);
            }
        }
        out
    }

    fn atr(&self, series: &Ohlcv) -> Option<f64> {
        if series.len() < ATR_PERIOD + 1 {
            return None;
        }
        let mut atr = AverageTrueRange::new(ATR_PERIOD).ok()?;
        let mut out = None;
        for item in series.items() {
            out = Some(atr.next(&item));
        }
        out
    }

    fn obv(&self, series: &Ohlcv) -> Option<f64> {
        let mut obv = OnBalanceVolume::new();
        let mut out = None;
        for item in series.items() {
            out = Some(obv.next(&item));
        }
        out
    }

    /// Volume-weighted average price over the full window.
    fn vwap(&self, series: &Ohlcv) -> Option<f64> {
        let mut pv_sum = 0.0;
        let mut vol_sum = 0.0;
        for i in 0..series.len() {
            let typical = (series.high[i] + series.low[i] + series.close[i]) / 3.0;
            pv_sum += typical * series.volume[i];
            vol_sum += series.volume[i];
        }
        (vol_sum > 0.0).then_some(pv_sum / vol_sum)
    }

    /// Wilder's ADX.
    fn adx(&self, series: &Ohlcv, period: usize) -> Option<f64> {
        let n = series.len();
        if n < period * 2 + 1 {
            return None;
        }

        let mut trs = Vec::with_capacity(n - 1);
        let mut plus_dms = Vec::with_capacity(n - 1);
        let mut minus_dms = Vec::with_capacity(n - 1);
        for i in 1..n {
            let up_move = series.high[i] - series.high[i - 1];
            let down_move = series.low[i - 1] - series.low[i];
            plus_dms.push(if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 });
            minus_dms.push(if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 });
            let tr = (series.high[i] - series.low[i])
                .max((series.high[i] - series.close[i - 1]).abs())
                .max((series.low[i] - series.close[i - 1]).abs());
            trs.push(tr);
        }

        let p = period as f64;
        let mut tr_s: f64 = trs[..period].iter().sum();
        let mut plus_s: f64 = plus_dms[..period].iter().sum();
        let mut minus_s: f64 = minus_dms[..period].iter().sum();

        let di = |plus: f64, minus: f64, tr: f64| -> (f64, f64) {
            if tr <= 0.0 {
                return (0.0, 0.0);
            }
            (100.0 * plus / tr, 100.0 * minus / tr)
        };

        let dx_of = |plus_di: f64, minus_di: f64| -> f64 {
            let sum = plus_di + minus_di;
            if sum <= 0.0 {
                return 0.0;
            }
            100.0 * (plus_di - minus_di).abs() / sum
        };

        let (plus_di, minus_di) = di(plus_s, minus_s, tr_s);
        let mut dxs = vec![dx_of(plus_di, minus_di)];

        for i in period..trs.len() {
            tr_s = tr_s - tr_s / p + trs[i];
            plus_s = plus_s - plus_s / p + plus_dms[i];
            minus_s = minus_s - minus_s / p + minus_dms[i];
            let (plus_di, minus_di) = di(plus_s, minus_s, tr_s);
            dxs.push(dx_of(plus_di, minus_di));
        }

        let mut adx: f64 = dxs[..period].iter().sum::<f64>() / p;
        for &dx in &dxs[period..] {
            adx = (adx * (p - 1.0) + dx) / p;
        }
        Some(adx)
    }

    fn stoch_rsi(&self, closes: &[f64]) -> Option<StochRsiValues> {
        let needed = STOCH_RSI_PERIOD * 2 + STOCH_SMOOTH * 2;
        if closes.len() < needed {
            return None;
        }
        let mut rsi = RelativeStrengthIndex::new(STOCH_RSI_PERIOD).ok()?;
        let rsis: Vec<f64> = closes.iter().map(|&price| rsi.next(price)).collect();
        // Discard the warmup region of the RSI itself.
        let rsis = &rsis[STOCH_RSI_PERIOD..];

        let mut stochs = Vec::new();
        for i in STOCH_RSI_PERIOD - 1..rsis.len() {
            let window = &rsis[i + 1 - STOCH_RSI_PERIOD..=i];
            let min = window.iter().cloned().fold(f64::MAX, f64::min);
            let max = window.iter().cloned().fold(f64::MIN, f64::max);
            let stoch = if max - min > f64::EPSILON {
                (rsis[i] - min) / (max - min) * 100.0
            } else {
                50.0
            };
            stochs.push(stoch);
        }
        if stochs.len() < STOCH_SMOOTH * 2 {
            return None;
        }

        let sma = |values: &[f64], period: usize| -> Vec<f64> {
            (period - 1..values.len())
                .map(|i| values[i + 1 - period..=i].iter().sum::<f64>() / period as f64)
                .collect()
        };
        let k_series = sma(&stochs, STOCH_SMOOTH);
        let d_series = sma(&k_series, STOCH_SMOOTH);
        Some(StochRsiValues {
            k: *k_series.last()?,
            d: *d_series.last()?,
        })
    }

    fn ichimoku(&self, series: &Ohlcv) -> Option<IchimokuValues> {
        if series.len() < ICHIMOKU_SENKOU_B {
            return None;
        }
        let midpoint = |window: usize| -> f64 {
            let start = series.len() - window;
            let hh = series.high[start..].iter().cloned().fold(f64::MIN, f64::max);
            let ll = series.low[start..].iter().cloned().fold(f64::MAX, f64::min);
            (hh + ll) / 2.0
        };
        let tenkan = midpoint(ICHIMOKU_TENKAN);
        let kijun = midpoint(ICHIMOKU_KIJUN);
        Some(IchimokuValues {
            tenkan,
            kijun,
            senkou_a: (tenkan + kijun) / 2.0,
            senkou_b: midpoint(ICHIMOKU_SENKOU_B),
            chikou: *series.close.last()?,
        })
    }

    /// Swing highs/lows over the recent window; the three most recent of
    /// each become resistance/support.
    fn support_resistance(&self, series: &Ohlcv) -> (Vec<f64>, Vec<f64>) {
        let n = series.len();
        if n < SWING_WING * 2 + 1 {
            return (Vec::new(), Vec::new());
        }
        let start = n.saturating_sub(SWING_LOOKBACK);
        let mut support = Vec::new();
        let mut resistance = Vec::new();
        for i in (start + SWING_WING)..(n - SWING_WING) {
            let is_high = (1..=SWING_WING)
                .all(|w| series.high[i] >= series.high[i - w] && series.high[i] >= series.high[i + w]);
            let is_low = (1..=SWING_WING)
                .all(|w| series.low[i] <= series.low[i - w] && series.low[i] <= series.low[i + w]);
            if is_high {
                resistance.push(series.high[i]);
            }
            if is_low {
                support.push(series.low[i]);
            }
        }
        let tail = |mut levels: Vec<f64>| -> Vec<f64> {
            let keep = levels.len().saturating_sub(3);
            levels.drain(..keep);
            levels
        };
        (tail(support), tail(resistance))
    }

    fn volume_ratio(&self, volumes: &[f64]) -> f64 {
        if volumes.len() < 2 {
            return 1.0;
        }
        let window = &volumes[volumes.len().saturating_sub(VOLUME_AVG_WINDOW)..];
        let avg = window.iter().sum::<f64>() / window.len() as f64;
        if avg > 0.0 {
            volumes[volumes.len() - 1] / avg
        } else {
            1.0
        }
    }
}

fn bb_position(close: f64, bollinger: Option<&BollingerValues>) -> String {
    let Some(bb) = bollinger else {
        return "middle".to_string();
    };
    if close > bb.upper {
        "above_upper"
    } else if close > bb.middle {
        "upper_half"
    } else if close > bb.lower {
        "lower_half"
    } else {
        "below_lower"
    }
    .to_string()
}

fn ema_alignment(emas: &BTreeMap<u32, f64>) -> String {
    let (Some(e20), Some(e50), Some(e200)) = (emas.get(&20), emas.get(&50), emas.get(&200)) else {
        return "neutral".to_string();
    };
    if e20 > e50 && e50 > e200 {
        "bullish".to_string()
    } else if e20 < e50 && e50 < e200 {
        "bearish".to_string()
    } else {
        "mixed".to_string()
    }
}

fn macd_signal(macd: Option<&MacdValues>) -> String {
    let Some(macd) = macd else {
        return "neutral".to_string();
    };
    if macd.line > macd.signal && macd.histogram > 0.0 {
        "bullish".to_string()
    } else if macd.line < macd.signal && macd.histogram < 0.0 {
        "bearish".to_string()
    } else {
        "neutral".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn make_candles(count: usize, trend: f64) -> Vec<Candle> {
        let base = Utc::now();
        (0..count)
            .map(|i| {
                let price = 100.0 + i as f64 * trend + ((i * 7) % 5) as f64 * 0.3;
                Candle {
                    time: base + Duration::hours(4 * i as i64),
                    symbol: "BTC-USDT-SWAP".to_string(),
                    timeframe: Timeframe::FourHour,
                    open: Decimal::from_f64(price - 0.2).unwrap(),
                    high: Decimal::from_f64(price + 1.0).unwrap(),
                    low: Decimal::from_f64(price - 1.0).unwrap(),
                    close: Decimal::from_f64(price).unwrap(),
                    volume: Decimal::from_f64(1000.0 + (i % 10) as f64 * 50.0).unwrap(),
                }
            })
            .collect()
    }

    #[test]
    fn test_full_window_computes_everything() {
        let candles = make_candles(200, 0.5);
        let set = TechnicalIndicators::new().compute(&candles);
        assert!(set.rsi.is_some());
        assert!(set.macd.is_some());
        assert!(set.bollinger.is_some());
        assert_eq!(set.ema.len(), 3);
        assert!(set.atr.is_some());
        assert!(set.vwap.is_some());
        assert!(set.adx.is_some());
        assert!(set.stoch_rsi.is_some());
        assert!(set.obv.is_some());
        assert!(set.ichimoku.is_some());
        assert!(set.volume_ratio > 0.0);
    }

    #[test]
    fn test_short_window_yields_absent_fields() {
        let candles = make_candles(10, 0.5);
        let set = TechnicalIndicators::new().compute(&candles);
        assert!(set.macd.is_none());
        assert!(set.adx.is_none());
        assert!(set.ichimoku.is_none());
        assert!(set.ema.get(&200).is_none());
        // Derived signals degrade to neutral rather than erroring.
        assert_eq!(set.ema_alignment, "neutral");
        assert_eq!(set.macd_signal, "neutral");
    }

    #[test]
    fn test_uptrend_reads_bullish() {
        let candles = make_candles(220, 1.0);
        let set = TechnicalIndicators::new().compute(&candles);
        assert_eq!(set.ema_alignment, "bullish");
        let rsi = set.rsi.unwrap();
        assert!(rsi > 50.0, "uptrend RSI should be above 50, got {rsi}");
    }

    #[test]
    fn test_downtrend_reads_bearish() {
        let candles = make_candles(220, -0.3);
        let set = TechnicalIndicators::new().compute(&candles);
        assert_eq!(set.ema_alignment, "bearish");
    }

    #[test]
    fn test_empty_input() {
        let set = TechnicalIndicators::new().compute(&[]);
        assert!(set.rsi.is_none());
        assert_eq!(set.volume_ratio, 1.0);
    }

    #[test]
    fn test_bb_position_buckets() {
        let bb = BollingerValues {
            upper: 110.0,
            middle: 100.0,
            lower: 90.0,
        };
        assert_eq!(bb_position(115.0, Some(&bb)), "above_upper");
        assert_eq!(bb_position(105.0, Some(&bb)), "upper_half");
        assert_eq!(bb_position(95.0, Some(&bb)), "lower_half");
        assert_eq!(bb_position(85.0, Some(&bb)), "below_lower");
        assert_eq!(bb_position(100.0, None), "middle");
    }
}
