use crate::models::{ChartPoint, Trade};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use statrs::statistics::Statistics;

const DAYS_IN_YEAR: f64 = 365.24;
const SCALE_CONSTANT: f64 = 99.0;

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn net_profit(trades: &[Trade]) -> Decimal {
        trades.iter().map(Trade::net_profit).sum()
    }

    /// Walks the trades in the given order and returns the deepest drop from a
    /// running peak together with the longest time spent below that peak.
    pub fn max_drawdown(trades: &[Trade]) -> (Decimal, Duration) {
        let mut period = Duration::zero();
        let Some(first) = trades.first() else {
            return (Decimal::ZERO, period);
        };

        let mut drawdown = Decimal::ZERO;
        let mut top = Decimal::ZERO;
        let mut bottom = Decimal::ZERO;
        let mut close = Decimal::ZERO;
        let mut top_time = first.entry_time;

        for trade in trades {
            if close + trade.mfe > top {
                top = close + trade.mfe;
                bottom = close + trade.profit_loss;
                top_time = trade.exit_time;
            } else {
                bottom = bottom.min(close + trade.mae);
                let span = trade.exit_time - top_time;
                if span > period {
                    period = span;
                }
            }

            drawdown = drawdown.min(bottom - top);
            close += trade.profit_loss;
        }

        (drawdown, period)
    }

    /// Population standard deviation.
    pub fn standard_deviation(values: &[Decimal]) -> Decimal {
        if values.is_empty() {
            return Decimal::ZERO;
        }

        let count = Decimal::from(values.len());
        let avg = values.iter().sum::<Decimal>() / count;
        let sum: Decimal = values.iter().map(|v| (*v - avg) * (*v - avg)).sum();
        let variance = (sum / count).to_f64().unwrap_or(0.0);
        Decimal::from_f64(variance.sqrt()).unwrap_or(Decimal::ZERO)
    }

    pub fn sharpe_like(trades: &[Trade]) -> Decimal {
        let profits: Vec<Decimal> = trades.iter().map(Trade::net_profit).collect();
        let net_profit: Decimal = profits.iter().sum();
        let stddev = Self::standard_deviation(&profits);
        if stddev.is_zero() {
            Decimal::ZERO
        } else {
            net_profit / stddev
        }
    }

    pub fn romad(trades: &[Trade]) -> Decimal {
        let net_profit = Self::net_profit(trades);
        let (drawdown, _) = Self::max_drawdown(trades);
        if drawdown.is_zero() {
            Decimal::ZERO
        } else {
            net_profit / -drawdown
        }
    }

    /// Root mean square distance between the cumulative profit curve and a
    /// straight ramp from zero to the final net profit.
    pub fn linear_deviation(trades: &[Trade]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }

        let count = Decimal::from(trades.len());
        let avg = Self::net_profit(trades) / count;
        let mut profit = Decimal::ZERO;
        let mut ideal = Decimal::ZERO;
        let mut epsilons = Vec::with_capacity(trades.len());
        for trade in trades {
            profit += trade.net_profit();
            ideal += avg;
            epsilons.push((profit - ideal).to_f64().unwrap_or(0.0));
        }

        let rms = epsilons.quadratic_mean();
        if rms.is_finite() {
            rms
        } else {
            0.0
        }
    }

    pub fn trade_score(trades: &[Trade]) -> f64 {
        if trades.is_empty() {
            return 0.0;
        }

        let worst_trade = trades
            .iter()
            .map(|t| t.mae)
            .min()
            .and_then(|mae| mae.to_f64())
            .unwrap_or(0.0);
        let linear_error = -Self::linear_deviation(trades);
        let mut risk = (worst_trade * linear_error).sqrt();
        if !risk.is_finite() {
            risk = 0.0;
        }

        let first = trades.iter().map(|t| t.entry_time).min();
        let last = trades.iter().map(|t| t.exit_time).max();
        let years = match (first, last) {
            (Some(first), Some(last)) => Self::years_between(first, last),
            _ => 0.0,
        };

        let net_profit = Self::net_profit(trades);
        if risk == 0.0 || years == 0.0 {
            return Self::sign(net_profit);
        }

        let raw = net_profit.to_f64().unwrap_or(0.0) / risk / years;
        Self::scale(raw)
    }

    /// Score of an equity curve against the straight line joining its first
    /// and last points.
    pub fn series_score(series: &[ChartPoint]) -> f64 {
        let count = series.len();
        if count < 2 {
            return 0.0;
        }

        let first = series[0].y;
        let last = series[count - 1].y;
        let net_profit = last - first;
        let avg = net_profit / Decimal::from(count - 1);
        let mut ideal = first;
        let mut error = Decimal::ZERO;
        for point in series {
            error += (point.y - ideal).abs();
            ideal += avg;
        }

        if error.is_zero() {
            return Self::sign(net_profit);
        }

        let raw = (net_profit * Decimal::from(count) / error)
            .to_f64()
            .unwrap_or(0.0);
        Self::scale(raw)
    }

    /// Share of points, after the first, that do not set a new high.
    pub fn ath_score(series: &[ChartPoint]) -> f64 {
        let Some(first) = series.first() else {
            return 0.0;
        };

        let mut ath = first.y;
        let mut below = 0usize;
        for point in &series[1..] {
            if point.y > ath {
                ath = point.y;
            } else {
                below += 1;
            }
        }

        below as f64 / series.len() as f64
    }

    pub fn scale(x: f64) -> f64 {
        x / (SCALE_CONSTANT + x * x).sqrt()
    }

    pub fn round_significant(value: Decimal, digits: u32) -> Decimal {
        value.round_sf(digits).unwrap_or(value)
    }

    pub fn score_to_decimal(score: f64) -> Option<Decimal> {
        Decimal::from_f64(score).map(|d| Self::round_significant(d, 4))
    }

    fn years_between(first: DateTime<Utc>, last: DateTime<Utc>) -> f64 {
        let seconds = (last - first).num_milliseconds() as f64 / 1000.0;
        seconds / (DAYS_IN_YEAR * 24.0 * 60.0 * 60.0)
    }

    fn sign(value: Decimal) -> f64 {
        if value.is_zero() {
            0.0
        } else if value.is_sign_negative() {
            -1.0
        } else {
            1.0
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolSummary {
    pub symbol: String,
    pub trades: usize,
    pub net_profit: Decimal,
    pub drawdown: Decimal,
    pub drawdown_period: Duration,
    pub romad: Decimal,
    pub score: Decimal,
}

impl SymbolSummary {
    pub fn from_trades(symbol: impl Into<String>, trades: &[Trade]) -> Self {
        let (drawdown, period) = PerformanceCalculator::max_drawdown(trades);
        let score = Decimal::from_f64(PerformanceCalculator::trade_score(trades))
            .unwrap_or(Decimal::ZERO);
        Self {
            symbol: symbol.into(),
            trades: trades.len(),
            net_profit: PerformanceCalculator::round_significant(
                PerformanceCalculator::net_profit(trades),
                2,
            ),
            drawdown: PerformanceCalculator::round_significant(drawdown, 2),
            drawdown_period: period,
            romad: PerformanceCalculator::round_significant(
                PerformanceCalculator::romad(trades),
                4,
            ),
            score: PerformanceCalculator::round_significant(score, 4),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackSummary {
    pub trades: usize,
    pub net_profit: Decimal,
    pub drawdown: Decimal,
    pub drawdown_period: Duration,
    pub romad: Decimal,
    pub sharpe: Decimal,
    pub score: f64,
}

impl TrackSummary {
    pub fn from_trades(trades: &[Trade]) -> Self {
        let (drawdown, period) = PerformanceCalculator::max_drawdown(trades);
        Self {
            trades: trades.len(),
            net_profit: PerformanceCalculator::net_profit(trades),
            drawdown,
            drawdown_period: period,
            romad: PerformanceCalculator::romad(trades),
            sharpe: PerformanceCalculator::sharpe_like(trades),
            score: PerformanceCalculator::trade_score(trades),
        }
    }
}
