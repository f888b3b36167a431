use crate::models::{BacktestResult, ChartPoint, Order, StrategyDefinition, Trade};
use crate::performance::SymbolSummary;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

pub const NET_PROFIT_SERIES: &str = "Net profit";

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub quantity: Decimal,
    pub price: Decimal,
    pub profit: Decimal,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub name: String,
    pub points: Vec<ChartPoint>,
}

/// Everything recovered from a track archive for inspection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackDetails {
    pub trades: Vec<Trade>,
    pub orders: Vec<Order>,
    pub holdings: Vec<Holding>,
    pub symbols: Vec<SymbolSummary>,
    pub charts: Vec<ChartSeries>,
    pub logs: String,
}

impl TrackDetails {
    pub fn from_result(result: &BacktestResult, logs: String, definition: &StrategyDefinition) -> Self {
        let trades = result.total_performance.closed_trades.clone();
        let symbols = summarize_symbols(&trades);

        let mut orders: Vec<Order> = result.orders.values().cloned().collect();
        orders.sort_by_key(|o| o.id);
        let end_time = definition.end_date.and_time(chrono::NaiveTime::MIN).and_utc();
        let holdings = build_holdings(&orders, end_time);

        Self {
            trades,
            orders,
            holdings,
            symbols,
            charts: build_charts(result, definition),
            logs,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty() && self.orders.is_empty() && self.charts.is_empty() && self.logs.is_empty()
    }
}

fn summarize_symbols(trades: &[Trade]) -> Vec<SymbolSummary> {
    let mut groups: Vec<(String, Vec<Trade>)> = Vec::new();
    for trade in trades {
        match groups
            .iter_mut()
            .find(|(symbol, _)| symbol.eq_ignore_ascii_case(&trade.symbol))
        {
            Some((_, list)) => list.push(trade.clone()),
            None => groups.push((trade.symbol.clone(), vec![trade.clone()])),
        }
    }

    groups
        .iter()
        .map(|(symbol, list)| SymbolSummary::from_trades(symbol.clone(), list))
        .collect()
}

/// Net positions left by executed orders, in order id sequence.
pub fn build_holdings(orders: &[Order], end_time: DateTime<Utc>) -> Vec<Holding> {
    let mut holdings: Vec<Holding> = Vec::new();
    for order in orders {
        if !order.status.affects_holdings() {
            continue;
        }

        let position = holdings.iter().position(|h| h.symbol == order.symbol);
        match position {
            None => holdings.push(Holding {
                symbol: order.symbol.clone(),
                quantity: order.quantity,
                price: order.price,
                profit: order.value(),
                duration: order.last_update_time.unwrap_or(end_time) - order.created_time,
            }),
            Some(index) => {
                let holding = &mut holdings[index];
                let quantity = holding.quantity + order.quantity;
                holding.price = if quantity.is_zero() {
                    Decimal::ZERO
                } else {
                    (holding.price * holding.quantity + order.price * order.quantity) / quantity
                };
                holding.quantity = quantity;
                holding.profit += order.value();
                if holding.quantity.is_zero() {
                    holdings.remove(index);
                }
            }
        }
    }

    holdings
}

fn build_charts(result: &BacktestResult, definition: &StrategyDefinition) -> Vec<ChartSeries> {
    let mut profit = definition.initial_capital;
    let mut net_profit = vec![ChartPoint::new(definition.start_time(), profit)];
    for (time, value) in &result.profit_loss {
        profit += *value;
        net_profit.push(ChartPoint::new(*time, profit));
    }

    let mut charts = vec![ChartSeries {
        name: NET_PROFIT_SERIES.to_string(),
        points: net_profit,
    }];

    for (chart_name, chart) in &result.charts {
        for (series_name, series) in &chart.series {
            if series.values.len() < 2 {
                continue;
            }
            let name = if series.name.is_empty() {
                series_name.clone()
            } else {
                series.name.clone()
            };
            log::debug!("Loaded series {} from chart {}", name, chart_name);
            charts.push(ChartSeries {
                name,
                points: series.values.clone(),
            });
        }
    }

    charts
}
