use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Flattened statistics of one run, keyed by display name.
pub type StatisticsMap = BTreeMap<String, Option<Decimal>>;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Resolution {
    Tick,
    Second,
    Minute,
    Hour,
    #[default]
    Daily,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum AlgorithmLanguage {
    #[default]
    CSharp,
    Python,
    FSharp,
    Java,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SymbolRef {
    pub name: String,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub security: Option<String>,
}

impl SymbolRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            market: None,
            security: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub use_value: bool,
    #[serde(default)]
    pub use_range: bool,
    /// Comma separated candidate values, passed to the engine verbatim.
    #[serde(default)]
    pub range: String,
}

impl ParameterSpec {
    pub fn fixed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            use_value: true,
            use_range: false,
            range: String::new(),
        }
    }

    pub fn ranged(name: impl Into<String>, range: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: String::new(),
            use_value: false,
            use_range: true,
            range: range.into(),
        }
    }

    pub fn range_tokens(&self) -> impl Iterator<Item = &str> {
        self.range.split(',')
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StrategyDefinition {
    pub name: String,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub initial_capital: Decimal,
    #[serde(default)]
    pub pcnt_capital_per_position: f64,
    #[serde(default)]
    pub algorithm_location: Option<String>,
    #[serde(default)]
    pub algorithm_name: Option<String>,
    #[serde(default)]
    pub algorithm_language: AlgorithmLanguage,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub symbols: Vec<SymbolRef>,
    #[serde(default)]
    pub strategies: Vec<StrategyDefinition>,
}

impl StrategyDefinition {
    pub fn new(name: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            account: None,
            market: None,
            start_date,
            end_date,
            resolution: Resolution::default(),
            initial_capital: Decimal::ZERO,
            pcnt_capital_per_position: 0.0,
            algorithm_location: None,
            algorithm_name: None,
            algorithm_language: AlgorithmLanguage::default(),
            parameters: Vec::new(),
            symbols: Vec::new(),
            strategies: Vec::new(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn has_algorithm(&self) -> bool {
        self.algorithm_name
            .as_deref()
            .map(|name| !name.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.start_date.and_time(chrono::NaiveTime::MIN))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Trade {
    pub symbol: String,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub profit_loss: Decimal,
    #[serde(default)]
    pub total_fees: Decimal,
    #[serde(rename = "MAE", default)]
    pub mae: Decimal,
    #[serde(rename = "MFE", default)]
    pub mfe: Decimal,
}

impl Trade {
    pub fn net_profit(&self) -> Decimal {
        self.profit_loss - self.total_fees
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderStatus {
    #[default]
    New,
    Submitted,
    PartiallyFilled,
    Filled,
    Canceled,
    None,
    Invalid,
    CancelPending,
    UpdateSubmitted,
}

impl OrderStatus {
    pub fn affects_holdings(self) -> bool {
        !matches!(
            self,
            OrderStatus::Submitted
                | OrderStatus::Canceled
                | OrderStatus::CancelPending
                | OrderStatus::None
                | OrderStatus::New
                | OrderStatus::Invalid
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Order {
    pub id: i64,
    pub symbol: String,
    #[serde(default)]
    pub price: Decimal,
    #[serde(default)]
    pub quantity: Decimal,
    #[serde(default)]
    pub status: OrderStatus,
    pub created_time: DateTime<Utc>,
    #[serde(default)]
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Order {
    pub fn value(&self) -> Decimal {
        self.price * self.quantity
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ChartPoint {
    /// Unix seconds.
    pub x: i64,
    pub y: Decimal,
}

impl ChartPoint {
    pub fn new(time: DateTime<Utc>, value: Decimal) -> Self {
        Self {
            x: time.timestamp(),
            y: value,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Series {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub values: Vec<ChartPoint>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Chart {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub series: BTreeMap<String, Series>,
}

/// Portfolio level statistics reported by the engine. Every field is a named
/// numeric entry in the flattened statistics map.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct PortfolioStatistics {
    pub average_win_rate: Decimal,
    pub average_loss_rate: Decimal,
    pub profit_loss_ratio: Decimal,
    pub win_rate: Decimal,
    pub loss_rate: Decimal,
    pub expectancy: Decimal,
    pub compounding_annual_return: Decimal,
    pub drawdown: Decimal,
    pub total_net_profit: Decimal,
    pub sharpe_ratio: Decimal,
    pub probabilistic_sharpe_ratio: Decimal,
    pub sortino_ratio: Decimal,
    pub alpha: Decimal,
    pub beta: Decimal,
    pub annual_standard_deviation: Decimal,
    pub annual_variance: Decimal,
    pub information_ratio: Decimal,
    pub tracking_error: Decimal,
    pub treynor_ratio: Decimal,
}

impl PortfolioStatistics {
    pub fn entries(&self) -> [(&'static str, Decimal); 19] {
        [
            ("AverageWinRate", self.average_win_rate),
            ("AverageLossRate", self.average_loss_rate),
            ("ProfitLossRatio", self.profit_loss_ratio),
            ("WinRate", self.win_rate),
            ("LossRate", self.loss_rate),
            ("Expectancy", self.expectancy),
            ("CompoundingAnnualReturn", self.compounding_annual_return),
            ("Drawdown", self.drawdown),
            ("TotalNetProfit", self.total_net_profit),
            ("SharpeRatio", self.sharpe_ratio),
            ("ProbabilisticSharpeRatio", self.probabilistic_sharpe_ratio),
            ("SortinoRatio", self.sortino_ratio),
            ("Alpha", self.alpha),
            ("Beta", self.beta),
            ("AnnualStandardDeviation", self.annual_standard_deviation),
            ("AnnualVariance", self.annual_variance),
            ("InformationRatio", self.information_ratio),
            ("TrackingError", self.tracking_error),
            ("TreynorRatio", self.treynor_ratio),
        ]
    }
}

/// Trade level statistics reported by the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TradeStatistics {
    pub total_number_of_trades: Decimal,
    pub number_of_winning_trades: Decimal,
    pub number_of_losing_trades: Decimal,
    pub total_profit_loss: Decimal,
    pub total_profit: Decimal,
    pub total_loss: Decimal,
    pub largest_profit: Decimal,
    pub largest_loss: Decimal,
    pub average_profit_loss: Decimal,
    pub average_profit: Decimal,
    pub average_loss: Decimal,
    pub max_consecutive_winning_trades: Decimal,
    pub max_consecutive_losing_trades: Decimal,
    pub profit_loss_ratio: Decimal,
    pub win_loss_ratio: Decimal,
    pub win_rate: Decimal,
    pub loss_rate: Decimal,
    #[serde(rename = "AverageMAE")]
    pub average_mae: Decimal,
    #[serde(rename = "AverageMFE")]
    pub average_mfe: Decimal,
    #[serde(rename = "LargestMAE")]
    pub largest_mae: Decimal,
    #[serde(rename = "LargestMFE")]
    pub largest_mfe: Decimal,
    pub maximum_closed_trade_drawdown: Decimal,
    pub maximum_intra_trade_drawdown: Decimal,
    pub profit_loss_standard_deviation: Decimal,
    pub profit_loss_downside_deviation: Decimal,
    pub profit_factor: Decimal,
    pub sharpe_ratio: Decimal,
    pub sortino_ratio: Decimal,
    pub profit_to_max_drawdown_ratio: Decimal,
    pub maximum_end_trade_drawdown: Decimal,
    pub average_end_trade_drawdown: Decimal,
    pub total_fees: Decimal,
}

impl TradeStatistics {
    pub fn entries(&self) -> [(&'static str, Decimal); 32] {
        [
            ("TotalNumberOfTrades", self.total_number_of_trades),
            ("NumberOfWinningTrades", self.number_of_winning_trades),
            ("NumberOfLosingTrades", self.number_of_losing_trades),
            ("TotalProfitLoss", self.total_profit_loss),
            ("TotalProfit", self.total_profit),
            ("TotalLoss", self.total_loss),
            ("LargestProfit", self.largest_profit),
            ("LargestLoss", self.largest_loss),
            ("AverageProfitLoss", self.average_profit_loss),
            ("AverageProfit", self.average_profit),
            ("AverageLoss", self.average_loss),
            ("MaxConsecutiveWinningTrades", self.max_consecutive_winning_trades),
            ("MaxConsecutiveLosingTrades", self.max_consecutive_losing_trades),
            ("ProfitLossRatio", self.profit_loss_ratio),
            ("WinLossRatio", self.win_loss_ratio),
            ("WinRate", self.win_rate),
            ("LossRate", self.loss_rate),
            ("AverageMAE", self.average_mae),
            ("AverageMFE", self.average_mfe),
            ("LargestMAE", self.largest_mae),
            ("LargestMFE", self.largest_mfe),
            ("MaximumClosedTradeDrawdown", self.maximum_closed_trade_drawdown),
            ("MaximumIntraTradeDrawdown", self.maximum_intra_trade_drawdown),
            ("ProfitLossStandardDeviation", self.profit_loss_standard_deviation),
            ("ProfitLossDownsideDeviation", self.profit_loss_downside_deviation),
            ("ProfitFactor", self.profit_factor),
            ("SharpeRatio", self.sharpe_ratio),
            ("SortinoRatio", self.sortino_ratio),
            ("ProfitToMaxDrawdownRatio", self.profit_to_max_drawdown_ratio),
            ("MaximumEndTradeDrawdown", self.maximum_end_trade_drawdown),
            ("AverageEndTradeDrawdown", self.average_end_trade_drawdown),
            ("TotalFees", self.total_fees),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct TotalPerformance {
    pub closed_trades: Vec<Trade>,
    pub trade_statistics: TradeStatistics,
    pub portfolio_statistics: PortfolioStatistics,
}

/// Structured result record produced by the backtest engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct BacktestResult {
    pub statistics: BTreeMap<String, String>,
    pub runtime_statistics: BTreeMap<String, String>,
    pub charts: BTreeMap<String, Chart>,
    pub orders: HashMap<String, Order>,
    /// Realised profit keyed by close time.
    pub profit_loss: BTreeMap<DateTime<Utc>, Decimal>,
    pub total_performance: TotalPerformance,
}

impl BacktestResult {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Series lookup ignoring ASCII case on both chart and series names.
    pub fn series(&self, chart: &str, series: &str) -> Option<&Series> {
        self.charts
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(chart))
            .and_then(|(_, chart)| {
                chart
                    .series
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case(series))
                    .map(|(_, series)| series)
            })
    }
}
