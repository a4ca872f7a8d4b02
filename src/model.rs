use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketType {
    pub id: Option<i64>,
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    pub id: Option<i64>,
    pub ticker: String,
    pub name: String,
    pub exchange: Option<String>,
    #[serde(alias = "open")]
    pub open_price: Option<f64>,
    #[serde(alias = "high")]
    pub high_price: Option<f64>,
    #[serde(alias = "low")]
    pub low_price: Option<f64>,
    #[serde(alias = "close")]
    pub close_price: Option<f64>,
    pub previous_close: Option<f64>,
    pub percent_change: Option<f64>,
    pub volume: Option<f64>,
    pub price_to_buy: Option<f64>,
    pub price_to_sell: Option<f64>,
    #[serde(alias = "dateTime")]
    pub last_updated: Option<String>,
    pub market_type: Option<MarketType>,
}

impl Asset {
    pub fn market_name(&self) -> Option<&str> {
        self.market_type.as_ref().map(|m| m.name.as_str())
    }

    /// Label used for the close price chart of this asset.
    pub fn chart_label(&self) -> String {
        format!("{} Closing Prices", self.ticker)
    }

    /// Attribute rows shown on the detail view, in display order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Ticker", self.ticker.clone()),
            ("Name", self.name.clone()),
            ("Open Price", display_number(self.open_price)),
            ("Close Price", display_number(self.close_price)),
            ("Low", display_number(self.low_price)),
            ("High", display_number(self.high_price)),
            ("% Change", display_number(self.percent_change)),
            ("Volume", display_number(self.volume)),
            ("Previous Close", display_number(self.previous_close)),
            ("Exchange", display_text(self.exchange.as_deref())),
            ("Market Type", display_text(self.market_name())),
            (
                "Last Updated",
                self.last_updated
                    .as_deref()
                    .map(format_time)
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioAsset {
    pub id: i64,
    pub quantity: f64,
    pub purchase_price: Option<f64>,
    pub profit_asset: Option<f64>,
    pub asset: Asset,
}

impl PortfolioAsset {
    pub fn market_value(&self) -> Option<f64> {
        self.asset.close_price.map(|close| close * self.quantity)
    }

    pub fn pnl(&self) -> Option<f64> {
        match (self.asset.close_price, self.purchase_price) {
            (Some(close), Some(purchase)) => Some((close - purchase) * self.quantity),
            _ => self.profit_asset,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    #[default]
    Buy,
    Sell,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Buy => "BUY",
            TransactionType::Sell => "SELL",
        }
    }

    pub fn toggled(self) -> TransactionType {
        match self {
            TransactionType::Buy => TransactionType::Sell,
            TransactionType::Sell => TransactionType::Buy,
        }
    }
}

impl std::str::FromStr for TransactionType {
    type Err = crate::error::ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "BUY" => Ok(TransactionType::Buy),
            "SELL" => Ok(TransactionType::Sell),
            _ => Err(crate::error::ValidationError::InvalidTransactionType(
                s.to_string(),
            )),
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Transaction {
    pub id: i64,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub amount: f64,
    pub price: f64,
    pub asset: Asset,
}

impl Transaction {
    pub fn describe(&self) -> String {
        format!(
            "{} => {} assets of {} at {} each",
            self.kind, self.amount, self.asset.name, self.price
        )
    }
}

/// Response of `GET /api/portfolio/{userId}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioView {
    pub user: String,
    pub balance: Option<f64>,
    pub profit_loss: Option<f64>,
    pub assets: Vec<PortfolioAsset>,
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PortfolioSummary {
    pub balance: Option<f64>,
    pub profit: Option<f64>,
    pub profit_pct: Option<f64>,
    pub loss: Option<f64>,
    pub loss_pct: Option<f64>,
    pub currency: Option<String>,
}

/// One row of the flat ledger served by `GET /api/portfolio/transactions`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LedgerEntry {
    pub time: Option<String>,
    pub action: String,
    pub ticker: Option<String>,
    pub name: Option<String>,
    pub quantity: Option<f64>,
    pub price: Option<f64>,
}

impl LedgerEntry {
    pub fn is_addition(&self) -> bool {
        self.action.eq_ignore_ascii_case("ADD")
    }
}

pub fn display_number(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v}"),
        None => "-".to_string(),
    }
}

pub fn display_text(value: Option<&str>) -> String {
    match value {
        Some(s) if !s.is_empty() => s.to_string(),
        _ => "-".to_string(),
    }
}

/// Renders an RFC 3339 timestamp in local time; anything else is shown as-is.
pub fn format_time(raw: &str) -> String {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(t) => t
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        Err(_) => raw.to_string(),
    }
}
