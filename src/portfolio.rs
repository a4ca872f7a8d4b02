use crate::error::ValidationError;
use crate::model::{
    display_number, display_text, format_time, Asset, LedgerEntry, MarketType, PortfolioAsset,
    PortfolioSummary, PortfolioView, Transaction, TransactionType,
};
use comfy_table::{
    presets::UTF8_FULL, Attribute, Cell, CellAlignment, Color as TColor, ContentArrangement, Table,
};
use piechart::{Chart, Color};
use std::collections::HashMap;

pub struct Portfolio {
    pub view: PortfolioView,
}

impl Portfolio {
    pub fn from_view(view: PortfolioView) -> Portfolio {
        Portfolio { view }
    }

    pub fn positions(&self) -> &[PortfolioAsset] {
        &self.view.assets
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.view.transactions
    }

    // positions without a close price count as zero
    pub fn get_total_value(&self) -> f64 {
        self.positions()
            .iter()
            .map(|p| p.market_value().unwrap_or(0.0))
            .sum()
    }

    pub fn get_total_invested(&self) -> f64 {
        self.positions()
            .iter()
            .filter_map(|p| p.purchase_price.map(|price| price * p.quantity))
            .sum()
    }

    pub fn holding(&self, asset_id: i64) -> Option<&PortfolioAsset> {
        self.positions().iter().find(|p| p.id == asset_id)
    }

    /// Checks a sell order against the held quantity before it is sent.
    pub fn validate_sell(
        &self,
        asset_id: i64,
        amount: f64,
    ) -> Result<&PortfolioAsset, ValidationError> {
        let holding = self
            .holding(asset_id)
            .ok_or(ValidationError::UnknownHolding(asset_id))?;
        if amount > holding.quantity {
            return Err(ValidationError::ExceedsHolding {
                requested: amount,
                held: holding.quantity,
            });
        }
        Ok(holding)
    }

    // Print the portfolio header and holdings as a table
    pub fn print(&self, include_sum: bool, currency: &str) {
        println!(
            "User: {} | Balance: {} | Profit/Loss: {}",
            self.view.user,
            format_money(self.view.balance, currency),
            format_money(self.view.profit_loss, currency)
        );

        let mut table = new_table(120);
        table.set_header(header(&[
            "Id", "Name", "Ticker", "Quantity", "Purchase", "Price", "Value", "PnL",
        ]));

        for position in self.positions() {
            table.add_row(vec![
                Cell::new(position.id),
                Cell::new(&position.asset.name),
                Cell::new(&position.asset.ticker),
                right(format!("{:.4}", position.quantity)),
                right(optional(position.purchase_price)),
                right(optional(position.asset.close_price)),
                right(optional(position.market_value())),
                signed_cell(position.pnl()),
            ]);
        }

        if include_sum {
            let total_value = self.get_total_value();
            let total_invested = self.get_total_invested();
            table.add_row(vec![
                Cell::new("TOTAL").add_attribute(Attribute::Bold),
                Cell::new(""),
                Cell::new(""),
                Cell::new(""),
                right(format!("{total_invested:.2}")).add_attribute(Attribute::Bold),
                Cell::new(""),
                right(format!("{total_value:.2}")).add_attribute(Attribute::Bold),
                signed_cell(Some(total_value - total_invested)).add_attribute(Attribute::Bold),
            ]);
        }

        println!("{table}");
    }

    pub fn print_transactions(&self) {
        print_transactions(self.transactions());
    }
}

/// Keeps assets of `market` (everything for `None` or `ALL`) whose name or
/// ticker contains `search`, ignoring case.
pub fn filter_assets<'a>(
    assets: &'a [Asset],
    market: Option<&str>,
    search: &str,
) -> Vec<&'a Asset> {
    let search = search.trim().to_lowercase();
    assets
        .iter()
        .filter(|a| match market {
            None | Some("ALL") => true,
            Some(m) => a.market_name() == Some(m),
        })
        .filter(|a| {
            a.name.to_lowercase().contains(&search) || a.ticker.to_lowercase().contains(&search)
        })
        .collect()
}

pub fn print_market_types(markets: &[MarketType]) {
    let mut table = new_table(60);
    table.set_header(header(&["Market"]));
    for market in markets {
        table.add_row(vec![Cell::new(&market.name)]);
    }
    println!("{table}");
}

pub fn print_assets(assets: &[&Asset]) {
    let mut table = new_table(120);
    table.set_header(header(&["Ticker", "Name", "Market", "Close", "%Day"]));
    for asset in assets {
        table.add_row(vec![
            Cell::new(&asset.ticker),
            Cell::new(&asset.name),
            Cell::new(display_text(asset.market_name())),
            right(optional(asset.close_price)),
            match asset.percent_change {
                Some(v) => colored_cell(format!("{v:.2}%"), v),
                None => right("-".to_string()),
            },
        ]);
    }
    println!("{table}");
}

pub fn print_asset_details(asset: &Asset) {
    let mut table = new_table(80);
    for (label, value) in asset.attributes() {
        table.add_row(vec![
            Cell::new(label).add_attribute(Attribute::Bold),
            Cell::new(value),
        ]);
    }
    println!("{table}");
}

pub fn print_transactions(transactions: &[Transaction]) {
    let mut table = new_table(120);
    table.set_header(header(&["Id", "Time", "Type", "Ticker", "Name", "Amount", "Price"]));
    for tx in transactions {
        let color = match tx.kind {
            TransactionType::Buy => TColor::Green,
            TransactionType::Sell => TColor::Red,
        };
        table.add_row(vec![
            Cell::new(tx.id),
            Cell::new(
                tx.timestamp
                    .map(|t| format_time(&t.to_rfc3339()))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(tx.kind).fg(color).add_attribute(Attribute::Bold),
            Cell::new(&tx.asset.ticker),
            Cell::new(&tx.asset.name),
            right(format!("{}", tx.amount)),
            right(format!("{:.2}", tx.price)),
        ]);
    }
    println!("{table}");
}

pub fn print_ledger(entries: &[LedgerEntry]) {
    if entries.is_empty() {
        println!("No transactions yet.");
        return;
    }
    let mut table = new_table(120);
    table.set_header(header(&["Time", "Action", "Ticker", "Name", "Quantity", "Price"]));
    for entry in entries {
        let color = if entry.is_addition() {
            TColor::Green
        } else {
            TColor::Red
        };
        table.add_row(vec![
            Cell::new(
                entry
                    .time
                    .as_deref()
                    .map(format_time)
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(&entry.action).fg(color).add_attribute(Attribute::Bold),
            Cell::new(display_text(entry.ticker.as_deref())),
            Cell::new(display_text(entry.name.as_deref())),
            right(display_number(entry.quantity)),
            right(display_number(entry.price)),
        ]);
    }
    println!("{table}");
}

pub fn print_summary(summary: &PortfolioSummary, fallback_currency: &str) {
    let currency = summary.currency.as_deref().unwrap_or(fallback_currency);
    let mut table = new_table(100);
    table.set_header(header(&["Balance", "Profit", "Profit %", "Loss", "Loss %"]));
    table.add_row(vec![
        right(format_money(summary.balance, currency)),
        right(format_money(summary.profit, currency)).fg(TColor::Green),
        right(format_percent(summary.profit_pct)).fg(TColor::Green),
        right(format_money(summary.loss.map(f64::abs), currency)).fg(TColor::Red),
        right(format_percent(summary.loss_pct)).fg(TColor::Red),
    ]);
    println!("{table}");
}

/// Market names sorted by share, largest first.
pub fn sorted_distribution(distribution: &HashMap<String, f64>) -> Vec<(&String, &f64)> {
    let mut sorted: Vec<(&String, &f64)> = distribution.iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
    sorted
}

// Print the distribution in descending order %-wise
pub fn print_distribution(distribution: &HashMap<String, f64>) {
    println!("====================================");
    for (market, percentage) in sorted_distribution(distribution) {
        println!("{market: >12} | {percentage: >10.2}");
    }
}

pub fn draw_distribution_chart(distribution: &HashMap<String, f64>) {
    let colors = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Cyan,
        Color::White,
        Color::Purple,
        Color::Black,
    ];

    let data: Vec<piechart::Data> = sorted_distribution(distribution)
        .into_iter()
        .enumerate()
        .map(|(i, (market, percentage))| piechart::Data {
            label: market.to_string(),
            value: *percentage as f32,
            color: Some(colors[i % colors.len()].into()),
            fill: '•',
        })
        .collect();

    Chart::new()
        .legend(true)
        .radius(9)
        .aspect_ratio(3)
        .draw(&data);
}

/// Profit against loss as a two-slice pie. Nothing is drawn when both are zero or missing.
pub fn draw_profit_loss_chart(summary: &PortfolioSummary) {
    let data = profit_loss_slices(summary);
    if data.is_empty() {
        return;
    }

    Chart::new()
        .legend(true)
        .radius(6)
        .aspect_ratio(3)
        .draw(&data);
}

fn profit_loss_slices(summary: &PortfolioSummary) -> Vec<piechart::Data> {
    [
        ("Profit", summary.profit, Color::Green),
        ("Loss", summary.loss, Color::Red),
    ]
    .into_iter()
    .filter_map(|(label, value, color)| {
        value
            .map(f64::abs)
            .filter(|v| *v > 0.0)
            .map(|v| piechart::Data {
                label: label.to_string(),
                value: v as f32,
                color: Some(color.into()),
                fill: '•',
            })
    })
    .collect()
}

pub fn format_money(value: Option<f64>, currency: &str) -> String {
    match value {
        Some(v) if currency.is_empty() => format!("{v:.2}"),
        Some(v) => format!("{v:.2} {currency}"),
        None => "-".to_string(),
    }
}

pub fn format_percent(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.2}%"),
        None => "-".to_string(),
    }
}

fn optional(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "-".to_string())
}

fn new_table(width: u16) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_width(width);
    table
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

fn right(text: String) -> Cell {
    Cell::new(text).set_alignment(CellAlignment::Right)
}

fn colored_cell(text: String, v: f64) -> Cell {
    let c = if v >= 0.0 { TColor::Green } else { TColor::Red };
    right(text).fg(c)
}

fn signed_cell(value: Option<f64>) -> Cell {
    match value {
        Some(v) => colored_cell(format!("{v:.2}"), v),
        None => right("-".to_string()),
    }
}
