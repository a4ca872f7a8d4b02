use crate::api::{ApiClient, DEFAULT_CLOSES_PATH};
use crate::chart::{load_close_chart, ChartSink, TerminalChart};
use crate::error::{parse_price, parse_quantity, ApiError};
use crate::model::TransactionType;
use crate::portfolio::Portfolio;

use clap::{arg, value_parser, ArgMatches, Command};
use colored::Colorize;
use eyre::{eyre, WrapErr};
use serde::Deserialize;
use serde::Serialize;

mod api;
mod chart;
mod error;
mod history;
mod model;
mod portfolio;
mod tui;

const APP_NAME: &str = "folio_view";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Config {
    api_base: String,
    closes_path: String,
    user_id: i64,
    currency: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080".to_string(),
            closes_path: DEFAULT_CLOSES_PATH.to_string(),
            user_id: 1,
            currency: "USD".to_string(),
        }
    }
}

fn cli() -> Command {
    Command::new(APP_NAME)
        .about("Browse assets and manage your portfolio from the terminal")
        .arg_required_else_help(true)
        .arg(
            arg!(--user <ID> "User id to act as (overrides the config file)")
                .global(true)
                .value_parser(value_parser!(i64)),
        )
        .subcommand(Command::new("config").about("Print the path to the config file"))
        .subcommand(Command::new("markets").about("List market types"))
        .subcommand(
            Command::new("assets")
                .about("List tradable assets")
                .arg(arg!(-m --market <NAME> "Only show assets of this market type"))
                .arg(arg!(-s --search <TEXT> "Only show assets whose name or ticker contains TEXT")),
        )
        .subcommand(
            Command::new("details")
                .about("Show an asset and a chart of its recent closes")
                .arg(arg!(<TICKER> "Ticker symbol, e.g. AAPL")),
        )
        .subcommand(Command::new("portfolio").about("Show holdings, balance and transactions"))
        .subcommand(Command::new("summary").about("Show balance, profit and loss"))
        .subcommand(Command::new("distribution").about("Show the portfolio split by market type"))
        .subcommand(Command::new("history").about("Show the transaction history"))
        .subcommand(
            Command::new("buy")
                .about("Buy an asset")
                .arg(arg!(<TICKER> "Ticker symbol"))
                .arg(arg!(<AMOUNT> "Quantity to buy"))
                .arg(arg!(<PRICE> "Price per unit")),
        )
        .subcommand(
            Command::new("sell")
                .about("Sell part of a holding")
                .arg(arg!(<ASSET_ID> "Holding id as shown by `portfolio`").value_parser(value_parser!(i64)))
                .arg(arg!(<AMOUNT> "Quantity to sell"))
                .arg(arg!([PRICE] "Price per unit (defaults to the last close)")),
        )
        .subcommand(
            Command::new("edit")
                .about("Edit a transaction")
                .arg(arg!(<TX_ID> "Transaction id").value_parser(value_parser!(i64)))
                .arg(arg!(<AMOUNT> "New quantity"))
                .arg(arg!(<PRICE> "New price"))
                .arg(arg!(<TYPE> "BUY or SELL")),
        )
        .subcommand(
            Command::new("delete")
                .about("Delete a transaction")
                .arg(arg!(<TX_ID> "Transaction id").value_parser(value_parser!(i64))),
        )
        .subcommand(
            Command::new("tui")
                .about("Start the interactive terminal UI")
                .arg(arg!(--tab <NAME> "Tab to open first: assets, details, portfolio, ledger")),
        )
}

fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp(None)
        .init();
}

fn required<'a>(matches: &'a ArgMatches, name: &str) -> &'a str {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .unwrap_or_default()
}

async fn show_details(client: &ApiClient, ticker: &str) -> eyre::Result<()> {
    let asset = match client.asset(ticker).await {
        Ok(asset) => asset,
        Err(e) if e.is_not_found() => return Err(eyre!("Unknown ticker {ticker}")),
        Err(e) => return Err(e).wrap_err("Error loading asset details"),
    };
    portfolio::print_asset_details(&asset);

    match load_close_chart(client, &asset).await {
        Some(series) => TerminalChart::stdout().render(&series),
        None => println!("{}", "No chart data available.".dimmed()),
    }
    Ok(())
}

// The summary page still renders when one of its sources is down.
fn or_empty<T: Default>(what: &str, result: Result<T, ApiError>) -> T {
    result.unwrap_or_else(|e| {
        log::warn!("{what} unavailable: {e}");
        T::default()
    })
}

async fn show_summary(client: &ApiClient, currency: &str) -> eyre::Result<()> {
    let (summary, assets, ledger) = futures::join!(
        client.summary(),
        client.portfolio_assets(),
        client.ledger()
    );

    match summary {
        Ok(summary) => {
            portfolio::print_summary(&summary, currency);
            portfolio::draw_profit_loss_chart(&summary);
        }
        Err(e) => {
            log::warn!("summary unavailable: {e}");
            println!("Balance: -");
        }
    }
    let assets = or_empty("portfolio assets", assets);
    if assets.is_empty() {
        println!("No assets in portfolio.");
    } else {
        portfolio::print_assets(&assets.iter().collect::<Vec<_>>());
    }
    portfolio::print_ledger(&or_empty("ledger", ledger));
    Ok(())
}

async fn run(cfg: Config, matches: ArgMatches) -> eyre::Result<()> {
    let client = ApiClient::new(&cfg.api_base, &cfg.closes_path);
    let user_id = matches
        .get_one::<i64>("user")
        .copied()
        .unwrap_or(cfg.user_id);

    match matches.subcommand() {
        Some(("config", _)) => {
            let path = confy::get_configuration_file_path(APP_NAME, "config")?;
            println!("Your config file is located here: \n{}", path.display());
        }
        Some(("markets", _)) => {
            let markets = client
                .market_types()
                .await
                .wrap_err("Error loading market types")?;
            portfolio::print_market_types(&markets);
        }
        Some(("assets", sub)) => {
            let market = sub.get_one::<String>("market").map(String::as_str);
            let search = sub.get_one::<String>("search").map(String::as_str).unwrap_or("");
            let assets = match market {
                Some(m) if m != "ALL" => client.assets_by_market(m).await,
                _ => client.assets().await,
            }
            .wrap_err("Error loading assets")?;
            portfolio::print_assets(&portfolio::filter_assets(&assets, market, search));
        }
        Some(("details", sub)) => show_details(&client, required(sub, "TICKER")).await?,
        Some(("portfolio", _)) => {
            let view = client
                .portfolio(user_id)
                .await
                .wrap_err("Error loading portfolio")?;
            let portfolio = Portfolio::from_view(view);
            portfolio.print(true, &cfg.currency);
            portfolio.print_transactions();
        }
        Some(("summary", _)) => show_summary(&client, &cfg.currency).await?,
        Some(("distribution", _)) => {
            let distribution = client
                .distribution(user_id)
                .await
                .wrap_err("Error loading portfolio distribution")?;
            portfolio::draw_distribution_chart(&distribution);
            portfolio::print_distribution(&distribution);
        }
        Some(("history", _)) => {
            let transactions = client
                .transaction_history(user_id)
                .await
                .wrap_err("Error loading transaction history")?;
            portfolio::print_transactions(&transactions);
        }
        Some(("buy", sub)) => {
            let ticker = required(sub, "TICKER");
            let amount = parse_quantity(required(sub, "AMOUNT"))?;
            let price = parse_price(required(sub, "PRICE"))?;
            let tx = client
                .buy(user_id, ticker, amount, price)
                .await
                .wrap_err("Error while adding a new transaction")?;
            println!(
                "{} Added to your portfolio: {} assets of {} at {} each",
                "✅".green(),
                tx.amount,
                tx.asset.name,
                tx.price
            );
        }
        Some(("sell", sub)) => {
            let asset_id = sub.get_one::<i64>("ASSET_ID").copied().unwrap_or_default();
            let amount = parse_quantity(required(sub, "AMOUNT"))?;
            let portfolio = Portfolio::from_view(
                client
                    .portfolio(user_id)
                    .await
                    .wrap_err("Error loading portfolio")?,
            );
            let holding = portfolio.validate_sell(asset_id, amount)?;
            let price = match sub.get_one::<String>("PRICE") {
                Some(p) => parse_price(p)?,
                None => holding
                    .asset
                    .close_price
                    .ok_or_else(|| eyre!("No close price for {}, pass PRICE", holding.asset.ticker))?,
            };
            let tx = client
                .sell(user_id, asset_id, amount, price)
                .await
                .wrap_err("Error while selling")?;
            println!(
                "{} Sold: {} assets of {} at {} each",
                "✅".green(),
                tx.amount,
                tx.asset.name,
                tx.price
            );
        }
        Some(("edit", sub)) => {
            let tx_id = sub.get_one::<i64>("TX_ID").copied().unwrap_or_default();
            let amount = parse_quantity(required(sub, "AMOUNT"))?;
            let price = parse_price(required(sub, "PRICE"))?;
            let kind: TransactionType = required(sub, "TYPE").parse()?;
            let tx = client
                .edit_transaction(user_id, tx_id, amount, price, kind)
                .await
                .wrap_err("Error while updating the transaction")?;
            println!("{} Updated: {}", "✅".green(), tx.describe());
        }
        Some(("delete", sub)) => {
            let tx_id = sub.get_one::<i64>("TX_ID").copied().unwrap_or_default();
            client
                .delete_transaction(user_id, tx_id)
                .await
                .wrap_err("Error while deleting a transaction")?;
            println!("{} Deleted transaction {tx_id}", "✅".green());
        }
        Some(("tui", sub)) => {
            let tab = sub
                .get_one::<String>("tab")
                .map(String::as_str)
                .and_then(tui::Tab::from_name);
            tui::run_tui(client, user_id, cfg.currency.clone(), tab)
                .await
                .map_err(|e| eyre!("{e}"))?;
        }
        _ => {
            cli().print_help()?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let logging_default = if matches.subcommand_name() == Some("tui") {
        "off"
    } else {
        "warn"
    };
    init_logging(logging_default);

    let cfg: Config = match confy::load(APP_NAME, "config") {
        Ok(cfg) => cfg,
        Err(e) => {
            log::warn!("could not load config, using defaults: {e}");
            Config::default()
        }
    };

    if let Err(e) = run(cfg, matches).await {
        eprintln!("{} {e:#}", "❌".red());
        std::process::exit(1);
    }
}
