use crate::api::ApiClient;
use crate::chart::load_close_chart;
use crate::error::{parse_price, parse_quantity, ValidationError};
use crate::history::ChartSeries;
use crate::model::{Asset, MarketType, PortfolioView, TransactionType};
use crate::portfolio::{filter_assets, format_money, Portfolio};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Block, Borders, Cell, Chart, Clear, Dataset, GraphType, List, ListItem, Paragraph,
        Row, Table, Tabs, Wrap,
    },
    Frame, Terminal,
};
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;
use tui_big_text::{BigText, PixelSize};

fn format_with_commas(value: f64) -> String {
    let formatted = format!("{:.2}", value.abs());
    let parts: Vec<&str> = formatted.split('.').collect();
    let integer_part = parts[0];
    let decimal_part = parts.get(1).unwrap_or(&"00");

    let formatted_integer = integer_part
        .chars()
        .rev()
        .collect::<Vec<_>>()
        .chunks(3)
        .map(|chunk| chunk.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join(",")
        .chars()
        .rev()
        .collect::<String>();

    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{formatted_integer}.{decimal_part}")
}

fn format_amount(amount: f64) -> String {
    if amount.fract() == 0.0 {
        format!("{amount:.0}")
    } else if amount >= 1.0 {
        format!("{amount:.2}")
    } else if amount >= 0.01 {
        format!("{amount:.4}")
    } else {
        format!("{amount:.8}")
    }
}

fn input_text(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tab {
    Assets,
    Details,
    Portfolio,
    Ledger,
}

impl Tab {
    fn title(self) -> &'static str {
        match self {
            Tab::Assets => "Assets",
            Tab::Details => "Details",
            Tab::Portfolio => "Portfolio",
            Tab::Ledger => "Transactions",
        }
    }

    fn all() -> &'static [Tab] {
        &[Tab::Assets, Tab::Details, Tab::Portfolio, Tab::Ledger]
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "assets" => Some(Tab::Assets),
            "details" => Some(Tab::Details),
            "portfolio" => Some(Tab::Portfolio),
            "ledger" | "transactions" => Some(Tab::Ledger),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AppMode {
    Normal,
    Search,
    Trade,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TradeKind {
    Buy { ticker: String },
    Sell { asset_id: i64, ticker: String },
    Edit { transaction_id: i64, kind: TransactionType },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TradeField {
    Amount,
    Price,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TradeForm {
    pub kind: TradeKind,
    pub amount: String,
    pub price: String,
    pub focus: TradeField,
}

impl TradeForm {
    fn title(&self) -> String {
        match &self.kind {
            TradeKind::Buy { ticker } => format!(" Buy {ticker} "),
            TradeKind::Sell { ticker, .. } => format!(" Sell {ticker} "),
            TradeKind::Edit {
                transaction_id,
                kind,
            } => format!(" Edit transaction {transaction_id} ({kind}) "),
        }
    }

    fn focused_input(&mut self) -> &mut String {
        match self.focus {
            TradeField::Amount => &mut self.amount,
            TradeField::Price => &mut self.price,
        }
    }
}

/// Work for the background task.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// Assets, markets and the portfolio, plus the open detail view if there is one.
    LoadAll {
        details: Option<String>,
    },
    Details(String),
    Buy {
        ticker: String,
        amount: f64,
        price: f64,
    },
    Sell {
        asset_id: i64,
        amount: f64,
        price: f64,
    },
    Edit {
        transaction_id: i64,
        amount: f64,
        price: f64,
        kind: TransactionType,
    },
    Delete(i64),
}

/// Results coming back from the background task.
#[derive(Debug, Clone)]
pub enum Update {
    Assets(Vec<Asset>),
    Markets(Vec<MarketType>),
    Details {
        ticker: String,
        asset: Box<Asset>,
        chart: Option<ChartSeries>,
    },
    DetailsFailed {
        ticker: String,
        message: String,
    },
    Portfolio(PortfolioView),
    Message(String),
    Error(String),
}

pub struct App {
    pub current_tab: Tab,
    pub mode: AppMode,
    pub should_quit: bool,
    pub loading: bool,
    pub error_message: Option<String>,
    pub status_message: Option<String>,
    pub currency: String,
    pub assets: Vec<Asset>,
    pub markets: Vec<MarketType>,
    /// 0 means all markets, otherwise an index into `markets` plus one.
    pub market_filter: usize,
    pub search: String,
    pub selected_asset: usize,
    pub pending_details: Option<String>,
    pub details: Option<(Asset, Option<ChartSeries>)>,
    pub portfolio: Option<Portfolio>,
    pub selected_position: usize,
    pub selected_transaction: usize,
    pub trade: Option<TradeForm>,
}

impl App {
    pub fn new(currency: String) -> App {
        App {
            current_tab: Tab::Assets,
            mode: AppMode::Normal,
            should_quit: false,
            loading: true,
            error_message: None,
            status_message: None,
            currency,
            assets: Vec::new(),
            markets: Vec::new(),
            market_filter: 0,
            search: String::new(),
            selected_asset: 0,
            pending_details: None,
            details: None,
            portfolio: None,
            selected_position: 0,
            selected_transaction: 0,
            trade: None,
        }
    }

    pub fn next_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.current_tab = tabs[(current_index + 1) % tabs.len()];
    }

    pub fn previous_tab(&mut self) {
        let tabs = Tab::all();
        let current_index = tabs
            .iter()
            .position(|&t| t == self.current_tab)
            .unwrap_or(0);
        self.current_tab = tabs[(current_index + tabs.len() - 1) % tabs.len()];
    }

    pub fn market_name(&self) -> Option<&str> {
        match self.market_filter {
            0 => None,
            i => self.markets.get(i - 1).map(|m| m.name.as_str()),
        }
    }

    pub fn cycle_market(&mut self) {
        self.market_filter = (self.market_filter + 1) % (self.markets.len() + 1);
        self.selected_asset = 0;
    }

    pub fn visible_assets(&self) -> Vec<&Asset> {
        filter_assets(&self.assets, self.market_name(), &self.search)
    }

    fn list_len(&self) -> usize {
        match self.current_tab {
            Tab::Assets => self.visible_assets().len(),
            Tab::Portfolio => self.portfolio.as_ref().map_or(0, |p| p.positions().len()),
            Tab::Ledger => self.portfolio.as_ref().map_or(0, |p| p.transactions().len()),
            Tab::Details => 0,
        }
    }

    fn selection_mut(&mut self) -> Option<&mut usize> {
        match self.current_tab {
            Tab::Assets => Some(&mut self.selected_asset),
            Tab::Portfolio => Some(&mut self.selected_position),
            Tab::Ledger => Some(&mut self.selected_transaction),
            Tab::Details => None,
        }
    }

    pub fn select_next(&mut self) {
        let len = self.list_len();
        if let Some(selected) = self.selection_mut() {
            if *selected < len.saturating_sub(1) {
                *selected += 1;
            }
        }
    }

    pub fn select_previous(&mut self) {
        if let Some(selected) = self.selection_mut() {
            *selected = selected.saturating_sub(1);
        }
    }

    /// Requests the detail view for `ticker`. Any earlier details request is superseded.
    pub fn open_details(&mut self, ticker: &str) -> Request {
        self.pending_details = Some(ticker.to_string());
        self.current_tab = Tab::Details;
        Request::Details(ticker.to_string())
    }

    fn selected_ticker(&self) -> Option<String> {
        match self.current_tab {
            Tab::Assets => self
                .visible_assets()
                .get(self.selected_asset)
                .map(|a| a.ticker.clone()),
            Tab::Portfolio => self
                .portfolio
                .as_ref()
                .and_then(|p| p.positions().get(self.selected_position))
                .map(|p| p.asset.ticker.clone()),
            _ => None,
        }
    }

    pub fn begin_buy(&mut self) {
        let asset = match self.current_tab {
            Tab::Assets => self.visible_assets().get(self.selected_asset).cloned().cloned(),
            Tab::Details => self.details.as_ref().map(|(a, _)| a.clone()),
            _ => None,
        };
        if let Some(asset) = asset {
            self.trade = Some(TradeForm {
                kind: TradeKind::Buy {
                    ticker: asset.ticker.clone(),
                },
                amount: "1".to_string(),
                price: asset.close_price.map(input_text).unwrap_or_default(),
                focus: TradeField::Amount,
            });
            self.mode = AppMode::Trade;
        }
    }

    pub fn begin_sell(&mut self) {
        let Some(position) = self
            .portfolio
            .as_ref()
            .and_then(|p| p.positions().get(self.selected_position))
        else {
            return;
        };
        self.trade = Some(TradeForm {
            kind: TradeKind::Sell {
                asset_id: position.id,
                ticker: position.asset.ticker.clone(),
            },
            amount: "1".to_string(),
            price: position.asset.close_price.map(input_text).unwrap_or_default(),
            focus: TradeField::Amount,
        });
        self.mode = AppMode::Trade;
    }

    pub fn begin_edit(&mut self) {
        let Some(tx) = self
            .portfolio
            .as_ref()
            .and_then(|p| p.transactions().get(self.selected_transaction))
        else {
            return;
        };
        self.trade = Some(TradeForm {
            kind: TradeKind::Edit {
                transaction_id: tx.id,
                kind: tx.kind,
            },
            amount: input_text(tx.amount),
            price: input_text(tx.price),
            focus: TradeField::Amount,
        });
        self.mode = AppMode::Trade;
    }

    pub fn exit_trade_mode(&mut self) {
        self.mode = AppMode::Normal;
        self.trade = None;
    }

    /// Validates the open form and turns it into a request.
    pub fn submit_trade(&mut self) -> Result<Request, ValidationError> {
        let Some(form) = &self.trade else {
            return Err(ValidationError::QuantityRequired);
        };
        let amount = parse_quantity(&form.amount)?;
        let price = parse_price(&form.price)?;

        let request = match &form.kind {
            TradeKind::Buy { ticker } => Request::Buy {
                ticker: ticker.clone(),
                amount,
                price,
            },
            TradeKind::Sell { asset_id, .. } => {
                if let Some(portfolio) = &self.portfolio {
                    portfolio.validate_sell(*asset_id, amount)?;
                }
                Request::Sell {
                    asset_id: *asset_id,
                    amount,
                    price,
                }
            }
            TradeKind::Edit {
                transaction_id,
                kind,
            } => Request::Edit {
                transaction_id: *transaction_id,
                amount,
                price,
                kind: *kind,
            },
        };
        self.exit_trade_mode();
        Ok(request)
    }

    pub fn delete_selected(&mut self) -> Option<Request> {
        self.portfolio
            .as_ref()
            .and_then(|p| p.transactions().get(self.selected_transaction))
            .map(|tx| Request::Delete(tx.id))
    }

    pub fn apply(&mut self, update: Update) {
        match update {
            Update::Assets(assets) => {
                self.assets = assets;
                self.selected_asset = self
                    .selected_asset
                    .min(self.visible_assets().len().saturating_sub(1));
                self.loading = false;
            }
            Update::Markets(markets) => {
                self.markets = markets;
                if self.market_filter > self.markets.len() {
                    self.market_filter = 0;
                }
            }
            Update::Details {
                ticker,
                asset,
                chart,
            } => {
                // a newer request replaced this one
                if self.pending_details.as_deref() != Some(ticker.as_str()) {
                    return;
                }
                self.pending_details = None;
                self.details = Some((*asset, chart));
            }
            Update::DetailsFailed { ticker, message } => {
                if self.pending_details.as_deref() == Some(ticker.as_str()) {
                    self.pending_details = None;
                    self.details = None;
                    self.error_message = Some(message);
                }
            }
            Update::Portfolio(view) => {
                let portfolio = Portfolio::from_view(view);
                self.selected_position = self
                    .selected_position
                    .min(portfolio.positions().len().saturating_sub(1));
                self.selected_transaction = self
                    .selected_transaction
                    .min(portfolio.transactions().len().saturating_sub(1));
                self.portfolio = Some(portfolio);
            }
            Update::Message(message) => self.status_message = Some(message),
            Update::Error(message) => {
                self.loading = false;
                self.error_message = Some(message);
            }
        }
    }

    /// Applies a key press and returns the request it triggers, if any.
    pub fn handle_key(&mut self, code: KeyCode) -> Option<Request> {
        if self.error_message.is_some() {
            self.error_message = None;
            return None;
        }

        match self.mode {
            AppMode::Normal => self.handle_normal_key(code),
            AppMode::Search => {
                match code {
                    KeyCode::Esc => {
                        self.search.clear();
                        self.mode = AppMode::Normal;
                    }
                    KeyCode::Enter => self.mode = AppMode::Normal,
                    KeyCode::Backspace => {
                        self.search.pop();
                    }
                    KeyCode::Char(c) => {
                        self.search.push(c);
                        self.selected_asset = 0;
                    }
                    _ => {}
                }
                None
            }
            AppMode::Trade => self.handle_trade_key(code),
        }
    }

    fn handle_normal_key(&mut self, code: KeyCode) -> Option<Request> {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            // Vim navigation - hjkl
            KeyCode::Char('h') | KeyCode::Left | KeyCode::BackTab => self.previous_tab(),
            KeyCode::Char('l') | KeyCode::Right | KeyCode::Tab => self.next_tab(),
            KeyCode::Char('j') | KeyCode::Down => self.select_next(),
            KeyCode::Char('k') | KeyCode::Up => self.select_previous(),
            KeyCode::Char('1') => self.current_tab = Tab::Assets,
            KeyCode::Char('2') => self.current_tab = Tab::Details,
            KeyCode::Char('3') => self.current_tab = Tab::Portfolio,
            KeyCode::Char('4') => self.current_tab = Tab::Ledger,
            KeyCode::Char('r') => {
                self.status_message = None;
                let details = match (self.current_tab, &self.details) {
                    (Tab::Details, Some((asset, _))) => Some(asset.ticker.clone()),
                    _ => None,
                };
                if let Some(ticker) = &details {
                    self.pending_details = Some(ticker.clone());
                }
                return Some(Request::LoadAll { details });
            }
            KeyCode::Char('m') if self.current_tab == Tab::Assets => self.cycle_market(),
            KeyCode::Char('/') if self.current_tab == Tab::Assets => self.mode = AppMode::Search,
            KeyCode::Char('b') => self.begin_buy(),
            KeyCode::Char('s') if self.current_tab == Tab::Portfolio => self.begin_sell(),
            KeyCode::Char('e') if self.current_tab == Tab::Ledger => self.begin_edit(),
            KeyCode::Char('d') if self.current_tab == Tab::Ledger => return self.delete_selected(),
            KeyCode::Enter => {
                if let Some(ticker) = self.selected_ticker() {
                    return Some(self.open_details(&ticker));
                }
            }
            _ => {}
        }
        None
    }

    fn handle_trade_key(&mut self, code: KeyCode) -> Option<Request> {
        let form = self.trade.as_mut()?;
        match code {
            KeyCode::Esc => self.exit_trade_mode(),
            KeyCode::Tab | KeyCode::Up | KeyCode::Down => {
                form.focus = match form.focus {
                    TradeField::Amount => TradeField::Price,
                    TradeField::Price => TradeField::Amount,
                };
            }
            KeyCode::Char('t') => {
                if let TradeKind::Edit { kind, .. } = &mut form.kind {
                    *kind = kind.toggled();
                }
            }
            KeyCode::Backspace => {
                form.focused_input().pop();
            }
            KeyCode::Char(c) => {
                let input = form.focused_input();
                if c.is_ascii_digit() || (c == '.' && !input.contains('.')) {
                    input.push(c);
                }
            }
            KeyCode::Enter => match self.submit_trade() {
                Ok(request) => return Some(request),
                Err(e) => self.error_message = Some(e.to_string()),
            },
            _ => {}
        }
        None
    }
}

// The asset comes first; the closes file is only fetched once it is known.
async fn load_details(client: &ApiClient, ticker: String) -> Update {
    match client.asset(&ticker).await {
        Ok(asset) => {
            let chart = load_close_chart(client, &asset).await;
            Update::Details {
                ticker,
                asset: Box::new(asset),
                chart,
            }
        }
        Err(e) => {
            log::error!("{e}");
            Update::DetailsFailed {
                ticker,
                message: "Error loading asset details.".to_string(),
            }
        }
    }
}

async fn handle_request(client: &ApiClient, user_id: i64, request: Request) -> Vec<Update> {
    let refresh = |message: String| async move {
        match client.portfolio(user_id).await {
            Ok(view) => vec![Update::Message(message), Update::Portfolio(view)],
            Err(e) => vec![Update::Message(message), Update::Error(e.to_string())],
        }
    };

    match request {
        Request::LoadAll { details } => {
            let (assets, markets, portfolio) = futures::join!(
                client.assets(),
                client.market_types(),
                client.portfolio(user_id)
            );
            let mut updates = Vec::new();
            match assets {
                Ok(a) => updates.push(Update::Assets(a)),
                Err(e) => updates.push(Update::Error(format!("Error loading assets: {e}"))),
            }
            match markets {
                Ok(m) => updates.push(Update::Markets(m)),
                Err(e) => log::warn!("market types unavailable: {e}"),
            }
            match portfolio {
                Ok(p) => updates.push(Update::Portfolio(p)),
                Err(e) => updates.push(Update::Error(format!("Error loading portfolio: {e}"))),
            }
            if let Some(ticker) = details {
                updates.push(load_details(client, ticker).await);
            }
            updates
        }
        Request::Details(ticker) => vec![load_details(client, ticker).await],
        Request::Buy {
            ticker,
            amount,
            price,
        } => match client.buy(user_id, &ticker, amount, price).await {
            Ok(tx) => {
                refresh(format!(
                    "Added to your portfolio: {} assets of {} at {} each",
                    tx.amount, tx.asset.name, tx.price
                ))
                .await
            }
            Err(e) => vec![Update::Error(format!("Error while adding a new transaction: {e}"))],
        },
        Request::Sell {
            asset_id,
            amount,
            price,
        } => match client.sell(user_id, asset_id, amount, price).await {
            Ok(tx) => {
                refresh(format!(
                    "Sold: {} assets of {} at {} each",
                    tx.amount, tx.asset.name, tx.price
                ))
                .await
            }
            Err(e) => vec![Update::Error(format!("Error while selling: {e}"))],
        },
        Request::Edit {
            transaction_id,
            amount,
            price,
            kind,
        } => match client
            .edit_transaction(user_id, transaction_id, amount, price, kind)
            .await
        {
            Ok(tx) => refresh(format!("Updated: {}", tx.describe())).await,
            Err(e) => vec![Update::Error(format!("Error while updating a transaction: {e}"))],
        },
        Request::Delete(transaction_id) => {
            match client.delete_transaction(user_id, transaction_id).await {
                Ok(()) => refresh(format!("Deleted transaction {transaction_id}")).await,
                Err(e) => vec![Update::Error(format!("Error while deleting a transaction: {e}"))],
            }
        }
    }
}

// Each request runs on its own task so a slow fetch never holds up the others.
fn spawn_worker(
    client: ApiClient,
    user_id: i64,
    mut requests: mpsc::UnboundedReceiver<Request>,
    updates: mpsc::UnboundedSender<Update>,
) {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let client = client.clone();
            let updates = updates.clone();
            tokio::spawn(async move {
                for update in handle_request(&client, user_id, request).await {
                    if updates.send(update).is_err() {
                        break; // UI is gone
                    }
                }
            });
        }
    });
}

pub async fn run_tui(
    client: ApiClient,
    user_id: i64,
    currency: String,
    tab: Option<Tab>,
) -> Result<(), Box<dyn std::error::Error>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(currency);
    if let Some(tab) = tab {
        app.current_tab = tab;
    }

    let (request_sender, request_receiver) = mpsc::unbounded_channel();
    let (update_sender, mut update_receiver) = mpsc::unbounded_channel();
    spawn_worker(client, user_id, request_receiver, update_sender);
    request_sender.send(Request::LoadAll { details: None })?;

    let res = run_app(
        &mut terminal,
        &mut app,
        &request_sender,
        &mut update_receiver,
        poll_key,
    )
    .await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    res.map_err(Into::into)
}

/// Waits up to 100ms for a key press on the terminal.
fn poll_key() -> io::Result<Option<KeyCode>> {
    if crossterm::event::poll(Duration::from_millis(100))? {
        if let Event::Key(key) = event::read()? {
            if key.kind == KeyEventKind::Press {
                return Ok(Some(key.code));
            }
        }
    }
    Ok(None)
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    requests: &mpsc::UnboundedSender<Request>,
    updates: &mut mpsc::UnboundedReceiver<Update>,
    mut next_key: impl FnMut() -> io::Result<Option<KeyCode>>,
) -> io::Result<()> {
    loop {
        terminal
            .draw(|f| ui(f, app))
            .map_err(|e| io::Error::other(e.to_string()))?;

        while let Ok(update) = updates.try_recv() {
            app.apply(update);
        }

        if let Some(code) = next_key()? {
            if let Some(request) = app.handle_key(code) {
                if requests.send(request).is_err() {
                    app.error_message = Some("Background worker stopped".to_string());
                }
            }
        }

        if app.should_quit {
            break;
        }
        tokio::task::yield_now().await;
    }
    Ok(())
}

fn ui(f: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(f.area());

    let tab_titles: Vec<Line> = Tab::all()
        .iter()
        .map(|t| {
            let style = if *t == app.current_tab {
                Style::default()
                    .fg(Color::Yellow)
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            Line::from(Span::styled(t.title(), style))
        })
        .collect();

    let tabs = Tabs::new(tab_titles)
        .block(Block::default().borders(Borders::ALL).title("Folio"))
        .style(Style::default().fg(Color::White))
        .highlight_style(Style::default().fg(Color::Yellow))
        .select(
            Tab::all()
                .iter()
                .position(|&t| t == app.current_tab)
                .unwrap_or(0),
        );
    f.render_widget(tabs, chunks[0]);

    match app.current_tab {
        Tab::Assets => render_assets(f, chunks[1], app),
        Tab::Details => render_details(f, chunks[1], app),
        Tab::Portfolio => render_portfolio(f, chunks[1], app),
        Tab::Ledger => render_ledger(f, chunks[1], app),
    }

    render_help(f, chunks[2], app);

    if app.mode == AppMode::Trade {
        if let Some(form) = &app.trade {
            render_trade_dialog(f, form);
        }
    }

    if let Some(error) = &app.error_message {
        render_error_popup(f, error);
    }
}

fn render_help(f: &mut Frame, area: Rect, app: &App) {
    let keys = match (app.mode, app.current_tab) {
        (AppMode::Search, _) => "Type to search | Enter (done) | Esc (clear)",
        (AppMode::Trade, _) => "Enter (submit) | Tab (switch field) | t (toggle type) | Esc (cancel)",
        (_, Tab::Assets) => "j/k (select) | Enter (details) | b (buy) | m (market) | / (search) | r (refresh) | q (quit)",
        (_, Tab::Details) => "b (buy) | h/l (tabs) | r (refresh) | q (quit)",
        (_, Tab::Portfolio) => "j/k (select) | s (sell) | Enter (details) | r (refresh) | q (quit)",
        (_, Tab::Ledger) => "j/k (select) | e (edit) | d (delete) | r (refresh) | q (quit)",
    };
    let text = match &app.status_message {
        Some(message) => Line::from(vec![
            Span::styled(format!("{message}  "), Style::default().fg(Color::Green)),
            Span::styled(keys, Style::default().fg(Color::Gray)),
        ]),
        None => Line::from(Span::styled(keys, Style::default().fg(Color::Gray))),
    };
    let help = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).title("Help"))
        .alignment(Alignment::Center);
    f.render_widget(help, area);
}

fn highlight(selected: bool) -> Style {
    if selected {
        Style::default().bg(Color::DarkGray)
    } else {
        Style::default()
    }
}

fn header_row(names: &[&'static str]) -> Row<'static> {
    Row::new(names.iter().map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    }))
    .height(1)
    .bottom_margin(1)
}

fn change_color(v: Option<f64>) -> Color {
    match v {
        Some(v) if v > 0.0 => Color::Green,
        Some(v) if v < 0.0 => Color::Red,
        _ => Color::White,
    }
}

fn render_assets(f: &mut Frame, area: Rect, app: &App) {
    if app.loading {
        render_loading(f, area);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)])
        .split(area);

    let search_style = if app.mode == AppMode::Search {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    let filter = Paragraph::new(Line::from(vec![
        Span::raw("Market: "),
        Span::styled(
            app.market_name().unwrap_or("ALL"),
            Style::default().fg(Color::Cyan),
        ),
        Span::raw("   Search: "),
        Span::styled(app.search.as_str(), search_style),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Filter"));
    f.render_widget(filter, chunks[0]);

    let visible = app.visible_assets();
    let rows = visible.iter().enumerate().map(|(i, asset)| {
        Row::new(vec![
            Cell::from(asset.ticker.clone()),
            Cell::from(asset.name.clone()),
            Cell::from(asset.market_name().unwrap_or("-").to_string()),
            Cell::from(
                asset
                    .close_price
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "N/A".to_string()),
            ),
            Cell::from(
                asset
                    .percent_change
                    .map(|v| format!("{v:.2}%"))
                    .unwrap_or_else(|| "-".to_string()),
            )
            .style(Style::default().fg(change_color(asset.percent_change))),
        ])
        .style(highlight(i == app.selected_asset))
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(15),
            Constraint::Percentage(40),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
            Constraint::Percentage(15),
        ],
    )
    .header(header_row(&["Ticker", "Name", "Market", "Close", "%Day"]))
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Assets ({})", visible.len())),
    );
    f.render_widget(table, chunks[1]);
}

fn render_details(f: &mut Frame, area: Rect, app: &App) {
    if let Some(ticker) = &app.pending_details {
        let loading = Paragraph::new(format!("Loading {ticker}..."))
            .block(Block::default().borders(Borders::ALL).title("Details"))
            .style(Style::default().fg(Color::Yellow))
            .alignment(Alignment::Center);
        f.render_widget(loading, area);
        return;
    }

    let Some((asset, chart)) = &app.details else {
        let empty = Paragraph::new("No asset selected. Pick one in Assets and press Enter.")
            .block(Block::default().borders(Borders::ALL).title("Details"))
            .style(Style::default().fg(Color::Gray))
            .alignment(Alignment::Center);
        f.render_widget(empty, area);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
        .split(area);

    let items: Vec<ListItem> = asset
        .attributes()
        .into_iter()
        .map(|(label, value)| {
            ListItem::new(Line::from(vec![
                Span::styled(format!("{label:<16}"), Style::default().fg(Color::Cyan)),
                Span::raw(value),
            ]))
        })
        .collect();
    let list = List::new(items).block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("{} ({})", asset.name, asset.ticker)),
    );
    f.render_widget(list, chunks[0]);

    match chart {
        Some(series) => render_close_chart(f, chunks[1], series),
        None => {
            let empty = Paragraph::new("No chart data available.")
                .block(Block::default().borders(Borders::ALL).title("Closing Prices"))
                .style(Style::default().fg(Color::Gray))
                .alignment(Alignment::Center);
            f.render_widget(empty, chunks[1]);
        }
    }
}

fn render_close_chart(f: &mut Frame, area: Rect, series: &ChartSeries) {
    let points = series.points();
    let (lo, hi) = series.min_max().unwrap_or((0.0, 1.0));
    let pad = ((hi - lo) * 0.1).max(0.01);
    let (y_min, y_max) = (lo - pad, hi + pad);

    let datasets = vec![Dataset::default()
        .name(series.series_label.clone())
        .marker(symbols::Marker::Braille)
        .graph_type(GraphType::Line)
        .style(Style::default().fg(Color::Blue))
        .data(&points)];

    let chart = Chart::new(datasets)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Closing Prices (oldest → newest)"),
        )
        .x_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([1.0, series.labels.len() as f64])
                .labels(series.labels.to_vec()),
        )
        .y_axis(
            Axis::default()
                .style(Style::default().fg(Color::Gray))
                .bounds([y_min, y_max])
                .labels(vec![
                    format!("{y_min:.2}"),
                    format!("{:.2}", (y_min + y_max) / 2.0),
                    format!("{y_max:.2}"),
                ]),
        );
    f.render_widget(chart, area);
}

fn render_portfolio(f: &mut Frame, area: Rect, app: &App) {
    let Some(portfolio) = &app.portfolio else {
        render_loading(f, area);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(7),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .split(area);

    let total_value = portfolio.get_total_value();
    let big_text_value = format!("{} {}", format_with_commas(total_value), app.currency);
    let big_text = BigText::builder()
        .pixel_size(PixelSize::Quadrant)
        .style(
            Style::default()
                .fg(Color::Green)
                .add_modifier(Modifier::BOLD),
        )
        .lines(vec![big_text_value.clone().into()])
        .build();

    let big_text_widget = Block::default()
        .borders(Borders::ALL)
        .title(format!("Holdings Value ({})", app.currency))
        .title_alignment(Alignment::Center);
    f.render_widget(big_text_widget, chunks[0]);

    let inner = chunks[0].inner(ratatui::layout::Margin {
        horizontal: 1,
        vertical: 1,
    });
    let big_text_width = big_text_value.len() as u16 * 4;
    let centered_area = if big_text_width < inner.width {
        let margin = (inner.width - big_text_width) / 2;
        Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Length(margin),
                Constraint::Min(0),
                Constraint::Length(margin),
            ])
            .split(inner)[1]
    } else {
        inner
    };
    f.render_widget(big_text, centered_area);

    let view = &portfolio.view;
    let info = Paragraph::new(Line::from(vec![
        Span::raw(format!("User: {}   Balance: ", view.user)),
        Span::styled(
            format_money(view.balance, &app.currency),
            Style::default().add_modifier(Modifier::BOLD),
        ),
        Span::raw("   Profit/Loss: "),
        Span::styled(
            format_money(view.profit_loss, &app.currency),
            Style::default().fg(change_color(view.profit_loss)),
        ),
    ]))
    .block(Block::default().borders(Borders::ALL).title("Account"))
    .alignment(Alignment::Center);
    f.render_widget(info, chunks[1]);

    let rows = portfolio.positions().iter().enumerate().map(|(i, position)| {
        Row::new(vec![
            Cell::from(position.id.to_string()),
            Cell::from(format!("{} ({})", position.asset.name, position.asset.ticker)),
            Cell::from(format_amount(position.quantity)),
            Cell::from(
                position
                    .purchase_price
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::from(
                position
                    .market_value()
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::from(
                position
                    .pnl()
                    .map(|v| format!("{v:.2}"))
                    .unwrap_or_else(|| "-".to_string()),
            )
            .style(Style::default().fg(change_color(position.pnl()))),
        ])
        .style(highlight(i == app.selected_position))
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(8),
            Constraint::Percentage(37),
            Constraint::Percentage(15),
            Constraint::Percentage(13),
            Constraint::Percentage(14),
            Constraint::Percentage(13),
        ],
    )
    .header(header_row(&["Id", "Asset", "Quantity", "Purchase", "Value", "PnL"]))
    .block(Block::default().borders(Borders::ALL).title("Holdings"));
    f.render_widget(table, chunks[2]);
}

fn render_ledger(f: &mut Frame, area: Rect, app: &App) {
    let Some(portfolio) = &app.portfolio else {
        render_loading(f, area);
        return;
    };

    let rows = portfolio.transactions().iter().enumerate().map(|(i, tx)| {
        let color = match tx.kind {
            TransactionType::Buy => Color::Green,
            TransactionType::Sell => Color::Red,
        };
        Row::new(vec![
            Cell::from(tx.id.to_string()),
            Cell::from(tx.kind.as_str()).style(Style::default().fg(color)),
            Cell::from(format!("{} ({})", tx.asset.name, tx.asset.ticker)),
            Cell::from(format_amount(tx.amount)),
            Cell::from(format!("{:.2}", tx.price)),
            Cell::from(
                tx.timestamp
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            ),
        ])
        .style(highlight(i == app.selected_transaction))
    });

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(8),
            Constraint::Percentage(8),
            Constraint::Percentage(36),
            Constraint::Percentage(14),
            Constraint::Percentage(14),
            Constraint::Percentage(20),
        ],
    )
    .header(header_row(&["Id", "Type", "Asset", "Amount", "Price", "Time"]))
    .block(Block::default().borders(Borders::ALL).title("Transactions"));
    f.render_widget(table, area);
}

fn render_loading(f: &mut Frame, area: Rect) {
    let loading_text = Paragraph::new("Loading portfolio data...")
        .block(Block::default().borders(Borders::ALL).title("Loading"))
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);

    f.render_widget(loading_text, area);
}

fn render_trade_dialog(f: &mut Frame, form: &TradeForm) {
    let popup_area = centered_rect(50, 40, f.area());
    f.render_widget(Clear, popup_area);

    let main_block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan))
        .title(form.title())
        .title_alignment(Alignment::Center)
        .style(Style::default().bg(Color::Black));
    f.render_widget(main_block, popup_area);

    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
        ])
        .margin(1)
        .split(popup_area);

    let field = |title: &'static str, value: &str, focused: bool| {
        let border = if focused { Color::Yellow } else { Color::Gray };
        let cursor = if focused { "▌" } else { "" };
        Paragraph::new(format!("{value}{cursor}"))
            .style(
                Style::default()
                    .fg(Color::White)
                    .add_modifier(Modifier::BOLD),
            )
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(border))
                    .title(title),
            )
    };

    f.render_widget(
        field(" Quantity ", &form.amount, form.focus == TradeField::Amount),
        popup_layout[0],
    );
    f.render_widget(
        field(" Price ", &form.price, form.focus == TradeField::Price),
        popup_layout[1],
    );

    let preview = match (parse_quantity(&form.amount), parse_price(&form.price)) {
        (Ok(amount), Ok(price)) => (
            format!("Total: {:.2}", amount * price),
            Style::default().fg(Color::Green),
        ),
        (Err(e), _) | (_, Err(e)) => (e.to_string(), Style::default().fg(Color::Red)),
    };
    let preview_paragraph = Paragraph::new(preview.0)
        .style(preview.1)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });
    f.render_widget(preview_paragraph, popup_layout[2]);
}

fn render_error_popup(f: &mut Frame, error: &str) {
    let popup_area = centered_rect(60, 20, f.area());
    f.render_widget(Clear, popup_area);

    let error_paragraph = Paragraph::new(error)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title("Error")
                .style(Style::default().fg(Color::Red)),
        )
        .style(Style::default().fg(Color::White))
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true });

    f.render_widget(error_paragraph, popup_area);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::DEFAULT_CLOSES_PATH;
    use crate::model::{PortfolioAsset, Transaction};
    use ratatui::backend::TestBackend;

    fn asset(id: i64, ticker: &str, market: &str, close: f64) -> Asset {
        Asset {
            id: Some(id),
            ticker: ticker.to_string(),
            name: format!("{ticker} Inc."),
            close_price: Some(close),
            market_type: Some(MarketType {
                id: None,
                name: market.to_string(),
            }),
            ..Default::default()
        }
    }

    fn loaded_app() -> App {
        let mut app = App::new("USD".to_string());
        app.apply(Update::Markets(vec![
            MarketType {
                id: Some(1),
                name: "Stock".to_string(),
            },
            MarketType {
                id: Some(2),
                name: "Crypto".to_string(),
            },
        ]));
        app.apply(Update::Assets(vec![
            asset(1, "AAPL", "Stock", 190.0),
            asset(2, "BTC-USD", "Crypto", 60000.0),
            asset(3, "MSFT", "Stock", 410.5),
        ]));
        app.apply(Update::Portfolio(PortfolioView {
            user: "jan".to_string(),
            balance: Some(1000.0),
            profit_loss: Some(5.0),
            assets: vec![PortfolioAsset {
                id: 7,
                quantity: 2.0,
                purchase_price: Some(180.0),
                profit_asset: None,
                asset: asset(1, "AAPL", "Stock", 190.0),
            }],
            transactions: vec![Transaction {
                id: 21,
                timestamp: None,
                kind: TransactionType::Buy,
                amount: 2.0,
                price: 180.0,
                asset: asset(1, "AAPL", "Stock", 190.0),
            }],
        }));
        app
    }

    #[test]
    fn test_tab_navigation() {
        let mut app = App::new("USD".to_string());
        assert_eq!(app.current_tab, Tab::Assets);
        app.next_tab();
        assert_eq!(app.current_tab, Tab::Details);
        app.previous_tab();
        app.previous_tab();
        assert_eq!(app.current_tab, Tab::Ledger);
        app.handle_key(KeyCode::Char('3'));
        assert_eq!(app.current_tab, Tab::Portfolio);
        assert_eq!(Tab::from_name("Transactions"), Some(Tab::Ledger));
        assert_eq!(Tab::from_name("nope"), None);
    }

    #[test]
    fn test_market_filter_and_search() {
        let mut app = loaded_app();
        assert_eq!(app.visible_assets().len(), 3);

        app.handle_key(KeyCode::Char('m'));
        assert_eq!(app.market_name(), Some("Stock"));
        assert_eq!(app.visible_assets().len(), 2);

        app.handle_key(KeyCode::Char('/'));
        assert_eq!(app.mode, AppMode::Search);
        app.handle_key(KeyCode::Char('m'));
        app.handle_key(KeyCode::Char('s'));
        app.handle_key(KeyCode::Enter);
        assert_eq!(app.mode, AppMode::Normal);
        let visible = app.visible_assets();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].ticker, "MSFT");

        app.handle_key(KeyCode::Char('m'));
        app.handle_key(KeyCode::Char('m'));
        assert_eq!(app.market_name(), None);
    }

    #[test]
    fn test_enter_opens_details() {
        let mut app = loaded_app();
        app.handle_key(KeyCode::Char('j'));
        let request = app.handle_key(KeyCode::Enter);
        assert_eq!(request, Some(Request::Details("BTC-USD".to_string())));
        assert_eq!(app.current_tab, Tab::Details);
        assert_eq!(app.pending_details.as_deref(), Some("BTC-USD"));
    }

    #[test]
    fn test_superseded_details_are_dropped() {
        let mut app = loaded_app();
        app.open_details("AAPL");
        app.open_details("MSFT");

        app.apply(Update::Details {
            ticker: "AAPL".to_string(),
            asset: Box::new(asset(1, "AAPL", "Stock", 190.0)),
            chart: None,
        });
        assert!(app.details.is_none());
        assert_eq!(app.pending_details.as_deref(), Some("MSFT"));

        app.apply(Update::Details {
            ticker: "MSFT".to_string(),
            asset: Box::new(asset(3, "MSFT", "Stock", 410.5)),
            chart: None,
        });
        assert_eq!(app.details.as_ref().unwrap().0.ticker, "MSFT");
        assert!(app.pending_details.is_none());
    }

    #[test]
    fn test_buy_form() {
        let mut app = loaded_app();
        app.handle_key(KeyCode::Char('b'));
        assert_eq!(app.mode, AppMode::Trade);
        assert_eq!(app.trade.as_ref().unwrap().price, "190");

        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Char('2'));
        app.handle_key(KeyCode::Char('.'));
        app.handle_key(KeyCode::Char('.'));
        app.handle_key(KeyCode::Char('5'));
        app.handle_key(KeyCode::Char('x'));
        assert_eq!(app.trade.as_ref().unwrap().amount, "2.5");

        let request = app.handle_key(KeyCode::Enter);
        assert_eq!(
            request,
            Some(Request::Buy {
                ticker: "AAPL".to_string(),
                amount: 2.5,
                price: 190.0
            })
        );
        assert_eq!(app.mode, AppMode::Normal);
        assert!(app.trade.is_none());
    }

    #[test]
    fn test_sell_more_than_held_shows_error() {
        let mut app = loaded_app();
        app.current_tab = Tab::Portfolio;
        app.handle_key(KeyCode::Char('s'));
        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Char('3'));

        assert_eq!(app.handle_key(KeyCode::Enter), None);
        assert_eq!(
            app.error_message.as_deref(),
            Some("You can not sell more than you have (2)")
        );
        assert_eq!(app.mode, AppMode::Trade);

        // any key dismisses the popup
        app.handle_key(KeyCode::Char('z'));
        assert!(app.error_message.is_none());
    }

    #[test]
    fn test_edit_and_delete_transaction() {
        let mut app = loaded_app();
        app.current_tab = Tab::Ledger;
        app.handle_key(KeyCode::Char('e'));
        app.handle_key(KeyCode::Char('t'));
        app.handle_key(KeyCode::Tab);
        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Backspace);
        app.handle_key(KeyCode::Char('9'));
        assert_eq!(
            app.handle_key(KeyCode::Enter),
            Some(Request::Edit {
                transaction_id: 21,
                amount: 2.0,
                price: 9.0,
                kind: TransactionType::Sell
            })
        );

        assert_eq!(app.handle_key(KeyCode::Char('d')), Some(Request::Delete(21)));
    }

    #[test]
    fn test_details_failure_clears_pending() {
        let mut app = loaded_app();
        app.open_details("NOPE");
        app.apply(Update::DetailsFailed {
            ticker: "NOPE".to_string(),
            message: "Error loading asset details.".to_string(),
        });
        assert!(app.pending_details.is_none());
        assert_eq!(
            app.error_message.as_deref(),
            Some("Error loading asset details.")
        );
    }

    #[test]
    fn test_format_with_commas() {
        assert_eq!(format_with_commas(1234567.891), "1,234,567.89");
        assert_eq!(format_with_commas(12.5), "12.50");
        assert_eq!(format_with_commas(-1000.0), "-1,000.00");
        assert_eq!(format_amount(0.5), "0.5000");
    }

    #[test]
    fn test_renders_every_tab() {
        let mut app = loaded_app();
        app.apply(Update::Details {
            ticker: "AAPL".to_string(),
            asset: Box::new(asset(1, "AAPL", "Stock", 190.0)),
            chart: None,
        });
        app.open_details("AAPL");
        app.apply(Update::Details {
            ticker: "AAPL".to_string(),
            asset: Box::new(asset(1, "AAPL", "Stock", 190.0)),
            chart: Some(ChartSeries {
                labels: crate::history::DAY_LABELS,
                series_label: "AAPL Closing Prices".to_string(),
                values: vec![Some(1.0), None, Some(3.0), Some(2.0), Some(5.0)],
            }),
        });

        let mut terminal = Terminal::new(TestBackend::new(120, 40)).unwrap();
        for tab in Tab::all() {
            app.current_tab = *tab;
            terminal.draw(|f| ui(f, &app)).unwrap();
        }
        app.current_tab = Tab::Assets;
        app.handle_key(KeyCode::Char('b'));
        assert_eq!(app.mode, AppMode::Trade);
        terminal.draw(|f| ui(f, &app)).unwrap();
    }

    #[tokio::test]
    async fn test_details_request_fetches_asset_then_chart() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/assets/AAPL")
            .with_status(200)
            .with_body(r#"{"id": 1, "ticker": "AAPL", "name": "Apple"}"#)
            .create_async()
            .await;
        server
            .mock("GET", DEFAULT_CLOSES_PATH)
            .with_status(200)
            .with_body("Symbol,Category,Close_1,Close_2,Close_3,Close_4,Close_5\nAAPL,stocks,5,4,3,2,1\n")
            .create_async()
            .await;
        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);

        let updates = handle_request(&client, 1, Request::Details("AAPL".to_string())).await;
        match &updates[..] {
            [Update::Details { ticker, chart, .. }] => {
                assert_eq!(ticker, "AAPL");
                assert_eq!(chart.as_ref().unwrap().values.len(), 5);
            }
            other => panic!("unexpected updates: {other:?}"),
        }

        let updates = handle_request(&client, 1, Request::Details("MSFT".to_string())).await;
        assert!(matches!(&updates[..], [Update::DetailsFailed { .. }]));
    }

    #[test]
    fn test_refresh_reloads_open_details() {
        let mut app = loaded_app();
        assert_eq!(
            app.handle_key(KeyCode::Char('r')),
            Some(Request::LoadAll { details: None })
        );

        app.open_details("AAPL");
        app.apply(Update::Details {
            ticker: "AAPL".to_string(),
            asset: Box::new(asset(1, "AAPL", "Stock", 190.0)),
            chart: None,
        });
        assert_eq!(
            app.handle_key(KeyCode::Char('r')),
            Some(Request::LoadAll {
                details: Some("AAPL".to_string())
            })
        );
        assert_eq!(app.pending_details.as_deref(), Some("AAPL"));
    }

    const TX_JSON: &str = r#"{"id": 21, "type": "BUY", "amount": 2.0, "price": 180.0, "asset": {"ticker": "AAPL", "name": "Apple"}}"#;
    const PORTFOLIO_JSON: &str =
        r#"{"user": "jan", "balance": 100.0, "assets": [], "transactions": []}"#;

    fn mutations() -> Vec<(&'static str, &'static str, Request)> {
        vec![
            (
                "POST",
                "/api/transactions/buy",
                Request::Buy {
                    ticker: "AAPL".to_string(),
                    amount: 2.0,
                    price: 180.0,
                },
            ),
            (
                "POST",
                "/api/transactions/sell",
                Request::Sell {
                    asset_id: 7,
                    amount: 1.0,
                    price: 190.0,
                },
            ),
            (
                "PUT",
                "/api/transactions/21/edit",
                Request::Edit {
                    transaction_id: 21,
                    amount: 2.0,
                    price: 9.0,
                    kind: TransactionType::Sell,
                },
            ),
            ("DELETE", "/api/transactions/21", Request::Delete(21)),
        ]
    }

    async fn run_mutation(
        method: &str,
        path: &str,
        status: usize,
        request: Request,
        refetches: usize,
    ) -> Vec<Update> {
        let mut server = mockito::Server::new_async().await;
        let mutation = server
            .mock(method, path)
            .match_query(mockito::Matcher::UrlEncoded("userId".into(), "1".into()))
            .with_status(status)
            .with_body(TX_JSON)
            .expect(1)
            .create_async()
            .await;
        let portfolio = server
            .mock("GET", "/api/portfolio/1")
            .with_status(200)
            .with_body(PORTFOLIO_JSON)
            .expect(refetches)
            .create_async()
            .await;
        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);

        let updates = handle_request(&client, 1, request).await;
        mutation.assert_async().await;
        portfolio.assert_async().await;
        updates
    }

    #[tokio::test]
    async fn test_mutations_refetch_portfolio() {
        for (method, path, request) in mutations() {
            let updates = run_mutation(method, path, 200, request, 1).await;
            assert!(
                matches!(&updates[..], [Update::Message(_), Update::Portfolio(_)]),
                "{method} {path}: {updates:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_mutation_skips_refetch() {
        for (method, path, request) in mutations() {
            let updates = run_mutation(method, path, 500, request, 0).await;
            assert!(
                matches!(&updates[..], [Update::Error(_)]),
                "{method} {path}: {updates:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_load_all() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/assets")
            .with_status(200)
            .with_body(r#"[{"ticker": "AAPL", "name": "Apple"}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/market-types")
            .with_status(200)
            .with_body(r#"[{"id": 1, "name": "Stock"}]"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/portfolio/1")
            .with_status(200)
            .with_body(PORTFOLIO_JSON)
            .create_async()
            .await;
        server
            .mock("GET", "/api/assets/AAPL")
            .with_status(200)
            .with_body(r#"{"ticker": "AAPL", "name": "Apple"}"#)
            .create_async()
            .await;
        server
            .mock("GET", DEFAULT_CLOSES_PATH)
            .with_status(200)
            .with_body("Symbol,Category,Close_1,Close_2,Close_3,Close_4,Close_5\nAAPL,stocks,5,4,3,2,1\n")
            .create_async()
            .await;
        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);

        let updates = handle_request(&client, 1, Request::LoadAll { details: None }).await;
        assert!(
            matches!(
                &updates[..],
                [Update::Assets(_), Update::Markets(_), Update::Portfolio(_)]
            ),
            "{updates:?}"
        );

        let request = Request::LoadAll {
            details: Some("AAPL".to_string()),
        };
        let updates = handle_request(&client, 1, request).await;
        match updates.last() {
            Some(Update::Details { ticker, chart, .. }) => {
                assert_eq!(ticker, "AAPL");
                assert!(chart.is_some());
            }
            other => panic!("unexpected last update: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_load_all_reports_failures() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/assets")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/api/market-types")
            .with_status(500)
            .create_async()
            .await;
        server
            .mock("GET", "/api/portfolio/1")
            .with_status(200)
            .with_body(PORTFOLIO_JSON)
            .create_async()
            .await;
        let client = ApiClient::new(&server.url(), DEFAULT_CLOSES_PATH);

        let updates = handle_request(&client, 1, Request::LoadAll { details: None }).await;
        // missing market types only narrow the filter, they are not shown as an error
        assert!(
            matches!(&updates[..], [Update::Error(_), Update::Portfolio(_)]),
            "{updates:?}"
        );

        let mut app = App::new("USD".to_string());
        for update in updates {
            app.apply(update);
        }
        assert!(!app.loading);
        assert!(app
            .error_message
            .as_deref()
            .is_some_and(|m| m.starts_with("Error loading assets")));
    }

    #[tokio::test]
    async fn test_run_app_applies_updates_and_quits() {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        let mut app = App::new("USD".to_string());
        let (request_sender, mut request_receiver) = mpsc::unbounded_channel();
        let (update_sender, mut update_receiver) = mpsc::unbounded_channel();
        update_sender
            .send(Update::Assets(vec![asset(1, "AAPL", "Stock", 190.0)]))
            .unwrap();

        let mut keys = vec![KeyCode::Char('q'), KeyCode::Char('r')];
        run_app(
            &mut terminal,
            &mut app,
            &request_sender,
            &mut update_receiver,
            || Ok(keys.pop()),
        )
        .await
        .unwrap();

        assert!(app.should_quit);
        assert_eq!(app.assets.len(), 1);
        assert_eq!(
            request_receiver.try_recv().unwrap(),
            Request::LoadAll { details: None }
        );
    }

    #[tokio::test]
    async fn test_run_app_returns_input_errors() {
        let mut terminal = Terminal::new(TestBackend::new(100, 30)).unwrap();
        let mut app = App::new("USD".to_string());
        let (request_sender, _request_receiver) = mpsc::unbounded_channel();
        let (_update_sender, mut update_receiver) = mpsc::unbounded_channel();

        let res = run_app(
            &mut terminal,
            &mut app,
            &request_sender,
            &mut update_receiver,
            || Err(io::Error::other("terminal closed")),
        )
        .await;

        assert_eq!(res.unwrap_err().to_string(), "terminal closed");
    }
}

