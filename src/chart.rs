use crate::api::ApiClient;
use crate::history::{extract_close_history, ChartSeries};
use crate::model::Asset;
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, CellAlignment, ContentArrangement, Table};
use log::{error, warn};
use std::io::Write;

const BARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Something that can display a close price series.
pub trait ChartSink {
    fn render(&mut self, series: &ChartSeries);
}

/// Writes the series as a table plus a one-line sparkline.
pub struct TerminalChart<W: Write> {
    out: W,
}

impl TerminalChart<std::io::Stdout> {
    pub fn stdout() -> Self {
        TerminalChart {
            out: std::io::stdout(),
        }
    }
}

impl<W: Write> TerminalChart<W> {
    pub fn new(out: W) -> Self {
        TerminalChart { out }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> ChartSink for TerminalChart<W> {
    fn render(&mut self, series: &ChartSeries) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(
                series
                    .labels
                    .iter()
                    .map(|l| Cell::new(l).add_attribute(Attribute::Bold)),
            );
        table.add_row(series.labels.iter().enumerate().map(|(i, _)| {
            let text = match series.values.get(i).copied().flatten() {
                Some(v) => format!("{v:.2}"),
                None => "-".to_string(),
            };
            Cell::new(text).set_alignment(CellAlignment::Right)
        }));

        // write errors are ignored, a missing chart is not fatal
        let _ = writeln!(self.out, "{}", series.series_label);
        let _ = writeln!(self.out, "{table}");
        let _ = writeln!(self.out, "{}", sparkline(&series.values));
    }
}

/// One block character per value, scaled between the series min and max. Missing values are blanks.
pub fn sparkline(values: &[Option<f64>]) -> String {
    let present = values.iter().flatten();
    let lo = present.clone().fold(f64::INFINITY, |a, &b| a.min(b));
    let hi = present.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let span = hi - lo;

    values
        .iter()
        .map(|v| match v {
            None => ' ',
            Some(_) if span <= 0.0 => BARS[BARS.len() / 2],
            Some(v) => {
                let idx = ((v - lo) / span * (BARS.len() - 1) as f64).round() as usize;
                BARS[idx.min(BARS.len() - 1)]
            }
        })
        .collect()
}

/// Fetches the closes file and builds the chart series for `asset`.
///
/// The fetch completes before parsing starts. Every failure is logged and
/// turned into `None`, so the caller simply skips the chart.
pub async fn load_close_chart(client: &ApiClient, asset: &Asset) -> Option<ChartSeries> {
    let text = match client.closes_csv().await {
        Ok(text) => text,
        Err(e) => {
            error!("Cannot load CSV with closes: {e}");
            return None;
        }
    };

    let series = extract_close_history(&text, &asset.ticker).into_chart_series(asset.chart_label());
    if series.is_none() {
        warn!(
            "No chart data found for {} in category {}",
            asset.ticker,
            asset.market_name().unwrap_or("-")
        );
    }
    series
}
