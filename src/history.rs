//! Recent close prices for the asset detail chart.
//!
//! The closes file is a small CSV with one row per asset:
//! `Symbol,Category,Close_1,Close_2,Close_3,Close_4,Close_5`, where `Close_1`
//! is the most recent close. Values may be quoted.

use log::{debug, trace};

/// Labels for the five chart points, oldest first.
pub const DAY_LABELS: [&str; 5] = ["Day 1", "Day 2", "Day 3", "Day 4", "Day 5"];

const CLOSE_COLUMNS: std::ops::Range<usize> = 2..7;

/// One data row of the closes file.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosesRecord {
    pub symbol: String,
    pub category: String,
    /// Most recent first. `None` where the field is not a finite number.
    pub closes: Vec<Option<f64>>,
}

impl ClosesRecord {
    fn parse(row: &str) -> ClosesRecord {
        let cols: Vec<String> = row.split(',').map(clean_field).collect();

        let closes = cols
            .get(CLOSE_COLUMNS.start..CLOSE_COLUMNS.end.min(cols.len()))
            .unwrap_or_default()
            .iter()
            .map(|value| parse_close(value))
            .collect();

        ClosesRecord {
            symbol: cols.first().cloned().unwrap_or_default(),
            category: cols.get(1).cloned().unwrap_or_default(),
            closes,
        }
    }
}

/// Result of looking a ticker up in the closes file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CloseHistory {
    pub found: bool,
    /// Oldest first, aligned with [`DAY_LABELS`].
    pub series: Vec<Option<f64>>,
}

impl CloseHistory {
    pub fn not_found() -> CloseHistory {
        CloseHistory::default()
    }

    /// Builds the chart input for this history, or `None` when there is nothing to plot.
    pub fn into_chart_series(self, series_label: impl Into<String>) -> Option<ChartSeries> {
        if !self.found {
            return None;
        }
        Some(ChartSeries {
            labels: DAY_LABELS,
            series_label: series_label.into(),
            values: self.series,
        })
    }
}

/// What a chart sink receives: fixed day labels and one labeled series.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub labels: [&'static str; 5],
    pub series_label: String,
    pub values: Vec<Option<f64>>,
}

impl ChartSeries {
    /// Points that carry data, as `(day index starting at 1, close)`.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|close| ((i + 1) as f64, close)))
            .collect()
    }

    pub fn min_max(&self) -> Option<(f64, f64)> {
        self.values.iter().flatten().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}

/// Data rows of the closes file, in file order. The header and blank lines are skipped.
pub fn records(csv_text: &str) -> impl Iterator<Item = ClosesRecord> + '_ {
    csv_text
        .split('\n')
        .skip(1)
        .filter(|row| !row.trim().is_empty())
        .map(ClosesRecord::parse)
}

/// Looks up `ticker` (exact, case-sensitive) and returns its closes oldest first.
///
/// Every row is scanned and the last row with a matching symbol wins, so a
/// ticker listed twice reports the later row. A match whose row has no close
/// columns reports `found = false`. Malformed numbers become `None`; this
/// function never fails.
pub fn extract_close_history(csv_text: &str, ticker: &str) -> CloseHistory {
    let mut matched: Option<ClosesRecord> = None;

    for (index, record) in records(csv_text).enumerate() {
        trace!("closes row {index}: {record:?}");
        if record.symbol == ticker {
            if matched.is_some() {
                debug!("{ticker} appears more than once in the closes file, using row {index}");
            }
            matched = Some(record);
        }
    }

    let Some(record) = matched else {
        return CloseHistory::not_found();
    };

    let mut series = record.closes;
    series.reverse();
    debug!("closes for {ticker} ({}), oldest first: {series:?}", record.category);

    CloseHistory {
        found: !series.is_empty(),
        series,
    }
}

fn clean_field(field: &str) -> String {
    field.replace('"', "").trim().to_string()
}

fn parse_close(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}
