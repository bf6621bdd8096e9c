//! Manually maintained portfolio positions.
//!
//! Positions come from `add-holding` or a CSV export with the columns
//! `ticker,quantity[,avg_cost[,current_price]]`; a missing cost or price is stored as zero.

use anyhow::Context;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub ticker: String,
    pub quantity: f64,
    pub avg_cost: f64,
    pub current_price: f64,
}

impl Holding {
    pub fn new(ticker: &str, quantity: f64, avg_cost: f64, current_price: f64) -> anyhow::Result<Self> {
        let ticker = ticker.trim().to_ascii_uppercase();
        anyhow::ensure!(!ticker.is_empty(), "ticker must be non-empty");
        anyhow::ensure!(
            ticker
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '^')),
            "invalid ticker: {ticker}"
        );
        for (name, value) in [
            ("quantity", quantity),
            ("avg_cost", avg_cost),
            ("current_price", current_price),
        ] {
            anyhow::ensure!(
                value.is_finite() && value >= 0.0,
                "{name} must be a non-negative number (got {value})"
            );
        }
        anyhow::ensure!(quantity > 0.0, "quantity must be positive for {ticker}");

        Ok(Self {
            ticker,
            quantity,
            avg_cost,
            current_price,
        })
    }

    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn cost_basis(&self) -> f64 {
        self.quantity * self.avg_cost
    }

    /// `None` without a cost basis.
    pub fn gain_percent(&self) -> Option<f64> {
        (self.avg_cost > 0.0).then(|| (self.current_price - self.avg_cost) / self.avg_cost * 100.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PortfolioSummary {
    pub positions: usize,
    pub total_cost: f64,
    pub total_value: f64,
}

impl PortfolioSummary {
    pub fn from_holdings<'a>(holdings: impl IntoIterator<Item = &'a Holding>) -> Self {
        holdings.into_iter().fold(Self::default(), |acc, h| Self {
            positions: acc.positions + 1,
            total_cost: acc.total_cost + h.cost_basis(),
            total_value: acc.total_value + h.market_value(),
        })
    }

    pub fn gain(&self) -> f64 {
        self.total_value - self.total_cost
    }

    pub fn gain_percent(&self) -> Option<f64> {
        (self.total_cost > 0.0).then(|| self.gain() / self.total_cost * 100.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RejectedRow {
    /// 1-based line in the source file.
    pub line: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CsvImport {
    pub holdings: Vec<Holding>,
    pub rejected: Vec<RejectedRow>,
}

/// Parses a holdings CSV. The first line is a header; blank lines and `#` comments are skipped.
/// Invalid rows are collected in `rejected` instead of failing the whole file.
pub fn parse_holdings_csv<R: std::io::Read>(reader: R) -> anyhow::Result<CsvImport> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut out = CsvImport::default();
    for record in rdr.records() {
        let record = record.context("read holdings CSV failed")?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        match holding_from_record(&record) {
            Ok(h) => out.holdings.push(h),
            Err(err) => out.rejected.push(RejectedRow {
                line,
                reason: format!("{err:#}"),
            }),
        }
    }
    Ok(out)
}

fn holding_from_record(record: &csv::StringRecord) -> anyhow::Result<Holding> {
    anyhow::ensure!(
        record.len() >= 2,
        "expected ticker,quantity[,avg_cost[,current_price]]"
    );
    let quantity = parse_number(record.get(1), "quantity")?.context("quantity is required")?;
    let avg_cost = parse_number(record.get(2), "avg_cost")?.unwrap_or(0.0);
    let current_price = parse_number(record.get(3), "current_price")?.unwrap_or(0.0);
    Holding::new(record.get(0).unwrap_or_default(), quantity, avg_cost, current_price)
}

fn parse_number(field: Option<&str>, name: &str) -> anyhow::Result<Option<f64>> {
    match field.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .with_context(|| format!("invalid {name}: {raw}")),
    }
}
