//! Header, detail and summary lines.

use chrono::NaiveDate;
use nightbatch_core::Decimal;
use thiserror::Error;

use crate::column::{Align, Column, fit};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReportError {
    #[error("record has {actual} cells, layout has {expected} columns")]
    ColumnCount { expected: usize, actual: usize },
}

/// One value of a detail line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    Text(String),
    Amount(Decimal),
    Count(u64),
    Date(Option<NaiveDate>),
    Blank,
}

impl Cell {
    pub fn text(value: impl Into<String>) -> Self {
        Cell::Text(value.into())
    }
}

/// A record that can be shown as a detail line.
pub trait ReportRecord {
    fn cells(&self) -> Vec<Cell>;
}

/// Report identity and the period it covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportHeader {
    pub report_id: String,
    pub title: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// A labelled total, e.g. per account, per page, or for the whole report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTotals {
    pub label: String,
    pub count: Option<u64>,
    pub amount: Option<Decimal>,
}

/// Renders lines for one column layout. Every line it produces has exactly
/// [`ReportEmitter::width`] characters.
#[derive(Debug, Clone)]
pub struct ReportEmitter {
    columns: Vec<Column>,
    separator: &'static str,
    scale: u8,
    grouped: bool,
}

impl ReportEmitter {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            columns,
            separator: " ",
            scale: 2,
            grouped: true,
        }
    }

    pub fn with_separator(mut self, separator: &'static str) -> Self {
        self.separator = separator;
        self
    }

    pub fn with_scale(mut self, scale: u8) -> Self {
        self.scale = scale;
        self
    }

    /// Render amounts without thousands separators.
    pub fn ungrouped(mut self) -> Self {
        self.grouped = false;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn width(&self) -> usize {
        let gaps = self.columns.len().saturating_sub(1) * self.separator.chars().count();
        self.columns.iter().map(|c| c.width).sum::<usize>() + gaps
    }

    /// Report id and title on the left, the covered period on the right.
    pub fn emit_header(&self, header: &ReportHeader) -> String {
        let period = format!(
            "Date Range: {} to {}",
            header.start_date.format("%Y-%m-%d"),
            header.end_date.format("%Y-%m-%d")
        );
        let width = self.width();
        let right = fit(&period, width.min(period.len()), Align::Right);
        let left_width = width - right.chars().count();
        let left = fit(
            &format!("{}  {}", header.report_id, header.title),
            left_width,
            Align::Left,
        );
        format!("{left}{right}")
    }

    pub fn emit_column_headings(&self) -> String {
        self.join(self.columns.iter().map(Column::heading))
    }

    pub fn emit_rule(&self) -> String {
        "-".repeat(self.width())
    }

    pub fn emit_detail(&self, record: &impl ReportRecord) -> Result<String, ReportError> {
        let cells = record.cells();
        if cells.len() != self.columns.len() {
            return Err(ReportError::ColumnCount {
                expected: self.columns.len(),
                actual: cells.len(),
            });
        }
        Ok(self.join(
            self.columns
                .iter()
                .zip(&cells)
                .map(|(column, cell)| column.render(&self.cell_text(cell))),
        ))
    }

    /// Label on the left; count and amount right-aligned in the last column.
    pub fn emit_summary(&self, totals: &ReportTotals) -> String {
        let width = self.width();
        let last = self.columns.last().map(|c| c.width).unwrap_or(0).min(width);
        let amount = totals
            .amount
            .map(|a| Column::number("total", last).render(&format_amount(&a, self.scale, self.grouped)))
            .unwrap_or_else(|| " ".repeat(last));

        let label = match totals.count {
            Some(count) => format!("{} ({count})", totals.label),
            None => totals.label.clone(),
        };
        format!("{}{amount}", fit(&label, width - last, Align::Left))
    }

    fn cell_text(&self, cell: &Cell) -> String {
        match cell {
            Cell::Text(s) => s.clone(),
            Cell::Amount(d) => format_amount(d, self.scale, self.grouped),
            Cell::Count(n) => n.to_string(),
            Cell::Date(Some(d)) => d.format("%Y-%m-%d").to_string(),
            Cell::Date(None) | Cell::Blank => String::new(),
        }
    }

    fn join(&self, parts: impl Iterator<Item = String>) -> String {
        parts.collect::<Vec<_>>().join(self.separator)
    }
}

/// Decimal rendering for reports: exact digits at `scale`, optionally with
/// `,` thousands separators. Never goes through floating point.
pub fn format_amount(value: &Decimal, scale: u8, grouped: bool) -> String {
    let plain = value.format(scale);
    if !grouped {
        return plain;
    }
    let (sign, digits) = match plain.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", plain.as_str()),
    };
    let (int, frac) = match digits.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (digits, None),
    };

    let mut grouped_int = String::with_capacity(int.len() + int.len() / 3);
    for (i, ch) in int.chars().enumerate() {
        if i > 0 && (int.len() - i) % 3 == 0 {
            grouped_int.push(',');
        }
        grouped_int.push(ch);
    }

    match frac {
        Some(frac) => format!("{sign}{grouped_int}.{frac}"),
        None => format!("{sign}{grouped_int}"),
    }
}
