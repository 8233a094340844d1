//! Transaction detail report with account, page and grand totals.

use std::sync::Arc;

use nightbatch_batch::{ExecutionContext, ItemProcessor};
use nightbatch_core::{Decimal, DecimalSpec, ItemError};
use nightbatch_records::{Transaction, account_key};
use nightbatch_reports::{Cell, Column, ReportEmitter, ReportHeader, ReportRecord, ReportTotals};
use serde::{Deserialize, Serialize};

use crate::store::CardStore;

/// Lines produced for one input transaction (or for the report's end).
pub type ReportLines = Vec<String>;

const STATE_KEY: &str = "report.state";

pub const REPORT_ID: &str = "CARDRPT1";
pub const REPORT_TITLE: &str = "Daily Transaction Report";

/// The detail layout. Card numbers are not part of it.
pub fn report_emitter() -> ReportEmitter {
    ReportEmitter::new(vec![
        Column::text("Transaction ID", 16),
        Column::text("Account ID", 11),
        Column::text("Type", 4),
        Column::text("Cat", 4),
        Column::text("Source", 10),
        Column::number("Amount", 16),
    ])
}

struct DetailRow<'a> {
    account_id: u64,
    tx: &'a Transaction,
}

impl ReportRecord for DetailRow<'_> {
    fn cells(&self) -> Vec<Cell> {
        vec![
            Cell::text(self.tx.id.as_str()),
            Cell::Text(account_key(self.account_id)),
            Cell::text(self.tx.type_code.as_str()),
            Cell::Text(format!("{:04}", self.tx.category_code)),
            Cell::text(self.tx.source.as_str()),
            Cell::Amount(self.tx.amount),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Running {
    count: u64,
    total: Decimal,
}

impl Default for Running {
    fn default() -> Self {
        Self {
            count: 0,
            total: Decimal::zero(DecimalSpec::BALANCE),
        }
    }
}

impl Running {
    fn add(&mut self, amount: &Decimal) -> Result<(), ItemError> {
        self.total = self.total.add(amount)?;
        self.count += 1;
        Ok(())
    }

    fn totals(&self, label: &str) -> ReportTotals {
        ReportTotals {
            label: label.to_string(),
            count: Some(self.count),
            amount: Some(self.total),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct ReportState {
    page_open: bool,
    account: Option<u64>,
    account_totals: Running,
    page_totals: Running,
    grand_totals: Running,
}

/// Turns transactions (sorted by card) into report lines.
///
/// Running totals are checkpointed, so a restarted report continues its
/// totals where the last committed chunk left them.
pub struct TransactionReportProcessor {
    store: Arc<dyn CardStore>,
    emitter: ReportEmitter,
    header: ReportHeader,
    page_size: u64,
    state: ReportState,
}

impl TransactionReportProcessor {
    pub fn new(store: Arc<dyn CardStore>, header: ReportHeader, page_size: u64) -> Self {
        Self {
            store,
            emitter: report_emitter(),
            header,
            page_size: page_size.max(1),
            state: ReportState::default(),
        }
    }

    fn page_heading(&self, lines: &mut ReportLines) {
        lines.push(self.emitter.emit_header(&self.header));
        lines.push(self.emitter.emit_column_headings());
        lines.push(self.emitter.emit_rule());
    }

    fn close_account(&self, state: &mut ReportState, lines: &mut ReportLines) {
        if let Some(account) = state.account.take() {
            let label = format!("Account {} Total", account_key(account));
            lines.push(self.emitter.emit_summary(&state.account_totals.totals(&label)));
            state.account_totals = Running::default();
        }
    }

    fn close_page(&self, state: &mut ReportState, lines: &mut ReportLines) {
        lines.push(self.emitter.emit_summary(&state.page_totals.totals("Page Total")));
        lines.push(self.emitter.emit_rule());
        state.page_totals = Running::default();
        state.page_open = false;
    }
}

impl ItemProcessor for TransactionReportProcessor {
    type In = Transaction;
    type Out = ReportLines;

    fn open(&mut self, context: &ExecutionContext) -> Result<(), ItemError> {
        self.state = context
            .get(STATE_KEY)
            .map_err(|e| ItemError::unclassified(e.to_string()))?
            .unwrap_or_default();
        Ok(())
    }

    fn process(&mut self, tx: &Transaction) -> Result<Option<ReportLines>, ItemError> {
        let account_id = self
            .store
            .xref_by_card(&tx.card_number)
            .map_err(|e| ItemError::from(e).or_key(|| tx.id.clone()))?
            .map(|x| x.account_id)
            .ok_or_else(|| {
                ItemError::constraint("100 INVALID CARD NUMBER FOUND").with_key(tx.id.clone())
            })?;

        // Work on a copy so a failed item leaves the totals untouched.
        let mut state = self.state.clone();
        let mut lines = ReportLines::new();

        if state.account.is_some_and(|a| a != account_id) {
            self.close_account(&mut state, &mut lines);
        }
        if !state.page_open {
            self.page_heading(&mut lines);
            state.page_open = true;
        }

        let row = DetailRow { account_id, tx };
        lines.push(
            self.emitter
                .emit_detail(&row)
                .map_err(|e| ItemError::unclassified(e.to_string()))?,
        );
        state.account = Some(account_id);
        state.account_totals.add(&tx.amount)?;
        state.page_totals.add(&tx.amount)?;
        state.grand_totals.add(&tx.amount)?;

        if state.page_totals.count >= self.page_size {
            self.close_page(&mut state, &mut lines);
        }

        self.state = state;
        Ok(Some(lines))
    }

    fn drain(&mut self) -> Result<Vec<ReportLines>, ItemError> {
        let mut state = self.state.clone();
        let mut lines = ReportLines::new();

        if state.grand_totals.count == 0 {
            self.page_heading(&mut lines);
        }
        self.close_account(&mut state, &mut lines);
        if state.page_totals.count > 0 {
            self.close_page(&mut state, &mut lines);
        }
        lines.push(self.emitter.emit_summary(&state.grand_totals.totals("Grand Total")));

        self.state = state;
        Ok(vec![lines])
    }

    fn update(&mut self, context: &mut ExecutionContext) -> Result<(), ItemError> {
        context
            .put(STATE_KEY, &self.state)
            .map_err(|e| ItemError::unclassified(e.to_string()))
    }
}
