//! CSV exports for the accountant: timesheet, sales journal, expenses and
//! purchases.
//!
//! Amounts are written with two decimals; the delimiter and decimal separator
//! come from [`ExportConfig`].

use std::collections::HashMap;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::billing::{RateBook, vat_amount};
use crate::config::ExportConfig;
use crate::db::{
    CreditNoteRecord, Database, ExpenseFilter, ExpenseRecord, InvoiceFilter, InvoiceRecord,
    InvoiceStatus, MatterFilter, PurchaseRecord, TimeEntryFilter, TimeEntryRecord,
};
use crate::error::{DatabaseError, ExportError};
use crate::timesheet::{matter_ids, minutes_to_hours};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportKind {
    Timesheet,
    SalesJournal,
    Expenses,
    Purchases,
}

impl ExportKind {
    pub fn from_name(name: &str) -> Result<Self, ExportError> {
        match name.trim().trim_end_matches(".csv") {
            "timesheet" | "time-entries" => Ok(Self::Timesheet),
            "invoices" | "sales-journal" => Ok(Self::SalesJournal),
            "expenses" => Ok(Self::Expenses),
            "purchases" => Ok(Self::Purchases),
            other => Err(ExportError::UnknownKind(other.to_string())),
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Self::Timesheet => "timesheet.csv",
            Self::SalesJournal => "sales-journal.csv",
            Self::Expenses => "expenses.csv",
            Self::Purchases => "purchases.csv",
        }
    }
}

/// Inclusive date window applied to the export's primary date column.
#[derive(Debug, Clone, Copy, Default)]
pub struct Period {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl Period {
    fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// Display labels for ids that appear in export rows.
#[derive(Debug, Clone, Default)]
pub struct Labels {
    pub matters: HashMap<Uuid, String>,
    pub clients: HashMap<Uuid, String>,
    pub members: HashMap<Uuid, String>,
    pub invoices: HashMap<Uuid, String>,
}

impl Labels {
    fn get(map: &HashMap<Uuid, String>, id: Uuid) -> String {
        map.get(&id).cloned().unwrap_or_else(|| id.to_string())
    }

    fn invoice(&self, id: Option<Uuid>) -> String {
        id.map(|id| Self::get(&self.invoices, id)).unwrap_or_default()
    }
}

struct Csv {
    writer: csv::Writer<Vec<u8>>,
    decimal_comma: bool,
}

impl Csv {
    fn new(config: &ExportConfig) -> Self {
        Self {
            writer: csv::WriterBuilder::new()
                .delimiter(config.delimiter)
                .from_writer(Vec::new()),
            decimal_comma: config.decimal_comma,
        }
    }

    fn money(&self, value: Decimal) -> String {
        self.localize(format!("{value:.2}"))
    }

    fn number(&self, value: Decimal) -> String {
        self.localize(value.normalize().to_string())
    }

    fn localize(&self, raw: String) -> String {
        if self.decimal_comma {
            raw.replace('.', ",")
        } else {
            raw
        }
    }

    fn row<I, T>(&mut self, fields: I) -> Result<(), ExportError>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        self.writer
            .write_record(fields)
            .map_err(|e| ExportError::Csv(e.to_string()))
    }

    fn finish(self) -> Result<String, ExportError> {
        let bytes = self
            .writer
            .into_inner()
            .map_err(|e| ExportError::Csv(e.to_string()))?;
        String::from_utf8(bytes).map_err(|e| ExportError::Csv(e.to_string()))
    }
}

fn date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

pub fn timesheet_csv(
    entries: &[TimeEntryRecord],
    labels: &Labels,
    rates: &RateBook,
    config: &ExportConfig,
) -> Result<String, ExportError> {
    let mut csv = Csv::new(config);
    csv.row([
        "date",
        "matter",
        "member",
        "description",
        "minutes",
        "billed_minutes",
        "hours",
        "billable",
        "hourly_rate",
        "amount",
        "invoice",
    ])?;
    for entry in entries {
        let (rate, amount) = if entry.billable {
            let (rate, _) = rates.rate_for(entry);
            (
                csv.money(rate),
                csv.money(crate::billing::amount_for_minutes(entry.billed_minutes, rate)),
            )
        } else {
            (String::new(), csv.money(Decimal::ZERO))
        };
        let hours = csv.money(minutes_to_hours(entry.billed_minutes));
        csv.row([
            date(entry.work_date),
            Labels::get(&labels.matters, entry.matter_id),
            Labels::get(&labels.members, entry.profile_id),
            entry.description.clone(),
            entry.minutes.to_string(),
            entry.billed_minutes.to_string(),
            hours,
            yes_no(entry.billable).to_string(),
            rate,
            amount,
            labels.invoice(entry.invoice_id),
        ])?;
    }
    csv.finish()
}

/// Issued invoices and credit notes (as negative amounts), by date then number.
pub fn sales_journal_csv(
    invoices: &[InvoiceRecord],
    credit_notes: &[CreditNoteRecord],
    labels: &Labels,
    period: Period,
    config: &ExportConfig,
) -> Result<String, ExportError> {
    struct Row {
        date: NaiveDate,
        fields: Vec<String>,
    }

    let mut csv = Csv::new(config);
    csv.row([
        "type",
        "number",
        "date",
        "due_date",
        "client",
        "matter",
        "net",
        "vat",
        "gross",
        "paid",
        "status",
        "applies_to",
        "currency",
    ])?;

    let by_id: HashMap<Uuid, &InvoiceRecord> = invoices.iter().map(|i| (i.id, i)).collect();
    let mut rows: Vec<Row> = Vec::new();

    for invoice in invoices {
        let (Some(issued_on), Some(number)) = (invoice.issue_date, invoice.number.as_ref()) else {
            continue;
        };
        if invoice.status == InvoiceStatus::Draft || !period.contains(issued_on) {
            continue;
        }
        rows.push(Row {
            date: issued_on,
            fields: vec![
                "invoice".to_string(),
                number.clone(),
                date(issued_on),
                invoice.due_date.map(date).unwrap_or_default(),
                Labels::get(&labels.clients, invoice.client_id),
                Labels::get(&labels.matters, invoice.matter_id),
                csv.money(invoice.net_total),
                csv.money(invoice.vat_total),
                csv.money(invoice.gross_total),
                csv.money(invoice.paid_total),
                invoice.status.as_str().to_string(),
                String::new(),
                invoice.currency.clone(),
            ],
        });
    }

    for note in credit_notes {
        if !period.contains(note.issue_date) {
            continue;
        }
        let invoice = by_id.get(&note.invoice_id);
        rows.push(Row {
            date: note.issue_date,
            fields: vec![
                "credit_note".to_string(),
                note.number.clone(),
                date(note.issue_date),
                String::new(),
                invoice
                    .map(|i| Labels::get(&labels.clients, i.client_id))
                    .unwrap_or_default(),
                invoice
                    .map(|i| Labels::get(&labels.matters, i.matter_id))
                    .unwrap_or_default(),
                csv.money(-note.net_amount),
                csv.money(-note.vat_amount),
                csv.money(-note.gross_amount),
                String::new(),
                String::new(),
                invoice
                    .and_then(|i| i.number.clone())
                    .unwrap_or_default(),
                invoice.map(|i| i.currency.clone()).unwrap_or_default(),
            ],
        });
    }

    rows.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.fields[1].cmp(&b.fields[1])));
    for row in rows {
        csv.row(row.fields)?;
    }
    csv.finish()
}

pub fn expenses_csv(
    expenses: &[ExpenseRecord],
    labels: &Labels,
    config: &ExportConfig,
) -> Result<String, ExportError> {
    let mut csv = Csv::new(config);
    csv.row([
        "date",
        "matter",
        "member",
        "description",
        "net",
        "vat_rate",
        "vat",
        "gross",
        "billable",
        "invoice",
    ])?;
    for expense in expenses {
        let vat = vat_amount(expense.amount, expense.vat_rate);
        csv.row([
            date(expense.incurred_on),
            Labels::get(&labels.matters, expense.matter_id),
            Labels::get(&labels.members, expense.profile_id),
            expense.description.clone(),
            csv.money(expense.amount),
            csv.number(expense.vat_rate),
            csv.money(vat),
            csv.money(expense.amount + vat),
            yes_no(expense.billable).to_string(),
            labels.invoice(expense.invoice_id),
        ])?;
    }
    csv.finish()
}

pub fn purchases_csv(
    purchases: &[PurchaseRecord],
    config: &ExportConfig,
) -> Result<String, ExportError> {
    let mut csv = Csv::new(config);
    csv.row([
        "date",
        "supplier",
        "description",
        "category",
        "net",
        "vat_rate",
        "vat",
        "gross",
    ])?;
    for purchase in purchases {
        csv.row([
            date(purchase.purchased_on),
            purchase.supplier.clone(),
            purchase.description.clone(),
            purchase.category.clone().unwrap_or_default(),
            csv.money(purchase.net_amount),
            csv.number(purchase.vat_rate),
            csv.money(purchase.vat_amount),
            csv.money(purchase.net_amount + purchase.vat_amount),
        ])?;
    }
    csv.finish()
}

async fn load_labels(db: &dyn Database, tenant_id: Uuid) -> Result<Labels, DatabaseError> {
    let mut labels = Labels::default();
    for matter in db.list_matters(tenant_id, &MatterFilter::default()).await? {
        labels.matters.insert(matter.id, matter.reference);
    }
    for client in db.list_clients(tenant_id, None).await? {
        labels.clients.insert(client.id, client.name);
    }
    for member in db.list_memberships(tenant_id).await? {
        labels.members.insert(member.profile_id, member.display_name);
    }
    for invoice in db.list_invoices(tenant_id, &InvoiceFilter::default()).await? {
        if let Some(number) = invoice.number {
            labels.invoices.insert(invoice.id, number);
        }
    }
    Ok(labels)
}

/// Load the rows for `kind` in `period` and render them.
pub async fn export(
    db: &dyn Database,
    tenant_id: Uuid,
    kind: ExportKind,
    period: Period,
    config: &ExportConfig,
) -> Result<String, ExportError> {
    let labels = load_labels(db, tenant_id).await?;
    let out = match kind {
        ExportKind::Timesheet => {
            let entries = db
                .list_time_entries(
                    tenant_id,
                    &TimeEntryFilter {
                        from: period.from,
                        to: period.to,
                        ..Default::default()
                    },
                )
                .await?;
            let settings = db.get_cabinet_settings(tenant_id).await?.ok_or_else(|| {
                DatabaseError::NotFound {
                    entity: "cabinet settings".to_string(),
                    id: tenant_id.to_string(),
                }
            })?;
            let rates = RateBook::load(db, tenant_id, &settings, &matter_ids(&entries)).await?;
            timesheet_csv(&entries, &labels, &rates, config)?
        }
        ExportKind::SalesJournal => {
            let invoices = db
                .list_invoices(tenant_id, &InvoiceFilter::default())
                .await?;
            let notes = db.list_credit_notes(tenant_id, None).await?;
            sales_journal_csv(&invoices, &notes, &labels, period, config)?
        }
        ExportKind::Expenses => {
            let expenses = db
                .list_expenses(
                    tenant_id,
                    &ExpenseFilter {
                        from: period.from,
                        to: period.to,
                        ..Default::default()
                    },
                )
                .await?;
            expenses_csv(&expenses, &labels, config)?
        }
        ExportKind::Purchases => {
            let purchases = db.list_purchases(tenant_id, period.from, period.to).await?;
            purchases_csv(&purchases, config)?
        }
    };
    tracing::info!(%tenant_id, kind = kind.file_name(), bytes = out.len(), "Rendered CSV export");
    Ok(out)
}
