use chrono::{Datelike, NaiveDate, Utc};
use libsql::params;
use uuid::Uuid;

use crate::billing::invoice::{plan_credit_note, plan_payment};
use crate::db::{
    CreateCreditNoteParams, CreateInvoiceLineParams, CreateInvoiceParams, CreatePaymentParams,
    CreditNoteRecord, InvoiceFilter, InvoiceLineKind, InvoiceLineRecord, InvoiceRecord,
    InvoiceSources, InvoiceStatus, InvoiceStore, PaymentRecord,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_date, get_decimal, get_i64, get_opt_date, get_opt_text,
    get_text, get_ts, get_uuid, opt_date, opt_text, opt_uuid,
};

const INVOICE_COLUMNS: &str = "id, tenant_id, matter_id, client_id, number, status, issue_date, \
     due_date, period_start, period_end, net_total, vat_total, gross_total, paid_total, \
     credited_total, currency, notes, created_at, updated_at";

const LINE_COLUMNS: &str = "id, invoice_id, kind, description, quantity, unit_price, vat_rate, \
     net_amount, sort_order, created_at";

const PAYMENT_COLUMNS: &str = "id, invoice_id, amount, paid_on, method, reference, created_at";

const CREDIT_NOTE_COLUMNS: &str = "id, tenant_id, invoice_id, number, issue_date, reason, \
     net_amount, vat_amount, gross_amount, created_at";

fn row_to_invoice_record(row: &libsql::Row) -> Result<InvoiceRecord, DatabaseError> {
    let status_raw = get_text(row, 5);
    Ok(InvoiceRecord {
        id: get_uuid(row, 0, "invoices.id")?,
        tenant_id: get_uuid(row, 1, "invoices.tenant_id")?,
        matter_id: get_uuid(row, 2, "invoices.matter_id")?,
        client_id: get_uuid(row, 3, "invoices.client_id")?,
        number: get_opt_text(row, 4),
        status: InvoiceStatus::from_db_value(&status_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid invoice status '{status_raw}'"))
        })?,
        issue_date: get_opt_date(row, 6, "invoices.issue_date")?,
        due_date: get_opt_date(row, 7, "invoices.due_date")?,
        period_start: get_opt_date(row, 8, "invoices.period_start")?,
        period_end: get_opt_date(row, 9, "invoices.period_end")?,
        net_total: get_decimal(row, 10, "invoices.net_total")?,
        vat_total: get_decimal(row, 11, "invoices.vat_total")?,
        gross_total: get_decimal(row, 12, "invoices.gross_total")?,
        paid_total: get_decimal(row, 13, "invoices.paid_total")?,
        credited_total: get_decimal(row, 14, "invoices.credited_total")?,
        currency: get_text(row, 15),
        notes: get_opt_text(row, 16),
        created_at: get_ts(row, 17)?,
        updated_at: get_ts(row, 18)?,
    })
}

fn row_to_line_record(row: &libsql::Row) -> Result<InvoiceLineRecord, DatabaseError> {
    let kind_raw = get_text(row, 2);
    Ok(InvoiceLineRecord {
        id: get_uuid(row, 0, "invoice_lines.id")?,
        invoice_id: get_uuid(row, 1, "invoice_lines.invoice_id")?,
        kind: InvoiceLineKind::from_db_value(&kind_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid invoice line kind '{kind_raw}'"))
        })?,
        description: get_text(row, 3),
        quantity: get_decimal(row, 4, "invoice_lines.quantity")?,
        unit_price: get_decimal(row, 5, "invoice_lines.unit_price")?,
        vat_rate: get_decimal(row, 6, "invoice_lines.vat_rate")?,
        net_amount: get_decimal(row, 7, "invoice_lines.net_amount")?,
        sort_order: i32::try_from(get_i64(row, 8))
            .map_err(|_| DatabaseError::Serialization("invalid sort_order".to_string()))?,
        created_at: get_ts(row, 9)?,
    })
}

fn row_to_payment_record(row: &libsql::Row) -> Result<PaymentRecord, DatabaseError> {
    Ok(PaymentRecord {
        id: get_uuid(row, 0, "payments.id")?,
        invoice_id: get_uuid(row, 1, "payments.invoice_id")?,
        amount: get_decimal(row, 2, "payments.amount")?,
        paid_on: get_date(row, 3, "payments.paid_on")?,
        method: get_opt_text(row, 4),
        reference: get_opt_text(row, 5),
        created_at: get_ts(row, 6)?,
    })
}

fn row_to_credit_note_record(row: &libsql::Row) -> Result<CreditNoteRecord, DatabaseError> {
    Ok(CreditNoteRecord {
        id: get_uuid(row, 0, "credit_notes.id")?,
        tenant_id: get_uuid(row, 1, "credit_notes.tenant_id")?,
        invoice_id: get_uuid(row, 2, "credit_notes.invoice_id")?,
        number: get_text(row, 3),
        issue_date: get_date(row, 4, "credit_notes.issue_date")?,
        reason: get_opt_text(row, 5),
        net_amount: get_decimal(row, 6, "credit_notes.net_amount")?,
        vat_amount: get_decimal(row, 7, "credit_notes.vat_amount")?,
        gross_amount: get_decimal(row, 8, "credit_notes.gross_amount")?,
        created_at: get_ts(row, 9)?,
    })
}

/// `PREFIX-YYYY-NNNN`; the counter widens past 9999 instead of wrapping.
pub(crate) fn format_document_number(prefix: &str, year: i32, value: i64) -> String {
    format!("{prefix}-{year}-{value:04}")
}

/// Bump and return the per-tenant, per-year counter. Must run in a transaction.
async fn next_sequence_value(
    conn: &libsql::Connection,
    tenant_id: Uuid,
    kind: &str,
    year: i32,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO number_sequences (tenant_id, kind, year, last_value) VALUES (?1, ?2, ?3, 1) \
         ON CONFLICT (tenant_id, kind, year) DO UPDATE SET last_value = last_value + 1",
        params![tenant_id.to_string(), kind, i64::from(year)],
    )
    .await?;
    let row = conn
        .query(
            "SELECT last_value FROM number_sequences WHERE tenant_id = ?1 AND kind = ?2 AND year = ?3",
            params![tenant_id.to_string(), kind, i64::from(year)],
        )
        .await?
        .next()
        .await?
        .ok_or_else(|| DatabaseError::Query("number sequence row missing".to_string()))?;
    Ok(get_i64(&row, 0))
}

/// Read the invoice row inside the current transaction.
async fn invoice_in_tx(
    conn: &libsql::Connection,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<InvoiceRecord, DatabaseError> {
    let row = conn
        .query(
            &format!(
                "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
            ),
            params![tenant_id.to_string(), invoice_id.to_string()],
        )
        .await?
        .next()
        .await?
        .ok_or_else(|| DatabaseError::NotFound {
            entity: "invoice".to_string(),
            id: invoice_id.to_string(),
        })?;
    row_to_invoice_record(&row)
}

async fn release_sources(
    conn: &libsql::Connection,
    tenant_id: Uuid,
    invoice_id: Uuid,
    now: &str,
) -> Result<(), DatabaseError> {
    for table in ["time_entries", "expenses"] {
        conn.execute(
            &format!(
                "UPDATE {table} SET invoice_id = NULL, updated_at = ?3 \
                 WHERE tenant_id = ?1 AND invoice_id = ?2"
            ),
            params![tenant_id.to_string(), invoice_id.to_string(), now],
        )
        .await?;
    }
    Ok(())
}

async fn reserve_sources(
    conn: &libsql::Connection,
    tenant_id: Uuid,
    invoice_id: Uuid,
    sources: &InvoiceSources,
    now: &str,
) -> Result<(), DatabaseError> {
    for (table, ids) in [
        ("time_entries", &sources.time_entry_ids),
        ("expenses", &sources.expense_ids),
    ] {
        for id in ids {
            let reserved = conn
                .execute(
                    &format!(
                        "UPDATE {table} SET invoice_id = ?3, updated_at = ?4 \
                         WHERE tenant_id = ?1 AND id = ?2 AND invoice_id IS NULL"
                    ),
                    params![
                        tenant_id.to_string(),
                        id.to_string(),
                        invoice_id.to_string(),
                        now
                    ],
                )
                .await?;
            if reserved == 0 {
                return Err(DatabaseError::Locked(format!(
                    "{table} row {id} is missing or already on an invoice"
                )));
            }
        }
    }
    Ok(())
}

impl LibSqlBackend {
    async fn load_credit_note(
        &self,
        tenant_id: Uuid,
        credit_note_id: Uuid,
    ) -> Result<CreditNoteRecord, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {CREDIT_NOTE_COLUMNS} FROM credit_notes WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), credit_note_id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created credit note".to_string()))?;
        row_to_credit_note_record(&row)
    }

    async fn load_payment(&self, payment_id: Uuid) -> Result<PaymentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = ?1 LIMIT 1"),
                params![payment_id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load recorded payment".to_string()))?;
        row_to_payment_record(&row)
    }

    async fn require_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<InvoiceRecord, DatabaseError> {
        self.get_invoice(tenant_id, invoice_id)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "invoice".to_string(),
                id: invoice_id.to_string(),
            })
    }
}

#[async_trait::async_trait]
impl InvoiceStore for LibSqlBackend {
    async fn save_invoice_draft(
        &self,
        tenant_id: Uuid,
        invoice: &CreateInvoiceParams,
        lines: &[CreateInvoiceLineParams],
        sources: &InvoiceSources,
    ) -> Result<(InvoiceRecord, Vec<InvoiceLineRecord>), DatabaseError> {
        let conn = self.connect().await?;
        let invoice_id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            conn.execute(
                &format!(
                    "INSERT INTO invoices ({INVOICE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, NULL, 'draft', NULL, NULL, ?5, ?6, ?7, ?8, ?9, '0', '0', ?10, ?11, ?12, ?12)"
                ),
                params![
                    invoice_id.to_string(),
                    tenant_id.to_string(),
                    invoice.matter_id.to_string(),
                    invoice.client_id.to_string(),
                    opt_date(invoice.period_start),
                    opt_date(invoice.period_end),
                    invoice.net_total.to_string(),
                    invoice.vat_total.to_string(),
                    invoice.gross_total.to_string(),
                    invoice.currency.as_str(),
                    opt_text(invoice.notes.as_deref()),
                    now.as_str(),
                ],
            )
            .await?;

            for line in lines {
                conn.execute(
                    "INSERT INTO invoice_lines \
                     (id, tenant_id, invoice_id, kind, description, quantity, unit_price, vat_rate, net_amount, sort_order, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                    params![
                        Uuid::new_v4().to_string(),
                        tenant_id.to_string(),
                        invoice_id.to_string(),
                        line.kind.as_str(),
                        line.description.as_str(),
                        line.quantity.to_string(),
                        line.unit_price.to_string(),
                        line.vat_rate.to_string(),
                        line.net_amount.to_string(),
                        i64::from(line.sort_order),
                        now.as_str(),
                    ],
                )
                .await?;
            }

            reserve_sources(&conn, tenant_id, invoice_id, sources, &now).await
        }
        .await;

        match result {
            Ok(()) => conn.execute("COMMIT", ()).await?,
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(err);
            }
        };

        let record = self.require_invoice(tenant_id, invoice_id).await?;
        let lines = self.list_invoice_lines(tenant_id, invoice_id).await?;
        Ok((record, lines))
    }

    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), invoice_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_invoice_record(&row)).transpose()
    }

    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVOICE_COLUMNS} FROM invoices \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR matter_id = ?2) \
                       AND (?3 IS NULL OR client_id = ?3) \
                       AND (?4 IS NULL OR status = ?4) \
                       AND (?5 IS NULL OR issue_date >= ?5) \
                       AND (?6 IS NULL OR issue_date <= ?6) \
                     ORDER BY created_at DESC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_uuid(filter.matter_id),
                    opt_uuid(filter.client_id),
                    opt_text(filter.status.map(InvoiceStatus::as_str)),
                    opt_date(filter.from),
                    opt_date(filter.to),
                ],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_invoice_record(&row)?);
        }
        Ok(out)
    }

    async fn list_invoice_lines(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {LINE_COLUMNS} FROM invoice_lines \
                     WHERE tenant_id = ?1 AND invoice_id = ?2 \
                     ORDER BY sort_order ASC"
                ),
                params![tenant_id.to_string(), invoice_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_line_record(&row)?);
        }
        Ok(out)
    }

    async fn issue_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        prefix: &str,
        issue_date: NaiveDate,
        due_date: NaiveDate,
    ) -> Result<Option<InvoiceRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let draft = conn
                .query(
                    "SELECT 1 FROM invoices WHERE tenant_id = ?1 AND id = ?2 AND status = 'draft'",
                    params![tenant_id.to_string(), invoice_id.to_string()],
                )
                .await?
                .next()
                .await?;
            if draft.is_none() {
                return Ok(false);
            }

            let year = issue_date.year();
            let value = next_sequence_value(&conn, tenant_id, "invoice", year).await?;
            let number = format_document_number(prefix, year, value);
            conn.execute(
                "UPDATE invoices SET number = ?3, status = 'issued', issue_date = ?4, due_date = ?5, updated_at = ?6 \
                 WHERE tenant_id = ?1 AND id = ?2 AND status = 'draft'",
                params![
                    tenant_id.to_string(),
                    invoice_id.to_string(),
                    number.as_str(),
                    fmt_date(issue_date),
                    fmt_date(due_date),
                    now.as_str(),
                ],
            )
            .await?;
            Ok::<bool, DatabaseError>(true)
        }
        .await;

        match result {
            Ok(true) => {
                conn.execute("COMMIT", ()).await?;
                self.get_invoice(tenant_id, invoice_id).await
            }
            Ok(false) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Ok(None)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn delete_invoice_draft(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            release_sources(&conn, tenant_id, invoice_id, &now).await?;
            let deleted = conn
                .execute(
                    "DELETE FROM invoices WHERE tenant_id = ?1 AND id = ?2 AND status = 'draft'",
                    params![tenant_id.to_string(), invoice_id.to_string()],
                )
                .await?;
            Ok::<bool, DatabaseError>(deleted > 0)
        }
        .await;

        match result {
            Ok(true) => {
                conn.execute("COMMIT", ()).await?;
                Ok(true)
            }
            Ok(false) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Ok(false)
            }
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                Err(err)
            }
        }
    }

    async fn record_payment(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        input: &CreatePaymentParams,
    ) -> Result<(InvoiceRecord, PaymentRecord), DatabaseError> {
        let conn = self.connect().await?;
        let payment_id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let invoice = invoice_in_tx(&conn, tenant_id, invoice_id).await?;
            let status = plan_payment(&invoice, input.amount)
                .map_err(|e| DatabaseError::Rejected(Box::new(e)))?;
            conn.execute(
                "INSERT INTO payments (id, tenant_id, invoice_id, amount, paid_on, method, reference, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    payment_id.to_string(),
                    tenant_id.to_string(),
                    invoice_id.to_string(),
                    input.amount.to_string(),
                    fmt_date(input.paid_on),
                    opt_text(input.method.as_deref()),
                    opt_text(input.reference.as_deref()),
                    now.as_str(),
                ],
            )
            .await?;
            conn.execute(
                "UPDATE invoices SET paid_total = ?3, status = ?4, updated_at = ?5 \
                 WHERE tenant_id = ?1 AND id = ?2",
                params![
                    tenant_id.to_string(),
                    invoice_id.to_string(),
                    (invoice.paid_total + input.amount).to_string(),
                    status.as_str(),
                    now.as_str(),
                ],
            )
            .await?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => conn.execute("COMMIT", ()).await?,
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(err);
            }
        };

        let invoice = self.require_invoice(tenant_id, invoice_id).await?;
        let payment = self.load_payment(payment_id).await?;
        Ok((invoice, payment))
    }

    async fn list_payments(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PAYMENT_COLUMNS} FROM payments \
                     WHERE tenant_id = ?1 AND invoice_id = ?2 \
                     ORDER BY paid_on ASC, created_at ASC"
                ),
                params![tenant_id.to_string(), invoice_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_payment_record(&row)?);
        }
        Ok(out)
    }

    async fn create_credit_note(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        prefix: &str,
        input: &CreateCreditNoteParams,
    ) -> Result<(InvoiceRecord, CreditNoteRecord), DatabaseError> {
        let conn = self.connect().await?;
        let credit_note_id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());

        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            let invoice = invoice_in_tx(&conn, tenant_id, invoice_id).await?;
            let (net_amount, vat_amount, gross_amount, status) =
                plan_credit_note(&invoice, &input.amount)
                    .map_err(|e| DatabaseError::Rejected(Box::new(e)))?;
            let year = input.issue_date.year();
            let value = next_sequence_value(&conn, tenant_id, "credit_note", year).await?;
            let number = format_document_number(prefix, year, value);

            conn.execute(
                &format!(
                    "INSERT INTO credit_notes ({CREDIT_NOTE_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
                ),
                params![
                    credit_note_id.to_string(),
                    tenant_id.to_string(),
                    invoice_id.to_string(),
                    number.as_str(),
                    fmt_date(input.issue_date),
                    opt_text(input.reason.as_deref()),
                    net_amount.to_string(),
                    vat_amount.to_string(),
                    gross_amount.to_string(),
                    now.as_str(),
                ],
            )
            .await?;
            conn.execute(
                "UPDATE invoices SET credited_total = ?3, status = ?4, updated_at = ?5 \
                 WHERE tenant_id = ?1 AND id = ?2",
                params![
                    tenant_id.to_string(),
                    invoice_id.to_string(),
                    (invoice.credited_total + gross_amount).to_string(),
                    status.as_str(),
                    now.as_str(),
                ],
            )
            .await?;
            // A fully credited, unpaid invoice gives its time and expenses back.
            if status == InvoiceStatus::Cancelled {
                release_sources(&conn, tenant_id, invoice_id, &now).await?;
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => conn.execute("COMMIT", ()).await?,
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(err);
            }
        };

        let invoice = self.require_invoice(tenant_id, invoice_id).await?;
        let note = self.load_credit_note(tenant_id, credit_note_id).await?;
        Ok((invoice, note))
    }

    async fn list_credit_notes(
        &self,
        tenant_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> Result<Vec<CreditNoteRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CREDIT_NOTE_COLUMNS} FROM credit_notes \
                     WHERE tenant_id = ?1 AND (?2 IS NULL OR invoice_id = ?2) \
                     ORDER BY issue_date ASC, number ASC"
                ),
                params![tenant_id.to_string(), opt_uuid(invoice_id)],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_credit_note_record(&row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    use super::super::test_support::{Seed, add_tenant, seed_tenant};
    use super::*;
    use crate::billing::invoice::CreditAmount;
    use crate::db::{
        CreateExpenseParams, CreateTimeEntryParams, Database, ExpenseStore, TimesheetStore,
        UpdateExpenseParams,
    };
    use crate::error::BillingError;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn invoice_params(seed_matter: Uuid, seed_client: Uuid) -> CreateInvoiceParams {
        CreateInvoiceParams {
            matter_id: seed_matter,
            client_id: seed_client,
            period_start: None,
            period_end: None,
            net_total: dec!(100.00),
            vat_total: dec!(20.00),
            gross_total: dec!(120.00),
            currency: "EUR".to_string(),
            notes: None,
        }
    }

    fn fee_line() -> CreateInvoiceLineParams {
        CreateInvoiceLineParams {
            kind: InvoiceLineKind::Fee,
            description: "Flat fee".to_string(),
            quantity: Decimal::ONE,
            unit_price: dec!(100.00),
            vat_rate: dec!(20),
            net_amount: dec!(100.00),
            sort_order: 0,
        }
    }

    async fn draft(seed: &Seed, sources: &InvoiceSources) -> Result<InvoiceRecord, DatabaseError> {
        seed.db
            .save_invoice_draft(
                seed.tenant_id,
                &invoice_params(seed.matter_id, seed.client_id),
                &[fee_line()],
                sources,
            )
            .await
            .map(|(invoice, _)| invoice)
    }

    async fn entry(db: &dyn Database, seed: &Seed) -> Uuid {
        db.create_time_entry(
            seed.tenant_id,
            &CreateTimeEntryParams {
                matter_id: seed.matter_id,
                profile_id: seed.profile_id,
                work_date: date("2026-02-02"),
                minutes: 60,
                billed_minutes: 60,
                description: "meeting".to_string(),
                billable: true,
                hourly_rate: None,
            },
        )
        .await
        .expect("entry")
        .id
    }

    #[test]
    fn document_numbers_are_zero_padded() {
        assert_eq!(format_document_number("F", 2026, 7), "F-2026-0007");
        assert_eq!(format_document_number("AV", 2027, 12345), "AV-2027-12345");
    }

    #[tokio::test]
    async fn numbering_is_sequential_per_year_and_tenant() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let mut numbers = Vec::new();
        for issue in ["2026-01-10", "2026-03-01", "2027-01-02"] {
            let invoice = draft(&seed, &InvoiceSources::default())
                .await
                .expect("draft");
            let issued = db
                .issue_invoice(seed.tenant_id, invoice.id, "F", date(issue), date(issue))
                .await
                .expect("issue")
                .expect("issued");
            numbers.push(issued.number.expect("number"));
        }
        assert_eq!(numbers, vec!["F-2026-0001", "F-2026-0002", "F-2027-0001"]);

        let (other_tenant, _, other_client, other_matter) = add_tenant(db, "beta").await;
        let (invoice, _) = db
            .save_invoice_draft(
                other_tenant,
                &invoice_params(other_matter, other_client),
                &[fee_line()],
                &InvoiceSources::default(),
            )
            .await
            .expect("other draft");
        let issued = db
            .issue_invoice(other_tenant, invoice.id, "F", date("2026-05-05"), date("2026-05-05"))
            .await
            .expect("issue")
            .expect("issued");
        assert_eq!(issued.number.as_deref(), Some("F-2026-0001"));
    }

    #[tokio::test]
    async fn issuing_twice_returns_none() {
        let seed = seed_tenant().await;
        let invoice = draft(&seed, &InvoiceSources::default())
            .await
            .expect("draft");
        let d = date("2026-01-10");
        assert!(
            seed.db
                .issue_invoice(seed.tenant_id, invoice.id, "F", d, d)
                .await
                .expect("issue")
                .is_some()
        );
        assert!(
            seed.db
                .issue_invoice(seed.tenant_id, invoice.id, "F", d, d)
                .await
                .expect("issue again")
                .is_none()
        );
        assert!(
            !seed
                .db
                .delete_invoice_draft(seed.tenant_id, invoice.id)
                .await
                .expect("delete issued")
        );
    }

    #[tokio::test]
    async fn double_reservation_rolls_back_the_second_draft() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let entry_id = entry(db, &seed).await;
        let sources = InvoiceSources {
            time_entry_ids: vec![entry_id],
            expense_ids: Vec::new(),
        };
        let first = draft(&seed, &sources).await.expect("first draft");
        let lines = db
            .list_invoice_lines(seed.tenant_id, first.id)
            .await
            .expect("lines");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].net_amount, dec!(100.00));

        let err = draft(&seed, &sources).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Locked(_)));
        let all = db
            .list_invoices(seed.tenant_id, &InvoiceFilter::default())
            .await
            .expect("list");
        assert_eq!(all.len(), 1);

        assert!(
            db.delete_invoice_draft(seed.tenant_id, first.id)
                .await
                .expect("delete")
        );
        let released = db
            .get_time_entry(seed.tenant_id, entry_id)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(released.invoice_id, None);
        assert!(
            db.list_invoice_lines(seed.tenant_id, first.id)
                .await
                .expect("lines")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn reserved_time_and_expenses_are_locked() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let entry_id = entry(db, &seed).await;
        let expense = db
            .create_expense(
                seed.tenant_id,
                &CreateExpenseParams {
                    matter_id: seed.matter_id,
                    profile_id: seed.profile_id,
                    incurred_on: date("2026-02-03"),
                    description: "Bailiff".to_string(),
                    amount: dec!(64.00),
                    vat_rate: dec!(20),
                    billable: true,
                },
            )
            .await
            .expect("expense");
        let sources = InvoiceSources {
            time_entry_ids: vec![entry_id],
            expense_ids: vec![expense.id],
        };
        let invoice = draft(&seed, &sources).await.expect("draft");

        let err = db
            .update_expense(
                seed.tenant_id,
                expense.id,
                &UpdateExpenseParams {
                    amount: Some(dec!(70.00)),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Locked(_)));
        let err = db
            .delete_expense(seed.tenant_id, expense.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Locked(_)));
        let err = db
            .delete_time_entry(seed.tenant_id, entry_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Locked(_)));

        assert!(
            db.delete_invoice_draft(seed.tenant_id, invoice.id)
                .await
                .expect("delete draft")
        );
        assert!(
            db.delete_expense(seed.tenant_id, expense.id)
                .await
                .expect("delete expense")
        );
        assert!(
            db.delete_time_entry(seed.tenant_id, entry_id)
                .await
                .expect("delete entry")
        );
    }

    #[tokio::test]
    async fn payments_and_credit_notes_accumulate() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let invoice = draft(&seed, &InvoiceSources::default())
            .await
            .expect("draft");
        let d = date("2026-04-01");
        db.issue_invoice(seed.tenant_id, invoice.id, "F", d, d)
            .await
            .expect("issue");

        for amount in [dec!(20.00), dec!(30.00)] {
            db.record_payment(
                seed.tenant_id,
                invoice.id,
                &CreatePaymentParams {
                    amount,
                    paid_on: d,
                    method: None,
                    reference: Some("VIR-1".to_string()),
                },
            )
            .await
            .expect("payment");
        }
        let (updated, note) = db
            .create_credit_note(
                seed.tenant_id,
                invoice.id,
                "AV",
                &CreateCreditNoteParams {
                    issue_date: d,
                    reason: None,
                    amount: CreditAmount::Partial {
                        net_amount: dec!(10.00),
                        vat_rate: dec!(20),
                    },
                },
            )
            .await
            .expect("credit");

        assert_eq!(updated.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(updated.paid_total, dec!(50.00));
        assert_eq!(updated.credited_total, dec!(12.00));
        assert_eq!(updated.outstanding(), dec!(58.00));
        assert_eq!(note.number, "AV-2026-0001");
        assert_eq!(
            db.list_payments(seed.tenant_id, invoice.id)
                .await
                .expect("payments")
                .len(),
            2
        );

        let (other_tenant, _, _, _) = add_tenant(db, "beta").await;
        assert!(
            db.get_invoice(other_tenant, invoice.id)
                .await
                .expect("get")
                .is_none()
        );
        let err = db
            .record_payment(
                other_tenant,
                invoice.id,
                &CreatePaymentParams {
                    amount: dec!(1),
                    paid_on: d,
                    method: None,
                    reference: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));

        let err = db
            .record_payment(seed.tenant_id, invoice.id, &payment(dec!(58.01), d))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Rejected(ref inner)
                if matches!(**inner, BillingError::ExceedsRemaining { .. })
        ));
        let (settled, _) = db
            .record_payment(seed.tenant_id, invoice.id, &payment(dec!(58.00), d))
            .await
            .expect("settle");
        assert_eq!(settled.status, InvoiceStatus::Paid);
    }

    fn payment(amount: Decimal, paid_on: NaiveDate) -> CreatePaymentParams {
        CreatePaymentParams {
            amount,
            paid_on,
            method: None,
            reference: None,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_payments_cannot_overpay() {
        let seed = seed_tenant().await;
        let invoice = draft(&seed, &InvoiceSources::default())
            .await
            .expect("draft");
        let d = date("2026-04-01");
        seed.db
            .issue_invoice(seed.tenant_id, invoice.id, "F", d, d)
            .await
            .expect("issue");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = seed.db.clone();
                let (tenant_id, invoice_id) = (seed.tenant_id, invoice.id);
                tokio::spawn(async move {
                    db.record_payment(tenant_id, invoice_id, &payment(dec!(100.00), d))
                        .await
                })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => accepted += 1,
                Err(DatabaseError::Rejected(inner)) => {
                    assert!(matches!(*inner, BillingError::ExceedsRemaining { .. }));
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(accepted, 1);

        let stored = seed
            .db
            .get_invoice(seed.tenant_id, invoice.id)
            .await
            .expect("get")
            .expect("invoice");
        assert_eq!(stored.paid_total, dec!(100.00));
        assert_eq!(stored.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(
            seed.db
                .list_payments(seed.tenant_id, invoice.id)
                .await
                .expect("payments")
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_full_credits_issue_one_note() {
        let seed = seed_tenant().await;
        let entry_id = entry(seed.db.as_ref(), &seed).await;
        let sources = InvoiceSources {
            time_entry_ids: vec![entry_id],
            expense_ids: Vec::new(),
        };
        let invoice = draft(&seed, &sources).await.expect("draft");
        let d = date("2026-04-01");
        seed.db
            .issue_invoice(seed.tenant_id, invoice.id, "F", d, d)
            .await
            .expect("issue");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = seed.db.clone();
                let (tenant_id, invoice_id) = (seed.tenant_id, invoice.id);
                tokio::spawn(async move {
                    db.create_credit_note(
                        tenant_id,
                        invoice_id,
                        "AV",
                        &CreateCreditNoteParams {
                            issue_date: d,
                            reason: None,
                            amount: CreditAmount::Full,
                        },
                    )
                    .await
                })
            })
            .collect();
        let mut notes = Vec::new();
        for handle in handles {
            match handle.await.expect("join") {
                Ok((_, note)) => notes.push(note),
                Err(DatabaseError::Rejected(inner)) => {
                    assert!(matches!(*inner, BillingError::InvalidStatus { .. }));
                }
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].gross_amount, dec!(120.00));
        assert_eq!(notes[0].net_amount, dec!(100.00));

        let stored = seed
            .db
            .get_invoice(seed.tenant_id, invoice.id)
            .await
            .expect("get")
            .expect("invoice");
        assert_eq!(stored.status, InvoiceStatus::Cancelled);
        assert_eq!(stored.credited_total, dec!(120.00));
        assert_eq!(
            seed.db
                .list_credit_notes(seed.tenant_id, Some(invoice.id))
                .await
                .expect("notes")
                .len(),
            1
        );
        let released = seed
            .db
            .get_time_entry(seed.tenant_id, entry_id)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(released.invoice_id, None);
    }
}
