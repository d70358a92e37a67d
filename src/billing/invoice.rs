//! Invoice workflow: draft, issue, cancel, payments, credit notes.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::rates::{RateBook, resolve_vat_rate};
use super::vat::{VatBreakdown, vat_amount, vat_breakdown};
use super::{amount_for_minutes, round_money};
use crate::db::{
    CabinetSettingsRecord, ClientRecord, CreateCreditNoteParams, CreateInvoiceLineParams,
    CreateInvoiceParams, CreatePaymentParams, CreditNoteRecord, Database, ExpenseFilter,
    ExpenseRecord, InvoiceLineKind, InvoiceLineRecord, InvoiceRecord, InvoiceSources,
    InvoiceStatus, MatterRecord, PaymentRecord, TimeEntryFilter, TimeEntryRecord,
};
use crate::error::{BillingError, DatabaseError};
use crate::timesheet::minutes_to_hours;

/// A manual line added to a draft (flat fee, disbursement without receipt).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeLine {
    pub description: String,
    pub amount: Decimal,
    /// Defaults to the invoice's VAT rate.
    #[serde(default)]
    pub vat_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftRequest {
    pub matter_id: Uuid,
    #[serde(default)]
    pub period_start: Option<NaiveDate>,
    #[serde(default)]
    pub period_end: Option<NaiveDate>,
    #[serde(default)]
    pub fee_lines: Vec<FeeLine>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default = "default_true")]
    pub include_expenses: bool,
}

fn default_true() -> bool {
    true
}

/// A computed, not yet persisted, draft invoice.
#[derive(Debug, Clone)]
pub struct DraftInvoice {
    pub invoice: CreateInvoiceParams,
    pub lines: Vec<CreateInvoiceLineParams>,
    pub sources: InvoiceSources,
    pub breakdown: VatBreakdown,
}

/// An invoice with everything needed to display it.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub invoice: InvoiceRecord,
    pub lines: Vec<InvoiceLineRecord>,
    pub breakdown: VatBreakdown,
    pub outstanding: Decimal,
    pub payments: Vec<PaymentRecord>,
    pub credit_notes: Vec<CreditNoteRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CreditAmount {
    /// Everything not yet credited.
    Full,
    /// A net amount at a VAT rate.
    Partial { net_amount: Decimal, vat_rate: Decimal },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditRequest {
    #[serde(flatten)]
    pub amount: CreditAmount,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
}

fn is_cents(amount: Decimal) -> bool {
    amount.round_dp(2) == amount
}

/// Build the lines and totals of a draft from already-loaded rows.
///
/// `entries` and `expenses` must belong to `matter`; unbillable or already
/// invoiced rows are skipped.
pub fn build_draft(
    matter: &MatterRecord,
    client: &ClientRecord,
    settings: &CabinetSettingsRecord,
    rates: &RateBook,
    entries: &[TimeEntryRecord],
    expenses: &[ExpenseRecord],
    request: &DraftRequest,
) -> Result<DraftInvoice, BillingError> {
    if let (Some(start), Some(end)) = (request.period_start, request.period_end)
        && start > end
    {
        return Err(BillingError::InvalidAmount(
            "period_start must not be after period_end".to_string(),
        ));
    }

    let vat_rate = resolve_vat_rate(client, matter, settings);
    let mut lines = Vec::new();
    let mut sources = InvoiceSources::default();

    // Time entries: one line per hourly rate, highest rate first.
    let mut minutes_by_rate: BTreeMap<Decimal, i64> = BTreeMap::new();
    for entry in entries {
        if !entry.billable || entry.invoice_id.is_some() || entry.matter_id != matter.id {
            continue;
        }
        let (rate, _) = rates.rate_for(entry);
        *minutes_by_rate.entry(rate.normalize()).or_insert(0) += entry.billed_minutes;
        sources.time_entry_ids.push(entry.id);
    }
    for (rate, minutes) in minutes_by_rate.into_iter().rev() {
        let hours = minutes_to_hours(minutes);
        lines.push(CreateInvoiceLineParams {
            kind: InvoiceLineKind::Time,
            description: format!(
                "Professional services: {hours} h at {rate} {}/h",
                settings.currency
            ),
            quantity: hours,
            unit_price: rate,
            vat_rate,
            net_amount: amount_for_minutes(minutes, rate),
            sort_order: i32::try_from(lines.len()).unwrap_or(0),
        });
    }

    if request.include_expenses {
        for expense in expenses {
            if !expense.billable || expense.invoice_id.is_some() || expense.matter_id != matter.id
            {
                continue;
            }
            let expense_vat = if client.vat_exempt {
                Decimal::ZERO
            } else {
                expense.vat_rate
            };
            lines.push(CreateInvoiceLineParams {
                kind: InvoiceLineKind::Expense,
                description: format!(
                    "Expense: {} ({})",
                    expense.description,
                    expense.incurred_on.format("%Y-%m-%d")
                ),
                quantity: Decimal::ONE,
                unit_price: expense.amount,
                vat_rate: expense_vat,
                net_amount: round_money(expense.amount),
                sort_order: i32::try_from(lines.len()).unwrap_or(0),
            });
            sources.expense_ids.push(expense.id);
        }
    }

    for fee in &request.fee_lines {
        let description = fee.description.trim();
        if description.is_empty() {
            return Err(BillingError::InvalidAmount(
                "fee line description is required".to_string(),
            ));
        }
        if fee.amount.is_zero() || !is_cents(fee.amount) {
            return Err(BillingError::InvalidAmount(format!(
                "fee line amount '{}' must be non-zero with at most 2 decimals",
                fee.amount
            )));
        }
        let fee_vat = match fee.vat_rate {
            _ if client.vat_exempt => Decimal::ZERO,
            Some(rate) if rate < Decimal::ZERO => {
                return Err(BillingError::InvalidAmount(
                    "fee line VAT rate must not be negative".to_string(),
                ));
            }
            Some(rate) => rate,
            None => vat_rate,
        };
        lines.push(CreateInvoiceLineParams {
            kind: InvoiceLineKind::Fee,
            description: description.to_string(),
            quantity: Decimal::ONE,
            unit_price: fee.amount,
            vat_rate: fee_vat,
            net_amount: fee.amount,
            sort_order: i32::try_from(lines.len()).unwrap_or(0),
        });
    }

    if lines.is_empty() {
        return Err(BillingError::NothingToInvoice);
    }

    let breakdown = vat_breakdown(lines.iter().map(|l| (l.vat_rate, l.net_amount)));
    if breakdown.gross_total <= Decimal::ZERO {
        return Err(BillingError::InvalidAmount(
            "invoice total must be greater than 0".to_string(),
        ));
    }

    Ok(DraftInvoice {
        invoice: CreateInvoiceParams {
            matter_id: matter.id,
            client_id: client.id,
            period_start: request.period_start,
            period_end: request.period_end,
            net_total: breakdown.net_total,
            vat_total: breakdown.vat_total,
            gross_total: breakdown.gross_total,
            currency: settings.currency.clone(),
            notes: request
                .notes
                .as_deref()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
        },
        lines,
        sources,
        breakdown,
    })
}

async fn load_settings(
    db: &dyn Database,
    tenant_id: Uuid,
) -> Result<CabinetSettingsRecord, BillingError> {
    db.get_cabinet_settings(tenant_id).await?.ok_or_else(|| {
        BillingError::Database(DatabaseError::NotFound {
            entity: "cabinet_settings".to_string(),
            id: tenant_id.to_string(),
        })
    })
}

async fn load_invoice_record(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<InvoiceRecord, BillingError> {
    db.get_invoice(tenant_id, invoice_id)
        .await?
        .ok_or(BillingError::InvoiceNotFound(invoice_id))
}

/// Compute a draft for a matter from its unbilled time and expenses.
pub async fn draft_invoice(
    db: &dyn Database,
    tenant_id: Uuid,
    request: &DraftRequest,
) -> Result<DraftInvoice, BillingError> {
    let matter = db
        .get_matter(tenant_id, request.matter_id)
        .await?
        .ok_or(BillingError::MatterNotFound(request.matter_id))?;
    let client = db
        .get_client(tenant_id, matter.client_id)
        .await?
        .ok_or_else(|| {
            BillingError::Database(DatabaseError::NotFound {
                entity: "client".to_string(),
                id: matter.client_id.to_string(),
            })
        })?;
    let settings = load_settings(db, tenant_id).await?;

    let entries = db
        .list_time_entries(
            tenant_id,
            &TimeEntryFilter {
                matter_id: Some(matter.id),
                from: request.period_start,
                to: request.period_end,
                billed: Some(false),
                ..Default::default()
            },
        )
        .await?;
    let expenses = if request.include_expenses {
        db.list_expenses(
            tenant_id,
            &ExpenseFilter {
                matter_id: Some(matter.id),
                from: request.period_start,
                to: request.period_end,
                billed: Some(false),
                ..Default::default()
            },
        )
        .await?
    } else {
        Vec::new()
    };
    let rates = RateBook::load(db, tenant_id, &settings, &[matter.id]).await?;

    build_draft(
        &matter, &client, &settings, &rates, &entries, &expenses, request,
    )
}

/// Persist a computed draft and reserve its source rows.
pub async fn save_draft(
    db: &dyn Database,
    tenant_id: Uuid,
    draft: &DraftInvoice,
) -> Result<(InvoiceRecord, Vec<InvoiceLineRecord>), BillingError> {
    let saved = db
        .save_invoice_draft(tenant_id, &draft.invoice, &draft.lines, &draft.sources)
        .await?;
    tracing::info!(
        tenant_id = %tenant_id,
        invoice_id = %saved.0.id,
        lines = saved.1.len(),
        gross_total = %saved.0.gross_total,
        "Invoice draft saved"
    );
    Ok(saved)
}

/// Compute and persist a draft in one step.
pub async fn create_draft(
    db: &dyn Database,
    tenant_id: Uuid,
    request: &DraftRequest,
) -> Result<InvoiceView, BillingError> {
    let draft = draft_invoice(db, tenant_id, request).await?;
    let (invoice, lines) = save_draft(db, tenant_id, &draft).await?;
    Ok(InvoiceView {
        outstanding: invoice.outstanding(),
        invoice,
        lines,
        breakdown: draft.breakdown,
        payments: Vec::new(),
        credit_notes: Vec::new(),
    })
}

/// Number a draft and make it payable.
pub async fn issue_invoice(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
    issue_date: Option<NaiveDate>,
) -> Result<InvoiceRecord, BillingError> {
    let invoice = load_invoice_record(db, tenant_id, invoice_id).await?;
    if invoice.status != InvoiceStatus::Draft {
        return Err(BillingError::InvalidStatus {
            status: invoice.status.as_str(),
            expected: "draft",
        });
    }
    let settings = load_settings(db, tenant_id).await?;
    let issue_date = issue_date.unwrap_or_else(|| Utc::now().date_naive());
    let due_date = issue_date + Duration::days(i64::from(settings.payment_terms_days));

    let issued = db
        .issue_invoice(
            tenant_id,
            invoice_id,
            &settings.invoice_prefix,
            issue_date,
            due_date,
        )
        .await?
        .ok_or(BillingError::InvalidStatus {
            status: invoice.status.as_str(),
            expected: "draft",
        })?;

    crate::audit::record(
        "invoice_issued",
        serde_json::json!({
            "tenant_id": tenant_id,
            "invoice_id": issued.id,
            "number": issued.number,
            "issue_date": issue_date,
            "gross_total": issued.gross_total,
            "currency": issued.currency,
        }),
    );
    tracing::info!(
        tenant_id = %tenant_id,
        invoice_id = %issued.id,
        number = issued.number.as_deref().unwrap_or_default(),
        "Invoice issued"
    );
    Ok(issued)
}

/// Delete a draft and release the time and expenses it reserved.
pub async fn cancel_draft(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<(), BillingError> {
    let invoice = load_invoice_record(db, tenant_id, invoice_id).await?;
    if invoice.status != InvoiceStatus::Draft {
        return Err(BillingError::InvalidStatus {
            status: invoice.status.as_str(),
            expected: "draft",
        });
    }
    if !db.delete_invoice_draft(tenant_id, invoice_id).await? {
        return Err(BillingError::InvoiceNotFound(invoice_id));
    }
    crate::audit::record(
        "invoice_draft_cancelled",
        serde_json::json!({
            "tenant_id": tenant_id,
            "invoice_id": invoice_id,
            "gross_total": invoice.gross_total,
        }),
    );
    Ok(())
}

/// Record a payment against an issued invoice.
pub async fn record_payment(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
    payment: &CreatePaymentParams,
) -> Result<(InvoiceRecord, PaymentRecord), BillingError> {
    if payment.amount <= Decimal::ZERO {
        return Err(BillingError::InvalidAmount(
            "payment amount must be greater than 0".to_string(),
        ));
    }
    if !is_cents(payment.amount) {
        return Err(BillingError::InvalidAmount(
            "payment amount must have at most 2 decimals".to_string(),
        ));
    }

    let invoice = load_invoice_record(db, tenant_id, invoice_id).await?;
    plan_payment(&invoice, payment.amount)?;

    // The store re-plans against the row it locks; concurrent payments lose there.
    let (updated, recorded) = db.record_payment(tenant_id, invoice_id, payment).await?;
    crate::audit::record(
        "invoice_payment_recorded",
        serde_json::json!({
            "tenant_id": tenant_id,
            "invoice_id": invoice_id,
            "payment_id": recorded.id,
            "amount": recorded.amount,
            "paid_on": recorded.paid_on,
            "status": updated.status.as_str(),
        }),
    );
    Ok((updated, recorded))
}

/// Status an invoice moves to once `amount` is paid against it.
pub fn plan_payment(
    invoice: &InvoiceRecord,
    amount: Decimal,
) -> Result<InvoiceStatus, BillingError> {
    if !matches!(
        invoice.status,
        InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid
    ) {
        return Err(BillingError::InvalidStatus {
            status: invoice.status.as_str(),
            expected: "issued or partially_paid",
        });
    }
    let outstanding = invoice.outstanding();
    if amount > outstanding {
        return Err(BillingError::ExceedsRemaining {
            requested: amount,
            remaining: outstanding,
        });
    }
    Ok(if amount == outstanding {
        InvoiceStatus::Paid
    } else {
        InvoiceStatus::PartiallyPaid
    })
}

/// Compute the amounts of a credit note and the invoice's resulting status.
pub fn plan_credit_note(
    invoice: &InvoiceRecord,
    amount: &CreditAmount,
) -> Result<(Decimal, Decimal, Decimal, InvoiceStatus), BillingError> {
    if !matches!(
        invoice.status,
        InvoiceStatus::Issued | InvoiceStatus::PartiallyPaid | InvoiceStatus::Paid
    ) {
        return Err(BillingError::InvalidStatus {
            status: invoice.status.as_str(),
            expected: "issued, partially_paid or paid",
        });
    }
    let creditable = invoice.creditable();
    if creditable <= Decimal::ZERO {
        return Err(BillingError::InvalidAmount(
            "invoice is already fully credited".to_string(),
        ));
    }

    let (net, vat, gross) = match amount {
        CreditAmount::Full => {
            let net = if invoice.gross_total.is_zero() {
                Decimal::ZERO
            } else {
                round_money(creditable * invoice.net_total / invoice.gross_total)
            };
            (net, creditable - net, creditable)
        }
        CreditAmount::Partial {
            net_amount,
            vat_rate,
        } => {
            if *net_amount <= Decimal::ZERO || !is_cents(*net_amount) {
                return Err(BillingError::InvalidAmount(
                    "credit note net amount must be greater than 0 with at most 2 decimals"
                        .to_string(),
                ));
            }
            if *vat_rate < Decimal::ZERO {
                return Err(BillingError::InvalidAmount(
                    "credit note VAT rate must not be negative".to_string(),
                ));
            }
            let vat = vat_amount(*net_amount, *vat_rate);
            let gross = *net_amount + vat;
            if gross > creditable {
                return Err(BillingError::ExceedsRemaining {
                    requested: gross,
                    remaining: creditable,
                });
            }
            (*net_amount, vat, gross)
        }
    };

    let credited = invoice.credited_total + gross;
    let status = if credited >= invoice.gross_total && invoice.paid_total.is_zero() {
        InvoiceStatus::Cancelled
    } else if invoice.gross_total - credited - invoice.paid_total <= Decimal::ZERO {
        InvoiceStatus::Paid
    } else if invoice.paid_total > Decimal::ZERO {
        InvoiceStatus::PartiallyPaid
    } else {
        InvoiceStatus::Issued
    };
    Ok((net, vat, gross, status))
}

/// Issue a credit note against an invoice.
pub async fn credit_invoice(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
    request: &CreditRequest,
) -> Result<(InvoiceRecord, CreditNoteRecord), BillingError> {
    let invoice = load_invoice_record(db, tenant_id, invoice_id).await?;
    plan_credit_note(&invoice, &request.amount)?;
    let settings = load_settings(db, tenant_id).await?;

    let params = CreateCreditNoteParams {
        issue_date: request
            .issue_date
            .unwrap_or_else(|| Utc::now().date_naive()),
        reason: request
            .reason
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string),
        amount: request.amount.clone(),
    };
    let (updated, note) = db
        .create_credit_note(tenant_id, invoice_id, &settings.credit_note_prefix, &params)
        .await?;

    crate::audit::record(
        "credit_note_issued",
        serde_json::json!({
            "tenant_id": tenant_id,
            "invoice_id": invoice_id,
            "credit_note_id": note.id,
            "number": note.number,
            "gross_amount": note.gross_amount,
            "invoice_status": updated.status.as_str(),
        }),
    );
    tracing::info!(
        tenant_id = %tenant_id,
        invoice_id = %invoice_id,
        number = %note.number,
        "Credit note issued"
    );
    Ok((updated, note))
}

/// Load an invoice with its lines, VAT breakdown, payments and credit notes.
pub async fn load_invoice(
    db: &dyn Database,
    tenant_id: Uuid,
    invoice_id: Uuid,
) -> Result<InvoiceView, BillingError> {
    let invoice = load_invoice_record(db, tenant_id, invoice_id).await?;
    let lines = db.list_invoice_lines(tenant_id, invoice_id).await?;
    let payments = db.list_payments(tenant_id, invoice_id).await?;
    let credit_notes = db.list_credit_notes(tenant_id, Some(invoice_id)).await?;
    let breakdown = vat_breakdown(lines.iter().map(|l| (l.vat_rate, l.net_amount)));
    Ok(InvoiceView {
        outstanding: invoice.outstanding(),
        invoice,
        lines,
        breakdown,
        payments,
        credit_notes,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;
    use crate::db::libsql::test_support::{Seed, seed_tenant};
    use crate::db::{
        CreateExpenseParams, CreateTimeEntryParams, ExpenseStore, InvoiceStore, TimesheetStore,
        UpdateTimeEntryParams,
    };
    use crate::error::DatabaseError;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn issued_invoice(gross: Decimal, net: Decimal) -> InvoiceRecord {
        InvoiceRecord {
            id: Uuid::new_v4(),
            tenant_id: Uuid::nil(),
            matter_id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            number: Some("F-2026-0001".to_string()),
            status: InvoiceStatus::Issued,
            issue_date: Some(date("2026-03-01")),
            due_date: Some(date("2026-03-31")),
            period_start: None,
            period_end: None,
            net_total: net,
            vat_total: gross - net,
            gross_total: gross,
            paid_total: Decimal::ZERO,
            credited_total: Decimal::ZERO,
            currency: "EUR".to_string(),
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    async fn log_time(seed: &Seed, day: &str, minutes: i64, rate: Option<Decimal>) -> Uuid {
        seed.db
            .create_time_entry(
                seed.tenant_id,
                &CreateTimeEntryParams {
                    matter_id: seed.matter_id,
                    profile_id: seed.profile_id,
                    work_date: date(day),
                    minutes,
                    billed_minutes: minutes,
                    description: "drafting".to_string(),
                    billable: true,
                    hourly_rate: rate,
                },
            )
            .await
            .expect("create entry")
            .id
    }

    #[test]
    fn full_credit_of_unpaid_invoice_cancels_it() {
        let invoice = issued_invoice(dec!(120.00), dec!(100.00));
        let (net, vat, gross, status) =
            plan_credit_note(&invoice, &CreditAmount::Full).expect("plan");
        assert_eq!((net, vat, gross), (dec!(100.00), dec!(20.00), dec!(120.00)));
        assert_eq!(status, InvoiceStatus::Cancelled);
    }

    #[test]
    fn partial_credit_keeps_invoice_payable() {
        let mut invoice = issued_invoice(dec!(120.00), dec!(100.00));
        invoice.paid_total = dec!(60.00);
        invoice.status = InvoiceStatus::PartiallyPaid;

        let (_, vat, gross, status) = plan_credit_note(
            &invoice,
            &CreditAmount::Partial {
                net_amount: dec!(25.00),
                vat_rate: dec!(20),
            },
        )
        .expect("plan");
        assert_eq!(vat, dec!(5.00));
        assert_eq!(gross, dec!(30.00));
        assert_eq!(status, InvoiceStatus::PartiallyPaid);

        let (_, _, _, status) = plan_credit_note(
            &invoice,
            &CreditAmount::Partial {
                net_amount: dec!(50.00),
                vat_rate: dec!(20),
            },
        )
        .expect("plan");
        assert_eq!(status, InvoiceStatus::Paid);
    }

    #[test]
    fn credit_larger_than_remaining_is_rejected() {
        let mut invoice = issued_invoice(dec!(120.00), dec!(100.00));
        invoice.credited_total = dec!(100.00);
        let err = plan_credit_note(
            &invoice,
            &CreditAmount::Partial {
                net_amount: dec!(20.00),
                vat_rate: dec!(20),
            },
        )
        .unwrap_err();
        assert!(matches!(err, BillingError::ExceedsRemaining { .. }));
    }

    #[test]
    fn payment_plan_follows_outstanding_amount() {
        let mut invoice = issued_invoice(dec!(120.00), dec!(100.00));
        invoice.credited_total = dec!(20.00);
        assert_eq!(
            plan_payment(&invoice, dec!(50.00)).expect("plan"),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(
            plan_payment(&invoice, dec!(100.00)).expect("plan"),
            InvoiceStatus::Paid
        );
        let err = plan_payment(&invoice, dec!(100.01)).unwrap_err();
        assert!(matches!(err, BillingError::ExceedsRemaining { .. }));

        invoice.status = InvoiceStatus::Cancelled;
        let err = plan_payment(&invoice, dec!(1.00)).unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus { .. }));
    }

    #[test]
    fn drafts_cannot_be_credited() {
        let mut invoice = issued_invoice(dec!(120.00), dec!(100.00));
        invoice.status = InvoiceStatus::Draft;
        let err = plan_credit_note(&invoice, &CreditAmount::Full).unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn draft_groups_time_by_rate_and_adds_expenses() {
        let seed = seed_tenant().await;
        log_time(&seed, "2026-03-02", 90, None).await;
        log_time(&seed, "2026-03-03", 30, None).await;
        log_time(&seed, "2026-03-03", 60, Some(dec!(300))).await;
        seed.db
            .create_expense(
                seed.tenant_id,
                &CreateExpenseParams {
                    matter_id: seed.matter_id,
                    profile_id: seed.profile_id,
                    incurred_on: date("2026-03-04"),
                    description: "Court fee".to_string(),
                    amount: dec!(35.00),
                    vat_rate: Decimal::ZERO,
                    billable: true,
                },
            )
            .await
            .expect("expense");

        let request = DraftRequest {
            matter_id: seed.matter_id,
            include_expenses: true,
            ..Default::default()
        };
        let draft = draft_invoice(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .expect("draft");

        // Cabinet default 150/h, one override at 300/h.
        assert_eq!(draft.lines.len(), 3);
        assert_eq!(draft.lines[0].unit_price, dec!(300));
        assert_eq!(draft.lines[0].net_amount, dec!(300.00));
        assert_eq!(draft.lines[1].quantity, dec!(2));
        assert_eq!(draft.lines[1].net_amount, dec!(300.00));
        assert_eq!(draft.lines[2].kind, InvoiceLineKind::Expense);
        assert_eq!(draft.invoice.net_total, dec!(635.00));
        assert_eq!(draft.invoice.vat_total, dec!(120.00));
        assert_eq!(draft.invoice.gross_total, dec!(755.00));
        assert_eq!(draft.sources.time_entry_ids.len(), 3);
        assert_eq!(draft.sources.expense_ids.len(), 1);
    }

    #[tokio::test]
    async fn empty_matter_has_nothing_to_invoice() {
        let seed = seed_tenant().await;
        let request = DraftRequest {
            matter_id: seed.matter_id,
            ..Default::default()
        };
        let err = draft_invoice(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NothingToInvoice));
    }

    #[tokio::test]
    async fn draft_lifecycle_reserves_issues_and_releases() {
        let seed = seed_tenant().await;
        let entry_id = log_time(&seed, "2026-03-02", 60, None).await;
        let request = DraftRequest {
            matter_id: seed.matter_id,
            ..Default::default()
        };

        let view = create_draft(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .expect("create draft");
        assert_eq!(view.invoice.status, InvoiceStatus::Draft);
        assert_eq!(view.invoice.gross_total, dec!(180.00));

        // Reserved entries are locked and excluded from a second draft.
        let err = seed
            .db
            .update_time_entry(
                seed.tenant_id,
                entry_id,
                &UpdateTimeEntryParams {
                    description: Some("changed".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Locked(_)));
        let err = draft_invoice(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::NothingToInvoice));

        cancel_draft(seed.db.as_ref(), seed.tenant_id, view.invoice.id)
            .await
            .expect("cancel");
        let entry = seed
            .db
            .get_time_entry(seed.tenant_id, entry_id)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.invoice_id, None);

        let view = create_draft(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .expect("second draft");
        let issued = issue_invoice(
            seed.db.as_ref(),
            seed.tenant_id,
            view.invoice.id,
            Some(date("2026-03-10")),
        )
        .await
        .expect("issue");
        assert_eq!(issued.status, InvoiceStatus::Issued);
        assert_eq!(issued.number.as_deref(), Some("F-2026-0001"));
        assert_eq!(issued.due_date, Some(date("2026-04-09")));

        let err = issue_invoice(seed.db.as_ref(), seed.tenant_id, issued.id, None)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus { .. }));
        let err = cancel_draft(seed.db.as_ref(), seed.tenant_id, issued.id)
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus { .. }));
    }

    #[tokio::test]
    async fn payments_move_invoice_to_paid() {
        let seed = seed_tenant().await;
        log_time(&seed, "2026-03-02", 60, None).await;
        let view = create_draft(
            seed.db.as_ref(),
            seed.tenant_id,
            &DraftRequest {
                matter_id: seed.matter_id,
                ..Default::default()
            },
        )
        .await
        .expect("draft");
        let id = view.invoice.id;

        let payment = |amount| CreatePaymentParams {
            amount,
            paid_on: date("2026-03-15"),
            method: Some("transfer".to_string()),
            reference: None,
        };
        let err = record_payment(seed.db.as_ref(), seed.tenant_id, id, &payment(dec!(10)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidStatus { .. }));

        issue_invoice(seed.db.as_ref(), seed.tenant_id, id, Some(date("2026-03-10")))
            .await
            .expect("issue");

        let (invoice, _) =
            record_payment(seed.db.as_ref(), seed.tenant_id, id, &payment(dec!(80.00)))
                .await
                .expect("first payment");
        assert_eq!(invoice.status, InvoiceStatus::PartiallyPaid);
        assert_eq!(invoice.outstanding(), dec!(100.00));

        let err = record_payment(seed.db.as_ref(), seed.tenant_id, id, &payment(dec!(100.01)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::ExceedsRemaining { .. }));
        let err = record_payment(seed.db.as_ref(), seed.tenant_id, id, &payment(dec!(0)))
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::InvalidAmount(_)));

        let (invoice, _) =
            record_payment(seed.db.as_ref(), seed.tenant_id, id, &payment(dec!(100.00)))
                .await
                .expect("second payment");
        assert_eq!(invoice.status, InvoiceStatus::Paid);

        let view = load_invoice(seed.db.as_ref(), seed.tenant_id, id)
            .await
            .expect("load");
        assert_eq!(view.payments.len(), 2);
        assert_eq!(view.outstanding, Decimal::ZERO);
        assert_eq!(view.breakdown.gross_total, dec!(180.00));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn racing_payments_settle_at_most_the_gross_total() {
        let seed = seed_tenant().await;
        log_time(&seed, "2026-03-02", 60, None).await;
        let view = create_draft(
            seed.db.as_ref(),
            seed.tenant_id,
            &DraftRequest {
                matter_id: seed.matter_id,
                ..Default::default()
            },
        )
        .await
        .expect("draft");
        let id = view.invoice.id;
        issue_invoice(seed.db.as_ref(), seed.tenant_id, id, Some(date("2026-03-10")))
            .await
            .expect("issue");

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db = seed.db.clone();
                let tenant_id = seed.tenant_id;
                tokio::spawn(async move {
                    let payment = CreatePaymentParams {
                        amount: dec!(100.00),
                        paid_on: date("2026-03-15"),
                        method: None,
                        reference: None,
                    };
                    record_payment(db.as_ref(), tenant_id, id, &payment).await
                })
            })
            .collect();
        let mut accepted = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => accepted += 1,
                Err(err) => assert!(
                    matches!(err, BillingError::ExceedsRemaining { .. }),
                    "unexpected error: {err}"
                ),
            }
        }
        assert_eq!(accepted, 1);

        let view = load_invoice(seed.db.as_ref(), seed.tenant_id, id)
            .await
            .expect("load");
        assert_eq!(view.invoice.paid_total, dec!(100.00));
        assert_eq!(view.outstanding, dec!(80.00));
        assert_eq!(view.payments.len(), 1);
    }

    #[tokio::test]
    async fn full_credit_note_releases_time_for_rebilling() {
        let seed = seed_tenant().await;
        let entry_id = log_time(&seed, "2026-03-02", 60, None).await;
        let request = DraftRequest {
            matter_id: seed.matter_id,
            ..Default::default()
        };
        let view = create_draft(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .expect("draft");
        issue_invoice(
            seed.db.as_ref(),
            seed.tenant_id,
            view.invoice.id,
            Some(date("2026-03-10")),
        )
        .await
        .expect("issue");

        let (invoice, note) = credit_invoice(
            seed.db.as_ref(),
            seed.tenant_id,
            view.invoice.id,
            &CreditRequest {
                amount: CreditAmount::Full,
                reason: Some("billing error".to_string()),
                issue_date: Some(date("2026-03-12")),
            },
        )
        .await
        .expect("credit");
        assert_eq!(note.number, "AV-2026-0001");
        assert_eq!(note.gross_amount, dec!(180.00));
        assert_eq!(note.vat_amount, dec!(30.00));
        assert_eq!(invoice.status, InvoiceStatus::Cancelled);

        let entry = seed
            .db
            .get_time_entry(seed.tenant_id, entry_id)
            .await
            .expect("get")
            .expect("entry");
        assert_eq!(entry.invoice_id, None);
        draft_invoice(seed.db.as_ref(), seed.tenant_id, &request)
            .await
            .expect("entry can be billed again");

        let notes = seed
            .db
            .list_credit_notes(seed.tenant_id, None)
            .await
            .expect("list notes");
        assert_eq!(notes.len(), 1);
    }
}
