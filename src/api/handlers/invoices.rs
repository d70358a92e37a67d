//! Invoice workflow endpoints. Everything here needs `manage_invoices`.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use uuid::Uuid;

use super::{check_money, optional_text};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::api::types::*;
use crate::auth::{Permission, TenantContext};
use crate::billing::invoice::{self, CreditRequest, DraftRequest, InvoiceView};
use crate::db::{
    CreatePaymentParams, CreditNoteRecord, Database, InvoiceFilter, InvoiceRecord, PaymentRecord,
};

async fn require_invoice(db: &dyn Database, tenant_id: Uuid, id: Uuid) -> ApiResult<InvoiceRecord> {
    db.get_invoice(tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Invoice"))
}

pub async fn invoices_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<InvoiceQuery>,
) -> ApiResult<Json<ListResponse<InvoiceRecord>>> {
    ctx.require(Permission::ManageInvoices)?;
    let filter = InvoiceFilter {
        matter_id: query.matter_id,
        client_id: query.client_id,
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let invoices = state.db.list_invoices(ctx.tenant_id, &filter).await?;
    Ok(Json(invoices.into()))
}

/// Compute a draft from the matter's unbilled items and reserve them.
pub async fn invoices_draft_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<DraftRequest>,
) -> ApiResult<(StatusCode, Json<InvoiceView>)> {
    ctx.require(Permission::ManageInvoices)?;
    if let (Some(start), Some(end)) = (body.period_start, body.period_end)
        && start > end
    {
        return Err(ApiError::bad_request("period_start is after period_end"));
    }
    let view = invoice::create_draft(state.db.as_ref(), ctx.tenant_id, &body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn invoices_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<InvoiceView>> {
    ctx.require(Permission::ManageInvoices)?;
    let view = invoice::load_invoice(state.db.as_ref(), ctx.tenant_id, id).await?;
    Ok(Json(view))
}

/// `?issue_date=YYYY-MM-DD` overrides today.
pub async fn invoices_issue_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Query(query): Query<IssueRequest>,
) -> ApiResult<Json<InvoiceRecord>> {
    ctx.require(Permission::ManageInvoices)?;
    let issued =
        invoice::issue_invoice(state.db.as_ref(), ctx.tenant_id, id, query.issue_date).await?;
    Ok(Json(issued))
}

pub async fn invoices_cancel_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::ManageInvoices)?;
    invoice::cancel_draft(state.db.as_ref(), ctx.tenant_id, id).await?;
    Ok(Json(DeletedResponse { id, deleted: true }))
}

pub async fn payments_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<PaymentRecord>>> {
    ctx.require(Permission::ManageInvoices)?;
    require_invoice(state.db.as_ref(), ctx.tenant_id, id).await?;
    let payments = state.db.list_payments(ctx.tenant_id, id).await?;
    Ok(Json(payments.into()))
}

pub async fn payments_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<PaymentRequest>,
) -> ApiResult<(StatusCode, Json<PaymentResponse>)> {
    ctx.require(Permission::ManageInvoices)?;
    check_money("amount", body.amount, true)?;
    let params = CreatePaymentParams {
        amount: body.amount,
        paid_on: body.paid_on.unwrap_or_else(|| Utc::now().date_naive()),
        method: optional_text(body.method),
        reference: optional_text(body.reference),
    };
    let (invoice, payment) =
        invoice::record_payment(state.db.as_ref(), ctx.tenant_id, id, &params).await?;
    Ok((StatusCode::CREATED, Json(PaymentResponse { invoice, payment })))
}

pub async fn credit_notes_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<CreditNoteRecord>>> {
    ctx.require(Permission::ManageInvoices)?;
    require_invoice(state.db.as_ref(), ctx.tenant_id, id).await?;
    let notes = state.db.list_credit_notes(ctx.tenant_id, Some(id)).await?;
    Ok(Json(notes.into()))
}

/// All credit notes of the tenant in issue order.
pub async fn credit_notes_all_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
) -> ApiResult<Json<ListResponse<CreditNoteRecord>>> {
    ctx.require(Permission::ManageInvoices)?;
    let notes = state.db.list_credit_notes(ctx.tenant_id, None).await?;
    Ok(Json(notes.into()))
}

pub async fn credit_notes_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<CreditRequest>,
) -> ApiResult<(StatusCode, Json<CreditNoteResponse>)> {
    ctx.require(Permission::ManageInvoices)?;
    let (invoice, credit_note) =
        invoice::credit_invoice(state.db.as_ref(), ctx.tenant_id, id, &body).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreditNoteResponse {
            invoice,
            credit_note,
        }),
    ))
}
