//! Timesheet entries, timesheet summaries, expenses and purchases.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::{
    cabinet_settings, check_money, check_optional_money, check_vat_rate, optional_text,
    require_active_member, required_text,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::api::types::*;
use crate::auth::{Permission, TenantContext};
use crate::billing::{RateBook, resolve_vat_rate, vat_amount};
use crate::db::{
    CreateExpenseParams, CreatePurchaseParams, CreateTimeEntryParams, Database, ExpenseFilter,
    ExpenseRecord, MatterRecord, PurchaseRecord, TimeEntryFilter, TimeEntryRecord,
    UpdateExpenseParams, UpdateTimeEntryParams,
};
use crate::error::AuthError;
use crate::timesheet::{self, GroupBy, Summary};

/// Reading time needs either own-time or all-time access.
fn require_time_access(ctx: &TenantContext) -> Result<(), AuthError> {
    if ctx.can(Permission::ViewAllTime) {
        Ok(())
    } else {
        ctx.require(Permission::RecordTime)
    }
}

/// Whose rows a write applies to: the caller unless another member is named.
async fn owner_for_write(
    db: &dyn Database,
    ctx: &TenantContext,
    requested: Option<Uuid>,
) -> ApiResult<Uuid> {
    ctx.require(Permission::RecordTime)?;
    let owner = ctx
        .visible_profile(requested)?
        .unwrap_or(ctx.profile_id);
    if owner != ctx.profile_id {
        require_active_member(db, ctx, owner, "Profile").await?;
    }
    Ok(owner)
}

async fn load_matter(db: &dyn Database, tenant_id: Uuid, id: Uuid) -> ApiResult<MatterRecord> {
    db.get_matter(tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Matter"))
}

fn check_minutes(minutes: i64) -> ApiResult<()> {
    timesheet::validate_minutes(minutes).map_err(ApiError::bad_request)
}

// --- Time entries ---

pub async fn time_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<TimeEntryQuery>,
) -> ApiResult<Json<ListResponse<TimeEntryRecord>>> {
    require_time_access(&ctx)?;
    let filter = TimeEntryFilter {
        matter_id: query.matter_id,
        profile_id: ctx.visible_profile(query.profile_id)?,
        from: query.from,
        to: query.to,
        billed: query.billed,
    };
    let entries = state.db.list_time_entries(ctx.tenant_id, &filter).await?;
    Ok(Json(entries.into()))
}

pub async fn time_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreateTimeEntryRequest>,
) -> ApiResult<(StatusCode, Json<TimeEntryRecord>)> {
    let db = state.db.as_ref();
    let profile_id = owner_for_write(db, &ctx, body.profile_id).await?;
    check_minutes(body.minutes)?;
    check_optional_money("hourly_rate", body.hourly_rate)?;
    let description = required_text("description", &body.description)?;
    load_matter(db, ctx.tenant_id, body.matter_id).await?;

    let settings = cabinet_settings(db, ctx.tenant_id).await?;
    let billed_minutes = timesheet::round_minutes(
        body.minutes,
        settings.rounding_increment_minutes,
        settings.rounding_mode,
    );
    let params = CreateTimeEntryParams {
        matter_id: body.matter_id,
        profile_id,
        work_date: body.work_date,
        minutes: body.minutes,
        billed_minutes,
        description,
        billable: body.billable,
        hourly_rate: body.hourly_rate,
    };
    let entry = db.create_time_entry(ctx.tenant_id, &params).await?;
    tracing::debug!(
        tenant_id = %ctx.tenant_id,
        entry_id = %entry.id,
        minutes = entry.minutes,
        billed_minutes = entry.billed_minutes,
        "Time entry recorded"
    );
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn load_visible_entry(
    db: &dyn Database,
    ctx: &TenantContext,
    id: Uuid,
) -> ApiResult<TimeEntryRecord> {
    let entry = db
        .get_time_entry(ctx.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Time entry"))?;
    ctx.visible_profile(Some(entry.profile_id))?;
    Ok(entry)
}

pub async fn time_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TimeEntryRecord>> {
    require_time_access(&ctx)?;
    Ok(Json(load_visible_entry(state.db.as_ref(), &ctx, id).await?))
}

/// Changing minutes re-rounds them with the current cabinet settings.
pub async fn time_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTimeEntryRequest>,
) -> ApiResult<Json<TimeEntryRecord>> {
    ctx.require(Permission::RecordTime)?;
    let db = state.db.as_ref();
    load_visible_entry(db, &ctx, id).await?;

    let minutes = match body.minutes {
        Some(minutes) => {
            check_minutes(minutes)?;
            let settings = cabinet_settings(db, ctx.tenant_id).await?;
            let billed = timesheet::round_minutes(
                minutes,
                settings.rounding_increment_minutes,
                settings.rounding_mode,
            );
            Some((minutes, billed))
        }
        None => None,
    };
    if let Some(rate) = body.hourly_rate {
        check_optional_money("hourly_rate", rate)?;
    }
    if let Some(matter_id) = body.matter_id {
        load_matter(db, ctx.tenant_id, matter_id).await?;
    }

    let params = UpdateTimeEntryParams {
        matter_id: body.matter_id,
        work_date: body.work_date,
        minutes,
        description: body
            .description
            .map(|d| required_text("description", &d))
            .transpose()?,
        billable: body.billable,
        hourly_rate: body.hourly_rate,
    };
    db.update_time_entry(ctx.tenant_id, id, &params)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Time entry"))
}

pub async fn time_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::RecordTime)?;
    let db = state.db.as_ref();
    load_visible_entry(db, &ctx, id).await?;
    if !db.delete_time_entry(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Time entry"));
    }
    Ok(Json(DeletedResponse { id, deleted: true }))
}

/// Grouped totals with amounts at each entry's resolved rate.
pub async fn summary_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<SummaryQuery>,
) -> ApiResult<Json<Summary>> {
    require_time_access(&ctx)?;
    let group_by = match query.group_by.as_deref() {
        None => GroupBy::Matter,
        Some(raw) => GroupBy::from_query(raw).ok_or_else(|| {
            ApiError::bad_request(format!(
                "group_by must be one of day, week, matter, profile (got '{raw}')"
            ))
        })?,
    };
    let db = state.db.as_ref();
    let filter = TimeEntryFilter {
        matter_id: query.matter_id,
        profile_id: ctx.visible_profile(query.profile_id)?,
        from: query.from,
        to: query.to,
        billed: None,
    };
    let entries = db.list_time_entries(ctx.tenant_id, &filter).await?;
    let settings = cabinet_settings(db, ctx.tenant_id).await?;
    let rates = RateBook::load(
        db,
        ctx.tenant_id,
        &settings,
        &timesheet::matter_ids(&entries),
    )
    .await?;
    Ok(Json(timesheet::summarize(&entries, group_by, |entry| {
        Some(rates.rate_for(entry).0)
    })))
}

// --- Expenses ---

pub async fn expenses_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<ExpenseQuery>,
) -> ApiResult<Json<ListResponse<ExpenseRecord>>> {
    require_time_access(&ctx)?;
    let filter = ExpenseFilter {
        matter_id: query.matter_id,
        profile_id: ctx.visible_profile(query.profile_id)?,
        from: query.from,
        to: query.to,
        billed: query.billed,
    };
    let expenses = state.db.list_expenses(ctx.tenant_id, &filter).await?;
    Ok(Json(expenses.into()))
}

/// Without an explicit rate, the expense takes the VAT rate the matter's
/// invoices would use (0 for exempt clients).
pub async fn expenses_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreateExpenseRequest>,
) -> ApiResult<(StatusCode, Json<ExpenseRecord>)> {
    let db = state.db.as_ref();
    let profile_id = owner_for_write(db, &ctx, body.profile_id).await?;
    check_money("amount", body.amount, true)?;
    let description = required_text("description", &body.description)?;
    let matter = load_matter(db, ctx.tenant_id, body.matter_id).await?;

    let vat_rate = match body.vat_rate {
        Some(rate) => rate,
        None => {
            let client = db
                .get_client(ctx.tenant_id, matter.client_id)
                .await?
                .ok_or_else(|| ApiError::not_found("Client"))?;
            let settings = cabinet_settings(db, ctx.tenant_id).await?;
            resolve_vat_rate(&client, &matter, &settings)
        }
    };
    check_vat_rate(vat_rate)?;

    let params = CreateExpenseParams {
        matter_id: body.matter_id,
        profile_id,
        incurred_on: body.incurred_on,
        description,
        amount: body.amount,
        vat_rate,
        billable: body.billable,
    };
    let expense = db.create_expense(ctx.tenant_id, &params).await?;
    Ok((StatusCode::CREATED, Json(expense)))
}

async fn load_visible_expense(
    db: &dyn Database,
    ctx: &TenantContext,
    id: Uuid,
) -> ApiResult<ExpenseRecord> {
    let expense = db
        .get_expense(ctx.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Expense"))?;
    ctx.visible_profile(Some(expense.profile_id))?;
    Ok(expense)
}

pub async fn expenses_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ExpenseRecord>> {
    require_time_access(&ctx)?;
    Ok(Json(load_visible_expense(state.db.as_ref(), &ctx, id).await?))
}

pub async fn expenses_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateExpenseRequest>,
) -> ApiResult<Json<ExpenseRecord>> {
    ctx.require(Permission::RecordTime)?;
    let db = state.db.as_ref();
    load_visible_expense(db, &ctx, id).await?;
    if let Some(amount) = body.amount {
        check_money("amount", amount, true)?;
    }
    if let Some(rate) = body.vat_rate {
        check_vat_rate(rate)?;
    }
    let params = UpdateExpenseParams {
        incurred_on: body.incurred_on,
        description: body
            .description
            .map(|d| required_text("description", &d))
            .transpose()?,
        amount: body.amount,
        vat_rate: body.vat_rate,
        billable: body.billable,
    };
    db.update_expense(ctx.tenant_id, id, &params)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Expense"))
}

pub async fn expenses_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::RecordTime)?;
    let db = state.db.as_ref();
    load_visible_expense(db, &ctx, id).await?;
    if !db.delete_expense(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Expense"));
    }
    Ok(Json(DeletedResponse { id, deleted: true }))
}

// --- Purchases ---

pub async fn purchases_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Json<ListResponse<PurchaseRecord>>> {
    ctx.require(Permission::ManageInvoices)?;
    let purchases = state
        .db
        .list_purchases(ctx.tenant_id, query.from, query.to)
        .await?;
    Ok(Json(purchases.into()))
}

/// Fill in the purchase VAT from net amount and rate when not given.
fn purchase_vat(net_amount: Decimal, vat_rate: Decimal, given: Option<Decimal>) -> Decimal {
    given.unwrap_or_else(|| vat_amount(net_amount, vat_rate))
}

pub async fn purchases_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreatePurchaseRequest>,
) -> ApiResult<(StatusCode, Json<PurchaseRecord>)> {
    ctx.require(Permission::ManageInvoices)?;
    check_money("net_amount", body.net_amount, true)?;
    check_optional_money("vat_amount", body.vat_amount)?;
    let vat_rate = match body.vat_rate {
        Some(rate) => rate,
        None => {
            cabinet_settings(state.db.as_ref(), ctx.tenant_id)
                .await?
                .default_vat_rate
        }
    };
    check_vat_rate(vat_rate)?;

    let params = CreatePurchaseParams {
        supplier: required_text("supplier", &body.supplier)?,
        description: required_text("description", &body.description)?,
        purchased_on: body.purchased_on,
        net_amount: body.net_amount,
        vat_rate,
        vat_amount: purchase_vat(body.net_amount, vat_rate, body.vat_amount),
        category: optional_text(body.category),
    };
    let purchase = state.db.create_purchase(ctx.tenant_id, &params).await?;
    Ok((StatusCode::CREATED, Json(purchase)))
}

pub async fn purchases_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::ManageInvoices)?;
    if !state.db.delete_purchase(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Purchase"));
    }
    Ok(Json(DeletedResponse { id, deleted: true }))
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::db::Role;

    #[test]
    fn purchase_vat_is_computed_unless_supplied() {
        assert_eq!(purchase_vat(dec!(99.99), dec!(20), None), dec!(20.00));
        assert_eq!(purchase_vat(dec!(10.05), dec!(5.5), None), dec!(0.55));
        assert_eq!(purchase_vat(dec!(100), dec!(20), Some(dec!(19.99))), dec!(19.99));
    }

    #[test]
    fn time_access_by_role() {
        let ctx = |role| TenantContext {
            tenant_id: Uuid::new_v4(),
            profile_id: Uuid::new_v4(),
            role,
        };
        assert!(require_time_access(&ctx(Role::Lawyer)).is_ok());
        assert!(require_time_access(&ctx(Role::Accountant)).is_ok());
        assert!(require_time_access(&ctx(Role::Admin)).is_ok());
    }

    #[test]
    fn minutes_outside_a_day_are_rejected() {
        assert!(check_minutes(0).is_err());
        assert!(check_minutes(1441).is_err());
        assert!(check_minutes(90).is_ok());
    }
}
