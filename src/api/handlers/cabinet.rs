//! Health, identity, cabinet settings and members.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::json;
use uuid::Uuid;

use super::{
    cabinet_settings, check_currency, check_email, check_money, check_optional_money,
    check_prefix, check_vat_rate, nullable_text, optional_text, required_text,
};
use crate::api::auth::Caller;
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::api::types::*;
use crate::auth::{Permission, TenantContext};
use crate::db::{
    CabinetSettingsParams, CabinetSettingsRecord, CreateProfileParams, MembershipRecord, Role,
    UpsertMembershipParams,
};

pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

/// Profile plus active memberships, used to pick a tenant.
pub async fn me_handler(
    State(state): State<Arc<AppState>>,
    caller: Caller,
) -> ApiResult<Json<MeResponse>> {
    let profile = state
        .db
        .get_profile(caller.profile_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Profile"))?;
    let memberships = state
        .db
        .list_profile_memberships(caller.profile_id)
        .await?
        .into_iter()
        .filter(|m| m.active)
        .collect();
    Ok(Json(MeResponse {
        profile,
        memberships,
    }))
}

pub async fn current_tenant_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
) -> ApiResult<Json<CurrentTenantResponse>> {
    let tenant = state
        .db
        .get_tenant(ctx.tenant_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Tenant"))?;
    let settings = cabinet_settings(state.db.as_ref(), ctx.tenant_id).await?;
    Ok(Json(CurrentTenantResponse {
        tenant,
        settings,
        role: ctx.role,
        permissions: ctx.role.permissions(),
    }))
}

pub async fn settings_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
) -> ApiResult<Json<CabinetSettingsRecord>> {
    Ok(Json(
        cabinet_settings(state.db.as_ref(), ctx.tenant_id).await?,
    ))
}

/// Merge the given fields onto the current settings.
fn merge_settings(
    current: CabinetSettingsRecord,
    update: SettingsUpdate,
) -> ApiResult<CabinetSettingsParams> {
    let merged = CabinetSettingsParams {
        legal_name: match update.legal_name {
            Some(name) => required_text("legal_name", &name)?,
            None => current.legal_name,
        },
        address: nullable_text(update.address).unwrap_or(current.address),
        vat_number: nullable_text(update.vat_number).unwrap_or(current.vat_number),
        currency: update
            .currency
            .map(|c| c.trim().to_uppercase())
            .unwrap_or(current.currency),
        default_vat_rate: update.default_vat_rate.unwrap_or(current.default_vat_rate),
        default_hourly_rate: update
            .default_hourly_rate
            .unwrap_or(current.default_hourly_rate),
        rounding_increment_minutes: update
            .rounding_increment_minutes
            .unwrap_or(current.rounding_increment_minutes),
        rounding_mode: update.rounding_mode.unwrap_or(current.rounding_mode),
        invoice_prefix: update
            .invoice_prefix
            .map(|p| p.trim().to_string())
            .unwrap_or(current.invoice_prefix),
        credit_note_prefix: update
            .credit_note_prefix
            .map(|p| p.trim().to_string())
            .unwrap_or(current.credit_note_prefix),
        payment_terms_days: update
            .payment_terms_days
            .unwrap_or(current.payment_terms_days),
    };

    check_currency(&merged.currency)?;
    check_vat_rate(merged.default_vat_rate)?;
    check_money("default_hourly_rate", merged.default_hourly_rate, false)?;
    if merged.rounding_increment_minutes > 60 {
        return Err(ApiError::bad_request(
            "rounding_increment_minutes must be between 0 and 60",
        ));
    }
    if merged.payment_terms_days > 365 {
        return Err(ApiError::bad_request(
            "payment_terms_days must be 365 or less",
        ));
    }
    check_prefix("invoice_prefix", &merged.invoice_prefix)?;
    check_prefix("credit_note_prefix", &merged.credit_note_prefix)?;
    if merged.invoice_prefix == merged.credit_note_prefix {
        return Err(ApiError::bad_request(
            "invoice and credit note prefixes must differ",
        ));
    }
    Ok(merged)
}

pub async fn settings_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<SettingsUpdate>,
) -> ApiResult<Json<CabinetSettingsRecord>> {
    ctx.require(Permission::ManageCabinet)?;
    let current = cabinet_settings(state.db.as_ref(), ctx.tenant_id).await?;
    let merged = merge_settings(current, body)?;
    let updated = state
        .db
        .update_cabinet_settings(ctx.tenant_id, &merged)
        .await?
        .ok_or_else(|| ApiError::not_found("Cabinet settings"))?;

    tracing::info!(tenant_id = %ctx.tenant_id, "Cabinet settings updated");
    crate::audit::record(
        "settings_updated",
        json!({
            "tenant_id": ctx.tenant_id,
            "by": ctx.profile_id,
            "rounding_increment_minutes": updated.rounding_increment_minutes,
            "rounding_mode": updated.rounding_mode.as_str(),
            "default_vat_rate": updated.default_vat_rate,
            "default_hourly_rate": updated.default_hourly_rate,
        }),
    );
    Ok(Json(updated))
}

pub async fn members_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
) -> ApiResult<Json<ListResponse<MembershipRecord>>> {
    ctx.require(Permission::UseOffice)?;
    let members = state.db.list_memberships(ctx.tenant_id).await?;
    Ok(Json(members.into()))
}

/// Add a profile (created on first sight) to the tenant.
pub async fn members_add_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<MembershipRecord>)> {
    ctx.require(Permission::ManageCabinet)?;
    check_email(&body.email)?;
    check_optional_money("hourly_rate", body.hourly_rate)?;

    let db = state.db.as_ref();
    let profile = match db.get_profile_by_email(&body.email).await? {
        Some(profile) => profile,
        None => {
            let display_name = optional_text(body.display_name).unwrap_or_else(|| {
                body.email
                    .trim()
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });
            db.create_profile(&CreateProfileParams {
                email: body.email.clone(),
                display_name,
            })
            .await?
        }
    };

    if let Some(existing) = db.get_membership(ctx.tenant_id, profile.id).await?
        && existing.active
    {
        return Err(ApiError::conflict(format!(
            "{} is already a member",
            existing.email
        )));
    }

    let member = db
        .upsert_membership(
            ctx.tenant_id,
            profile.id,
            &UpsertMembershipParams {
                role: body.role,
                hourly_rate: body.hourly_rate,
                active: true,
            },
        )
        .await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        profile_id = %profile.id,
        role = member.role.as_str(),
        "Member added"
    );
    crate::audit::record(
        "member_added",
        json!({
            "tenant_id": ctx.tenant_id,
            "profile_id": profile.id,
            "role": member.role.as_str(),
            "by": ctx.profile_id,
        }),
    );
    Ok((StatusCode::CREATED, Json(member)))
}

async fn apply_member_change(
    state: &AppState,
    ctx: &TenantContext,
    profile_id: Uuid,
    update: UpdateMemberRequest,
    event: &str,
) -> ApiResult<MembershipRecord> {
    ctx.require(Permission::ManageCabinet)?;
    let current = state
        .db
        .get_membership(ctx.tenant_id, profile_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Member"))?;

    let params = UpsertMembershipParams {
        role: update.role.unwrap_or(current.role),
        hourly_rate: update.hourly_rate.unwrap_or(current.hourly_rate),
        active: update.active.unwrap_or(current.active),
    };
    check_optional_money("hourly_rate", params.hourly_rate)?;
    if profile_id == ctx.profile_id && (params.role != Role::Admin || !params.active) {
        return Err(ApiError::bad_request(
            "admins cannot demote or deactivate themselves",
        ));
    }

    let member = state
        .db
        .upsert_membership(ctx.tenant_id, profile_id, &params)
        .await?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        %profile_id,
        active = member.active,
        "Member updated"
    );
    crate::audit::record(
        event,
        json!({
            "tenant_id": ctx.tenant_id,
            "profile_id": profile_id,
            "role": member.role.as_str(),
            "hourly_rate": member.hourly_rate,
            "active": member.active,
            "by": ctx.profile_id,
        }),
    );
    Ok(member)
}

pub async fn members_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(profile_id): Path<Uuid>,
    Json(body): Json<UpdateMemberRequest>,
) -> ApiResult<Json<MembershipRecord>> {
    let member = apply_member_change(&state, &ctx, profile_id, body, "member_updated").await?;
    Ok(Json(member))
}

/// Memberships are never deleted: time and invoices keep pointing at them.
pub async fn members_deactivate_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(profile_id): Path<Uuid>,
) -> ApiResult<Json<MembershipRecord>> {
    let update = UpdateMemberRequest {
        active: Some(false),
        ..Default::default()
    };
    let member =
        apply_member_change(&state, &ctx, profile_id, update, "member_deactivated").await?;
    Ok(Json(member))
}
