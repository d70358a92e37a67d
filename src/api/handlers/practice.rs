//! Clients, matters and matter assignments.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::Utc;
use uuid::Uuid;

use super::{
    check_email, check_optional_money, check_vat_rate, nullable_text, optional_text,
    require_active_member, required_text,
};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::api::types::*;
use crate::auth::{Permission, TenantContext};
use crate::db::{
    AssignmentRecord, ClientRecord, CreateClientParams, CreateMatterParams, MatterFilter,
    MatterRecord, MatterStatus, UpdateClientParams, UpdateMatterParams,
};

// --- Clients ---

pub async fn clients_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<ClientQuery>,
) -> ApiResult<Json<ListResponse<ClientRecord>>> {
    let clients = state
        .db
        .list_clients(ctx.tenant_id, query.q.as_deref())
        .await?;
    Ok(Json(clients.into()))
}

pub async fn clients_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreateClientRequest>,
) -> ApiResult<(StatusCode, Json<ClientRecord>)> {
    ctx.require(Permission::ManageClients)?;
    let email = optional_text(body.email);
    if let Some(email) = &email {
        check_email(email)?;
    }
    let params = CreateClientParams {
        name: required_text("name", &body.name)?,
        kind: body.kind,
        email,
        phone: optional_text(body.phone),
        address: optional_text(body.address),
        vat_number: optional_text(body.vat_number),
        vat_exempt: body.vat_exempt,
        notes: optional_text(body.notes),
    };
    let client = state.db.create_client(ctx.tenant_id, &params).await?;
    tracing::info!(tenant_id = %ctx.tenant_id, client_id = %client.id, "Client created");
    Ok((StatusCode::CREATED, Json(client)))
}

pub async fn clients_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ClientRecord>> {
    state
        .db
        .get_client(ctx.tenant_id, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Client"))
}

pub async fn clients_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateClientRequest>,
) -> ApiResult<Json<ClientRecord>> {
    ctx.require(Permission::ManageClients)?;
    let email = nullable_text(body.email);
    if let Some(Some(email)) = &email {
        check_email(email)?;
    }
    let params = UpdateClientParams {
        name: body
            .name
            .map(|n| required_text("name", &n))
            .transpose()?,
        kind: body.kind,
        email,
        phone: nullable_text(body.phone),
        address: nullable_text(body.address),
        vat_number: nullable_text(body.vat_number),
        vat_exempt: body.vat_exempt,
        notes: nullable_text(body.notes),
    };
    state
        .db
        .update_client(ctx.tenant_id, id, &params)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Client"))
}

pub async fn clients_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::ManageClients)?;
    if !state.db.delete_client(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Client"));
    }
    tracing::info!(tenant_id = %ctx.tenant_id, client_id = %id, "Client deleted");
    Ok(Json(DeletedResponse { id, deleted: true }))
}

// --- Matters ---

pub async fn matters_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<MatterQuery>,
) -> ApiResult<Json<ListResponse<MatterRecord>>> {
    let filter = MatterFilter {
        client_id: query.client_id,
        status: query.status,
    };
    let matters = state.db.list_matters(ctx.tenant_id, &filter).await?;
    Ok(Json(matters.into()))
}

pub async fn matters_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreateMatterRequest>,
) -> ApiResult<(StatusCode, Json<MatterRecord>)> {
    ctx.require(Permission::ManageClients)?;
    check_optional_money("hourly_rate", body.hourly_rate)?;
    if let Some(rate) = body.vat_rate {
        check_vat_rate(rate)?;
    }
    if state
        .db
        .get_client(ctx.tenant_id, body.client_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Client"));
    }

    let params = CreateMatterParams {
        client_id: body.client_id,
        reference: required_text("reference", &body.reference)?,
        title: required_text("title", &body.title)?,
        status: body.status.unwrap_or(MatterStatus::Open),
        hourly_rate: body.hourly_rate,
        vat_rate: body.vat_rate,
        opened_on: Some(body.opened_on.unwrap_or_else(|| Utc::now().date_naive())),
        description: optional_text(body.description),
    };
    let matter = state.db.create_matter(ctx.tenant_id, &params).await?;
    tracing::info!(
        tenant_id = %ctx.tenant_id,
        matter_id = %matter.id,
        reference = %matter.reference,
        "Matter created"
    );
    Ok((StatusCode::CREATED, Json(matter)))
}

pub async fn matters_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MatterRecord>> {
    state
        .db
        .get_matter(ctx.tenant_id, id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Matter"))
}

/// Closing a matter stamps `closed_on` (today unless given); reopening
/// clears it.
fn closing_date(
    current: &MatterRecord,
    status: Option<MatterStatus>,
    closed_on: Option<Option<chrono::NaiveDate>>,
) -> Option<Option<chrono::NaiveDate>> {
    if closed_on.is_some() {
        return closed_on;
    }
    match status {
        Some(MatterStatus::Closed | MatterStatus::Archived) if current.closed_on.is_none() => {
            Some(Some(Utc::now().date_naive()))
        }
        Some(MatterStatus::Open | MatterStatus::OnHold) if current.closed_on.is_some() => {
            Some(None)
        }
        _ => None,
    }
}

pub async fn matters_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateMatterRequest>,
) -> ApiResult<Json<MatterRecord>> {
    ctx.require(Permission::ManageClients)?;
    if let Some(rate) = body.hourly_rate {
        check_optional_money("hourly_rate", rate)?;
    }
    if let Some(Some(rate)) = body.vat_rate {
        check_vat_rate(rate)?;
    }
    let current = state
        .db
        .get_matter(ctx.tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Matter"))?;

    let params = UpdateMatterParams {
        client_id: body.client_id,
        title: body
            .title
            .map(|t| required_text("title", &t))
            .transpose()?,
        status: body.status,
        hourly_rate: body.hourly_rate,
        vat_rate: body.vat_rate,
        opened_on: body.opened_on,
        closed_on: closing_date(&current, body.status, body.closed_on),
        description: nullable_text(body.description),
    };
    let matter = state
        .db
        .update_matter(ctx.tenant_id, id, &params)
        .await?
        .ok_or_else(|| ApiError::not_found("Matter"))?;
    if matter.status != current.status {
        tracing::info!(
            tenant_id = %ctx.tenant_id,
            matter_id = %id,
            from = current.status.as_str(),
            to = matter.status.as_str(),
            "Matter status changed"
        );
    }
    Ok(Json(matter))
}

/// Fails with 409 while time entries, expenses or invoices reference the matter.
pub async fn matters_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::ManageClients)?;
    if !state.db.delete_matter(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Matter"));
    }
    tracing::info!(tenant_id = %ctx.tenant_id, matter_id = %id, "Matter deleted");
    Ok(Json(DeletedResponse { id, deleted: true }))
}

// --- Assignments ---

pub async fn assignments_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(matter_id): Path<Uuid>,
) -> ApiResult<Json<ListResponse<AssignmentRecord>>> {
    let assignments = state
        .db
        .list_assignments(ctx.tenant_id, matter_id)
        .await?;
    Ok(Json(assignments.into()))
}

pub async fn assignments_upsert_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(matter_id): Path<Uuid>,
    Json(body): Json<AssignmentRequest>,
) -> ApiResult<Json<AssignmentRecord>> {
    ctx.require(Permission::ManageClients)?;
    check_optional_money("hourly_rate", body.hourly_rate)?;
    if state
        .db
        .get_matter(ctx.tenant_id, matter_id)
        .await?
        .is_none()
    {
        return Err(ApiError::not_found("Matter"));
    }
    require_active_member(state.db.as_ref(), &ctx, body.profile_id, "Assignee").await?;

    let assignment = state
        .db
        .upsert_assignment(ctx.tenant_id, matter_id, body.profile_id, body.hourly_rate)
        .await?;
    Ok(Json(assignment))
}

pub async fn assignments_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path((matter_id, profile_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::ManageClients)?;
    if !state
        .db
        .delete_assignment(ctx.tenant_id, matter_id, profile_id)
        .await?
    {
        return Err(ApiError::not_found("Assignment"));
    }
    Ok(Json(DeletedResponse {
        id: profile_id,
        deleted: true,
    }))
}
