//! Todos, internal messages and documents.

use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use super::{nullable_text, optional_text, require_active_member, required_text};
use crate::api::error::{ApiError, ApiResult};
use crate::api::server::AppState;
use crate::api::types::*;
use crate::auth::{Permission, TenantContext};
use crate::db::{
    CreateMessageParams, CreateTodoParams, Database, DocumentFilter, DocumentRecord, MessageRecord,
    TodoFilter, TodoRecord, UpdateTodoParams,
};
use crate::documents::Upload;

async fn check_assignee(
    db: &dyn Database,
    ctx: &TenantContext,
    assignee: Option<Uuid>,
) -> ApiResult<()> {
    match assignee {
        Some(id) => require_active_member(db, ctx, id, "Assignee").await,
        None => Ok(()),
    }
}

// --- Todos ---

pub async fn todos_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<TodoQuery>,
) -> ApiResult<Json<ListResponse<TodoRecord>>> {
    ctx.require(Permission::UseOffice)?;
    let filter = TodoFilter {
        assignee_id: if query.mine {
            Some(ctx.profile_id)
        } else {
            query.assignee_id
        },
        matter_id: query.matter_id,
        done: query.done,
    };
    let todos = state.db.list_todos(ctx.tenant_id, &filter).await?;
    Ok(Json(todos.into()))
}

pub async fn todos_create_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<CreateTodoRequest>,
) -> ApiResult<(StatusCode, Json<TodoRecord>)> {
    ctx.require(Permission::UseOffice)?;
    let db = state.db.as_ref();
    check_assignee(db, &ctx, body.assignee_id).await?;
    let params = CreateTodoParams {
        matter_id: body.matter_id,
        assignee_id: body.assignee_id,
        created_by: ctx.profile_id,
        title: required_text("title", &body.title)?,
        notes: optional_text(body.notes),
        due_on: body.due_on,
    };
    let todo = db.create_todo(ctx.tenant_id, &params).await?;
    Ok((StatusCode::CREATED, Json(todo)))
}

pub async fn todos_update_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
    Json(body): Json<UpdateTodoRequest>,
) -> ApiResult<Json<TodoRecord>> {
    ctx.require(Permission::UseOffice)?;
    let db = state.db.as_ref();
    check_assignee(db, &ctx, body.assignee_id.flatten()).await?;
    let params = UpdateTodoParams {
        matter_id: body.matter_id,
        assignee_id: body.assignee_id,
        title: body
            .title
            .map(|t| required_text("title", &t))
            .transpose()?,
        notes: nullable_text(body.notes),
        due_on: body.due_on,
        done: body.done,
    };
    db.update_todo(ctx.tenant_id, id, &params)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Todo"))
}

pub async fn todos_complete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<TodoRecord>> {
    ctx.require(Permission::UseOffice)?;
    let params = UpdateTodoParams {
        done: Some(true),
        ..Default::default()
    };
    state
        .db
        .update_todo(ctx.tenant_id, id, &params)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Todo"))
}

pub async fn todos_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::UseOffice)?;
    if !state.db.delete_todo(ctx.tenant_id, id).await? {
        return Err(ApiError::not_found("Todo"));
    }
    Ok(Json(DeletedResponse { id, deleted: true }))
}

// --- Messages ---

pub async fn messages_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<MessageQuery>,
) -> ApiResult<Json<ListResponse<MessageRecord>>> {
    ctx.require(Permission::UseOffice)?;
    let messages = match query.mailbox {
        Mailbox::Inbox => {
            state
                .db
                .list_inbox(ctx.tenant_id, ctx.profile_id, query.unread_only)
                .await?
        }
        Mailbox::Outbox => state.db.list_outbox(ctx.tenant_id, ctx.profile_id).await?,
    };
    Ok(Json(messages.into()))
}

pub async fn messages_send_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Json(body): Json<SendMessageRequest>,
) -> ApiResult<(StatusCode, Json<MessageRecord>)> {
    ctx.require(Permission::UseOffice)?;
    let db = state.db.as_ref();
    require_active_member(db, &ctx, body.recipient_id, "Recipient").await?;
    let params = CreateMessageParams {
        sender_id: ctx.profile_id,
        recipient_id: body.recipient_id,
        matter_id: body.matter_id,
        subject: body.subject.trim().to_string(),
        body: body.body.trim().to_string(),
    };
    let message = db.create_message(ctx.tenant_id, &params).await?;
    tracing::debug!(
        tenant_id = %ctx.tenant_id,
        message_id = %message.id,
        "Message sent"
    );
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn messages_read_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<MessageRecord>> {
    ctx.require(Permission::UseOffice)?;
    state
        .db
        .mark_message_read(ctx.tenant_id, id, ctx.profile_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Message"))
}

pub async fn messages_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::UseOffice)?;
    if !state
        .db
        .delete_message(ctx.tenant_id, id, ctx.profile_id)
        .await?
    {
        return Err(ApiError::not_found("Message"));
    }
    Ok(Json(DeletedResponse { id, deleted: true }))
}

// --- Documents ---

pub async fn documents_list_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Query(query): Query<DocumentQuery>,
) -> ApiResult<Json<ListResponse<DocumentRecord>>> {
    ctx.require(Permission::UseOffice)?;
    let filter = DocumentFilter {
        matter_id: query.matter_id,
        client_id: query.client_id,
    };
    let documents = state.db.list_documents(ctx.tenant_id, &filter).await?;
    Ok(Json(documents.into()))
}

fn parse_uuid_field(name: &str, raw: &str) -> ApiResult<Option<Uuid>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(raw)
        .map(Some)
        .map_err(|_| ApiError::bad_request(format!("{name} is not a valid id")))
}

/// Multipart upload: one `file` part plus optional `matter_id` and
/// `client_id` text parts.
pub async fn documents_upload_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<DocumentRecord>)> {
    ctx.require(Permission::UseOffice)?;

    let mut matter_id = None;
    let mut client_id = None;
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(e.status(), format!("Multipart read error: {e}")))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let content_type = field.content_type().map(str::to_string);
                let data = field.bytes().await.map_err(|e| {
                    ApiError::new(e.status(), format!("Failed to read upload body: {e}"))
                })?;
                file = Some((file_name, content_type, data.to_vec()));
            }
            "matter_id" | "client_id" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid {name} field: {e}")))?;
                let id = parse_uuid_field(&name, &text)?;
                if name == "matter_id" {
                    matter_id = id;
                } else {
                    client_id = id;
                }
            }
            other => tracing::debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (file_name, content_type, data) =
        file.ok_or_else(|| ApiError::bad_request("missing 'file' part"))?;
    let record = state
        .storage
        .save(
            state.db.as_ref(),
            ctx.tenant_id,
            Upload {
                uploaded_by: ctx.profile_id,
                matter_id,
                client_id,
                file_name: &file_name,
                content_type: content_type.as_deref(),
                data: &data,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn load_document(db: &dyn Database, tenant_id: Uuid, id: Uuid) -> ApiResult<DocumentRecord> {
    db.get_document(tenant_id, id)
        .await?
        .ok_or_else(|| ApiError::not_found("Document"))
}

pub async fn documents_get_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DocumentRecord>> {
    ctx.require(Permission::UseOffice)?;
    Ok(Json(load_document(state.db.as_ref(), ctx.tenant_id, id).await?))
}

pub async fn documents_download_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    ctx.require(Permission::UseOffice)?;
    let record = load_document(state.db.as_ref(), ctx.tenant_id, id).await?;
    let data = state.storage.read(&record).await?;
    Ok((
        [
            (header::CONTENT_TYPE, record.content_type.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.file_name),
            ),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        Body::from(data),
    )
        .into_response())
}

pub async fn documents_delete_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<DeletedResponse>> {
    ctx.require(Permission::UseOffice)?;
    match state
        .storage
        .delete(state.db.as_ref(), ctx.tenant_id, id)
        .await?
    {
        Some(_) => Ok(Json(DeletedResponse { id, deleted: true })),
        None => Err(ApiError::not_found("Document")),
    }
}
