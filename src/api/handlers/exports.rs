//! CSV downloads.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::api::error::ApiResult;
use crate::api::server::AppState;
use crate::api::types::PeriodQuery;
use crate::auth::{Permission, TenantContext};
use crate::export::{self, ExportKind, Period};

/// `GET /api/exports/{kind}.csv?from=&to=`
pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    ctx: TenantContext,
    Path(file): Path<String>,
    Query(query): Query<PeriodQuery>,
) -> ApiResult<Response> {
    ctx.require(Permission::Export)?;
    let kind = ExportKind::from_name(&file)?;
    let period = Period {
        from: query.from,
        to: query.to,
    };
    let csv = export::export(state.db.as_ref(), ctx.tenant_id, kind, period, &state.export).await?;

    tracing::info!(
        tenant_id = %ctx.tenant_id,
        kind = kind.file_name(),
        bytes = csv.len(),
        "CSV export"
    );
    crate::audit::record(
        "export",
        json!({
            "tenant_id": ctx.tenant_id,
            "by": ctx.profile_id,
            "kind": kind,
            "from": period.from,
            "to": period.to,
        }),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", kind.file_name()),
            ),
        ],
        csv,
    )
        .into_response())
}
