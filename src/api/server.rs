//! Axum HTTP server: shared state, routes, and startup.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{get, post, put},
};
use tokio::sync::{RwLock, oneshot};
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use super::auth::auth_middleware;
use super::handlers::{cabinet, exports, invoices, office, practice, time};
use crate::config::{Config, ExportConfig};
use crate::db::Database;
use crate::documents::DocumentStorage;
use crate::error::ServerError;

/// JSON API only: nothing may be framed, scripted or loaded.
const CONTENT_SECURITY_POLICY: &str = "default-src 'none'; frame-ancestors 'none'";

/// Default request body cap; document uploads get their own.
const JSON_BODY_LIMIT: usize = 1024 * 1024;

/// Multipart framing around an upload at the size limit.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Shared state for all handlers.
pub struct AppState {
    pub db: Arc<dyn Database>,
    pub storage: DocumentStorage,
    pub export: ExportConfig,
    pub started_at: Instant,
    /// Set by [`start_server`]; consumed by [`AppState::shutdown`].
    pub shutdown_tx: RwLock<Option<oneshot::Sender<()>>>,
}

impl AppState {
    pub fn new(db: Arc<dyn Database>, storage: DocumentStorage, export: ExportConfig) -> Self {
        Self {
            db,
            storage,
            export,
            started_at: Instant::now(),
            shutdown_tx: RwLock::new(None),
        }
    }

    pub fn from_config(db: Arc<dyn Database>, config: &Config) -> Self {
        Self::new(
            db,
            DocumentStorage::from_config(&config.storage),
            config.export,
        )
    }

    /// Ask a running server to stop accepting connections.
    pub async fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.write().await.take() {
            let _ = tx.send(());
        }
    }
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer, ServerError> {
    let origins = allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|_| ServerError::InvalidOrigin(origin.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static(super::auth::TENANT_HEADER),
        ]))
        .allow_credentials(true))
}

/// Build the full router. Everything except `/api/health` requires a token.
pub fn build_router(
    state: Arc<AppState>,
    allowed_origins: &[String],
) -> Result<Router, ServerError> {
    let upload_limit = state.storage.max_upload_bytes() + MULTIPART_OVERHEAD;

    // Public routes (no auth)
    let public = Router::new().route("/api/health", get(cabinet::health_handler));

    // Protected routes (bearer token; tenant routes also need X-Tenant-Id)
    let protected = Router::new()
        // Identity & cabinet
        .route("/api/me", get(cabinet::me_handler))
        .route("/api/tenants/current", get(cabinet::current_tenant_handler))
        .route(
            "/api/settings",
            get(cabinet::settings_get_handler).put(cabinet::settings_update_handler),
        )
        .route(
            "/api/members",
            get(cabinet::members_list_handler).post(cabinet::members_add_handler),
        )
        .route(
            "/api/members/{profile_id}",
            put(cabinet::members_update_handler).delete(cabinet::members_deactivate_handler),
        )
        // Clients & matters
        .route(
            "/api/clients",
            get(practice::clients_list_handler).post(practice::clients_create_handler),
        )
        .route(
            "/api/clients/{id}",
            get(practice::clients_get_handler)
                .put(practice::clients_update_handler)
                .delete(practice::clients_delete_handler),
        )
        .route(
            "/api/matters",
            get(practice::matters_list_handler).post(practice::matters_create_handler),
        )
        .route(
            "/api/matters/{id}",
            get(practice::matters_get_handler)
                .put(practice::matters_update_handler)
                .delete(practice::matters_delete_handler),
        )
        .route(
            "/api/matters/{id}/assignments",
            get(practice::assignments_list_handler).post(practice::assignments_upsert_handler),
        )
        .route(
            "/api/matters/{id}/assignments/{profile_id}",
            axum::routing::delete(practice::assignments_delete_handler),
        )
        // Time
        .route(
            "/api/time-entries",
            get(time::time_list_handler).post(time::time_create_handler),
        )
        .route(
            "/api/time-entries/{id}",
            get(time::time_get_handler)
                .put(time::time_update_handler)
                .delete(time::time_delete_handler),
        )
        .route("/api/timesheet/summary", get(time::summary_handler))
        .route(
            "/api/expenses",
            get(time::expenses_list_handler).post(time::expenses_create_handler),
        )
        .route(
            "/api/expenses/{id}",
            get(time::expenses_get_handler)
                .put(time::expenses_update_handler)
                .delete(time::expenses_delete_handler),
        )
        .route(
            "/api/purchases",
            get(time::purchases_list_handler).post(time::purchases_create_handler),
        )
        .route(
            "/api/purchases/{id}",
            axum::routing::delete(time::purchases_delete_handler),
        )
        // Invoices
        .route("/api/invoices", get(invoices::invoices_list_handler))
        .route("/api/invoices/draft", post(invoices::invoices_draft_handler))
        .route("/api/invoices/{id}", get(invoices::invoices_get_handler))
        .route("/api/invoices/{id}/issue", post(invoices::invoices_issue_handler))
        .route("/api/invoices/{id}/cancel", post(invoices::invoices_cancel_handler))
        .route(
            "/api/invoices/{id}/payments",
            get(invoices::payments_list_handler).post(invoices::payments_create_handler),
        )
        .route(
            "/api/invoices/{id}/credit-notes",
            get(invoices::credit_notes_list_handler).post(invoices::credit_notes_create_handler),
        )
        .route("/api/credit-notes", get(invoices::credit_notes_all_handler))
        // Office
        .route(
            "/api/todos",
            get(office::todos_list_handler).post(office::todos_create_handler),
        )
        .route(
            "/api/todos/{id}",
            put(office::todos_update_handler).delete(office::todos_delete_handler),
        )
        .route("/api/todos/{id}/complete", post(office::todos_complete_handler))
        .route(
            "/api/messages",
            get(office::messages_list_handler).post(office::messages_send_handler),
        )
        .route(
            "/api/messages/{id}",
            axum::routing::delete(office::messages_delete_handler),
        )
        .route("/api/messages/{id}/read", post(office::messages_read_handler))
        .route(
            "/api/documents",
            get(office::documents_list_handler)
                .post(office::documents_upload_handler)
                .layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/api/documents/{id}",
            get(office::documents_get_handler).delete(office::documents_delete_handler),
        )
        .route(
            "/api/documents/{id}/content",
            get(office::documents_download_handler),
        )
        // Exports
        .route("/api/exports/{file}", get(exports::export_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Ok(Router::new()
        .merge(public)
        .merge(protected)
        .layer(DefaultBodyLimit::max(JSON_BODY_LIMIT))
        .layer(cors_layer(allowed_origins)?)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}

/// Bind, spawn the server, and return the bound address (useful with port 0).
pub async fn start_server(
    addr: SocketAddr,
    state: Arc<AppState>,
    allowed_origins: &[String],
) -> Result<SocketAddr, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ServerError::Bind {
            addr,
            reason: e.to_string(),
        })?;
    let bound_addr = listener.local_addr().map_err(|e| ServerError::Bind {
        addr,
        reason: format!("Failed to get local addr: {e}"),
    })?;

    let app = build_router(state.clone(), allowed_origins)?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    *state.shutdown_tx.write().await = Some(shutdown_tx);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
                tracing::info!("HTTP server shutting down");
            })
            .await
        {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tracing::info!("HTTP API listening on http://{}", bound_addr);
    Ok(bound_addr)
}
