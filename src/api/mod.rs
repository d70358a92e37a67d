//! HTTP API.
//!
//! Every route lives under `/api`. Requests carry `Authorization: Bearer
//! <profile_id>.<secret>`; tenant-scoped routes also carry `X-Tenant-Id`.
//! Errors are returned as `{"error": "..."}`.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;
pub mod types;

pub use error::{ApiError, ApiResult};
pub use server::{AppState, build_router, start_server};
