//! Multi-tenant back office for small professional-services firms.
//!
//! Members record time and expenses against client matters; time is rounded
//! with the cabinet's settings, billed through draft invoices with per-rate
//! VAT, and exported as CSV. Todos, internal messages and uploaded documents
//! cover the rest of the office.

pub mod api;
pub mod audit;
pub mod auth;
pub mod billing;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod export;
pub mod settings;
pub mod timesheet;
