//! Database abstraction layer.
//!
//! Provides a backend-agnostic `Database` trait that unifies all persistence
//! operations, split into per-entity sub-traits. The shipped implementation
//! is [`libsql::LibSqlBackend`] (embedded libSQL).
//!
//! Every tenant-owned operation takes the tenant id as its first argument and
//! filters on it; composite foreign keys in the schema keep cross-tenant
//! references from being written at all.

pub mod libsql;
pub mod libsql_migrations;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::invoice::CreditAmount;
use crate::error::DatabaseError;
use crate::timesheet::RoundingMode;

/// Open the configured database, run migrations, and return it.
pub async fn connect_from_config(
    config: &crate::config::DatabaseConfig,
) -> Result<Arc<dyn Database>, DatabaseError> {
    let backend = libsql::LibSqlBackend::new_local(&config.path).await?;
    backend.run_migrations().await?;
    Ok(Arc::new(backend))
}

/// Role a member holds inside a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Lawyer,
    Assistant,
    Accountant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Lawyer => "lawyer",
            Self::Assistant => "assistant",
            Self::Accountant => "accountant",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "admin" => Some(Self::Admin),
            "lawyer" => Some(Self::Lawyer),
            "assistant" => Some(Self::Assistant),
            "accountant" => Some(Self::Accountant),
            _ => None,
        }
    }
}

/// Client entity type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Individual,
    Company,
}

impl ClientKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Company => "company",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "individual" => Some(Self::Individual),
            "company" => Some(Self::Company),
            _ => None,
        }
    }
}

/// Matter lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatterStatus {
    Open,
    OnHold,
    Closed,
    Archived,
}

impl MatterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::OnHold => "on_hold",
            Self::Closed => "closed",
            Self::Archived => "archived",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "on_hold" => Some(Self::OnHold),
            "closed" => Some(Self::Closed),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Invoice lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Issued,
    PartiallyPaid,
    Paid,
    Cancelled,
}

impl InvoiceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Issued => "issued",
            Self::PartiallyPaid => "partially_paid",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "draft" => Some(Self::Draft),
            "issued" => Some(Self::Issued),
            "partially_paid" => Some(Self::PartiallyPaid),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Origin of an invoice line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceLineKind {
    Time,
    Expense,
    Fee,
}

impl InvoiceLineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Time => "time",
            Self::Expense => "expense",
            Self::Fee => "fee",
        }
    }

    pub fn from_db_value(value: &str) -> Option<Self> {
        match value {
            "time" => Some(Self::Time),
            "expense" => Some(Self::Expense),
            "fee" => Some(Self::Fee),
            _ => None,
        }
    }
}

// ==================== Tenancy ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantRecord {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTenantParams {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateProfileParams {
    pub email: String,
    pub display_name: String,
}

/// Membership of a profile in a tenant, joined with both sides for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipRecord {
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub profile_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub hourly_rate: Option<Decimal>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UpsertMembershipParams {
    pub role: Role,
    pub hourly_rate: Option<Decimal>,
    pub active: bool,
}

/// Per-tenant billing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CabinetSettingsRecord {
    pub tenant_id: Uuid,
    pub legal_name: String,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub currency: String,
    pub default_vat_rate: Decimal,
    pub default_hourly_rate: Decimal,
    pub rounding_increment_minutes: u32,
    pub rounding_mode: RoundingMode,
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub payment_terms_days: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CabinetSettingsParams {
    pub legal_name: String,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub currency: String,
    pub default_vat_rate: Decimal,
    pub default_hourly_rate: Decimal,
    pub rounding_increment_minutes: u32,
    pub rounding_mode: RoundingMode,
    pub invoice_prefix: String,
    pub credit_note_prefix: String,
    pub payment_terms_days: u32,
}

impl CabinetSettingsParams {
    /// Initial settings for a new tenant.
    pub fn from_defaults(legal_name: &str, defaults: &crate::config::TenantDefaults) -> Self {
        Self {
            legal_name: legal_name.trim().to_string(),
            address: None,
            vat_number: None,
            currency: defaults.currency.clone(),
            default_vat_rate: defaults.vat_rate,
            default_hourly_rate: defaults.hourly_rate,
            rounding_increment_minutes: defaults.rounding_increment_minutes,
            rounding_mode: defaults.rounding_mode,
            invoice_prefix: defaults.invoice_prefix.clone(),
            credit_note_prefix: defaults.credit_note_prefix.clone(),
            payment_terms_days: defaults.payment_terms_days,
        }
    }
}

// ==================== Clients & matters ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub name_normalized: String,
    pub kind: ClientKind,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub vat_exempt: bool,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateClientParams {
    pub name: String,
    pub kind: ClientKind,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub vat_number: Option<String>,
    pub vat_exempt: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateClientParams {
    pub name: Option<String>,
    pub kind: Option<ClientKind>,
    pub email: Option<Option<String>>,
    pub phone: Option<Option<String>>,
    pub address: Option<Option<String>>,
    pub vat_number: Option<Option<String>>,
    pub vat_exempt: Option<bool>,
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatterRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub client_id: Uuid,
    pub reference: String,
    pub title: String,
    pub status: MatterStatus,
    pub hourly_rate: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub opened_on: Option<NaiveDate>,
    pub closed_on: Option<NaiveDate>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMatterParams {
    pub client_id: Uuid,
    pub reference: String,
    pub title: String,
    pub status: MatterStatus,
    pub hourly_rate: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub opened_on: Option<NaiveDate>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateMatterParams {
    pub client_id: Option<Uuid>,
    pub title: Option<String>,
    pub status: Option<MatterStatus>,
    pub hourly_rate: Option<Option<Decimal>>,
    pub vat_rate: Option<Option<Decimal>>,
    pub opened_on: Option<Option<NaiveDate>>,
    pub closed_on: Option<Option<NaiveDate>>,
    pub description: Option<Option<String>>,
}

#[derive(Debug, Clone, Default)]
pub struct MatterFilter {
    pub client_id: Option<Uuid>,
    pub status: Option<MatterStatus>,
}

/// A member staffed on a matter, optionally at a matter-specific rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Uuid,
    pub profile_id: Uuid,
    pub hourly_rate: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ==================== Time & money ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeEntryRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Uuid,
    pub profile_id: Uuid,
    pub work_date: NaiveDate,
    pub minutes: i64,
    pub billed_minutes: i64,
    pub description: String,
    pub billable: bool,
    pub hourly_rate: Option<Decimal>,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTimeEntryParams {
    pub matter_id: Uuid,
    pub profile_id: Uuid,
    pub work_date: NaiveDate,
    pub minutes: i64,
    pub billed_minutes: i64,
    pub description: String,
    pub billable: bool,
    pub hourly_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTimeEntryParams {
    pub matter_id: Option<Uuid>,
    pub work_date: Option<NaiveDate>,
    /// Raw and rounded minutes always change together.
    pub minutes: Option<(i64, i64)>,
    pub description: Option<String>,
    pub billable: Option<bool>,
    pub hourly_rate: Option<Option<Decimal>>,
}

#[derive(Debug, Clone, Default)]
pub struct TimeEntryFilter {
    pub matter_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    /// `Some(true)` only invoiced entries, `Some(false)` only unbilled ones.
    pub billed: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpenseRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Uuid,
    pub profile_id: Uuid,
    pub incurred_on: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub vat_rate: Decimal,
    pub billable: bool,
    pub invoice_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateExpenseParams {
    pub matter_id: Uuid,
    pub profile_id: Uuid,
    pub incurred_on: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    pub vat_rate: Decimal,
    pub billable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateExpenseParams {
    pub incurred_on: Option<NaiveDate>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub billable: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ExpenseFilter {
    pub matter_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub billed: Option<bool>,
}

/// Office purchase (overhead, never re-invoiced).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub supplier: String,
    pub description: String,
    pub purchased_on: NaiveDate,
    pub net_amount: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePurchaseParams {
    pub supplier: String,
    pub description: String,
    pub purchased_on: NaiveDate,
    pub net_amount: Decimal,
    pub vat_rate: Decimal,
    pub vat_amount: Decimal,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Uuid,
    pub client_id: Uuid,
    pub number: Option<String>,
    pub status: InvoiceStatus,
    pub issue_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub net_total: Decimal,
    pub vat_total: Decimal,
    pub gross_total: Decimal,
    pub paid_total: Decimal,
    pub credited_total: Decimal,
    pub currency: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl InvoiceRecord {
    /// Amount still due: gross minus credit notes minus payments.
    pub fn outstanding(&self) -> Decimal {
        (self.gross_total - self.credited_total - self.paid_total).max(Decimal::ZERO)
    }

    /// Gross amount that credit notes may still cover.
    pub fn creditable(&self) -> Decimal {
        (self.gross_total - self.credited_total).max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone)]
pub struct CreateInvoiceParams {
    pub matter_id: Uuid,
    pub client_id: Uuid,
    pub period_start: Option<NaiveDate>,
    pub period_end: Option<NaiveDate>,
    pub net_total: Decimal,
    pub vat_total: Decimal,
    pub gross_total: Decimal,
    pub currency: String,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct InvoiceFilter {
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    /// Issue-date range; drafts have no issue date and are excluded when set.
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLineRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub kind: InvoiceLineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub net_amount: Decimal,
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateInvoiceLineParams {
    pub kind: InvoiceLineKind,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub vat_rate: Decimal,
    pub net_amount: Decimal,
    pub sort_order: i32,
}

/// Entries reserved by a draft invoice.
#[derive(Debug, Clone, Default)]
pub struct InvoiceSources {
    pub time_entry_ids: Vec<Uuid>,
    pub expense_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub method: Option<String>,
    pub reference: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreatePaymentParams {
    pub amount: Decimal,
    pub paid_on: NaiveDate,
    pub method: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditNoteRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub invoice_id: Uuid,
    pub number: String,
    pub issue_date: NaiveDate,
    pub reason: Option<String>,
    pub net_amount: Decimal,
    pub vat_amount: Decimal,
    pub gross_amount: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateCreditNoteParams {
    pub issue_date: NaiveDate,
    pub reason: Option<String>,
    /// Amounts are computed from the invoice row read inside the transaction.
    pub amount: CreditAmount,
}

// ==================== Office ====================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub due_on: Option<NaiveDate>,
    pub done: bool,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateTodoParams {
    pub matter_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub created_by: Uuid,
    pub title: String,
    pub notes: Option<String>,
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateTodoParams {
    pub matter_id: Option<Option<Uuid>>,
    pub assignee_id: Option<Option<Uuid>>,
    pub title: Option<String>,
    pub notes: Option<Option<String>>,
    pub due_on: Option<Option<NaiveDate>>,
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct TodoFilter {
    pub assignee_id: Option<Uuid>,
    pub matter_id: Option<Uuid>,
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateMessageParams {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub storage_key: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CreateDocumentParams {
    pub id: Uuid,
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub uploaded_by: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub sha256: String,
    pub storage_key: String,
}

#[derive(Debug, Clone, Default)]
pub struct DocumentFilter {
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
}

/// Normalize names for uniqueness and search.
pub fn normalize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_sep = true;

    for ch in raw.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            prev_sep = false;
        } else if !prev_sep {
            out.push(' ');
            prev_sep = true;
        }
    }

    out.trim().to_string()
}

/// Matter references are compared trimmed and uppercased.
pub fn normalize_reference(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Tenant slugs: lowercase ASCII alphanumerics separated by single dashes.
pub fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut prev_dash = true;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash {
            out.push('-');
            prev_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

// ==================== Sub-traits ====================
//
// Each sub-trait groups related persistence methods. The `Database` supertrait
// combines them all; leaf consumers can depend on a specific sub-trait instead.

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn create_tenant(
        &self,
        input: &CreateTenantParams,
        settings: &CabinetSettingsParams,
    ) -> Result<TenantRecord, DatabaseError>;
    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>, DatabaseError>;
    async fn get_cabinet_settings(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<CabinetSettingsRecord>, DatabaseError>;
    async fn update_cabinet_settings(
        &self,
        tenant_id: Uuid,
        input: &CabinetSettingsParams,
    ) -> Result<Option<CabinetSettingsRecord>, DatabaseError>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn create_profile(
        &self,
        input: &CreateProfileParams,
    ) -> Result<ProfileRecord, DatabaseError>;
    async fn get_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, DatabaseError>;
    async fn get_profile_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProfileRecord>, DatabaseError>;
    async fn set_profile_token_hash(
        &self,
        profile_id: Uuid,
        token_hash: &str,
    ) -> Result<bool, DatabaseError>;
    async fn get_profile_token_hash(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<String>, DatabaseError>;
}

#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn upsert_membership(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
        input: &UpsertMembershipParams,
    ) -> Result<MembershipRecord, DatabaseError>;
    async fn get_membership(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<MembershipRecord>, DatabaseError>;
    async fn list_memberships(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<MembershipRecord>, DatabaseError>;
    async fn list_profile_memberships(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<MembershipRecord>, DatabaseError>;
}

#[async_trait]
pub trait ClientStore: Send + Sync {
    async fn create_client(
        &self,
        tenant_id: Uuid,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError>;
    async fn list_clients(
        &self,
        tenant_id: Uuid,
        query: Option<&str>,
    ) -> Result<Vec<ClientRecord>, DatabaseError>;
    async fn get_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn update_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError>;
    async fn delete_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait MatterStore: Send + Sync {
    async fn create_matter(
        &self,
        tenant_id: Uuid,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError>;
    async fn list_matters(
        &self,
        tenant_id: Uuid,
        filter: &MatterFilter,
    ) -> Result<Vec<MatterRecord>, DatabaseError>;
    async fn get_matter(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn update_matter(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError>;
    async fn delete_matter(&self, tenant_id: Uuid, matter_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn upsert_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
        hourly_rate: Option<Decimal>,
    ) -> Result<AssignmentRecord, DatabaseError>;
    async fn get_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<AssignmentRecord>, DatabaseError>;
    async fn list_assignments(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
    ) -> Result<Vec<AssignmentRecord>, DatabaseError>;
    async fn delete_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait TimesheetStore: Send + Sync {
    async fn create_time_entry(
        &self,
        tenant_id: Uuid,
        input: &CreateTimeEntryParams,
    ) -> Result<TimeEntryRecord, DatabaseError>;
    async fn get_time_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<TimeEntryRecord>, DatabaseError>;
    async fn list_time_entries(
        &self,
        tenant_id: Uuid,
        filter: &TimeEntryFilter,
    ) -> Result<Vec<TimeEntryRecord>, DatabaseError>;
    /// Fails with [`DatabaseError::Locked`] once the entry is on an invoice.
    async fn update_time_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateTimeEntryParams,
    ) -> Result<Option<TimeEntryRecord>, DatabaseError>;
    /// Fails with [`DatabaseError::Locked`] once the entry is on an invoice.
    async fn delete_time_entry(&self, tenant_id: Uuid, entry_id: Uuid)
    -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait ExpenseStore: Send + Sync {
    async fn create_expense(
        &self,
        tenant_id: Uuid,
        input: &CreateExpenseParams,
    ) -> Result<ExpenseRecord, DatabaseError>;
    async fn get_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<ExpenseRecord>, DatabaseError>;
    async fn list_expenses(
        &self,
        tenant_id: Uuid,
        filter: &ExpenseFilter,
    ) -> Result<Vec<ExpenseRecord>, DatabaseError>;
    async fn update_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        input: &UpdateExpenseParams,
    ) -> Result<Option<ExpenseRecord>, DatabaseError>;
    async fn delete_expense(&self, tenant_id: Uuid, expense_id: Uuid)
    -> Result<bool, DatabaseError>;
    async fn create_purchase(
        &self,
        tenant_id: Uuid,
        input: &CreatePurchaseParams,
    ) -> Result<PurchaseRecord, DatabaseError>;
    async fn list_purchases(
        &self,
        tenant_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PurchaseRecord>, DatabaseError>;
    async fn delete_purchase(
        &self,
        tenant_id: Uuid,
        purchase_id: Uuid,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait InvoiceStore: Send + Sync {
    /// Insert a draft with its lines and reserve the source entries.
    ///
    /// Fails with [`DatabaseError::Locked`] if any source entry was reserved
    /// by another invoice in the meantime; nothing is written in that case.
    async fn save_invoice_draft(
        &self,
        tenant_id: Uuid,
        invoice: &CreateInvoiceParams,
        lines: &[CreateInvoiceLineParams],
        sources: &InvoiceSources,
    ) -> Result<(InvoiceRecord, Vec<InvoiceLineRecord>), DatabaseError>;
    async fn get_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    async fn list_invoices(
        &self,
        tenant_id: Uuid,
        filter: &InvoiceFilter,
    ) -> Result<Vec<InvoiceRecord>, DatabaseError>;
    async fn list_invoice_lines(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<InvoiceLineRecord>, DatabaseError>;
    /// Number a draft from the tenant's yearly sequence and mark it issued.
    /// Returns `None` when no draft with that id exists.
    async fn issue_invoice(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        prefix: &str,
        issue_date: NaiveDate,
        due_date: NaiveDate,
    ) -> Result<Option<InvoiceRecord>, DatabaseError>;
    /// Delete a draft and release its entries. Returns false if no draft matched.
    async fn delete_invoice_draft(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<bool, DatabaseError>;
    async fn record_payment(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        input: &CreatePaymentParams,
    ) -> Result<(InvoiceRecord, PaymentRecord), DatabaseError>;
    async fn list_payments(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
    ) -> Result<Vec<PaymentRecord>, DatabaseError>;
    async fn create_credit_note(
        &self,
        tenant_id: Uuid,
        invoice_id: Uuid,
        prefix: &str,
        input: &CreateCreditNoteParams,
    ) -> Result<(InvoiceRecord, CreditNoteRecord), DatabaseError>;
    async fn list_credit_notes(
        &self,
        tenant_id: Uuid,
        invoice_id: Option<Uuid>,
    ) -> Result<Vec<CreditNoteRecord>, DatabaseError>;
}

#[async_trait]
pub trait TodoStore: Send + Sync {
    async fn create_todo(
        &self,
        tenant_id: Uuid,
        input: &CreateTodoParams,
    ) -> Result<TodoRecord, DatabaseError>;
    async fn get_todo(
        &self,
        tenant_id: Uuid,
        todo_id: Uuid,
    ) -> Result<Option<TodoRecord>, DatabaseError>;
    async fn list_todos(
        &self,
        tenant_id: Uuid,
        filter: &TodoFilter,
    ) -> Result<Vec<TodoRecord>, DatabaseError>;
    async fn update_todo(
        &self,
        tenant_id: Uuid,
        todo_id: Uuid,
        input: &UpdateTodoParams,
    ) -> Result<Option<TodoRecord>, DatabaseError>;
    async fn delete_todo(&self, tenant_id: Uuid, todo_id: Uuid) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        tenant_id: Uuid,
        input: &CreateMessageParams,
    ) -> Result<MessageRecord, DatabaseError>;
    async fn get_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageRecord>, DatabaseError>;
    async fn list_inbox(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;
    async fn list_outbox(
        &self,
        tenant_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Vec<MessageRecord>, DatabaseError>;
    /// Only the recipient may mark a message read.
    async fn mark_message_read(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<MessageRecord>, DatabaseError>;
    /// Deletes a message the given profile sent or received.
    async fn delete_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        profile_id: Uuid,
    ) -> Result<bool, DatabaseError>;
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create_document(
        &self,
        tenant_id: Uuid,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError>;
    async fn get_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
    async fn list_documents(
        &self,
        tenant_id: Uuid,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRecord>, DatabaseError>;
    /// Remove the row and return it so the caller can delete the stored file.
    async fn delete_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError>;
}

/// Backend-agnostic database supertrait.
#[async_trait]
pub trait Database:
    TenantStore
    + ProfileStore
    + MembershipStore
    + ClientStore
    + MatterStore
    + AssignmentStore
    + TimesheetStore
    + ExpenseStore
    + InvoiceStore
    + TodoStore
    + MessageStore
    + DocumentStore
    + Send
    + Sync
{
    /// Run schema migrations for this backend.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;
}

#[cfg(test)]
mod tests {
    use super::{normalize_name, normalize_reference, slugify};

    #[test]
    fn normalize_name_collapses_punctuation_and_case() {
        assert_eq!(normalize_name("  ACME, S.A.S. "), "acme s a s");
        assert_eq!(normalize_name("Étude Dupont & Fils"), "étude dupont fils");
        assert_eq!(normalize_name("!!!"), "");
    }

    #[test]
    fn normalize_reference_uppercases() {
        assert_eq!(normalize_reference(" 2026-lit-004 "), "2026-LIT-004");
    }

    #[test]
    fn slugify_keeps_ascii_words() {
        assert_eq!(slugify("Cabinet Martin & Associés"), "cabinet-martin-associ-s");
        assert_eq!(slugify("  Acme  "), "acme");
    }
}
