//! Request and response DTOs for the HTTP API.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::auth::Permission;
use crate::db::{
    CabinetSettingsRecord, ClientKind, CreditNoteRecord, InvoiceRecord, InvoiceStatus,
    MatterStatus, MembershipRecord, PaymentRecord, ProfileRecord, Role, TenantRecord,
};
use crate::timesheet::RoundingMode;

/// Distinguishes an absent field (`None`) from an explicit `null`
/// (`Some(None)`) in PATCH-style bodies.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_true() -> bool {
    true
}

// --- Common ---

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self { items }
    }
}

#[derive(Debug, Serialize)]
pub struct DeletedResponse {
    pub id: Uuid,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeriodQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

// --- Identity & tenant ---

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub profile: ProfileRecord,
    pub memberships: Vec<MembershipRecord>,
}

#[derive(Debug, Serialize)]
pub struct CurrentTenantResponse {
    pub tenant: TenantRecord,
    pub settings: CabinetSettingsRecord,
    pub role: Role,
    pub permissions: Vec<Permission>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SettingsUpdate {
    pub legal_name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub vat_number: Option<Option<String>>,
    pub currency: Option<String>,
    pub default_vat_rate: Option<Decimal>,
    pub default_hourly_rate: Option<Decimal>,
    pub rounding_increment_minutes: Option<u32>,
    pub rounding_mode: Option<RoundingMode>,
    pub invoice_prefix: Option<String>,
    pub credit_note_prefix: Option<String>,
    pub payment_terms_days: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub hourly_rate: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMemberRequest {
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "nullable")]
    pub hourly_rate: Option<Option<Decimal>>,
    pub active: Option<bool>,
}

// --- Clients & matters ---

#[derive(Debug, Default, Deserialize)]
pub struct ClientQuery {
    pub q: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateClientRequest {
    pub name: String,
    #[serde(default = "default_client_kind")]
    pub kind: ClientKind,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub vat_number: Option<String>,
    #[serde(default)]
    pub vat_exempt: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

fn default_client_kind() -> ClientKind {
    ClientKind::Company
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateClientRequest {
    pub name: Option<String>,
    pub kind: Option<ClientKind>,
    #[serde(default, deserialize_with = "nullable")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub address: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub vat_number: Option<Option<String>>,
    pub vat_exempt: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MatterQuery {
    pub client_id: Option<Uuid>,
    pub status: Option<MatterStatus>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMatterRequest {
    pub client_id: Uuid,
    pub reference: String,
    pub title: String,
    #[serde(default)]
    pub status: Option<MatterStatus>,
    #[serde(default)]
    pub hourly_rate: Option<Decimal>,
    #[serde(default)]
    pub vat_rate: Option<Decimal>,
    #[serde(default)]
    pub opened_on: Option<NaiveDate>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMatterRequest {
    pub client_id: Option<Uuid>,
    pub title: Option<String>,
    pub status: Option<MatterStatus>,
    #[serde(default, deserialize_with = "nullable")]
    pub hourly_rate: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub vat_rate: Option<Option<Decimal>>,
    #[serde(default, deserialize_with = "nullable")]
    pub opened_on: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub closed_on: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentRequest {
    pub profile_id: Uuid,
    #[serde(default)]
    pub hourly_rate: Option<Decimal>,
}

// --- Time & expenses ---

#[derive(Debug, Default, Deserialize)]
pub struct TimeEntryQuery {
    pub matter_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub billed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateTimeEntryRequest {
    pub matter_id: Uuid,
    /// Record on behalf of another member; requires `view_all_time`.
    #[serde(default)]
    pub profile_id: Option<Uuid>,
    pub work_date: NaiveDate,
    pub minutes: i64,
    pub description: String,
    #[serde(default = "default_true")]
    pub billable: bool,
    #[serde(default)]
    pub hourly_rate: Option<Decimal>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTimeEntryRequest {
    pub matter_id: Option<Uuid>,
    pub work_date: Option<NaiveDate>,
    pub minutes: Option<i64>,
    pub description: Option<String>,
    pub billable: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub hourly_rate: Option<Option<Decimal>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    pub group_by: Option<String>,
    pub matter_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpenseQuery {
    pub matter_id: Option<Uuid>,
    pub profile_id: Option<Uuid>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub billed: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreateExpenseRequest {
    pub matter_id: Uuid,
    #[serde(default)]
    pub profile_id: Option<Uuid>,
    pub incurred_on: NaiveDate,
    pub description: String,
    pub amount: Decimal,
    /// Defaults to the matter's VAT rate, then the cabinet's.
    #[serde(default)]
    pub vat_rate: Option<Decimal>,
    #[serde(default = "default_true")]
    pub billable: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateExpenseRequest {
    pub incurred_on: Option<NaiveDate>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub billable: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    pub supplier: String,
    pub description: String,
    pub purchased_on: NaiveDate,
    pub net_amount: Decimal,
    #[serde(default)]
    pub vat_rate: Option<Decimal>,
    /// Computed from net amount and rate when absent.
    #[serde(default)]
    pub vat_amount: Option<Decimal>,
    #[serde(default)]
    pub category: Option<String>,
}

// --- Invoices ---

#[derive(Debug, Default, Deserialize)]
pub struct InvoiceQuery {
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub status: Option<InvoiceStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct IssueRequest {
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct PaymentRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub paid_on: Option<NaiveDate>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub invoice: InvoiceRecord,
    pub payment: PaymentRecord,
}

#[derive(Debug, Serialize)]
pub struct CreditNoteResponse {
    pub invoice: InvoiceRecord,
    pub credit_note: CreditNoteRecord,
}

// --- Office ---

#[derive(Debug, Default, Deserialize)]
pub struct TodoQuery {
    pub assignee_id: Option<Uuid>,
    pub matter_id: Option<Uuid>,
    pub done: Option<bool>,
    /// Shortcut for `assignee_id=<caller>`.
    #[serde(default)]
    pub mine: bool,
}

#[derive(Debug, Deserialize)]
pub struct CreateTodoRequest {
    pub title: String,
    #[serde(default)]
    pub matter_id: Option<Uuid>,
    #[serde(default)]
    pub assignee_id: Option<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub due_on: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTodoRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub matter_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub assignee_id: Option<Option<Uuid>>,
    #[serde(default, deserialize_with = "nullable")]
    pub notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    pub due_on: Option<Option<NaiveDate>>,
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mailbox {
    #[default]
    Inbox,
    Outbox,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    #[serde(default, rename = "box")]
    pub mailbox: Mailbox,
    #[serde(default)]
    pub unread_only: bool,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub recipient_id: Uuid,
    #[serde(default)]
    pub matter_id: Option<Uuid>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DocumentQuery {
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nullable_fields_distinguish_absent_from_null() {
        let absent: UpdateMatterRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(absent.hourly_rate, None);

        let cleared: UpdateMatterRequest =
            serde_json::from_str(r#"{"hourly_rate": null}"#).unwrap();
        assert_eq!(cleared.hourly_rate, Some(None));

        let set: UpdateMatterRequest =
            serde_json::from_str(r#"{"hourly_rate": "150.00"}"#).unwrap();
        assert_eq!(set.hourly_rate, Some(Some(Decimal::new(15000, 2))));
    }

    #[test]
    fn time_entries_default_to_billable() {
        let req: CreateTimeEntryRequest = serde_json::from_str(
            r#"{"matter_id":"00000000-0000-0000-0000-000000000001","work_date":"2026-03-02","minutes":50,"description":"call"}"#,
        )
        .unwrap();
        assert!(req.billable);
        assert_eq!(req.profile_id, None);
    }

    #[test]
    fn mailbox_defaults_to_inbox() {
        let q: MessageQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.mailbox, Mailbox::Inbox);
        let q: MessageQuery = serde_json::from_str(r#"{"box":"outbox"}"#).unwrap();
        assert_eq!(q.mailbox, Mailbox::Outbox);
    }
}
