//! Embedded libSQL backend.
//!
//! Each operation opens its own connection from the shared `libsql::Database`
//! handle. Connections enable foreign keys and a busy timeout; multi-statement
//! writes run inside `BEGIN IMMEDIATE ... COMMIT` and roll back on error.

mod expenses;
mod invoicing;
mod office;
mod practice;
mod tenancy;
mod timesheet;

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use libsql::{Value, params};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::Database;
use crate::db::libsql_migrations::MIGRATIONS;
use crate::error::DatabaseError;

const BUSY_TIMEOUT_MS: i64 = 5_000;

pub struct LibSqlBackend {
    db: libsql::Database,
}

impl LibSqlBackend {
    /// Open (or create) a database file, creating parent directories.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        let backend = Self { db };

        let conn = backend.connect().await?;
        conn.query("PRAGMA journal_mode = WAL", ()).await?;
        tracing::debug!(path = %path.display(), "Opened libSQL database");
        Ok(backend)
    }

    pub(crate) async fn connect(&self) -> Result<libsql::Connection, DatabaseError> {
        let conn = self
            .db
            .connect()
            .map_err(|e| DatabaseError::Pool(e.to_string()))?;
        conn.query(&format!("PRAGMA busy_timeout = {BUSY_TIMEOUT_MS}"), ())
            .await?;
        conn.execute("PRAGMA foreign_keys = ON", ()).await?;
        Ok(conn)
    }

    async fn applied_versions(
        conn: &libsql::Connection,
    ) -> Result<Vec<i64>, DatabaseError> {
        let mut rows = conn
            .query("SELECT version FROM schema_migrations ORDER BY version", ())
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(get_i64(&row, 0));
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        let conn = self.connect().await?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (\
               version INTEGER PRIMARY KEY, \
               name TEXT NOT NULL, \
               applied_at TEXT NOT NULL)",
            (),
        )
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        let applied = Self::applied_versions(&conn).await?;
        for (version, name, sql) in MIGRATIONS {
            if applied.contains(version) {
                continue;
            }
            conn.execute("BEGIN IMMEDIATE", ()).await?;
            let result = async {
                conn.execute_batch(sql).await?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
                    params![*version, *name, fmt_ts(&Utc::now())],
                )
                .await?;
                Ok::<(), libsql::Error>(())
            }
            .await;
            match result {
                Ok(()) => {
                    conn.execute("COMMIT", ()).await?;
                    tracing::info!(version, name, "Applied database migration");
                }
                Err(e) => {
                    let _ = conn.execute("ROLLBACK", ()).await;
                    return Err(DatabaseError::Migration(format!(
                        "migration {version} ({name}) failed: {e}"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ==================== Value helpers ====================

pub(crate) fn get_text(row: &libsql::Row, idx: i32) -> String {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => s,
        Ok(Value::Integer(i)) => i.to_string(),
        Ok(Value::Real(f)) => f.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    match row.get_value(idx) {
        Ok(Value::Text(s)) => Some(s),
        Ok(Value::Integer(i)) => Some(i.to_string()),
        Ok(Value::Real(f)) => Some(f.to_string()),
        _ => None,
    }
}

pub(crate) fn get_i64(row: &libsql::Row, idx: i32) -> i64 {
    match row.get_value(idx) {
        Ok(Value::Integer(i)) => i,
        Ok(Value::Real(f)) => f as i64,
        Ok(Value::Text(s)) => s.parse().unwrap_or(0),
        _ => 0,
    }
}

pub(crate) fn get_bool(row: &libsql::Row, idx: i32) -> bool {
    get_i64(row, idx) != 0
}

pub(crate) fn opt_text(value: Option<&str>) -> Value {
    match value {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

pub(crate) fn opt_text_owned(value: Option<String>) -> Value {
    match value {
        Some(s) => Value::Text(s),
        None => Value::Null,
    }
}

pub(crate) fn opt_i64(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

pub(crate) fn opt_bool(value: Option<bool>) -> Value {
    opt_i64(value.map(i64::from))
}

pub(crate) fn opt_uuid(value: Option<Uuid>) -> Value {
    opt_text_owned(value.map(|id| id.to_string()))
}

pub(crate) fn opt_decimal(value: Option<Decimal>) -> Value {
    opt_text_owned(value.map(|d| d.to_string()))
}

pub(crate) fn opt_date(value: Option<NaiveDate>) -> Value {
    opt_text_owned(value.map(fmt_date))
}

/// RFC 3339 with millisecond precision so text order matches time order.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn fmt_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Accepts RFC 3339 and SQLite's `datetime('now')` format.
pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => Ok(dt.with_timezone(&Utc)),
        Err(_) => NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|n| n.and_utc()),
    }
}

pub(crate) fn get_ts(row: &libsql::Row, idx: i32) -> Result<DateTime<Utc>, DatabaseError> {
    parse_timestamp(&get_text(row, idx)).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

pub(crate) fn get_opt_ts(
    row: &libsql::Row,
    idx: i32,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    get_opt_text(row, idx)
        .map(|raw| parse_timestamp(&raw).map_err(|e| DatabaseError::Serialization(e.to_string())))
        .transpose()
}

pub(crate) fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(raw)
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} uuid: {e}")))
}

pub(crate) fn get_uuid(row: &libsql::Row, idx: i32, field: &str) -> Result<Uuid, DatabaseError> {
    parse_uuid(&get_text(row, idx), field)
}

pub(crate) fn get_opt_uuid(
    row: &libsql::Row,
    idx: i32,
    field: &str,
) -> Result<Option<Uuid>, DatabaseError> {
    get_opt_text(row, idx)
        .map(|raw| parse_uuid(&raw, field))
        .transpose()
}

pub(crate) fn parse_decimal(raw: &str, field: &str) -> Result<Decimal, DatabaseError> {
    Decimal::from_str(raw.trim())
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} amount '{raw}': {e}")))
}

pub(crate) fn get_decimal(
    row: &libsql::Row,
    idx: i32,
    field: &str,
) -> Result<Decimal, DatabaseError> {
    parse_decimal(&get_text(row, idx), field)
}

pub(crate) fn get_opt_decimal(
    row: &libsql::Row,
    idx: i32,
    field: &str,
) -> Result<Option<Decimal>, DatabaseError> {
    get_opt_text(row, idx)
        .map(|raw| parse_decimal(&raw, field))
        .transpose()
}

pub(crate) fn parse_date(raw: &str, field: &str) -> Result<NaiveDate, DatabaseError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| DatabaseError::Serialization(format!("invalid {field} date '{raw}': {e}")))
}

pub(crate) fn get_date(
    row: &libsql::Row,
    idx: i32,
    field: &str,
) -> Result<NaiveDate, DatabaseError> {
    parse_date(&get_text(row, idx), field)
}

pub(crate) fn get_opt_date(
    row: &libsql::Row,
    idx: i32,
    field: &str,
) -> Result<Option<NaiveDate>, DatabaseError> {
    get_opt_text(row, idx)
        .map(|raw| parse_date(&raw, field))
        .transpose()
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::LibSqlBackend;
    use crate::db::{
        CabinetSettingsParams, ClientKind, ClientStore, CreateClientParams, CreateMatterParams,
        CreateProfileParams, CreateTenantParams, Database, MatterStatus, MatterStore,
        MembershipStore, ProfileStore, Role, TenantStore, UpsertMembershipParams,
    };
    use crate::timesheet::RoundingMode;

    /// A migrated on-disk database with one tenant, member, client, matter.
    pub(crate) struct Seed {
        pub db: Arc<dyn Database>,
        pub tenant_id: Uuid,
        pub profile_id: Uuid,
        pub client_id: Uuid,
        pub matter_id: Uuid,
        pub _tmpdir: tempfile::TempDir,
    }

    pub(crate) async fn backend() -> (LibSqlBackend, tempfile::TempDir) {
        // Use a temp-file database so all connections share schema/state.
        let tmpdir = tempfile::tempdir().expect("tempdir");
        let backend = LibSqlBackend::new_local(&tmpdir.path().join("cabinet_test.db"))
            .await
            .expect("local backend should initialize");
        backend
            .run_migrations()
            .await
            .expect("migrations should succeed");
        (backend, tmpdir)
    }

    pub(crate) fn settings_params(legal_name: &str) -> CabinetSettingsParams {
        CabinetSettingsParams {
            legal_name: legal_name.to_string(),
            address: None,
            vat_number: None,
            currency: "EUR".to_string(),
            default_vat_rate: dec!(20),
            default_hourly_rate: dec!(150),
            rounding_increment_minutes: 6,
            rounding_mode: RoundingMode::Up,
            invoice_prefix: "F".to_string(),
            credit_note_prefix: "AV".to_string(),
            payment_terms_days: 30,
        }
    }

    /// Add a tenant with an admin member, a client and an open matter.
    pub(crate) async fn add_tenant(db: &dyn Database, slug: &str) -> (Uuid, Uuid, Uuid, Uuid) {
        let tenant = db
            .create_tenant(
                &CreateTenantParams {
                    name: format!("Cabinet {slug}"),
                    slug: slug.to_string(),
                },
                &settings_params(&format!("Cabinet {slug}")),
            )
            .await
            .expect("tenant");
        let profile = db
            .create_profile(&CreateProfileParams {
                email: format!("admin@{slug}.test"),
                display_name: "Admin".to_string(),
            })
            .await
            .expect("profile");
        db.upsert_membership(
            tenant.id,
            profile.id,
            &UpsertMembershipParams {
                role: Role::Admin,
                hourly_rate: None,
                active: true,
            },
        )
        .await
        .expect("membership");
        let client = db
            .create_client(
                tenant.id,
                &CreateClientParams {
                    name: "Acme Industries".to_string(),
                    kind: ClientKind::Company,
                    email: None,
                    phone: None,
                    address: None,
                    vat_number: None,
                    vat_exempt: false,
                    notes: None,
                },
            )
            .await
            .expect("client");
        let matter = db
            .create_matter(
                tenant.id,
                &CreateMatterParams {
                    client_id: client.id,
                    reference: "2026-001".to_string(),
                    title: "Supply contract dispute".to_string(),
                    status: MatterStatus::Open,
                    hourly_rate: None,
                    vat_rate: None,
                    opened_on: None,
                    description: None,
                },
            )
            .await
            .expect("matter");
        (tenant.id, profile.id, client.id, matter.id)
    }

    pub(crate) async fn seed_tenant() -> Seed {
        let (backend, tmpdir) = backend().await;
        let db: Arc<dyn Database> = Arc::new(backend);
        let (tenant_id, profile_id, client_id, matter_id) = add_tenant(db.as_ref(), "alpha").await;
        Seed {
            db,
            tenant_id,
            profile_id,
            client_id,
            matter_id,
            _tmpdir: tmpdir,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone, Utc};
    use libsql::params;

    use super::test_support::backend;
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let (backend, _tmpdir) = backend().await;
        backend.run_migrations().await.expect("second run");

        let conn = backend.connect().await.expect("connect");
        let row = conn
            .query("SELECT COUNT(*) FROM schema_migrations", ())
            .await
            .expect("query")
            .next()
            .await
            .expect("row")
            .expect("count row");
        assert_eq!(get_i64(&row, 0), MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn schema_contains_core_tables() {
        let (backend, _tmpdir) = backend().await;
        let conn = backend.connect().await.expect("connect");
        for table in [
            "tenants",
            "profiles",
            "memberships",
            "cabinet_settings",
            "clients",
            "matters",
            "matter_assignments",
            "time_entries",
            "invoices",
            "invoice_lines",
            "payments",
            "credit_notes",
            "number_sequences",
            "expenses",
            "purchases",
            "todos",
            "messages",
            "documents",
        ] {
            let row = conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    params![table],
                )
                .await
                .expect("query sqlite_master")
                .next()
                .await
                .expect("row read");
            assert!(row.is_some(), "missing table {table}");
        }
    }

    #[test]
    fn timestamps_accept_both_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap();
        assert_eq!(parse_timestamp("2026-03-04T05:06:07.000Z").unwrap(), expected);
        assert_eq!(parse_timestamp("2026-03-04 05:06:07").unwrap(), expected);
        assert_eq!(fmt_ts(&expected), "2026-03-04T05:06:07.000Z");
    }

    #[test]
    fn dates_and_decimals_round_trip_through_text() {
        let date = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        assert_eq!(parse_date(&fmt_date(date), "d").unwrap(), date);
        assert!(parse_date("31/12/2026", "d").is_err());
        assert_eq!(
            parse_decimal("150.50", "rate").unwrap(),
            Decimal::new(15050, 2)
        );
        assert!(parse_decimal("abc", "rate").is_err());
    }
}
