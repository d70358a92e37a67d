use chrono::Utc;
use libsql::params;
use uuid::Uuid;

use crate::db::{
    CabinetSettingsParams, CabinetSettingsRecord, CreateProfileParams, CreateTenantParams,
    MembershipRecord, MembershipStore, ProfileRecord, ProfileStore, Role, TenantRecord,
    TenantStore, UpsertMembershipParams,
};
use crate::error::DatabaseError;
use crate::timesheet::RoundingMode;

use super::{
    LibSqlBackend, fmt_ts, get_bool, get_decimal, get_i64, get_opt_decimal, get_opt_text,
    get_text, get_ts, get_uuid, opt_decimal, opt_text,
};

const SETTINGS_COLUMNS: &str = "tenant_id, legal_name, address, vat_number, currency, default_vat_rate, \
     default_hourly_rate, rounding_increment_minutes, rounding_mode, invoice_prefix, \
     credit_note_prefix, payment_terms_days, updated_at";

const MEMBERSHIP_SELECT: &str = "SELECT m.tenant_id, t.name, m.profile_id, p.email, p.display_name, m.role, \
     m.hourly_rate, m.active, m.created_at, m.updated_at \
     FROM memberships m \
     JOIN tenants t ON t.id = m.tenant_id \
     JOIN profiles p ON p.id = m.profile_id";

fn to_u32(value: i64, field: &str) -> Result<u32, DatabaseError> {
    u32::try_from(value)
        .map_err(|_| DatabaseError::Serialization(format!("invalid {field} value {value}")))
}

fn row_to_tenant_record(row: &libsql::Row) -> Result<TenantRecord, DatabaseError> {
    Ok(TenantRecord {
        id: get_uuid(row, 0, "tenants.id")?,
        name: get_text(row, 1),
        slug: get_text(row, 2),
        created_at: get_ts(row, 3)?,
        updated_at: get_ts(row, 4)?,
    })
}

fn row_to_profile_record(row: &libsql::Row) -> Result<ProfileRecord, DatabaseError> {
    Ok(ProfileRecord {
        id: get_uuid(row, 0, "profiles.id")?,
        email: get_text(row, 1),
        display_name: get_text(row, 2),
        created_at: get_ts(row, 3)?,
        updated_at: get_ts(row, 4)?,
    })
}

fn row_to_settings_record(row: &libsql::Row) -> Result<CabinetSettingsRecord, DatabaseError> {
    let mode_raw = get_text(row, 8);
    Ok(CabinetSettingsRecord {
        tenant_id: get_uuid(row, 0, "cabinet_settings.tenant_id")?,
        legal_name: get_text(row, 1),
        address: get_opt_text(row, 2),
        vat_number: get_opt_text(row, 3),
        currency: get_text(row, 4),
        default_vat_rate: get_decimal(row, 5, "default_vat_rate")?,
        default_hourly_rate: get_decimal(row, 6, "default_hourly_rate")?,
        rounding_increment_minutes: to_u32(get_i64(row, 7), "rounding_increment_minutes")?,
        rounding_mode: RoundingMode::from_db_value(&mode_raw).ok_or_else(|| {
            DatabaseError::Serialization(format!("invalid rounding_mode '{mode_raw}'"))
        })?,
        invoice_prefix: get_text(row, 9),
        credit_note_prefix: get_text(row, 10),
        payment_terms_days: to_u32(get_i64(row, 11), "payment_terms_days")?,
        updated_at: get_ts(row, 12)?,
    })
}

fn row_to_membership_record(row: &libsql::Row) -> Result<MembershipRecord, DatabaseError> {
    let role_raw = get_text(row, 5);
    Ok(MembershipRecord {
        tenant_id: get_uuid(row, 0, "memberships.tenant_id")?,
        tenant_name: get_text(row, 1),
        profile_id: get_uuid(row, 2, "memberships.profile_id")?,
        email: get_text(row, 3),
        display_name: get_text(row, 4),
        role: Role::from_db_value(&role_raw)
            .ok_or_else(|| DatabaseError::Serialization(format!("invalid role '{role_raw}'")))?,
        hourly_rate: get_opt_decimal(row, 6, "memberships.hourly_rate")?,
        active: get_bool(row, 7),
        created_at: get_ts(row, 8)?,
        updated_at: get_ts(row, 9)?,
    })
}

fn normalize_email(raw: &str) -> String {
    raw.trim().to_ascii_lowercase()
}

#[async_trait::async_trait]
impl TenantStore for LibSqlBackend {
    async fn create_tenant(
        &self,
        input: &CreateTenantParams,
        settings: &CabinetSettingsParams,
    ) -> Result<TenantRecord, DatabaseError> {
        let slug = input.slug.trim();
        if slug.is_empty() || input.name.trim().is_empty() {
            return Err(DatabaseError::Serialization(
                "tenant name and slug cannot be empty".to_string(),
            ));
        }

        let conn = self.connect().await?;
        let id = Uuid::new_v4().to_string();
        let now = fmt_ts(&Utc::now());
        conn.execute("BEGIN IMMEDIATE", ()).await?;
        let result = async {
            conn.execute(
                "INSERT INTO tenants (id, name, slug, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
                params![id.as_str(), input.name.trim(), slug, now.as_str()],
            )
            .await?;
            conn.execute(
                &format!(
                    "INSERT INTO cabinet_settings ({SETTINGS_COLUMNS}) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    id.as_str(),
                    settings.legal_name.trim(),
                    opt_text(settings.address.as_deref()),
                    opt_text(settings.vat_number.as_deref()),
                    settings.currency.as_str(),
                    settings.default_vat_rate.to_string(),
                    settings.default_hourly_rate.to_string(),
                    i64::from(settings.rounding_increment_minutes),
                    settings.rounding_mode.as_str(),
                    settings.invoice_prefix.as_str(),
                    settings.credit_note_prefix.as_str(),
                    i64::from(settings.payment_terms_days),
                    now.as_str(),
                ],
            )
            .await?;
            Ok::<(), DatabaseError>(())
        }
        .await;

        match result {
            Ok(()) => conn.execute("COMMIT", ()).await?,
            Err(err) => {
                let _ = conn.execute("ROLLBACK", ()).await;
                return Err(err);
            }
        };

        let tenant_id = Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        self.get_tenant(tenant_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created tenant".to_string()))
    }

    async fn get_tenant(&self, tenant_id: Uuid) -> Result<Option<TenantRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, name, slug, created_at, updated_at FROM tenants WHERE id = ?1 LIMIT 1",
                params![tenant_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_tenant_record(&row)).transpose()
    }

    async fn get_cabinet_settings(
        &self,
        tenant_id: Uuid,
    ) -> Result<Option<CabinetSettingsRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {SETTINGS_COLUMNS} FROM cabinet_settings WHERE tenant_id = ?1 LIMIT 1"),
                params![tenant_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_settings_record(&row)).transpose()
    }

    async fn update_cabinet_settings(
        &self,
        tenant_id: Uuid,
        input: &CabinetSettingsParams,
    ) -> Result<Option<CabinetSettingsRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE cabinet_settings SET \
                   legal_name = ?2, \
                   address = ?3, \
                   vat_number = ?4, \
                   currency = ?5, \
                   default_vat_rate = ?6, \
                   default_hourly_rate = ?7, \
                   rounding_increment_minutes = ?8, \
                   rounding_mode = ?9, \
                   invoice_prefix = ?10, \
                   credit_note_prefix = ?11, \
                   payment_terms_days = ?12, \
                   updated_at = ?13 \
                 WHERE tenant_id = ?1",
                params![
                    tenant_id.to_string(),
                    input.legal_name.trim(),
                    opt_text(input.address.as_deref()),
                    opt_text(input.vat_number.as_deref()),
                    input.currency.as_str(),
                    input.default_vat_rate.to_string(),
                    input.default_hourly_rate.to_string(),
                    i64::from(input.rounding_increment_minutes),
                    input.rounding_mode.as_str(),
                    input.invoice_prefix.as_str(),
                    input.credit_note_prefix.as_str(),
                    i64::from(input.payment_terms_days),
                    fmt_ts(&Utc::now()),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_cabinet_settings(tenant_id).await
    }
}

#[async_trait::async_trait]
impl ProfileStore for LibSqlBackend {
    async fn create_profile(
        &self,
        input: &CreateProfileParams,
    ) -> Result<ProfileRecord, DatabaseError> {
        let email = normalize_email(&input.email);
        if email.is_empty() || !email.contains('@') {
            return Err(DatabaseError::Serialization(format!(
                "invalid email '{}'",
                input.email
            )));
        }

        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            "INSERT INTO profiles (id, email, display_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?4)",
            params![
                id.to_string(),
                email.as_str(),
                input.display_name.trim(),
                now.as_str()
            ],
        )
        .await?;

        self.get_profile(id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created profile".to_string()))
    }

    async fn get_profile(&self, profile_id: Uuid) -> Result<Option<ProfileRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, email, display_name, created_at, updated_at FROM profiles WHERE id = ?1 LIMIT 1",
                params![profile_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_profile_record(&row)).transpose()
    }

    async fn get_profile_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ProfileRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT id, email, display_name, created_at, updated_at FROM profiles WHERE email = ?1 LIMIT 1",
                params![normalize_email(email)],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_profile_record(&row)).transpose()
    }

    async fn set_profile_token_hash(
        &self,
        profile_id: Uuid,
        token_hash: &str,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE profiles SET token_hash = ?2, updated_at = ?3 WHERE id = ?1",
                params![profile_id.to_string(), token_hash, fmt_ts(&Utc::now())],
            )
            .await?;
        Ok(updated > 0)
    }

    async fn get_profile_token_hash(
        &self,
        profile_id: Uuid,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                "SELECT token_hash FROM profiles WHERE id = ?1 LIMIT 1",
                params![profile_id.to_string()],
            )
            .await?
            .next()
            .await?;
        Ok(row.and_then(|row| get_opt_text(&row, 0)))
    }
}

#[async_trait::async_trait]
impl MembershipStore for LibSqlBackend {
    async fn upsert_membership(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
        input: &UpsertMembershipParams,
    ) -> Result<MembershipRecord, DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());
        conn.execute(
            "INSERT INTO memberships (tenant_id, profile_id, role, hourly_rate, active, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
             ON CONFLICT (tenant_id, profile_id) DO UPDATE SET \
               role = excluded.role, \
               hourly_rate = excluded.hourly_rate, \
               active = excluded.active, \
               updated_at = excluded.updated_at",
            params![
                tenant_id.to_string(),
                profile_id.to_string(),
                input.role.as_str(),
                opt_decimal(input.hourly_rate),
                i64::from(input.active),
                now.as_str(),
            ],
        )
        .await?;

        self.get_membership(tenant_id, profile_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load upserted membership".to_string()))
    }

    async fn get_membership(
        &self,
        tenant_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<MembershipRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("{MEMBERSHIP_SELECT} WHERE m.tenant_id = ?1 AND m.profile_id = ?2 LIMIT 1"),
                params![tenant_id.to_string(), profile_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_membership_record(&row)).transpose()
    }

    async fn list_memberships(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<MembershipRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!("{MEMBERSHIP_SELECT} WHERE m.tenant_id = ?1 ORDER BY p.display_name ASC"),
                params![tenant_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_membership_record(&row)?);
        }
        Ok(out)
    }

    async fn list_profile_memberships(
        &self,
        profile_id: Uuid,
    ) -> Result<Vec<MembershipRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "{MEMBERSHIP_SELECT} WHERE m.profile_id = ?1 AND m.active = 1 ORDER BY t.name ASC"
                ),
                params![profile_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_membership_record(&row)?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::super::test_support::{backend, settings_params};
    use super::*;
    use crate::db::Database;

    async fn tenant(db: &dyn Database, slug: &str) -> TenantRecord {
        db.create_tenant(
            &CreateTenantParams {
                name: format!("Cabinet {slug}"),
                slug: slug.to_string(),
            },
            &settings_params("Cabinet"),
        )
        .await
        .expect("create tenant")
    }

    #[tokio::test]
    async fn tenant_creation_stores_settings() {
        let (backend, _tmpdir) = backend().await;
        let created = tenant(&backend, "dupont").await;

        let settings = backend
            .get_cabinet_settings(created.id)
            .await
            .expect("get settings")
            .expect("settings row");
        assert_eq!(settings.default_hourly_rate, dec!(150));
        assert_eq!(settings.rounding_mode, RoundingMode::Up);
        assert_eq!(settings.payment_terms_days, 30);

        let mut params = settings_params("Cabinet Dupont SELARL");
        params.default_vat_rate = dec!(8.5);
        params.rounding_mode = RoundingMode::Nearest;
        let updated = backend
            .update_cabinet_settings(created.id, &params)
            .await
            .expect("update")
            .expect("updated row");
        assert_eq!(updated.legal_name, "Cabinet Dupont SELARL");
        assert_eq!(updated.default_vat_rate, dec!(8.5));
        assert_eq!(updated.rounding_mode, RoundingMode::Nearest);

        assert!(
            backend
                .update_cabinet_settings(Uuid::new_v4(), &params)
                .await
                .expect("update missing")
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_slug_is_a_constraint_violation() {
        let (backend, _tmpdir) = backend().await;
        tenant(&backend, "dupont").await;
        let err = backend
            .create_tenant(
                &CreateTenantParams {
                    name: "Other".to_string(),
                    slug: "dupont".to_string(),
                },
                &settings_params("Other"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn profile_email_is_normalized_and_unique() {
        let (backend, _tmpdir) = backend().await;
        let profile = backend
            .create_profile(&CreateProfileParams {
                email: "  Marie@Example.COM ".to_string(),
                display_name: "Marie".to_string(),
            })
            .await
            .expect("create profile");
        assert_eq!(profile.email, "marie@example.com");

        let found = backend
            .get_profile_by_email("MARIE@example.com")
            .await
            .expect("lookup")
            .expect("profile");
        assert_eq!(found.id, profile.id);

        let err = backend
            .create_profile(&CreateProfileParams {
                email: "marie@example.com".to_string(),
                display_name: "Other".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        assert!(
            backend
                .get_profile_token_hash(profile.id)
                .await
                .expect("hash")
                .is_none()
        );
        assert!(
            backend
                .set_profile_token_hash(profile.id, "abc123")
                .await
                .expect("set hash")
        );
        assert_eq!(
            backend
                .get_profile_token_hash(profile.id)
                .await
                .expect("hash")
                .as_deref(),
            Some("abc123")
        );
    }

    #[tokio::test]
    async fn memberships_upsert_and_list_per_side() {
        let (backend, _tmpdir) = backend().await;
        let alpha = tenant(&backend, "alpha").await;
        let beta = tenant(&backend, "beta").await;
        let profile = backend
            .create_profile(&CreateProfileParams {
                email: "paul@example.com".to_string(),
                display_name: "Paul".to_string(),
            })
            .await
            .expect("profile");

        for tenant_id in [alpha.id, beta.id] {
            backend
                .upsert_membership(
                    tenant_id,
                    profile.id,
                    &UpsertMembershipParams {
                        role: Role::Lawyer,
                        hourly_rate: Some(dec!(220)),
                        active: true,
                    },
                )
                .await
                .expect("membership");
        }
        let updated = backend
            .upsert_membership(
                beta.id,
                profile.id,
                &UpsertMembershipParams {
                    role: Role::Accountant,
                    hourly_rate: None,
                    active: false,
                },
            )
            .await
            .expect("update membership");
        assert_eq!(updated.role, Role::Accountant);
        assert_eq!(updated.hourly_rate, None);
        assert_eq!(updated.tenant_name, "Cabinet beta");

        let active = backend
            .list_profile_memberships(profile.id)
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].tenant_id, alpha.id);
        assert_eq!(active[0].hourly_rate, Some(dec!(220)));

        let members = backend.list_memberships(beta.id).await.expect("members");
        assert_eq!(members.len(), 1);
        assert!(!members[0].active);
    }
}
