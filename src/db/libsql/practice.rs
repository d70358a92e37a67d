use chrono::Utc;
use libsql::params;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::{
    AssignmentRecord, AssignmentStore, ClientKind, ClientRecord, ClientStore, CreateClientParams,
    CreateMatterParams, MatterFilter, MatterRecord, MatterStatus, MatterStore, UpdateClientParams,
    UpdateMatterParams, normalize_name, normalize_reference,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_bool, get_opt_date, get_opt_decimal, get_opt_text, get_text,
    get_ts, get_uuid, opt_date, opt_decimal, opt_text, opt_text_owned,
};

const CLIENT_COLUMNS: &str = "id, tenant_id, name, name_normalized, kind, email, phone, address, \
     vat_number, vat_exempt, notes, created_at, updated_at";

const MATTER_COLUMNS: &str = "id, tenant_id, client_id, reference, title, status, hourly_rate, \
     vat_rate, opened_on, closed_on, description, created_at, updated_at";

const ASSIGNMENT_COLUMNS: &str =
    "id, tenant_id, matter_id, profile_id, hourly_rate, created_at, updated_at";

fn parse_client_kind(raw: &str) -> Result<ClientKind, DatabaseError> {
    ClientKind::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid client kind '{}'", raw)))
}

fn parse_matter_status(raw: &str) -> Result<MatterStatus, DatabaseError> {
    MatterStatus::from_db_value(raw)
        .ok_or_else(|| DatabaseError::Serialization(format!("invalid matter status '{}'", raw)))
}

fn row_to_client_record(row: &libsql::Row) -> Result<ClientRecord, DatabaseError> {
    Ok(ClientRecord {
        id: get_uuid(row, 0, "clients.id")?,
        tenant_id: get_uuid(row, 1, "clients.tenant_id")?,
        name: get_text(row, 2),
        name_normalized: get_text(row, 3),
        kind: parse_client_kind(&get_text(row, 4))?,
        email: get_opt_text(row, 5),
        phone: get_opt_text(row, 6),
        address: get_opt_text(row, 7),
        vat_number: get_opt_text(row, 8),
        vat_exempt: get_bool(row, 9),
        notes: get_opt_text(row, 10),
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

fn row_to_matter_record(row: &libsql::Row) -> Result<MatterRecord, DatabaseError> {
    Ok(MatterRecord {
        id: get_uuid(row, 0, "matters.id")?,
        tenant_id: get_uuid(row, 1, "matters.tenant_id")?,
        client_id: get_uuid(row, 2, "matters.client_id")?,
        reference: get_text(row, 3),
        title: get_text(row, 4),
        status: parse_matter_status(&get_text(row, 5))?,
        hourly_rate: get_opt_decimal(row, 6, "matters.hourly_rate")?,
        vat_rate: get_opt_decimal(row, 7, "matters.vat_rate")?,
        opened_on: get_opt_date(row, 8, "matters.opened_on")?,
        closed_on: get_opt_date(row, 9, "matters.closed_on")?,
        description: get_opt_text(row, 10),
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

fn row_to_assignment_record(row: &libsql::Row) -> Result<AssignmentRecord, DatabaseError> {
    Ok(AssignmentRecord {
        id: get_uuid(row, 0, "matter_assignments.id")?,
        tenant_id: get_uuid(row, 1, "matter_assignments.tenant_id")?,
        matter_id: get_uuid(row, 2, "matter_assignments.matter_id")?,
        profile_id: get_uuid(row, 3, "matter_assignments.profile_id")?,
        hourly_rate: get_opt_decimal(row, 4, "matter_assignments.hourly_rate")?,
        created_at: get_ts(row, 5)?,
        updated_at: get_ts(row, 6)?,
    })
}

#[async_trait::async_trait]
impl ClientStore for LibSqlBackend {
    async fn create_client(
        &self,
        tenant_id: Uuid,
        input: &CreateClientParams,
    ) -> Result<ClientRecord, DatabaseError> {
        let normalized_name = normalize_name(&input.name);
        if normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }

        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO clients ({CLIENT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.name.trim(),
                normalized_name.as_str(),
                input.kind.as_str(),
                opt_text(input.email.as_deref()),
                opt_text(input.phone.as_deref()),
                opt_text(input.address.as_deref()),
                opt_text(input.vat_number.as_deref()),
                i64::from(input.vat_exempt),
                opt_text(input.notes.as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        self.get_client(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created client".to_string()))
    }

    async fn list_clients(
        &self,
        tenant_id: Uuid,
        query: Option<&str>,
    ) -> Result<Vec<ClientRecord>, DatabaseError> {
        let search = query.map(normalize_name).filter(|s| !s.is_empty());
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {CLIENT_COLUMNS} FROM clients \
                     WHERE tenant_id = ?1 AND (?2 IS NULL OR name_normalized LIKE ?2) \
                     ORDER BY name ASC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_text_owned(search.map(|s| format!("%{s}%"))),
                ],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_client_record(&row)?);
        }
        Ok(out)
    }

    async fn get_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {CLIENT_COLUMNS} FROM clients WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"),
                params![tenant_id.to_string(), client_id.to_string()],
            )
            .await?
            .next()
            .await?;

        row.map(|row| row_to_client_record(&row)).transpose()
    }

    async fn update_client(
        &self,
        tenant_id: Uuid,
        client_id: Uuid,
        input: &UpdateClientParams,
    ) -> Result<Option<ClientRecord>, DatabaseError> {
        let Some(existing) = self.get_client(tenant_id, client_id).await? else {
            return Ok(None);
        };

        let merged_name = input
            .name
            .as_deref()
            .unwrap_or(existing.name.as_str())
            .trim();
        let normalized_name = normalize_name(merged_name);
        if normalized_name.is_empty() {
            return Err(DatabaseError::Serialization(
                "client name cannot be empty".to_string(),
            ));
        }
        let merged_kind = input.kind.unwrap_or(existing.kind);
        let merged_email = input.email.clone().unwrap_or(existing.email);
        let merged_phone = input.phone.clone().unwrap_or(existing.phone);
        let merged_address = input.address.clone().unwrap_or(existing.address);
        let merged_vat_number = input.vat_number.clone().unwrap_or(existing.vat_number);
        let merged_vat_exempt = input.vat_exempt.unwrap_or(existing.vat_exempt);
        let merged_notes = input.notes.clone().unwrap_or(existing.notes);

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE clients SET \
               name = ?3, \
               name_normalized = ?4, \
               kind = ?5, \
               email = ?6, \
               phone = ?7, \
               address = ?8, \
               vat_number = ?9, \
               vat_exempt = ?10, \
               notes = ?11, \
               updated_at = ?12 \
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.to_string(),
                client_id.to_string(),
                merged_name,
                normalized_name.as_str(),
                merged_kind.as_str(),
                opt_text_owned(merged_email),
                opt_text_owned(merged_phone),
                opt_text_owned(merged_address),
                opt_text_owned(merged_vat_number),
                i64::from(merged_vat_exempt),
                opt_text_owned(merged_notes),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_client(tenant_id, client_id).await
    }

    async fn delete_client(&self, tenant_id: Uuid, client_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM clients WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), client_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait::async_trait]
impl MatterStore for LibSqlBackend {
    async fn create_matter(
        &self,
        tenant_id: Uuid,
        input: &CreateMatterParams,
    ) -> Result<MatterRecord, DatabaseError> {
        let reference = normalize_reference(&input.reference);
        if reference.is_empty() || input.title.trim().is_empty() {
            return Err(DatabaseError::Serialization(
                "matter reference and title cannot be empty".to_string(),
            ));
        }
        let today = Utc::now().date_naive();
        let opened_on = input.opened_on.unwrap_or(today);
        let closed_on = matches!(input.status, MatterStatus::Closed).then_some(today);

        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO matters ({MATTER_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.client_id.to_string(),
                reference.as_str(),
                input.title.trim(),
                input.status.as_str(),
                opt_decimal(input.hourly_rate),
                opt_decimal(input.vat_rate),
                opt_date(Some(opened_on)),
                opt_date(closed_on),
                opt_text(input.description.as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        self.get_matter(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created matter".to_string()))
    }

    async fn list_matters(
        &self,
        tenant_id: Uuid,
        filter: &MatterFilter,
    ) -> Result<Vec<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {MATTER_COLUMNS} FROM matters \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR client_id = ?2) \
                       AND (?3 IS NULL OR status = ?3) \
                     ORDER BY reference ASC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_text_owned(filter.client_id.map(|id| id.to_string())),
                    opt_text(filter.status.map(MatterStatus::as_str)),
                ],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_matter_record(&row)?);
        }
        Ok(out)
    }

    async fn get_matter(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {MATTER_COLUMNS} FROM matters WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"),
                params![tenant_id.to_string(), matter_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_matter_record(&row)).transpose()
    }

    async fn update_matter(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        input: &UpdateMatterParams,
    ) -> Result<Option<MatterRecord>, DatabaseError> {
        let Some(existing) = self.get_matter(tenant_id, matter_id).await? else {
            return Ok(None);
        };

        let title = input
            .title
            .as_deref()
            .unwrap_or(existing.title.as_str())
            .trim();
        if title.is_empty() {
            return Err(DatabaseError::Serialization(
                "matter title cannot be empty".to_string(),
            ));
        }
        let status = input.status.unwrap_or(existing.status);
        // Closing stamps today unless a date is given; reopening clears it.
        let closed_on = match (input.closed_on, status) {
            (Some(explicit), _) => explicit,
            (None, MatterStatus::Closed | MatterStatus::Archived) => existing
                .closed_on
                .or_else(|| Some(Utc::now().date_naive())),
            (None, MatterStatus::Open | MatterStatus::OnHold) => None,
        };

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE matters SET \
               client_id = ?3, \
               title = ?4, \
               status = ?5, \
               hourly_rate = ?6, \
               vat_rate = ?7, \
               opened_on = ?8, \
               closed_on = ?9, \
               description = ?10, \
               updated_at = ?11 \
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.to_string(),
                matter_id.to_string(),
                input.client_id.unwrap_or(existing.client_id).to_string(),
                title,
                status.as_str(),
                opt_decimal(input.hourly_rate.unwrap_or(existing.hourly_rate)),
                opt_decimal(input.vat_rate.unwrap_or(existing.vat_rate)),
                opt_date(input.opened_on.unwrap_or(existing.opened_on)),
                opt_date(closed_on),
                opt_text_owned(input.description.clone().unwrap_or(existing.description)),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_matter(tenant_id, matter_id).await
    }

    async fn delete_matter(&self, tenant_id: Uuid, matter_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM matters WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), matter_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait::async_trait]
impl AssignmentStore for LibSqlBackend {
    async fn upsert_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
        hourly_rate: Option<Decimal>,
    ) -> Result<AssignmentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO matter_assignments ({ASSIGNMENT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6) \
                 ON CONFLICT (matter_id, profile_id) DO UPDATE SET \
                   hourly_rate = excluded.hourly_rate, \
                   updated_at = excluded.updated_at"
            ),
            params![
                Uuid::new_v4().to_string(),
                tenant_id.to_string(),
                matter_id.to_string(),
                profile_id.to_string(),
                opt_decimal(hourly_rate),
                now.as_str(),
            ],
        )
        .await?;

        self.get_assignment(tenant_id, matter_id, profile_id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load upserted assignment".to_string()))
    }

    async fn get_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
    ) -> Result<Option<AssignmentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM matter_assignments \
                     WHERE tenant_id = ?1 AND matter_id = ?2 AND profile_id = ?3 LIMIT 1"
                ),
                params![
                    tenant_id.to_string(),
                    matter_id.to_string(),
                    profile_id.to_string()
                ],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_assignment_record(&row)).transpose()
    }

    async fn list_assignments(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
    ) -> Result<Vec<AssignmentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM matter_assignments \
                     WHERE tenant_id = ?1 AND matter_id = ?2 ORDER BY created_at ASC"
                ),
                params![tenant_id.to_string(), matter_id.to_string()],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_assignment_record(&row)?);
        }
        Ok(out)
    }

    async fn delete_assignment(
        &self,
        tenant_id: Uuid,
        matter_id: Uuid,
        profile_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM matter_assignments WHERE tenant_id = ?1 AND matter_id = ?2 AND profile_id = ?3",
                params![
                    tenant_id.to_string(),
                    matter_id.to_string(),
                    profile_id.to_string()
                ],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::super::test_support::{add_tenant, seed_tenant};
    use super::*;
    use crate::db::{CreateTimeEntryParams, TimesheetStore};

    fn client_params(name: &str) -> CreateClientParams {
        CreateClientParams {
            name: name.to_string(),
            kind: ClientKind::Individual,
            email: Some("client@example.com".to_string()),
            phone: None,
            address: None,
            vat_number: None,
            vat_exempt: false,
            notes: None,
        }
    }

    #[tokio::test]
    async fn client_names_are_unique_per_tenant_and_searchable() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        db.create_client(seed.tenant_id, &client_params("Jeanne Martin"))
            .await
            .expect("create");

        let err = db
            .create_client(seed.tenant_id, &client_params("  JEANNE   martin "))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let hits = db
            .list_clients(seed.tenant_id, Some("martin"))
            .await
            .expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].name, "Jeanne Martin");
        let all = db.list_clients(seed.tenant_id, None).await.expect("all");
        assert_eq!(all.len(), 2);

        // Same name in another tenant is fine.
        let (other_tenant, _, _, _) = add_tenant(db, "beta").await;
        db.create_client(other_tenant, &client_params("Jeanne Martin"))
            .await
            .expect("other tenant");
    }

    #[tokio::test]
    async fn update_client_merges_fields() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let updated = db
            .update_client(
                seed.tenant_id,
                seed.client_id,
                &UpdateClientParams {
                    vat_exempt: Some(true),
                    email: Some(Some("billing@acme.test".to_string())),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("client");
        assert!(updated.vat_exempt);
        assert_eq!(updated.email.as_deref(), Some("billing@acme.test"));
        assert_eq!(updated.name, "Acme Industries");

        let cleared = db
            .update_client(
                seed.tenant_id,
                seed.client_id,
                &UpdateClientParams {
                    email: Some(None),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("client");
        assert_eq!(cleared.email, None);
    }

    #[tokio::test]
    async fn client_with_matters_cannot_be_deleted() {
        let seed = seed_tenant().await;
        let err = seed
            .db
            .delete_client(seed.tenant_id, seed.client_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        assert!(
            seed.db
                .delete_matter(seed.tenant_id, seed.matter_id)
                .await
                .expect("delete matter")
        );
        assert!(
            seed.db
                .delete_client(seed.tenant_id, seed.client_id)
                .await
                .expect("delete client")
        );
    }

    #[tokio::test]
    async fn matter_references_are_normalized_and_unique() {
        let seed = seed_tenant().await;
        let params = CreateMatterParams {
            client_id: seed.client_id,
            reference: " lit-7 ".to_string(),
            title: "Lease".to_string(),
            status: MatterStatus::Open,
            hourly_rate: Some(dec!(240)),
            vat_rate: None,
            opened_on: None,
            description: None,
        };
        let matter = seed
            .db
            .create_matter(seed.tenant_id, &params)
            .await
            .expect("create");
        assert_eq!(matter.reference, "LIT-7");
        assert_eq!(matter.opened_on, Some(Utc::now().date_naive()));

        let err = seed
            .db
            .create_matter(
                seed.tenant_id,
                &CreateMatterParams {
                    reference: "LIT-7".to_string(),
                    ..params.clone()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        let open = seed
            .db
            .list_matters(
                seed.tenant_id,
                &MatterFilter {
                    status: Some(MatterStatus::Open),
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(open.len(), 2);
    }

    #[tokio::test]
    async fn closing_a_matter_stamps_closed_on() {
        let seed = seed_tenant().await;
        let closed = seed
            .db
            .update_matter(
                seed.tenant_id,
                seed.matter_id,
                &UpdateMatterParams {
                    status: Some(MatterStatus::Closed),
                    ..Default::default()
                },
            )
            .await
            .expect("close")
            .expect("matter");
        assert_eq!(closed.closed_on, Some(Utc::now().date_naive()));

        let reopened = seed
            .db
            .update_matter(
                seed.tenant_id,
                seed.matter_id,
                &UpdateMatterParams {
                    status: Some(MatterStatus::Open),
                    ..Default::default()
                },
            )
            .await
            .expect("reopen")
            .expect("matter");
        assert_eq!(reopened.closed_on, None);
    }

    #[tokio::test]
    async fn matter_cannot_reference_client_of_another_tenant() {
        let seed = seed_tenant().await;
        let (other_tenant, _, _, _) = add_tenant(seed.db.as_ref(), "beta").await;

        let err = seed
            .db
            .create_matter(
                other_tenant,
                &CreateMatterParams {
                    client_id: seed.client_id,
                    reference: "X-1".to_string(),
                    title: "Cross".to_string(),
                    status: MatterStatus::Open,
                    hourly_rate: None,
                    vat_rate: None,
                    opened_on: None,
                    description: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert!(
            seed.db
                .get_matter(other_tenant, seed.matter_id)
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn matter_with_time_cannot_be_deleted() {
        let seed = seed_tenant().await;
        seed.db
            .create_time_entry(
                seed.tenant_id,
                &CreateTimeEntryParams {
                    matter_id: seed.matter_id,
                    profile_id: seed.profile_id,
                    work_date: Utc::now().date_naive(),
                    minutes: 30,
                    billed_minutes: 30,
                    description: "call".to_string(),
                    billable: true,
                    hourly_rate: None,
                },
            )
            .await
            .expect("entry");
        let err = seed
            .db
            .delete_matter(seed.tenant_id, seed.matter_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn assignments_upsert_rate_and_require_membership() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        db.upsert_assignment(seed.tenant_id, seed.matter_id, seed.profile_id, None)
            .await
            .expect("assign");
        let updated = db
            .upsert_assignment(
                seed.tenant_id,
                seed.matter_id,
                seed.profile_id,
                Some(dec!(275)),
            )
            .await
            .expect("reassign");
        assert_eq!(updated.hourly_rate, Some(dec!(275)));
        assert_eq!(
            db.list_assignments(seed.tenant_id, seed.matter_id)
                .await
                .expect("list")
                .len(),
            1
        );

        let err = db
            .upsert_assignment(seed.tenant_id, seed.matter_id, Uuid::new_v4(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        assert!(
            db.delete_assignment(seed.tenant_id, seed.matter_id, seed.profile_id)
                .await
                .expect("delete")
        );
        assert!(
            db.get_assignment(seed.tenant_id, seed.matter_id, seed.profile_id)
                .await
                .expect("get")
                .is_none()
        );
    }
}
