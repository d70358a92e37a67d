use chrono::Utc;
use libsql::params;
use uuid::Uuid;

use crate::db::{
    CreateTimeEntryParams, TimeEntryFilter, TimeEntryRecord, TimesheetStore,
    UpdateTimeEntryParams,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_bool, get_date, get_i64, get_opt_decimal, get_opt_uuid,
    get_text, get_ts, get_uuid, opt_bool, opt_date, opt_decimal, opt_uuid,
};

const ENTRY_COLUMNS: &str = "id, tenant_id, matter_id, profile_id, work_date, minutes, \
     billed_minutes, description, billable, hourly_rate, invoice_id, created_at, updated_at";

fn row_to_time_entry_record(row: &libsql::Row) -> Result<TimeEntryRecord, DatabaseError> {
    Ok(TimeEntryRecord {
        id: get_uuid(row, 0, "time_entries.id")?,
        tenant_id: get_uuid(row, 1, "time_entries.tenant_id")?,
        matter_id: get_uuid(row, 2, "time_entries.matter_id")?,
        profile_id: get_uuid(row, 3, "time_entries.profile_id")?,
        work_date: get_date(row, 4, "time_entries.work_date")?,
        minutes: get_i64(row, 5),
        billed_minutes: get_i64(row, 6),
        description: get_text(row, 7),
        billable: get_bool(row, 8),
        hourly_rate: get_opt_decimal(row, 9, "time_entries.hourly_rate")?,
        invoice_id: get_opt_uuid(row, 10, "time_entries.invoice_id")?,
        created_at: get_ts(row, 11)?,
        updated_at: get_ts(row, 12)?,
    })
}

fn locked(entry: &TimeEntryRecord) -> DatabaseError {
    DatabaseError::Locked(format!(
        "time entry {} is on invoice {}",
        entry.id,
        entry
            .invoice_id
            .map(|id| id.to_string())
            .unwrap_or_default()
    ))
}

#[async_trait::async_trait]
impl TimesheetStore for LibSqlBackend {
    async fn create_time_entry(
        &self,
        tenant_id: Uuid,
        input: &CreateTimeEntryParams,
    ) -> Result<TimeEntryRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO time_entries ({ENTRY_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?11)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.matter_id.to_string(),
                input.profile_id.to_string(),
                fmt_date(input.work_date),
                input.minutes,
                input.billed_minutes,
                input.description.trim(),
                i64::from(input.billable),
                opt_decimal(input.hourly_rate),
                now.as_str(),
            ],
        )
        .await?;

        self.get_time_entry(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created time entry".to_string()))
    }

    async fn get_time_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<TimeEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM time_entries WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), entry_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_time_entry_record(&row)).transpose()
    }

    async fn list_time_entries(
        &self,
        tenant_id: Uuid,
        filter: &TimeEntryFilter,
    ) -> Result<Vec<TimeEntryRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {ENTRY_COLUMNS} FROM time_entries \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR matter_id = ?2) \
                       AND (?3 IS NULL OR profile_id = ?3) \
                       AND (?4 IS NULL OR work_date >= ?4) \
                       AND (?5 IS NULL OR work_date <= ?5) \
                       AND (?6 IS NULL \
                            OR (?6 = 1 AND invoice_id IS NOT NULL) \
                            OR (?6 = 0 AND invoice_id IS NULL)) \
                     ORDER BY work_date ASC, created_at ASC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_uuid(filter.matter_id),
                    opt_uuid(filter.profile_id),
                    opt_date(filter.from),
                    opt_date(filter.to),
                    opt_bool(filter.billed),
                ],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_time_entry_record(&row)?);
        }
        Ok(out)
    }

    async fn update_time_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
        input: &UpdateTimeEntryParams,
    ) -> Result<Option<TimeEntryRecord>, DatabaseError> {
        let Some(existing) = self.get_time_entry(tenant_id, entry_id).await? else {
            return Ok(None);
        };
        if existing.invoice_id.is_some() {
            return Err(locked(&existing));
        }

        let (minutes, billed_minutes) = input
            .minutes
            .unwrap_or((existing.minutes, existing.billed_minutes));
        let description = input
            .description
            .as_deref()
            .unwrap_or(existing.description.as_str())
            .trim();

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE time_entries SET \
                   matter_id = ?3, \
                   work_date = ?4, \
                   minutes = ?5, \
                   billed_minutes = ?6, \
                   description = ?7, \
                   billable = ?8, \
                   hourly_rate = ?9, \
                   updated_at = ?10 \
                 WHERE tenant_id = ?1 AND id = ?2 AND invoice_id IS NULL",
                params![
                    tenant_id.to_string(),
                    entry_id.to_string(),
                    input.matter_id.unwrap_or(existing.matter_id).to_string(),
                    fmt_date(input.work_date.unwrap_or(existing.work_date)),
                    minutes,
                    billed_minutes,
                    description,
                    i64::from(input.billable.unwrap_or(existing.billable)),
                    opt_decimal(input.hourly_rate.unwrap_or(existing.hourly_rate)),
                    fmt_ts(&Utc::now()),
                ],
            )
            .await?;
        if updated == 0 {
            // Reserved by a draft between the read and the write.
            return Err(DatabaseError::Locked(format!(
                "time entry {entry_id} is on an invoice"
            )));
        }

        self.get_time_entry(tenant_id, entry_id).await
    }

    async fn delete_time_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM time_entries WHERE tenant_id = ?1 AND id = ?2 AND invoice_id IS NULL",
                params![tenant_id.to_string(), entry_id.to_string()],
            )
            .await?;
        if deleted > 0 {
            return Ok(true);
        }
        match self.get_time_entry(tenant_id, entry_id).await? {
            Some(entry) => Err(locked(&entry)),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    use super::super::test_support::{add_tenant, seed_tenant};
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn params_for(matter_id: Uuid, profile_id: Uuid, day: &str) -> CreateTimeEntryParams {
        CreateTimeEntryParams {
            matter_id,
            profile_id,
            work_date: date(day),
            minutes: 40,
            billed_minutes: 42,
            description: " research ".to_string(),
            billable: true,
            hourly_rate: None,
        }
    }

    #[tokio::test]
    async fn create_update_delete_entry() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let entry = db
            .create_time_entry(
                seed.tenant_id,
                &params_for(seed.matter_id, seed.profile_id, "2026-05-04"),
            )
            .await
            .expect("create");
        assert_eq!(entry.description, "research");
        assert_eq!(entry.billed_minutes, 42);
        assert_eq!(entry.invoice_id, None);

        let updated = db
            .update_time_entry(
                seed.tenant_id,
                entry.id,
                &UpdateTimeEntryParams {
                    minutes: Some((50, 54)),
                    hourly_rate: Some(Some(dec!(99.5))),
                    billable: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("entry");
        assert_eq!((updated.minutes, updated.billed_minutes), (50, 54));
        assert_eq!(updated.hourly_rate, Some(dec!(99.5)));
        assert!(!updated.billable);
        assert_eq!(updated.work_date, date("2026-05-04"));

        assert!(
            db.delete_time_entry(seed.tenant_id, entry.id)
                .await
                .expect("delete")
        );
        assert!(
            !db.delete_time_entry(seed.tenant_id, entry.id)
                .await
                .expect("delete again")
        );
    }

    #[tokio::test]
    async fn list_filters_by_range_and_profile() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        for day in ["2026-05-01", "2026-05-10", "2026-05-20"] {
            db.create_time_entry(
                seed.tenant_id,
                &params_for(seed.matter_id, seed.profile_id, day),
            )
            .await
            .expect("create");
        }

        let in_range = db
            .list_time_entries(
                seed.tenant_id,
                &TimeEntryFilter {
                    from: Some(date("2026-05-05")),
                    to: Some(date("2026-05-20")),
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(in_range.len(), 2);
        assert_eq!(in_range[0].work_date, date("2026-05-10"));

        let unbilled = db
            .list_time_entries(
                seed.tenant_id,
                &TimeEntryFilter {
                    billed: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("list unbilled");
        assert_eq!(unbilled.len(), 3);
        let billed = db
            .list_time_entries(
                seed.tenant_id,
                &TimeEntryFilter {
                    billed: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("list billed");
        assert!(billed.is_empty());

        let other = db
            .list_time_entries(
                seed.tenant_id,
                &TimeEntryFilter {
                    profile_id: Some(Uuid::new_v4()),
                    ..Default::default()
                },
            )
            .await
            .expect("list other");
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn entries_are_invisible_across_tenants() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let entry = db
            .create_time_entry(
                seed.tenant_id,
                &params_for(seed.matter_id, seed.profile_id, "2026-05-04"),
            )
            .await
            .expect("create");
        let (other_tenant, other_profile, _, other_matter) = add_tenant(db, "beta").await;

        assert!(
            db.get_time_entry(other_tenant, entry.id)
                .await
                .expect("get")
                .is_none()
        );
        assert!(
            !db.delete_time_entry(other_tenant, entry.id)
                .await
                .expect("delete")
        );
        assert!(
            db.list_time_entries(other_tenant, &TimeEntryFilter::default())
                .await
                .expect("list")
                .is_empty()
        );

        // A profile of tenant A cannot log time on tenant B's matter.
        let err = db
            .create_time_entry(
                other_tenant,
                &params_for(other_matter, seed.profile_id, "2026-05-04"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        db.create_time_entry(
            other_tenant,
            &params_for(other_matter, other_profile, "2026-05-04"),
        )
        .await
        .expect("own member can log time");
    }
}
