use chrono::{NaiveDate, Utc};
use libsql::params;
use uuid::Uuid;

use crate::db::{
    CreateExpenseParams, CreatePurchaseParams, ExpenseFilter, ExpenseRecord, ExpenseStore,
    PurchaseRecord, UpdateExpenseParams,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_date, fmt_ts, get_bool, get_date, get_decimal, get_opt_text, get_opt_uuid,
    get_text, get_ts, get_uuid, opt_bool, opt_date, opt_text, opt_uuid,
};

const EXPENSE_COLUMNS: &str = "id, tenant_id, matter_id, profile_id, incurred_on, description, \
     amount, vat_rate, billable, invoice_id, created_at, updated_at";

const PURCHASE_COLUMNS: &str = "id, tenant_id, supplier, description, purchased_on, net_amount, \
     vat_rate, vat_amount, category, created_at, updated_at";

fn row_to_expense_record(row: &libsql::Row) -> Result<ExpenseRecord, DatabaseError> {
    Ok(ExpenseRecord {
        id: get_uuid(row, 0, "expenses.id")?,
        tenant_id: get_uuid(row, 1, "expenses.tenant_id")?,
        matter_id: get_uuid(row, 2, "expenses.matter_id")?,
        profile_id: get_uuid(row, 3, "expenses.profile_id")?,
        incurred_on: get_date(row, 4, "expenses.incurred_on")?,
        description: get_text(row, 5),
        amount: get_decimal(row, 6, "expenses.amount")?,
        vat_rate: get_decimal(row, 7, "expenses.vat_rate")?,
        billable: get_bool(row, 8),
        invoice_id: get_opt_uuid(row, 9, "expenses.invoice_id")?,
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

fn row_to_purchase_record(row: &libsql::Row) -> Result<PurchaseRecord, DatabaseError> {
    Ok(PurchaseRecord {
        id: get_uuid(row, 0, "purchases.id")?,
        tenant_id: get_uuid(row, 1, "purchases.tenant_id")?,
        supplier: get_text(row, 2),
        description: get_text(row, 3),
        purchased_on: get_date(row, 4, "purchases.purchased_on")?,
        net_amount: get_decimal(row, 5, "purchases.net_amount")?,
        vat_rate: get_decimal(row, 6, "purchases.vat_rate")?,
        vat_amount: get_decimal(row, 7, "purchases.vat_amount")?,
        category: get_opt_text(row, 8),
        created_at: get_ts(row, 9)?,
        updated_at: get_ts(row, 10)?,
    })
}

fn locked(expense_id: Uuid) -> DatabaseError {
    DatabaseError::Locked(format!("expense {expense_id} is on an invoice"))
}

#[async_trait::async_trait]
impl ExpenseStore for LibSqlBackend {
    async fn create_expense(
        &self,
        tenant_id: Uuid,
        input: &CreateExpenseParams,
    ) -> Result<ExpenseRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO expenses ({EXPENSE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL, ?10, ?10)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.matter_id.to_string(),
                input.profile_id.to_string(),
                fmt_date(input.incurred_on),
                input.description.trim(),
                input.amount.to_string(),
                input.vat_rate.to_string(),
                i64::from(input.billable),
                now.as_str(),
            ],
        )
        .await?;

        self.get_expense(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created expense".to_string()))
    }

    async fn get_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<Option<ExpenseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), expense_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_expense_record(&row)).transpose()
    }

    async fn list_expenses(
        &self,
        tenant_id: Uuid,
        filter: &ExpenseFilter,
    ) -> Result<Vec<ExpenseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {EXPENSE_COLUMNS} FROM expenses \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR matter_id = ?2) \
                       AND (?3 IS NULL OR profile_id = ?3) \
                       AND (?4 IS NULL OR incurred_on >= ?4) \
                       AND (?5 IS NULL OR incurred_on <= ?5) \
                       AND (?6 IS NULL \
                            OR (?6 = 1 AND invoice_id IS NOT NULL) \
                            OR (?6 = 0 AND invoice_id IS NULL)) \
                     ORDER BY incurred_on ASC, created_at ASC"
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
            out.push(row_to_expense_record(&row)?);
        }
        Ok(out)
    }

    async fn update_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
        input: &UpdateExpenseParams,
    ) -> Result<Option<ExpenseRecord>, DatabaseError> {
        let Some(existing) = self.get_expense(tenant_id, expense_id).await? else {
            return Ok(None);
        };
        if existing.invoice_id.is_some() {
            return Err(locked(expense_id));
        }

        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE expenses SET \
                   incurred_on = ?3, \
                   description = ?4, \
                   amount = ?5, \
                   vat_rate = ?6, \
                   billable = ?7, \
                   updated_at = ?8 \
                 WHERE tenant_id = ?1 AND id = ?2 AND invoice_id IS NULL",
                params![
                    tenant_id.to_string(),
                    expense_id.to_string(),
                    fmt_date(input.incurred_on.unwrap_or(existing.incurred_on)),
                    input
                        .description
                        .as_deref()
                        .unwrap_or(existing.description.as_str())
                        .trim(),
                    input.amount.unwrap_or(existing.amount).to_string(),
                    input.vat_rate.unwrap_or(existing.vat_rate).to_string(),
                    i64::from(input.billable.unwrap_or(existing.billable)),
                    fmt_ts(&Utc::now()),
                ],
            )
            .await?;
        if updated == 0 {
            return Err(locked(expense_id));
        }

        self.get_expense(tenant_id, expense_id).await
    }

    async fn delete_expense(
        &self,
        tenant_id: Uuid,
        expense_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM expenses WHERE tenant_id = ?1 AND id = ?2 AND invoice_id IS NULL",
                params![tenant_id.to_string(), expense_id.to_string()],
            )
            .await?;
        if deleted > 0 {
            return Ok(true);
        }
        match self.get_expense(tenant_id, expense_id).await? {
            Some(_) => Err(locked(expense_id)),
            None => Ok(false),
        }
    }

    async fn create_purchase(
        &self,
        tenant_id: Uuid,
        input: &CreatePurchaseParams,
    ) -> Result<PurchaseRecord, DatabaseError> {
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO purchases ({PURCHASE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.supplier.trim(),
                input.description.trim(),
                fmt_date(input.purchased_on),
                input.net_amount.to_string(),
                input.vat_rate.to_string(),
                input.vat_amount.to_string(),
                opt_text(input.category.as_deref()),
                now.as_str(),
            ],
        )
        .await?;

        let row = conn
            .query(
                &format!("SELECT {PURCHASE_COLUMNS} FROM purchases WHERE id = ?1 LIMIT 1"),
                params![id.to_string()],
            )
            .await?
            .next()
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created purchase".to_string()))?;
        row_to_purchase_record(&row)
    }

    async fn list_purchases(
        &self,
        tenant_id: Uuid,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<PurchaseRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {PURCHASE_COLUMNS} FROM purchases \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR purchased_on >= ?2) \
                       AND (?3 IS NULL OR purchased_on <= ?3) \
                     ORDER BY purchased_on ASC, created_at ASC"
                ),
                params![tenant_id.to_string(), opt_date(from), opt_date(to)],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_purchase_record(&row)?);
        }
        Ok(out)
    }

    async fn delete_purchase(
        &self,
        tenant_id: Uuid,
        purchase_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM purchases WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), purchase_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::super::test_support::seed_tenant;
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    #[tokio::test]
    async fn expenses_round_trip_amounts_and_filters() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let expense = db
            .create_expense(
                seed.tenant_id,
                &CreateExpenseParams {
                    matter_id: seed.matter_id,
                    profile_id: seed.profile_id,
                    incurred_on: date("2026-06-01"),
                    description: "Train ticket".to_string(),
                    amount: dec!(87.40),
                    vat_rate: dec!(10),
                    billable: true,
                },
            )
            .await
            .expect("create");
        assert_eq!(expense.amount, dec!(87.40));

        let updated = db
            .update_expense(
                seed.tenant_id,
                expense.id,
                &UpdateExpenseParams {
                    amount: Some(dec!(91.10)),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("expense");
        assert_eq!(updated.amount, dec!(91.10));
        assert_eq!(updated.vat_rate, dec!(10));

        let june = db
            .list_expenses(
                seed.tenant_id,
                &ExpenseFilter {
                    from: Some(date("2026-06-01")),
                    to: Some(date("2026-06-30")),
                    billed: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert_eq!(june.len(), 1);

        assert!(
            db.delete_expense(seed.tenant_id, expense.id)
                .await
                .expect("delete")
        );
    }

    #[tokio::test]
    async fn purchases_list_by_period() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        for (day, amount) in [("2026-01-15", dec!(120)), ("2026-02-15", dec!(45.5))] {
            db.create_purchase(
                seed.tenant_id,
                &CreatePurchaseParams {
                    supplier: "Office Depot".to_string(),
                    description: "Paper".to_string(),
                    purchased_on: date(day),
                    net_amount: amount,
                    vat_rate: dec!(20),
                    vat_amount: amount * dec!(0.2),
                    category: Some("supplies".to_string()),
                },
            )
            .await
            .expect("purchase");
        }

        let february = db
            .list_purchases(seed.tenant_id, Some(date("2026-02-01")), None)
            .await
            .expect("list");
        assert_eq!(february.len(), 1);
        assert_eq!(february[0].net_amount, dec!(45.5));
        assert_eq!(february[0].category.as_deref(), Some("supplies"));

        assert!(
            db.delete_purchase(seed.tenant_id, february[0].id)
                .await
                .expect("delete")
        );
        assert_eq!(
            db.list_purchases(seed.tenant_id, None, None)
                .await
                .expect("list all")
                .len(),
            1
        );
    }
}
