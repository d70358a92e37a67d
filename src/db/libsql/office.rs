use chrono::Utc;
use libsql::params;
use uuid::Uuid;

use crate::db::{
    CreateDocumentParams, CreateMessageParams, CreateTodoParams, DocumentFilter, DocumentRecord,
    DocumentStore, MessageRecord, MessageStore, TodoFilter, TodoRecord, TodoStore,
    UpdateTodoParams,
};
use crate::error::DatabaseError;

use super::{
    LibSqlBackend, fmt_ts, get_bool, get_i64, get_opt_date, get_opt_text, get_opt_ts,
    get_opt_uuid, get_text, get_ts, get_uuid, opt_bool, opt_date, opt_text, opt_text_owned,
    opt_uuid,
};

const TODO_COLUMNS: &str = "id, tenant_id, matter_id, assignee_id, created_by, title, notes, \
     due_on, done, completed_at, created_at, updated_at";

const MESSAGE_COLUMNS: &str =
    "id, tenant_id, sender_id, recipient_id, matter_id, subject, body, read_at, created_at";

const DOCUMENT_COLUMNS: &str = "id, tenant_id, matter_id, client_id, uploaded_by, file_name, \
     content_type, size_bytes, sha256, storage_key, created_at, updated_at";

fn row_to_todo_record(row: &libsql::Row) -> Result<TodoRecord, DatabaseError> {
    Ok(TodoRecord {
        id: get_uuid(row, 0, "todos.id")?,
        tenant_id: get_uuid(row, 1, "todos.tenant_id")?,
        matter_id: get_opt_uuid(row, 2, "todos.matter_id")?,
        assignee_id: get_opt_uuid(row, 3, "todos.assignee_id")?,
        created_by: get_uuid(row, 4, "todos.created_by")?,
        title: get_text(row, 5),
        notes: get_opt_text(row, 6),
        due_on: get_opt_date(row, 7, "todos.due_on")?,
        done: get_bool(row, 8),
        completed_at: get_opt_ts(row, 9)?,
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

fn row_to_message_record(row: &libsql::Row) -> Result<MessageRecord, DatabaseError> {
    Ok(MessageRecord {
        id: get_uuid(row, 0, "messages.id")?,
        tenant_id: get_uuid(row, 1, "messages.tenant_id")?,
        sender_id: get_uuid(row, 2, "messages.sender_id")?,
        recipient_id: get_uuid(row, 3, "messages.recipient_id")?,
        matter_id: get_opt_uuid(row, 4, "messages.matter_id")?,
        subject: get_text(row, 5),
        body: get_text(row, 6),
        read_at: get_opt_ts(row, 7)?,
        created_at: get_ts(row, 8)?,
    })
}

fn row_to_document_record(row: &libsql::Row) -> Result<DocumentRecord, DatabaseError> {
    Ok(DocumentRecord {
        id: get_uuid(row, 0, "documents.id")?,
        tenant_id: get_uuid(row, 1, "documents.tenant_id")?,
        matter_id: get_opt_uuid(row, 2, "documents.matter_id")?,
        client_id: get_opt_uuid(row, 3, "documents.client_id")?,
        uploaded_by: get_uuid(row, 4, "documents.uploaded_by")?,
        file_name: get_text(row, 5),
        content_type: get_text(row, 6),
        size_bytes: get_i64(row, 7),
        sha256: get_text(row, 8),
        storage_key: get_text(row, 9),
        created_at: get_ts(row, 10)?,
        updated_at: get_ts(row, 11)?,
    })
}

#[async_trait::async_trait]
impl TodoStore for LibSqlBackend {
    async fn create_todo(
        &self,
        tenant_id: Uuid,
        input: &CreateTodoParams,
    ) -> Result<TodoRecord, DatabaseError> {
        let title = input.title.trim();
        if title.is_empty() {
            return Err(DatabaseError::Serialization(
                "todo title must not be empty".to_string(),
            ));
        }
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO todos ({TODO_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, ?9, ?9)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                opt_uuid(input.matter_id),
                opt_uuid(input.assignee_id),
                input.created_by.to_string(),
                title,
                opt_text(input.notes.as_deref()),
                opt_date(input.due_on),
                now.as_str(),
            ],
        )
        .await?;

        self.get_todo(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created todo".to_string()))
    }

    async fn get_todo(
        &self,
        tenant_id: Uuid,
        todo_id: Uuid,
    ) -> Result<Option<TodoRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!("SELECT {TODO_COLUMNS} FROM todos WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"),
                params![tenant_id.to_string(), todo_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_todo_record(&row)).transpose()
    }

    async fn list_todos(
        &self,
        tenant_id: Uuid,
        filter: &TodoFilter,
    ) -> Result<Vec<TodoRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TODO_COLUMNS} FROM todos \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR assignee_id = ?2) \
                       AND (?3 IS NULL OR matter_id = ?3) \
                       AND (?4 IS NULL OR done = ?4) \
                     ORDER BY done ASC, due_on IS NULL, due_on ASC, created_at ASC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_uuid(filter.assignee_id),
                    opt_uuid(filter.matter_id),
                    opt_bool(filter.done),
                ],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_todo_record(&row)?);
        }
        Ok(out)
    }

    async fn update_todo(
        &self,
        tenant_id: Uuid,
        todo_id: Uuid,
        input: &UpdateTodoParams,
    ) -> Result<Option<TodoRecord>, DatabaseError> {
        let Some(existing) = self.get_todo(tenant_id, todo_id).await? else {
            return Ok(None);
        };

        let title = input
            .title
            .as_deref()
            .unwrap_or(existing.title.as_str())
            .trim();
        if title.is_empty() {
            return Err(DatabaseError::Serialization(
                "todo title must not be empty".to_string(),
            ));
        }

        let now = Utc::now();
        let done = input.done.unwrap_or(existing.done);
        let completed_at = match (existing.done, done) {
            (false, true) => Some(now),
            (_, false) => None,
            (true, true) => existing.completed_at,
        };

        let conn = self.connect().await?;
        conn.execute(
            "UPDATE todos SET \
               matter_id = ?3, \
               assignee_id = ?4, \
               title = ?5, \
               notes = ?6, \
               due_on = ?7, \
               done = ?8, \
               completed_at = ?9, \
               updated_at = ?10 \
             WHERE tenant_id = ?1 AND id = ?2",
            params![
                tenant_id.to_string(),
                todo_id.to_string(),
                opt_uuid(input.matter_id.unwrap_or(existing.matter_id)),
                opt_uuid(input.assignee_id.unwrap_or(existing.assignee_id)),
                title,
                opt_text_owned(input.notes.clone().unwrap_or(existing.notes)),
                opt_date(input.due_on.unwrap_or(existing.due_on)),
                i64::from(done),
                opt_text_owned(completed_at.map(|ts| fmt_ts(&ts))),
                fmt_ts(&now),
            ],
        )
        .await?;

        self.get_todo(tenant_id, todo_id).await
    }

    async fn delete_todo(&self, tenant_id: Uuid, todo_id: Uuid) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM todos WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), todo_id.to_string()],
            )
            .await?;
        Ok(deleted > 0)
    }
}

impl LibSqlBackend {
    async fn query_messages(
        &self,
        sql: &str,
        params: impl libsql::params::IntoParams,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn.query(sql, params).await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_message_record(&row)?);
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl MessageStore for LibSqlBackend {
    async fn create_message(
        &self,
        tenant_id: Uuid,
        input: &CreateMessageParams,
    ) -> Result<MessageRecord, DatabaseError> {
        if input.subject.trim().is_empty() && input.body.trim().is_empty() {
            return Err(DatabaseError::Serialization(
                "message needs a subject or a body".to_string(),
            ));
        }
        let conn = self.connect().await?;
        let id = Uuid::new_v4();
        conn.execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)"
            ),
            params![
                id.to_string(),
                tenant_id.to_string(),
                input.sender_id.to_string(),
                input.recipient_id.to_string(),
                opt_uuid(input.matter_id),
                input.subject.trim(),
                input.body.as_str(),
                fmt_ts(&Utc::now()),
            ],
        )
        .await?;

        self.get_message(tenant_id, id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created message".to_string()))
    }

    async fn get_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
    ) -> Result<Option<MessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {MESSAGE_COLUMNS} FROM messages WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), message_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_message_record(&row)).transpose()
    }

    async fn list_inbox(
        &self,
        tenant_id: Uuid,
        recipient_id: Uuid,
        unread_only: bool,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE tenant_id = ?1 AND recipient_id = ?2 AND (?3 = 0 OR read_at IS NULL) \
                 ORDER BY created_at DESC"
            ),
            params![
                tenant_id.to_string(),
                recipient_id.to_string(),
                i64::from(unread_only)
            ],
        )
        .await
    }

    async fn list_outbox(
        &self,
        tenant_id: Uuid,
        sender_id: Uuid,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        self.query_messages(
            &format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE tenant_id = ?1 AND sender_id = ?2 \
                 ORDER BY created_at DESC"
            ),
            params![tenant_id.to_string(), sender_id.to_string()],
        )
        .await
    }

    async fn mark_message_read(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        recipient_id: Uuid,
    ) -> Result<Option<MessageRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let updated = conn
            .execute(
                "UPDATE messages SET read_at = COALESCE(read_at, ?4) \
                 WHERE tenant_id = ?1 AND id = ?2 AND recipient_id = ?3",
                params![
                    tenant_id.to_string(),
                    message_id.to_string(),
                    recipient_id.to_string(),
                    fmt_ts(&Utc::now()),
                ],
            )
            .await?;
        if updated == 0 {
            return Ok(None);
        }
        self.get_message(tenant_id, message_id).await
    }

    async fn delete_message(
        &self,
        tenant_id: Uuid,
        message_id: Uuid,
        profile_id: Uuid,
    ) -> Result<bool, DatabaseError> {
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM messages \
                 WHERE tenant_id = ?1 AND id = ?2 AND (sender_id = ?3 OR recipient_id = ?3)",
                params![
                    tenant_id.to_string(),
                    message_id.to_string(),
                    profile_id.to_string()
                ],
            )
            .await?;
        Ok(deleted > 0)
    }
}

#[async_trait::async_trait]
impl DocumentStore for LibSqlBackend {
    async fn create_document(
        &self,
        tenant_id: Uuid,
        input: &CreateDocumentParams,
    ) -> Result<DocumentRecord, DatabaseError> {
        let conn = self.connect().await?;
        let now = fmt_ts(&Utc::now());
        conn.execute(
            &format!(
                "INSERT INTO documents ({DOCUMENT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)"
            ),
            params![
                input.id.to_string(),
                tenant_id.to_string(),
                opt_uuid(input.matter_id),
                opt_uuid(input.client_id),
                input.uploaded_by.to_string(),
                input.file_name.as_str(),
                input.content_type.as_str(),
                input.size_bytes,
                input.sha256.as_str(),
                input.storage_key.as_str(),
                now.as_str(),
            ],
        )
        .await?;

        self.get_document(tenant_id, input.id)
            .await?
            .ok_or_else(|| DatabaseError::Query("failed to load created document".to_string()))
    }

    async fn get_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let row = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE tenant_id = ?1 AND id = ?2 LIMIT 1"
                ),
                params![tenant_id.to_string(), document_id.to_string()],
            )
            .await?
            .next()
            .await?;
        row.map(|row| row_to_document_record(&row)).transpose()
    }

    async fn list_documents(
        &self,
        tenant_id: Uuid,
        filter: &DocumentFilter,
    ) -> Result<Vec<DocumentRecord>, DatabaseError> {
        let conn = self.connect().await?;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents \
                     WHERE tenant_id = ?1 \
                       AND (?2 IS NULL OR matter_id = ?2) \
                       AND (?3 IS NULL OR client_id = ?3) \
                     ORDER BY created_at DESC"
                ),
                params![
                    tenant_id.to_string(),
                    opt_uuid(filter.matter_id),
                    opt_uuid(filter.client_id),
                ],
            )
            .await?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_document_record(&row)?);
        }
        Ok(out)
    }

    async fn delete_document(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, DatabaseError> {
        let Some(existing) = self.get_document(tenant_id, document_id).await? else {
            return Ok(None);
        };
        let conn = self.connect().await?;
        let deleted = conn
            .execute(
                "DELETE FROM documents WHERE tenant_id = ?1 AND id = ?2",
                params![tenant_id.to_string(), document_id.to_string()],
            )
            .await?;
        Ok((deleted > 0).then_some(existing))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{add_tenant, seed_tenant};
    use super::*;
    use crate::db::{
        CreateProfileParams, MatterStore, MembershipStore, ProfileStore, Role,
        UpsertMembershipParams,
    };

    async fn second_member(seed: &super::super::test_support::Seed) -> Uuid {
        let profile = seed
            .db
            .create_profile(&CreateProfileParams {
                email: "lawyer@alpha.test".to_string(),
                display_name: "Lawyer".to_string(),
            })
            .await
            .expect("profile");
        seed.db
            .upsert_membership(
                seed.tenant_id,
                profile.id,
                &UpsertMembershipParams {
                    role: Role::Lawyer,
                    hourly_rate: None,
                    active: true,
                },
            )
            .await
            .expect("membership");
        profile.id
    }

    #[tokio::test]
    async fn completing_a_todo_stamps_and_clears_completion() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let todo = db
            .create_todo(
                seed.tenant_id,
                &CreateTodoParams {
                    matter_id: Some(seed.matter_id),
                    assignee_id: Some(seed.profile_id),
                    created_by: seed.profile_id,
                    title: "  File statement of claim ".to_string(),
                    notes: None,
                    due_on: None,
                },
            )
            .await
            .expect("create");
        assert_eq!(todo.title, "File statement of claim");
        assert!(!todo.done);

        let done = db
            .update_todo(
                seed.tenant_id,
                todo.id,
                &UpdateTodoParams {
                    done: Some(true),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("todo");
        assert!(done.done);
        assert!(done.completed_at.is_some());

        let open = db
            .list_todos(
                seed.tenant_id,
                &TodoFilter {
                    done: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("list");
        assert!(open.is_empty());

        let reopened = db
            .update_todo(
                seed.tenant_id,
                todo.id,
                &UpdateTodoParams {
                    done: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("todo");
        assert!(reopened.completed_at.is_none());

        let err = db
            .delete_matter(seed.tenant_id, seed.matter_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn only_the_recipient_marks_read() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let lawyer = second_member(&seed).await;
        let message = db
            .create_message(
                seed.tenant_id,
                &CreateMessageParams {
                    sender_id: seed.profile_id,
                    recipient_id: lawyer,
                    matter_id: None,
                    subject: "Hearing moved".to_string(),
                    body: "Now on Thursday.".to_string(),
                },
            )
            .await
            .expect("message");

        assert!(
            db.mark_message_read(seed.tenant_id, message.id, seed.profile_id)
                .await
                .expect("mark")
                .is_none()
        );
        assert_eq!(
            db.list_inbox(seed.tenant_id, lawyer, true)
                .await
                .expect("inbox")
                .len(),
            1
        );
        let read = db
            .mark_message_read(seed.tenant_id, message.id, lawyer)
            .await
            .expect("mark")
            .expect("message");
        assert!(read.read_at.is_some());
        assert!(
            db.list_inbox(seed.tenant_id, lawyer, true)
                .await
                .expect("inbox")
                .is_empty()
        );
        assert_eq!(
            db.list_outbox(seed.tenant_id, seed.profile_id)
                .await
                .expect("outbox")
                .len(),
            1
        );
        assert!(
            db.delete_message(seed.tenant_id, message.id, lawyer)
                .await
                .expect("delete")
        );
    }

    #[tokio::test]
    async fn messages_cannot_target_other_tenants_members() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let (_, outsider, _, _) = add_tenant(db, "beta").await;
        let err = db
            .create_message(
                seed.tenant_id,
                &CreateMessageParams {
                    sender_id: seed.profile_id,
                    recipient_id: outsider,
                    matter_id: None,
                    subject: "hello".to_string(),
                    body: String::new(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn document_rows_are_tenant_scoped() {
        let seed = seed_tenant().await;
        let db = seed.db.as_ref();
        let id = Uuid::new_v4();
        let doc = db
            .create_document(
                seed.tenant_id,
                &CreateDocumentParams {
                    id,
                    matter_id: Some(seed.matter_id),
                    client_id: None,
                    uploaded_by: seed.profile_id,
                    file_name: "brief.pdf".to_string(),
                    content_type: "application/pdf".to_string(),
                    size_bytes: 42,
                    sha256: "ab".repeat(32),
                    storage_key: format!("{}/{id}", seed.tenant_id),
                },
            )
            .await
            .expect("document");
        assert_eq!(doc.id, id);

        let listed = db
            .list_documents(
                seed.tenant_id,
                &DocumentFilter {
                    matter_id: Some(seed.matter_id),
                    client_id: None,
                },
            )
            .await
            .expect("list");
        assert_eq!(listed.len(), 1);

        let (other, _, _, _) = add_tenant(db, "beta").await;
        assert!(db.get_document(other, id).await.expect("get").is_none());
        assert!(db.delete_document(other, id).await.expect("delete").is_none());

        let removed = db
            .delete_document(seed.tenant_id, id)
            .await
            .expect("delete")
            .expect("record");
        assert_eq!(removed.file_name, "brief.pdf");
    }
}
