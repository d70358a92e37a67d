//! Filesystem storage for uploaded documents.
//!
//! Files live at `<root>/<tenant_id>/<document_id>`; the original file name,
//! content type, size and SHA-256 are kept in the `documents` table.

use std::path::{Component, Path, PathBuf};

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::StorageConfig;
use crate::db::{CreateDocumentParams, Database, DocumentRecord};
use crate::error::StorageError;

const MAX_FILE_NAME_LEN: usize = 200;

/// One uploaded file and what it is attached to.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub uploaded_by: Uuid,
    pub matter_id: Option<Uuid>,
    pub client_id: Option<Uuid>,
    pub file_name: &'a str,
    pub content_type: Option<&'a str>,
    pub data: &'a [u8],
}

#[derive(Debug, Clone)]
pub struct DocumentStorage {
    root: PathBuf,
    max_upload_bytes: usize,
}

/// Keep the basename and a conservative character set.
pub fn sanitize_file_name(raw: &str) -> Result<String, StorageError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')'))
        .collect();
    let cleaned = cleaned.trim().trim_start_matches('.').trim();
    if cleaned.is_empty() {
        return Err(StorageError::InvalidName(raw.to_string()));
    }
    Ok(cleaned.chars().take(MAX_FILE_NAME_LEN).collect())
}

fn content_type_for(file_name: &str, declared: Option<&str>) -> String {
    match declared.map(str::trim) {
        Some(ct) if !ct.is_empty() && ct != "application/octet-stream" => ct.to_string(),
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn io_error(path: &Path, err: std::io::Error) -> StorageError {
    StorageError::Io {
        path: path.to_path_buf(),
        reason: err.to_string(),
    }
}

impl DocumentStorage {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: usize) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.root.clone(), config.max_upload_bytes)
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    fn path_for(&self, storage_key: &str) -> Result<PathBuf, StorageError> {
        let key = Path::new(storage_key);
        if key
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidName(storage_key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Write the file, then record it. The file is removed again if the row
    /// cannot be inserted.
    pub async fn save(
        &self,
        db: &dyn Database,
        tenant_id: Uuid,
        upload: Upload<'_>,
    ) -> Result<DocumentRecord, StorageError> {
        if upload.data.len() > self.max_upload_bytes {
            return Err(StorageError::TooLarge {
                size: upload.data.len(),
                limit: self.max_upload_bytes,
            });
        }
        let file_name = sanitize_file_name(upload.file_name)?;
        let id = Uuid::new_v4();
        let storage_key = format!("{tenant_id}/{id}");
        let path = self.path_for(&storage_key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_error(parent, e))?;
        }
        tokio::fs::write(&path, upload.data)
            .await
            .map_err(|e| io_error(&path, e))?;

        let params = CreateDocumentParams {
            id,
            matter_id: upload.matter_id,
            client_id: upload.client_id,
            uploaded_by: upload.uploaded_by,
            content_type: content_type_for(&file_name, upload.content_type),
            file_name,
            size_bytes: upload.data.len() as i64,
            sha256: sha256_hex(upload.data),
            storage_key,
        };
        match db.create_document(tenant_id, &params).await {
            Ok(record) => {
                tracing::info!(
                    %tenant_id,
                    document_id = %record.id,
                    size = record.size_bytes,
                    "Stored document"
                );
                Ok(record)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&path).await {
                    tracing::warn!("Failed to remove orphaned upload {:?}: {}", path, rm);
                }
                Err(e.into())
            }
        }
    }

    pub async fn read(&self, record: &DocumentRecord) -> Result<Vec<u8>, StorageError> {
        let path = self.path_for(&record.storage_key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::Missing(path)),
            Err(e) => Err(io_error(&path, e)),
        }
    }

    /// Delete the row and then the file. A file that is already gone is
    /// only logged.
    pub async fn delete(
        &self,
        db: &dyn Database,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> Result<Option<DocumentRecord>, StorageError> {
        let Some(record) = db.delete_document(tenant_id, document_id).await? else {
            return Ok(None);
        };
        let path = self.path_for(&record.storage_key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(%document_id, "Stored file already missing at {:?}", path);
            }
            Err(e) => return Err(io_error(&path, e)),
        }
        Ok(Some(record))
    }
}
