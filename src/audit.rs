//! Append-only JSONL audit trail for money-moving and membership events.
//!
//! Each line carries a sequence number and, when hash chaining is on, the
//! SHA-256 of the line itself (computed with `hash` unset) plus the hash of
//! the previous line. The logger resumes from the last line of an existing
//! file, so the chain spans restarts; [`verify`] recomputes it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
#[cfg(unix)]
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AuditConfig;
use crate::error::AuditError;

/// One line of the audit file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub seq: u64,
    pub ts: String,
    pub event_type: String,
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl AuditEntry {
    fn digest(&self) -> Result<String, serde_json::Error> {
        let unsealed = serde_json::to_vec(&AuditEntry {
            hash: None,
            ..self.clone()
        })?;
        Ok(format!("{:x}", Sha256::digest(unsealed)))
    }
}

/// Position of the last appended entry.
#[derive(Debug, Default, Clone, PartialEq)]
struct Tail {
    seq: u64,
    hash: Option<String>,
}

impl Tail {
    /// Read the tail of an existing file; a missing or empty file starts fresh.
    /// An unreadable last line is an error, never a fresh start.
    fn load(path: &Path) -> Result<Tail, AuditError> {
        let read_err = |e: io::Error| AuditError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        };
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Tail::default()),
            Err(e) => return Err(read_err(e)),
        };

        let mut last = None;
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(read_err)?;
            if !line.trim().is_empty() {
                last = Some((idx + 1, line));
            }
        }
        let Some((line_no, line)) = last else {
            return Ok(Tail::default());
        };
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
                line: line_no,
                reason: e.to_string(),
            })?;
        Ok(Tail {
            seq: entry.seq,
            hash: entry.hash,
        })
    }
}

struct AuditLogger {
    path: PathBuf,
    hash_chain: bool,
    tail: Mutex<Tail>,
}

/// Open for append. New files get mode 0600; an existing file with any other
/// mode is refused.
fn open_append(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let mut opts = OpenOptions::new();
    opts.create(true).append(true);
    #[cfg(unix)]
    opts.mode(0o600);
    let file = opts.open(path)?;
    #[cfg(unix)]
    {
        let mode = file.metadata()?.permissions().mode() & 0o777;
        if mode != 0o600 {
            return Err(io::Error::other(format!(
                "insecure mode {mode:o} (expected 600)"
            )));
        }
    }
    Ok(file)
}

impl AuditLogger {
    fn open(path: PathBuf, hash_chain: bool) -> Result<Self, AuditError> {
        let tail = Tail::load(&path)?;
        Ok(Self {
            path,
            hash_chain,
            tail: Mutex::new(tail),
        })
    }

    fn write(&self, event_type: &str, details: serde_json::Value) {
        // Held through the append so sequence and chain match file order.
        let Ok(mut tail) = self.tail.lock() else {
            tracing::warn!("Audit state lock poisoned; dropping '{}'", event_type);
            return;
        };

        let mut entry = AuditEntry {
            seq: tail.seq + 1,
            ts: Utc::now().to_rfc3339(),
            event_type: event_type.to_string(),
            details,
            prev_hash: None,
            hash: None,
        };
        if self.hash_chain {
            entry.prev_hash = tail.hash.clone();
            match entry.digest() {
                Ok(hash) => entry.hash = Some(hash),
                Err(e) => {
                    tracing::warn!("Failed to hash audit event '{}': {}", event_type, e);
                    return;
                }
            }
        }

        let line = match serde_json::to_string(&entry) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Failed to serialize audit event '{}': {}", event_type, e);
                return;
            }
        };
        let appended = open_append(&self.path).and_then(|mut f| writeln!(f, "{line}"));
        match appended {
            Ok(()) => {
                tail.seq = entry.seq;
                if entry.hash.is_some() {
                    tail.hash = entry.hash;
                }
            }
            Err(e) => tracing::warn!(
                "Audit event '{}' not written to {:?}: {}",
                event_type,
                self.path,
                e
            ),
        }
    }
}

static LOGGER: OnceLock<AuditLogger> = OnceLock::new();

/// Install the process-wide audit logger. No-op when disabled.
///
/// Fails when the existing file cannot be resumed; the caller should refuse
/// to start rather than write events outside the chain.
pub fn init(config: &AuditConfig) -> Result<(), AuditError> {
    if !config.enabled {
        return Ok(());
    }
    let logger = AuditLogger::open(config.path.clone(), config.hash_chain)?;
    let resumed_at = logger.tail.lock().map(|t| t.seq).unwrap_or_default();
    if LOGGER.set(logger).is_ok() {
        tracing::info!(
            path = %config.path.display(),
            hash_chain = config.hash_chain,
            resumed_at,
            "Audit log enabled"
        );
    }
    Ok(())
}

/// Append an audit event.
pub fn record(event_type: &str, details: serde_json::Value) {
    #[cfg(test)]
    captured::push(event_type, &details);
    if let Some(logger) = LOGGER.get() {
        logger.write(event_type, details);
    }
}

/// Outcome of a successful [`verify`] pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainReport {
    pub events: usize,
    pub hashed: usize,
}

/// Re-read an audit file and check sequence numbers and hash links.
pub fn verify(path: &Path) -> Result<ChainReport, AuditError> {
    let read_err = |e: io::Error| AuditError::Read {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let reader = BufReader::new(File::open(path).map_err(read_err)?);

    let mut report = ChainReport {
        events: 0,
        hashed: 0,
    };
    let mut prev = Tail::default();
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.map_err(read_err)?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry = serde_json::from_str(&line).map_err(|e| AuditError::Malformed {
            line: line_no,
            reason: e.to_string(),
        })?;
        let broken = |reason: String| AuditError::Broken {
            line: line_no,
            reason,
        };

        if entry.seq != prev.seq + 1 {
            return Err(broken(format!(
                "expected seq {}, found {}",
                prev.seq + 1,
                entry.seq
            )));
        }
        if let Some(hash) = &entry.hash {
            if entry.prev_hash != prev.hash {
                return Err(broken("prev_hash does not match the previous entry".to_string()));
            }
            let expected = entry.digest().map_err(|e| broken(e.to_string()))?;
            if &expected != hash {
                return Err(broken("content does not match its hash".to_string()));
            }
            report.hashed += 1;
        }
        report.events += 1;
        prev = Tail {
            seq: entry.seq,
            hash: entry.hash.or(prev.hash),
        };
    }
    Ok(report)
}

/// In-memory copy of every recorded event, for assertions in unit tests.
#[cfg(test)]
pub(crate) mod captured {
    use std::sync::{Mutex, OnceLock};

    #[derive(Debug, Clone)]
    pub(crate) struct Event {
        pub event_type: String,
        pub details: serde_json::Value,
    }

    static EVENTS: OnceLock<Mutex<Vec<Event>>> = OnceLock::new();

    pub(super) fn push(event_type: &str, details: &serde_json::Value) {
        let events = EVENTS.get_or_init(|| Mutex::new(Vec::new()));
        if let Ok(mut lock) = events.lock() {
            lock.push(Event {
                event_type: event_type.to_string(),
                details: details.clone(),
            });
        }
    }

    /// Tests run in parallel: filter on data unique to the test.
    pub(crate) fn snapshot() -> Vec<Event> {
        EVENTS
            .get()
            .and_then(|events| events.lock().ok().map(|lock| lock.clone()))
            .unwrap_or_default()
    }
}
