//! Newline-delimited JSON evidence log.
//!
//! Layout: one `EvidenceRecord` per line, appended with `O_APPEND`. Lines are
//! never rewritten; reads scan the file. Suitable for a single daemon
//! instance that wants a durable audit trail without a database.
//!
//! A crash mid-append can leave an unterminated final line. `open` cuts it
//! off; any other unparsable line is an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage_traits::*;

struct Writer {
    file: File,
    next_seq: u64,
    /// Bytes of complete records on disk
    len: u64,
}

/// File-backed append-only evidence store.
pub struct JsonlEvidenceStore {
    path: PathBuf,
    writer: Mutex<Writer>,
}

impl JsonlEvidenceStore {
    /// Open (or create) the log at `path`, resuming the sequence counter
    /// from the records already present.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let scan = scan_log(&path).await?;
        if let Some(torn_bytes) = scan.torn_bytes {
            warn!(
                path = %path.display(),
                torn_bytes,
                keep = scan.valid_len,
                "dropping unterminated record at end of evidence log"
            );
            let file = OpenOptions::new().write(true).open(&path).await?;
            file.set_len(scan.valid_len).await?;
            file.sync_all().await?;
        }
        let next_seq = scan.records.last().map(|r| r.seq + 1).unwrap_or(1);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let mut len = scan.valid_len;
        if scan.unterminated {
            file.write_all(b"\n").await?;
            file.flush().await?;
            len += 1;
        }
        debug!(path = %path.display(), next_seq, "opened evidence log");
        Ok(Self {
            path,
            writer: Mutex::new(Writer {
                file,
                next_seq,
                len,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
struct LogScan {
    records: Vec<EvidenceRecord>,
    /// Bytes up to and including the last good record
    valid_len: u64,
    /// Size of an unparsable, unterminated tail
    torn_bytes: Option<u64>,
    /// The last good record has no trailing newline
    unterminated: bool,
}

async fn scan_log(path: &Path) -> StorageResult<LogScan> {
    match tokio::fs::read(path).await {
        Ok(bytes) => parse_log(&bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(LogScan::default()),
        Err(e) => Err(e.into()),
    }
}

fn parse_log(bytes: &[u8]) -> StorageResult<LogScan> {
    let mut scan = LogScan::default();
    let mut offset = 0usize;
    while offset < bytes.len() {
        let rest = &bytes[offset..];
        let (line, next, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(end) => (&rest[..end], offset + end + 1, true),
            None => (rest, bytes.len(), false),
        };
        if line.iter().all(u8::is_ascii_whitespace) {
            offset = next;
            scan.valid_len = offset as u64;
            continue;
        }
        match serde_json::from_slice::<EvidenceRecord>(line) {
            Ok(record) => {
                scan.records.push(record);
                scan.unterminated = !terminated;
            }
            Err(_) if !terminated => {
                scan.torn_bytes = Some(line.len() as u64);
                break;
            }
            Err(e) => return Err(e.into()),
        }
        offset = next;
        scan.valid_len = offset as u64;
    }
    Ok(scan)
}

async fn read_records(path: &Path) -> StorageResult<Vec<EvidenceRecord>> {
    Ok(scan_log(path).await?.records)
}

#[async_trait]
impl EvidenceStore for JsonlEvidenceStore {
    async fn append(&self, event: EvidenceEvent) -> StorageResult<EventId> {
        let mut writer = self.writer.lock().await;
        let record = EvidenceRecord {
            event_id: EventId::new(),
            seq: writer.next_seq,
            event,
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let written = match writer.file.write_all(&line).await {
            Ok(()) => writer.file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            // Cut any partial line so the next append starts clean.
            if let Err(cut) = writer.file.set_len(writer.len).await {
                warn!(path = %self.path.display(), error = %cut, "cannot truncate partial record");
            }
            return Err(e.into());
        }
        writer.len += line.len() as u64;
        writer.next_seq += 1;
        Ok(record.event_id)
    }

    async fn events_for(&self, correlation_id: &str) -> StorageResult<Vec<EvidenceRecord>> {
        // Hold the writer lock so a half-written line is never observed.
        let _writer = self.writer.lock().await;
        let records = read_records(&self.path).await?;
        Ok(records
            .into_iter()
            .filter(|r| r.event.correlation_id == correlation_id)
            .collect())
    }

    async fn len(&self) -> StorageResult<u64> {
        let writer = self.writer.lock().await;
        Ok(writer.next_seq - 1)
    }
}
