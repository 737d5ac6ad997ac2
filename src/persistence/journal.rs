//! Event Journal store (C1): one append-only NDJSON log plus a small
//! metadata document per session.
//!
//! Layout under the configured data directory:
//!
//! ```text
//! {root}/{session_id}/journal.ndjson
//! {root}/{session_id}/metadata.json
//! ```
//!
//! Writes to one session are serialised through a per-session `tokio::sync
//! ::Mutex`; there is no cross-session ordering guarantee.

use std::collections::HashMap;
use std::io::{BufRead, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::models::event::{Event, EventKind};
use crate::persistence::atomic::write_json_atomic;
use crate::{AppError, Result};

/// Fsync at most this often while a session is under continuous write load.
const FSYNC_INTERVAL: Duration = Duration::from_millis(50);
/// Fsync unconditionally after this many un-synced appends.
const FSYNC_EVENT_THRESHOLD: u32 = 128;

/// Small metadata document carried alongside a session's journal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Human-readable, mutable title.
    pub name: String,
    /// Absolute workspace directory.
    pub workspace_dir: PathBuf,
    /// Agent profile used to spawn the session.
    pub agent_profile: String,
    /// Shell command template actually used to spawn the session, so a
    /// later resume can respawn it even if the workspace that originally
    /// resolved it is no longer registered.
    #[serde(default)]
    pub agent_command: String,
    /// When the session was first created.
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// When the metadata document was last rewritten.
    pub updated_at: chrono::DateTime<chrono::Utc>,
    /// High-water journal sequence number.
    pub event_count: i64,
    /// Last user-supplied opaque data blob (e.g. a draft, a UI cursor);
    /// passthrough storage for the client hub, uninterpreted here.
    #[serde(default)]
    pub last_user_data: Option<serde_json::Value>,
}

/// Partial update applied to a [`SessionMetadata`] document.
#[derive(Debug, Default, Clone)]
pub struct MetadataPatch {
    /// New name, if changing.
    pub name: Option<String>,
    /// New last-user-data blob, if changing.
    pub last_user_data: Option<serde_json::Value>,
}

struct OpenJournal {
    file: tokio::fs::File,
    next_seq: i64,
    pending_since_fsync: u32,
    last_fsync: Instant,
}

/// Append-only event journal plus metadata store, keyed by session id.
pub struct JournalStore {
    root: PathBuf,
    open: Mutex<HashMap<String, Arc<Mutex<OpenJournal>>>>,
}

impl JournalStore {
    /// Open (or prepare to lazily open) a journal store rooted at `root`.
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            open: Mutex::new(HashMap::new()),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn journal_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("journal.ndjson")
    }

    fn metadata_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("metadata.json")
    }

    /// Create the on-disk layout for a brand-new session and write its
    /// initial metadata document.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on I/O failure.
    pub async fn create(&self, session_id: &str, metadata: &SessionMetadata) -> Result<()> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;
        write_json_atomic(&self.metadata_path(session_id), metadata)?;
        // Touch an empty journal file so `list_sessions` and reads never
        // race a session that has metadata but no journal yet.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.journal_path(session_id))
            .await?;
        Ok(())
    }

    async fn open_handle(&self, session_id: &str) -> Result<Arc<Mutex<OpenJournal>>> {
        let mut guard = self.open.lock().await;
        if let Some(handle) = guard.get(session_id) {
            return Ok(Arc::clone(handle));
        }

        let path = self.journal_path(session_id);
        let next_seq = recover_tail(&path)? + 1;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let handle = Arc::new(Mutex::new(OpenJournal {
            file,
            next_seq,
            pending_since_fsync: 0,
            last_fsync: Instant::now(),
        }));
        guard.insert(session_id.to_owned(), Arc::clone(&handle));
        Ok(handle)
    }

    /// Append one event, allocating its sequence number, and return the
    /// stored [`Event`] (with `seq` and `timestamp` filled in).
    ///
    /// Fsyncs the journal file every `FSYNC_EVENT_THRESHOLD` appends or
    /// `FSYNC_INTERVAL`, whichever comes first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on I/O failure.
    pub async fn append_event(
        &self,
        session_id: &str,
        kind: EventKind,
        payload: serde_json::Value,
    ) -> Result<Event> {
        let handle = self.open_handle(session_id).await?;
        let mut journal = handle.lock().await;

        let event = Event {
            seq: journal.next_seq,
            kind,
            timestamp: chrono::Utc::now(),
            payload,
        };

        let mut line = serde_json::to_vec(&event)?;
        line.push(b'\n');
        journal.file.write_all(&line).await?;

        journal.next_seq += 1;
        journal.pending_since_fsync += 1;

        if journal.pending_since_fsync >= FSYNC_EVENT_THRESHOLD
            || journal.last_fsync.elapsed() >= FSYNC_INTERVAL
        {
            journal.file.sync_data().await?;
            journal.pending_since_fsync = 0;
            journal.last_fsync = Instant::now();
        }

        self.bump_event_count(session_id, event.seq).await?;

        Ok(event)
    }

    async fn bump_event_count(&self, session_id: &str, seq: i64) -> Result<()> {
        let mut metadata = self.read_metadata(session_id).await?;
        metadata.event_count = seq;
        metadata.updated_at = chrono::Utc::now();
        write_json_atomic(&self.metadata_path(session_id), &metadata)
    }

    /// Read the events in `(after_seq, after_seq + limit]`, in seq order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on I/O failure or a malformed journal
    /// line that is not the truncated final line.
    pub async fn read_range(
        &self,
        session_id: &str,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let path = self.journal_path(session_id);
        let session_id = session_id.to_owned();
        tokio::task::spawn_blocking(move || read_range_blocking(&path, after_seq, limit))
            .await
            .map_err(|err| AppError::Storage(format!("journal read task panicked: {err}")))?
            .map_err(|err| {
                AppError::Storage(format!("failed to read journal for {session_id}: {err}"))
            })
    }

    /// Read the current metadata document for a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no metadata document exists, or
    /// `AppError::Storage` on I/O or deserialization failure.
    pub async fn read_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        let path = self.metadata_path(session_id);
        let bytes = tokio::fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AppError::NotFound(format!("session {session_id}"))
            } else {
                AppError::Storage(err.to_string())
            }
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Rewrite a session's metadata document by applying `patch`, via
    /// temp-file + atomic rename.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session has no metadata yet, or
    /// `AppError::Storage` on I/O failure.
    pub async fn update_metadata(
        &self,
        session_id: &str,
        patch: MetadataPatch,
    ) -> Result<SessionMetadata> {
        let mut metadata = self.read_metadata(session_id).await?;
        if let Some(name) = patch.name {
            metadata.name = name;
        }
        if patch.last_user_data.is_some() {
            metadata.last_user_data = patch.last_user_data;
        }
        metadata.updated_at = chrono::Utc::now();
        write_json_atomic(&self.metadata_path(session_id), &metadata)?;
        Ok(metadata)
    }

    /// List every session's metadata, sorted by `updated_at` descending.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` if the root directory cannot be listed.
    pub async fn list_sessions(&self) -> Result<Vec<(String, SessionMetadata)>> {
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => return Err(AppError::Storage(err.to_string())),
        };

        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(session_id) = entry.file_name().to_str().map(str::to_owned) else {
                continue;
            };
            if let Ok(metadata) = self.read_metadata(&session_id).await {
                entries.push((session_id, metadata));
            }
        }

        entries.sort_by(|a, b| b.1.updated_at.cmp(&a.1.updated_at));
        Ok(entries)
    }

    /// Remove a session's journal and metadata atomically from the caller's
    /// perspective: the directory is renamed aside then deleted, so a
    /// concurrent reader either sees the old tree intact or sees it gone.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Storage` on I/O failure.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.open.lock().await.remove(session_id);
        let dir = self.session_dir(session_id);
        let trash = self.root.join(format!(".{session_id}.deleted"));
        match tokio::fs::rename(&dir, &trash).await {
            Ok(()) => {
                tokio::fs::remove_dir_all(&trash).await?;
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AppError::Storage(err.to_string())),
        }
    }
}

/// Inspect the tail of a journal file on open, truncating a malformed
/// (non-JSON) final line left behind by a crash mid-append, and return the
/// highest seq found.
fn recover_tail(path: &Path) -> Result<i64> {
    let Ok(file) = std::fs::File::open(path) else {
        return Ok(0);
    };

    let reader = std::io::BufReader::new(&file);
    let mut last_good_seq = 0i64;
    let mut trailing_garbage_len: u64 = 0;
    let mut offset: u64 = 0;

    for line in reader.lines() {
        let line = line.map_err(|err| AppError::Storage(err.to_string()))?;
        let line_len = line.len() as u64 + 1; // + newline
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                last_good_seq = last_good_seq.max(event.seq);
                offset += line_len;
                trailing_garbage_len = 0;
            }
            Err(_) => {
                trailing_garbage_len += line_len;
            }
        }
    }

    if trailing_garbage_len > 0 {
        let mut file = std::fs::OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.set_len(offset)?;
    }

    Ok(last_good_seq)
}

fn read_range_blocking(path: &Path, after_seq: i64, limit: usize) -> std::io::Result<Vec<Event>> {
    let Ok(file) = std::fs::File::open(path) else {
        return Ok(Vec::new());
    };
    let reader = std::io::BufReader::new(file);

    let mut events = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let Ok(event) = serde_json::from_str::<Event>(&line) else {
            continue;
        };
        if event.seq > after_seq {
            events.push(event);
            if events.len() >= limit {
                break;
            }
        }
    }
    Ok(events)
}
