//! The durable record queue
//!
//! Layout under the queue root:
//!
//! ```text
//! <data_dir>/queue/
//!   crashes/   crash_<localtime>_<session>.log
//!   errors/    error_<localtime>_<session>.log
//! ```
//!
//! Filenames encode the capture time and session id; the `.log` extension
//! marks a fully-written record. In-progress writes use a `.tmp` suffix and
//! become visible only through the final rename.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use faultline_core::domain::{Record, RecordKind, SessionId, TelemetryError};

/// File extension of a completed record file.
const RECORD_EXT: &str = "log";

// ============================================================================
// PendingFile
// ============================================================================

/// Reference to one queued record file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    kind: RecordKind,
    path: PathBuf,
}

impl PendingFile {
    fn new(kind: RecordKind, path: PathBuf) -> Self {
        Self { kind, path }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The file name, e.g. `crash_2026_02_07_09_15_30_001_<session>.log`.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// Session id parsed back out of the file name, if the name is well formed.
    pub fn session_id(&self) -> Option<SessionId> {
        let name = self.file_name();
        let stem = name.strip_suffix(&format!(".{RECORD_EXT}"))?;
        // Everything after the last underscore-separated uuid boundary; a
        // uuid contains hyphens but no underscores.
        let (_, session) = stem.rsplit_once('_')?;
        session.parse().ok()
    }
}

// ============================================================================
// DurableQueue
// ============================================================================

/// Durable one-file-per-record store, partitioned by record kind
///
/// Producers (the interceptor, on the crashing thread) and the consumer
/// (the delivery worker) may touch the queue concurrently; atomicity comes
/// from the filesystem, not from in-process locking.
pub struct DurableQueue {
    root: PathBuf,
}

impl DurableQueue {
    /// Opens (and creates, if needed) the queue under `<data_dir>/queue`.
    pub fn open(data_dir: &Path) -> Result<Self, TelemetryError> {
        let root = data_dir.join("queue");
        for kind in [RecordKind::Crash, RecordKind::Error] {
            fs::create_dir_all(root.join(kind.dir_name()))?;
        }
        Ok(Self { root })
    }

    /// Returns the queue root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn kind_dir(&self, kind: RecordKind) -> PathBuf {
        self.root.join(kind.dir_name())
    }

    /// Persists a record as a new, uniquely-named file.
    ///
    /// The record is serialized to a `.tmp` sibling first and renamed into
    /// place, so a concurrent [`list_pending`](Self::list_pending) either
    /// sees the complete file or nothing.
    pub fn write(&self, record: &Record) -> Result<PendingFile, TelemetryError> {
        let kind = record.kind();
        let dir = self.kind_dir(kind);
        let json = serde_json::to_string(record)?;

        let stem = format!(
            "{}_{}_{}",
            kind.file_prefix(),
            record.local_time(),
            record.session_id()
        );
        let path = unique_path(&dir, &stem);

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, json.as_bytes())?;
        fs::rename(&tmp, &path)?;

        debug!(kind = %kind, file = %path.display(), "Persisted record");
        Ok(PendingFile::new(kind, path))
    }

    /// Fresh snapshot of the pending files of one kind, in capture order.
    ///
    /// Each call re-enumerates the directory; the result is not a live view.
    pub fn list_pending(&self, kind: RecordKind) -> Vec<PendingFile> {
        let dir = self.kind_dir(kind);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to enumerate queue directory");
                return Vec::new();
            }
        };

        let mut files: Vec<PendingFile> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == RECORD_EXT))
            .map(|path| PendingFile::new(kind, path))
            .collect();

        files.sort_by_key(|f| f.file_name());
        files
    }

    /// Reads the raw serialized content of a pending file.
    pub fn read(&self, file: &PendingFile) -> Result<String, TelemetryError> {
        Ok(fs::read_to_string(file.path())?)
    }

    /// Reads and deserializes a pending file back into a [`Record`].
    pub fn load(&self, file: &PendingFile) -> Result<Record, TelemetryError> {
        let content = self.read(file)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Deletes a pending file. Idempotent: returns whether a file existed
    /// and was removed. Failures are logged, never propagated.
    pub fn delete(&self, file: &PendingFile) -> bool {
        match fs::remove_file(file.path()) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!(file = %file.path().display(), error = %e, "Failed to delete record file");
                false
            }
        }
    }

    /// Loads every readable record of one kind; malformed files are skipped
    /// with a warning.
    pub fn read_all(&self, kind: RecordKind) -> Vec<Record> {
        self.list_pending(kind)
            .iter()
            .filter_map(|file| match self.load(file) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(file = %file.path().display(), error = %e, "Skipping malformed record");
                    None
                }
            })
            .collect()
    }

    /// Removes the whole queue, then re-creates the empty partitions.
    pub fn clear_all(&self) -> bool {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(root = %self.root.display(), error = %e, "Failed to clear queue");
                return false;
            }
        }
        for kind in [RecordKind::Crash, RecordKind::Error] {
            if let Err(e) = fs::create_dir_all(self.root.join(kind.dir_name())) {
                warn!(error = %e, "Failed to re-create queue directory");
                return false;
            }
        }
        true
    }
}

/// Picks a path that doesn't exist yet, suffixing a counter on collision.
/// Two records can share a capture millisecond within one session.
fn unique_path(dir: &Path, stem: &str) -> PathBuf {
    let candidate = dir.join(format!("{stem}.{RECORD_EXT}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{stem}_{n}.{RECORD_EXT}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faultline_core::domain::{Origin, SessionId};

    fn record(kind: RecordKind, session: SessionId, message: &str) -> Record {
        Record::builder(kind, session)
            .origin(Origin::new(message).with_stack_trace(vec!["frame 0".to_string()]))
            .origin_thread("main")
            .build()
    }

    #[test]
    fn test_open_creates_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        assert!(queue.root().join("crashes").is_dir());
        assert!(queue.root().join("errors").is_dir());
    }

    #[test]
    fn test_write_then_list_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        let session = SessionId::new();

        let written = queue.write(&record(RecordKind::Crash, session, "boom")).unwrap();
        assert!(written.file_name().starts_with("crash_"));
        assert_eq!(written.session_id(), Some(session));

        let pending = queue.list_pending(RecordKind::Crash);
        assert_eq!(pending.len(), 1);
        assert!(queue.list_pending(RecordKind::Error).is_empty());

        let loaded = queue.load(&pending[0]).unwrap();
        assert_eq!(loaded.origin().message, "boom");
        assert_eq!(loaded.session_id(), &session);
    }

    #[test]
    fn test_same_instant_writes_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        let session = SessionId::new();
        let at = chrono::Utc::now();

        for i in 0..3 {
            let r = Record::builder(RecordKind::Error, session)
                .captured_at(at)
                .origin(Origin::new(format!("err {i}")))
                .build();
            queue.write(&r).unwrap();
        }

        assert_eq!(queue.list_pending(RecordKind::Error).len(), 3);
    }

    #[test]
    fn test_no_tmp_file_visible_after_write() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        queue
            .write(&record(RecordKind::Crash, SessionId::new(), "x"))
            .unwrap();

        let leftovers: Vec<_> = fs::read_dir(queue.root().join("crashes"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        let file = queue
            .write(&record(RecordKind::Error, SessionId::new(), "x"))
            .unwrap();

        assert!(queue.delete(&file));
        assert!(!queue.delete(&file));
        assert!(queue.list_pending(RecordKind::Error).is_empty());
    }

    #[test]
    fn test_read_all_skips_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        queue
            .write(&record(RecordKind::Crash, SessionId::new(), "good"))
            .unwrap();
        fs::write(queue.root().join("crashes/crash_garbage.log"), "{not json").unwrap();

        let records = queue.read_all(RecordKind::Crash);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].origin().message, "good");
        // The malformed file stays on disk; enumeration still sees it
        assert_eq!(queue.list_pending(RecordKind::Crash).len(), 2);
    }

    #[test]
    fn test_clear_all_wipes_both_partitions() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();
        queue
            .write(&record(RecordKind::Crash, SessionId::new(), "a"))
            .unwrap();
        queue
            .write(&record(RecordKind::Error, SessionId::new(), "b"))
            .unwrap();

        assert!(queue.clear_all());
        assert!(queue.list_pending(RecordKind::Crash).is_empty());
        assert!(queue.list_pending(RecordKind::Error).is_empty());
        // Partitions are usable again right away
        assert!(queue
            .write(&record(RecordKind::Crash, SessionId::new(), "c"))
            .is_ok());
    }

    #[test]
    fn test_list_pending_is_a_fresh_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let queue = DurableQueue::open(dir.path()).unwrap();

        let before = queue.list_pending(RecordKind::Crash);
        assert!(before.is_empty());

        queue
            .write(&record(RecordKind::Crash, SessionId::new(), "late"))
            .unwrap();
        assert_eq!(queue.list_pending(RecordKind::Crash).len(), 1);
    }
}
