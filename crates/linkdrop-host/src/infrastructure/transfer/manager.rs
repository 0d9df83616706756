//! Transfer session manager: owns every in-flight [`TransferSession`]
//! and the staging files they write into.
//!
//! Incoming chunks land in `<staging_dir>/<transfer_id>.part` at their
//! chunk offset; finalization verifies the announced SHA-256 (when one
//! was announced) and renames the staging file to the real file name.
//! An incomplete finalize leaves the session in progress so the sender
//! can resume with exactly the missing chunks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use linkdrop_core::{TransferProgress, TransferSession, TransferStatus};

use super::chunk_io;
use crate::infrastructure::now_ms;

/// Staging location and transfer limits.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Directory holding `.part` staging files and finished downloads.
    pub staging_dir: PathBuf,
    pub chunk_size: u64,
    /// Sessions may be registered freely; only this many may be actively
    /// receiving chunks at once.
    pub max_concurrent: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            staging_dir: std::env::temp_dir().join("linkdrop"),
            chunk_size: 64 * 1024,
            max_concurrent: 5,
        }
    }
}

/// Error type for transfer operations.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("transfer already exists: {0}")]
    AlreadyExists(String),

    #[error("transfer not found: {0}")]
    NotFound(String),

    /// The concurrent-transfer limit is enforced at start, not at
    /// registration; the caller may retry once a slot frees up.
    #[error("too many concurrent transfers (limit {limit})")]
    ResourceExhausted { limit: usize },

    #[error("transfer {0} is {1:?} and accepts no further operations")]
    InvalidState(String, TransferStatus),

    #[error("checksum already set for transfer {0}")]
    ChecksumAlreadySet(String),

    #[error("chunk {chunk_number} out of range for transfer {transfer_id}")]
    ChunkOutOfRange {
        transfer_id: String,
        chunk_number: u32,
    },

    /// A payload larger than its chunk span would overwrite the next
    /// chunk or grow the file past its announced size.
    #[error("chunk {chunk_number} of transfer {transfer_id} is {actual} bytes, span allows {expected}")]
    ChunkTooLarge {
        transfer_id: String,
        chunk_number: u32,
        expected: u64,
        actual: u64,
    },

    /// Finalize arrived before every chunk did. Carries the exact
    /// received/total pair so the sender can resume the difference.
    #[error("transfer {transfer_id} incomplete: {received}/{total} chunks received")]
    Incomplete {
        transfer_id: String,
        received: u32,
        total: u32,
    },

    /// The assembled file does not hash to the announced checksum. The
    /// session is marked failed; the partial file is kept for inspection.
    #[error("integrity check failed for {transfer_id}: expected {expected}, got {actual}")]
    IntegrityFailure {
        transfer_id: String,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transfer lifecycle notifications for the application layer.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    Started { session: TransferSession },
    ChunkReceived {
        transfer_id: String,
        chunk_number: u32,
        progress: TransferProgress,
    },
    Completed { session: TransferSession },
    Failed {
        transfer_id: String,
        reason: String,
    },
    Cancelled { transfer_id: String },
}

/// Owns all transfer sessions on this host.
pub struct TransferManager {
    config: TransferConfig,
    sessions: Mutex<HashMap<String, TransferSession>>,
    events: mpsc::Sender<TransferEvent>,
}

impl TransferManager {
    /// Creates the manager and returns it with the event receiver.
    pub fn new(config: TransferConfig) -> (Self, mpsc::Receiver<TransferEvent>) {
        let (tx, rx) = mpsc::channel(256);
        (
            Self {
                config,
                sessions: Mutex::new(HashMap::new()),
                events: tx,
            },
            rx,
        )
    }

    /// Registers a new incoming transfer in state `pending`.
    ///
    /// # Errors
    ///
    /// [`TransferError::AlreadyExists`] when the id is already taken;
    /// a retry of `request` must not silently reset a live session.
    pub fn create_session(
        &self,
        transfer_id: &str,
        file_name: &str,
        file_size: u64,
        checksum: Option<String>,
    ) -> Result<TransferSession, TransferError> {
        let mut sessions = self.lock_sessions();
        if sessions.contains_key(transfer_id) {
            return Err(TransferError::AlreadyExists(transfer_id.to_string()));
        }

        std::fs::create_dir_all(&self.config.staging_dir)?;
        let staging = self.config.staging_dir.join(format!("{transfer_id}.part"));
        // A zero-byte file has no chunks, so the staging file must exist
        // up front for finalize to rename.
        std::fs::File::create(&staging)?;

        let mut session = TransferSession::new(
            transfer_id,
            file_name,
            staging.to_string_lossy(),
            file_size,
            self.config.chunk_size,
            now_ms(),
        );
        session.checksum = checksum;

        sessions.insert(transfer_id.to_string(), session.clone());
        info!(transfer_id, file_name, file_size, "transfer session registered");
        Ok(session)
    }

    /// Moves a pending session to `in_progress`, enforcing the
    /// concurrent-transfer limit. Starting an already-running session is
    /// a no-op.
    pub fn start_transfer(&self, transfer_id: &str) -> Result<TransferSession, TransferError> {
        let mut sessions = self.lock_sessions();
        let in_progress = sessions
            .values()
            .filter(|s| s.status == TransferStatus::InProgress)
            .count();

        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;

        match session.status {
            TransferStatus::InProgress => return Ok(session.clone()),
            TransferStatus::Pending => {}
            terminal => {
                return Err(TransferError::InvalidState(transfer_id.to_string(), terminal))
            }
        }

        if in_progress >= self.config.max_concurrent {
            return Err(TransferError::ResourceExhausted {
                limit: self.config.max_concurrent,
            });
        }

        session.status = TransferStatus::InProgress;
        session.updated_at = now_ms();
        let snapshot = session.clone();
        drop(sessions);

        self.emit(TransferEvent::Started {
            session: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Whether a pending transfer could start right now without tripping
    /// the concurrency limit.
    pub fn can_start_transfer(&self) -> bool {
        self.active_transfer_count() < self.config.max_concurrent
    }

    /// Takes a session out of the active set without cancelling it: the
    /// session returns to `pending` with its received chunks intact and
    /// frees its concurrency slot. Ending a pending session is a no-op.
    pub fn end_transfer(&self, transfer_id: &str) -> Result<TransferSession, TransferError> {
        let mut sessions = self.lock_sessions();
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
        match session.status {
            TransferStatus::InProgress => {
                session.status = TransferStatus::Pending;
                session.updated_at = now_ms();
                debug!(transfer_id, "transfer parked, slot freed");
                Ok(session.clone())
            }
            TransferStatus::Pending => Ok(session.clone()),
            terminal => Err(TransferError::InvalidState(
                transfer_id.to_string(),
                terminal,
            )),
        }
    }

    /// Writes one chunk at its canonical offset and records it as
    /// completed. Duplicate chunks are re-written in place and never
    /// double-counted.
    pub fn write_chunk(
        &self,
        transfer_id: &str,
        chunk_number: u32,
        data: &[u8],
    ) -> Result<TransferProgress, TransferError> {
        let (path, offset) = {
            let sessions = self.lock_sessions();
            let session = sessions
                .get(transfer_id)
                .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
            if session.status != TransferStatus::InProgress {
                return Err(TransferError::InvalidState(
                    transfer_id.to_string(),
                    session.status,
                ));
            }
            let span = session.chunk_span(chunk_number).ok_or_else(|| {
                TransferError::ChunkOutOfRange {
                    transfer_id: transfer_id.to_string(),
                    chunk_number,
                }
            })?;
            if data.len() as u64 > span.size {
                return Err(TransferError::ChunkTooLarge {
                    transfer_id: transfer_id.to_string(),
                    chunk_number,
                    expected: span.size,
                    actual: data.len() as u64,
                });
            }
            (PathBuf::from(&session.file_path), span.offset)
        };

        // File I/O happens outside the sessions lock.
        chunk_io::write_chunk(&path, offset, data)?;

        let progress = {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(transfer_id)
                .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
            if !session.mark_chunk_completed(chunk_number, now_ms()) {
                debug!(transfer_id, chunk_number, "duplicate chunk ignored");
            }
            session.progress()
        };

        self.emit(TransferEvent::ChunkReceived {
            transfer_id: transfer_id.to_string(),
            chunk_number,
            progress: progress.clone(),
        });
        Ok(progress)
    }

    /// Records the whole-file checksum. Set at most once; a conflicting
    /// value is rejected, a repeat of the same value is a no-op.
    pub fn set_checksum(&self, transfer_id: &str, checksum: &str) -> Result<(), TransferError> {
        let mut sessions = self.lock_sessions();
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;

        match &session.checksum {
            Some(existing) if existing.eq_ignore_ascii_case(checksum) => Ok(()),
            Some(_) => Err(TransferError::ChecksumAlreadySet(transfer_id.to_string())),
            None => {
                session.checksum = Some(checksum.to_string());
                session.updated_at = now_ms();
                Ok(())
            }
        }
    }

    /// Stores the sender's advisory progress report.
    pub fn record_remote_progress(
        &self,
        transfer_id: &str,
        progress: f64,
    ) -> Result<TransferProgress, TransferError> {
        let mut sessions = self.lock_sessions();
        let session = sessions
            .get_mut(transfer_id)
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
        session.remote_progress = Some(progress);
        Ok(session.progress())
    }

    /// Finalizes the transfer: all chunks must be present, the checksum
    /// (if any) must match, and the staging file is renamed to the real
    /// file name.
    ///
    /// # Errors
    ///
    /// [`TransferError::Incomplete`] leaves the session in progress so
    /// the sender can resume; [`TransferError::IntegrityFailure`] marks
    /// it failed.
    pub fn finalize(
        &self,
        transfer_id: &str,
        checksum: Option<&str>,
    ) -> Result<TransferSession, TransferError> {
        if let Some(checksum) = checksum {
            self.set_checksum(transfer_id, checksum)?;
        }

        let (staging, expected, received, total, file_name) = {
            let sessions = self.lock_sessions();
            let session = sessions
                .get(transfer_id)
                .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
            if session.status.is_terminal() {
                return Err(TransferError::InvalidState(
                    transfer_id.to_string(),
                    session.status,
                ));
            }
            (
                PathBuf::from(&session.file_path),
                session.checksum.clone(),
                session.chunks_completed(),
                session.total_chunks(),
                session.file_name.clone(),
            )
        };

        if received != total {
            debug!(transfer_id, received, total, "finalize before all chunks arrived");
            return Err(TransferError::Incomplete {
                transfer_id: transfer_id.to_string(),
                received,
                total,
            });
        }

        if let Some(expected) = expected {
            let actual = chunk_io::file_checksum(&staging)?;
            if !actual.eq_ignore_ascii_case(&expected) {
                warn!(transfer_id, expected, actual, "checksum mismatch");
                self.set_status(transfer_id, TransferStatus::Failed);
                self.emit(TransferEvent::Failed {
                    transfer_id: transfer_id.to_string(),
                    reason: "checksum mismatch".to_string(),
                });
                return Err(TransferError::IntegrityFailure {
                    transfer_id: transfer_id.to_string(),
                    expected,
                    actual,
                });
            }
        }

        let final_path = self.config.staging_dir.join(sanitize_file_name(&file_name));
        std::fs::rename(&staging, &final_path)?;

        let snapshot = {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(transfer_id)
                .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
            session.status = TransferStatus::Completed;
            session.file_path = final_path.to_string_lossy().into_owned();
            session.updated_at = now_ms();
            session.clone()
        };

        info!(transfer_id, path = %final_path.display(), "transfer completed");
        self.emit(TransferEvent::Completed {
            session: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Aborts a transfer and best-effort deletes its partial file.
    /// Cancelling a session that already finished is a no-op.
    pub fn cancel(&self, transfer_id: &str) -> Result<(), TransferError> {
        let staging = {
            let mut sessions = self.lock_sessions();
            let session = sessions
                .get_mut(transfer_id)
                .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))?;
            if session.status.is_terminal() {
                return Ok(());
            }
            session.status = TransferStatus::Cancelled;
            session.updated_at = now_ms();
            PathBuf::from(&session.file_path)
        };

        if let Err(e) = std::fs::remove_file(&staging) {
            // A missing file is fine; anything else is worth a log line
            // but never fails the cancel.
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(transfer_id, "could not delete partial file: {e}");
            }
        }

        info!(transfer_id, "transfer cancelled");
        self.emit(TransferEvent::Cancelled {
            transfer_id: transfer_id.to_string(),
        });
        Ok(())
    }

    /// Snapshot of one session.
    pub fn session(&self, transfer_id: &str) -> Option<TransferSession> {
        self.lock_sessions().get(transfer_id).cloned()
    }

    /// Chunk indices still missing for a resumable session.
    pub fn pending_chunks(&self, transfer_id: &str) -> Result<Vec<u32>, TransferError> {
        self.lock_sessions()
            .get(transfer_id)
            .map(|s| s.pending_chunks())
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    pub fn progress(&self, transfer_id: &str) -> Result<TransferProgress, TransferError> {
        self.lock_sessions()
            .get(transfer_id)
            .map(|s| s.progress())
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    /// All sessions, whatever their status.
    pub fn sessions(&self) -> Vec<TransferSession> {
        self.lock_sessions().values().cloned().collect()
    }

    /// Number of sessions currently receiving chunks. This is the count
    /// the concurrency limit is enforced against.
    pub fn active_transfer_count(&self) -> usize {
        self.lock_sessions()
            .values()
            .filter(|s| s.status == TransferStatus::InProgress)
            .count()
    }

    /// Drops a session record entirely. Live sessions are cancelled
    /// first so their partial file is cleaned up.
    pub fn delete_session(&self, transfer_id: &str) -> Result<(), TransferError> {
        if let Some(session) = self.session(transfer_id) {
            if !session.status.is_terminal() {
                self.cancel(transfer_id)?;
            }
        }
        self.lock_sessions()
            .remove(transfer_id)
            .map(|_| ())
            .ok_or_else(|| TransferError::NotFound(transfer_id.to_string()))
    }

    fn set_status(&self, transfer_id: &str, status: TransferStatus) {
        if let Some(session) = self.lock_sessions().get_mut(transfer_id) {
            session.status = status;
            session.updated_at = now_ms();
        }
    }

    fn emit(&self, event: TransferEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("transfer event dropped: {e}");
        }
    }

    /// A poisoned lock only means another caller panicked mid-update;
    /// the session map itself is still usable.
    fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, TransferSession>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Strips any path components a peer may have smuggled into the file
/// name; an empty result falls back to a fixed name.
fn sanitize_file_name(file_name: &str) -> String {
    Path::new(file_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty() && n != "." && n != "..")
        .unwrap_or_else(|| "unnamed".to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
