//! Transfer-session domain entity.
//!
//! One [`TransferSession`] tracks one logical file transfer: the file is
//! split into fixed-size chunks (the last chunk may be shorter) and each
//! chunk is transferred and acknowledged independently, so chunks may
//! arrive out of order and a resumed session only re-requests what is
//! still missing.
//!
//! Completion bookkeeping is a single `BTreeSet<u32>` of chunk indices.
//! The "chunks completed" count is always derived from that set, never
//! kept as a separate counter, so the two cannot drift apart.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a transfer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    /// Terminal states admit no further chunk completion.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }
}

/// Byte range of one chunk within the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

/// Progress snapshot returned to callers and surfaced over the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferProgress {
    pub session_id: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub chunks_completed: u32,
    pub total_chunks: u32,
}

/// Stateful record of one chunked file transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSession {
    pub session_id: String,
    pub file_name: String,
    pub file_path: String,
    pub total_size: u64,
    pub chunk_size: u64,
    /// Indices of chunks confirmed written. Grows monotonically until
    /// the session reaches a terminal status.
    pub completed_chunks: BTreeSet<u32>,
    /// Whole-file checksum announced by the sending side; set at most once.
    pub checksum: Option<String>,
    pub status: TransferStatus,
    /// Progress percentage last reported by the remote side. Advisory
    /// only, never used in place of the derived chunk count.
    pub remote_progress: Option<f64>,
    /// Unix millis.
    pub created_at: u64,
    pub updated_at: u64,
}

impl TransferSession {
    pub fn new(
        session_id: impl Into<String>,
        file_name: impl Into<String>,
        file_path: impl Into<String>,
        total_size: u64,
        chunk_size: u64,
        now_ms: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            file_name: file_name.into(),
            file_path: file_path.into(),
            total_size,
            chunk_size,
            completed_chunks: BTreeSet::new(),
            checksum: None,
            status: TransferStatus::Pending,
            remote_progress: None,
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Number of chunks the file splits into: `ceil(total_size / chunk_size)`.
    ///
    /// A zero-byte file has zero chunks and is complete as soon as it is
    /// created.
    pub fn total_chunks(&self) -> u32 {
        if self.chunk_size == 0 {
            return 0;
        }
        (self.total_size.div_ceil(self.chunk_size)) as u32
    }

    /// Number of distinct chunks confirmed written.
    pub fn chunks_completed(&self) -> u32 {
        self.completed_chunks.len() as u32
    }

    /// Byte range of chunk `index`, or `None` past the end of the file.
    pub fn chunk_span(&self, index: u32) -> Option<ChunkSpan> {
        let offset = u64::from(index) * self.chunk_size;
        if offset >= self.total_size {
            return None;
        }
        Some(ChunkSpan {
            index,
            offset,
            size: self.chunk_size.min(self.total_size - offset),
        })
    }

    /// Records chunk `index` as completed. Idempotent: re-marking an
    /// already-completed index returns `false` and does not double-count.
    pub fn mark_chunk_completed(&mut self, index: u32, now_ms: u64) -> bool {
        let inserted = self.completed_chunks.insert(index);
        if inserted {
            self.updated_at = now_ms;
        }
        inserted
    }

    /// Chunk indices still missing, in ascending order. A resumed
    /// session requests exactly these and never re-requests completed
    /// ones.
    pub fn pending_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks())
            .filter(|i| !self.completed_chunks.contains(i))
            .collect()
    }

    /// `true` once every chunk has been confirmed written.
    pub fn is_complete(&self) -> bool {
        self.chunks_completed() == self.total_chunks()
    }

    /// Derived progress snapshot.
    pub fn progress(&self) -> TransferProgress {
        let total_chunks = self.total_chunks();
        let chunks_completed = self.chunks_completed();
        // Sum the actual spans so a short last chunk doesn't overshoot
        // total_size the way `completed * chunk_size` would.
        let bytes_transferred: u64 = self
            .completed_chunks
            .iter()
            .filter_map(|&i| self.chunk_span(i))
            .map(|s| s.size)
            .sum();
        let percentage = if total_chunks == 0 {
            100.0
        } else {
            f64::from(chunks_completed) / f64::from(total_chunks) * 100.0
        };
        TransferProgress {
            session_id: self.session_id.clone(),
            bytes_transferred,
            total_bytes: self.total_size,
            percentage,
            chunks_completed,
            total_chunks,
        }
    }
}
