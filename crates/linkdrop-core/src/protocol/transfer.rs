//! File-transfer control envelope.
//!
//! The message-oriented transport carries the chunked transfer protocol
//! as JSON envelopes tagged by an `action` field, with chunk payloads
//! base64-encoded in the `data` field. This module only defines the
//! envelope shapes and their parsing rules; translating an envelope into
//! session/chunk operations is the host's adapter concern, so the same
//! state machine serves both this encoding and a byte-stream transport.
//!
//! Every request is answered with a [`TransferResponse`]:
//! `{"success":true,"transferId":…}` on success, or
//! `{"success":false,"errorCode":…,"errorMessage":…}` with one of the
//! [`TransferErrorCode`] values on failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Inbound control message, dispatched by `action`.
///
/// Adding an action is a compile-time-checked change: every consumer
/// matches exhaustively, there is no default-case fallthrough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum TransferRequest {
    /// Opens a transfer: the sender names the file and its total size.
    #[serde(rename_all = "camelCase")]
    Request {
        transfer_id: String,
        file_name: String,
        file_size: u64,
        /// Whole-file checksum, when the sender announces it up front.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    /// Carries one chunk. Chunks may arrive in any order.
    #[serde(rename_all = "camelCase")]
    Chunk {
        transfer_id: String,
        chunk_number: u32,
        chunk_size: u64,
        total_chunks: u32,
        offset: u64,
        /// Base64-encoded chunk payload.
        data: String,
    },
    /// Declares the sender is done; the receiver finalizes and verifies.
    #[serde(rename_all = "camelCase")]
    Complete {
        transfer_id: String,
        /// Checksum announced at completion when not sent with `request`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checksum: Option<String>,
    },
    /// Aborts the transfer; partial data is discarded.
    #[serde(rename_all = "camelCase")]
    Cancel { transfer_id: String },
    /// Advisory progress report from the sending side.
    #[serde(rename_all = "camelCase")]
    Progress {
        transfer_id: String,
        progress: f64,
        #[serde(default)]
        total_size: u64,
        #[serde(default)]
        transferred_size: u64,
    },
}

impl TransferRequest {
    /// The transfer this request addresses.
    pub fn transfer_id(&self) -> &str {
        match self {
            TransferRequest::Request { transfer_id, .. }
            | TransferRequest::Chunk { transfer_id, .. }
            | TransferRequest::Complete { transfer_id, .. }
            | TransferRequest::Cancel { transfer_id }
            | TransferRequest::Progress { transfer_id, .. } => transfer_id,
        }
    }
}

/// Wire error codes carried in failure responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferErrorCode {
    UnknownAction,
    TransferAlreadyExists,
    TransferNotFound,
    IncompleteTransfer,
}

/// Response envelope for every control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_number: Option<u32>,
    /// Receiver-derived progress percentage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// On `INCOMPLETE_TRANSFER`, how many chunks actually arrived…
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_chunks: Option<u32>,
    /// …out of how many, so the sender can resume the difference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<TransferErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Unix millis at which the response was built.
    pub timestamp: u64,
}

impl TransferResponse {
    pub fn ok(transfer_id: impl Into<String>, timestamp: u64) -> Self {
        Self {
            success: true,
            transfer_id: Some(transfer_id.into()),
            chunk_number: None,
            progress: None,
            received_chunks: None,
            total_chunks: None,
            error_code: None,
            error_message: None,
            timestamp,
        }
    }

    pub fn chunk_ok(
        transfer_id: impl Into<String>,
        chunk_number: u32,
        progress: f64,
        timestamp: u64,
    ) -> Self {
        Self {
            chunk_number: Some(chunk_number),
            progress: Some(progress),
            ..Self::ok(transfer_id, timestamp)
        }
    }

    pub fn failure(
        transfer_id: Option<String>,
        code: TransferErrorCode,
        message: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            success: false,
            transfer_id,
            chunk_number: None,
            progress: None,
            received_chunks: None,
            total_chunks: None,
            error_code: Some(code),
            error_message: Some(message.into()),
            timestamp,
        }
    }

    /// Failure carrying the exact received/total pair so the caller can
    /// resume instead of restarting.
    pub fn incomplete(
        transfer_id: impl Into<String>,
        received: u32,
        total: u32,
        timestamp: u64,
    ) -> Self {
        Self {
            received_chunks: Some(received),
            total_chunks: Some(total),
            ..Self::failure(
                Some(transfer_id.into()),
                TransferErrorCode::IncompleteTransfer,
                format!("transfer incomplete: {received}/{total} chunks received"),
                timestamp,
            )
        }
    }
}

/// Errors produced while parsing an inbound envelope.
#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    /// Well-formed JSON whose `action` is not one we implement. Answered
    /// with an `UNKNOWN_ACTION` failure rather than dropped, since the
    /// sender is clearly speaking this protocol.
    #[error("unknown transfer action {action:?}")]
    UnknownAction {
        action: String,
        transfer_id: Option<String>,
    },

    /// A known action with missing or ill-typed fields. Logged and
    /// dropped; the connection is not torn down.
    #[error("malformed transfer envelope: {0}")]
    Malformed(String),

    /// Not JSON at all.
    #[error("transfer envelope is not valid JSON: {0}")]
    NotJson(String),
}

/// Known `action` values, for distinguishing "unknown action" from
/// "known action, bad fields".
const KNOWN_ACTIONS: [&str; 5] = ["request", "chunk", "complete", "cancel", "progress"];

/// Parses one inbound envelope.
pub fn parse_request(raw: &str) -> Result<TransferRequest, EnvelopeError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| EnvelopeError::NotJson(e.to_string()))?;

    match serde_json::from_value::<TransferRequest>(value.clone()) {
        Ok(req) => Ok(req),
        Err(e) => {
            let action = value
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or_default();
            if KNOWN_ACTIONS.contains(&action) {
                Err(EnvelopeError::Malformed(e.to_string()))
            } else {
                Err(EnvelopeError::UnknownAction {
                    action: action.to_string(),
                    transfer_id: value
                        .get("transferId")
                        .and_then(|t| t.as_str())
                        .map(String::from),
                })
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
