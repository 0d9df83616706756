//! Adapter between the JSON control envelope and the transfer manager.
//!
//! One inbound envelope maps to one manager operation and (usually) one
//! [`TransferResponse`]. Malformed payloads are logged and dropped
//! without an answer; everything else is answered, including unknown
//! actions, so a peer speaking a newer protocol revision learns it sent
//! something we do not implement rather than timing out.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, warn};

use linkdrop_core::protocol::transfer::{
    parse_request, EnvelopeError, TransferErrorCode, TransferRequest, TransferResponse,
};

use super::manager::{TransferError, TransferManager};
use crate::infrastructure::now_ms;

/// Handles one inbound control message. Returns `None` when the payload
/// is malformed enough that no useful answer exists.
pub fn handle_message(manager: &TransferManager, raw: &str) -> Option<TransferResponse> {
    let request = match parse_request(raw) {
        Ok(request) => request,
        Err(EnvelopeError::UnknownAction {
            action,
            transfer_id,
        }) => {
            debug!(action, "unknown transfer action");
            return Some(TransferResponse::failure(
                transfer_id,
                TransferErrorCode::UnknownAction,
                format!("unknown action {action:?}"),
                now_ms(),
            ));
        }
        Err(e) => {
            warn!("dropping transfer envelope: {e}");
            return None;
        }
    };

    dispatch(manager, request)
}

/// `None` only for a chunk whose payload is not valid base64; that is a
/// malformed message like unparseable JSON, not an answerable request.
fn dispatch(manager: &TransferManager, request: TransferRequest) -> Option<TransferResponse> {
    let now = now_ms();
    let response = match request {
        TransferRequest::Request {
            transfer_id,
            file_name,
            file_size,
            checksum,
        } => {
            let result = manager
                .create_session(&transfer_id, &file_name, file_size, checksum)
                .and_then(|_| manager.start_transfer(&transfer_id));
            match result {
                Ok(_) => TransferResponse::ok(transfer_id, now),
                Err(e) => failure_for(transfer_id, e, now),
            }
        }

        TransferRequest::Chunk {
            transfer_id,
            chunk_number,
            data,
            ..
        } => {
            let bytes = match BASE64.decode(data.as_bytes()) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(transfer_id, chunk_number, "dropping undecodable chunk: {e}");
                    return None;
                }
            };
            match manager.write_chunk(&transfer_id, chunk_number, &bytes) {
                Ok(progress) => TransferResponse::chunk_ok(
                    transfer_id,
                    chunk_number,
                    progress.percentage,
                    now,
                ),
                Err(e) => failure_for(transfer_id, e, now),
            }
        }

        TransferRequest::Complete {
            transfer_id,
            checksum,
        } => match manager.finalize(&transfer_id, checksum.as_deref()) {
            Ok(_) => TransferResponse::ok(transfer_id, now),
            Err(TransferError::Incomplete {
                received, total, ..
            }) => TransferResponse::incomplete(transfer_id, received, total, now),
            Err(e) => failure_for(transfer_id, e, now),
        },

        TransferRequest::Cancel { transfer_id } => match manager.cancel(&transfer_id) {
            Ok(()) => TransferResponse::ok(transfer_id, now),
            Err(e) => failure_for(transfer_id, e, now),
        },

        TransferRequest::Progress {
            transfer_id,
            progress,
            ..
        } => match manager.record_remote_progress(&transfer_id, progress) {
            Ok(local) => TransferResponse {
                progress: Some(local.percentage),
                ..TransferResponse::ok(transfer_id, now)
            },
            Err(e) => failure_for(transfer_id, e, now),
        },
    };
    Some(response)
}

/// Maps a manager error onto the wire. Only a few error kinds have
/// dedicated codes; the rest carry their message without one.
fn failure_for(transfer_id: String, error: TransferError, now: u64) -> TransferResponse {
    let code = match &error {
        TransferError::AlreadyExists(_) => Some(TransferErrorCode::TransferAlreadyExists),
        TransferError::NotFound(_) => Some(TransferErrorCode::TransferNotFound),
        TransferError::Incomplete { .. } => Some(TransferErrorCode::IncompleteTransfer),
        _ => None,
    };
    match code {
        Some(code) => TransferResponse::failure(Some(transfer_id), code, error.to_string(), now),
        None => TransferResponse {
            error_message: Some(error.to_string()),
            success: false,
            ..TransferResponse::ok(transfer_id, now)
        },
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
