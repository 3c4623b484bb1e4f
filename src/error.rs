// error.rs - Custom error types for the node

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Error kinds per spec §7. Validation always runs before any mutation, so
/// every rejecting variant here is safe to return without a rollback step.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    // =========================================================================
    // Precondition violations - bad arguments, missing channel, etc.
    // =========================================================================
    #[error("no channel open with peer {0}")]
    NoChannel(String),

    #[error("no off-chain state recorded for peer {0}")]
    NoOffChainState(String),

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("channel balances below closing minimum: alice={alice}, bob={bob}")]
    BelowClosingMinimum { alice: u64, bob: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // =========================================================================
    // Peer protocol outcomes
    // =========================================================================
    #[error("peer rejected the request")]
    PeerReject,

    #[error("peer signature failed verification")]
    InvalidPeerSignature,

    // =========================================================================
    // Ledger / transport
    // =========================================================================
    #[error("ledger call failed: {0}")]
    LedgerFailure(String),

    #[error("malformed peer message: {0}")]
    ProtocolDecode(String),

    // =========================================================================
    // Unexpected / unrecoverable
    // =========================================================================
    #[error("fatal error: {0}")]
    Fatal(String),
}

impl IntoResponse for NodeError {
    fn into_response(self) -> Response {
        let status = match &self {
            NodeError::NoChannel(_) | NodeError::NoOffChainState(_) => StatusCode::NOT_FOUND,

            NodeError::InsufficientBalance { .. }
            | NodeError::BelowClosingMinimum { .. }
            | NodeError::InvalidArgument(_)
            | NodeError::PeerReject
            | NodeError::InvalidPeerSignature => StatusCode::BAD_REQUEST,

            NodeError::LedgerFailure(_) => StatusCode::SERVICE_UNAVAILABLE,

            NodeError::ProtocolDecode(_) | NodeError::Fatal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
