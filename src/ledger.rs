// ledger.rs - Ledger Adapter (spec §4.3, §9 "ledger client as capability")
//
// The orchestrator, state machine and watchtower never talk to the ledger
// node directly; they go through this trait so tests can supply a
// deterministic fake (`test_support::FakeLedger`) instead of a live sandbox.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::NodeError;

/// Opaque network parameters a transaction needs to be valid (fee,
/// first/last valid round, genesis hash, ...). The core never inspects the
/// contents; it just threads them through to `send_group`.
#[derive(Debug, Clone, Default)]
pub struct SuggestedParams(pub Vec<u8>);

/// A transaction the orchestrator has built and signed, ready to submit as
/// part of a group.
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub raw: Vec<u8>,
}

/// Handle returned by `send_group`, passed to `wait_confirmed`.
#[derive(Debug, Clone)]
pub struct PendingId(pub String);

/// The contract's global state, key -> base64-encoded value, exactly as the
/// ledger node's API reports it (spec §6: "values are decoded from base64
/// when read").
#[derive(Debug, Clone, Default)]
pub struct ApplicationInfo {
    pub approval_bytes: Vec<u8>,
    pub clear_bytes: Vec<u8>,
    pub global_state: HashMap<String, String>,
}

/// Global-state schema reserved at create-app time (spec §4.4: "global
/// schema `(uint_count=7, byte_slice_count=3)`").
#[derive(Debug, Clone, Copy)]
pub struct GlobalStateSchema {
    pub uint_count: u64,
    pub byte_slice_count: u64,
}

/// Injected capability the core needs from the ledger client (spec §4.3).
#[async_trait]
pub trait LedgerAdapter: Send + Sync {
    async fn suggested_params(&self) -> Result<SuggestedParams, NodeError>;

    async fn send_group(&self, transactions: &[SignedTransaction]) -> Result<PendingId, NodeError>;

    async fn wait_confirmed(&self, pending: &PendingId) -> Result<(), NodeError>;

    async fn get_application(&self, app_id: u64) -> Result<ApplicationInfo, NodeError>;

    async fn account_balance(&self, address: &str) -> Result<u64, NodeError>;

    async fn compile(&self, source: &str) -> Result<Vec<u8>, NodeError>;

    /// Creates and confirms a single application-create call, returning the
    /// freshly assigned app id (spec §4.4 "Create-app").
    async fn create_application(
        &self,
        approval: &[u8],
        clear: &[u8],
        schema: GlobalStateSchema,
        args: &[Vec<u8>],
    ) -> Result<u64, NodeError>;

    /// Moves `amount` from the local account to `to` (used both for funding
    /// an escrow address and for the startup `Reset` faucet top-up).
    async fn pay(&self, to: &str, amount: u64) -> Result<(), NodeError>;
}

/// Decoding helpers for the base64-encoded global-state values (spec §6).
/// The original contract stores every value, including numbers, as the
/// ASCII-decimal text of the number (see `original_source/watchtower.go`'s
/// `strconv.ParseUint(string(bytes), ...)`), so that convention is mirrored
/// here rather than treating uints as fixed-width binary.
pub mod global_state {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    pub fn decode_bytes(value: &str) -> Result<Vec<u8>, NodeError> {
        STANDARD
            .decode(value)
            .map_err(|e| NodeError::LedgerFailure(format!("invalid base64 global state value: {e}")))
    }

    pub fn decode_uint(value: &str) -> Result<u64, NodeError> {
        let bytes = decode_bytes(value)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| NodeError::LedgerFailure(format!("non-utf8 global state uint: {e}")))?;
        text.trim()
            .parse()
            .map_err(|e| NodeError::LedgerFailure(format!("unparsable global state uint: {e}")))
    }

    pub fn decode_address(value: &str) -> Result<String, NodeError> {
        Ok(hex::encode(decode_bytes(value)?))
    }

    pub fn get<'a>(state: &'a HashMap<String, String>, key: &str) -> Option<&'a String> {
        state.get(key)
    }
}
