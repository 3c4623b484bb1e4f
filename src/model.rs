// model.rs - Data structures for the node
//
// Internal state (OnChainChannel, OffChainState) plus the peer wire protocol
// types (PeerRequest/PeerResponse). Addresses are hex-encoded Ed25519 public
// keys; amounts are plain u64 micro-units on the ledger's native asset.

use serde::{Deserialize, Serialize};

/// Which side of the channel the local node plays. Fixed at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Alice,
    Bob,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Alice => Role::Bob,
            Role::Bob => Role::Alice,
        }
    }
}

/// One open channel, as last observed on-chain (spec §3).
#[derive(Debug, Clone)]
pub struct OnChainChannel {
    pub app_id: u64,
    pub partner_host: String,
    pub alice_address: String,
    pub bob_address: String,
    pub alice_onchain_balance: u64,
    pub bob_onchain_balance: u64,
    pub total_deposit: u64,
    pub penalty_reserve: u64,
    pub dispute_window: u64,
}

impl OnChainChannel {
    /// The role the given local address plays in this channel, if any.
    pub fn role_of(&self, local_address: &str) -> Option<Role> {
        if local_address == self.alice_address {
            Some(Role::Alice)
        } else if local_address == self.bob_address {
            Some(Role::Bob)
        } else {
            None
        }
    }

    pub fn address_for(&self, role: Role) -> &str {
        match role {
            Role::Alice => &self.alice_address,
            Role::Bob => &self.bob_address,
        }
    }
}

/// A signed off-chain balance update; one append-only log entry per channel
/// (spec §3). `timestamp` is the log key and must strictly increase.
#[derive(Debug, Clone)]
pub struct OffChainState {
    pub timestamp: u64,
    pub alice_balance: u64,
    pub bob_balance: u64,
    pub alice_signature: Vec<u8>,
    pub bob_signature: Vec<u8>,
    pub port_tag: u64,
    pub app_id: u64,
}

impl OffChainState {
    pub fn balance_for(&self, role: Role) -> u64 {
        match role {
            Role::Alice => self.alice_balance,
            Role::Bob => self.bob_balance,
        }
    }

    pub fn total(&self) -> u64 {
        // Checked so a corrupted log entry surfaces as a panic, not a
        // silently wrong conservation check (spec §3 invariant).
        self.alice_balance
            .checked_add(self.bob_balance)
            .expect("off-chain balances must not overflow u64")
    }
}

// =============================================================================
// Peer wire protocol (spec §4.5)
// =============================================================================

/// One request per connection: a command name plus opaque byte arguments.
/// Args/data travel as JSON arrays of byte arrays rather than base64 text,
/// keeping the wire protocol independent of any particular text encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRequest {
    #[serde(rename = "Command")]
    pub command: String,
    #[serde(rename = "Args")]
    pub args: Vec<Vec<u8>>,
}

/// One response per connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerResponse {
    #[serde(rename = "Message")]
    pub message: String,
    #[serde(rename = "Data")]
    pub data: Vec<Vec<u8>>,
}

impl PeerResponse {
    pub fn approve(data: Vec<Vec<u8>>) -> Self {
        PeerResponse {
            message: "approve".to_string(),
            data,
        }
    }

    pub fn reject() -> Self {
        PeerResponse {
            message: "reject".to_string(),
            data: Vec::new(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.message == "approve"
    }
}

/// Reply envelope wrapping every operator-facade operation (spec §6),
/// grounded in `original_source/rpcserver.go`'s `RuntimeRecording`.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeRecording {
    pub start_ts_nanos: u64,
    pub end_ts_nanos: u64,
}

// =============================================================================
// Operator-facade RPC request bodies (spec §6)
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct OpenChannelRequest {
    pub partner_host: String,
    pub partner_address: String,
    pub funding_amount: u64,
    pub penalty_reserve: u64,
    pub dispute_window: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayRequestBody {
    pub partner_address: String,
    pub amount: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartnerAddressRequest {
    pub partner_address: String,
}
