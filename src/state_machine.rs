// state_machine.rs - central decision logic (spec §4.6, §4.7)
//
// Two halves: server-side validation of an inbound peer request, and the
// local-initiated flows a façade operation drives. Both share one rule:
// validate first, mutate the store only after every check has passed, so a
// rejection never needs a rollback.

use std::sync::Arc;

use ed25519_dalek::SigningKey;
use once_cell::sync::OnceCell;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::Config;
use crate::ledger::{global_state, ApplicationInfo, LedgerAdapter};
use crate::model::{OffChainState, OnChainChannel, PeerRequest, PeerResponse, Role};
use crate::orchestrator;
use crate::signing;
use crate::store::Store;
use crate::watchtower;
use crate::error::NodeError;

/// The node's ledger identity: keypair plus derived address. Held behind a
/// lock rather than plain fields so `reset` can rotate it at runtime (spec
/// §3/§6) while every handler still reads a consistent snapshot.
struct Identity {
    signing_key: Arc<SigningKey>,
    local_address: String,
}

/// Everything a peer-request handler, a façade operation, or the watchtower
/// needs: the shared store, the ledger capability, the local keypair and
/// address, the open-check bounds, and the watchtower's single-shot guard.
#[derive(Clone)]
pub struct NodeContext {
    pub store: Store,
    pub ledger: Arc<dyn LedgerAdapter>,
    identity: Arc<RwLock<Identity>>,
    pub config: Config,
    pub watchtower_started: Arc<OnceCell<()>>,
}

impl NodeContext {
    pub fn new(store: Store, ledger: Arc<dyn LedgerAdapter>, signing_key: Arc<SigningKey>, config: Config) -> Self {
        let local_address = signing::address_of(&signing_key.verifying_key());
        NodeContext {
            store,
            ledger,
            identity: Arc::new(RwLock::new(Identity { signing_key, local_address })),
            config,
            watchtower_started: Arc::new(OnceCell::new()),
        }
    }

    /// Starts the watchtower task at most once per process (spec §4.8/§9).
    pub fn ensure_watchtower_started(&self) {
        if self.watchtower_started.set(()).is_ok() {
            tokio::spawn(watchtower::run(self.clone()));
        }
    }

    pub async fn local_address(&self) -> String {
        self.identity.read().await.local_address.clone()
    }

    pub async fn signing_key(&self) -> Arc<SigningKey> {
        self.identity.read().await.signing_key.clone()
    }

    /// Rotates the ledger keypair in place (spec §6: Reset "regenerates or
    /// reloads the ledger account").
    pub async fn reset_identity(&self, signing_key: SigningKey) {
        let local_address = signing::address_of(&signing_key.verifying_key());
        let mut identity = self.identity.write().await;
        identity.signing_key = Arc::new(signing_key);
        identity.local_address = local_address;
    }
}

pub(crate) fn now_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_nanos() as u64
}

fn parse_u64be(bytes: &[u8]) -> Result<u64, NodeError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| NodeError::ProtocolDecode("expected an 8-byte big-endian integer".into()))?;
    Ok(u64::from_be_bytes(array))
}

fn parse_address_arg(bytes: &[u8]) -> Result<String, NodeError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| NodeError::ProtocolDecode(format!("peer address is not valid utf-8: {e}")))
}

fn channel_from_global_state(app_id: u64, partner_host: String, info: &ApplicationInfo) -> Result<OnChainChannel, NodeError> {
    let get = |key: &str| {
        global_state::get(&info.global_state, key)
            .ok_or_else(|| NodeError::LedgerFailure(format!("missing global state key {key}")))
    };
    Ok(OnChainChannel {
        app_id,
        partner_host,
        alice_address: global_state::decode_address(get("alice_address")?)?,
        bob_address: global_state::decode_address(get("bob_address")?)?,
        alice_onchain_balance: global_state::decode_uint(get("latest_alice_balance")?)?,
        bob_onchain_balance: global_state::decode_uint(get("latest_bob_balance")?)?,
        total_deposit: global_state::decode_uint(get("total_deposit")?)?,
        penalty_reserve: global_state::decode_uint(get("penalty_reserve")?)?,
        dispute_window: global_state::decode_uint(get("dispute_window")?)?,
    })
}

// =============================================================================
// Server side: validating an inbound peer request (spec §4.5, §4.6)
// =============================================================================

/// Runs the four open-security checks in order (spec §4.6). Never mutates
/// anything; a failing check is reported as `PeerReject`.
async fn run_open_security_checks(ctx: &NodeContext, info: &ApplicationInfo, channel: &OnChainChannel) -> Result<(), NodeError> {
    let (expected_approval, expected_clear) = orchestrator::expected_bytecode(ctx.ledger.as_ref()).await?;
    if info.approval_bytes != expected_approval || info.clear_bytes != expected_clear {
        return Err(NodeError::PeerReject);
    }

    if channel.bob_address != ctx.local_address().await {
        return Err(NodeError::PeerReject);
    }

    if channel.dispute_window < ctx.config.min_dispute_window || channel.dispute_window > ctx.config.max_dispute_window {
        return Err(NodeError::PeerReject);
    }

    if channel.penalty_reserve < ctx.config.min_penalty_reserve || channel.penalty_reserve > ctx.config.max_penalty_reserve {
        return Err(NodeError::PeerReject);
    }

    Ok(())
}

async fn handle_open_channel_request(ctx: &NodeContext, remote_host: &str, args: &[Vec<u8>]) -> Result<(), NodeError> {
    let app_id_bytes = args.first().ok_or_else(|| NodeError::ProtocolDecode("open_channel_request: missing app_id".into()))?;
    let app_id_str = std::str::from_utf8(app_id_bytes)
        .map_err(|e| NodeError::ProtocolDecode(format!("app_id is not valid utf-8: {e}")))?;
    let app_id: u64 = app_id_str
        .parse()
        .map_err(|e| NodeError::ProtocolDecode(format!("app_id is not a decimal integer: {e}")))?;

    let info = ctx.ledger.get_application(app_id).await?;
    let channel = channel_from_global_state(app_id, remote_host.to_string(), &info)?;
    if let Err(e) = run_open_security_checks(ctx, &info, &channel).await {
        warn!(app_id, remote_host = %remote_host, error = %e, "rejected open_channel_request");
        return Err(e);
    }

    let peer_address = channel.alice_address.clone();
    ctx.store.put_channel(&peer_address, channel.clone()).await;
    let seed = OffChainState {
        timestamp: now_nanos(),
        alice_balance: channel.alice_onchain_balance,
        bob_balance: channel.bob_onchain_balance,
        alice_signature: Vec::new(),
        bob_signature: Vec::new(),
        port_tag: crate::config::PORT_TAG,
        app_id,
    };
    ctx.store.append_state(&peer_address, seed).await?;
    ctx.ensure_watchtower_started();
    info!(app_id, peer = %peer_address, "accepted open_channel_request");
    Ok(())
}

async fn handle_pay_request(ctx: &NodeContext, args: &[Vec<u8>]) -> Result<Vec<u8>, NodeError> {
    if args.len() != 5 {
        return Err(NodeError::ProtocolDecode("pay_request: expected 5 args".into()));
    }
    let peer_address = parse_address_arg(&args[0])?;
    let new_alice_balance = parse_u64be(&args[1])?;
    let new_bob_balance = parse_u64be(&args[2])?;
    let new_timestamp = parse_u64be(&args[3])?;
    let peer_signature = args[4].clone();

    let channel = ctx.store.get_channel(&peer_address).await.ok_or_else(|| NodeError::NoChannel(peer_address.clone()))?;
    let latest = ctx.store.latest(&peer_address).await?;

    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| NodeError::Fatal("local address is not a party to its own channel".into()))?;
    let peer_role = local_role.other();

    let new_balance_peer = match peer_role {
        Role::Alice => new_alice_balance,
        Role::Bob => new_bob_balance,
    };
    let new_balance_local = match local_role {
        Role::Alice => new_alice_balance,
        Role::Bob => new_bob_balance,
    };

    if new_balance_peer >= latest.balance_for(peer_role) {
        warn!(peer = %peer_address, "rejected pay_request: payer balance did not decrease");
        return Err(NodeError::InvalidArgument("payer balance did not decrease".into()));
    }
    let new_total = new_alice_balance
        .checked_add(new_bob_balance)
        .ok_or_else(|| NodeError::InvalidArgument("proposed balances overflow".into()))?;
    if new_total != latest.total() {
        warn!(peer = %peer_address, "rejected pay_request: balances are not conserved");
        return Err(NodeError::InvalidArgument("balances are not conserved".into()));
    }
    if new_balance_peer < channel.penalty_reserve {
        warn!(peer = %peer_address, new_balance_peer, "rejected pay_request: below penalty reserve");
        return Err(NodeError::BelowClosingMinimum { alice: new_alice_balance, bob: new_bob_balance });
    }
    if new_timestamp <= latest.timestamp {
        warn!(peer = %peer_address, "rejected pay_request: timestamp does not strictly increase");
        return Err(NodeError::InvalidArgument("timestamp does not strictly increase".into()));
    }

    let encoding = signing::encode_state(crate::config::PORT_TAG, channel.app_id, new_alice_balance, new_bob_balance, new_timestamp);
    if !signing::verify(&encoding, &peer_signature, channel.address_for(peer_role)) {
        warn!(peer = %peer_address, "rejected pay_request: invalid peer signature");
        return Err(NodeError::InvalidPeerSignature);
    }

    let signing_key = ctx.signing_key().await;
    let local_signature = signing::sign(&signing_key, &encoding);
    let (alice_signature, bob_signature) = match peer_role {
        Role::Alice => (peer_signature, local_signature.clone()),
        Role::Bob => (local_signature.clone(), peer_signature),
    };

    let state = OffChainState {
        timestamp: new_timestamp,
        alice_balance: new_alice_balance,
        bob_balance: new_bob_balance,
        alice_signature,
        bob_signature,
        port_tag: crate::config::PORT_TAG,
        app_id: channel.app_id,
    };
    ctx.store.append_state(&peer_address, state).await?;

    info!(peer = %peer_address, new_balance_local, new_balance_peer, "accepted pay_request");
    Ok(local_signature)
}

async fn handle_close_channel_request(ctx: &NodeContext, args: &[Vec<u8>]) -> Result<Vec<u8>, NodeError> {
    if args.len() != 2 {
        return Err(NodeError::ProtocolDecode("close_channel_request: expected 2 args".into()));
    }
    let peer_address = parse_address_arg(&args[0])?;
    let peer_signature = args[1].clone();

    let channel = ctx.store.get_channel(&peer_address).await.ok_or_else(|| NodeError::NoChannel(peer_address.clone()))?;
    let latest = ctx.store.latest(&peer_address).await?;
    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| NodeError::Fatal("local address is not a party to its own channel".into()))?;
    let peer_role = local_role.other();

    let encoding = signing::encode_close(crate::config::PORT_TAG, channel.app_id, latest.alice_balance, latest.bob_balance, latest.timestamp);
    if !signing::verify(&encoding, &peer_signature, channel.address_for(peer_role)) {
        warn!(peer = %peer_address, "rejected close_channel_request: invalid peer signature");
        return Err(NodeError::InvalidPeerSignature);
    }

    let signing_key = ctx.signing_key().await;
    info!(peer = %peer_address, "accepted close_channel_request");
    Ok(signing::sign(&signing_key, &encoding))
}

/// Dispatches one decoded peer request to its handler, turning the `Result`
/// into the wire-level approve/reject/no-op response. Unknown commands get
/// an empty response, matching the server's no-op behaviour (spec §4.5).
pub async fn handle_peer_request(ctx: &NodeContext, remote_host: &str, request: PeerRequest) -> PeerResponse {
    match request.command.as_str() {
        "open_channel_request" => match handle_open_channel_request(ctx, remote_host, &request.args).await {
            Ok(()) => PeerResponse::approve(Vec::new()),
            Err(_) => PeerResponse::reject(),
        },
        "pay_request" => match handle_pay_request(ctx, &request.args).await {
            Ok(signature) => PeerResponse::approve(vec![signature]),
            Err(_) => PeerResponse::reject(),
        },
        "close_channel_request" => match handle_close_channel_request(ctx, &request.args).await {
            Ok(signature) => PeerResponse::approve(vec![signature]),
            Err(_) => PeerResponse::reject(),
        },
        _ => PeerResponse { message: String::new(), data: Vec::new() },
    }
}

// =============================================================================
// Local-initiated flows (spec §4.7)
// =============================================================================

/// Known hazard, not solved here: if the peer rejects the `open_channel_request`
/// after the app has already been created and funded on-chain, this returns
/// `PeerReject` without any on-chain refund. The deposited funds stay locked
/// in the orphaned app until an operator intervenes out of band.
pub async fn open_channel(
    ctx: &NodeContext,
    partner_host: &str,
    partner_address: &str,
    funding_amount: u64,
    penalty_reserve: u64,
    dispute_window: u64,
) -> Result<u64, NodeError> {
    let partner_pubkey = signing::parse_address(partner_address)
        .ok_or_else(|| NodeError::InvalidArgument(format!("not a valid ledger address: {partner_address}")))?;

    let local_address = ctx.local_address().await;
    let signing_key = ctx.signing_key().await;

    let app_id = orchestrator::create_app(ctx.ledger.as_ref(), &partner_pubkey.to_bytes(), penalty_reserve, dispute_window).await?;
    orchestrator::setup_app(ctx.ledger.as_ref(), &signing_key, app_id, funding_amount).await?;

    let request = PeerRequest {
        command: "open_channel_request".to_string(),
        args: vec![app_id.to_string().into_bytes()],
    };
    let response = crate::peer::client::send_request(partner_host, &request).await?;
    if !response.is_approved() {
        warn!(app_id, partner = %partner_address, "open_channel_request rejected by peer");
        return Err(NodeError::PeerReject);
    }

    let channel = OnChainChannel {
        app_id,
        partner_host: partner_host.to_string(),
        alice_address: local_address,
        bob_address: partner_address.to_string(),
        alice_onchain_balance: funding_amount,
        bob_onchain_balance: 0,
        total_deposit: funding_amount,
        penalty_reserve,
        dispute_window,
    };
    ctx.store.put_channel(partner_address, channel.clone()).await;
    let seed = OffChainState {
        timestamp: now_nanos(),
        alice_balance: funding_amount,
        bob_balance: 0,
        alice_signature: Vec::new(),
        bob_signature: Vec::new(),
        port_tag: crate::config::PORT_TAG,
        app_id,
    };
    ctx.store.append_state(partner_address, seed).await?;
    ctx.ensure_watchtower_started();
    info!(app_id, partner = %partner_address, funding_amount, "opened channel");

    Ok(app_id)
}

pub async fn pay(ctx: &NodeContext, partner_address: &str, amount: u64) -> Result<(), NodeError> {
    let channel = ctx.store.get_channel(partner_address).await.ok_or_else(|| NodeError::NoChannel(partner_address.to_string()))?;
    let latest = ctx.store.latest(partner_address).await?;
    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| NodeError::Fatal("local address is not a party to its own channel".into()))?;
    let peer_role = local_role.other();

    let local_balance = latest.balance_for(local_role);
    if amount > local_balance {
        return Err(NodeError::InsufficientBalance { have: local_balance, need: amount });
    }

    let new_local = local_balance - amount;
    let new_peer = latest.balance_for(peer_role) + amount;
    let new_timestamp = ctx.store.next_timestamp(partner_address, now_nanos()).await;

    let (new_alice, new_bob) = match local_role {
        Role::Alice => (new_local, new_peer),
        Role::Bob => (new_peer, new_local),
    };

    let encoding = signing::encode_state(crate::config::PORT_TAG, channel.app_id, new_alice, new_bob, new_timestamp);
    let signing_key = ctx.signing_key().await;
    let local_signature = signing::sign(&signing_key, &encoding);

    let request = PeerRequest {
        command: "pay_request".to_string(),
        args: vec![
            local_address.into_bytes(),
            new_alice.to_be_bytes().to_vec(),
            new_bob.to_be_bytes().to_vec(),
            new_timestamp.to_be_bytes().to_vec(),
            local_signature.clone(),
        ],
    };
    let response = crate::peer::client::send_request(&channel.partner_host, &request).await?;
    if !response.is_approved() {
        warn!(partner = %partner_address, amount, "pay request rejected by peer");
        return Err(NodeError::PeerReject);
    }
    let peer_signature = response.data.first().cloned().ok_or(NodeError::InvalidPeerSignature)?;
    if !signing::verify(&encoding, &peer_signature, channel.address_for(peer_role)) {
        return Err(NodeError::InvalidPeerSignature);
    }

    let (alice_signature, bob_signature) = match local_role {
        Role::Alice => (local_signature, peer_signature),
        Role::Bob => (peer_signature, local_signature),
    };
    let state = OffChainState {
        timestamp: new_timestamp,
        alice_balance: new_alice,
        bob_balance: new_bob,
        alice_signature,
        bob_signature,
        port_tag: crate::config::PORT_TAG,
        app_id: channel.app_id,
    };
    ctx.store.append_state(partner_address, state).await?;
    info!(partner = %partner_address, amount, new_local, "payment accepted");
    Ok(())
}

/// Pre-requires both balances be above the ledger's minimum-balance
/// obligation before posting `initiateChannelClosing` (spec §4.7).
const CLOSING_MINIMUM_BALANCE: u64 = 1000;

pub async fn initiate_close(ctx: &NodeContext, partner_address: &str) -> Result<(), NodeError> {
    let channel = ctx.store.get_channel(partner_address).await.ok_or_else(|| NodeError::NoChannel(partner_address.to_string()))?;
    let latest = ctx.store.latest(partner_address).await?;
    if latest.alice_balance < CLOSING_MINIMUM_BALANCE || latest.bob_balance < CLOSING_MINIMUM_BALANCE {
        return Err(NodeError::BelowClosingMinimum { alice: latest.alice_balance, bob: latest.bob_balance });
    }
    let signing_key = ctx.signing_key().await;
    orchestrator::initiate_channel_closing(ctx.ledger.as_ref(), &signing_key, channel.app_id, &latest).await
}

pub async fn finalize_close(ctx: &NodeContext, partner_address: &str) -> Result<(), NodeError> {
    let channel = ctx.store.get_channel(partner_address).await.ok_or_else(|| NodeError::NoChannel(partner_address.to_string()))?;
    let signing_key = ctx.signing_key().await;
    orchestrator::finalize_channel_closing(ctx.ledger.as_ref(), &signing_key, channel.app_id, &channel.alice_address, &channel.bob_address).await?;
    ctx.store.delete_channel(partner_address).await;
    info!(partner = %partner_address, "channel closed");
    Ok(())
}

pub async fn cooperative_close(ctx: &NodeContext, partner_address: &str) -> Result<(), NodeError> {
    let channel = ctx.store.get_channel(partner_address).await.ok_or_else(|| NodeError::NoChannel(partner_address.to_string()))?;
    let latest = ctx.store.latest(partner_address).await?;
    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| NodeError::Fatal("local address is not a party to its own channel".into()))?;
    let peer_role = local_role.other();

    let encoding = signing::encode_close(crate::config::PORT_TAG, channel.app_id, latest.alice_balance, latest.bob_balance, latest.timestamp);
    let signing_key = ctx.signing_key().await;
    let local_signature = signing::sign(&signing_key, &encoding);

    let request = PeerRequest {
        command: "close_channel_request".to_string(),
        args: vec![local_address.into_bytes(), local_signature.clone()],
    };
    let response = crate::peer::client::send_request(&channel.partner_host, &request).await?;
    if !response.is_approved() {
        warn!(partner = %partner_address, "cooperative close rejected by peer");
        return Err(NodeError::PeerReject);
    }
    let peer_signature = response.data.first().cloned().ok_or(NodeError::InvalidPeerSignature)?;
    if !signing::verify(&encoding, &peer_signature, channel.address_for(peer_role)) {
        return Err(NodeError::InvalidPeerSignature);
    }

    let (alice_signature, bob_signature) = match local_role {
        Role::Alice => (local_signature, peer_signature),
        Role::Bob => (peer_signature, local_signature),
    };
    let close_state = OffChainState {
        timestamp: latest.timestamp,
        alice_balance: latest.alice_balance,
        bob_balance: latest.bob_balance,
        alice_signature,
        bob_signature,
        port_tag: crate::config::PORT_TAG,
        app_id: channel.app_id,
    };
    orchestrator::cooperative_close(ctx.ledger.as_ref(), &signing_key, channel.app_id, &close_state).await?;
    ctx.store.delete_channel(partner_address).await;
    info!(partner = %partner_address, "cooperative close completed");
    Ok(())
}

/// Deliberately dishonest: posts the historical state maximising the local
/// balance instead of the latest one (spec §4.7), to exercise the
/// counterparty's watchtower in tests.
pub async fn try_to_cheat(ctx: &NodeContext, partner_address: &str) -> Result<(), NodeError> {
    let channel = ctx.store.get_channel(partner_address).await.ok_or_else(|| NodeError::NoChannel(partner_address.to_string()))?;
    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| NodeError::Fatal("local address is not a party to its own channel".into()))?;
    let state = ctx
        .store
        .highest_balance(partner_address, local_role)
        .await
        .ok_or_else(|| NodeError::NoOffChainState(partner_address.to_string()))?;
    let signing_key = ctx.signing_key().await;
    warn!(partner = %partner_address, "submitting stale state to initiate closing (try_to_cheat)");
    orchestrator::initiate_channel_closing(ctx.ledger.as_ref(), &signing_key, channel.app_id, &state).await
}
