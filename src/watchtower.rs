// watchtower.rs - background dispute monitor (spec §4.8)
//
// Started at most once per process (see `NodeContext::ensure_watchtower_started`).
// Polls every open channel's on-chain state once per sweep and raises a
// dispute only when the on-chain claim is strictly worse for the local
// party than the latest signed off-chain state.

use tracing::{error, info, warn};

use crate::ledger::global_state;
use crate::model::{OnChainChannel, Role};
use crate::orchestrator;
use crate::state_machine::NodeContext;

const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

pub async fn run(ctx: NodeContext) {
    info!("watchtower started");
    loop {
        if let Err(e) = sweep(&ctx).await {
            error!(error = %e, "watchtower sweep hit a fatal ledger error, stopping");
            return;
        }
        tokio::time::sleep(SWEEP_INTERVAL).await;
    }
}

/// One pass over every open channel (spec §4.8). `get_application` is a
/// ledger-wide call - a failure there propagates out of `sweep` itself and
/// stops the task. Everything after it is scoped to one channel, so a
/// parse/comparison error there only skips that channel.
pub async fn sweep(ctx: &NodeContext) -> Result<(), crate::error::NodeError> {
    for peer in ctx.store.peers().await {
        let Some(channel) = ctx.store.get_channel(&peer).await else {
            continue;
        };
        let info = ctx.ledger.get_application(channel.app_id).await?;
        if let Err(e) = evaluate_channel(ctx, &peer, &channel, &info).await {
            warn!(peer = %peer, error = %e, "skipping channel this sweep");
        }
    }
    Ok(())
}

/// Steps 2-5 of the per-channel loop body; everything it returns is
/// per-channel-skippable, never fatal.
async fn evaluate_channel(
    ctx: &NodeContext,
    peer: &str,
    channel: &OnChainChannel,
    info: &crate::ledger::ApplicationInfo,
) -> Result<(), crate::error::NodeError> {
    let Some(timeout_raw) = global_state::get(&info.global_state, "timeout") else {
        return Ok(());
    };
    let timeout = global_state::decode_uint(timeout_raw)?;
    if timeout == 0 {
        return Ok(());
    }

    let onchain_alice = global_state::decode_uint(
        global_state::get(&info.global_state, "latest_alice_balance")
            .ok_or_else(|| crate::error::NodeError::LedgerFailure("missing latest_alice_balance".into()))?,
    )?;
    let onchain_bob = global_state::decode_uint(
        global_state::get(&info.global_state, "latest_bob_balance")
            .ok_or_else(|| crate::error::NodeError::LedgerFailure("missing latest_bob_balance".into()))?,
    )?;

    let local_address = ctx.local_address().await;
    let local_role = channel
        .role_of(&local_address)
        .ok_or_else(|| crate::error::NodeError::Fatal("local address is not a party to its own channel".into()))?;

    let onchain_local = match local_role {
        Role::Alice => onchain_alice,
        Role::Bob => onchain_bob,
    };

    let latest_offchain = ctx.store.latest(peer).await?;
    let offchain_local = latest_offchain.balance_for(local_role);

    if onchain_local >= offchain_local {
        return Ok(());
    }

    warn!(peer = %peer, onchain_local, offchain_local, "on-chain balance disadvantages us, raising dispute");
    let signing_key = ctx.signing_key().await;
    orchestrator::raise_dispute(ctx.ledger.as_ref(), &signing_key, channel.app_id, &latest_offchain).await?;
    ctx.store.delete_channel(peer).await;

    Ok(())
}
