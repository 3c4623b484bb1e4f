// facade.rs - Operator Façade (spec §6)
//
// Thin wrappers around the state machine's local-initiated flows, each
// timed and wrapped in a `RuntimeRecording` envelope for benchmarking,
// grounded in `original_source/rpcserver.go`'s response shape.

use serde::Serialize;
use tracing::info;

use crate::error::NodeError;
use crate::model::RuntimeRecording;
use crate::signing;
use crate::state_machine::{self, now_nanos, NodeContext};

/// Matches `original_source/server.go`'s startup faucet top-up amount.
const RESET_FUNDING_AMOUNT: u64 = 10_000_000_000;

async fn timed<T, F>(future: F) -> Result<(RuntimeRecording, T), NodeError>
where
    F: std::future::Future<Output = Result<T, NodeError>>,
{
    let start_ts_nanos = now_nanos();
    let value = future.await?;
    let end_ts_nanos = now_nanos();
    Ok((RuntimeRecording { start_ts_nanos, end_ts_nanos }, value))
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub runtime_recording: RuntimeRecording,
}

#[derive(Debug, Serialize)]
pub struct GetInfoResponse {
    pub runtime_recording: RuntimeRecording,
    pub algo_address: String,
    pub algo_balance: u64,
}

#[derive(Debug, Serialize)]
pub struct OpenChannelResponse {
    pub runtime_recording: RuntimeRecording,
    pub app_id: u64,
}

#[derive(Debug, Serialize)]
pub struct PayResponse {
    pub runtime_recording: RuntimeRecording,
}

#[derive(Debug, Serialize)]
pub struct InitiateCloseChannelResponse {
    pub runtime_recording: RuntimeRecording,
}

#[derive(Debug, Serialize)]
pub struct FinalizeCloseChannelResponse {
    pub runtime_recording: RuntimeRecording,
}

#[derive(Debug, Serialize)]
pub struct CooperativeCloseChannelResponse {
    pub runtime_recording: RuntimeRecording,
}

#[derive(Debug, Serialize)]
pub struct TryToCheatResponse {
    pub runtime_recording: RuntimeRecording,
}

/// Clears all channels and the off-chain log, mints a fresh ledger keypair,
/// and funds the new account (spec §3 "cleared and regenerated by the Reset
/// façade operation"; §6 "Reset ... regenerates or reloads the ledger
/// account").
pub async fn reset(ctx: &NodeContext) -> Result<ResetResponse, NodeError> {
    let (runtime_recording, ()) = timed(async {
        ctx.store.clear().await;
        ctx.reset_identity(signing::generate_keypair()).await;
        let local_address = ctx.local_address().await;
        info!(local_address = %local_address, "identity regenerated by reset");
        ctx.ledger.pay(&local_address, RESET_FUNDING_AMOUNT).await
    })
    .await?;
    Ok(ResetResponse { runtime_recording })
}

pub async fn get_info(ctx: &NodeContext) -> Result<GetInfoResponse, NodeError> {
    let local_address = ctx.local_address().await;
    let (runtime_recording, algo_balance) = timed(ctx.ledger.account_balance(&local_address)).await?;
    Ok(GetInfoResponse { runtime_recording, algo_address: local_address, algo_balance })
}

pub async fn open_channel(
    ctx: &NodeContext,
    partner_host: &str,
    partner_address: &str,
    funding_amount: u64,
    penalty_reserve: u64,
    dispute_window: u64,
) -> Result<OpenChannelResponse, NodeError> {
    let (runtime_recording, app_id) = timed(state_machine::open_channel(
        ctx,
        partner_host,
        partner_address,
        funding_amount,
        penalty_reserve,
        dispute_window,
    ))
    .await?;
    Ok(OpenChannelResponse { runtime_recording, app_id })
}

pub async fn pay(ctx: &NodeContext, partner_address: &str, amount: u64) -> Result<PayResponse, NodeError> {
    let (runtime_recording, ()) = timed(state_machine::pay(ctx, partner_address, amount)).await?;
    Ok(PayResponse { runtime_recording })
}

pub async fn initiate_close_channel(ctx: &NodeContext, partner_address: &str) -> Result<InitiateCloseChannelResponse, NodeError> {
    let (runtime_recording, ()) = timed(state_machine::initiate_close(ctx, partner_address)).await?;
    Ok(InitiateCloseChannelResponse { runtime_recording })
}

pub async fn finalize_close_channel(ctx: &NodeContext, partner_address: &str) -> Result<FinalizeCloseChannelResponse, NodeError> {
    let (runtime_recording, ()) = timed(state_machine::finalize_close(ctx, partner_address)).await?;
    Ok(FinalizeCloseChannelResponse { runtime_recording })
}

pub async fn cooperative_close_channel(ctx: &NodeContext, partner_address: &str) -> Result<CooperativeCloseChannelResponse, NodeError> {
    let (runtime_recording, ()) = timed(state_machine::cooperative_close(ctx, partner_address)).await?;
    Ok(CooperativeCloseChannelResponse { runtime_recording })
}

pub async fn try_to_cheat(ctx: &NodeContext, partner_address: &str) -> Result<TryToCheatResponse, NodeError> {
    let (runtime_recording, ()) = timed(state_machine::try_to_cheat(ctx, partner_address)).await?;
    Ok(TryToCheatResponse { runtime_recording })
}
