// handlers.rs - HTTP Route Handlers
//
// Thin axum routes onto `facade.rs`: extract the request, call the facade,
// wrap the result as JSON.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use tracing::info;

use crate::error::NodeError;
use crate::facade::{
    self, CooperativeCloseChannelResponse, FinalizeCloseChannelResponse, GetInfoResponse,
    InitiateCloseChannelResponse, OpenChannelResponse, PayResponse, ResetResponse, TryToCheatResponse,
};
use crate::model::{OpenChannelRequest, PartnerAddressRequest, PayRequestBody};
use crate::state_machine::NodeContext;

pub fn create_router(ctx: NodeContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/reset", post(reset))
        .route("/info", get(get_info))
        .route("/channel/open", post(open_channel))
        .route("/channel/pay", post(pay))
        .route("/channel/initiate-close", post(initiate_close_channel))
        .route("/channel/finalize-close", post(finalize_close_channel))
        .route("/channel/cooperative-close", post(cooperative_close_channel))
        .route("/channel/try-to-cheat", post(try_to_cheat))
        .with_state(ctx)
}

async fn health() -> &'static str {
    "ok"
}

async fn reset(State(ctx): State<NodeContext>) -> Result<Json<ResetResponse>, NodeError> {
    info!("POST /reset");
    Ok(Json(facade::reset(&ctx).await?))
}

async fn get_info(State(ctx): State<NodeContext>) -> Result<Json<GetInfoResponse>, NodeError> {
    Ok(Json(facade::get_info(&ctx).await?))
}

async fn open_channel(
    State(ctx): State<NodeContext>,
    Json(payload): Json<OpenChannelRequest>,
) -> Result<Json<OpenChannelResponse>, NodeError> {
    info!(
        partner_host = %payload.partner_host,
        partner_address = %payload.partner_address,
        funding_amount = payload.funding_amount,
        "POST /channel/open"
    );
    let response = facade::open_channel(
        &ctx,
        &payload.partner_host,
        &payload.partner_address,
        payload.funding_amount,
        payload.penalty_reserve,
        payload.dispute_window,
    )
    .await?;
    Ok(Json(response))
}

async fn pay(State(ctx): State<NodeContext>, Json(payload): Json<PayRequestBody>) -> Result<Json<PayResponse>, NodeError> {
    info!(partner_address = %payload.partner_address, amount = payload.amount, "POST /channel/pay");
    Ok(Json(facade::pay(&ctx, &payload.partner_address, payload.amount).await?))
}

async fn initiate_close_channel(
    State(ctx): State<NodeContext>,
    Json(payload): Json<PartnerAddressRequest>,
) -> Result<Json<InitiateCloseChannelResponse>, NodeError> {
    info!(partner_address = %payload.partner_address, "POST /channel/initiate-close");
    Ok(Json(facade::initiate_close_channel(&ctx, &payload.partner_address).await?))
}

async fn finalize_close_channel(
    State(ctx): State<NodeContext>,
    Json(payload): Json<PartnerAddressRequest>,
) -> Result<Json<FinalizeCloseChannelResponse>, NodeError> {
    info!(partner_address = %payload.partner_address, "POST /channel/finalize-close");
    Ok(Json(facade::finalize_close_channel(&ctx, &payload.partner_address).await?))
}

async fn cooperative_close_channel(
    State(ctx): State<NodeContext>,
    Json(payload): Json<PartnerAddressRequest>,
) -> Result<Json<CooperativeCloseChannelResponse>, NodeError> {
    info!(partner_address = %payload.partner_address, "POST /channel/cooperative-close");
    Ok(Json(facade::cooperative_close_channel(&ctx, &payload.partner_address).await?))
}

async fn try_to_cheat(
    State(ctx): State<NodeContext>,
    Json(payload): Json<PartnerAddressRequest>,
) -> Result<Json<TryToCheatResponse>, NodeError> {
    info!(partner_address = %payload.partner_address, "POST /channel/try-to-cheat");
    Ok(Json(facade::try_to_cheat(&ctx, &payload.partner_address).await?))
}
