// main.rs - node entry point, grounded in original_source/server.go's
// `initializeServer` / `startListening`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use algo_channel_node::config::Config;
use algo_channel_node::ledger::LedgerAdapter;
use algo_channel_node::state_machine::NodeContext;
use algo_channel_node::store::Store;
use algo_channel_node::test_support::FakeLedger;
use algo_channel_node::{handlers, peer, signing};

/// Matches `original_source/server.go`'s startup faucet top-up amount.
const STARTUP_FUNDING_AMOUNT: u64 = 10_000_000_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let signing_key = match &config.seed_phrase {
        Some(phrase) => signing::keypair_from_mnemonic(phrase)?,
        None => signing::generate_keypair(),
    };
    let local_address = signing::address_of(&signing_key.verifying_key());
    info!("Node ledger address: {local_address}");

    // The real ledger client library is an external collaborator out of
    // scope for this crate (spec §1); this binary runs against the
    // deterministic fake so it stays runnable standalone. A production
    // deployment links its own `LedgerAdapter` against the lib crate.
    let ledger: Arc<dyn LedgerAdapter> = Arc::new(FakeLedger::new());
    ledger.pay(&local_address, STARTUP_FUNDING_AMOUNT).await?;

    let peer_port = config.peer_port;
    let rpc_port = config.rpc_port;

    let store = Store::new();
    let ctx = NodeContext::new(store, ledger, Arc::new(signing_key), config);

    let peer_listener = TcpListener::bind(("0.0.0.0", peer_port)).await?;
    tokio::spawn(peer::server::run(peer_listener, ctx.clone()));
    info!("Listening for peers on port {peer_port}");

    let rpc_listener = TcpListener::bind(("0.0.0.0", rpc_port)).await?;
    info!("Operator facade listening on port {rpc_port}");
    let app = handlers::create_router(ctx);
    axum::serve(rpc_listener, app).await?;

    Ok(())
}
