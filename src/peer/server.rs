// peer/server.rs - accept loop and per-connection handling (spec §4.5)

use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::model::{PeerRequest, PeerResponse};
use crate::peer::codec;
use crate::state_machine::{self, NodeContext};

/// Runs the peer-protocol accept loop forever; one task per connection
/// (spec §5: "one accept-loop task per listener").
pub async fn run(listener: TcpListener, ctx: NodeContext) {
    info!(local_addr = ?listener.local_addr().ok(), "listening for peers");
    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, remote.ip().to_string(), ctx).await {
                        warn!(error = %e, "peer connection failed");
                    }
                });
            }
            Err(e) => warn!(error = %e, "failed to accept peer connection"),
        }
    }
}

async fn handle_connection(mut stream: TcpStream, remote_host: String, ctx: NodeContext) -> Result<(), crate::error::NodeError> {
    let payload = codec::read_frame(&mut stream).await?;

    let response = match serde_json::from_slice::<PeerRequest>(&payload) {
        Ok(request) => state_machine::handle_peer_request(&ctx, &remote_host, request).await,
        Err(e) => {
            warn!(error = %e, "malformed peer request, replying empty");
            PeerResponse { message: String::new(), data: Vec::new() }
        }
    };
    write_response(&mut stream, &response).await
}

async fn write_response(stream: &mut TcpStream, response: &PeerResponse) -> Result<(), crate::error::NodeError> {
    let body = serde_json::to_vec(response)
        .map_err(|e| crate::error::NodeError::ProtocolDecode(format!("failed to encode response: {e}")))?;
    codec::write_frame(stream, &body).await
}
