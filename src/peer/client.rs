// peer/client.rs - dialing a peer and decoding its response (spec §4.5, component F)

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::NodeError;
use crate::model::{PeerRequest, PeerResponse};
use crate::peer::codec;

/// Deadline on the whole dial-send-receive exchange (spec §5: "impose a
/// short deadline on peer and ledger calls and surface timeouts as
/// transient errors").
const PEER_CALL_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn send_request(host: &str, request: &PeerRequest) -> Result<PeerResponse, NodeError> {
    timeout(PEER_CALL_TIMEOUT, send_request_inner(host, request))
        .await
        .map_err(|_| NodeError::LedgerFailure(format!("peer call to {host} timed out")))?
}

async fn send_request_inner(host: &str, request: &PeerRequest) -> Result<PeerResponse, NodeError> {
    let mut stream = TcpStream::connect(host)
        .await
        .map_err(|e| NodeError::LedgerFailure(format!("failed to connect to peer {host}: {e}")))?;

    let body = serde_json::to_vec(request)
        .map_err(|e| NodeError::ProtocolDecode(format!("failed to encode peer request: {e}")))?;
    codec::write_frame(&mut stream, &body).await?;

    let payload = codec::read_frame(&mut stream).await?;
    serde_json::from_slice(&payload).map_err(|e| NodeError::ProtocolDecode(format!("malformed peer response: {e}")))
}
