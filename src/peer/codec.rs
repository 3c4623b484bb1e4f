// peer/codec.rs - length-prefixed framing shared by the server and client
// (spec §9 open question on message framing).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::NodeError;

/// Upper bound on a single framed message, generous for any signature or
/// address but small enough that a misbehaving peer can't force an
/// unbounded allocation.
const MAX_FRAME_BYTES: u32 = 1 << 20;

pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<(), NodeError> {
    let len = u32::try_from(payload.len()).map_err(|_| NodeError::ProtocolDecode("message too large to frame".into()))?;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| NodeError::ProtocolDecode(format!("failed writing frame length: {e}")))?;
    writer
        .write_all(payload)
        .await
        .map_err(|e| NodeError::ProtocolDecode(format!("failed writing frame body: {e}")))?;
    writer
        .flush()
        .await
        .map_err(|e| NodeError::ProtocolDecode(format!("failed flushing connection: {e}")))
}

pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Vec<u8>, NodeError> {
    let mut len_bytes = [0u8; 4];
    reader
        .read_exact(&mut len_bytes)
        .await
        .map_err(|e| NodeError::ProtocolDecode(format!("failed reading frame length: {e}")))?;
    let len = u32::from_be_bytes(len_bytes);
    if len > MAX_FRAME_BYTES {
        return Err(NodeError::ProtocolDecode(format!("frame of {len} bytes exceeds the {MAX_FRAME_BYTES}-byte limit")));
    }

    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(|e| NodeError::ProtocolDecode(format!("failed reading frame body: {e}")))?;
    Ok(payload)
}
