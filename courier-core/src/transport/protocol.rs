/*
 * Copyright (c) 2024. Govcraft
 *
 * Licensed under either of
 *   * Apache License, Version 2.0 (the "License");
 *     you may not use this file except in compliance with the License.
 *     You may obtain a copy of the License at http://www.apache.org/licenses/LICENSE-2.0
 *   * MIT license: http://opensource.org/licenses/MIT
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the applicable License for the specific language governing permissions and
 * limitations under that License.
 */

//! Wire protocol for message framing.
//!
//! # Wire Format
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ Frame Length (4 bytes, big-endian u32, excludes this field)   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Protocol Version (1 byte, currently 0x01)                     │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Message Type (1 byte)                                         │
//! │   0x01 = RPC request       0x02 = One-way                     │
//! │   0x03 = RPC response      0x04 = RPC failure                 │
//! │   0x05 = Auth bootstrap                                       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Request Id (8 bytes, big-endian u64; 0 when not an RPC)       │
//! ├───────────────────────────────────────────────────────────────┤
//! │ Body (remaining bytes)                                        │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Request bodies carry their own addressing header ahead of the payload:
//! a `u32` length, a JSON [`RequestHeader`], then the raw payload bytes.
//! Response bodies are the raw payload; failure bodies are UTF-8 error text.

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::message::{RpcAddress, RpcError};

/// Protocol version byte.
pub(crate) const PROTOCOL_VERSION: u8 = 0x01;

/// Message type: RPC request (expects a response under the same id).
pub(crate) const MSG_TYPE_RPC_REQUEST: u8 = 0x01;

/// Message type: fire-and-forget.
pub(crate) const MSG_TYPE_ONE_WAY: u8 = 0x02;

/// Message type: RPC response.
pub(crate) const MSG_TYPE_RPC_RESPONSE: u8 = 0x03;

/// Message type: RPC failure; body is UTF-8 error text.
pub(crate) const MSG_TYPE_RPC_FAILURE: u8 = 0x04;

/// Message type: auth bootstrap; body is the UTF-8 shared secret.
pub(crate) const MSG_TYPE_AUTH: u8 = 0x05;

/// Bytes counted by the length field before the body: version, type, id.
pub(crate) const FRAME_OVERHEAD: usize = 10;

/// Maximum frame size (16 MiB hard limit).
pub(crate) const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// One decoded frame.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) msg_type: u8,
    pub(crate) request_id: u64,
    pub(crate) body: Bytes,
}

/// Encodes a frame ready to be written to a stream.
pub(crate) fn encode_frame(msg_type: u8, request_id: u64, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + FRAME_OVERHEAD + body.len());
    buf.put_u32((FRAME_OVERHEAD + body.len()) as u32);
    buf.put_u8(PROTOCOL_VERSION);
    buf.put_u8(msg_type);
    buf.put_u64(request_id);
    buf.put_slice(body);
    buf.freeze()
}

/// Reads one frame from the stream.
///
/// `Ok(None)` is an orderly close at a frame boundary; EOF mid-frame and
/// protocol violations are errors.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let length = u32::from_be_bytes(len_buf) as usize;
    if !(FRAME_OVERHEAD..=MAX_FRAME_SIZE).contains(&length) {
        return Err(RpcError::TransportFailure(format!(
            "invalid frame length: {length}"
        )));
    }

    let mut frame = vec![0u8; length];
    reader.read_exact(&mut frame).await?;

    let version = frame[0];
    if version != PROTOCOL_VERSION {
        return Err(RpcError::TransportFailure(format!(
            "unsupported protocol version: {version}, expected {PROTOCOL_VERSION}"
        )));
    }
    let msg_type = frame[1];
    if !matches!(
        msg_type,
        MSG_TYPE_RPC_REQUEST
            | MSG_TYPE_ONE_WAY
            | MSG_TYPE_RPC_RESPONSE
            | MSG_TYPE_RPC_FAILURE
            | MSG_TYPE_AUTH
    ) {
        return Err(RpcError::TransportFailure(format!(
            "unknown message type: {msg_type:#04x}"
        )));
    }
    let mut id_buf = [0u8; 8];
    id_buf.copy_from_slice(&frame[2..FRAME_OVERHEAD]);

    Ok(Some(Frame {
        msg_type,
        request_id: u64::from_be_bytes(id_buf),
        body: Bytes::from(frame).slice(FRAME_OVERHEAD..),
    }))
}

/// Addressing header preceding the payload in request bodies.
///
/// `sender: None` marks a client-only environment with no listen address.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RequestHeader {
    pub(crate) sender: Option<RpcAddress>,
    pub(crate) endpoint: String,
}

/// Builds a request body: header length, JSON header, payload.
pub(crate) fn encode_request_body(
    sender: &RpcAddress,
    endpoint: &str,
    payload: &[u8],
) -> Result<Bytes, RpcError> {
    let header = RequestHeader {
        sender: (!sender.is_client_only()).then(|| sender.clone()),
        endpoint: endpoint.to_string(),
    };
    let header_json = serde_json::to_vec(&header)?;
    let mut buf = BytesMut::with_capacity(4 + header_json.len() + payload.len());
    buf.put_u32(header_json.len() as u32);
    buf.put_slice(&header_json);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Splits a request body into its header and payload.
pub(crate) fn decode_request_body(body: &Bytes) -> Result<(RequestHeader, Bytes), RpcError> {
    if body.len() < 4 {
        return Err(RpcError::TransportFailure("truncated request body".into()));
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&body[0..4]);
    let payload_start = 4 + u32::from_be_bytes(len_buf) as usize;
    if body.len() < payload_start {
        return Err(RpcError::TransportFailure(
            "truncated request header".into(),
        ));
    }
    let header: RequestHeader = serde_json::from_slice(&body[4..payload_start])?;
    Ok((header, body.slice(payload_start..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trips() {
        let encoded = encode_frame(MSG_TYPE_RPC_REQUEST, 42, b"hello");
        let mut reader = encoded.as_ref();
        let frame = read_frame(&mut reader).await.unwrap().unwrap();
        assert_eq!(frame.msg_type, MSG_TYPE_RPC_REQUEST);
        assert_eq!(frame.request_id, 42);
        assert_eq!(frame.body.as_ref(), b"hello");
        assert!(read_frame(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_rejects_unknown_version() {
        let mut encoded = encode_frame(MSG_TYPE_ONE_WAY, 0, b"x").to_vec();
        encoded[4] = 0x7f;
        let mut reader = encoded.as_slice();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(RpcError::TransportFailure(_))
        ));
    }

    #[test]
    fn request_body_round_trips() {
        let sender = RpcAddress::new("10.0.0.7", 7077);
        let body = encode_request_body(&sender, "worker", b"payload").unwrap();
        let (header, payload) = decode_request_body(&body).unwrap();
        assert_eq!(header.sender, Some(sender));
        assert_eq!(header.endpoint, "worker");
        assert_eq!(payload.as_ref(), b"payload");
    }

    #[test]
    fn client_only_sender_is_elided() {
        let body =
            encode_request_body(&RpcAddress::client_only(), "worker", b"payload").unwrap();
        let (header, _) = decode_request_body(&body).unwrap();
        assert_eq!(header.sender, None);
    }
}
