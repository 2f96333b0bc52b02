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

use bytes::Bytes;

use crate::common::RpcEndpointRef;
use crate::message::{RpcAddress, RpcError};
use crate::transport::protocol;

/// A routed message: who sent it, which endpoint receives it, and the opaque
/// payload.
///
/// The sender is always the local environment's listen address, or the
/// client-only sentinel when the environment runs without a server.
#[derive(Debug, Clone)]
pub struct RequestMessage {
    /// Listen address of the sending environment.
    pub sender: RpcAddress,
    /// Reference to the receiving endpoint.
    pub receiver: RpcEndpointRef,
    /// Opaque payload bytes.
    pub payload: Bytes,
}

impl RequestMessage {
    /// Serializes the message into the wire body handed to an outbox.
    ///
    /// Called exactly once per remote send; the drain writes the resulting
    /// bytes verbatim.
    pub(crate) fn serialize(&self) -> Result<Bytes, RpcError> {
        protocol::encode_request_body(&self.sender, self.receiver.name(), &self.payload)
    }
}
