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

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::message::{ResponseCallback, RpcAddress, RpcError};

/// A connection to one remote environment.
///
/// Each client is owned by at most one outbox (or one bound reference) at a
/// time; the outbox drain is the only writer, so implementations may assume
/// calls are not raced for a given message stream.
#[async_trait]
pub trait TransportClient: Send + Sync + Debug {
    /// Sends a request body and registers `callback` for its response.
    ///
    /// The callback observes either the response bytes or a transport error,
    /// exactly once, even when the write path itself fails. An `Err` return
    /// reports the write failure so the caller can retire the connection.
    async fn send_rpc(&self, body: Bytes, callback: ResponseCallback) -> Result<(), RpcError>;

    /// Sends a fire-and-forget body.
    async fn send_oneway(&self, body: Bytes) -> Result<(), RpcError>;

    /// Address of the remote peer.
    fn remote_address(&self) -> RpcAddress;

    /// Whether the connection is still usable.
    fn is_active(&self) -> bool;

    /// Tears the connection down; pending response callbacks fail.
    fn close(&self);
}

/// Creates transport clients; used by outbox connect tasks.
#[async_trait]
pub trait TransportClientFactory: Send + Sync + Debug {
    /// Establishes a connection to `address`.
    async fn create_client(
        &self,
        address: &RpcAddress,
    ) -> Result<Arc<dyn TransportClient>, RpcError>;
}
