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

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{error, warn};

use crate::message::{ReplyContext, RpcAddress, RpcError};

/// A named actor owning single-threaded state.
///
/// The runtime guarantees that no two callbacks of the same endpoint run
/// concurrently and that messages are delivered in the exact order they were
/// posted. Callbacks run on dispatcher worker tasks; an endpoint that needs
/// mutable state keeps it behind its own interior mutability, which is never
/// contended thanks to the exclusivity guarantee.
///
/// A callback returning `Err` routes the error to [`RpcEndpoint::on_error`];
/// the endpoint keeps running and, for requests, a reply context the callback
/// left unfulfilled is failed on its behalf.
#[async_trait]
pub trait RpcEndpoint: Send + Sync + 'static {
    /// Runs once, before any other delivery. Traffic posted earlier is held
    /// and delivered afterwards in order.
    async fn on_start(&self) -> Result<(), RpcError> {
        Ok(())
    }

    /// Runs once, after the last delivered message. Nothing is delivered
    /// afterwards.
    async fn on_stop(&self) -> Result<(), RpcError> {
        Ok(())
    }

    /// A remote peer connected to this environment.
    async fn on_connected(&self, remote: RpcAddress) -> Result<(), RpcError> {
        let _ = remote;
        Ok(())
    }

    /// A remote peer disconnected from this environment.
    async fn on_disconnected(&self, remote: RpcAddress) -> Result<(), RpcError> {
        let _ = remote;
        Ok(())
    }

    /// Traffic to or from `remote` failed.
    async fn on_network_error(&self, remote: RpcAddress, error: RpcError) -> Result<(), RpcError> {
        let _ = (remote, error);
        Ok(())
    }

    /// Handles a fire-and-forget message.
    async fn receive(&self, sender: RpcAddress, payload: Bytes) -> Result<(), RpcError> {
        let _ = payload;
        warn!(%sender, "endpoint does not handle one-way messages; dropping");
        Ok(())
    }

    /// Handles a request. Exactly one of `reply.reply` / `reply.fail` must be
    /// invoked; leaving the context untouched makes the runtime fail it.
    async fn receive_and_reply(
        &self,
        sender: RpcAddress,
        payload: Bytes,
        reply: ReplyContext,
    ) -> Result<(), RpcError> {
        let _ = (sender, payload);
        reply.fail(RpcError::HandlerFailure(
            "endpoint does not answer asks".into(),
        ));
        Ok(())
    }

    /// Invoked when one of the callbacks above returned an error.
    async fn on_error(&self, error: RpcError) {
        error!(%error, "endpoint callback failed");
    }
}
