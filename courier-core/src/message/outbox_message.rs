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

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::message::RpcError;
use crate::traits::TransportClient;

/// Callback fulfilled with the response bytes of an RPC, or with the
/// transport error that prevented one. Invoked exactly once.
pub type ResponseCallback = Box<dyn FnOnce(Result<Bytes, RpcError>) + Send + 'static>;

/// An item queued in a per-remote-address outbox.
///
/// The body bytes are the already-serialized request; serialization happens
/// once, when the message is routed, never during the drain.
pub(crate) enum OutboxMessage {
    /// Fire-and-forget; no callback.
    OneWay { body: Bytes },
    /// Request expecting a response through its callback.
    Rpc {
        body: Bytes,
        callback: ResponseCallback,
    },
    /// Existence probe for the remote verifier; carries its own callback.
    CheckExistence {
        name: String,
        body: Bytes,
        callback: ResponseCallback,
    },
}

impl OutboxMessage {
    /// Hands the item to a live transport client.
    ///
    /// An `Err` means the write path failed; callbacks carried by the item
    /// have already been fulfilled with the failure by then.
    pub(crate) async fn send_with(self, client: &Arc<dyn TransportClient>) -> Result<(), RpcError> {
        match self {
            OutboxMessage::OneWay { body } => client.send_oneway(body).await,
            OutboxMessage::Rpc { body, callback } => client.send_rpc(body, callback).await,
            OutboxMessage::CheckExistence { name, body, callback } => {
                trace!(%name, "probing remote verifier");
                client.send_rpc(body, callback).await
            }
        }
    }

    /// Fails the item without sending it: the callback, when present,
    /// observes the error; one-way items are dropped with a trace.
    pub(crate) fn fail(self, error: RpcError) {
        match self {
            OutboxMessage::OneWay { .. } => {
                trace!(%error, "dropping one-way outbox message");
            }
            OutboxMessage::Rpc { callback, .. } => callback(Err(error)),
            OutboxMessage::CheckExistence { callback, .. } => callback(Err(error)),
        }
    }
}

impl fmt::Debug for OutboxMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutboxMessage::OneWay { body } => {
                f.debug_struct("OneWay").field("len", &body.len()).finish()
            }
            OutboxMessage::Rpc { body, .. } => {
                f.debug_struct("Rpc").field("len", &body.len()).finish()
            }
            OutboxMessage::CheckExistence { name, .. } => f
                .debug_struct("CheckExistence")
                .field("name", name)
                .finish(),
        }
    }
}
