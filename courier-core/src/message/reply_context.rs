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
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::trace;

use crate::message::{ResponseCallback, RpcAddress, RpcError};

/// Where a fulfilment ends up: an in-process ask future or a transport-layer
/// response callback.
enum ReplySink {
    Local(oneshot::Sender<Result<Bytes, RpcError>>),
    Remote(ResponseCallback),
}

/// Single-shot capability for answering an RPC.
///
/// Exactly one of [`ReplyContext::reply`] and [`ReplyContext::fail`] is
/// observed per context. Both consume the capability; the sink behind it is
/// taken on first use, so a clone held by the runtime (to fail a context the
/// endpoint left unfulfilled) becomes a no-op once the endpoint has answered.
///
/// A *local* context completes the future returned by a local `ask`; a
/// *remote* context adapts the reply into the transport response callback.
#[derive(Clone)]
pub struct ReplyContext {
    sender: RpcAddress,
    sink: Arc<Mutex<Option<ReplySink>>>,
}

impl ReplyContext {
    pub(crate) fn local(
        sender: RpcAddress,
        tx: oneshot::Sender<Result<Bytes, RpcError>>,
    ) -> Self {
        ReplyContext {
            sender,
            sink: Arc::new(Mutex::new(Some(ReplySink::Local(tx)))),
        }
    }

    pub(crate) fn remote(sender: RpcAddress, callback: ResponseCallback) -> Self {
        ReplyContext {
            sender,
            sink: Arc::new(Mutex::new(Some(ReplySink::Remote(callback)))),
        }
    }

    /// Address of the environment that issued the request.
    pub fn sender_address(&self) -> &RpcAddress {
        &self.sender
    }

    /// Completes the RPC with a response payload.
    pub fn reply(self, payload: Bytes) {
        self.fulfil(Ok(payload));
    }

    /// Completes the RPC with an error.
    pub fn fail(self, error: RpcError) {
        self.fulfil(Err(error));
    }

    fn fulfil(self, outcome: Result<Bytes, RpcError>) {
        let sink = self.sink.lock().expect("reply context lock poisoned").take();
        match sink {
            Some(ReplySink::Local(tx)) => {
                // The receiver side is dropped when the ask was cancelled.
                if tx.send(outcome).is_err() {
                    trace!(sender = %self.sender, "ask future dropped before completion");
                }
            }
            Some(ReplySink::Remote(callback)) => callback(outcome),
            None => trace!(sender = %self.sender, "reply context already fulfilled"),
        }
    }
}

impl fmt::Debug for ReplyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyContext")
            .field("sender", &self.sender)
            .finish_non_exhaustive()
    }
}
