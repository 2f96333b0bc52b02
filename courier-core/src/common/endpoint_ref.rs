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
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::common::RpcEnv;
use crate::message::{RequestMessage, RpcAddress, RpcError};
use crate::traits::TransportClient;

/// Location-transparent handle to an endpoint.
///
/// A reference names an endpoint within an environment and carries the
/// address that environment listens on; equality and hashing are structural
/// over `(name, address)`. Sending through a reference routes into the local
/// dispatcher or the destination's outbox, decided by comparing the
/// reference's address with the local listen address.
///
/// A reference may additionally carry a pre-bound transport client, used for
/// ephemeral client-side endpoints with no listen address; messages then
/// bypass the outbox registry and write directly to that client.
#[derive(Clone)]
pub struct RpcEndpointRef {
    name: Arc<str>,
    address: RpcAddress,
    env: RpcEnv,
    client: Option<Arc<dyn TransportClient>>,
}

impl RpcEndpointRef {
    pub(crate) fn new(name: &str, address: RpcAddress, env: RpcEnv) -> Self {
        RpcEndpointRef {
            name: Arc::from(name),
            address,
            env,
            client: None,
        }
    }

    /// A reference reachable only over an already-established connection.
    pub(crate) fn with_client(name: &str, client: Arc<dyn TransportClient>, env: RpcEnv) -> Self {
        RpcEndpointRef {
            name: Arc::from(name),
            address: client.remote_address(),
            env,
            client: Some(client),
        }
    }

    /// Name the endpoint is registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Listen address of the environment owning the endpoint.
    pub fn address(&self) -> &RpcAddress {
        &self.address
    }

    pub(crate) fn client(&self) -> Option<&Arc<dyn TransportClient>> {
        self.client.as_ref()
    }

    /// Sends a fire-and-forget message to the endpoint.
    pub fn send(&self, payload: Bytes) -> Result<(), RpcError> {
        self.env.send(RequestMessage {
            sender: self.env.sender_address(),
            receiver: self.clone(),
            payload,
        })
    }

    /// Sends a request and returns the future of its reply.
    ///
    /// The caller never blocks inside the runtime; dropping the future
    /// cancels the ask, and a reply arriving afterwards is discarded.
    pub fn ask(&self, payload: Bytes) -> AskFuture {
        self.env.ask(RequestMessage {
            sender: self.env.sender_address(),
            receiver: self.clone(),
            payload,
        })
    }

    /// [`RpcEndpointRef::ask`] with a deadline; elapse yields
    /// [`RpcError::Timeout`].
    pub async fn ask_with_timeout(
        &self,
        payload: Bytes,
        timeout: Duration,
    ) -> Result<Bytes, RpcError> {
        match tokio::time::timeout(timeout, self.ask(payload)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::Timeout),
        }
    }
}

impl PartialEq for RpcEndpointRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.address == other.address
    }
}

impl Eq for RpcEndpointRef {}

impl Hash for RpcEndpointRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.address.hash(state);
    }
}

impl fmt::Debug for RpcEndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEndpointRef")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("bound_client", &self.client.is_some())
            .finish()
    }
}

impl fmt::Display for RpcEndpointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.name, self.address)
    }
}

/// Future of an `ask` reply.
///
/// Resolves with the response payload or the error the reply context was
/// failed with. Dropping it cancels the ask: a later fulfilment of the
/// context becomes a traced no-op.
pub struct AskFuture {
    rx: oneshot::Receiver<Result<Bytes, RpcError>>,
}

impl AskFuture {
    pub(crate) fn new(rx: oneshot::Receiver<Result<Bytes, RpcError>>) -> Self {
        AskFuture { rx }
    }
}

impl Future for AskFuture {
    type Output = Result<Bytes, RpcError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|received| match received {
            Ok(outcome) => outcome,
            Err(_) => Err(RpcError::TransportFailure(
                "reply context dropped without a response".into(),
            )),
        })
    }
}
