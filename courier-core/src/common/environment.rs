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
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use dashmap::DashMap;
use tokio::sync::{oneshot, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::common::outbox::Outbox;
use crate::common::verifier::{self, EndpointVerifier, ENDPOINT_VERIFIER_NAME};
use crate::common::{AskFuture, Dispatcher, RpcConfig, RpcEndpointRef};
use crate::message::{
    OutboxMessage, RequestMessage, ResponseCallback, RpcAddress, RpcError,
};
use crate::traits::{RpcEndpoint, TransportClient, TransportClientFactory};
use crate::transport::{TcpClientFactory, TransportServer};

/// Top-level facade of the RPC runtime.
///
/// Owns the dispatcher and its worker pool, the per-address outbox registry,
/// the connect and deliver permit pools, and (once started) the transport
/// server. Cloning is cheap; clones share the same environment.
#[derive(Clone)]
pub struct RpcEnv {
    pub(crate) inner: Arc<EnvInner>,
}

pub(crate) struct EnvInner {
    pub(crate) config: RpcConfig,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) outboxes: DashMap<RpcAddress, Arc<Outbox>>,
    pub(crate) client_factory: Arc<dyn TransportClientFactory>,
    /// Caps concurrent outbound connect attempts.
    pub(crate) connect_permits: Arc<Semaphore>,
    /// Caps concurrent local-ask deliveries.
    deliver_permits: Arc<Semaphore>,
    server: Mutex<Option<TransportServer>>,
    listen_address: OnceLock<RpcAddress>,
    stopped: AtomicBool,
}

impl EnvInner {
    /// Evicts and stops the outbox for `address`, if any. The next send to
    /// that address constructs a fresh one.
    pub(crate) fn remove_outbox(&self, address: &RpcAddress) {
        if let Some((_, outbox)) = self.outboxes.remove(address) {
            outbox.stop();
        }
    }
}

impl RpcEnv {
    /// Creates an environment using the built-in TCP transport.
    ///
    /// Must run within a Tokio runtime: the dispatcher workers are spawned
    /// here.
    pub fn new(config: RpcConfig) -> Self {
        let factory = Arc::new(TcpClientFactory::new(&config));
        Self::with_client_factory(config, factory)
    }

    /// Creates an environment over a custom transport client factory.
    pub fn with_client_factory(
        config: RpcConfig,
        client_factory: Arc<dyn TransportClientFactory>,
    ) -> Self {
        let dispatcher = Arc::new(Dispatcher::new(&config));
        Arc::clone(&dispatcher).start();
        let connect_permits = Arc::new(Semaphore::new(config.effective_connect_threads()));
        let deliver_permits = Arc::new(Semaphore::new(config.effective_deliver_threads()));
        RpcEnv {
            inner: Arc::new(EnvInner {
                config,
                dispatcher,
                outboxes: DashMap::new(),
                client_factory,
                connect_permits,
                deliver_permits,
                server: Mutex::new(None),
                listen_address: OnceLock::new(),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Binds the transport server and eagerly registers the verifier so
    /// remote `endpoint_ref_for` calls can succeed. Returns the listen
    /// address; a port of `0` picks a free one.
    #[instrument(skip(self))]
    pub async fn start_server(&self, host: &str, port: u16) -> Result<RpcAddress, RpcError> {
        if self.is_stopped() {
            return Err(RpcError::EnvironmentStopped);
        }
        let server = TransportServer::bind(self.clone(), host, port).await?;
        let address = RpcAddress::new(host, server.port());
        if self.inner.listen_address.set(address.clone()).is_err() {
            server.shutdown().await;
            return Err(RpcError::TransportFailure(
                "server already started".into(),
            ));
        }
        *self.lock_server() = Some(server);

        let verifier = Arc::new(EndpointVerifier::new(Arc::clone(&self.inner.dispatcher)));
        self.inner
            .dispatcher
            .register(ENDPOINT_VERIFIER_NAME, verifier, self)?;
        info!(%address, "rpc environment listening");
        Ok(address)
    }

    /// Listen address, once [`RpcEnv::start_server`] has run.
    pub fn address(&self) -> Option<RpcAddress> {
        self.inner.listen_address.get().cloned()
    }

    /// Sender address stamped on outgoing messages: the listen address, or
    /// the client-only sentinel when no server was started.
    pub(crate) fn sender_address(&self) -> RpcAddress {
        self.address().unwrap_or_else(RpcAddress::client_only)
    }

    /// Registers an endpoint and returns its local reference.
    ///
    /// The verifier's name is reserved; registering under it fails.
    pub fn register(
        &self,
        name: &str,
        endpoint: Arc<dyn RpcEndpoint>,
    ) -> Result<RpcEndpointRef, RpcError> {
        if name == ENDPOINT_VERIFIER_NAME {
            return Err(RpcError::NameAlreadyRegistered(name.to_string()));
        }
        self.inner.dispatcher.register(name, endpoint, self)
    }

    /// Drives the named endpoint through its stop protocol.
    pub fn unregister(&self, name: &str) {
        self.inner.dispatcher.unregister(name);
    }

    /// Reverse lookup: the reference of a registered endpoint.
    pub fn endpoint_ref(&self, endpoint: &Arc<dyn RpcEndpoint>) -> Option<RpcEndpointRef> {
        self.inner.dispatcher.endpoint_ref(endpoint)
    }

    /// A reference to an endpoint assumed to exist at `address`, without the
    /// existence probe of [`RpcEnv::endpoint_ref_for`].
    pub fn remote_endpoint_ref(&self, name: &str, address: &RpcAddress) -> RpcEndpointRef {
        RpcEndpointRef::new(name, address.clone(), self.clone())
    }

    /// A reference reachable only through an already-established transport
    /// client, for endpoints hosted by client-only environments.
    pub fn client_endpoint_ref(
        &self,
        name: &str,
        client: Arc<dyn TransportClient>,
    ) -> RpcEndpointRef {
        RpcEndpointRef::with_client(name, client, self.clone())
    }

    /// Resolves a reference to `name` at `address`, probing the remote
    /// verifier over the network (or the local registry when `address` is
    /// this environment).
    #[instrument(skip(self))]
    pub async fn endpoint_ref_for(
        &self,
        name: &str,
        address: &RpcAddress,
    ) -> Result<RpcEndpointRef, RpcError> {
        if self.is_stopped() {
            return Err(RpcError::EnvironmentStopped);
        }
        let exists = if self.address().as_ref() == Some(address) {
            self.inner.dispatcher.contains(name)
        } else {
            let probe = verifier::encode_check_existence(name)?;
            let body = crate::transport::protocol::encode_request_body(
                &self.sender_address(),
                ENDPOINT_VERIFIER_NAME,
                &probe,
            )?;
            let (tx, rx) = oneshot::channel();
            let callback: ResponseCallback = Box::new(move |outcome| {
                let _ = tx.send(outcome);
            });
            let verifier_ref = self.remote_endpoint_ref(ENDPOINT_VERIFIER_NAME, address);
            self.post_to_outbox(
                &verifier_ref,
                OutboxMessage::CheckExistence {
                    name: name.to_string(),
                    body,
                    callback,
                },
            )?;
            let payload = match rx.await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    return Err(RpcError::TransportFailure(
                        "existence probe dropped without a response".into(),
                    ))
                }
            };
            verifier::decode_existence(&payload)?
        };
        if exists {
            Ok(self.remote_endpoint_ref(name, address))
        } else {
            Err(RpcError::NoSuchEndpoint(name.to_string()))
        }
    }

    /// Routes a fire-and-forget message.
    ///
    /// Local destinations go through the dispatcher; a missing endpoint is
    /// logged and dropped per the one-way policy. Remote destinations are
    /// serialized once and enqueued on the address's outbox.
    pub(crate) fn send(&self, message: RequestMessage) -> Result<(), RpcError> {
        if self.is_local(&message.receiver) {
            match self.inner.dispatcher.post_one_way(message) {
                Err(RpcError::NoSuchEndpoint(name)) => {
                    warn!(%name, "dropping one-way message for unknown endpoint");
                    Ok(())
                }
                other => other,
            }
        } else {
            let body = message.serialize()?;
            self.post_to_outbox(&message.receiver, OutboxMessage::OneWay { body })
        }
    }

    /// Routes a request and returns the future of its reply.
    pub(crate) fn ask(&self, message: RequestMessage) -> AskFuture {
        let (tx, rx) = oneshot::channel();
        if self.is_local(&message.receiver) {
            // Completion is isolated from the caller onto a deliver task so a
            // local endpoint replying while the runtime holds internal locks
            // cannot deadlock the asker.
            let env = self.clone();
            let permits = Arc::clone(&self.inner.deliver_permits);
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire_owned().await else {
                    return;
                };
                let reply = env.inner.dispatcher.post_local(message);
                let outcome = match reply.await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(RpcError::TransportFailure(
                        "reply context dropped without a response".into(),
                    )),
                };
                let _ = tx.send(outcome);
            });
        } else {
            match message.serialize() {
                Ok(body) => {
                    let callback: ResponseCallback = Box::new(move |outcome| {
                        let _ = tx.send(outcome);
                    });
                    // Routing failures reach the callback; nothing to raise.
                    let _ = self.post_to_outbox(
                        &message.receiver,
                        OutboxMessage::Rpc { body, callback },
                    );
                }
                Err(error) => {
                    let _ = tx.send(Err(error));
                }
            }
        }
        AskFuture::new(rx)
    }

    /// A reference is local when it has no bound client and its address is
    /// this environment's listen address (structurally), or the client-only
    /// sentinel a reference registered before `start_server` carries.
    fn is_local(&self, receiver: &RpcEndpointRef) -> bool {
        receiver.client().is_none()
            && (receiver.address().is_client_only()
                || *receiver.address() == self.sender_address())
    }

    /// Hands an outbox item to its destination: the bound client when the
    /// reference carries one, otherwise the address's outbox (created on
    /// first use).
    pub(crate) fn post_to_outbox(
        &self,
        receiver: &RpcEndpointRef,
        message: OutboxMessage,
    ) -> Result<(), RpcError> {
        if let Some(client) = receiver.client() {
            let client = Arc::clone(client);
            tokio::spawn(async move {
                if let Err(error) = message.send_with(&client).await {
                    warn!(%error, "send over bound client failed");
                }
            });
            return Ok(());
        }

        let address = receiver.address().clone();
        if address.is_client_only() {
            return Self::refuse(
                message,
                RpcError::TransportFailure(
                    "cannot route to a client-only endpoint without a bound connection".into(),
                ),
            );
        }

        let outbox = {
            let entry = self.inner.outboxes.entry(address.clone()).or_insert_with(|| {
                Arc::new(Outbox::new(Arc::downgrade(&self.inner), address.clone()))
            });
            Arc::clone(entry.value())
        };
        if self.is_stopped() {
            // Lost the race with shutdown: retire the outbox we just won.
            self.inner.remove_outbox(&address);
            return Self::refuse(message, RpcError::EnvironmentStopped);
        }
        outbox.send(message);
        Ok(())
    }

    /// One-way items raise the error; items with a callback observe it there.
    fn refuse(message: OutboxMessage, error: RpcError) -> Result<(), RpcError> {
        match message {
            OutboxMessage::OneWay { .. } => Err(error),
            other => {
                other.fail(error);
                Ok(())
            }
        }
    }

    /// Shuts the environment down: verifier unregistered, dispatcher drained,
    /// outboxes stopped, server closed. Idempotent.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down rpc environment");
        self.inner.dispatcher.unregister(ENDPOINT_VERIFIER_NAME);
        self.inner.dispatcher.stop().await;

        let addresses: Vec<RpcAddress> =
            self.inner.outboxes.iter().map(|e| e.key().clone()).collect();
        for address in addresses {
            self.inner.remove_outbox(&address);
        }

        let server = self.lock_server().take();
        if let Some(server) = server {
            server.shutdown().await;
        }
        debug!("rpc environment stopped");
    }

    /// Waits for the dispatcher workers to terminate.
    pub async fn await_termination(&self) {
        self.inner.dispatcher.await_termination().await;
    }

    pub(crate) fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.inner.dispatcher
    }

    pub(crate) fn authentication(&self) -> Option<&str> {
        if self.inner.config.authentication_enabled {
            Some(self.inner.config.auth_secret.as_str())
        } else {
            None
        }
    }

    fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    fn lock_server(&self) -> std::sync::MutexGuard<'_, Option<TransportServer>> {
        self.inner.server.lock().expect("server lock poisoned")
    }
}

impl fmt::Debug for RpcEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEnv")
            .field("address", &self.address())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
