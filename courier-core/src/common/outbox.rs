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

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use tracing::{debug, instrument, trace, warn};

use crate::common::EnvInner;
use crate::message::{InboxMessage, OutboxMessage, RpcAddress, RpcError};
use crate::traits::TransportClient;

/// Connection lifecycle of an outbox.
enum ConnectionState {
    /// No client, no connect attempt in flight.
    Idle,
    /// A connect task has been submitted; the queue may accumulate.
    Connecting,
    /// A client is installed; the drain writes to it.
    Live(Arc<dyn TransportClient>),
    /// Terminal: the queue has been failed and sends fail immediately.
    Stopped,
}

/// Per-remote-address outbound queue.
///
/// Serializes messages to one remote environment over a transport client
/// that may not exist yet. Items reach the transport strictly in `send`
/// order; exactly one drain runs at any instant, and at most one connect
/// attempt is ever in flight. The lock is held only across queue and state
/// manipulation, never across a transport write.
pub(crate) struct Outbox {
    address: RpcAddress,
    env: Weak<EnvInner>,
    state: Mutex<OutboxState>,
}

struct OutboxState {
    queue: VecDeque<OutboxMessage>,
    connection: ConnectionState,
    draining: bool,
}

/// What `advance` decided to launch, chosen under the lock and executed
/// outside it.
enum Action {
    Drain(Arc<dyn TransportClient>),
    Connect,
    Nothing,
}

impl Outbox {
    pub(crate) fn new(env: Weak<EnvInner>, address: RpcAddress) -> Self {
        Outbox {
            address,
            env,
            state: Mutex::new(OutboxState {
                queue: VecDeque::new(),
                connection: ConnectionState::Idle,
                draining: false,
            }),
        }
    }

    /// Enqueues an item, launching the drain or the connect attempt the
    /// current state calls for. A stopped outbox fails the item immediately.
    pub(crate) fn send(self: Arc<Self>, message: OutboxMessage) {
        let rejected = {
            let mut state = self.lock();
            if matches!(state.connection, ConnectionState::Stopped) {
                Some(message)
            } else {
                state.queue.push_back(message);
                None
            }
        };
        if let Some(message) = rejected {
            message.fail(RpcError::TransportFailure(format!(
                "outbox for {} is stopped",
                self.address
            )));
            return;
        }
        self.advance();
    }

    /// Launches whatever the state machine permits: a drain when live and
    /// not already draining, a connect when idle. Queued items never start a
    /// second connect and never race two drains.
    fn advance(self: Arc<Self>) {
        let action = {
            let mut state = self.lock();
            if state.queue.is_empty() || state.draining {
                Action::Nothing
            } else {
                match state.connection {
                    ConnectionState::Live(ref client) => {
                        let client = Arc::clone(client);
                        state.draining = true;
                        Action::Drain(client)
                    }
                    ConnectionState::Idle => {
                        state.connection = ConnectionState::Connecting;
                        Action::Connect
                    }
                    _ => Action::Nothing,
                }
            }
        };
        match action {
            Action::Drain(client) => {
                tokio::spawn(self.drain(client));
            }
            Action::Connect => {
                tokio::spawn(self.connect());
            }
            Action::Nothing => {}
        }
    }

    /// The single drain loop: pop under the lock, write outside it.
    async fn drain(self: Arc<Self>, client: Arc<dyn TransportClient>) {
        loop {
            let message = {
                let mut state = self.lock();
                match state.queue.pop_front() {
                    Some(message) => message,
                    None => {
                        state.draining = false;
                        return;
                    }
                }
            };
            trace!(address = %self.address, ?message, "draining outbox message");
            if let Err(error) = message.send_with(&client).await {
                self.handle_transport_failure(error);
                return;
            }
        }
    }

    /// Connect task: at most one per outbox, gated by the environment's
    /// connect permits.
    #[instrument(skip(self), fields(address = %self.address))]
    async fn connect(self: Arc<Self>) {
        let Some(env) = self.env.upgrade() else {
            return;
        };
        let Ok(_permit) = Arc::clone(&env.connect_permits).acquire_owned().await else {
            return;
        };
        debug!("connecting to remote environment");
        match env.client_factory.create_client(&self.address).await {
            Ok(client) => {
                let install = {
                    let mut state = self.lock();
                    match state.connection {
                        ConnectionState::Stopped => false,
                        _ => {
                            state.connection = ConnectionState::Live(Arc::clone(&client));
                            true
                        }
                    }
                };
                if !install {
                    client.close();
                    return;
                }
                drop(env);
                self.advance();
            }
            Err(error) => {
                warn!(%error, "connect attempt failed");
                self.handle_transport_failure(error);
            }
        }
    }

    /// A transport failure is terminal for this outbox: drop the client,
    /// fail everything still queued, evict the outbox from the environment
    /// (so the next send constructs a fresh one), and tell local endpoints.
    fn handle_transport_failure(&self, error: RpcError) {
        let (client, pending) = {
            let mut state = self.lock();
            let client = match std::mem::replace(&mut state.connection, ConnectionState::Stopped) {
                ConnectionState::Live(client) => Some(client),
                _ => None,
            };
            state.draining = false;
            (client, std::mem::take(&mut state.queue))
        };
        warn!(address = %self.address, %error, pending = pending.len(), "outbox failed");
        for message in pending {
            message.fail(error.clone());
        }
        if let Some(client) = client {
            client.close();
        }
        if let Some(env) = self.env.upgrade() {
            env.outboxes.remove(&self.address);
            env.dispatcher
                .post_to_all(InboxMessage::RemoteFailure(self.address.clone(), error));
        }
    }

    /// Terminal stop: fails the queue, closes the client, and detaches from
    /// the environment's registry.
    pub(crate) fn stop(&self) {
        let (client, pending) = {
            let mut state = self.lock();
            if matches!(state.connection, ConnectionState::Stopped) {
                return;
            }
            let client = match std::mem::replace(&mut state.connection, ConnectionState::Stopped) {
                ConnectionState::Live(client) => Some(client),
                _ => None,
            };
            state.draining = false;
            (client, std::mem::take(&mut state.queue))
        };
        debug!(address = %self.address, pending = pending.len(), "stopping outbox");
        for message in pending {
            message.fail(RpcError::TransportFailure(format!(
                "outbox for {} is stopped",
                self.address
            )));
        }
        if let Some(client) = client {
            client.close();
        }
        if let Some(env) = self.env.upgrade() {
            env.outboxes.remove(&self.address);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, OutboxState> {
        self.state.lock().expect("outbox lock poisoned")
    }
}
