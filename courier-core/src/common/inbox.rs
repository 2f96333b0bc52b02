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
use std::sync::{Arc, Mutex};

use tracing::{instrument, trace};

use crate::common::dispatcher::{Dispatcher, EndpointEntry};
use crate::message::{InboxMessage, RpcError};

/// Per-endpoint FIFO mailbox and lifecycle state machine.
///
/// Many producers feed the queue; the dispatcher's workers consume it one
/// item per visit. The lock is held only across queue manipulation, never
/// across an endpoint callback. `num_active_threads` keeps delivery
/// single-consumer: a worker that finds another delivery in flight treats the
/// wake as spurious and returns, and the active worker re-schedules the inbox
/// when items remain.
pub(crate) struct Inbox {
    state: Mutex<InboxState>,
}

struct InboxState {
    messages: VecDeque<InboxMessage>,
    /// Set once `on_start` has run.
    enabled: bool,
    /// Set by the stop protocol; rejects further posts.
    stopped: bool,
    /// Concurrent `process` invocations; at most one delivers.
    num_active_threads: usize,
    /// Set once the post-`on_stop` drain completed.
    finished: bool,
}

impl Inbox {
    /// Creates the inbox with `OnStart` already queued, so the endpoint only
    /// begins receiving normal traffic after its `on_start` has run.
    pub(crate) fn new() -> Self {
        let mut messages = VecDeque::new();
        messages.push_back(InboxMessage::OnStart);
        Inbox {
            state: Mutex::new(InboxState {
                messages,
                enabled: false,
                stopped: false,
                num_active_threads: 0,
                finished: false,
            }),
        }
    }

    /// Appends an item unless the inbox has stopped.
    ///
    /// Posts racing the stop protocol resolve at the lock: a post that lost
    /// fails its reply context with [`RpcError::EndpointStopped`] (one-way
    /// items are silently dropped).
    pub(crate) fn post(&self, endpoint_name: &str, message: InboxMessage) {
        let rejected = {
            let mut state = self.lock();
            if state.stopped {
                Some(message)
            } else {
                state.messages.push_back(message);
                None
            }
        };
        if let Some(message) = rejected {
            Self::reject(endpoint_name, message);
        }
    }

    fn reject(endpoint_name: &str, message: InboxMessage) {
        match message {
            InboxMessage::Rpc { reply, .. } => {
                reply.fail(RpcError::EndpointStopped(endpoint_name.to_string()));
            }
            other => trace!(
                endpoint = endpoint_name,
                message = ?other,
                "dropping message posted to stopped inbox"
            ),
        }
    }

    /// Initiates the stop protocol: no further posts are accepted and
    /// `OnStop` is appended behind everything already queued. Returns whether
    /// this call was the one that initiated it.
    pub(crate) fn stop(&self) -> bool {
        let mut state = self.lock();
        if state.stopped {
            return false;
        }
        state.stopped = true;
        state.messages.push_back(InboxMessage::OnStop);
        true
    }

    /// Delivers at most one item to the endpoint.
    ///
    /// Called by a worker that pulled this inbox's entry from the
    /// ready-queue. An empty queue or a delivery already in flight makes the
    /// wake a no-op; otherwise the item is dispatched outside the lock and
    /// the inbox re-schedules itself when items remain.
    #[instrument(skip_all, fields(endpoint = %entry.name))]
    pub(crate) async fn process(&self, entry: &Arc<EndpointEntry>, dispatcher: &Dispatcher) {
        let message = {
            let mut state = self.lock();
            if state.finished || state.num_active_threads != 0 {
                return;
            }
            let Some(message) = state.messages.pop_front() else {
                return;
            };
            if !matches!(message, InboxMessage::OnStart) {
                debug_assert!(state.enabled, "traffic delivered before on_start");
            }
            state.num_active_threads += 1;
            message
        };

        let mut finish = false;
        match message {
            InboxMessage::OnStart => {
                trace!("starting endpoint");
                if let Err(error) = entry.endpoint.on_start().await {
                    entry.endpoint.on_error(error).await;
                }
                self.lock().enabled = true;
            }
            InboxMessage::OnStop => {
                trace!("stopping endpoint");
                if let Err(error) = entry.endpoint.on_stop().await {
                    entry.endpoint.on_error(error).await;
                }
                finish = true;
            }
            InboxMessage::OneWay { sender, payload } => {
                if let Err(error) = entry.endpoint.receive(sender, payload).await {
                    entry.endpoint.on_error(error).await;
                }
            }
            InboxMessage::Rpc {
                sender,
                payload,
                reply,
            } => {
                // Shadow the capability: if the handler bails without
                // answering, the context still gets failed exactly once.
                let shadow = reply.clone();
                if let Err(error) = entry.endpoint.receive_and_reply(sender, payload, reply).await {
                    shadow.fail(error.clone());
                    entry.endpoint.on_error(error).await;
                }
            }
            InboxMessage::RemoteConnected(remote) => {
                if let Err(error) = entry.endpoint.on_connected(remote).await {
                    entry.endpoint.on_error(error).await;
                }
            }
            InboxMessage::RemoteDisconnected(remote) => {
                if let Err(error) = entry.endpoint.on_disconnected(remote).await {
                    entry.endpoint.on_error(error).await;
                }
            }
            InboxMessage::RemoteFailure(remote, failure) => {
                if let Err(error) = entry.endpoint.on_network_error(remote, failure).await {
                    entry.endpoint.on_error(error).await;
                }
            }
        }

        if finish {
            self.drain(entry);
            self.lock().num_active_threads -= 1;
            dispatcher.remove_entry(entry);
            return;
        }

        let reschedule = {
            let mut state = self.lock();
            state.num_active_threads -= 1;
            !state.messages.is_empty()
        };
        if reschedule {
            dispatcher.enqueue(entry.clone());
        }
    }

    /// Empties whatever is still queued after `on_stop` ran, failing pending
    /// reply contexts.
    fn drain(&self, entry: &Arc<EndpointEntry>) {
        let leftover = {
            let mut state = self.lock();
            state.finished = true;
            std::mem::take(&mut state.messages)
        };
        for message in leftover {
            Self::reject(&entry.name, message);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InboxState> {
        self.state.lock().expect("inbox lock poisoned")
    }
}
