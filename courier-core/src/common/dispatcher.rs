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

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, trace};

use crate::common::inbox::Inbox;
use crate::common::{RpcConfig, RpcEndpointRef, RpcEnv};
use crate::message::{
    InboxMessage, ReplyContext, RequestMessage, ResponseCallback, RpcError,
};
use crate::traits::RpcEndpoint;

/// Registry slot for one endpoint: its name, the endpoint itself, the
/// reference handed back at registration, and the inbox feeding it.
///
/// Entries circulate through the ready-queue as plain handles; an entry in
/// the queue holds no resources beyond this `Arc`.
pub(crate) struct EndpointEntry {
    pub(crate) name: String,
    pub(crate) endpoint: Arc<dyn RpcEndpoint>,
    pub(crate) reference: RpcEndpointRef,
    pub(crate) inbox: Inbox,
}

/// What a worker pulls from the ready-queue: an inbox to service, or the
/// poison that tells it to exit at shutdown.
enum ReadyMessage {
    Process(Arc<EndpointEntry>),
    Poison,
}

/// Routes messages (local and network) to endpoints and schedules their
/// inboxes onto a fixed pool of worker tasks.
pub(crate) struct Dispatcher {
    endpoints: DashMap<String, Arc<EndpointEntry>>,
    /// Reverse lookup from endpoint identity to its reference.
    endpoint_refs: DashMap<usize, RpcEndpointRef>,
    ready_tx: mpsc::UnboundedSender<ReadyMessage>,
    /// Workers race on this receiver; the lock is the blocking take.
    ready_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ReadyMessage>>,
    /// Guards the stopped flag so registration/stop races resolve
    /// deterministically.
    stopped: Mutex<bool>,
    workers: TaskTracker,
    worker_count: usize,
}

impl Dispatcher {
    pub(crate) fn new(config: &RpcConfig) -> Self {
        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        Dispatcher {
            endpoints: DashMap::new(),
            endpoint_refs: DashMap::new(),
            ready_tx,
            ready_rx: tokio::sync::Mutex::new(ready_rx),
            stopped: Mutex::new(false),
            workers: TaskTracker::new(),
            worker_count: config.effective_dispatcher_threads(),
        }
    }

    /// Spawns the worker pool.
    pub(crate) fn start(self: Arc<Self>) {
        for worker in 0..self.worker_count {
            let dispatcher = Arc::clone(&self);
            self.workers.spawn(async move {
                dispatcher.message_loop(worker).await;
            });
        }
        self.workers.close();
    }

    async fn message_loop(&self, worker: usize) {
        trace!(worker, "dispatcher worker started");
        loop {
            let next = {
                let mut ready_rx = self.ready_rx.lock().await;
                ready_rx.recv().await
            };
            match next {
                Some(ReadyMessage::Process(entry)) => {
                    entry.inbox.process(&entry, self).await;
                }
                Some(ReadyMessage::Poison) | None => {
                    trace!(worker, "dispatcher worker exiting");
                    break;
                }
            }
        }
    }

    /// Registers an endpoint under `name` and returns its reference.
    ///
    /// Registration is atomic: a duplicate name is rejected without touching
    /// the existing entry, and registration after shutdown is rejected.
    #[instrument(skip(self, endpoint, env))]
    pub(crate) fn register(
        &self,
        name: &str,
        endpoint: Arc<dyn RpcEndpoint>,
        env: &RpcEnv,
    ) -> Result<RpcEndpointRef, RpcError> {
        let entry = Arc::new(EndpointEntry {
            name: name.to_string(),
            endpoint: Arc::clone(&endpoint),
            reference: RpcEndpointRef::new(name, env.sender_address(), env.clone()),
            inbox: Inbox::new(),
        });

        {
            let stopped = self.lock_stopped();
            if *stopped {
                return Err(RpcError::EnvironmentStopped);
            }
            match self.endpoints.entry(name.to_string()) {
                dashmap::mapref::entry::Entry::Occupied(_) => {
                    return Err(RpcError::NameAlreadyRegistered(name.to_string()));
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&entry));
                }
            }
            self.endpoint_refs
                .insert(endpoint_key(&endpoint), entry.reference.clone());
        }

        debug!("registered endpoint");
        let reference = entry.reference.clone();
        self.enqueue(entry);
        Ok(reference)
    }

    /// Drives `name` through its stop protocol. The registry entry is
    /// removed once the inbox has observed `OnStop` and drained.
    #[instrument(skip(self))]
    pub(crate) fn unregister(&self, name: &str) {
        let Some(entry) = self.endpoints.get(name).map(|e| Arc::clone(e.value())) else {
            trace!("unregister of unknown endpoint ignored");
            return;
        };
        if entry.inbox.stop() {
            debug!("endpoint stop initiated");
        }
        self.enqueue(entry);
    }

    /// Called by an inbox after its stop drain completed.
    pub(crate) fn remove_entry(&self, entry: &Arc<EndpointEntry>) {
        self.endpoints
            .remove_if(&entry.name, |_, existing| Arc::ptr_eq(existing, entry));
        self.endpoint_refs.remove(&endpoint_key(&entry.endpoint));
        trace!(endpoint = %entry.name, "endpoint entry removed");
    }

    /// Reverse lookup: the reference belonging to a registered endpoint.
    pub(crate) fn endpoint_ref(&self, endpoint: &Arc<dyn RpcEndpoint>) -> Option<RpcEndpointRef> {
        self.endpoint_refs
            .get(&endpoint_key(endpoint))
            .map(|r| r.value().clone())
    }

    pub(crate) fn contains(&self, name: &str) -> bool {
        self.endpoints.contains_key(name)
    }

    /// Marks the entry ready. Entries may appear in the queue more than
    /// once; workers treat wakes of an idle inbox as no-ops.
    pub(crate) fn enqueue(&self, entry: Arc<EndpointEntry>) {
        let _ = self.ready_tx.send(ReadyMessage::Process(entry));
    }

    /// Hands `message` to the named inbox and marks it ready.
    fn post_message(&self, name: &str, message: InboxMessage) -> Result<(), RpcError> {
        let entry = {
            let stopped = self.lock_stopped();
            if *stopped {
                return Err(RpcError::EnvironmentStopped);
            }
            match self.endpoints.get(name) {
                Some(entry) => Arc::clone(entry.value()),
                None => return Err(RpcError::NoSuchEndpoint(name.to_string())),
            }
        };
        entry.inbox.post(name, message);
        self.enqueue(entry);
        Ok(())
    }

    /// Posts a fire-and-forget message. Lookup and shutdown errors are
    /// raised to the caller, which applies the one-way drop policy.
    pub(crate) fn post_one_way(&self, request: RequestMessage) -> Result<(), RpcError> {
        let message = InboxMessage::OneWay {
            sender: request.sender,
            payload: request.payload,
        };
        self.post_message(request.receiver.name(), message)
    }

    /// Posts a local request and returns the receiver its reply context
    /// completes. Lookup and shutdown errors fail the receiver instead of
    /// being raised.
    pub(crate) fn post_local(
        &self,
        request: RequestMessage,
    ) -> oneshot::Receiver<Result<Bytes, RpcError>> {
        let (tx, rx) = oneshot::channel();
        let reply = ReplyContext::local(request.sender.clone(), tx);
        let shadow = reply.clone();
        let message = InboxMessage::Rpc {
            sender: request.sender,
            payload: request.payload,
            reply,
        };
        if let Err(error) = self.post_message(request.receiver.name(), message) {
            shadow.fail(error);
        }
        rx
    }

    /// Posts a request arriving from the network; the endpoint's reply flows
    /// into `callback`. Lookup and shutdown errors reach the callback.
    pub(crate) fn post_remote(&self, request: RequestMessage, callback: ResponseCallback) {
        let reply = ReplyContext::remote(request.sender.clone(), callback);
        let shadow = reply.clone();
        let message = InboxMessage::Rpc {
            sender: request.sender,
            payload: request.payload,
            reply,
        };
        if let Err(error) = self.post_message(request.receiver.name(), message) {
            shadow.fail(error);
        }
    }

    /// Posts `message` to a point-in-time snapshot of the registered names.
    /// Registrations racing the broadcast are not required to receive it.
    pub(crate) fn post_to_all(&self, message: InboxMessage) {
        let names: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Err(error) = self.post_message(&name, message.clone()) {
                trace!(%name, %error, "broadcast post skipped");
            }
        }
    }

    /// Stops the dispatcher: rejects new registrations and posts, drives
    /// every endpoint through its stop protocol, poisons the workers, and
    /// finishes whatever the exiting workers left scheduled.
    #[instrument(skip(self))]
    pub(crate) async fn stop(&self) {
        {
            let mut stopped = self.lock_stopped();
            if *stopped {
                return;
            }
            *stopped = true;
        }

        let names: Vec<String> = self.endpoints.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.unregister(&name);
        }

        for _ in 0..self.worker_count {
            let _ = self.ready_tx.send(ReadyMessage::Poison);
        }
        self.workers.wait().await;

        // Workers exit on the first poison they see, which can leave stopping
        // inboxes scheduled behind them. Finish those here so every endpoint
        // observes on_stop and every pending reply context is failed.
        let mut ready_rx = self.ready_rx.lock().await;
        while let Ok(next) = ready_rx.try_recv() {
            if let ReadyMessage::Process(entry) = next {
                entry.inbox.process(&entry, self).await;
            }
        }
        debug!("dispatcher stopped");
    }

    /// Waits for the worker pool to terminate.
    pub(crate) async fn await_termination(&self) {
        self.workers.wait().await;
    }

    fn lock_stopped(&self) -> std::sync::MutexGuard<'_, bool> {
        self.stopped.lock().expect("dispatcher lock poisoned")
    }
}

/// Identity key of a registered endpoint, used for reverse lookups.
fn endpoint_key(endpoint: &Arc<dyn RpcEndpoint>) -> usize {
    Arc::as_ptr(endpoint) as *const () as usize
}
