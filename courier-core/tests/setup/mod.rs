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

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

use courier_core::prelude::*;

// Ensures tracing initialization happens only once across all tests.
static INIT: Once = Once::new();

/// Initializes the global tracing subscriber for tests.
///
/// Honours `RUST_LOG` when set; otherwise keeps the runtime quiet so test
/// output stays readable.
pub fn initialize_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("courier_core=warn"));
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(filter)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Polls `condition` until it holds or `timeout` elapses.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Endpoint that answers every ask with the request payload.
#[derive(Default)]
pub struct EchoEndpoint {
    pub calls: AtomicUsize,
}

impl EchoEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RpcEndpoint for EchoEndpoint {
    async fn receive_and_reply(
        &self,
        _sender: RpcAddress,
        payload: Bytes,
        reply: ReplyContext,
    ) -> Result<(), RpcError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        reply.reply(payload);
        Ok(())
    }
}

/// Endpoint that records everything it observes, in order.
///
/// Lifecycle hooks, connection events, and one-way deliveries all append to
/// one log, so tests can assert on the exact interleaving.
#[derive(Default)]
pub struct RecordingEndpoint {
    log: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl RecordingEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A recorder that sleeps in `receive`, for drain-ordering tests.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(RecordingEndpoint {
            log: Mutex::new(Vec::new()),
            delay: Some(delay),
        })
    }

    pub fn entries(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    pub fn received(&self) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter_map(|entry| entry.strip_prefix("recv:").map(str::to_string))
            .collect()
    }

    fn record(&self, entry: impl Into<String>) {
        self.log.lock().unwrap().push(entry.into());
    }
}

#[async_trait]
impl RpcEndpoint for RecordingEndpoint {
    async fn on_start(&self) -> Result<(), RpcError> {
        self.record("started");
        Ok(())
    }

    async fn on_stop(&self) -> Result<(), RpcError> {
        self.record("stopped");
        Ok(())
    }

    async fn on_connected(&self, remote: RpcAddress) -> Result<(), RpcError> {
        self.record(format!("connected:{remote}"));
        Ok(())
    }

    async fn on_disconnected(&self, remote: RpcAddress) -> Result<(), RpcError> {
        self.record(format!("disconnected:{remote}"));
        Ok(())
    }

    async fn on_network_error(&self, remote: RpcAddress, _error: RpcError) -> Result<(), RpcError> {
        self.record(format!("network-error:{remote}"));
        Ok(())
    }

    async fn receive(&self, _sender: RpcAddress, payload: Bytes) -> Result<(), RpcError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.record(format!("recv:{}", String::from_utf8_lossy(&payload)));
        Ok(())
    }
}
