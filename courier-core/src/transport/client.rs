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
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::common::RpcConfig;
use crate::message::{ResponseCallback, RpcAddress, RpcError};
use crate::traits::{TransportClient, TransportClientFactory};
use crate::transport::protocol::{
    self, MSG_TYPE_AUTH, MSG_TYPE_ONE_WAY, MSG_TYPE_RPC_FAILURE, MSG_TYPE_RPC_REQUEST,
    MSG_TYPE_RPC_RESPONSE,
};

/// Creates [`TcpTransportClient`]s; the default factory of an environment.
pub struct TcpClientFactory {
    auth_secret: Option<String>,
}

impl TcpClientFactory {
    /// Builds a factory honouring the environment's auth configuration.
    pub fn new(config: &RpcConfig) -> Self {
        TcpClientFactory {
            auth_secret: config
                .authentication_enabled
                .then(|| config.auth_secret.clone()),
        }
    }
}

#[async_trait]
impl TransportClientFactory for TcpClientFactory {
    async fn create_client(
        &self,
        address: &RpcAddress,
    ) -> Result<Arc<dyn TransportClient>, RpcError> {
        let client = TcpTransportClient::connect(address, self.auth_secret.as_deref()).await?;
        Ok(client)
    }
}

impl fmt::Debug for TcpClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpClientFactory")
            .field("authentication", &self.auth_secret.is_some())
            .finish()
    }
}

/// One TCP connection to a remote environment.
///
/// A writer task owns the write half, so there is exactly one writer per
/// connection; a reader task correlates incoming responses to the pending
/// callbacks by request id. Losing the connection fails every pending
/// callback and deactivates the client.
pub struct TcpTransportClient {
    remote: RpcAddress,
    writer_tx: mpsc::UnboundedSender<Bytes>,
    pending: Arc<DashMap<u64, Mutex<Option<ResponseCallback>>>>,
    next_request_id: AtomicU64,
    shutdown: CancellationToken,
}

impl TcpTransportClient {
    /// Connects to `address`, sending the auth bootstrap frame first when a
    /// secret is configured.
    pub async fn connect(
        address: &RpcAddress,
        auth_secret: Option<&str>,
    ) -> Result<Arc<Self>, RpcError> {
        let stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| {
                RpcError::TransportFailure(format!("connect to {address} failed: {e}"))
            })?;
        let _ = stream.set_nodelay(true);
        let (reader, writer) = stream.into_split();

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        if let Some(secret) = auth_secret {
            let _ = writer_tx.send(protocol::encode_frame(MSG_TYPE_AUTH, 0, secret.as_bytes()));
        }

        let shutdown = CancellationToken::new();
        let pending: Arc<DashMap<u64, Mutex<Option<ResponseCallback>>>> = Arc::new(DashMap::new());
        tokio::spawn(write_loop(writer, writer_rx, shutdown.clone()));
        tokio::spawn(read_loop(
            reader,
            Arc::clone(&pending),
            shutdown.clone(),
            address.clone(),
        ));

        Ok(Arc::new(TcpTransportClient {
            remote: address.clone(),
            writer_tx,
            pending,
            next_request_id: AtomicU64::new(1),
            shutdown,
        }))
    }

    fn lost(&self) -> RpcError {
        RpcError::TransportFailure(format!("connection to {} lost", self.remote))
    }
}

#[async_trait]
impl TransportClient for TcpTransportClient {
    async fn send_rpc(&self, body: Bytes, callback: ResponseCallback) -> Result<(), RpcError> {
        if self.shutdown.is_cancelled() {
            let error = self.lost();
            callback(Err(error.clone()));
            return Err(error);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(request_id, Mutex::new(Some(callback)));
        let frame = protocol::encode_frame(MSG_TYPE_RPC_REQUEST, request_id, &body);
        if self.writer_tx.send(frame).is_err() || self.shutdown.is_cancelled() {
            // The reader may have already swept this entry while failing the
            // connection; only report the write failure if it has not.
            if let Some((_, cell)) = self.pending.remove(&request_id) {
                if let Some(callback) = cell.into_inner().unwrap_or(None) {
                    let error = self.lost();
                    callback(Err(error.clone()));
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    async fn send_oneway(&self, body: Bytes) -> Result<(), RpcError> {
        if self.shutdown.is_cancelled() {
            return Err(self.lost());
        }
        let frame = protocol::encode_frame(MSG_TYPE_ONE_WAY, 0, &body);
        self.writer_tx.send(frame).map_err(|_| self.lost())
    }

    fn remote_address(&self) -> RpcAddress {
        self.remote.clone()
    }

    fn is_active(&self) -> bool {
        !self.shutdown.is_cancelled()
    }

    fn close(&self) {
        self.shutdown.cancel();
    }
}

impl fmt::Debug for TcpTransportClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransportClient")
            .field("remote", &self.remote)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Drains pre-encoded frames onto the write half. Shared by the client and
/// the server's per-connection response path.
pub(crate) async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut frames: mpsc::UnboundedReceiver<Bytes>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(frame) => {
                    if let Err(error) = writer.write_all(&frame).await {
                        debug!(%error, "connection write failed");
                        shutdown.cancel();
                        break;
                    }
                }
                None => break,
            }
        }
    }
    let _ = writer.shutdown().await;
}

/// Correlates response frames to pending callbacks until the connection ends,
/// then fails whatever is still pending.
async fn read_loop(
    mut reader: OwnedReadHalf,
    pending: Arc<DashMap<u64, Mutex<Option<ResponseCallback>>>>,
    shutdown: CancellationToken,
    remote: RpcAddress,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            frame = protocol::read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => match frame.msg_type {
                    MSG_TYPE_RPC_RESPONSE => {
                        if let Some((_, cell)) = pending.remove(&frame.request_id) {
                            if let Some(callback) = cell.into_inner().unwrap_or(None) {
                                callback(Ok(frame.body));
                            }
                        } else {
                            trace!(request_id = frame.request_id, "response for unknown request");
                        }
                    }
                    MSG_TYPE_RPC_FAILURE => {
                        if let Some((_, cell)) = pending.remove(&frame.request_id) {
                            if let Some(callback) = cell.into_inner().unwrap_or(None) {
                                let reason = String::from_utf8_lossy(&frame.body).into_owned();
                                callback(Err(RpcError::TransportFailure(reason)));
                            }
                        }
                    }
                    other => trace!(msg_type = other, "ignoring unexpected frame"),
                },
                Ok(None) => {
                    debug!(%remote, "connection closed by peer");
                    break;
                }
                Err(error) => {
                    debug!(%remote, %error, "connection read failed");
                    break;
                }
            }
        }
    }
    shutdown.cancel();

    let stale: Vec<u64> = pending.iter().map(|entry| *entry.key()).collect();
    for request_id in stale {
        if let Some((_, cell)) = pending.remove(&request_id) {
            if let Some(callback) = cell.into_inner().unwrap_or(None) {
                callback(Err(RpcError::TransportFailure(format!(
                    "connection to {remote} lost"
                ))));
            }
        }
    }
}
