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

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, instrument, trace, warn};

use crate::common::{Dispatcher, RpcEnv};
use crate::message::{InboxMessage, RequestMessage, ResponseCallback, RpcAddress, RpcError};
use crate::transport::client::write_loop;
use crate::transport::protocol::{
    self, Frame, MSG_TYPE_AUTH, MSG_TYPE_ONE_WAY, MSG_TYPE_RPC_FAILURE, MSG_TYPE_RPC_REQUEST,
};

/// Network-side ingress of an environment.
///
/// Accepts connections, optionally runs the auth bootstrap, and translates
/// incoming frames into `RequestMessage`s. This is the sole means by which
/// remote traffic enters the dispatcher: requests go through `post_remote`
/// (with a callback that frames the response under the original request id),
/// one-ways through `post_one_way`. Connection lifecycle is broadcast to
/// every local endpoint.
pub(crate) struct TransportServer {
    port: u16,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl TransportServer {
    /// Binds on `host:port`; a port of `0` picks a free one.
    pub(crate) async fn bind(env: RpcEnv, host: &str, port: u16) -> Result<Self, RpcError> {
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            RpcError::TransportFailure(format!("bind {host}:{port} failed: {e}"))
        })?;
        let port = listener.local_addr()?.port();
        let shutdown = CancellationToken::new();
        let tasks = TaskTracker::new();
        tasks.spawn(accept_loop(
            listener,
            env,
            shutdown.clone(),
            tasks.clone(),
        ));
        Ok(TransportServer {
            port,
            shutdown,
            tasks,
        })
    }

    /// The bound port.
    pub(crate) fn port(&self) -> u16 {
        self.port
    }

    /// Stops accepting, tears down every connection, and waits for the
    /// connection tasks to finish.
    pub(crate) async fn shutdown(self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    env: RpcEnv,
    shutdown: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let _ = stream.set_nodelay(true);
                    tasks.spawn(handle_connection(
                        env.clone(),
                        stream,
                        peer,
                        shutdown.child_token(),
                    ));
                }
                Err(error) => warn!(%error, "accept failed"),
            }
        }
    }
    trace!("accept loop exiting");
}

#[instrument(skip_all, fields(remote = %peer))]
async fn handle_connection(
    env: RpcEnv,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let remote = RpcAddress::new(peer.ip().to_string(), peer.port());
    debug!("accepted connection");
    let (mut reader, writer) = stream.into_split();

    if let Some(secret) = env.authentication() {
        match protocol::read_frame(&mut reader).await {
            Ok(Some(frame))
                if frame.msg_type == MSG_TYPE_AUTH && frame.body.as_ref() == secret.as_bytes() =>
            {
                trace!("authentication accepted");
            }
            _ => {
                warn!("authentication failed, closing connection");
                return;
            }
        }
    }

    let (writer_tx, writer_rx) = mpsc::unbounded_channel();
    tokio::spawn(write_loop(writer, writer_rx, shutdown.clone()));

    let dispatcher = Arc::clone(env.dispatcher());
    dispatcher.post_to_all(InboxMessage::RemoteConnected(remote.clone()));

    let failure = loop {
        tokio::select! {
            _ = shutdown.cancelled() => break None,
            frame = protocol::read_frame(&mut reader) => match frame {
                Ok(Some(frame)) => handle_frame(&env, &dispatcher, &remote, frame, &writer_tx),
                Ok(None) => break None,
                Err(error) => break Some(error),
            }
        }
    };
    shutdown.cancel();

    match failure {
        None => {
            debug!("connection closed");
            dispatcher.post_to_all(InboxMessage::RemoteDisconnected(remote));
        }
        Some(error) => {
            warn!(%error, "connection failed");
            dispatcher.post_to_all(InboxMessage::RemoteFailure(remote, error));
        }
    }
}

fn handle_frame(
    env: &RpcEnv,
    dispatcher: &Arc<Dispatcher>,
    remote: &RpcAddress,
    frame: Frame,
    writer_tx: &mpsc::UnboundedSender<Bytes>,
) {
    match frame.msg_type {
        MSG_TYPE_RPC_REQUEST => match protocol::decode_request_body(&frame.body) {
            Ok((header, payload)) => {
                let request_id = frame.request_id;
                let writer_tx = writer_tx.clone();
                let callback: ResponseCallback = Box::new(move |outcome| {
                    let frame = match outcome {
                        Ok(payload) => protocol::encode_frame(
                            protocol::MSG_TYPE_RPC_RESPONSE,
                            request_id,
                            &payload,
                        ),
                        Err(error) => protocol::encode_frame(
                            MSG_TYPE_RPC_FAILURE,
                            request_id,
                            error.to_string().as_bytes(),
                        ),
                    };
                    let _ = writer_tx.send(frame);
                });
                dispatcher.post_remote(
                    RequestMessage {
                        sender: header.sender.unwrap_or_else(RpcAddress::client_only),
                        receiver: env.remote_endpoint_ref(&header.endpoint, &env.sender_address()),
                        payload,
                    },
                    callback,
                );
            }
            Err(error) => warn!(%remote, %error, "dropping malformed request frame"),
        },
        MSG_TYPE_ONE_WAY => match protocol::decode_request_body(&frame.body) {
            Ok((header, payload)) => {
                let request = RequestMessage {
                    sender: header.sender.unwrap_or_else(RpcAddress::client_only),
                    receiver: env.remote_endpoint_ref(&header.endpoint, &env.sender_address()),
                    payload,
                };
                if let Err(error) = dispatcher.post_one_way(request) {
                    warn!(%remote, %error, "dropping one-way message");
                }
            }
            Err(error) => warn!(%remote, %error, "dropping malformed one-way frame"),
        },
        MSG_TYPE_AUTH => trace!(%remote, "ignoring late auth frame"),
        other => trace!(%remote, msg_type = other, "ignoring unexpected frame"),
    }
}
