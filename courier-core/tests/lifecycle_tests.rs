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

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier_core::prelude::*;

use crate::setup::{initialize_tracing, wait_until, EchoEndpoint, RecordingEndpoint};

mod setup;

/// Unregistering drains messages posted before the stop, then runs
/// `on_stop`, and nothing is delivered afterwards.
///
/// **Scenario:** a slow endpoint (50 ms per delivery) receives three posts,
/// is unregistered, then receives one more post. The log must read exactly
/// `started, recv:a, recv:b, recv:c, stopped`.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unregister_drains_then_stops() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let slow = RecordingEndpoint::with_delay(Duration::from_millis(50));
    let reference = env.register("slow", slow.clone())?;

    for payload in ["a", "b", "c"] {
        reference.send(Bytes::from(payload))?;
    }
    env.unregister("slow");
    // Posted after the stop: must never be delivered.
    reference.send(Bytes::from("d"))?;

    assert!(
        wait_until(Duration::from_secs(5), || slow
            .entries()
            .contains(&"stopped".to_string()))
        .await,
        "endpoint never stopped; log: {:?}",
        slow.entries()
    );
    // Give a straggling delivery the chance to prove us wrong.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        slow.entries(),
        vec!["started", "recv:a", "recv:b", "recv:c", "stopped"]
    );

    env.shutdown().await;
    Ok(())
}

/// A duplicate registration is rejected and does not disturb the existing
/// endpoint; the loser never observes `on_start`.
#[tokio::test]
async fn duplicate_registration_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let first = RecordingEndpoint::new();
    let second = RecordingEndpoint::new();

    let reference = env.register("a", first.clone())?;
    let duplicate = env.register("a", second.clone());
    assert!(matches!(
        duplicate,
        Err(RpcError::NameAlreadyRegistered(_))
    ));

    // The original stays reachable.
    reference.send(Bytes::from("still-here"))?;
    assert!(
        wait_until(Duration::from_secs(5), || first
            .received()
            .contains(&"still-here".to_string()))
        .await
    );
    assert!(second.entries().is_empty(), "loser observed lifecycle");

    env.shutdown().await;
    Ok(())
}

/// The verifier's name is reserved for the runtime.
#[tokio::test]
async fn reserved_name_is_rejected() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let outcome = env.register(ENDPOINT_VERIFIER_NAME, EchoEndpoint::new());
    assert!(matches!(
        outcome,
        Err(RpcError::NameAlreadyRegistered(_))
    ));
    env.shutdown().await;
    Ok(())
}

/// After shutdown, sends on a previously-valid local reference fail with
/// `EnvironmentStopped`, asks resolve with the same error, and the worker
/// pool stays down.
#[tokio::test]
async fn post_after_shutdown_fails() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let recorder = RecordingEndpoint::new();
    let reference = env.register("recorder", recorder.clone())?;

    env.shutdown().await;
    assert!(
        recorder.entries().contains(&"stopped".to_string()),
        "shutdown must drive endpoints through on_stop; log: {:?}",
        recorder.entries()
    );

    assert!(matches!(
        reference.send(Bytes::from("x")),
        Err(RpcError::EnvironmentStopped)
    ));
    let outcome = reference.ask(Bytes::from("x")).await;
    assert!(matches!(outcome, Err(RpcError::EnvironmentStopped)));

    // No worker is left running.
    tokio::time::timeout(Duration::from_secs(1), env.await_termination()).await?;
    Ok(())
}

/// A handler error routes to `on_error`, the unfulfilled reply context is
/// failed on the endpoint's behalf, and the inbox keeps delivering.
#[tokio::test]
async fn handler_error_fails_context_and_continues() -> anyhow::Result<()> {
    initialize_tracing();

    #[derive(Default)]
    struct Flaky {
        errors: AtomicUsize,
        handled: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl RpcEndpoint for Flaky {
        async fn receive_and_reply(
            &self,
            _sender: RpcAddress,
            payload: Bytes,
            reply: ReplyContext,
        ) -> Result<(), RpcError> {
            if payload.as_ref() == b"boom" {
                return Err(RpcError::HandlerFailure("boom".into()));
            }
            self.handled
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(&payload).into_owned());
            reply.reply(payload);
            Ok(())
        }

        async fn on_error(&self, _error: RpcError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    let env = RpcEnv::new(RpcConfig::default());
    let flaky = Arc::new(Flaky::default());
    let reference = env.register("flaky", flaky.clone())?;

    let failed = reference.ask(Bytes::from("boom")).await;
    assert!(matches!(failed, Err(RpcError::HandlerFailure(_))));
    assert_eq!(flaky.errors.load(Ordering::SeqCst), 1);

    // The endpoint is still alive and ordered.
    let reply = reference.ask(Bytes::from("fine")).await?;
    assert_eq!(reply.as_ref(), b"fine");
    assert_eq!(flaky.handled.lock().unwrap().as_slice(), ["fine"]);

    env.shutdown().await;
    Ok(())
}

/// Posts racing an unregister either deliver before `on_stop` or not at all;
/// the reply contexts of losers are failed with `EndpointStopped`.
#[tokio::test]
async fn ask_after_unregister_fails_cleanly() -> anyhow::Result<()> {
    initialize_tracing();
    let env = RpcEnv::new(RpcConfig::default());
    let echo = EchoEndpoint::new();
    let reference = env.register("echo", echo)?;

    env.unregister("echo");
    let outcome = reference.ask(Bytes::from("late")).await;
    assert!(
        matches!(
            outcome,
            Err(RpcError::EndpointStopped(_)) | Err(RpcError::NoSuchEndpoint(_))
        ),
        "got {outcome:?}"
    );

    env.shutdown().await;
    Ok(())
}
