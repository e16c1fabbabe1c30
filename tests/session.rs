//! End-to-end scenarios against an in-process fake remote end.
//!
//! The fake remote end is a real WebSocket server (`tokio_tungstenite`'s
//! server-side `accept_async`) bound to an ephemeral port; it is test-only
//! scaffolding, not a substitute for the `Codec` seam.

use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing_subscriber::fmt::MakeWriter;

use webdriver_bidi_core::{
    decode_event_with_codec, execute_with_codec, BidiError, Codec, Config, ExecuteError, Session,
};

/// Binds an ephemeral listener, accepts exactly one connection, and runs
/// `handler` against it on a background task. Returns the `ws://` URL to
/// connect to once the listener is bound (before the connection arrives).
async fn spawn_fake_remote<F, Fut>(handler: F) -> String
where
    F: FnOnce(WebSocketStream<TcpStream>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(ws).await;
    });
    format!("ws://{addr}")
}

async fn recv_command(ws: &mut WebSocketStream<TcpStream>) -> Value {
    let msg = ws.next().await.unwrap().unwrap();
    let text = match msg {
        Message::Text(text) => text.to_string(),
        other => panic!("expected a text frame, got {other:?}"),
    };
    serde_json::from_str(&text).unwrap()
}

async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

/// An in-memory `tracing_subscriber::fmt` writer so a test can assert on
/// the text of log lines the crate emits, without a real sink.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<StdMutex<Vec<u8>>>);

impl CapturedLogs {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Installs a `tracing_subscriber::fmt` subscriber as the default for the
/// current thread and returns a handle to its captured output alongside
/// the guard that keeps it installed for the caller's scope.
fn init_capturing_subscriber() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
    let logs = CapturedLogs::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_env_filter("warn")
        .finish();
    let guard = tracing::subscriber::set_default(subscriber);
    (logs, guard)
}

#[tokio::test]
async fn basic_round_trip() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        assert_eq!(command["method"], "session.status");
        let id = command["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"type": "success", "id": id, "result": {"ready": true}}),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    let result = session
        .execute("session.status", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result, json!({"ready": true}));
    session.stop().await;
}

#[tokio::test]
async fn remote_error() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        let id = command["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({
                "type": "error",
                "id": id,
                "error": "invalid argument",
                "message": "bad url",
            }),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    let err = session
        .execute("browsingContext.navigate", json!({}), None)
        .await
        .unwrap_err();
    match err {
        BidiError::CommandFailed {
            error, message, ..
        } => {
            assert_eq!(error, "invalid argument");
            assert_eq!(message, "bad url");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    session.stop().await;
}

#[tokio::test]
async fn command_timeout() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        let id = command["id"].as_u64().unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        // Late reply: the caller has already timed out by the time this
        // arrives. It must be dropped without side effects.
        let _ = ws
            .send(Message::text(
                json!({"type": "success", "id": id, "result": {}}).to_string(),
            ))
            .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    let err = session
        .execute(
            "browsingContext.navigate",
            json!({}),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();
    match err {
        BidiError::CommandTimeout { method } => {
            assert_eq!(method, "browsingContext.navigate");
        }
        other => panic!("unexpected error: {other:?}"),
    }

    // Give the late reply a chance to arrive and be logged-and-dropped.
    tokio::time::sleep(Duration::from_millis(400)).await;
    session.stop().await;
}

#[tokio::test]
async fn interleaved_concurrency() {
    let url = spawn_fake_remote(|mut ws| async move {
        let mut ids = Vec::with_capacity(3);
        for _ in 0..3 {
            let command = recv_command(&mut ws).await;
            ids.push(command["id"].as_u64().unwrap());
        }
        // Reply third-issued, first-issued, second-issued.
        for &idx in &[2usize, 0, 1] {
            let id = ids[idx];
            send_json(
                &mut ws,
                json!({"type": "success", "id": id, "result": {"slot": idx}}),
            )
            .await;
        }
    })
    .await;

    let session = Arc::new(Session::new(Config::default()));
    session.start(&url).await.unwrap();

    let (a, b, c) = tokio::join!(
        session.execute("m1", json!({}), None),
        session.execute("m2", json!({}), None),
        session.execute("m3", json!({}), None),
    );
    assert_eq!(a.unwrap()["slot"], 0);
    assert_eq!(b.unwrap()["slot"], 1);
    assert_eq!(c.unwrap()["slot"], 2);
    session.stop().await;
}

#[tokio::test]
async fn command_ids_strictly_increase() {
    let url = spawn_fake_remote(|mut ws| async move {
        let mut seen = Vec::with_capacity(2);
        for _ in 0..2 {
            let command = recv_command(&mut ws).await;
            let id = command["id"].as_u64().unwrap();
            seen.push(id);
            send_json(&mut ws, json!({"type": "success", "id": id, "result": {}})).await;
        }
        assert_eq!(seen, vec![1, 2]);
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    session.execute("m1", json!({}), None).await.unwrap();
    session.execute("m2", json!({}), None).await.unwrap();
    session.stop().await;
}

#[tokio::test]
async fn event_fan_out() {
    let url = spawn_fake_remote(|mut ws| async move {
        for seq in 0..3u64 {
            send_json(
                &mut ws,
                json!({"type": "event", "method": "log.entryAdded", "params": {"seq": seq}}),
            )
            .await;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();

    let seen_a = Arc::new(StdMutex::new(Vec::new()));
    let seen_b = Arc::new(StdMutex::new(Vec::new()));
    let seen_a2 = Arc::clone(&seen_a);
    let seen_b2 = Arc::clone(&seen_b);
    session.on("log.entryAdded", move |_method, params| {
        seen_a2.lock().unwrap().push(params["seq"].as_u64().unwrap());
        Ok(())
    });
    session.on("log.entryAdded", move |_method, params| {
        seen_b2.lock().unwrap().push(params["seq"].as_u64().unwrap());
        Ok(())
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*seen_a.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(*seen_b.lock().unwrap(), vec![0, 1, 2]);
    session.stop().await;
}

#[tokio::test]
async fn graceful_shutdown_with_in_flight_command() {
    let url = spawn_fake_remote(|mut ws| async move {
        let _command = recv_command(&mut ws).await;
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                _ => continue,
            }
        }
    })
    .await;

    let session = Arc::new(Session::new(Config::default()));
    session.start(&url).await.unwrap();

    let in_flight = {
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            session
                .execute("input.performActions", json!({}), None)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    session.stop().await;

    let result = in_flight.await.unwrap();
    assert!(matches!(result, Err(BidiError::SessionClosed)));

    // Second call must return immediately without error.
    session.stop().await;
}

#[tokio::test]
async fn stop_is_idempotent() {
    let url = spawn_fake_remote(|mut ws| async move {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None => break,
                _ => continue,
            }
        }
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    session.stop().await;
    session.stop().await;
}

#[tokio::test]
async fn malformed_message_is_dropped_then_valid_processed() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        let id = command["id"].as_u64().unwrap();
        ws.send(Message::text("{not valid json")).await.unwrap();
        send_json(&mut ws, json!({"type": "bogus", "id": id})).await;
        send_json(
            &mut ws,
            json!({"type": "success", "id": id, "result": {"ok": true}}),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    let result = session
        .execute("session.status", json!({}), None)
        .await
        .unwrap();
    assert_eq!(result, json!({"ok": true}));
    session.stop().await;
}

#[tokio::test]
async fn malformed_message_logs_a_warning() {
    let (logs, _guard) = init_capturing_subscriber();

    let url = spawn_fake_remote(|mut ws| async move {
        ws.send(Message::text("{not valid json")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    session.stop().await;

    assert!(logs.contents().contains("malformed inbound message"));
}

#[tokio::test]
async fn execute_before_start_fails_not_started() {
    let session = Session::new(Config::default());
    let err = session
        .execute("session.status", json!({}), None)
        .await
        .unwrap_err();
    assert!(matches!(err, BidiError::NotStarted));
}

/// A minimal `Codec` fixture: commands and results round-trip through a
/// method name plus the raw JSON value, with no per-module typed schema.
struct EchoCodec;

struct EchoCommand {
    method: &'static str,
    params: Value,
}

#[derive(Debug, PartialEq)]
struct EchoResult(Value);

#[derive(Debug, thiserror::Error)]
#[error("codec failed to decode: {0}")]
struct EchoCodecError(String);

impl Codec for EchoCodec {
    type Command = EchoCommand;
    type Event = Value;
    type CommandResult = EchoResult;
    type Error = EchoCodecError;

    fn encode(&self, command: &Self::Command) -> (&'static str, Value) {
        (command.method, command.params.clone())
    }

    fn decode_event(&self, _method: &str, params: Value) -> Result<Self::Event, Self::Error> {
        Ok(params)
    }

    fn decode_result(&self, _method: &str, result: Value) -> Result<Self::CommandResult, Self::Error> {
        if result.get("reject").is_some() {
            return Err(EchoCodecError("result carried a reject marker".into()));
        }
        Ok(EchoResult(result))
    }
}

#[tokio::test]
async fn execute_with_codec_decodes_a_successful_result() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        assert_eq!(command["method"], "session.status");
        let id = command["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"type": "success", "id": id, "result": {"ready": true}}),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();

    let codec = EchoCodec;
    let command = EchoCommand {
        method: "session.status",
        params: json!({}),
    };
    let result = execute_with_codec(&session, &codec, &command, None)
        .await
        .unwrap();
    assert_eq!(result, EchoResult(json!({"ready": true})));
    session.stop().await;
}

#[tokio::test]
async fn execute_with_codec_propagates_a_bidi_error() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        let id = command["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"type": "error", "id": id, "error": "invalid argument", "message": "bad url"}),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();

    let codec = EchoCodec;
    let command = EchoCommand {
        method: "browsingContext.navigate",
        params: json!({}),
    };
    let err = execute_with_codec(&session, &codec, &command, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecuteError::Bidi(BidiError::CommandFailed { .. })));
    session.stop().await;
}

#[tokio::test]
async fn execute_with_codec_surfaces_a_decode_error() {
    let url = spawn_fake_remote(|mut ws| async move {
        let command = recv_command(&mut ws).await;
        let id = command["id"].as_u64().unwrap();
        send_json(
            &mut ws,
            json!({"type": "success", "id": id, "result": {"reject": true}}),
        )
        .await;
    })
    .await;

    let session = Session::new(Config::default());
    session.start(&url).await.unwrap();

    let codec = EchoCodec;
    let command = EchoCommand {
        method: "session.status",
        params: json!({}),
    };
    let err = execute_with_codec(&session, &codec, &command, None)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecuteError::Decode(_)));
    session.stop().await;
}

#[test]
fn decode_event_with_codec_delegates_to_the_codec() {
    let codec = EchoCodec;
    let decoded = decode_event_with_codec(&codec, "log.entryAdded", json!({"seq": 1})).unwrap();
    assert_eq!(decoded, json!({"seq": 1}));
}
