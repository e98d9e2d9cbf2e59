//! # Evaluation Session
//!
//! Owns one remote WebSocket connection for the lifetime of one evaluation:
//! sign a fresh URL, connect, drive the frame protocol to a terminal state,
//! and report exactly one outcome. No retries — the remote exchange is
//! stateful and not safe to replay blindly — and an overall deadline bounds
//! the whole attempt, after which the transport is force-closed.
//!
//! Transport events reach the protocol through the [`Transport`] trait so
//! the drive loop is linear and the tests can script a fake remote service.

use crate::config::{AppConfig, IflytekConfig};
use crate::error::{AppError, AppResult};
use crate::evaluation::auth::AuthSigner;
use crate::evaluation::protocol::{
    EvaluationOptions, FrameProtocol, ProtocolEvent, SessionResult,
};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// One event observed on the remote connection.
#[derive(Debug)]
pub enum TransportEvent {
    Message(String),
    Closed,
    Failed(String),
}

/// The seam between the session and the wire. The production implementation
/// wraps a tokio-tungstenite stream; tests substitute a scripted fake.
#[async_trait]
pub trait Transport: Send {
    async fn send_frame(&mut self, frame: String) -> AppResult<()>;
    async fn next_event(&mut self) -> TransportEvent;
    async fn close(&mut self);
}

/// Production transport over a connected WebSocket stream.
pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub fn new(inner: WebSocketStream<MaybeTlsStream<TcpStream>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_frame(&mut self, frame: String) -> AppResult<()> {
        self.inner.send(Message::Text(frame)).await.map_err(AppError::from)
    }

    async fn next_event(&mut self) -> TransportEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => return TransportEvent::Message(text),
                    Err(_) => {
                        return TransportEvent::Failed(
                            "non-UTF-8 binary frame from remote service".to_string(),
                        )
                    }
                },
                // control frames carry no protocol payload
                Some(Ok(Message::Ping(_)))
                | Some(Ok(Message::Pong(_)))
                | Some(Ok(Message::Frame(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return TransportEvent::Closed,
                Some(Err(e)) => return TransportEvent::Failed(e.to_string()),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.inner.close(None).await;
    }
}

/// Runs one evaluation exchange per call against the configured service.
#[derive(Debug, Clone)]
pub struct EvaluationSession {
    credentials: IflytekConfig,
    options: EvaluationOptions,
    deadline: Duration,
}

impl EvaluationSession {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            credentials: config.iflytek.clone(),
            options: EvaluationOptions::from(&config.evaluation),
            deadline: Duration::from_secs(config.evaluation.session_timeout_secs),
        }
    }

    /// Evaluate one PCM recording against the reference text. Single
    /// attempt: a fresh signature and a fresh connection every call, and the
    /// connection is closed on every exit path.
    pub async fn evaluate(&self, pcm: Vec<u8>, text: &str) -> AppResult<SessionResult> {
        let signer = AuthSigner::new(&self.credentials.api_key, &self.credentials.api_secret);
        let signed = signer.sign(&self.credentials.host, &self.credentials.path)?;

        let mut protocol = FrameProtocol::new(
            self.credentials.app_id.clone(),
            self.options.clone(),
            text,
            pcm,
        );
        protocol.begin();

        debug!(host = %self.credentials.host, "Connecting to evaluation service");
        let deadline = tokio::time::Instant::now() + self.deadline;

        let stream = match tokio::time::timeout_at(
            deadline,
            tokio_tungstenite::connect_async(signed.url.as_str()),
        )
        .await
        {
            Err(_) => {
                warn!("Evaluation connect timed out");
                return Err(AppError::Timeout);
            }
            Ok(Err(e)) => return Err(AppError::Transport(e.to_string())),
            Ok(Ok((stream, _response))) => stream,
        };

        let mut transport = WsTransport::new(stream);
        run_with_deadline(&mut protocol, &mut transport, deadline).await
    }
}

/// Drive the protocol until terminal or the deadline, then close the
/// transport whatever happened.
async fn run_with_deadline<T: Transport>(
    protocol: &mut FrameProtocol,
    transport: &mut T,
    deadline: tokio::time::Instant,
) -> AppResult<SessionResult> {
    let outcome = tokio::time::timeout_at(deadline, drive(protocol, transport)).await;
    transport.close().await;
    match outcome {
        Err(_) => {
            warn!("Evaluation session deadline exceeded");
            Err(AppError::Timeout)
        }
        Ok(result) => result,
    }
}

/// The linear exchange: open, send Init and Final frames, then consume
/// inbound events until the protocol resolves.
async fn drive<T: Transport>(
    protocol: &mut FrameProtocol,
    transport: &mut T,
) -> AppResult<SessionResult> {
    protocol.on_open()?;
    while let Some(frame) = protocol.next_outbound()? {
        transport.send_frame(frame).await?;
    }

    loop {
        let outcome = match transport.next_event().await {
            TransportEvent::Message(text) => protocol.on_message(&text),
            TransportEvent::Closed => protocol.on_close(),
            TransportEvent::Failed(message) => protocol.on_transport_error(message),
        };
        match outcome {
            ProtocolEvent::Pending => continue,
            ProtocolEvent::Completed(result) => {
                debug!(sid = ?result.sid, "Evaluation completed");
                return Ok(result);
            }
            ProtocolEvent::Failed(error) => {
                warn!(%error, "Evaluation failed");
                return Err(error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    struct FakeTransport {
        script: VecDeque<TransportEvent>,
        /// When the script runs dry: hang (like a silent remote) or report a
        /// normal close.
        hang_when_empty: bool,
        sent: Vec<String>,
        closed: bool,
    }

    impl FakeTransport {
        fn scripted(events: Vec<TransportEvent>) -> Self {
            Self {
                script: events.into(),
                hang_when_empty: false,
                sent: Vec::new(),
                closed: false,
            }
        }

        fn silent() -> Self {
            Self {
                script: VecDeque::new(),
                hang_when_empty: true,
                sent: Vec::new(),
                closed: false,
            }
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send_frame(&mut self, frame: String) -> AppResult<()> {
            self.sent.push(frame);
            Ok(())
        }

        async fn next_event(&mut self) -> TransportEvent {
            match self.script.pop_front() {
                Some(event) => event,
                None if self.hang_when_empty => std::future::pending().await,
                None => TransportEvent::Closed,
            }
        }

        async fn close(&mut self) {
            self.closed = true;
        }
    }

    fn protocol() -> FrameProtocol {
        let options = EvaluationOptions {
            language: "zh_cn".to_string(),
            category: "read_sentence".to_string(),
            ent: "cn_vip".to_string(),
        };
        let mut protocol = FrameProtocol::new("app123", options, "你好", vec![1, 2, 3, 4]);
        protocol.begin();
        protocol
    }

    fn deadline_in(ms: u64) -> tokio::time::Instant {
        tokio::time::Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test]
    async fn test_immediate_result_resolves_success() {
        let reply = json!({
            "code": 0,
            "sid": "ise42",
            "data": {"status": 2, "result": {"total_score": 4.5}}
        });
        let mut transport =
            FakeTransport::scripted(vec![TransportEvent::Message(reply.to_string())]);
        let mut protocol = protocol();

        let result = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap();

        assert_eq!(result.code, 0);
        assert_eq!(result.sid.as_deref(), Some("ise42"));
        assert_eq!(result.payload["result"]["total_score"], 4.5);

        // exactly Init then Final went out, in order
        assert_eq!(transport.sent.len(), 2);
        let init: Value = serde_json::from_str(&transport.sent[0]).unwrap();
        let last: Value = serde_json::from_str(&transport.sent[1]).unwrap();
        assert_eq!(init["data"]["status"], 0);
        assert_eq!(last["data"]["status"], 2);

        assert!(transport.closed);
    }

    #[tokio::test]
    async fn test_remote_error_resolves_failure() {
        let reply = json!({"code": 10105, "desc": "invalid appid"});
        let mut transport =
            FakeTransport::scripted(vec![TransportEvent::Message(reply.to_string())]);
        let mut protocol = protocol();

        let err = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap_err();

        match err {
            AppError::Protocol { code, message } => {
                assert_eq!(code, Some(10105));
                assert_eq!(message, "invalid appid");
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert!(transport.closed);
    }

    #[tokio::test]
    async fn test_partial_frames_are_consumed_before_the_result() {
        let partial = json!({"code": 0, "data": {"status": 1, "result": {"partial": true}}});
        let terminal = json!({"code": 0, "data": {"status": 2, "result": {"done": true}}});
        let mut transport = FakeTransport::scripted(vec![
            TransportEvent::Message(partial.to_string()),
            TransportEvent::Message(terminal.to_string()),
        ]);
        let mut protocol = protocol();

        let result = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap();
        assert_eq!(result.payload["result"]["done"], true);
    }

    #[tokio::test]
    async fn test_close_without_result_is_a_protocol_failure() {
        let mut transport = FakeTransport::scripted(vec![TransportEvent::Closed]);
        let mut protocol = protocol();

        let err = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap_err();

        match err {
            AppError::Protocol { code, message } => {
                assert_eq!(code, None);
                assert!(message.contains("closed before"));
            }
            other => panic!("expected protocol error, got {:?}", other),
        }
        assert!(transport.closed);
    }

    #[tokio::test]
    async fn test_transport_error_resolves_failure() {
        let mut transport = FakeTransport::scripted(vec![TransportEvent::Failed(
            "connection reset by peer".to_string(),
        )]);
        let mut protocol = protocol();

        let err = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Transport(_)));
        assert!(transport.closed);
    }

    #[tokio::test]
    async fn test_silent_remote_hits_the_deadline_and_closes() {
        let mut transport = FakeTransport::silent();
        let mut protocol = protocol();

        let err = run_with_deadline(&mut protocol, &mut transport, deadline_in(50))
            .await
            .unwrap_err();
        assert_eq!(err, AppError::Timeout);
        assert!(transport.closed);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_a_codeless_protocol_failure() {
        let mut transport = FakeTransport::scripted(vec![TransportEvent::Message(
            "<html>502 Bad Gateway</html>".to_string(),
        )]);
        let mut protocol = protocol();

        let err = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap_err();
        match err {
            AppError::Protocol { code, .. } => assert_eq!(code, None),
            other => panic!("expected protocol error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_terminal_event_wins() {
        let first = json!({"code": 0, "data": {"status": 2, "result": {"first": true}}});
        let second = json!({"code": 10999, "desc": "late error"});
        let mut transport = FakeTransport::scripted(vec![
            TransportEvent::Message(first.to_string()),
            TransportEvent::Message(second.to_string()),
        ]);
        let mut protocol = protocol();

        // resolves on the first terminal message; the late error is never
        // consumed, let alone surfaced
        let result = run_with_deadline(&mut protocol, &mut transport, deadline_in(1000))
            .await
            .unwrap();
        assert_eq!(result.payload["result"]["first"], true);
    }
}
