//! # Frame Protocol State Machine
//!
//! One evaluation exchange, as the remote service sees it:
//!
//! ```text
//! Idle -> AwaitingOpen -> SendingInit -> SendingAudio -> AwaitingResult
//!                                                          |        |
//!                                                      Completed  Failed
//! ```
//!
//! Outbound, exactly one Init frame (status 0) carrying the application
//! identity, evaluation parameters, and the base64-encoded reference text;
//! then one Final frame (status 2) carrying the whole PCM payload. Audio is
//! sent single-shot: recordings are bounded, so no intermediate status-1
//! chunks are produced and nothing may be sent after the Final frame.
//!
//! Inbound, frames with `code != 0` are terminal errors; `code == 0` with
//! embedded status 2 completes the session; status 0/1 frames carry the
//! result-so-far and overwrite the previously stored partial. The first
//! terminal event wins — later messages, closes, and transport errors are
//! ignored.
//!
//! This layer holds no socket. The session layer feeds it transport events
//! and sends whatever frames it produces, which keeps every transition unit
//! testable.

use crate::config::EvaluationConfig;
use crate::error::{AppError, AppResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const AUDIO_FORMAT: &str = "audio/L16;rate=16000";
const AUDIO_ENCODING: &str = "raw";

/// Frame `status` discriminator: 0 = first, 1 = continuation, 2 = last.
pub const STATUS_FIRST: i32 = 0;
pub const STATUS_CONTINUE: i32 = 1;
pub const STATUS_LAST: i32 = 2;

/// Evaluation parameters for one request.
#[derive(Debug, Clone)]
pub struct EvaluationOptions {
    pub language: String,
    pub category: String,
    pub ent: String,
}

impl From<&EvaluationConfig> for EvaluationOptions {
    fn from(config: &EvaluationConfig) -> Self {
        Self {
            language: config.language.clone(),
            category: config.category.clone(),
            ent: config.ent.clone(),
        }
    }
}

/// Terminal payload of a completed session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub code: i32,
    pub sid: Option<String>,
    pub payload: Value,
}

/// What a processed inbound event means for the session.
#[derive(Debug)]
pub enum ProtocolEvent {
    /// Not terminal; keep waiting. Also returned for events that arrive
    /// after the session already resolved, which are ignored.
    Pending,
    Completed(SessionResult),
    Failed(AppError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Idle,
    AwaitingOpen,
    SendingInit,
    SendingAudio,
    AwaitingResult,
    Completed,
    Failed,
}

/// The per-request state machine. Owns the request data and produces/consumes
/// wire frames; never touches a transport.
pub struct FrameProtocol {
    app_id: String,
    options: EvaluationOptions,
    text: String,
    audio: Vec<u8>,
    state: ProtocolState,
    partial: Option<Value>,
    sid: Option<String>,
}

impl FrameProtocol {
    pub fn new(
        app_id: impl Into<String>,
        options: EvaluationOptions,
        text: impl Into<String>,
        audio: Vec<u8>,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            options,
            text: text.into(),
            audio,
            state: ProtocolState::Idle,
            partial: None,
            sid: None,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, ProtocolState::Completed | ProtocolState::Failed)
    }

    /// The session was created and a connection attempt is starting.
    pub fn begin(&mut self) {
        if self.state == ProtocolState::Idle {
            self.state = ProtocolState::AwaitingOpen;
        }
    }

    /// The transport reported "connected"; outbound framing may start.
    pub fn on_open(&mut self) -> AppResult<()> {
        match self.state {
            ProtocolState::AwaitingOpen => {
                self.state = ProtocolState::SendingInit;
                Ok(())
            }
            _ => Err(AppError::Internal(format!(
                "transport opened in unexpected protocol state {:?}",
                self.state
            ))),
        }
    }

    /// Produce the next outbound frame, in order. Returns `None` once the
    /// Final frame has been produced; nothing is ever emitted after it.
    pub fn next_outbound(&mut self) -> AppResult<Option<String>> {
        match self.state {
            ProtocolState::SendingInit => {
                let frame = self.init_frame()?;
                self.state = ProtocolState::SendingAudio;
                Ok(Some(frame))
            }
            ProtocolState::SendingAudio => {
                let frame = self.final_frame()?;
                self.state = ProtocolState::AwaitingResult;
                Ok(Some(frame))
            }
            ProtocolState::AwaitingResult
            | ProtocolState::Completed
            | ProtocolState::Failed => Ok(None),
            ProtocolState::Idle | ProtocolState::AwaitingOpen => Err(AppError::Internal(
                "outbound frame requested before the transport opened".to_string(),
            )),
        }
    }

    /// Process one inbound message.
    pub fn on_message(&mut self, raw: &str) -> ProtocolEvent {
        if self.is_terminal() {
            return ProtocolEvent::Pending;
        }

        let frame: ResponseFrame = match serde_json::from_str(raw) {
            Ok(frame) => frame,
            Err(e) => {
                return self.fail(AppError::Protocol {
                    code: None,
                    message: format!("unparseable response frame: {}", e),
                });
            }
        };

        if frame.sid.is_some() {
            self.sid = frame.sid;
        }

        if frame.code != 0 {
            let message = frame
                .message
                .unwrap_or_else(|| format!("remote error code {}", frame.code));
            return self.fail(AppError::Protocol {
                code: Some(frame.code),
                message,
            });
        }

        match frame.data {
            Some(data) if data.status == STATUS_LAST => {
                self.state = ProtocolState::Completed;
                // some service versions put the scored result only in earlier
                // frames and send the status-2 marker with an empty body
                let payload = if data.payload.is_empty() {
                    self.partial.take()
                } else {
                    None
                }
                .unwrap_or_else(|| Value::Object(data.payload));
                ProtocolEvent::Completed(SessionResult {
                    code: frame.code,
                    sid: self.sid.clone(),
                    payload,
                })
            }
            Some(data) if data.status == STATUS_FIRST || data.status == STATUS_CONTINUE => {
                // each non-final frame carries the result-so-far; keep the latest
                self.partial = Some(Value::Object(data.payload));
                ProtocolEvent::Pending
            }
            Some(_) | None => ProtocolEvent::Pending,
        }
    }

    /// The transport errored before a terminal message.
    pub fn on_transport_error(&mut self, message: impl Into<String>) -> ProtocolEvent {
        if self.is_terminal() {
            return ProtocolEvent::Pending;
        }
        self.fail(AppError::Transport(message.into()))
    }

    /// The transport closed. A close without a preceding terminal message is
    /// a protocol failure, never a silent success.
    pub fn on_close(&mut self) -> ProtocolEvent {
        if self.is_terminal() {
            return ProtocolEvent::Pending;
        }
        self.fail(AppError::Protocol {
            code: None,
            message: "connection closed before a final result".to_string(),
        })
    }

    fn fail(&mut self, error: AppError) -> ProtocolEvent {
        self.state = ProtocolState::Failed;
        ProtocolEvent::Failed(error)
    }

    fn init_frame(&self) -> AppResult<String> {
        let frame = InitFrame {
            common: CommonField { app_id: &self.app_id },
            business: BusinessField {
                language: &self.options.language,
                category: &self.options.category,
                ent: &self.options.ent,
                aue: AUDIO_ENCODING,
                text: BASE64.encode(self.text.as_bytes()),
                text_type: "base64",
            },
            data: FrameData {
                status: STATUS_FIRST,
                format: Some(AUDIO_FORMAT),
                encoding: Some(AUDIO_ENCODING),
                audio: None,
            },
        };
        serde_json::to_string(&frame)
            .map_err(|e| AppError::Internal(format!("failed to encode init frame: {}", e)))
    }

    fn final_frame(&self) -> AppResult<String> {
        let frame = AudioFrame {
            data: FrameData {
                status: STATUS_LAST,
                format: Some(AUDIO_FORMAT),
                encoding: Some(AUDIO_ENCODING),
                audio: Some(BASE64.encode(&self.audio)),
            },
        };
        serde_json::to_string(&frame)
            .map_err(|e| AppError::Internal(format!("failed to encode audio frame: {}", e)))
    }
}

// --- wire types -----------------------------------------------------------

#[derive(Serialize)]
struct InitFrame<'a> {
    common: CommonField<'a>,
    business: BusinessField<'a>,
    data: FrameData,
}

#[derive(Serialize)]
struct CommonField<'a> {
    app_id: &'a str,
}

#[derive(Serialize)]
struct BusinessField<'a> {
    language: &'a str,
    category: &'a str,
    ent: &'a str,
    aue: &'a str,
    text: String,
    text_type: &'a str,
}

#[derive(Serialize)]
struct AudioFrame {
    data: FrameData,
}

#[derive(Serialize)]
struct FrameData {
    status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    audio: Option<String>,
}

/// Inbound response frame. The service has used both `desc` and `message`
/// for the error description across versions.
#[derive(Debug, Deserialize)]
struct ResponseFrame {
    code: i32,
    #[serde(default, alias = "desc")]
    message: Option<String>,
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    data: Option<ResponseData>,
}

#[derive(Debug, Deserialize)]
struct ResponseData {
    status: i32,
    #[serde(flatten)]
    payload: serde_json::Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn options() -> EvaluationOptions {
        EvaluationOptions {
            language: "zh_cn".to_string(),
            category: "read_sentence".to_string(),
            ent: "cn_vip".to_string(),
        }
    }

    fn opened_protocol() -> FrameProtocol {
        let mut protocol =
            FrameProtocol::new("app123", options(), "你好", vec![1, 2, 3, 4]);
        protocol.begin();
        protocol.on_open().unwrap();
        protocol
    }

    /// Drain all outbound frames, as the session layer does after open.
    fn drain_outbound(protocol: &mut FrameProtocol) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Some(frame) = protocol.next_outbound().unwrap() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[test]
    fn test_outbound_frame_order_and_contents() {
        let mut protocol = opened_protocol();
        let frames = drain_outbound(&mut protocol);
        assert_eq!(frames.len(), 2);

        let init = &frames[0];
        assert_eq!(init["data"]["status"], 0);
        assert_eq!(init["common"]["app_id"], "app123");
        assert_eq!(init["business"]["language"], "zh_cn");
        assert_eq!(init["business"]["category"], "read_sentence");
        assert_eq!(init["business"]["ent"], "cn_vip");
        assert_eq!(init["business"]["aue"], "raw");
        assert_eq!(init["business"]["text"], BASE64.encode("你好".as_bytes()));
        assert_eq!(init["business"]["text_type"], "base64");
        assert_eq!(init["data"]["format"], "audio/L16;rate=16000");
        assert!(init["data"]["audio"].is_null());

        let last = &frames[1];
        assert_eq!(last["data"]["status"], 2);
        assert_eq!(last["data"]["audio"], BASE64.encode([1u8, 2, 3, 4]));
        assert_eq!(last["data"]["encoding"], "raw");
    }

    #[test]
    fn test_no_frame_after_final() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        // repeated polling never produces another frame
        for _ in 0..3 {
            assert!(protocol.next_outbound().unwrap().is_none());
        }
        assert_eq!(protocol.state(), ProtocolState::AwaitingResult);
    }

    #[test]
    fn test_outbound_before_open_is_rejected() {
        let mut protocol = FrameProtocol::new("app123", options(), "hi", vec![0]);
        assert!(protocol.next_outbound().is_err());
        protocol.begin();
        assert!(protocol.next_outbound().is_err());
    }

    #[test]
    fn test_terminal_result_completes_session() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let raw = json!({
            "code": 0,
            "sid": "ise000001",
            "data": {"status": 2, "result": {"total_score": 4.5}}
        })
        .to_string();

        match protocol.on_message(&raw) {
            ProtocolEvent::Completed(result) => {
                assert_eq!(result.code, 0);
                assert_eq!(result.sid.as_deref(), Some("ise000001"));
                assert_eq!(result.payload["result"]["total_score"], 4.5);
            }
            other => panic!("expected completion, got {:?}", other),
        }
        assert_eq!(protocol.state(), ProtocolState::Completed);
    }

    #[test]
    fn test_partial_frames_do_not_resolve() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let partial = json!({"code": 0, "data": {"status": 1, "result": {"partial": true}}});
        assert!(matches!(
            protocol.on_message(&partial.to_string()),
            ProtocolEvent::Pending
        ));
        assert_eq!(protocol.state(), ProtocolState::AwaitingResult);

        let terminal = json!({"code": 0, "data": {"status": 2, "result": {"done": true}}});
        assert!(matches!(
            protocol.on_message(&terminal.to_string()),
            ProtocolEvent::Completed(_)
        ));
    }

    #[test]
    fn test_empty_final_frame_falls_back_to_the_stored_partial() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let partial = json!({"code": 0, "data": {"status": 1, "result": {"total_score": 3.0}}});
        assert!(matches!(
            protocol.on_message(&partial.to_string()),
            ProtocolEvent::Pending
        ));

        let terminal = json!({"code": 0, "data": {"status": 2}});
        match protocol.on_message(&terminal.to_string()) {
            ProtocolEvent::Completed(result) => {
                assert_eq!(result.payload["result"]["total_score"], 3.0);
            }
            other => panic!("expected completion, got {:?}", other),
        }
    }

    #[test]
    fn test_remote_error_code_fails_session() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let raw = json!({"code": 10105, "desc": "invalid appid"}).to_string();
        match protocol.on_message(&raw) {
            ProtocolEvent::Failed(AppError::Protocol { code, message }) => {
                assert_eq!(code, Some(10105));
                assert_eq!(message, "invalid appid");
            }
            other => panic!("expected protocol failure, got {:?}", other),
        }
        assert_eq!(protocol.state(), ProtocolState::Failed);
    }

    #[test]
    fn test_message_field_alias() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let raw = json!({"code": 5, "message": "engine busy"}).to_string();
        match protocol.on_message(&raw) {
            ProtocolEvent::Failed(AppError::Protocol { code, message }) => {
                assert_eq!(code, Some(5));
                assert_eq!(message, "engine busy");
            }
            other => panic!("expected protocol failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_message_is_a_codeless_protocol_error() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        match protocol.on_message("not json at all") {
            ProtocolEvent::Failed(AppError::Protocol { code, .. }) => assert_eq!(code, None),
            other => panic!("expected protocol failure, got {:?}", other),
        }
    }

    #[test]
    fn test_close_before_terminal_is_a_failure() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        match protocol.on_close() {
            ProtocolEvent::Failed(AppError::Protocol { code, message }) => {
                assert_eq!(code, None);
                assert!(message.contains("closed before"));
            }
            other => panic!("expected protocol failure, got {:?}", other),
        }
    }

    #[test]
    fn test_resolution_happens_at_most_once() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        let terminal = json!({"code": 0, "data": {"status": 2, "result": {"first": true}}});
        assert!(matches!(
            protocol.on_message(&terminal.to_string()),
            ProtocolEvent::Completed(_)
        ));

        // a second terminal message, a close, and a transport error are all ignored
        let second = json!({"code": 0, "data": {"status": 2, "result": {"second": true}}});
        assert!(matches!(
            protocol.on_message(&second.to_string()),
            ProtocolEvent::Pending
        ));
        assert!(matches!(protocol.on_close(), ProtocolEvent::Pending));
        assert!(matches!(
            protocol.on_transport_error("late error"),
            ProtocolEvent::Pending
        ));
        assert_eq!(protocol.state(), ProtocolState::Completed);
    }

    #[test]
    fn test_error_after_failure_is_ignored() {
        let mut protocol = opened_protocol();
        drain_outbound(&mut protocol);

        assert!(matches!(
            protocol.on_transport_error("connection reset"),
            ProtocolEvent::Failed(AppError::Transport(_))
        ));
        assert!(matches!(protocol.on_close(), ProtocolEvent::Pending));
        assert_eq!(protocol.state(), ProtocolState::Failed);
    }
}
