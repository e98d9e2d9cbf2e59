//! # Client WebSocket Gateway
//!
//! Clients connect to `/ws/evaluate` and send one JSON request per
//! evaluation: `{ "audio": <bytes in a recognized encoding>, "text":
//! <reference text> }`. The gateway validates the request, transcodes the
//! audio, runs the remote evaluation session, and replies with exactly one
//! of `{ "success": true, "result": ..., "text": ... }` or
//! `{ "error": ... }`.
//!
//! ## Message Format:
//! - **Client → Server**: JSON request as a text frame (binary frames are
//!   decoded as UTF-8 JSON as well)
//! - **Server → Client**: one JSON response per request
//!
//! Each connection is an independent actor. The evaluation pipeline runs in
//! a spawned task and reports back through an actor message, so a slow
//! remote exchange never blocks the connection's heartbeat.

use crate::audio::{decode_audio, AudioTranscoder};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::evaluation::{EvaluationSession, SessionResult};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::Deserialize;
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How often the gateway pings its client.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// How long a client may stay silent before the connection is dropped.
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// One evaluation request from the client. `audio` stays a raw JSON value
/// until the payload decoder classifies its shape.
#[derive(Debug, Deserialize)]
struct ClientRequest {
    audio: Option<serde_json::Value>,
    text: Option<String>,
}

/// WebSocket actor handling one client connection.
pub struct EvaluationWebSocket {
    connection_id: Uuid,
    app_state: web::Data<AppState>,
    config: AppConfig,
    last_heartbeat: Instant,
}

impl EvaluationWebSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let config = app_state.get_config();
        Self {
            connection_id: Uuid::new_v4(),
            app_state,
            config,
            last_heartbeat: Instant::now(),
        }
    }

    /// Parse and run one request; any failure becomes a single `{error}`
    /// reply on this connection.
    fn handle_request(&mut self, raw: &str, ctx: &mut ws::WebsocketContext<Self>) {
        if let Err(err) = self.try_start_evaluation(raw, ctx) {
            warn!(connection = %self.connection_id, %err, "Evaluation request rejected");
            self.send_error(ctx, &err);
        }
    }

    /// Validate the request and hand it to the evaluation pipeline. Input
    /// problems are rejected here, before any transcoding or remote call.
    fn try_start_evaluation(
        &mut self,
        raw: &str,
        ctx: &mut ws::WebsocketContext<Self>,
    ) -> AppResult<()> {
        let request: ClientRequest = serde_json::from_str(raw)?;

        let text = request
            .text
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Input("Request is missing the reference text".to_string()))?;
        let audio_value = request
            .audio
            .ok_or_else(|| AppError::Input("Request is missing audio".to_string()))?;

        let audio = decode_audio(&audio_value)?;
        if audio.len() > self.config.performance.max_audio_bytes {
            return Err(AppError::Input(format!(
                "Audio payload exceeds {} bytes",
                self.config.performance.max_audio_bytes
            )));
        }

        if !self
            .app_state
            .try_begin_session(self.config.performance.max_concurrent_sessions)
        {
            warn!(connection = %self.connection_id, "Evaluation capacity reached");
            ctx.text(json!({"error": "Server is at capacity, try again later"}).to_string());
            return Ok(());
        }

        info!(
            connection = %self.connection_id,
            audio_bytes = audio.len(),
            text_chars = text.chars().count(),
            "Starting evaluation"
        );

        let transcoder = AudioTranscoder::new();
        let session = EvaluationSession::new(&self.config);
        let state = self.app_state.clone();
        let addr = ctx.address();

        tokio::spawn(async move {
            let outcome = async {
                let pcm = transcoder.transcode(&audio).await?;
                session.evaluate(pcm, &text).await
            }
            .await;

            state.end_session(outcome.is_ok());
            addr.do_send(EvaluationFinished {
                text,
                outcome,
            });
        });

        Ok(())
    }

    fn send_error(&self, ctx: &mut ws::WebsocketContext<Self>, err: &AppError) {
        ctx.text(json!({"error": err.client_message()}).to_string());
    }
}

/// Outcome of one evaluation pipeline, delivered back to the actor.
#[derive(Message)]
#[rtype(result = "()")]
struct EvaluationFinished {
    text: String,
    outcome: AppResult<SessionResult>,
}

impl Actor for EvaluationWebSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "WebSocket client connected");

        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!(connection = %act.connection_id, "Client heartbeat timeout, closing");
                ctx.stop();
            } else {
                ctx.ping(b"");
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!(connection = %self.connection_id, "WebSocket client disconnected");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for EvaluationWebSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.handle_request(&text, ctx);
            }
            Ok(ws::Message::Binary(data)) => {
                // some client libraries send the JSON request as a binary frame
                match std::str::from_utf8(&data) {
                    Ok(text) => {
                        let text = text.to_owned();
                        self.handle_request(&text, ctx);
                    }
                    Err(_) => {
                        self.send_error(
                            ctx,
                            &AppError::Input("Binary frame is not UTF-8 JSON".to_string()),
                        );
                    }
                }
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_heartbeat = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                debug!(connection = %self.connection_id, ?reason, "Client closed connection");
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!(connection = %self.connection_id, "Unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                warn!(connection = %self.connection_id, %err, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl Handler<EvaluationFinished> for EvaluationWebSocket {
    type Result = ();

    fn handle(&mut self, msg: EvaluationFinished, ctx: &mut Self::Context) {
        match msg.outcome {
            Ok(result) => {
                info!(connection = %self.connection_id, sid = ?result.sid, "Evaluation succeeded");
                ctx.text(
                    json!({
                        "success": true,
                        "result": result.payload,
                        "text": msg.text,
                    })
                    .to_string(),
                );
            }
            Err(err) => {
                warn!(connection = %self.connection_id, %err, "Evaluation failed");
                self.send_error(ctx, &err);
            }
        }
    }
}

/// HTTP → WebSocket upgrade for `/ws/evaluate`.
pub async fn evaluation_websocket(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New WebSocket connection request from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(EvaluationWebSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_request_parsing() {
        let raw = r#"{"audio": [1, 2, 3], "text": "你好"}"#;
        let request: ClientRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.text.as_deref(), Some("你好"));
        assert!(request.audio.is_some());
    }

    #[test]
    fn test_client_request_with_missing_fields_parses() {
        // field presence is validated separately so the error message can be
        // specific about what is missing
        let request: ClientRequest = serde_json::from_str("{}").unwrap();
        assert!(request.audio.is_none());
        assert!(request.text.is_none());
    }

    #[test]
    fn test_success_payload_shape() {
        let payload = json!({
            "success": true,
            "result": {"total_score": 4.5},
            "text": "你好",
        });
        assert_eq!(payload["success"], true);
        assert_eq!(payload["result"]["total_score"], 4.5);
        assert_eq!(payload["text"], "你好");
    }
}
