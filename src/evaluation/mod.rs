//! # Evaluation Module
//!
//! The streaming exchange with the remote pronunciation evaluation service.
//!
//! ## Key Components:
//! - **Auth**: signed, time-limited connection URLs (HMAC-SHA256 over a
//!   canonical host/date/request-line string)
//! - **Protocol**: the frame state machine — one Init frame, the audio, a
//!   Final end-of-stream marker, then inbound status/result frames until a
//!   terminal message
//! - **Session**: owns one WebSocket connection per request, drives the
//!   protocol under an overall deadline, and resolves exactly once
//!
//! The protocol layer never touches a socket; the session layer feeds it
//! transport events through the [`session::Transport`] trait, which is what
//! the tests fake.

pub mod auth;
pub mod protocol;
pub mod session;

pub use auth::{AuthSigner, SignedUrl};
pub use protocol::{EvaluationOptions, FrameProtocol, ProtocolEvent, SessionResult};
pub use session::EvaluationSession;
