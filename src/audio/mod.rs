//! # Audio Handling Module
//!
//! Everything between the client's `audio` field and the PCM bytes the
//! remote evaluation service expects.
//!
//! ## Key Components:
//! - **Payload decoding**: the client `audio` field arrives in several
//!   shapes (byte array, Node Buffer wrapper, nested JSON string); each is
//!   decoded explicitly and anything else is rejected before transcoding
//! - **Transcoder**: ffmpeg subprocess converting arbitrary recorded audio
//!   into mono 16 kHz 16-bit little-endian PCM
//!
//! ## Remote Format Requirements:
//! - Sample rate 16 kHz, mono, 16-bit signed little-endian PCM

pub mod decode;
pub mod transcoder;

pub use decode::decode_audio;
pub use transcoder::AudioTranscoder;
