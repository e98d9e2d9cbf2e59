//! # Audio Transcoding
//!
//! Converts whatever the client recorded (typically WebM/Opus from a
//! browser) into the mono 16 kHz 16-bit little-endian PCM the remote
//! evaluation service requires. ffmpeg does the actual work as an opaque
//! subprocess: input bytes in, PCM bytes out, or a transcode error.
//!
//! Temporary artifacts are named per request with a UUID so concurrent
//! evaluations can never read each other's audio, and an RAII guard removes
//! both files on every exit path.

use crate::error::{AppError, AppResult};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

/// Invokes the external transcoding tool.
#[derive(Debug, Clone)]
pub struct AudioTranscoder {
    program: String,
}

impl Default for AudioTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioTranscoder {
    pub fn new() -> Self {
        Self {
            program: "ffmpeg".to_string(),
        }
    }

    /// Override the transcoder binary. Used by tests to exercise failure
    /// paths without a real ffmpeg.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Transcode recorded audio bytes into mono 16 kHz s16le PCM.
    ///
    /// ## Failure modes:
    /// - the subprocess cannot be spawned
    /// - the subprocess exits non-zero (stderr excerpt in the error)
    /// - the output artifact is empty or not parseable as 16-bit PCM
    ///
    /// The temp artifacts are removed in all of these cases as well as on
    /// success; the guard's Drop also covers panics in the caller's task.
    pub async fn transcode(&self, input: &[u8]) -> AppResult<Vec<u8>> {
        let artifacts = TempArtifacts::new();

        tokio::fs::write(&artifacts.input, input)
            .await
            .map_err(|e| AppError::Transcode(format!("failed to write input artifact: {}", e)))?;

        debug!(
            input_bytes = input.len(),
            artifact = %artifacts.input.display(),
            "Starting audio transcode"
        );

        let output = Command::new(&self.program)
            .arg("-y")
            .arg("-i")
            .arg(&artifacts.input)
            .args(["-f", "s16le", "-acodec", "pcm_s16le", "-ac", "1", "-ar", "16000"])
            .arg(&artifacts.output)
            .output()
            .await
            .map_err(|e| AppError::Transcode(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr.lines().last().unwrap_or("no diagnostic output");
            warn!(status = ?output.status.code(), "Transcode subprocess failed: {}", detail);
            return Err(AppError::Transcode(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                detail
            )));
        }

        let pcm = tokio::fs::read(&artifacts.output)
            .await
            .map_err(|e| AppError::Transcode(format!("failed to read output artifact: {}", e)))?;

        if pcm.is_empty() {
            return Err(AppError::Transcode(
                "transcoder produced no audio data".to_string(),
            ));
        }

        validate_pcm(&pcm)?;

        debug!(pcm_bytes = pcm.len(), "Transcode completed");
        Ok(pcm)
    }
}

/// Sanity-check that the transcoder output is structurally 16-bit LE PCM.
/// Only the first samples are inspected; the remote service validates the
/// audio content itself.
fn validate_pcm(data: &[u8]) -> AppResult<()> {
    if data.len() % 2 != 0 {
        return Err(AppError::Transcode(
            "PCM output length is not a whole number of 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut sample_count = 0;
    while cursor.read_i16::<LittleEndian>().is_ok() {
        sample_count += 1;
        if sample_count >= 1000 {
            break;
        }
    }

    if sample_count == 0 {
        return Err(AppError::Transcode(
            "PCM output contains no samples".to_string(),
        ));
    }

    Ok(())
}

/// Unique per-request temp file pair, removed when dropped.
struct TempArtifacts {
    input: PathBuf,
    output: PathBuf,
}

impl TempArtifacts {
    fn new() -> Self {
        let id = Uuid::new_v4();
        let dir = std::env::temp_dir();
        Self {
            input: dir.join(format!("ise-{}.in", id)),
            output: dir.join(format!("ise-{}.pcm", id)),
        }
    }
}

impl Drop for TempArtifacts {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.input);
        let _ = std::fs::remove_file(&self.output);
    }
}
