//! FFmpeg audio decoding.
//!
//! Decodes one audio stream of a media file to mono 32-bit float PCM at the
//! analysis sample rate. The whole stream is read before returning.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use crate::analysis::types::{AnalysisError, AnalysisResult, AudioData};

/// Default sample rate for analysis (48kHz provides good accuracy).
pub const DEFAULT_ANALYSIS_SAMPLE_RATE: u32 = 48000;

/// Decode one audio stream to mono f32.
///
/// The stream is selected with `-map 0:a:N`. `use_soxr` switches ffmpeg to
/// the SoX resampler.
pub fn decode_audio(
    input_path: &Path,
    stream_index: usize,
    sample_rate: u32,
    use_soxr: bool,
) -> AnalysisResult<AudioData> {
    if !input_path.exists() {
        return Err(AnalysisError::SourceNotFound(input_path.display().to_string()));
    }

    let decode_failure = |reason: String| AnalysisError::DecodeFailure {
        path: input_path.display().to_string(),
        reason,
    };

    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-nostdin", "-v", "error", "-i"])
        .arg(input_path)
        .arg("-map")
        .arg(format!("0:a:{}", stream_index));

    if use_soxr {
        cmd.args(["-resampler", "soxr"]);
    }

    cmd.args(["-ac", "1", "-ar"])
        .arg(sample_rate.to_string())
        .args(["-f", "f32le", "-"]);

    cmd.stdin(Stdio::null())
        .stderr(Stdio::piped())
        .stdout(Stdio::piped());

    tracing::debug!("Running FFmpeg: {:?}", cmd);

    let child = cmd
        .spawn()
        .map_err(|e| AnalysisError::process_failed("ffmpeg", format!("Failed to spawn: {}", e)))?;

    let (buffer, status, stderr) = collect_output(child)
        .map_err(|e| decode_failure(format!("ffmpeg process error: {}", e)))?;

    if !status.success() {
        return Err(decode_failure(format!(
            "ffmpeg exited with {}: {}",
            status,
            stderr.trim()
        )));
    }

    let trimmed = buffer.len() % 4;
    if trimmed != 0 {
        tracing::debug!(
            "Trimmed {} trailing bytes from {}",
            trimmed,
            input_path.display()
        );
    }

    let samples = bytes_to_f32_samples(&buffer);
    if samples.is_empty() {
        return Err(decode_failure("No audio samples decoded".to_string()));
    }

    tracing::debug!(
        "Decoded {} samples ({:.2}s) from {}",
        samples.len(),
        samples.len() as f64 / sample_rate.max(1) as f64,
        input_path.display()
    );

    Ok(AudioData::new(samples, sample_rate))
}

/// Read stdout to the end while stderr drains on its own thread.
///
/// Both pipes must be emptied concurrently: a child that fills the stderr
/// pipe blocks and never closes stdout.
fn collect_output(mut child: Child) -> io::Result<(Vec<u8>, ExitStatus, String)> {
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = err.read_to_end(&mut buf);
            buf
        })
    });

    let mut stdout_bytes = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        out.read_to_end(&mut stdout_bytes)?;
    }
    let status = child.wait()?;

    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    Ok((
        stdout_bytes,
        status,
        String::from_utf8_lossy(&stderr).into_owned(),
    ))
}

/// Convert little-endian f32 bytes to samples, dropping a partial trailing sample.
fn bytes_to_f32_samples(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Write samples as raw little-endian f32.
pub(crate) fn f32_samples_to_bytes(samples: &[f32]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Read a raw f32le file written by the separation worker.
pub(crate) fn read_f32_file(path: &Path) -> AnalysisResult<Vec<f32>> {
    let bytes = std::fs::read(path)?;
    Ok(bytes_to_f32_samples(&bytes))
}
