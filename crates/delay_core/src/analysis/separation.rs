//! Out-of-process source separation.
//!
//! Separation models hold large native (GPU/CPU) allocations, so they run in
//! a short-lived worker process and all memory goes back to the OS when it
//! exits. The worker gets one JSON argument and prints one JSON response on
//! stdout; PCM travels as raw f32le files in a scratch directory.
//!
//! Both sides of a comparison must be processed identically: if either side
//! fails, both sides keep their original audio.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::decode::{f32_samples_to_bytes, read_f32_file};
use super::types::{AnalysisError, AnalysisResult};
use crate::config::SeparationSettings;
use crate::logging::JobLogger;

/// Hard cap on a single worker run.
pub const MAX_TIMEOUT_S: f64 = 7200.0;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Environment variables cleared to force CPU execution.
const GPU_VISIBILITY_VARS: [&str; 3] = [
    "CUDA_VISIBLE_DEVICES",
    "ROCR_VISIBLE_DEVICES",
    "HIP_VISIBLE_DEVICES",
];

/// Request passed as the worker's single argument.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationRequest {
    pub input_path: String,
    pub output_dir: String,
    pub target_stem: String,
    pub sample_rate: u32,
    pub model_filename: String,
    pub model_dir: String,
}

/// Response printed by the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct SeparationResponse {
    pub success: bool,
    #[serde(default)]
    pub output_path: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Reference/target pair after optional separation.
#[derive(Debug, Clone)]
pub struct SeparatedPair {
    pub reference: Vec<f32>,
    pub target: Vec<f32>,
    /// Both sides were separated.
    pub applied: bool,
}

/// Timeout actually used: `<= 0` means the cap, anything else is capped.
pub fn effective_timeout(timeout_s: f64) -> Duration {
    let secs = if timeout_s <= 0.0 || !timeout_s.is_finite() {
        MAX_TIMEOUT_S
    } else {
        timeout_s.min(MAX_TIMEOUT_S)
    };
    Duration::from_secs_f64(secs)
}

/// Separate both sides or neither.
///
/// Disabled separation returns copies of the inputs. Any worker failure or
/// timeout is logged and also returns copies of the inputs.
pub fn apply_separation(
    reference: &[f32],
    target: &[f32],
    sample_rate: u32,
    settings: &SeparationSettings,
    logger: &JobLogger,
) -> SeparatedPair {
    let original = || SeparatedPair {
        reference: reference.to_vec(),
        target: target.to_vec(),
        applied: false,
    };

    let Some(stem) = settings.mode.target_stem() else {
        return original();
    };

    logger.info(&format!(
        "[SOURCE SEPARATION] Separating both sides (stem={}, model={}, device={})",
        stem, settings.model, settings.device
    ));

    let separated = separate_samples(reference, sample_rate, stem, settings).and_then(|reference| {
        separate_samples(target, sample_rate, stem, settings).map(|target| (reference, target))
    });

    match separated {
        Ok((reference, target)) => {
            logger.info(&format!(
                "[SOURCE SEPARATION] Separation complete ({} / {} samples)",
                reference.len(),
                target.len()
            ));
            SeparatedPair {
                reference,
                target,
                applied: true,
            }
        }
        Err(e) => {
            logger.warn(&format!(
                "[SOURCE SEPARATION] {}; using original audio for both sides",
                e
            ));
            original()
        }
    }
}

/// Run the worker on one buffer.
pub fn separate_samples(
    samples: &[f32],
    sample_rate: u32,
    target_stem: &str,
    settings: &SeparationSettings,
) -> AnalysisResult<Vec<f32>> {
    let (program, leading_args) = settings
        .worker_command
        .split_first()
        .ok_or_else(|| AnalysisError::SeparationFailed("no worker command configured".to_string()))?;

    let scratch = tempfile::Builder::new().prefix("delay_sep_").tempdir()?;
    let input_path = scratch.path().join("input.f32");
    let output_dir = scratch.path().join("out");
    std::fs::create_dir_all(&output_dir)?;
    std::fs::write(&input_path, f32_samples_to_bytes(samples))?;

    let request = SeparationRequest {
        input_path: input_path.display().to_string(),
        output_dir: output_dir.display().to_string(),
        target_stem: target_stem.to_string(),
        sample_rate,
        model_filename: settings.model.clone(),
        model_dir: settings.model_dir.clone(),
    };
    let request_json = serde_json::to_string(&request)
        .map_err(|e| AnalysisError::SeparationFailed(format!("cannot encode request: {}", e)))?;

    let mut cmd = Command::new(program);
    cmd.args(leading_args)
        .arg(&request_json)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if settings.device.eq_ignore_ascii_case("cpu") {
        for var in GPU_VISIBILITY_VARS {
            cmd.env(var, "");
        }
    }
    // Own process group, so a timeout also reaches helpers the worker spawned.
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    tracing::debug!("Running separation worker: {:?}", cmd);
    let child = cmd
        .spawn()
        .map_err(|e| AnalysisError::SeparationFailed(format!("cannot start {}: {}", program, e)))?;

    let timeout = effective_timeout(settings.timeout_s);
    let (stdout, stderr) = wait_with_timeout(child, timeout)?;

    let response = parse_response(&stdout).ok_or_else(|| {
        AnalysisError::SeparationFailed(format!(
            "worker printed no response (stderr: {})",
            last_line(&stderr)
        ))
    })?;
    if !response.success {
        return Err(AnalysisError::SeparationFailed(
            response.error.unwrap_or_else(|| "unknown error".to_string()),
        ));
    }

    let output_path = response
        .output_path
        .map(PathBuf::from)
        .ok_or_else(|| AnalysisError::SeparationFailed("response has no output_path".to_string()))?;
    let separated = read_output(&output_path)?;
    if separated.is_empty() {
        return Err(AnalysisError::SeparationFailed("worker produced empty audio".to_string()));
    }
    Ok(separated)
}

/// Wait for the worker, killing it once `timeout` has passed.
fn wait_with_timeout(mut child: Child, timeout: Duration) -> AnalysisResult<(String, String)> {
    let stdout_reader = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = out.read_to_string(&mut buf);
            buf
        })
    });
    let stderr_reader = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let deadline = Instant::now() + timeout;
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break status;
        }
        if Instant::now() >= deadline {
            kill_worker(&mut child);
            let _ = child.wait();
            return Err(AnalysisError::SeparationFailed(format!(
                "timed out after {:.0}s",
                timeout.as_secs_f64()
            )));
        }
        thread::sleep(POLL_INTERVAL);
    };

    let stdout = stdout_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();
    let stderr = stderr_reader
        .and_then(|h| h.join().ok())
        .unwrap_or_default();

    if !status.success() {
        return Err(AnalysisError::SeparationFailed(format!(
            "worker exited with {}: {}",
            status,
            last_line(&stderr)
        )));
    }
    Ok((stdout, stderr))
}

/// Kill the worker and everything in its process group.
fn kill_worker(child: &mut Child) {
    #[cfg(unix)]
    {
        let group = format!("-{}", child.id());
        let killed = Command::new("kill")
            .args(["-s", "KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if !matches!(killed, Ok(status) if status.success()) {
            tracing::debug!("could not signal process group {}", group);
        }
    }
    let _ = child.kill();
}

/// Last JSON object line on stdout; workers may print warnings before it.
fn parse_response(stdout: &str) -> Option<SeparationResponse> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .filter(|l| l.starts_with('{'))
        .find_map(|l| serde_json::from_str(l).ok())
}

fn read_output(path: &Path) -> AnalysisResult<Vec<f32>> {
    read_f32_file(path).map_err(|e| {
        AnalysisError::SeparationFailed(format!("cannot read {}: {}", path.display(), e))
    })
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}
