//! Audio track detection and selection.
//!
//! Uses `mkvmerge -J` to query track information from media files and
//! pick the audio stream to correlate: an explicit index first, then a
//! language match, then the first audio track.

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use super::types::{AnalysisError, AnalysisResult};

/// Two-letter codes accepted in place of their ISO 639-2 form.
const LANG_2_TO_3: &[(&str, &str)] = &[
    ("en", "eng"),
    ("ja", "jpn"),
    ("jp", "jpn"),
    ("zh", "zho"),
    ("cn", "zho"),
    ("es", "spa"),
    ("de", "deu"),
    ("fr", "fra"),
    ("it", "ita"),
    ("pt", "por"),
    ("ru", "rus"),
    ("ko", "kor"),
    ("ar", "ara"),
    ("tr", "tur"),
    ("pl", "pol"),
    ("nl", "nld"),
    ("sv", "swe"),
    ("no", "nor"),
    ("fi", "fin"),
    ("da", "dan"),
    ("cs", "ces"),
    ("sk", "slk"),
    ("sl", "slv"),
    ("hu", "hun"),
    ("el", "ell"),
    ("he", "heb"),
    ("id", "ind"),
    ("vi", "vie"),
    ("th", "tha"),
    ("hi", "hin"),
    ("ur", "urd"),
    ("fa", "fas"),
    ("uk", "ukr"),
    ("ro", "ron"),
    ("bg", "bul"),
    ("sr", "srp"),
    ("hr", "hrv"),
    ("ms", "msa"),
    ("bn", "ben"),
    ("ta", "tam"),
    ("te", "tel"),
];

/// Track kind as reported by mkvmerge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Subtitles,
    Other,
}

impl TrackKind {
    fn parse(s: &str) -> Self {
        match s {
            "video" => Self::Video,
            "audio" => Self::Audio,
            "subtitles" => Self::Subtitles,
            _ => Self::Other,
        }
    }
}

/// One container track.
#[derive(Debug, Clone)]
pub struct TrackInfo {
    /// mkvmerge track ID.
    pub id: i64,
    pub kind: TrackKind,
    pub language: Option<String>,
    pub name: Option<String>,
    pub codec_id: Option<String>,
    pub channels: Option<u32>,
    pub default: bool,
    /// First presentation timestamp in nanoseconds.
    pub minimum_timestamp_ns: Option<i64>,
    /// Nanoseconds per frame (video tracks).
    pub default_duration_ns: Option<i64>,
}

/// Audio track information.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    /// Track ID (mkvmerge track ID).
    pub id: i64,
    /// Audio stream index (0-based, for FFmpeg -map 0:a:N).
    pub stream_index: usize,
    pub language: Option<String>,
    pub name: Option<String>,
    pub codec: Option<String>,
    pub channels: Option<u32>,
    pub default: bool,
}

impl AudioTrack {
    /// One-line description for job logs, e.g. `Track 0: jpn, FLAC 2.0, 'Main'`.
    pub fn describe(&self) -> String {
        let lang = self.language.as_deref().unwrap_or("und");
        let codec = self
            .codec
            .as_deref()
            .map(|c| c.trim_start_matches("A_"))
            .unwrap_or("unknown");
        let channels = match self.channels.unwrap_or(2) {
            1 => "Mono".to_string(),
            2 => "2.0".to_string(),
            6 => "5.1".to_string(),
            8 => "7.1".to_string(),
            n => format!("{}ch", n),
        };
        let mut out = format!("Track {}: {}, {} {}", self.stream_index, lang, codec, channels);
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            out.push_str(&format!(", '{}'", name));
        }
        out
    }
}

/// Track listing of one media file.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub tracks: Vec<TrackInfo>,
}

impl MediaInfo {
    /// Audio tracks in container order with their ffmpeg stream indices.
    pub fn audio_tracks(&self) -> Vec<AudioTrack> {
        self.tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .enumerate()
            .map(|(stream_index, t)| AudioTrack {
                id: t.id,
                stream_index,
                language: t.language.clone(),
                name: t.name.clone(),
                codec: t.codec_id.clone(),
                channels: t.channels,
                default: t.default,
            })
            .collect()
    }

    /// First video track, which defines the output timeline.
    pub fn first_video(&self) -> Option<&TrackInfo> {
        self.tracks.iter().find(|t| t.kind == TrackKind::Video)
    }

    /// Frame rate of the first video track.
    pub fn video_framerate(&self) -> Option<f64> {
        self.first_video()
            .and_then(|t| t.default_duration_ns)
            .filter(|&ns| ns > 0)
            .map(|ns| 1e9 / ns as f64)
    }
}

#[derive(Debug, Deserialize)]
struct MkvmergeInfo {
    #[serde(default)]
    tracks: Vec<MkvmergeTrack>,
}

#[derive(Debug, Deserialize)]
struct MkvmergeTrack {
    id: i64,
    #[serde(rename = "type")]
    track_type: String,
    #[serde(default)]
    properties: MkvmergeTrackProps,
}

#[derive(Debug, Default, Deserialize)]
struct MkvmergeTrackProps {
    language: Option<String>,
    track_name: Option<String>,
    codec_id: Option<String>,
    audio_channels: Option<u32>,
    #[serde(default)]
    default_track: bool,
    minimum_timestamp: Option<i64>,
    default_duration: Option<i64>,
}

/// Parse `mkvmerge -J` output.
pub fn parse_media_info(json: &str) -> AnalysisResult<MediaInfo> {
    let info: MkvmergeInfo = serde_json::from_str(json).map_err(|e| {
        AnalysisError::process_failed("mkvmerge", format!("Failed to parse output: {}", e))
    })?;

    let tracks = info
        .tracks
        .into_iter()
        .map(|t| TrackInfo {
            id: t.id,
            kind: TrackKind::parse(&t.track_type),
            language: t.properties.language,
            name: t.properties.track_name,
            codec_id: t.properties.codec_id,
            channels: t.properties.audio_channels,
            default: t.properties.default_track,
            minimum_timestamp_ns: t.properties.minimum_timestamp,
            default_duration_ns: t.properties.default_duration,
        })
        .collect();

    Ok(MediaInfo { tracks })
}

/// Run `mkvmerge -J` on a file.
pub fn probe_media(path: &Path) -> AnalysisResult<MediaInfo> {
    if !path.exists() {
        return Err(AnalysisError::SourceNotFound(path.display().to_string()));
    }

    let output = Command::new("mkvmerge")
        .arg("-J")
        .arg(path)
        .output()
        .map_err(|e| AnalysisError::process_failed("mkvmerge", format!("Failed to execute: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AnalysisError::process_failed(
            "mkvmerge",
            format!("Exit code {}: {}", output.status, stderr.trim()),
        ));
    }

    parse_media_info(&String::from_utf8_lossy(&output.stdout))
}

/// Normalize a language code to ISO 639-2; `und` and blanks mean "no preference".
pub fn normalize_language(lang: Option<&str>) -> Option<String> {
    let s = lang?.trim().to_lowercase();
    if s.is_empty() || s == "und" {
        return None;
    }
    if s.len() == 2 {
        if let Some((_, three)) = LANG_2_TO_3.iter().find(|(two, _)| *two == s) {
            return Some((*three).to_string());
        }
    }
    Some(s)
}

/// Pick the audio track to correlate.
///
/// An out-of-range explicit index is ignored in favour of the language and
/// first-track rules. No audio tracks at all is a `TrackResolutionFailure`.
pub fn resolve_audio_track<'a>(
    path: &Path,
    tracks: &'a [AudioTrack],
    explicit_index: Option<usize>,
    language: Option<&str>,
) -> AnalysisResult<&'a AudioTrack> {
    let first = tracks.first().ok_or_else(|| AnalysisError::TrackResolutionFailure {
        path: path.display().to_string(),
        reason: "file has no audio tracks".to_string(),
    })?;

    if let Some(index) = explicit_index {
        match tracks.get(index) {
            Some(track) => return Ok(track),
            None => tracing::warn!(
                "Audio index {} out of range ({} tracks) in {}, ignoring",
                index,
                tracks.len(),
                path.display()
            ),
        }
    }

    if let Some(lang) = normalize_language(language) {
        let matched = tracks.iter().find(|t| {
            t.language
                .as_deref()
                .map(|l| l.trim().eq_ignore_ascii_case(&lang))
                .unwrap_or(false)
        });
        match matched {
            Some(track) => {
                tracing::debug!(
                    "Found track matching language '{}': stream index {}",
                    lang,
                    track.stream_index
                );
                return Ok(track);
            }
            None => tracing::debug!(
                "No track matching language '{}', using first track (index 0)",
                lang
            ),
        }
    }

    Ok(first)
}
