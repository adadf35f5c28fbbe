//! Format descriptors as reported by `yt-dlp --dump-single-json`.
//!
//! Only the fields the catalog and the selector look at are modelled. Every
//! field is optional because yt-dlp leaves out whatever an extractor could not
//! determine, and a single odd entry must never spoil the whole listing.

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Codec value yt-dlp uses to say "this stream has no such track".
const ABSENT_CODEC: &str = "none";

/// One encoding variant of a source video.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormatDescriptor {
    #[serde(rename = "format_id", default)]
    pub id: String,
    #[serde(rename = "ext", default)]
    pub container: String,
    #[serde(rename = "vcodec")]
    pub video_codec: Option<String>,
    #[serde(rename = "acodec")]
    pub audio_codec: Option<String>,
    pub height: Option<u32>,
    pub width: Option<u32>,
    #[serde(rename = "fps")]
    pub frame_rate: Option<f64>,
    #[serde(rename = "abr")]
    pub audio_bitrate_kbps: Option<f64>,
    #[serde(default, deserialize_with = "lenient_byte_count")]
    pub filesize: Option<u64>,
    #[serde(default, deserialize_with = "lenient_byte_count")]
    pub filesize_approx: Option<u64>,
    #[serde(rename = "quality")]
    pub quality_score: Option<f64>,
    pub format_note: Option<String>,
    pub protocol: Option<String>,
    pub audio_ext: Option<String>,
}

/// Track layout of a descriptor, derived from codec presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    VideoOnly,
    AudioOnly,
    Combined,
}

impl FormatDescriptor {
    pub fn has_video(&self) -> bool {
        codec_present(self.video_codec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.audio_codec.as_deref())
    }

    /// `None` means the descriptor carries neither track and is unusable.
    pub fn kind(&self) -> Option<StreamKind> {
        match (self.has_video(), self.has_audio()) {
            (true, true) => Some(StreamKind::Combined),
            (true, false) => Some(StreamKind::VideoOnly),
            (false, true) => Some(StreamKind::AudioOnly),
            (false, false) => None,
        }
    }

    /// Exact size when known, otherwise yt-dlp's estimate.
    pub fn approx_file_size(&self) -> Option<u64> {
        self.filesize.or(self.filesize_approx)
    }

    pub fn frame_rate_or_zero(&self) -> f64 {
        self.frame_rate.filter(|fps| fps.is_finite()).unwrap_or(0.0)
    }

    pub fn audio_bitrate_or_zero(&self) -> f64 {
        self.audio_bitrate_kbps
            .filter(|abr| abr.is_finite())
            .unwrap_or(0.0)
    }

    /// Human annotation such as `1080p60` or `medium`, minus yt-dlp's
    /// `unknown` placeholder.
    pub fn quality_note(&self) -> Option<&str> {
        self.format_note
            .as_deref()
            .map(str::trim)
            .filter(|note| !note.is_empty() && *note != "unknown")
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    match codec.map(str::trim) {
        Some(value) => !value.is_empty() && !value.eq_ignore_ascii_case(ABSENT_CODEC),
        None => false,
    }
}

/// Some extractors report sizes as floats (`1234.0`); accept both.
fn lenient_byte_count<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<f64>::deserialize(deserializer)?;
    Ok(value
        .filter(|bytes| bytes.is_finite() && *bytes >= 0.0)
        .map(|bytes| bytes.round() as u64))
}

/// The subset of a metadata response the front-end needs.
#[derive(Debug, Clone, Default)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub formats: Vec<FormatDescriptor>,
}

#[derive(Deserialize)]
struct RawMediaInfo {
    title: Option<String>,
    fulltitle: Option<String>,
    #[serde(default)]
    formats: Vec<Value>,
}

impl MediaInfo {
    /// Parses a `--dump-single-json` payload. Entries of `formats` that do not
    /// deserialize are dropped one by one instead of failing the lookup.
    pub fn from_json(raw: &[u8]) -> Result<Self> {
        let info: RawMediaInfo =
            serde_json::from_slice(raw).context("deserializing metadata JSON")?;
        let total = info.formats.len();
        let formats: Vec<FormatDescriptor> = info
            .formats
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(format) => Some(format),
                Err(err) => {
                    log::debug!("skipping unreadable format entry: {err}");
                    None
                }
            })
            .collect();
        if formats.len() != total {
            log::info!(
                "kept {} of {} format entries from metadata response",
                formats.len(),
                total
            );
        }
        Ok(Self {
            title: info.title.or(info.fulltitle),
            formats,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kind_follows_codec_presence() {
        let mut format = FormatDescriptor {
            video_codec: Some("avc1.640028".into()),
            audio_codec: Some("none".into()),
            ..FormatDescriptor::default()
        };
        assert_eq!(format.kind(), Some(StreamKind::VideoOnly));

        format.audio_codec = Some("mp4a.40.2".into());
        assert_eq!(format.kind(), Some(StreamKind::Combined));

        format.video_codec = Some("NONE".into());
        assert_eq!(format.kind(), Some(StreamKind::AudioOnly));

        format.audio_codec = None;
        assert_eq!(format.kind(), None);
    }

    #[test]
    fn blank_codec_counts_as_absent() {
        let format = FormatDescriptor {
            video_codec: Some("  ".into()),
            audio_codec: Some("opus".into()),
            ..FormatDescriptor::default()
        };
        assert_eq!(format.kind(), Some(StreamKind::AudioOnly));
    }

    #[test]
    fn approx_file_size_prefers_exact_value() {
        let format = FormatDescriptor {
            filesize: Some(10),
            filesize_approx: Some(20),
            ..FormatDescriptor::default()
        };
        assert_eq!(format.approx_file_size(), Some(10));
        let estimate_only = FormatDescriptor {
            filesize_approx: Some(20),
            ..FormatDescriptor::default()
        };
        assert_eq!(estimate_only.approx_file_size(), Some(20));
    }

    #[test]
    fn quality_note_hides_unknown_placeholder() {
        let mut format = FormatDescriptor {
            format_note: Some("unknown".into()),
            ..FormatDescriptor::default()
        };
        assert_eq!(format.quality_note(), None);
        format.format_note = Some("Premium".into());
        assert_eq!(format.quality_note(), Some("Premium"));
    }

    #[test]
    fn from_json_skips_malformed_entries() {
        let payload = json!({
            "title": "Sample",
            "formats": [
                {
                    "format_id": "137",
                    "ext": "mp4",
                    "vcodec": "avc1.640028",
                    "acodec": "none",
                    "height": 1080,
                    "width": 1920,
                    "fps": 60,
                    "filesize": 1048576,
                    "quality": 9
                },
                { "format_id": "bad", "height": "tall" },
                {
                    "format_id": "140",
                    "ext": "m4a",
                    "vcodec": "none",
                    "acodec": "mp4a.40.2",
                    "abr": 129.5,
                    "filesize_approx": 2048.0
                }
            ]
        });
        let info = MediaInfo::from_json(&serde_json::to_vec(&payload).unwrap()).unwrap();
        assert_eq!(info.title.as_deref(), Some("Sample"));
        let ids: Vec<&str> = info.formats.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(ids, vec!["137", "140"]);
        assert_eq!(info.formats[0].frame_rate, Some(60.0));
        assert_eq!(info.formats[1].audio_bitrate_kbps, Some(129.5));
        assert_eq!(info.formats[1].approx_file_size(), Some(2048));
    }

    #[test]
    fn from_json_tolerates_missing_formats() {
        let info = MediaInfo::from_json(br#"{"fulltitle": "Only title"}"#).unwrap();
        assert_eq!(info.title.as_deref(), Some("Only title"));
        assert!(info.formats.is_empty());
    }

    #[test]
    fn from_json_rejects_non_json() {
        assert!(MediaInfo::from_json(b"ERROR: unsupported URL").is_err());
    }
}
