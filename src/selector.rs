//! Default format pre-selection.
//!
//! One pass over the descriptors keeps a running best video-only stream
//! (tallest, then fastest) and a running best audio-only stream (highest
//! bitrate). When both exist the result asks yt-dlp to merge exactly those two;
//! otherwise yt-dlp is left to pick on its own.

use std::fmt;

use crate::formats::{FormatDescriptor, StreamKind};

/// Format specifier meaning "best video plus best audio, engine's choice".
pub const ENGINE_CHOICE_SPEC: &str = "bestvideo+bestaudio/best";

/// Outcome of [`select_best`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Merge these two streams.
    Pair { video_id: String, audio_id: String },
    /// No qualifying video-only or audio-only stream; let yt-dlp decide.
    EngineChoice,
}

impl Selection {
    /// The `-f` argument handed to yt-dlp.
    pub fn format_spec(&self) -> String {
        match self {
            Self::Pair { video_id, audio_id } => format!("{video_id}+{audio_id}"),
            Self::EngineChoice => ENGINE_CHOICE_SPEC.to_string(),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format_spec())
    }
}

/// Picks the default video/audio pair for `descriptors`.
///
/// Video candidates tied on height are replaced by any later candidate whose
/// frame rate is greater than *or equal to* the current one, so among exact
/// ties the last one scanned wins. Audio uses a strict comparison, so the first
/// of equal bitrates wins.
pub fn select_best(descriptors: &[FormatDescriptor]) -> Selection {
    let mut best_video: Option<&FormatDescriptor> = None;
    let mut best_audio: Option<&FormatDescriptor> = None;

    for descriptor in descriptors {
        if descriptor.id.trim().is_empty() {
            continue;
        }
        match descriptor.kind() {
            Some(StreamKind::VideoOnly) => {
                let (Some(height), Some(_)) = (descriptor.height, descriptor.width) else {
                    continue;
                };
                let replace = match best_video {
                    None => true,
                    Some(current) => {
                        let current_height = current.height.unwrap_or(0);
                        height > current_height
                            || (height == current_height
                                && descriptor.frame_rate_or_zero() >= current.frame_rate_or_zero())
                    }
                };
                if replace {
                    best_video = Some(descriptor);
                }
            }
            Some(StreamKind::AudioOnly) => {
                if descriptor.audio_ext.as_deref() == Some("none") {
                    continue;
                }
                let replace = match best_audio {
                    None => true,
                    Some(current) => {
                        descriptor.audio_bitrate_or_zero() > current.audio_bitrate_or_zero()
                    }
                };
                if replace {
                    best_audio = Some(descriptor);
                }
            }
            Some(StreamKind::Combined) | None => {}
        }
    }

    match (best_video, best_audio) {
        (Some(video), Some(audio)) => Selection::Pair {
            video_id: video.id.clone(),
            audio_id: audio.id.clone(),
        },
        _ => Selection::EngineChoice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_only(id: &str, height: u32, fps: Option<f64>) -> FormatDescriptor {
        FormatDescriptor {
            id: id.into(),
            container: "mp4".into(),
            video_codec: Some("avc1".into()),
            audio_codec: Some("none".into()),
            height: Some(height),
            width: Some(height * 16 / 9),
            frame_rate: fps,
            ..FormatDescriptor::default()
        }
    }

    fn audio_only(id: &str, abr: Option<f64>) -> FormatDescriptor {
        FormatDescriptor {
            id: id.into(),
            container: "m4a".into(),
            video_codec: Some("none".into()),
            audio_codec: Some("mp4a.40.2".into()),
            audio_bitrate_kbps: abr,
            audio_ext: Some("m4a".into()),
            ..FormatDescriptor::default()
        }
    }

    #[test]
    fn pairs_best_video_with_best_audio() {
        let selection = select_best(&[
            video_only("137", 1080, Some(60.0)),
            audio_only("140", Some(160.0)),
        ]);
        assert_eq!(selection.format_spec(), "137+140");
        assert_eq!(selection.to_string(), "137+140");
    }

    #[test]
    fn tallest_video_and_richest_audio_win() {
        let selection = select_best(&[
            video_only("136", 720, Some(30.0)),
            audio_only("139", Some(48.0)),
            video_only("313", 2160, Some(30.0)),
            audio_only("251", Some(140.0)),
            video_only("137", 1080, Some(60.0)),
            audio_only("140", Some(129.0)),
        ]);
        assert_eq!(
            selection,
            Selection::Pair {
                video_id: "313".into(),
                audio_id: "251".into(),
            }
        );
    }

    #[test]
    fn equal_height_and_frame_rate_prefers_later_entry() {
        let selection = select_best(&[
            video_only("137", 1080, Some(30.0)),
            video_only("248", 1080, Some(30.0)),
            audio_only("140", Some(128.0)),
        ]);
        assert_eq!(selection.format_spec(), "248+140");
    }

    #[test]
    fn equal_height_with_lower_frame_rate_keeps_current() {
        let selection = select_best(&[
            video_only("299", 1080, Some(60.0)),
            video_only("137", 1080, Some(30.0)),
            audio_only("140", Some(128.0)),
        ]);
        assert_eq!(selection.format_spec(), "299+140");
    }

    #[test]
    fn equal_audio_bitrate_keeps_first_entry() {
        let selection = select_best(&[
            video_only("137", 1080, None),
            audio_only("140", Some(128.0)),
            audio_only("141", Some(128.0)),
        ]);
        assert_eq!(selection.format_spec(), "137+140");
    }

    #[test]
    fn missing_bitrate_counts_as_zero() {
        let selection = select_best(&[
            video_only("137", 1080, None),
            audio_only("unknown", None),
            audio_only("139", Some(48.0)),
        ]);
        assert_eq!(selection.format_spec(), "137+139");
    }

    #[test]
    fn video_without_width_does_not_qualify() {
        let mut no_width = video_only("137", 1080, Some(30.0));
        no_width.width = None;
        let selection = select_best(&[no_width, audio_only("140", Some(128.0))]);
        assert_eq!(selection, Selection::EngineChoice);
    }

    #[test]
    fn audio_with_none_extension_does_not_qualify() {
        let mut odd = audio_only("140", Some(128.0));
        odd.audio_ext = Some("none".into());
        let selection = select_best(&[video_only("137", 1080, None), odd]);
        assert_eq!(selection, Selection::EngineChoice);
    }

    #[test]
    fn falls_back_without_audio_only_streams() {
        let selection = select_best(&[video_only("137", 1080, Some(30.0))]);
        assert_eq!(selection.format_spec(), ENGINE_CHOICE_SPEC);
    }

    #[test]
    fn falls_back_without_video_only_streams() {
        let combined = FormatDescriptor {
            audio_codec: Some("mp4a".into()),
            ..video_only("22", 720, Some(30.0))
        };
        let selection = select_best(&[combined, audio_only("140", Some(128.0))]);
        assert_eq!(selection, Selection::EngineChoice);
    }

    #[test]
    fn empty_input_falls_back() {
        assert_eq!(select_best(&[]), Selection::EngineChoice);
    }
}
