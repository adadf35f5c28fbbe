//! Groups raw format descriptors into the picklist shown on the selection page.
//!
//! The catalog is rebuilt from scratch for every submitted URL: descriptors are
//! filtered by the active [`CatalogPolicy`], classified by codec presence,
//! labelled, de-duplicated per resolution and sorted best-first. Descriptors
//! that lack what their label needs (an id, or a height on a video track) are
//! dropped silently.

use std::cmp::Ordering;

use thiserror::Error;

use crate::formats::{FormatDescriptor, StreamKind};

/// Containers accepted when no explicit allow-list is configured.
pub const DEFAULT_CONTAINERS: [&str; 3] = ["mp4", "webm", "m4a"];

const BYTES_PER_MEGABYTE: f64 = 1_048_576.0;
const MISSING_SIZE: &str = "N/A";
const FRAGMENTED_PROTOCOLS: [&str; 3] = ["http_dash_segments", "m3u8", "m3u8_native"];

/// Which containers survive the first filtering step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerPolicy {
    /// Only the listed container tags (lowercase) are kept.
    AllowList(Vec<String>),
    /// Every container is kept; classification alone decides.
    Any,
}

impl ContainerPolicy {
    /// Parses `any` or a comma separated list such as `mp4,webm,m4a`.
    pub fn parse(value: &str) -> Option<Self> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("any") || trimmed == "*" {
            return Some(Self::Any);
        }
        let containers: Vec<String> = trimmed
            .split(',')
            .map(|item| item.trim().to_ascii_lowercase())
            .filter(|item| !item.is_empty())
            .collect();
        if containers.is_empty() {
            None
        } else {
            Some(Self::AllowList(containers))
        }
    }

    fn accepts(&self, container: &str) -> bool {
        match self {
            Self::Any => true,
            Self::AllowList(allowed) => {
                let container = container.trim();
                allowed
                    .iter()
                    .any(|candidate| candidate.eq_ignore_ascii_case(container))
            }
        }
    }
}

impl Default for ContainerPolicy {
    fn default() -> Self {
        Self::AllowList(DEFAULT_CONTAINERS.iter().map(|c| c.to_string()).collect())
    }
}

/// Filtering rules applied before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPolicy {
    pub containers: ContainerPolicy,
    pub skip_fragmented: bool,
}

impl Default for CatalogPolicy {
    fn default() -> Self {
        Self {
            containers: ContainerPolicy::default(),
            skip_fragmented: true,
        }
    }
}

/// Output group an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogGroup {
    Video,
    Audio,
    Combined,
}

/// One line of the picklist.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedEntry {
    pub format_id: String,
    pub container: String,
    /// Resolution or bitrate text, e.g. `1080p60 (Premium)` or `Audio 128kbps`.
    pub label: String,
    /// `12.3 MB`, or `N/A` when the extractor gave no size.
    pub size_label: String,
    pub group: CatalogGroup,
    pub sort_key: f64,
    /// Whether the stream carries an audio track of its own.
    pub has_audio: bool,
}

impl RankedEntry {
    /// Full picklist text, e.g. `720p - MP4 - 12.3 MB`.
    pub fn display_label(&self) -> String {
        format!(
            "{} - {} - {}",
            self.label,
            self.container.to_ascii_uppercase(),
            self.size_label
        )
    }
}

/// The grouped view of every usable descriptor for one URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Catalog {
    /// Every stream with a video track, with or without audio.
    pub video: Vec<RankedEntry>,
    pub audio: Vec<RankedEntry>,
    pub combined: Vec<RankedEntry>,
}

/// Raised when filtering leaves nothing to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no displayable formats")]
pub struct EmptyCatalog;

impl Catalog {
    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty() && self.combined.is_empty()
    }

    /// Turns an empty catalog into the named [`EmptyCatalog`] condition.
    pub fn ensure_displayable(self) -> Result<Self, EmptyCatalog> {
        if self.is_empty() {
            Err(EmptyCatalog)
        } else {
            Ok(self)
        }
    }

    /// Video streams that still need an audio track merged in.
    pub fn video_only(&self) -> impl Iterator<Item = &RankedEntry> {
        self.video.iter().filter(|entry| !entry.has_audio)
    }
}

struct Candidate {
    entry: RankedEntry,
    position: usize,
    height: Option<u32>,
    frame_rate: f64,
    audio_bitrate: f64,
    quality: Option<f64>,
}

/// Builds the three picklist groups for `descriptors` under `policy`.
pub fn build_catalog(descriptors: &[FormatDescriptor], policy: &CatalogPolicy) -> Catalog {
    let mut video = Vec::new();
    let mut audio = Vec::new();
    let mut combined = Vec::new();

    for (position, descriptor) in descriptors.iter().enumerate() {
        if !policy.containers.accepts(&descriptor.container) {
            continue;
        }
        if policy.skip_fragmented && is_fragmented(descriptor) {
            continue;
        }
        let Some(kind) = descriptor.kind() else {
            continue;
        };
        if descriptor.id.trim().is_empty() {
            continue;
        }

        match kind {
            StreamKind::AudioOnly => {
                audio.push(audio_candidate(descriptor, position));
            }
            StreamKind::VideoOnly | StreamKind::Combined => {
                let Some(height) = descriptor.height else {
                    log::debug!("format {} has a video track but no height", descriptor.id);
                    continue;
                };
                push_deduplicated(
                    &mut video,
                    video_candidate(descriptor, position, height, CatalogGroup::Video),
                );
                if kind == StreamKind::Combined {
                    push_deduplicated(
                        &mut combined,
                        video_candidate(descriptor, position, height, CatalogGroup::Combined),
                    );
                }
            }
        }
    }

    Catalog {
        video: rank(video),
        audio: rank(audio),
        combined: rank(combined),
    }
}

fn is_fragmented(descriptor: &FormatDescriptor) -> bool {
    let dash_note = descriptor
        .format_note
        .as_deref()
        .is_some_and(|note| note.trim_start().starts_with("DASH"));
    let adaptive_protocol = descriptor
        .protocol
        .as_deref()
        .is_some_and(|protocol| FRAGMENTED_PROTOCOLS.contains(&protocol.trim()));
    dash_note || adaptive_protocol
}

fn video_candidate(
    descriptor: &FormatDescriptor,
    position: usize,
    height: u32,
    group: CatalogGroup,
) -> Candidate {
    Candidate {
        entry: RankedEntry {
            format_id: descriptor.id.clone(),
            container: descriptor.container.clone(),
            label: video_label(height, descriptor),
            size_label: size_label(descriptor.approx_file_size()),
            group,
            sort_key: f64::from(height),
            has_audio: descriptor.has_audio(),
        },
        position,
        height: Some(height),
        frame_rate: descriptor.frame_rate_or_zero(),
        audio_bitrate: descriptor.audio_bitrate_or_zero(),
        quality: descriptor.quality_score,
    }
}

fn audio_candidate(descriptor: &FormatDescriptor, position: usize) -> Candidate {
    let bitrate = descriptor.audio_bitrate_or_zero();
    Candidate {
        entry: RankedEntry {
            format_id: descriptor.id.clone(),
            container: descriptor.container.clone(),
            label: audio_label(bitrate),
            size_label: size_label(descriptor.approx_file_size()),
            group: CatalogGroup::Audio,
            sort_key: bitrate,
            has_audio: true,
        },
        position,
        height: None,
        frame_rate: 0.0,
        audio_bitrate: bitrate,
        quality: descriptor.quality_score,
    }
}

fn video_label(height: u32, descriptor: &FormatDescriptor) -> String {
    let mut label = format!("{height}p");
    let fps = descriptor.frame_rate_or_zero();
    if fps > 30.0 {
        label.push_str(&(fps as u32).to_string());
    }
    if let Some(note) = descriptor.quality_note() {
        label.push_str(&format!(" ({note})"));
    }
    label
}

/// Whole kbps; a bitrate that rounds to zero counts as unknown.
fn audio_label(bitrate: f64) -> String {
    let kbps = bitrate.round() as u64;
    if kbps > 0 {
        format!("Audio {kbps}kbps")
    } else {
        "Audio".to_string()
    }
}

fn size_label(bytes: Option<u64>) -> String {
    match bytes {
        Some(bytes) => format!("{:.1} MB", bytes as f64 / BYTES_PER_MEGABYTE),
        None => MISSING_SIZE.to_string(),
    }
}

/// Keeps one candidate per `(height, has_audio)`; a later candidate only wins
/// with a strictly higher quality score.
fn push_deduplicated(group: &mut Vec<Candidate>, candidate: Candidate) {
    let existing = group.iter_mut().find(|current| {
        current.height == candidate.height && current.entry.has_audio == candidate.entry.has_audio
    });
    match existing {
        Some(current) => {
            if candidate.quality > current.quality {
                *current = candidate;
            }
        }
        None => group.push(candidate),
    }
}

fn rank(mut candidates: Vec<Candidate>) -> Vec<RankedEntry> {
    candidates.sort_by(compare_candidates);
    candidates
        .into_iter()
        .map(|candidate| candidate.entry)
        .collect()
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.entry
        .sort_key
        .total_cmp(&a.entry.sort_key)
        .then_with(|| b.frame_rate.total_cmp(&a.frame_rate))
        .then_with(|| b.audio_bitrate.total_cmp(&a.audio_bitrate))
        .then_with(|| a.position.cmp(&b.position))
}
