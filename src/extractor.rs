//! The seam between the web front-end and the media tool that does the work.
//!
//! The server only ever talks to a [`MediaExtractor`]: once in metadata mode
//! to list formats, once in download mode to fetch the chosen rendition. The
//! production implementation shells out to yt-dlp (see [`crate::ytdlp`]).

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::formats::MediaInfo;

/// Picklist value that asks for a 320 kbps MP3 instead of a container format.
pub const MP3_FORMAT_ID: &str = "mp3";

/// Receives download progress for one job.
pub trait ProgressSink: Send + Sync {
    /// `percent` is already clamped to 0..=100.
    fn report(&self, percent: u8);
}

/// Lists formats for a URL and downloads one of them.
///
/// Both calls block until the underlying tool exits; callers run them on a
/// blocking thread.
pub trait MediaExtractor: Send + Sync {
    fn probe(&self, url: &str) -> Result<MediaInfo>;

    /// Returns the path of the finished file.
    fn download(&self, request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf>;
}

/// What to produce from the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadTarget {
    /// Best audio, converted to MP3 with metadata and thumbnail embedded.
    Mp3,
    /// A yt-dlp format specifier such as `22`, `137+140` or `bestvideo+bestaudio/best`.
    Format(String),
}

impl DownloadTarget {
    pub fn parse(format_id: &str) -> Result<Self> {
        let format_id = format_id.trim();
        if format_id.is_empty() {
            bail!("no format selected");
        }
        if format_id.eq_ignore_ascii_case(MP3_FORMAT_ID) {
            return Ok(Self::Mp3);
        }
        if format_id.starts_with('-') {
            bail!("invalid format {format_id:?}");
        }
        if format_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            bail!("invalid format {format_id:?}");
        }
        Ok(Self::Format(format_id.to_string()))
    }
}

/// A validated download request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub target: DownloadTarget,
}

impl DownloadRequest {
    pub fn new(url: &str, format_id: &str) -> Result<Self> {
        Ok(Self {
            url: validate_url(url)?,
            target: DownloadTarget::parse(format_id)?,
        })
    }
}

/// Trims `url` and checks it is a plain http(s) URL.
pub fn validate_url(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        bail!("no URL given");
    }
    let lower = url.to_ascii_lowercase();
    let rest = lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"));
    match rest {
        Some(rest) if !rest.is_empty() => {}
        _ => bail!("only http and https URLs are supported"),
    }
    if url.chars().any(|c| c.is_whitespace() || c.is_control()) {
        bail!("URL must not contain whitespace");
    }
    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_target_recognizes_mp3() {
        assert_eq!(DownloadTarget::parse(" MP3 ").unwrap(), DownloadTarget::Mp3);
    }

    #[test]
    fn parse_target_keeps_format_specifiers() {
        assert_eq!(
            DownloadTarget::parse("137+140").unwrap(),
            DownloadTarget::Format("137+140".into())
        );
        assert_eq!(
            DownloadTarget::parse("bv*[height<=720]+ba/b").unwrap(),
            DownloadTarget::Format("bv*[height<=720]+ba/b".into())
        );
    }

    #[test]
    fn parse_target_rejects_option_lookalikes_and_blanks() {
        assert!(DownloadTarget::parse("").is_err());
        assert!(DownloadTarget::parse("--exec=rm").is_err());
        assert!(DownloadTarget::parse("22 140").is_err());
    }

    #[test]
    fn validate_url_accepts_http_and_https() {
        assert_eq!(
            validate_url("  https://www.youtube.com/watch?v=abc ").unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
        assert!(validate_url("HTTP://example.com/v").is_ok());
    }

    #[test]
    fn validate_url_rejects_other_input() {
        assert!(validate_url("").is_err());
        assert!(validate_url("file:///etc/passwd").is_err());
        assert!(validate_url("https://").is_err());
        assert!(validate_url("https://a b").is_err());
        assert!(validate_url("--batch-file=/etc/passwd").is_err());
    }

    #[test]
    fn download_request_validates_both_fields() {
        let request = DownloadRequest::new("https://example.com/v", "22").unwrap();
        assert_eq!(request.target, DownloadTarget::Format("22".into()));
        assert!(DownloadRequest::new("ftp://example.com", "22").is_err());
        assert!(DownloadRequest::new("https://example.com/v", "").is_err());
    }
}
