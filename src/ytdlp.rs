//! yt-dlp driven implementation of [`MediaExtractor`].
//!
//! Metadata comes from `--dump-single-json`. Downloads run with a custom
//! `--progress-template` so every progress update arrives as one
//! machine-readable stdout line, and `--print after_move:` reports the final
//! path once merging or conversion is done.

use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use anyhow::{Context, Result, anyhow, bail};

use crate::config::ExtractorOptions;
use crate::extractor::{DownloadRequest, DownloadTarget, MediaExtractor, ProgressSink};
use crate::formats::MediaInfo;

const PROGRESS_MARKER: &str = "tubefetch-progress";
const FILE_MARKER: &str = "tubefetch-file";
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";
const MP3_QUALITY: &str = "320K";
const STDERR_TAIL_LINES: usize = 5;

pub struct YtDlp {
    options: ExtractorOptions,
    download_dir: PathBuf,
}

impl YtDlp {
    pub fn new(options: ExtractorOptions, download_dir: PathBuf) -> Self {
        Self {
            options,
            download_dir,
        }
    }

    fn command(&self) -> Command {
        Command::new(&self.options.program)
    }

    fn metadata_args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = [
            "--dump-single-json",
            "--skip-download",
            "--no-warnings",
            "--no-progress",
            "--no-playlist",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
        args.extend(self.options.auth_args());
        args.push("--".to_string());
        args.push(url.to_string());
        args
    }

    fn download_args(&self, request: &DownloadRequest) -> Vec<String> {
        let output = self.download_dir.join(OUTPUT_TEMPLATE);
        let mut args: Vec<String> = vec![
            "--no-playlist".into(),
            "--no-warnings".into(),
            "--newline".into(),
            "--progress".into(),
            "--progress-template".into(),
            format!(
                "download:{PROGRESS_MARKER}|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s"
            ),
            "--print".into(),
            format!("after_move:{FILE_MARKER}|%(filepath)s"),
            "-o".into(),
            output.to_string_lossy().into_owned(),
        ];

        match &request.target {
            DownloadTarget::Mp3 => {
                args.extend(
                    [
                        "-f",
                        "bestaudio/best",
                        "-x",
                        "--audio-format",
                        "mp3",
                        "--audio-quality",
                        MP3_QUALITY,
                        "--embed-metadata",
                        "--embed-thumbnail",
                    ]
                    .iter()
                    .map(|arg| arg.to_string()),
                );
            }
            DownloadTarget::Format(spec) => {
                let merge = self.options.merge_format.clone();
                args.extend([
                    "-f".to_string(),
                    spec.clone(),
                    "--merge-output-format".to_string(),
                    merge.clone(),
                    "--recode-video".to_string(),
                    merge,
                ]);
            }
        }

        args.extend(self.options.auth_args());
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

impl MediaExtractor for YtDlp {
    fn probe(&self, url: &str) -> Result<MediaInfo> {
        let output = self
            .command()
            .args(self.metadata_args(url))
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("fetching metadata for {url}"))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "yt-dlp failed for {} (status {}){}",
                url,
                output.status,
                format_tail(&tail_lines(&stderr))
            );
        }

        MediaInfo::from_json(&output.stdout)
            .with_context(|| format!("parsing yt-dlp metadata for {url}"))
    }

    fn download(&self, request: &DownloadRequest, progress: &dyn ProgressSink) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.download_dir)
            .with_context(|| format!("creating {}", self.download_dir.display()))?;

        let mut child = self
            .command()
            .args(self.download_args(request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("launching {}", self.options.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| anyhow!("yt-dlp stderr was not captured"))?;

        // Drained on its own thread so a chatty stderr cannot stall stdout.
        let stderr_reader = thread::spawn(move || {
            let mut raw = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut raw);
            tail_lines(&raw)
        });

        let final_path = match read_download_output(BufReader::new(stdout), progress) {
            Ok(path) => path,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                let _ = stderr_reader.join();
                return Err(err);
            }
        };

        let status = child.wait().context("waiting for yt-dlp")?;
        let stderr_tail = stderr_reader.join().unwrap_or_default();

        if !status.success() {
            bail!(
                "yt-dlp exited with {}{}",
                status,
                format_tail(&stderr_tail)
            );
        }

        let path = final_path.ok_or_else(|| anyhow!("yt-dlp did not report an output file"))?;
        Ok(resolve_reported_path(&self.download_dir, path))
    }
}

/// Forwards progress lines to `progress` and returns the last reported path.
fn read_download_output(
    reader: impl BufRead,
    progress: &dyn ProgressSink,
) -> Result<Option<PathBuf>> {
    let mut final_path = None;
    let mut last_percent = None;
    for line in reader.lines() {
        let line = line.context("reading yt-dlp output")?;
        match parse_output_line(&line) {
            OutputLine::Progress(percent) => {
                if last_percent != Some(percent) {
                    progress.report(percent);
                    last_percent = Some(percent);
                }
            }
            OutputLine::File(path) => final_path = Some(path),
            OutputLine::Other => log::debug!("yt-dlp: {line}"),
        }
    }
    Ok(final_path)
}

/// yt-dlp prints paths relative to its working directory when the output
/// template is relative.
fn resolve_reported_path(download_dir: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() || path.exists() {
        path
    } else {
        download_dir.join(path.file_name().map(PathBuf::from).unwrap_or(path))
    }
}

#[derive(Debug, PartialEq)]
enum OutputLine {
    Progress(u8),
    File(PathBuf),
    Other,
}

fn parse_output_line(line: &str) -> OutputLine {
    let line = line.trim_end_matches(['\r', '\n']);
    if let Some(rest) = line.strip_prefix(PROGRESS_MARKER) {
        let mut fields = rest.trim_start_matches('|').split('|');
        let downloaded = fields.next().and_then(parse_byte_field);
        let total = fields.next().and_then(parse_byte_field);
        let estimate = fields.next().and_then(parse_byte_field);
        return match downloaded.zip(total.or(estimate)) {
            Some((downloaded, total)) if total > 0.0 => {
                let percent = (downloaded / total * 100.0).floor().clamp(0.0, 100.0);
                OutputLine::Progress(percent as u8)
            }
            _ => OutputLine::Other,
        };
    }
    if let Some(rest) = line.strip_prefix(FILE_MARKER) {
        let path = rest.strip_prefix('|').unwrap_or(rest).trim();
        if !path.is_empty() {
            return OutputLine::File(PathBuf::from(path));
        }
    }
    OutputLine::Other
}

/// yt-dlp renders missing values as `NA` and estimates as floats.
fn parse_byte_field(value: &str) -> Option<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|bytes| bytes.is_finite() && *bytes >= 0.0)
}

fn tail_lines(raw: &str) -> Vec<String> {
    let lines: Vec<&str> = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].iter().map(|line| line.to_string()).collect()
}

fn format_tail(lines: &[String]) -> String {
    if lines.is_empty() {
        String::new()
    } else {
        format!(": {}", lines.join(" | "))
    }
}
