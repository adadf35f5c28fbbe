#![forbid(unsafe_code)]

//! Guards shared by the server: privilege checks and download path checks.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use nix::unistd::Uid;

/// Fails fast when the server is started as root. yt-dlp and ffmpeg run
/// with the server's privileges and write wherever the output template
/// points, so an unprivileged account is required.
pub fn ensure_not_root(process: &str) -> Result<()> {
    ensure_not_root_for(Uid::current(), process)
}

fn ensure_not_root_for(uid: Uid, process: &str) -> Result<()> {
    if uid.is_root() {
        bail!(
            "{process} must not be run as root; use a regular user or a dedicated service account"
        );
    }
    Ok(())
}

/// Resolves `candidate` and checks that it lives under `base`.
///
/// The final path of a download is reported by yt-dlp, and the output
/// template is built from the video title, so the path is re-checked before
/// the file is served.
pub fn resolve_inside(base: &Path, candidate: &Path) -> Result<PathBuf> {
    let base = base
        .canonicalize()
        .with_context(|| format!("resolving {}", base.display()))?;
    let resolved = candidate
        .canonicalize()
        .with_context(|| format!("resolving {}", candidate.display()))?;
    if !resolved.starts_with(&base) {
        bail!(
            "{} is outside of {}",
            resolved.display(),
            base.display()
        );
    }
    if !resolved.is_file() {
        bail!("{} is not a regular file", resolved.display());
    }
    Ok(resolved)
}
