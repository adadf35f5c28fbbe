#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

use crate::catalog::{CatalogPolicy, ContainerPolicy};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_TUBEFETCH_PORT: u16 = 5000;
pub const DEFAULT_TUBEFETCH_HOST: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOAD_DIR: &str = "downloads";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_YTDLP_BIN: &str = "yt-dlp";
pub const DEFAULT_MERGE_FORMAT: &str = "mp4";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";
pub const DEFAULT_PLAYER_CLIENTS: [&str; 2] = ["android", "web"];
pub const DEFAULT_SKIP_PROTOCOLS: [&str; 2] = ["dash", "hls"];

/// Containers yt-dlp can merge into and ffmpeg can recode to.
const MERGE_FORMATS: [&str; 3] = ["mp4", "mkv", "webm"];

/// Everything the server needs, resolved once at start-up.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub extractor: ExtractorOptions,
    pub catalog: CatalogPolicy,
}

/// Options handed to every yt-dlp invocation.
///
/// `cookies_file` is only set when the file exists. The user agent and the
/// YouTube extractor hints ride along with the cookies: a logged-in session is
/// the one that has to look like a browser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractorOptions {
    pub program: PathBuf,
    pub cookies_file: Option<PathBuf>,
    pub user_agent: String,
    pub player_clients: Vec<String>,
    pub skip_protocols: Vec<String>,
    pub merge_format: String,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_YTDLP_BIN),
            cookies_file: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            player_clients: DEFAULT_PLAYER_CLIENTS.iter().map(|s| s.to_string()).collect(),
            skip_protocols: DEFAULT_SKIP_PROTOCOLS.iter().map(|s| s.to_string()).collect(),
            merge_format: DEFAULT_MERGE_FORMAT.to_string(),
        }
    }
}

impl ExtractorOptions {
    /// Rejects combinations yt-dlp would only fail on later.
    pub fn validate(self) -> Result<Self> {
        if self.program.as_os_str().is_empty() {
            bail!("extractor program must not be empty");
        }
        if !MERGE_FORMATS.contains(&self.merge_format.as_str()) {
            bail!(
                "unsupported merge format {:?}; expected one of {}",
                self.merge_format,
                MERGE_FORMATS.join(", ")
            );
        }
        if self.user_agent.trim().is_empty() {
            bail!("user agent must not be blank");
        }
        Ok(self)
    }

    pub fn cookies_enabled(&self) -> bool {
        self.cookies_file.is_some()
    }

    /// `youtube:skip=dash,hls;player_client=android,web`
    pub fn extractor_hint(&self) -> String {
        let mut parts = Vec::new();
        if !self.skip_protocols.is_empty() {
            parts.push(format!("skip={}", self.skip_protocols.join(",")));
        }
        if !self.player_clients.is_empty() {
            parts.push(format!("player_client={}", self.player_clients.join(",")));
        }
        format!("youtube:{}", parts.join(";"))
    }

    /// Authentication arguments shared by metadata and download calls.
    pub fn auth_args(&self) -> Vec<String> {
        let Some(cookies) = &self.cookies_file else {
            return Vec::new();
        };
        let mut args = vec![
            "--cookies".to_string(),
            cookies.to_string_lossy().into_owned(),
        ];
        if !self.skip_protocols.is_empty() || !self.player_clients.is_empty() {
            args.push("--extractor-args".to_string());
            args.push(self.extractor_hint());
        }
        args.push("--user-agent".to_string());
        args.push(self.user_agent.clone());
        args
    }
}

#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub download_dir: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_settings(overrides: SettingsOverrides) -> Result<Settings> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    build_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<Settings> {
    build_settings_with_overrides(file_vars, env_lookup, SettingsOverrides::default())
}

fn build_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: SettingsOverrides,
) -> Result<Settings> {
    let lookup = |key: &str| lookup_value(key, file_vars, &env_lookup);

    let host = overrides
        .host
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .or_else(|| lookup("TUBEFETCH_HOST"))
        .unwrap_or_else(|| DEFAULT_TUBEFETCH_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup("TUBEFETCH_PORT").and_then(|value| value.parse::<u16>().ok()))
        .unwrap_or(DEFAULT_TUBEFETCH_PORT);
    let download_dir = overrides
        .download_dir
        .or_else(|| lookup("DOWNLOAD_DIR").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DOWNLOAD_DIR));

    let cookies_candidate = overrides
        .cookies_file
        .or_else(|| lookup("COOKIES_FILE").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_FILE));
    let cookies_file = cookies_candidate.is_file().then_some(cookies_candidate);

    let defaults = ExtractorOptions::default();
    let extractor = ExtractorOptions {
        program: lookup("TUBEFETCH_YTDLP_BIN")
            .map(PathBuf::from)
            .unwrap_or(defaults.program),
        cookies_file,
        user_agent: lookup("TUBEFETCH_USER_AGENT").unwrap_or(defaults.user_agent),
        player_clients: lookup("TUBEFETCH_PLAYER_CLIENTS")
            .map(|value| split_list(&value))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.player_clients),
        skip_protocols: lookup("TUBEFETCH_SKIP_PROTOCOLS")
            .map(|value| split_list(&value))
            .filter(|list| !list.is_empty())
            .unwrap_or(defaults.skip_protocols),
        merge_format: lookup("TUBEFETCH_MERGE_FORMAT")
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or(defaults.merge_format),
    }
    .validate()
    .context("validating extractor options")?;

    let catalog = CatalogPolicy {
        containers: lookup("TUBEFETCH_CONTAINERS")
            .and_then(|value| ContainerPolicy::parse(&value))
            .unwrap_or_default(),
        skip_fragmented: lookup("TUBEFETCH_SKIP_FRAGMENTED")
            .and_then(|value| parse_flag(&value))
            .unwrap_or(true),
    };

    Ok(Settings {
        host,
        port,
        download_dir,
        extractor,
        catalog,
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
