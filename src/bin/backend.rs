#![forbid(unsafe_code)]

//! Axum front-end for yt-dlp.
//!
//! `GET /` asks for a URL, `POST /` lists the formats yt-dlp reports for it,
//! `POST /download` starts a background job, `/progress/{id}` is polled by the
//! page and `/files/{id}` hands the finished file to the browser.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Form, Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use mime_guess::MimeGuess;
use serde::{Deserialize, Serialize};
use tokio::{fs::File, signal};
use tokio_util::io::ReaderStream;
use tubefetch::catalog::{CatalogPolicy, build_catalog};
use tubefetch::config::{SettingsOverrides, resolve_settings};
use tubefetch::extractor::{DownloadRequest, MediaExtractor, validate_url};
use tubefetch::jobs::{DownloadManager, JobSnapshot};
use tubefetch::pages::{error_page, index_page, selection_page};
use tubefetch::security::{ensure_not_root, resolve_inside};
use tubefetch::selector::select_best;
use tubefetch::ytdlp::YtDlp;

#[derive(Parser, Debug, Clone, Default)]
#[command(name = "backend", about = "Web front-end for downloading videos with yt-dlp")]
struct ServerArgs {
    /// Listen address (TUBEFETCH_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Listen port (TUBEFETCH_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Where finished downloads are stored (DOWNLOAD_DIR).
    #[arg(long = "download-dir")]
    download_dir: Option<PathBuf>,

    /// Netscape cookie file for signed-in sessions (COOKIES_FILE).
    #[arg(long)]
    cookies: Option<PathBuf>,

    /// Alternative `.env` file.
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,
}

impl ServerArgs {
    fn into_overrides(self) -> SettingsOverrides {
        SettingsOverrides {
            host: self.host,
            port: self.port,
            download_dir: self.download_dir,
            cookies_file: self.cookies,
            env_path: self.env_file,
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/TUBEFETCH_HOST")
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    extractor: Arc<dyn MediaExtractor>,
    downloads: DownloadManager,
    download_dir: Arc<PathBuf>,
    catalog_policy: Arc<CatalogPolicy>,
    cookies_enabled: bool,
}

impl AppState {
    fn new(
        extractor: Arc<dyn MediaExtractor>,
        download_dir: PathBuf,
        catalog_policy: CatalogPolicy,
        cookies_enabled: bool,
    ) -> Self {
        Self {
            downloads: DownloadManager::new(extractor.clone()),
            extractor,
            download_dir: Arc::new(download_dir),
            catalog_policy: Arc::new(catalog_policy),
            cookies_enabled,
        }
    }
}

/// Error for the JSON routes.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Error for the HTML routes; rendered as the error page.
#[derive(Debug)]
struct PageError {
    status: StatusCode,
    message: String,
}

impl PageError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for PageError {
    fn into_response(self) -> Response {
        (self.status, Html(error_page(&self.message))).into_response()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = ServerArgs::parse();

    ensure_not_root("backend")?;

    let settings = resolve_settings(args.into_overrides())?;
    let host = parse_host_arg(&settings.host)?;

    std::fs::create_dir_all(&settings.download_dir)
        .with_context(|| format!("creating {}", settings.download_dir.display()))?;
    let download_dir = settings
        .download_dir
        .canonicalize()
        .with_context(|| format!("resolving {}", settings.download_dir.display()))?;

    let cookies_enabled = settings.extractor.cookies_enabled();
    match &settings.extractor.cookies_file {
        Some(path) => log::info!("using cookies from {}", path.display()),
        None => log::warn!("no cookie file found; signed-in only videos will fail"),
    }

    let extractor: Arc<dyn MediaExtractor> =
        Arc::new(YtDlp::new(settings.extractor, download_dir.clone()));
    log::info!("saving downloads to {}", download_dir.display());
    let state = AppState::new(extractor, download_dir, settings.catalog, cookies_enabled);

    let addr = SocketAddr::new(host, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    log::info!("listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running web server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index).post(lookup_formats))
        .route("/download", post(start_download))
        .route("/progress/{id}", get(get_progress))
        .route("/files/{id}", get(download_file))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        log::error!("failed to install Ctrl+C handler: {}", err);
    }
}

async fn index(State(state): State<AppState>) -> Html<String> {
    Html(index_page(state.cookies_enabled))
}

#[derive(Deserialize)]
struct LookupForm {
    #[serde(default)]
    url: String,
}

async fn lookup_formats(
    State(state): State<AppState>,
    Form(form): Form<LookupForm>,
) -> Result<Html<String>, PageError> {
    let url = validate_url(&form.url)
        .map_err(|err| PageError::new(StatusCode::BAD_REQUEST, err.to_string()))?;

    let extractor = state.extractor.clone();
    let probe_url = url.clone();
    let info = tokio::task::spawn_blocking(move || extractor.probe(&probe_url))
        .await
        .map_err(|err| PageError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?
        .map_err(|err| {
            log::warn!("metadata lookup failed for {url}: {err:#}");
            PageError::new(StatusCode::BAD_GATEWAY, format!("{err:#}"))
        })?;

    let catalog = build_catalog(&info.formats, &state.catalog_policy)
        .ensure_displayable()
        .map_err(|err| PageError::new(StatusCode::UNPROCESSABLE_ENTITY, err.to_string()))?;
    let default = select_best(&info.formats);
    log::info!(
        "{url}: {} video, {} audio, {} complete formats; default {default}",
        catalog.video.len(),
        catalog.audio.len(),
        catalog.combined.len()
    );

    Ok(Html(selection_page(
        &url,
        info.title.as_deref(),
        &catalog,
        &default,
    )))
}

#[derive(Deserialize)]
struct DownloadForm {
    #[serde(default)]
    url: String,
    #[serde(default)]
    format_id: String,
}

#[derive(Debug, Serialize)]
struct DownloadStarted {
    id: String,
}

async fn start_download(
    State(state): State<AppState>,
    Form(form): Form<DownloadForm>,
) -> ApiResult<Json<DownloadStarted>> {
    let request = DownloadRequest::new(&form.url, &form.format_id)
        .map_err(|err| ApiError::bad_request(err.to_string()))?;
    let job = state.downloads.start(request);
    Ok(Json(DownloadStarted { id: job.id }))
}

async fn get_progress(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .downloads
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::not_found("download not found"))
}

async fn download_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let path = state
        .downloads
        .finished_file(&id)
        .ok_or_else(|| ApiError::not_found("download not finished"))?;
    let resolved = resolve_inside(&state.download_dir, &path).map_err(|err| {
        log::warn!("{id}: refusing to serve {}: {err:#}", path.display());
        ApiError::not_found("file not found")
    })?;

    let file_name = resolved
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let mut response = stream_file(resolved).await?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, content_disposition(&file_name));
    Ok(response)
}

async fn stream_file(path: PathBuf) -> ApiResult<Response> {
    let file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|err| ApiError::internal(err.to_string()))?
        .len();

    let mime = MimeGuess::from_path(&path).first_or_octet_stream();
    let mut response = Body::from_stream(ReaderStream::new(file)).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    Ok(response)
}

/// `attachment` with an ASCII fallback name plus the RFC 5987 UTF-8 form.
fn content_disposition(file_name: &str) -> HeaderValue {
    let fallback: String = file_name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(file_name.len());
    for byte in file_name.bytes() {
        if byte.is_ascii_alphanumeric() || b"!#$&+-.^_`|~".contains(&byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    HeaderValue::from_str(&format!(
        "attachment; filename=\"{fallback}\"; filename*=UTF-8''{encoded}"
    ))
    .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
