//! Server-rendered HTML for the three pages of the front-end.
//!
//! Every value that comes from a request or from the extractor goes through
//! [`escape_html`] before it is interpolated.

use std::fmt::Write as _;

use crate::catalog::{Catalog, RankedEntry};
use crate::extractor::MP3_FORMAT_ID;
use crate::selector::Selection;

const STYLE: &str = r#"
body { background: #111827; color: #f9fafb; font-family: system-ui, sans-serif; display: flex; align-items: center; justify-content: center; min-height: 100vh; margin: 0; }
main { background: #1f2937; padding: 2rem; border-radius: 1rem; width: 100%; max-width: 36rem; box-shadow: 0 10px 25px rgba(0, 0, 0, .4); }
h1 { font-size: 1.5rem; margin-top: 0; text-align: center; }
input[type=text], select { width: 100%; box-sizing: border-box; padding: .75rem; border-radius: .5rem; border: 1px solid #4b5563; background: #374151; color: inherit; }
button, a.button { display: inline-block; margin-top: 1rem; padding: .6rem 1.2rem; border: 0; border-radius: .5rem; background: #2563eb; color: #fff; font-weight: 600; text-decoration: none; cursor: pointer; }
.notice { font-size: .85rem; color: #9ca3af; text-align: center; }
.error { color: #f87171; }
progress { width: 100%; height: .75rem; }
.hidden { display: none; }
"#;

const DOWNLOAD_SCRIPT: &str = r#"
const form = document.getElementById("download-form");
const panel = document.getElementById("progress");
const bar = document.getElementById("bar");
const statusLine = document.getElementById("status");

form.addEventListener("submit", async (event) => {
  event.preventDefault();
  form.querySelector("button").disabled = true;
  panel.classList.remove("hidden");
  statusLine.textContent = "Starting...";
  try {
    const response = await fetch("/download", { method: "POST", body: new URLSearchParams(new FormData(form)) });
    const payload = await response.json();
    if (!response.ok) {
      throw new Error(payload.error || "download could not be started");
    }
    poll(payload.id);
  } catch (err) {
    statusLine.textContent = err.message;
    form.querySelector("button").disabled = false;
  }
});

function poll(id) {
  const timer = setInterval(async () => {
    const response = await fetch("/progress/" + encodeURIComponent(id));
    if (!response.ok) {
      clearInterval(timer);
      statusLine.textContent = "Download not found";
      return;
    }
    const job = await response.json();
    bar.value = job.progress;
    statusLine.textContent = job.status === "downloading" ? job.progress + "%" : job.message;
    if (job.status === "finished") {
      clearInterval(timer);
      statusLine.textContent = "Done: " + (job.filename || "");
      window.location = "/files/" + encodeURIComponent(id);
    } else if (job.status === "failed") {
      clearInterval(timer);
      form.querySelector("button").disabled = false;
    }
  }, 1000);
}
"#;

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn layout(title: &str, body: &str, script: Option<&str>) -> String {
    let mut page = String::new();
    page.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    page.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    let _ = writeln!(page, "<title>{}</title>", escape_html(title));
    let _ = writeln!(page, "<style>{STYLE}</style>");
    page.push_str("</head>\n<body>\n<main>\n");
    page.push_str(body);
    page.push_str("</main>\n");
    if let Some(script) = script {
        let _ = writeln!(page, "<script>{script}</script>");
    }
    page.push_str("</body>\n</html>\n");
    page
}

pub fn index_page(cookies_enabled: bool) -> String {
    let notice = if cookies_enabled {
        "Signed-in session active: cookies are sent with every request."
    } else {
        "No cookie file found: age-restricted or members-only videos may fail."
    };
    let body = format!(
        "<h1>Download a video</h1>\n\
         <form method=\"post\" action=\"/\">\n\
         <input type=\"text\" name=\"url\" placeholder=\"https://www.youtube.com/watch?v=...\" required autofocus>\n\
         <button type=\"submit\">List formats</button>\n\
         </form>\n\
         <p class=\"notice\">{}</p>\n",
        escape_html(notice)
    );
    layout("Download a video", &body, None)
}

pub fn error_page(message: &str) -> String {
    let body = format!(
        "<h1 class=\"error\">Error</h1>\n<p>{}</p>\n<a class=\"button\" href=\"/\">Back</a>\n",
        escape_html(message)
    );
    layout("Error", &body, None)
}

fn push_option(out: &mut String, value: &str, label: &str, selected: bool) {
    let _ = writeln!(
        out,
        "<option value=\"{}\"{}>{}</option>",
        escape_html(value),
        if selected { " selected" } else { "" },
        escape_html(label)
    );
}

fn push_group<'a>(
    out: &mut String,
    label: &str,
    entries: impl IntoIterator<Item = &'a RankedEntry>,
    value_of: impl Fn(&RankedEntry) -> String,
) {
    let mut options = String::new();
    for entry in entries {
        push_option(&mut options, &value_of(entry), &entry.display_label(), false);
    }
    if options.is_empty() {
        return;
    }
    let _ = writeln!(out, "<optgroup label=\"{}\">", escape_html(label));
    out.push_str(&options);
    out.push_str("</optgroup>\n");
}

/// Picklist for one URL, with `default` pre-selected.
pub fn selection_page(
    url: &str,
    title: Option<&str>,
    catalog: &Catalog,
    default: &Selection,
) -> String {
    let mut select = String::new();

    select.push_str("<optgroup label=\"Recommended\">\n");
    let recommended = match default {
        Selection::Pair { video_id, audio_id } => {
            format!("Best video ({video_id}) + best audio ({audio_id})")
        }
        Selection::EngineChoice => "Best available (automatic)".to_string(),
    };
    push_option(&mut select, &default.format_spec(), &recommended, true);
    push_option(&mut select, "best", "Best single file (automatic)", false);
    push_option(
        &mut select,
        "bestvideo+bestaudio",
        "Best video + best audio (automatic)",
        false,
    );
    select.push_str("</optgroup>\n");

    push_group(&mut select, "Complete formats", &catalog.combined, |entry| {
        entry.format_id.clone()
    });
    push_group(
        &mut select,
        "Video merged with best audio",
        catalog.video_only(),
        |entry| format!("{}+bestaudio", entry.format_id),
    );

    select.push_str("<optgroup label=\"Audio only\">\n");
    push_option(&mut select, MP3_FORMAT_ID, "MP3 - 320 kbps", false);
    for entry in &catalog.audio {
        push_option(&mut select, &entry.format_id, &entry.display_label(), false);
    }
    select.push_str("</optgroup>\n");

    let heading = title.unwrap_or("Choose a format");
    let body = format!(
        "<h1>{}</h1>\n\
         <p class=\"notice\">The recommended format is pre-selected.</p>\n\
         <form id=\"download-form\" method=\"post\" action=\"/download\">\n\
         <input type=\"hidden\" name=\"url\" value=\"{}\">\n\
         <select name=\"format_id\" required>\n{}</select>\n\
         <button type=\"submit\">Download</button>\n\
         </form>\n\
         <div id=\"progress\" class=\"hidden\">\n\
         <p id=\"status\"></p>\n\
         <progress id=\"bar\" value=\"0\" max=\"100\"></progress>\n\
         </div>\n",
        escape_html(heading),
        escape_html(url),
        select
    );
    layout(heading, &body, Some(DOWNLOAD_SCRIPT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogPolicy, build_catalog};
    use crate::formats::FormatDescriptor;
    use crate::selector::select_best;

    fn descriptor(id: &str, ext: &str, vcodec: &str, acodec: &str, height: Option<u32>) -> FormatDescriptor {
        FormatDescriptor {
            id: id.into(),
            container: ext.into(),
            video_codec: Some(vcodec.into()),
            audio_codec: Some(acodec.into()),
            height,
            width: height.map(|h| h * 16 / 9),
            audio_bitrate_kbps: (vcodec == "none").then_some(128.0),
            audio_ext: (vcodec == "none").then(|| ext.to_string()),
            ..FormatDescriptor::default()
        }
    }

    #[test]
    fn escape_html_covers_markup_characters() {
        assert_eq!(
            escape_html(r#"<a href="x">Tom & 'Jerry'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;Tom &amp; &#x27;Jerry&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn index_page_mentions_cookie_state() {
        assert!(index_page(true).contains("Signed-in session active"));
        assert!(index_page(false).contains("No cookie file found"));
        assert!(index_page(false).contains("name=\"url\""));
    }

    #[test]
    fn error_page_escapes_message() {
        let page = error_page("<script>alert(1)</script>");
        assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(!page.contains("<script>alert"));
    }

    #[test]
    fn selection_page_lists_every_option_group() {
        let formats = vec![
            descriptor("22", "mp4", "avc1", "mp4a", Some(720)),
            descriptor("137", "mp4", "avc1", "none", Some(1080)),
            descriptor("140", "m4a", "none", "mp4a", None),
        ];
        let catalog = build_catalog(&formats, &CatalogPolicy::default());
        let default = select_best(&formats);
        let page = selection_page(
            "https://example.com/watch?v=abc&t=1",
            Some("Clip <1>"),
            &catalog,
            &default,
        );

        assert!(page.contains("<option value=\"137+140\" selected>"));
        assert!(page.contains("<option value=\"best\">"));
        assert!(page.contains("<option value=\"bestvideo+bestaudio\">"));
        assert!(page.contains("<option value=\"22\">720p - MP4 - N/A</option>"));
        assert!(page.contains("<option value=\"137+bestaudio\">"));
        assert!(page.contains("<option value=\"mp3\">"));
        assert!(page.contains("<option value=\"140\">"));
        assert!(page.contains("value=\"https://example.com/watch?v=abc&amp;t=1\""));
        assert!(page.contains("<h1>Clip &lt;1&gt;</h1>"));
        assert!(page.contains("/progress/"));
    }

    #[test]
    fn selection_page_preselects_engine_choice_and_skips_empty_groups() {
        let formats = vec![descriptor("22", "mp4", "avc1", "mp4a", Some(720))];
        let catalog = build_catalog(&formats, &CatalogPolicy::default());
        let page = selection_page("https://example.com/v", None, &catalog, &Selection::EngineChoice);
        assert!(page.contains("<option value=\"bestvideo+bestaudio/best\" selected>"));
        assert!(!page.contains("Video merged with best audio"));
        assert!(page.contains("<h1>Choose a format</h1>"));
    }
}
