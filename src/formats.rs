use std::cmp::Reverse;
use std::sync::Arc;

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::provider::{ProbeInfo, RawFormat};
use crate::{App, Error, Result};

#[derive(Deserialize)]
pub struct FormatsRequest {
  pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FormatSummary {
  pub format_id: String,
  pub ext: String,
  pub resolution: String,
  pub filesize: Option<u64>,
  pub note: String,
  pub has_video: bool,
  pub has_audio: bool,
  pub quality: String,
}

#[derive(Serialize)]
pub struct FormatsResponse {
  pub title: String,
  pub duration: Option<f64>,
  pub formats: Vec<FormatSummary>,
}

#[axum::debug_handler]
pub async fn formats(
  State(app): State<Arc<App>>,
  Json(req): Json<FormatsRequest>,
) -> Result<Json<FormatsResponse>> {
  if req.url.trim().is_empty() {
    return Err(Error::InvalidRequest("url must not be empty".to_owned()));
  }

  info!("listing formats for: {}", req.url);
  let info = app.provider.probe(&req.url).await.map_err(|e| match e {
    e @ Error::ProbeFailed(_) => e,
    other => Error::ProbeFailed(other.to_string()),
  })?;

  Ok(Json(summarize(info)))
}

/// Reshape the provider's raw format list into a summarized set.
///
/// Complete formats (audio and video in one stream) pass through as-is.
/// Video-only formats are paired with the largest audio-only format and
/// presented as a merged download, since the manager merges them into
/// one mp4 container. Sorted by descending height, then descending size.
pub fn summarize(info: ProbeInfo) -> FormatsResponse {
  let complete: Vec<&RawFormat> = info
    .formats
    .iter()
    .filter(|f| f.has_video() && f.has_audio())
    .collect();
  let video_only: Vec<&RawFormat> = info
    .formats
    .iter()
    .filter(|f| f.has_video() && !f.has_audio())
    .collect();
  let best_audio = info
    .formats
    .iter()
    .filter(|f| f.has_audio() && !f.has_video())
    .max_by_key(|f| f.filesize.unwrap_or(0));

  let mut formats = Vec::new();

  for f in complete {
    let quality = quality_of(f);
    formats.push(FormatSummary {
      format_id: f.format_id.clone(),
      ext: f.ext.clone().unwrap_or_else(|| "mp4".to_owned()),
      resolution: resolution_of(f),
      filesize: f.filesize,
      note: format!("{} - {} (Complete)", human_size(f.filesize), quality),
      has_video: true,
      has_audio: true,
      quality,
    });
  }

  if let Some(audio) = best_audio {
    for f in video_only {
      let quality = quality_of(f);
      let combined =
        f.filesize.unwrap_or(0) + audio.filesize.unwrap_or(0);
      let filesize = (combined > 0).then_some(combined);
      formats.push(FormatSummary {
        format_id: format!("{}+{}", f.format_id, audio.format_id),
        ext: "mp4".to_owned(),
        resolution: resolution_of(f),
        filesize,
        note: format!("{} - {} (Merged)", human_size(filesize), quality),
        has_video: true,
        has_audio: true,
        quality,
      });
    }
  }

  formats
    .sort_by_key(|f| Reverse((height_of(f), f.filesize.unwrap_or(0))));

  FormatsResponse {
    title: info.title,
    duration: info.duration,
    formats,
  }
}

fn resolution_of(f: &RawFormat) -> String {
  match f.resolution.as_deref() {
    Some(r) if r != "N/A" => r.to_owned(),
    _ => match (f.width, f.height) {
      (Some(w), Some(h)) => format!("{w}x{h}"),
      _ => "N/A".to_owned(),
    },
  }
}

fn quality_of(f: &RawFormat) -> String {
  let mut parts = Vec::new();
  if let Some(note) = f.format_note.as_deref().filter(|n| !n.is_empty()) {
    parts.push(note.to_owned());
  }
  if let Some(fps) = f.fps {
    parts.push(format!("{fps}fps"));
  }
  parts.join(" - ")
}

// vertical resolution parsed from a "WxH" string; sorts unknowns last.
fn height_of(f: &FormatSummary) -> u64 {
  f.resolution
    .split_once('x')
    .and_then(|(_, h)| h.parse().ok())
    .unwrap_or(0)
}

pub fn human_size(size_bytes: Option<u64>) -> String {
  let Some(size) = size_bytes.filter(|s| *s > 0) else {
    return "Unknown".to_owned();
  };

  let mut size = size as f64;
  for unit in ["B", "KB", "MB", "GB"] {
    if size < 1024.0 {
      return format!("{size:.1} {unit}");
    }
    size /= 1024.0;
  }
  format!("{size:.1} GB")
}
