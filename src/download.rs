use std::{
  pin::Pin,
  sync::{Arc, LazyLock},
  task::{Context, Poll},
};

use axum::{
  body::StreamBody,
  extract::State,
  http::{header, Response, StatusCode},
  response::IntoResponse,
  Json,
};
use bytes::Bytes;
use futures::Stream;
use regex::Regex;
use serde::Deserialize;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::provider::{MaterializeOpts, Provider};
use crate::workspace::Workspace;
use crate::{util, App, Error, Result};

pub const CHUNK_SIZE: usize = 8 * 1024;

// best video + best audio, falling back to best combined format.
pub const DEFAULT_FORMAT_SELECTOR: &str = "bv*+ba/b";

// prefer resolution, then mp4/m4a containers, then size and bitrate.
const FORMAT_SORT: &str = "res,ext:mp4:m4a,size,br";
const MERGE_CONTAINER: &str = "mp4";
const MEDIA_TYPE: &str = "video/mp4";
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
  AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

#[derive(Deserialize)]
pub struct DownloadRequest {
  pub url: String,
  #[serde(default)]
  pub format_id: Option<String>,
}

/// Scoped download manager.
///
/// Constructed once at startup; holds provider configuration only,
/// never request-scoped state. Every `execute` call owns a private
/// workspace for its full duration.
pub struct DownloadManager {
  provider: Arc<dyn Provider>,
  format_selector: String,
  user_agent: String,
  http_headers: Vec<(String, String)>,
  check_certificates: bool,
  socket_timeout_secs: u64,
  media_type: &'static str,
}

/// One materialized download, ready to stream.
#[derive(Debug)]
pub struct Download {
  pub filename: String,
  pub size_bytes: u64,
  pub stream: FileStream,
}

impl DownloadManager {
  pub fn new(provider: Arc<dyn Provider>) -> Self {
    Self {
      provider,
      format_selector: DEFAULT_FORMAT_SELECTOR.to_owned(),
      user_agent: USER_AGENT.to_owned(),
      http_headers: vec![
        (
          "Accept".to_owned(),
          "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"
            .to_owned(),
        ),
        ("Accept-Language".to_owned(), "en-us,en;q=0.5".to_owned()),
      ],
      check_certificates: false,
      socket_timeout_secs: util::socket_timeout_secs(),
      media_type: MEDIA_TYPE,
    }
  }

  pub fn media_type(&self) -> &'static str {
    self.media_type
  }

  /// Materialize one media file for `url` and return a chunked byte
  /// stream over it.
  ///
  /// The workspace is deleted on every exit path: provider failure and
  /// output validation failure drop it here, and the returned stream
  /// owns it otherwise, releasing it on exhaustion or abandonment.
  pub async fn execute(
    &self,
    url: &str,
    format_selector: Option<&str>,
  ) -> Result<Download> {
    let workspace = Workspace::create()?;

    let opts = MaterializeOpts {
      output_template: workspace.output_template(),
      format_selector: format_selector
        .unwrap_or(&self.format_selector)
        .to_owned(),
      format_sort: FORMAT_SORT.to_owned(),
      merge_container: MERGE_CONTAINER.to_owned(),
      user_agent: self.user_agent.clone(),
      http_headers: self.http_headers.clone(),
      check_certificates: self.check_certificates,
      socket_timeout_secs: self.socket_timeout_secs,
    };

    self
      .provider
      .materialize(url, &opts)
      .await
      .map_err(|e| match e {
        e @ Error::DownloadFailed(_) => e,
        other => Error::DownloadFailed(other.to_string()),
      })?;

    let file = workspace.single_output()?;
    let filename = sanitized_filename(&file.title, &file.extension);
    info!("streaming {} ({} bytes)", filename, file.size_bytes);

    let reader = File::open(&file.path).await?;
    let stream = FileStream {
      inner: ReaderStream::with_capacity(reader, CHUNK_SIZE),
      workspace: Some(workspace),
    };

    Ok(Download {
      filename,
      size_bytes: file.size_bytes,
      stream,
    })
  }
}

/// Chunked reader over the materialized file.
///
/// Owns the workspace so the directory is deleted when the stream is
/// exhausted, and by `Workspace`'s drop if the consumer disconnects
/// mid-flight.
#[derive(Debug)]
pub struct FileStream {
  inner: ReaderStream<File>,
  workspace: Option<Workspace>,
}

impl Stream for FileStream {
  type Item = std::io::Result<Bytes>;

  fn poll_next(
    mut self: Pin<&mut Self>,
    cx: &mut Context<'_>,
  ) -> Poll<Option<Self::Item>> {
    let this = &mut *self;
    match Pin::new(&mut this.inner).poll_next(cx) {
      Poll::Ready(None) => {
        if let Some(workspace) = this.workspace.take() {
          workspace.release();
        }
        Poll::Ready(None)
      }
      poll => poll,
    }
  }
}

// every character outside [A-Za-z0-9_-] becomes a single underscore.
static UNSAFE_CHAR: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_-]").unwrap());

pub fn sanitized_filename(title: &str, extension: &str) -> String {
  format!("{}.{}", UNSAFE_CHAR.replace_all(title, "_"), extension)
}

#[axum::debug_handler]
pub async fn download(
  State(app): State<Arc<App>>,
  Json(req): Json<DownloadRequest>,
) -> Result<impl IntoResponse> {
  if req.url.trim().is_empty() {
    return Err(Error::InvalidRequest("url must not be empty".to_owned()));
  }

  info!("download requested: {}", req.url);
  let download = app
    .manager
    .execute(&req.url, req.format_id.as_deref())
    .await?;

  let resp = Response::builder()
    .status(StatusCode::OK)
    .header(header::CONTENT_TYPE, app.manager.media_type())
    .header(header::CONTENT_LENGTH, download.size_bytes)
    .header(
      header::CONTENT_DISPOSITION,
      format!("attachment; filename=\"{}\"", download.filename),
    )
    .body(StreamBody::new(download.stream))?;

  Ok(resp)
}

#[cfg(test)]
mod test {
  use std::path::PathBuf;
  use std::sync::Mutex;

  use async_trait::async_trait;
  use futures::StreamExt;

  use super::*;
  use crate::provider::ProbeInfo;

  // writes a fixed set of files into the workspace, or fails.
  struct FakeProvider {
    files: Vec<(&'static str, Vec<u8>)>,
    fail_with: Option<&'static str>,
    seen_dirs: Mutex<Vec<PathBuf>>,
  }

  impl FakeProvider {
    fn writing(files: Vec<(&'static str, Vec<u8>)>) -> Arc<Self> {
      Arc::new(Self {
        files,
        fail_with: None,
        seen_dirs: Mutex::new(Vec::new()),
      })
    }

    fn failing(message: &'static str) -> Arc<Self> {
      Arc::new(Self {
        files: Vec::new(),
        fail_with: Some(message),
        seen_dirs: Mutex::new(Vec::new()),
      })
    }

    fn workspace_dirs(&self) -> Vec<PathBuf> {
      self.seen_dirs.lock().unwrap().clone()
    }
  }

  #[async_trait]
  impl Provider for FakeProvider {
    async fn probe(&self, _url: &str) -> Result<ProbeInfo> {
      Err(Error::ProbeFailed("not implemented".to_owned()))
    }

    async fn materialize(
      &self,
      _url: &str,
      opts: &MaterializeOpts,
    ) -> Result<()> {
      let dir = opts.output_template.parent().unwrap().to_owned();
      self.seen_dirs.lock().unwrap().push(dir.clone());

      if let Some(message) = self.fail_with {
        return Err(Error::DownloadFailed(message.to_owned()));
      }

      for (name, bytes) in &self.files {
        std::fs::write(dir.join(name), bytes)?;
      }
      Ok(())
    }
  }

  #[tokio::test]
  async fn streams_whole_file_with_fixed_length() {
    let payload = vec![7u8; 20_000];
    let provider =
      FakeProvider::writing(vec![("My Video.mp4", payload.clone())]);
    let manager = DownloadManager::new(provider.clone());

    let download = manager.execute("https://example.com/v", None).await.unwrap();
    assert_eq!(download.filename, "My_Video.mp4");
    assert_eq!(download.size_bytes, payload.len() as u64);

    let chunks: Vec<Bytes> = download
      .stream
      .map(|chunk| chunk.unwrap())
      .collect()
      .await;
    let total: usize = chunks.iter().map(Bytes::len).sum();
    assert_eq!(total, payload.len());
    assert!(chunks.iter().all(|chunk| chunk.len() <= CHUNK_SIZE));

    let dirs = provider.workspace_dirs();
    assert!(!dirs[0].exists());
  }

  #[tokio::test]
  async fn fails_when_no_output_is_produced() {
    let provider = FakeProvider::writing(vec![]);
    let manager = DownloadManager::new(provider.clone());

    let err = manager.execute("url", None).await.unwrap_err();
    assert!(matches!(err, Error::NoOutputProduced));
    assert!(!provider.workspace_dirs()[0].exists());
  }

  #[tokio::test]
  async fn fails_when_output_is_empty() {
    let provider = FakeProvider::writing(vec![("video.mp4", vec![])]);
    let manager = DownloadManager::new(provider.clone());

    let err = manager.execute("url", None).await.unwrap_err();
    assert!(matches!(err, Error::EmptyOutput));
    assert!(!provider.workspace_dirs()[0].exists());
  }

  #[tokio::test]
  async fn fails_when_output_is_ambiguous() {
    let provider = FakeProvider::writing(vec![
      ("video.mp4", vec![1]),
      ("audio.m4a", vec![2]),
    ]);
    let manager = DownloadManager::new(provider.clone());

    let err = manager.execute("url", None).await.unwrap_err();
    assert!(matches!(err, Error::AmbiguousOutput(2)));
    assert!(!provider.workspace_dirs()[0].exists());
  }

  #[tokio::test]
  async fn wraps_provider_failures_and_cleans_up() {
    let provider = FakeProvider::failing("network unreachable");
    let manager = DownloadManager::new(provider.clone());

    let err = manager.execute("url", None).await.unwrap_err();
    match err {
      Error::DownloadFailed(message) => {
        assert_eq!(message, "network unreachable")
      }
      other => panic!("unexpected error: {other}"),
    }
    assert!(!provider.workspace_dirs()[0].exists());
  }

  #[tokio::test]
  async fn abandoned_stream_still_deletes_workspace() {
    let provider =
      FakeProvider::writing(vec![("video.mp4", vec![7u8; 100_000])]);
    let manager = DownloadManager::new(provider.clone());

    let download = manager.execute("url", None).await.unwrap();
    let mut stream = download.stream;

    // read one chunk, then walk away
    let first = stream.next().await.unwrap().unwrap();
    assert!(!first.is_empty());
    drop(stream);

    assert!(!provider.workspace_dirs()[0].exists());
  }

  #[tokio::test]
  async fn concurrent_downloads_use_distinct_workspaces() {
    let provider = FakeProvider::writing(vec![("video.mp4", vec![1, 2, 3])]);
    let manager = DownloadManager::new(provider.clone());

    let (a, b) =
      tokio::join!(manager.execute("url-a", None), manager.execute("url-b", None));
    a.unwrap();
    b.unwrap();

    let dirs = provider.workspace_dirs();
    assert_eq!(dirs.len(), 2);
    assert_ne!(dirs[0], dirs[1]);
  }

  #[tokio::test]
  async fn explicit_format_selector_reaches_the_provider() {
    struct SelectorCheck;

    #[async_trait]
    impl Provider for SelectorCheck {
      async fn probe(&self, _url: &str) -> Result<ProbeInfo> {
        unreachable!()
      }

      async fn materialize(
        &self,
        _url: &str,
        opts: &MaterializeOpts,
      ) -> Result<()> {
        assert_eq!(opts.format_selector, "137+140");
        assert_eq!(opts.format_sort, "res,ext:mp4:m4a,size,br");
        let dir = opts.output_template.parent().unwrap();
        std::fs::write(dir.join("v.mp4"), b"x")?;
        Ok(())
      }
    }

    let manager = DownloadManager::new(Arc::new(SelectorCheck));
    manager.execute("url", Some("137+140")).await.unwrap();
  }

  #[test]
  fn sanitizes_every_disallowed_character() {
    assert_eq!(
      sanitized_filename("Rick Astley: Never Gonna Give You Up!", "mp4"),
      "Rick_Astley__Never_Gonna_Give_You_Up_.mp4"
    );
    assert_eq!(sanitized_filename("safe-name_01", "mp4"), "safe-name_01.mp4");
  }
}
