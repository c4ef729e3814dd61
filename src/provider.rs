mod ytdlp;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;

pub use ytdlp::Ytdlp;

/// Options passed opaquely to the provider for one materialization.
/// This core builds them from service configuration and does not
/// interpret them further.
pub struct MaterializeOpts {
  pub output_template: PathBuf,
  pub format_selector: String,
  pub format_sort: String,
  pub merge_container: String,
  pub user_agent: String,
  pub http_headers: Vec<(String, String)>,
  pub check_certificates: bool,
  pub socket_timeout_secs: u64,
}

// metadata as reported by the provider, no media transferred.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeInfo {
  #[serde(default = "unknown_title")]
  pub title: String,
  pub duration: Option<f64>,
  #[serde(default)]
  pub formats: Vec<RawFormat>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawFormat {
  #[serde(default)]
  pub format_id: String,
  pub ext: Option<String>,
  pub resolution: Option<String>,
  pub width: Option<u32>,
  pub height: Option<u32>,
  pub filesize: Option<u64>,
  pub format_note: Option<String>,
  pub fps: Option<f64>,
  pub vcodec: Option<String>,
  pub acodec: Option<String>,
}

impl RawFormat {
  pub fn has_video(&self) -> bool {
    self.vcodec.as_deref().is_some_and(|c| c != "none")
  }

  pub fn has_audio(&self) -> bool {
    self.acodec.as_deref().is_some_and(|c| c != "none")
  }
}

fn unknown_title() -> String {
  "Unknown Title".to_owned()
}

#[async_trait]
pub trait Provider: Send + Sync {
  // fetch metadata for a url without downloading any media.
  async fn probe(&self, url: &str) -> Result<ProbeInfo>;

  // fetch the media and write it under the output template's directory.
  async fn materialize(&self, url: &str, opts: &MaterializeOpts)
    -> Result<()>;
}
