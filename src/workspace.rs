use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Exclusively-owned temporary directory scoped to a single download.
///
/// Created right before the provider materializes a file into it and
/// deleted recursively exactly once, on whichever exit path drops it:
/// normal completion, provider failure, validation failure, or an
/// abandoned byte stream. Deletion failures are logged and never
/// override the outcome of the download itself.
#[derive(Debug)]
pub struct Workspace {
  dir: Option<TempDir>,
}

pub struct MaterializedFile {
  pub path: PathBuf,
  pub title: String,
  pub extension: String,
  pub size_bytes: u64,
}

impl Workspace {
  pub fn create() -> Result<Self> {
    let dir = tempfile::Builder::new().prefix("video-dl-").tempdir()?;
    debug!("allocated workspace: {}", dir.path().display());
    Ok(Self { dir: Some(dir) })
  }

  pub fn path(&self) -> &Path {
    self.dir.as_ref().expect("workspace already released").path()
  }

  // provider-style output template rooted at this workspace.
  pub fn output_template(&self) -> PathBuf {
    self.path().join("%(title)s.%(ext)s")
  }

  /// The single file the provider is expected to have produced.
  ///
  /// Zero entries means the provider claimed success without writing
  /// anything; more than one means an expected merge step did not
  /// happen, and picking an arbitrary entry would serve a broken file.
  pub fn single_output(&self) -> Result<MaterializedFile> {
    let mut entries = fs::read_dir(self.path())?
      .collect::<std::io::Result<Vec<_>>>()?;

    if entries.is_empty() {
      return Err(Error::NoOutputProduced);
    }
    if entries.len() > 1 {
      return Err(Error::AmbiguousOutput(entries.len()));
    }

    let path = entries.remove(0).path();
    let size_bytes = fs::metadata(&path)?.len();
    if size_bytes == 0 {
      return Err(Error::EmptyOutput);
    }

    let title = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "download".to_owned());
    let extension = path
      .extension()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "mp4".to_owned());

    Ok(MaterializedFile {
      path,
      title,
      extension,
      size_bytes,
    })
  }

  pub fn release(mut self) {
    self.delete();
  }

  fn delete(&mut self) {
    let Some(dir) = self.dir.take() else { return };
    let path = dir.path().to_owned();
    if let Err(e) = dir.close() {
      warn!("failed to delete workspace {}: {}", path.display(), e);
    } else {
      debug!("deleted workspace: {}", path.display());
    }
  }
}

impl Drop for Workspace {
  fn drop(&mut self) {
    self.delete();
  }
}
