use std::process::Stdio;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;
use tracing::info;

use crate::util::{ytdlp_proxy, YTDLP_MUTEX};
use crate::{Error, Result};

use super::{MaterializeOpts, ProbeInfo, Provider};

// run the yt-dlp command line for probing and downloading.
// requires yt-dlp executable to be in PATH.
pub struct Ytdlp;

#[async_trait]
impl Provider for Ytdlp {
  async fn probe(&self, url: &str) -> Result<ProbeInfo> {
    let mut cmd = Command::new("yt-dlp");
    cmd.arg("-J").arg("--no-download").arg(url);
    add_proxy(&mut cmd);

    let guard = YTDLP_MUTEX.acquire().await.unwrap();
    let output = cmd.output().await?;
    drop(guard);

    if !output.status.success() {
      return Err(Error::ProbeFailed(stderr_message(&output.stderr)));
    }

    serde_json::from_slice(&output.stdout)
      .map_err(|e| Error::ProbeFailed(format!("unparsable metadata: {e}")))
  }

  async fn materialize(
    &self,
    url: &str,
    opts: &MaterializeOpts,
  ) -> Result<()> {
    let mut cmd = Command::new("yt-dlp");
    cmd
      .arg("-f")
      .arg(&opts.format_selector)
      .arg("--format-sort")
      .arg(&opts.format_sort)
      .arg("-o")
      .arg(&opts.output_template)
      .arg("--merge-output-format")
      .arg(&opts.merge_container)
      .arg("--user-agent")
      .arg(&opts.user_agent)
      .arg("--socket-timeout")
      .arg(opts.socket_timeout_secs.to_string())
      .arg("--no-progress")
      .arg("--no-mtime")
      .arg("--no-playlist");

    if !opts.check_certificates {
      cmd.arg("--no-check-certificates");
    }

    for (name, value) in &opts.http_headers {
      cmd.arg("--add-header").arg(format!("{name}:{value}"));
    }

    add_proxy(&mut cmd);
    cmd.arg(url);

    let guard = YTDLP_MUTEX.acquire().await.unwrap();
    let child = cmd
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()?;
    let output = child.wait_with_output().await?;
    drop(guard);

    detect_error(&output.stderr)?;

    if !output.status.success() {
      return Err(Error::DownloadFailed(format!(
        "yt-dlp exited with {}",
        output.status
      )));
    }

    Ok(())
  }
}

fn add_proxy(cmd: &mut Command) {
  if let Some(proxy) = ytdlp_proxy() {
    // used to remove cred info from proxy url before printing
    static AUTH_REGEX: LazyLock<Regex> =
      LazyLock::new(|| Regex::new(r"//[^:]+(:[^@]+)@").unwrap());
    info!("using proxy: {}", AUTH_REGEX.replace(proxy, "//<REDACTED>@"));
    cmd.arg("--proxy").arg(proxy);
  }
}

// yt-dlp reports some failures only on stderr, with a zero-ish exit.
fn detect_error(stderr: &[u8]) -> Result<()> {
  let s = String::from_utf8_lossy(stderr);
  if s.contains("ERROR:") {
    Err(Error::DownloadFailed(stderr_message(stderr)))
  } else {
    Ok(())
  }
}

fn stderr_message(stderr: &[u8]) -> String {
  let s = String::from_utf8_lossy(stderr);
  s.lines()
    .find(|line| line.contains("ERROR:"))
    .unwrap_or_else(|| s.lines().last().unwrap_or("unknown provider error"))
    .trim()
    .to_owned()
}
