use std::net::SocketAddr;
use std::sync::LazyLock;

use tokio::sync::Semaphore;

// ensure only a limited set of yt-dlp processes run at a time
pub static YTDLP_MUTEX: LazyLock<Semaphore> = LazyLock::new(|| {
  let concurrency = std::env::var("YTDLP_CONCURRENCY")
    .ok()
    .and_then(|s| s.parse::<usize>().ok())
    .unwrap_or(4);
  Semaphore::new(concurrency)
});

// read ytdlp_proxy from environment variable (YTDLP_PROXY) and return it.
static YTDLP_PROXY: LazyLock<Option<String>> =
  LazyLock::new(|| std::env::var("YTDLP_PROXY").ok());

pub fn ytdlp_proxy() -> Option<&'static str> {
  YTDLP_PROXY.as_deref()
}

pub fn bind_addr() -> SocketAddr {
  std::env::var("BIND_ADDR")
    .ok()
    .and_then(|s| s.parse().ok())
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080)))
}

pub fn socket_timeout_secs() -> u64 {
  std::env::var("SOCKET_TIMEOUT_SECS")
    .ok()
    .and_then(|s| s.parse().ok())
    .unwrap_or(30)
}
