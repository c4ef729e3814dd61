use std::sync::Arc;

use axum::{
  response::IntoResponse,
  routing::{get, post},
  Json, Router,
};
use tower_http::cors::CorsLayer;
use tracing::info;

mod download;
mod error;
mod formats;
mod provider;
mod util;
mod workspace;

pub use error::{Error, Result};

use download::DownloadManager;
use provider::{Provider, Ytdlp};

pub struct App {
  pub manager: DownloadManager,
  pub provider: Arc<dyn Provider>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into()),
    )
    .init();

  let provider: Arc<dyn Provider> = Arc::new(Ytdlp);
  let app = Arc::new(App {
    manager: DownloadManager::new(provider.clone()),
    provider,
  });

  let router = Router::new()
    .route("/", get(root))
    .route("/health", get(health))
    .route("/download", post(download::download))
    .route("/api/download", post(download::download))
    .route("/formats", post(formats::formats))
    .layer(CorsLayer::permissive())
    .with_state(app);

  let addr = util::bind_addr();
  info!("listening on {}", addr);

  axum::Server::bind(&addr)
    .serve(router.into_make_service())
    .await
    .expect("failed to start server");

  Ok(())
}

async fn root() -> impl IntoResponse {
  Json(serde_json::json!({ "message": "video download API is running" }))
}

async fn health() -> impl IntoResponse {
  "ok".to_owned()
}
