use axum::response::{IntoResponse, Response};
use axum::Json;
use http::StatusCode;
use serde_json::json;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
  #[error("invalid request: {0}")]
  InvalidRequest(String),

  #[error("failed to fetch metadata: {0}")]
  ProbeFailed(String),

  #[error("download failed: {0}")]
  DownloadFailed(String),

  #[error("download produced no output file")]
  NoOutputProduced,

  #[error("downloaded file is empty")]
  EmptyOutput,

  #[error("download produced {0} output files, expected exactly one")]
  AmbiguousOutput(usize),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("http error: {0}")]
  Http(#[from] http::Error),
}

impl IntoResponse for Error {
  fn into_response(self) -> Response {
    let status = match self {
      Error::Io(_) | Error::Http(_) => StatusCode::INTERNAL_SERVER_ERROR,
      _ => StatusCode::BAD_REQUEST,
    };

    (status, Json(json!({ "detail": self.to_string() }))).into_response()
  }
}
