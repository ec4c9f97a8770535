use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use couponsync_core::storage::{repository_error_to_status_code, RepositoryError};

use crate::notify::NotifyError;

/// Request problems detected before any component is called.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("{0}")]
    UnknownEntityType(String),
}

pub struct AppError(pub anyhow::Error);

impl AppError {
    fn status_code(&self) -> StatusCode {
        if let Some(repo_error) = self.0.downcast_ref::<RepositoryError>() {
            let code = repository_error_to_status_code(repo_error);
            return StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        }
        if let Some(notify_error) = self.0.downcast_ref::<NotifyError>() {
            return match notify_error {
                NotifyError::UnknownClient(_) => StatusCode::NOT_FOUND,
                NotifyError::UnknownChannel(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::SERVICE_UNAVAILABLE,
            };
        }
        if self.0.downcast_ref::<RequestError>().is_some() {
            return StatusCode::BAD_REQUEST;
        }
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status_code = self.status_code();
        if status_code.is_server_error() {
            tracing::error!(status = %status_code, error = %self.0, "Request failed");
        }

        (status_code, self.0.to_string()).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
