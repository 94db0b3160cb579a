//! Maps `muxd_domain::Error` onto the HTTP surface (spec §7).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use muxd_domain::error::Error;

pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Provider { .. } => StatusCode::BAD_GATEWAY,
            Error::Canceled => StatusCode::OK,
            Error::Io(_) | Error::Json(_) | Error::Other(_) | Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "internal error");
        }
        (status, axum::Json(serde_json::json!({ "error": self.0.to_string(), "kind": self.0.kind() }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_maps_to_409() {
        let resp = ApiError(Error::Conflict("busy".into())).into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = ApiError(Error::NotFound("x".into())).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn auth_maps_to_401() {
        let resp = ApiError(Error::Auth("bad token".into())).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
