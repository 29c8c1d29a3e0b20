//! Mapping of session errors to HTTP responses.

use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    courier_whatsapp::Error,
    serde_json::json,
};

/// Error returned by gateway handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] Error),

    #[error("{0}")]
    BadRequest(String),

    #[error("missing or invalid bearer token")]
    Unauthorized(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(e) => match e {
                Error::AlreadyLoggedIn => StatusCode::CONFLICT,
                Error::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                Error::InvalidRecipient(_) => StatusCode::BAD_REQUEST,
                Error::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                Error::ConnectFailed(_)
                | Error::EmptyCode
                | Error::LogoutFailed(_)
                | Error::SendFailed(_) => StatusCode::BAD_GATEWAY,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Session(e) => e.code(),
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(reason) => reason,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::time::Duration};

    #[test]
    fn session_errors_map_to_gateway_statuses() {
        let cases = [
            (Error::AlreadyLoggedIn, StatusCode::CONFLICT),
            (Error::NotConnected, StatusCode::SERVICE_UNAVAILABLE),
            (Error::Timeout(Duration::from_secs(1)), StatusCode::GATEWAY_TIMEOUT),
            (Error::EmptyCode, StatusCode::BAD_GATEWAY),
            (Error::InvalidRecipient("x".into()), StatusCode::BAD_REQUEST),
            (Error::Store(anyhow::anyhow!("disk full")), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn unauthorized_reports_reason_code() {
        let err = ApiError::Unauthorized("token_mismatch");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.code(), "token_mismatch");
    }
}
