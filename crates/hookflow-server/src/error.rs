use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use hookflow_core::{HandlerError, HistoryError};
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(resource: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{} not found", resource))
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "code": self.status.as_u16(),
                "message": self.message,
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<HandlerError> for ApiError {
    fn from(err: HandlerError) -> Self {
        let status = match &err {
            HandlerError::NotFound(_) => StatusCode::NOT_FOUND,
            HandlerError::NotActive(_) => StatusCode::CONFLICT,
            HandlerError::ManagerClosed => StatusCode::SERVICE_UNAVAILABLE,
            err if err.is_configuration() => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %err, "Handler error");
        }
        Self::new(status, err.to_string())
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        tracing::error!(error = %err, "History error");
        Self::internal(err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %err, "API error");
        Self::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hookflow_traits::CronError;

    #[test]
    fn test_handler_error_status_mapping() {
        let cases = [
            (HandlerError::NotFound("h".into()), StatusCode::NOT_FOUND),
            (HandlerError::NotActive("h".into()), StatusCode::CONFLICT),
            (HandlerError::InvalidInterval("0s".into()), StatusCode::BAD_REQUEST),
            (
                HandlerError::Cron(CronError::InvalidExpression {
                    expression: "bad".into(),
                    reason: "nope".into(),
                }),
                StatusCode::BAD_REQUEST,
            ),
            (HandlerError::Cron(CronError::Shutdown), StatusCode::INTERNAL_SERVER_ERROR),
            (HandlerError::ManagerClosed, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
