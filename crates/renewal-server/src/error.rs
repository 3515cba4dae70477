use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use renewal_core::ReminderError;

// ---------------------------------------------------------------------------
// Internal sentinel for request-shape errors
// ---------------------------------------------------------------------------

/// Carries an explicit HTTP 400 through the `anyhow::Error` chain for
/// requests rejected before they reach the runtime.
#[derive(Debug)]
struct BadRequestError(String);

impl std::fmt::Display for BadRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for BadRequestError {}

// ---------------------------------------------------------------------------
// AppError
// ---------------------------------------------------------------------------

/// Unified error type for HTTP responses.
#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self(BadRequestError(msg.into()).into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let Some(b) = self.0.downcast_ref::<BadRequestError>() {
            let body = serde_json::json!({ "error": b.0.clone() });
            return (StatusCode::BAD_REQUEST, axum::Json(body)).into_response();
        }

        let status = match self.0.downcast_ref::<ReminderError>() {
            Some(e) => match e {
                ReminderError::InvalidSubscriptionId(_) => StatusCode::BAD_REQUEST,
                ReminderError::SubscriptionNotFound(_) | ReminderError::RunNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ReminderError::RunAlreadyFinished(_) => StatusCode::CONFLICT,
                ReminderError::DataIntegrity(_) => StatusCode::UNPROCESSABLE_ENTITY,
                ReminderError::RunDb(_)
                | ReminderError::Io(_)
                | ReminderError::Yaml(_)
                | ReminderError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_maps_to_400() {
        let err = AppError(ReminderError::InvalidSubscriptionId("a b".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn subscription_not_found_maps_to_404() {
        let err = AppError(ReminderError::SubscriptionNotFound("sub-9".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn run_not_found_maps_to_404() {
        let err = AppError(ReminderError::RunNotFound("sub-9".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn finished_run_maps_to_409() {
        let err = AppError(ReminderError::RunAlreadyFinished("sub-1".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::CONFLICT);
    }

    #[test]
    fn data_integrity_maps_to_422() {
        let err = AppError(ReminderError::DataIntegrity("empty email".into()).into());
        assert_eq!(err.into_response().status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn run_db_maps_to_500() {
        let err = AppError(ReminderError::RunDb("locked".into()).into());
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn foreign_error_maps_to_500() {
        let err = AppError(anyhow::anyhow!("task join error"));
        assert_eq!(
            err.into_response().status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn bad_request_constructor_maps_to_400() {
        let err = AppError::bad_request("missing subscriptionId");
        assert_eq!(err.into_response().status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn response_body_is_json() {
        let response = AppError(ReminderError::RunNotFound("x".into()).into()).into_response();
        let ct = response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .expect("should have content-type");
        assert!(ct.to_str().unwrap().contains("application/json"));
    }
}
