use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vigil_alert::{AlertError, PolicyError};
use vigil_correction::CorrectionError;
use vigil_recovery::RecoveryError;
use vigil_rule::RuleError;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    InternalError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message,
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

impl From<AlertError> for ApiError {
    fn from(err: AlertError) -> Self {
        match err {
            AlertError::NotFound(_) => ApiError::NotFound(err.to_string()),
            AlertError::AlreadyResolved(_) => ApiError::Conflict(err.to_string()),
            AlertError::InvalidEscalation(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<RuleError> for ApiError {
    fn from(err: RuleError) -> Self {
        match err {
            RuleError::NotFound(_) => ApiError::NotFound(err.to_string()),
            RuleError::Invalid(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<PolicyError> for ApiError {
    fn from(err: PolicyError) -> Self {
        match err {
            PolicyError::NotFound(_) => ApiError::NotFound(err.to_string()),
            PolicyError::Invalid(_) => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<CorrectionError> for ApiError {
    fn from(err: CorrectionError) -> Self {
        match err {
            CorrectionError::RuleNotFound(_) => ApiError::NotFound(err.to_string()),
            CorrectionError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<RecoveryError> for ApiError {
    fn from(err: RecoveryError) -> Self {
        match err {
            RecoveryError::ProcedureNotFound(_)
            | RecoveryError::CrashNotFound(_)
            | RecoveryError::ExecutionNotFound(_) => ApiError::NotFound(err.to_string()),
            RecoveryError::Invalid(_) => ApiError::BadRequest(err.to_string()),
            RecoveryError::InvalidState(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_of(ApiError::NotFound("x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(ApiError::BadRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(ApiError::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_of(ApiError::InternalError("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_already_resolved_maps_to_conflict() {
        let err: ApiError = AlertError::AlreadyResolved("a-1".into()).into();
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }

    #[test]
    fn test_recovery_invalid_state_maps_to_conflict() {
        let err: ApiError = RecoveryError::InvalidState("not pending".into()).into();
        assert_eq!(status_of(err), StatusCode::CONFLICT);
    }
}
