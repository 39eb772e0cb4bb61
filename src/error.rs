use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorObject,
}

#[derive(Debug, Serialize)]
pub struct ErrorObject {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<FieldError>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized(&'static str, String),
    Forbidden(&'static str, String),
    BadRequest(&'static str, String),
    Validation(Vec<FieldError>),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    /// Identity provider rejected a request; carries the user-facing text.
    Provider(String),
    Upstream(String),
    Internal(String),
}

impl ApiError {
    pub fn unauthenticated() -> Self {
        ApiError::Unauthorized(
            "UNAUTHENTICATED",
            "You must be signed in to perform this action".into(),
        )
    }

    pub fn not_found(what: &str) -> Self {
        ApiError::NotFound("NOT_FOUND", format!("{what} not found"))
    }

    fn to_error_response(
        code: &str,
        message: &str,
        fields: Option<Vec<FieldError>>,
    ) -> Json<ErrorResponse> {
        Json(ErrorResponse {
            error: ErrorObject {
                code: code.to_string(),
                message: message.to_string(),
                fields,
            },
        })
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized(code, msg)
            | ApiError::Forbidden(code, msg)
            | ApiError::BadRequest(code, msg)
            | ApiError::NotFound(code, msg)
            | ApiError::Conflict(code, msg) => write!(f, "{code}: {msg}"),
            ApiError::Validation(fields) => write!(f, "VALIDATION_ERROR: {} field(s)", fields.len()),
            ApiError::Provider(msg) => write!(f, "PROVIDER_ERROR: {msg}"),
            ApiError::Upstream(msg) => write!(f, "UPSTREAM_ERROR: {msg}"),
            ApiError::Internal(msg) => write!(f, "INTERNAL: {msg}"),
        }
    }
}

/// Maps a sqlx error to the API taxonomy. Constraint violations become
/// conflicts so the caller can show a useful message.
pub fn db_error(e: sqlx::Error) -> ApiError {
    if let Some(db) = e.as_database_error() {
        match db.code().as_deref() {
            Some("23505") => {
                return ApiError::Conflict(
                    "ALREADY_EXISTS",
                    format!(
                        "a record with the same {} already exists",
                        db.constraint().map(constraint_subject).unwrap_or("key")
                    ),
                );
            }
            Some("23503") => {
                return ApiError::Conflict(
                    "IN_USE",
                    "the record is referenced by other records".into(),
                );
            }
            _ => {}
        }
    }
    ApiError::Internal(format!("db error: {e}"))
}

pub fn internal_row(e: sqlx::Error) -> ApiError {
    ApiError::Internal(format!("row decode error: {e}"))
}

fn constraint_subject(constraint: &str) -> &'static str {
    if constraint.ends_with("cpf_key") {
        "cpf"
    } else if constraint.ends_with("email_key") {
        "email"
    } else if constraint.ends_with("name_key") {
        "name"
    } else {
        "key"
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized(code, msg) => (
                StatusCode::UNAUTHORIZED,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Forbidden(code, msg) => (
                StatusCode::FORBIDDEN,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::BadRequest(code, msg) => (
                StatusCode::BAD_REQUEST,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Validation(fields) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::to_error_response(
                    "VALIDATION_ERROR",
                    "One or more fields are invalid",
                    Some(fields),
                ),
            )
                .into_response(),
            ApiError::NotFound(code, msg) => (
                StatusCode::NOT_FOUND,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Conflict(code, msg) => (
                StatusCode::CONFLICT,
                ApiError::to_error_response(code, &msg, None),
            )
                .into_response(),
            ApiError::Provider(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::to_error_response("PROVIDER_ERROR", &msg, None),
            )
                .into_response(),
            ApiError::Upstream(msg) => {
                tracing::warn!(error = %msg, "upstream service failed");
                (
                    StatusCode::BAD_GATEWAY,
                    ApiError::to_error_response("UPSTREAM_ERROR", "External service unavailable", None),
                )
                    .into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::to_error_response("INTERNAL", &msg, None),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let cases = [
            (ApiError::unauthenticated(), StatusCode::UNAUTHORIZED),
            (ApiError::not_found("pet"), StatusCode::NOT_FOUND),
            (ApiError::Validation(vec![]), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::Provider("x".into()), StatusCode::UNPROCESSABLE_ENTITY),
            (ApiError::Conflict("C", "x".into()), StatusCode::CONFLICT),
            (ApiError::Upstream("x".into()), StatusCode::BAD_GATEWAY),
        ];
        for (err, status) in cases {
            assert_eq!(err.into_response().status(), status);
        }
    }

    #[test]
    fn test_not_found_message() {
        match ApiError::not_found("species") {
            ApiError::NotFound(code, msg) => {
                assert_eq!(code, "NOT_FOUND");
                assert_eq!(msg, "species not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_constraint_subject() {
        assert_eq!(constraint_subject("customer_cpf_key"), "cpf");
        assert_eq!(constraint_subject("app_user_email_key"), "email");
        assert_eq!(constraint_subject("species_name_key"), "name");
        assert_eq!(constraint_subject("breed_species_id_name_key"), "name");
        assert_eq!(constraint_subject("pet_pkey"), "key");
    }
}
