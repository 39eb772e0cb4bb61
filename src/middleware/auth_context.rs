use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{ApiError, db_error};
use crate::models::{AppState, Role};

/// Who is calling, resolved once per request and passed explicitly to
/// every lister and writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: Uuid,
    pub external_id: String,
    pub role: Role,
}

#[derive(Debug, sqlx::FromRow)]
struct CallerRow {
    id: Uuid,
    role: Role,
}

impl FromRequestParts<AppState> for CallerContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            if let Some(caller) = parts.extensions.get::<CallerContext>() {
                return Ok(caller.clone());
            }

            // Extract Authorization: Bearer <session jwt>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::unauthenticated())?;

            let claims = state
                .sessions
                .verify(authz.token())
                .ok_or_else(ApiError::unauthenticated)?;

            // Users are mirrored locally by the identity webhook.
            let row: CallerRow = sqlx::query_as::<_, CallerRow>(
                r#"
                SELECT id, role
                FROM app_user
                WHERE external_identity_id = $1
                "#,
            )
            .bind(&claims.sub)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?
            .ok_or_else(ApiError::unauthenticated)?;

            let caller = CallerContext {
                user_id: row.id,
                role: claims.role().unwrap_or(row.role),
                external_id: claims.sub,
            };
            parts.extensions.insert(caller.clone());
            Ok(caller)
        }
    }
}

impl CallerContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn is_doctor(&self) -> bool {
        self.role == Role::Doctor
    }

    pub fn is_customer(&self) -> bool {
        self.role == Role::Customer
    }

    pub fn ensure_staff(&self) -> Result<(), ApiError> {
        if self.is_admin() || self.is_doctor() {
            Ok(())
        } else {
            Err(ApiError::Forbidden(
                "FORBIDDEN",
                "Only clinic staff can perform this action".into(),
            ))
        }
    }

    /// Customer record owned by the caller.
    pub async fn customer_id(&self, db: &PgPool) -> Result<Uuid, ApiError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM customer
            WHERE user_id = $1
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            ApiError::BadRequest(
                "NO_CUSTOMER_PROFILE",
                "This account has no customer profile".into(),
            )
        })
    }

    /// Doctor record owned by the caller.
    pub async fn doctor_id(&self, db: &PgPool) -> Result<Uuid, ApiError> {
        sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM doctor
            WHERE user_id = $1
            "#,
        )
        .bind(self.user_id)
        .fetch_optional(db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| {
            ApiError::BadRequest(
                "NO_DOCTOR_PROFILE",
                "Doctor account has no doctor profile".into(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(role: Role) -> CallerContext {
        CallerContext {
            user_id: Uuid::new_v4(),
            external_id: "user_test".into(),
            role,
        }
    }

    #[test]
    fn test_staff_checks() {
        assert!(caller(Role::Admin).ensure_staff().is_ok());
        assert!(caller(Role::Doctor).ensure_staff().is_ok());
        assert!(caller(Role::Customer).ensure_staff().is_err());
    }
}
