// src/routes/postal_routes.rs

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::{
    error::{ApiError, FieldError},
    integrations::postal::Address,
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState},
    validation::only_digits,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/postal-codes/{code}", get(lookup_postal_code))
}

/// The form fields an address lookup pre-fills.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddressFill {
    pub street: String,
    pub neighborhood: String,
    pub city: String,
    pub state: String,
}

impl From<Address> for AddressFill {
    fn from(a: Address) -> Self {
        AddressFill {
            street: a.street,
            neighborhood: a.neighborhood,
            city: a.city,
            state: a.state,
        }
    }
}

fn normalize_code(raw: &str) -> Result<String, ApiError> {
    let digits = only_digits(raw);
    if digits.len() == 8 {
        Ok(digits)
    } else {
        Err(ApiError::Validation(vec![FieldError {
            field: "postal_code",
            message: "postal code must have 8 digits".into(),
        }]))
    }
}

pub async fn find_address(state: &AppState, raw: &str) -> Result<AddressFill, ApiError> {
    let code = normalize_code(raw)?;
    let address = state.postal.lookup(&code).await?;
    Ok(address.into())
}

pub async fn lookup_postal_code(
    State(state): State<AppState>,
    _caller: CallerContext,
    Path(code): Path<String>,
) -> Result<Json<ApiOk<AddressFill>>, ApiError> {
    let data = find_address(&state, &code).await?;
    Ok(Json(ApiOk { data }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::lazy_state;

    #[test]
    fn test_code_is_normalized() {
        assert_eq!(normalize_code("01310-100").unwrap(), "01310100");
        assert!(matches!(normalize_code("0131-01"), Err(ApiError::Validation(_))));
        assert!(matches!(normalize_code("013101000"), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_known_code_fills_address() {
        let state = lazy_state();
        let fill = find_address(&state, "01310-100").await.unwrap();
        assert_eq!(
            fill,
            AddressFill {
                street: "Avenida Paulista".into(),
                neighborhood: "Bela Vista".into(),
                city: "São Paulo".into(),
                state: "SP".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_unknown_code_is_not_found() {
        let state = lazy_state();
        assert!(matches!(
            find_address(&state, "99999999").await,
            Err(ApiError::NotFound(..))
        ));
    }
}
