// src/routes/service_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    error::{ApiError, db_error},
    formatting::format_brl,
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, OkResponse},
    revalidate::Listing,
    routes::species_routes::Species,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(list_services).post(upsert_service))
        .route("/services/{service_id}", delete(delete_service))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceWithSpecies {
    pub id: Uuid,
    pub name: String,
    pub price_in_cents: i32,
    /// e.g. "R$ 150,00"
    pub price: String,
    pub description: Option<String>,
    pub species_id: Option<Uuid>,
    pub species: Option<Species>,
}

// Species is optional on a service, so the join is outer.
const SERVICE_LIST: ListQuery = ListQuery {
    columns: r#"
        sv.id, sv.name, sv.price_in_cents, sv.description, sv.species_id,
        s.name AS species_name
    "#,
    from: "service sv LEFT JOIN species s ON s.id = sv.species_id",
    root_key: "sv.id",
    search_columns: &["sv.name", "sv.description", "s.name"],
    order_by: "sv.name ASC, sv.id ASC",
    fans_out: false,
};

fn map_service(r: &PgRow) -> Result<ServiceWithSpecies, sqlx::Error> {
    let price_in_cents: i32 = r.try_get("price_in_cents")?;
    let species_id: Option<Uuid> = r.try_get("species_id")?;
    let species_name: Option<String> = r.try_get("species_name")?;

    Ok(ServiceWithSpecies {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        price_in_cents,
        price: format_brl(i64::from(price_in_cents)),
        description: r.try_get("description")?,
        species_id,
        species: species_id
            .zip(species_name)
            .map(|(id, name)| Species { id, name }),
    })
}

pub async fn fetch_services(
    state: &AppState,
    _caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<ServiceWithSpecies>, ApiError> {
    fetch_page(&state.db, &SERVICE_LIST, req, None, map_service).await
}

pub async fn list_services(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_services(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Services), Json(page)))
}

/* ============================================================
   Upsert / delete
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct ServiceInput {
    pub id: Option<Uuid>,
    pub name: String,
    pub price_in_cents: i32,
    pub description: Option<String>,
    pub species_id: Option<Uuid>,
}

fn validate_service(input: &ServiceInput) -> Result<(String, Option<String>), ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 120);
    v.non_negative("price_in_cents", i64::from(input.price_in_cents));
    v.finish()?;

    let description = input
        .description
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    Ok((name, description))
}

async fn load_service(state: &AppState, service_id: Uuid) -> Result<ServiceWithSpecies, ApiError> {
    fetch_one(&state.db, &SERVICE_LIST, service_id, None, map_service)
        .await?
        .ok_or_else(|| ApiError::not_found("service"))
}

pub async fn write_service(
    state: &AppState,
    caller: &CallerContext,
    input: ServiceInput,
) -> Result<ServiceWithSpecies, ApiError> {
    caller.ensure_staff()?;
    let (name, description) = validate_service(&input)?;

    if let Some(species_id) = input.species_id {
        let found: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM species WHERE id = $1"#)
            .bind(species_id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?;
        if found.is_none() {
            return Err(ApiError::not_found("species"));
        }
    }

    let service_id: Uuid = match input.id {
        Some(id) => sqlx::query_scalar(
            r#"
            UPDATE service
            SET name = $2, price_in_cents = $3, description = $4, species_id = $5
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(input.price_in_cents)
        .bind(&description)
        .bind(input.species_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("service"))?,
        None => sqlx::query_scalar(
            r#"
            INSERT INTO service (name, price_in_cents, description, species_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET price_in_cents = EXCLUDED.price_in_cents,
                description = EXCLUDED.description,
                species_id = EXCLUDED.species_id
            RETURNING id
            "#,
        )
        .bind(&name)
        .bind(input.price_in_cents)
        .bind(&description)
        .bind(input.species_id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?,
    };

    tracing::info!(service_id = %service_id, price_in_cents = input.price_in_cents, "service saved");
    state.revisions.bump(&[Listing::Services]);
    load_service(state, service_id).await
}

pub async fn upsert_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<ServiceInput>,
) -> Result<Json<ApiOk<ServiceWithSpecies>>, ApiError> {
    let data = write_service(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

/// Services referenced by appointments cannot be deleted (`IN_USE`).
pub async fn remove_service(
    state: &AppState,
    caller: &CallerContext,
    service_id: Uuid,
) -> Result<(), ApiError> {
    caller.ensure_staff()?;

    let res = sqlx::query(r#"DELETE FROM service WHERE id = $1"#)
        .bind(service_id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("service"));
    }

    tracing::info!(service_id = %service_id, "service deleted");
    state.revisions.bump(&[Listing::Services]);
    Ok(())
}

pub async fn delete_service(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(service_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    remove_service(&state, &caller, service_id).await?;
    Ok(Json(OkResponse::ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use crate::routes::test_support::{caller, test_state};

    fn input(name: &str, price_in_cents: i32) -> ServiceInput {
        ServiceInput {
            id: None,
            name: name.into(),
            price_in_cents,
            description: None,
            species_id: None,
        }
    }

    #[test]
    fn test_negative_price_is_rejected() {
        assert!(matches!(
            validate_service(&input("Vacina V10", -1)),
            Err(ApiError::Validation(_))
        ));
        assert!(validate_service(&input("Consulta", 0)).is_ok());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_service_without_species_is_listed(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let admin = caller(Role::Admin);
        let saved = write_service(&state, &admin, input("Consulta domiciliar", 15000))
            .await
            .unwrap();
        assert_eq!(saved.species, None);
        assert_eq!(saved.price, "R$ 150,00");

        let page = fetch_services(&state, &admin, &PageRequest::new(1, 10, Some("domic")).unwrap())
            .await
            .unwrap();
        assert_eq!(page.metadata.total_count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "needs a Postgres DATABASE_URL"]
    async fn test_upsert_on_name(pool: sqlx::PgPool) {
        let state = test_state(pool);
        let admin = caller(Role::Admin);
        let a = write_service(&state, &admin, input("Banho", 5000)).await.unwrap();
        let b = write_service(&state, &admin, input("Banho", 6000)).await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.price_in_cents, 6000);
    }
}
