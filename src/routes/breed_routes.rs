// src/routes/breed_routes.rs

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
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, OkResponse},
    revalidate::Listing,
    routes::species_routes::Species,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/breeds", get(list_breeds).post(upsert_breed))
        .route("/breeds/{breed_id}", delete(delete_breed))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreedWithSpecies {
    pub id: Uuid,
    pub name: String,
    pub species_id: Uuid,
    pub species: Species,
}

const BREED_LIST: ListQuery = ListQuery {
    columns: r#"
        b.id, b.name, b.species_id,
        s.name AS species_name
    "#,
    from: "breed b JOIN species s ON s.id = b.species_id",
    root_key: "b.id",
    search_columns: &["b.name", "s.name"],
    order_by: "b.name ASC, b.id ASC",
    fans_out: false,
};

fn map_breed(r: &PgRow) -> Result<BreedWithSpecies, sqlx::Error> {
    let species_id: Uuid = r.try_get("species_id")?;
    Ok(BreedWithSpecies {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        species_id,
        species: Species {
            id: species_id,
            name: r.try_get("species_name")?,
        },
    })
}

pub async fn fetch_breeds(
    state: &AppState,
    _caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<BreedWithSpecies>, ApiError> {
    fetch_page(&state.db, &BREED_LIST, req, None, map_breed).await
}

pub async fn list_breeds(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_breeds(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Breeds), Json(page)))
}

/* ============================================================
   Upsert / delete
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct BreedInput {
    pub id: Option<Uuid>,
    pub name: String,
    pub species_id: Uuid,
}

fn validate_breed(input: &BreedInput) -> Result<String, ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 64);
    v.finish()?;
    Ok(name)
}

async fn load_breed(state: &AppState, breed_id: Uuid) -> Result<BreedWithSpecies, ApiError> {
    fetch_one(&state.db, &BREED_LIST, breed_id, None, map_breed)
        .await?
        .ok_or_else(|| ApiError::not_found("breed"))
}

pub async fn write_breed(
    state: &AppState,
    caller: &CallerContext,
    input: BreedInput,
) -> Result<BreedWithSpecies, ApiError> {
    caller.ensure_staff()?;
    let name = validate_breed(&input)?;

    let species_exists: Option<Uuid> =
        sqlx::query_scalar(r#"SELECT id FROM species WHERE id = $1"#)
            .bind(input.species_id)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?;
    if species_exists.is_none() {
        return Err(ApiError::not_found("species"));
    }

    let breed_id: Uuid = match input.id {
        Some(id) => sqlx::query_scalar(
            r#"
            UPDATE breed
            SET name = $2, species_id = $3
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&name)
        .bind(input.species_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("breed"))?,
        None => sqlx::query_scalar(
            r#"
            INSERT INTO breed (name, species_id)
            VALUES ($1, $2)
            ON CONFLICT (species_id, name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id
            "#,
        )
        .bind(&name)
        .bind(input.species_id)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?,
    };

    tracing::info!(breed_id = %breed_id, "breed saved");
    state.revisions.bump(&[Listing::Breeds, Listing::Pets]);
    load_breed(state, breed_id).await
}

pub async fn upsert_breed(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<BreedInput>,
) -> Result<Json<ApiOk<BreedWithSpecies>>, ApiError> {
    let data = write_breed(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn remove_breed(
    state: &AppState,
    caller: &CallerContext,
    breed_id: Uuid,
) -> Result<(), ApiError> {
    caller.ensure_staff()?;

    let res = sqlx::query(r#"DELETE FROM breed WHERE id = $1"#)
        .bind(breed_id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("breed"));
    }

    tracing::info!(breed_id = %breed_id, "breed deleted");
    state.revisions.bump(&[Listing::Breeds, Listing::Pets]);
    Ok(())
}

pub async fn delete_breed(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(breed_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    remove_breed(&state, &caller, breed_id).await?;
    Ok(Json(OkResponse::ok()))
}
