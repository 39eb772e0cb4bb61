// src/routes/species_routes.rs

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
    listing::{fetch_page, ListQuery, ListQueryParams, Page, PageRequest},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, OkResponse},
    revalidate::Listing,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/species", get(list_species).post(upsert_species))
        .route("/species/{species_id}", delete(delete_species))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Species {
    pub id: Uuid,
    pub name: String,
}

const SPECIES_LIST: ListQuery = ListQuery {
    columns: "s.id, s.name",
    from: "species s",
    root_key: "s.id",
    search_columns: &["s.name"],
    order_by: "s.name ASC, s.id ASC",
    fans_out: false,
};

fn map_species(r: &PgRow) -> Result<Species, sqlx::Error> {
    Ok(Species {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
    })
}

pub async fn fetch_species(
    state: &AppState,
    _caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<Species>, ApiError> {
    fetch_page(&state.db, &SPECIES_LIST, req, None, map_species).await
}

pub async fn list_species(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_species(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Species), Json(page)))
}

/* ============================================================
   Upsert / delete
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct SpeciesInput {
    pub id: Option<Uuid>,
    pub name: String,
}

fn validate_species(input: &SpeciesInput) -> Result<String, ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 64);
    v.finish()?;
    Ok(name)
}

pub async fn write_species(
    state: &AppState,
    caller: &CallerContext,
    input: SpeciesInput,
) -> Result<Species, ApiError> {
    caller.ensure_staff()?;
    let name = validate_species(&input)?;

    let species = match input.id {
        Some(id) => sqlx::query_as::<_, Species>(
            r#"
            UPDATE species
            SET name = $2
            WHERE id = $1
            RETURNING id, name
            "#,
        )
        .bind(id)
        .bind(&name)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("species"))?,
        None => sqlx::query_as::<_, Species>(
            r#"
            INSERT INTO species (name)
            VALUES ($1)
            ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name
            RETURNING id, name
            "#,
        )
        .bind(&name)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?,
    };

    tracing::info!(species_id = %species.id, "species saved");
    state
        .revisions
        .bump(&[Listing::Species, Listing::Breeds, Listing::Services, Listing::Pets]);
    Ok(species)
}

pub async fn upsert_species(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<SpeciesInput>,
) -> Result<Json<ApiOk<Species>>, ApiError> {
    let data = write_species(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

pub async fn remove_species(
    state: &AppState,
    caller: &CallerContext,
    species_id: Uuid,
) -> Result<(), ApiError> {
    caller.ensure_staff()?;

    let res = sqlx::query(r#"DELETE FROM species WHERE id = $1"#)
        .bind(species_id)
        .execute(&state.db)
        .await
        .map_err(db_error)?;

    if res.rows_affected() == 0 {
        return Err(ApiError::not_found("species"));
    }

    tracing::info!(species_id = %species_id, "species deleted");
    state
        .revisions
        .bump(&[Listing::Species, Listing::Breeds, Listing::Services, Listing::Pets]);
    Ok(())
}

pub async fn delete_species(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(species_id): Path<Uuid>,
) -> Result<Json<OkResponse>, ApiError> {
    remove_species(&state, &caller, species_id).await?;
    Ok(Json(OkResponse::ok()))
}
