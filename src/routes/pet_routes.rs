// src/routes/pet_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    accounts::{user_columns, user_from_row, User},
    error::{ApiError, FieldError, db_error},
    formatting::age_label,
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest, Scope},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, PetGender, PetStatus},
    revalidate::Listing,
    routes::{breed_routes::BreedWithSpecies, species_routes::Species},
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/pets", get(list_pets).post(upsert_pet))
        .route("/pets/{pet_id}", get(get_pet))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Tutor {
    pub id: Uuid,
    pub phone: String,
    pub user: User,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PetWithRelations {
    pub id: Uuid,
    pub name: String,
    pub birth_date: NaiveDate,
    pub age: String,
    pub sterile: bool,
    pub photo: Option<String>,
    pub color: String,
    pub gender: PetGender,
    pub weight: f64,
    pub status: PetStatus,
    pub observations: Option<String>,
    pub created_at: DateTime<Utc>,
    pub breed: BreedWithSpecies,
    pub tutor: Tutor,
}

const PET_LIST: ListQuery = ListQuery {
    columns: concat!(
        "p.id, p.name, p.birth_date, p.sterile, p.photo, p.color, p.gender, p.weight, ",
        "p.status, p.observations, p.created_at, ",
        "b.id AS breed_id, b.name AS breed_name, s.id AS species_id, s.name AS species_name, ",
        "c.id AS tutor_id, c.phone AS tutor_phone, ",
        user_columns!("u", "tutor_user")
    ),
    from: r#"
        pet p
        JOIN breed b ON b.id = p.breed_id
        JOIN species s ON s.id = b.species_id
        JOIN customer c ON c.id = p.customer_id
        JOIN app_user u ON u.id = c.user_id
    "#,
    root_key: "p.id",
    search_columns: &["p.name", "b.name", "s.name", "u.name"],
    order_by: "p.name ASC, p.id ASC",
    fans_out: false,
};

fn map_pet(r: &PgRow, today: NaiveDate) -> Result<PetWithRelations, sqlx::Error> {
    let birth_date: NaiveDate = r.try_get("birth_date")?;
    let species_id: Uuid = r.try_get("species_id")?;

    Ok(PetWithRelations {
        id: r.try_get("id")?,
        name: r.try_get("name")?,
        birth_date,
        age: age_label(birth_date, today),
        sterile: r.try_get("sterile")?,
        photo: r.try_get("photo")?,
        color: r.try_get("color")?,
        gender: r.try_get("gender")?,
        weight: r.try_get("weight")?,
        status: r.try_get("status")?,
        observations: r.try_get("observations")?,
        created_at: r.try_get("created_at")?,
        breed: BreedWithSpecies {
            id: r.try_get("breed_id")?,
            name: r.try_get("breed_name")?,
            species_id,
            species: Species {
                id: species_id,
                name: r.try_get("species_name")?,
            },
        },
        tutor: Tutor {
            id: r.try_get("tutor_id")?,
            phone: r.try_get("tutor_phone")?,
            user: user_from_row(r, "tutor_user")?,
        },
    })
}

/// Customers only ever see their own pets.
async fn pet_scope(state: &AppState, caller: &CallerContext) -> Result<Option<Scope>, ApiError> {
    if caller.is_customer() {
        let customer_id = caller.customer_id(&state.db).await?;
        Ok(Some(Scope { column: "p.customer_id", value: customer_id }))
    } else {
        Ok(None)
    }
}

pub async fn fetch_pets(
    state: &AppState,
    caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<PetWithRelations>, ApiError> {
    let scope = pet_scope(state, caller).await?;
    let today = Utc::now().date_naive();
    fetch_page(&state.db, &PET_LIST, req, scope, |r| map_pet(r, today)).await
}

pub async fn list_pets(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_pets(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Pets), Json(page)))
}

pub async fn load_pet(
    state: &AppState,
    caller: &CallerContext,
    pet_id: Uuid,
) -> Result<PetWithRelations, ApiError> {
    let scope = pet_scope(state, caller).await?;
    let today = Utc::now().date_naive();
    fetch_one(&state.db, &PET_LIST, pet_id, scope, |r| map_pet(r, today))
        .await?
        .ok_or_else(|| ApiError::not_found("pet"))
}

pub async fn get_pet(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(pet_id): Path<Uuid>,
) -> Result<Json<ApiOk<PetWithRelations>>, ApiError> {
    let data = load_pet(&state, &caller, pet_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Upsert
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct PetInput {
    pub id: Option<Uuid>,
    pub name: String,
    pub birth_date: NaiveDate,
    pub breed_id: Uuid,
    /// Ignored for customer callers.
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    pub sterile: bool,
    pub photo: Option<String>,
    pub color: String,
    pub gender: PetGender,
    pub weight: f64,
    pub status: Option<PetStatus>,
    pub observations: Option<String>,
}

#[derive(Debug)]
struct ValidPet {
    name: String,
    color: String,
    photo: Option<String>,
    observations: Option<String>,
}

fn validate_pet(input: &PetInput, today: NaiveDate) -> Result<ValidPet, ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 64);
    let color = v.required("color", &input.color);
    v.positive("weight", input.weight);
    v.not_in_future("birth_date", input.birth_date, today);
    v.finish()?;

    let non_blank = |s: &Option<String>| {
        s.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    Ok(ValidPet {
        name,
        color,
        photo: non_blank(&input.photo),
        observations: non_blank(&input.observations),
    })
}

/// Tutor the pet is written under: the caller's own customer record for
/// customers, the form's `customer_id` for staff.
async fn resolve_tutor(
    state: &AppState,
    caller: &CallerContext,
    requested: Option<Uuid>,
) -> Result<Uuid, ApiError> {
    if caller.is_customer() {
        return caller.customer_id(&state.db).await;
    }

    let Some(customer_id) = requested else {
        return Err(ApiError::Validation(vec![FieldError {
            field: "customer_id",
            message: "customer_id is required".into(),
        }]));
    };

    let exists: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM customer WHERE id = $1"#)
        .bind(customer_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    exists.ok_or_else(|| ApiError::not_found("customer"))
}

pub async fn write_pet(
    state: &AppState,
    caller: &CallerContext,
    input: PetInput,
) -> Result<PetWithRelations, ApiError> {
    let valid = validate_pet(&input, Utc::now().date_naive())?;
    let customer_id = resolve_tutor(state, caller, input.customer_id).await?;

    let breed: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM breed WHERE id = $1"#)
        .bind(input.breed_id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    if breed.is_none() {
        return Err(ApiError::not_found("breed"));
    }

    let status = input.status.unwrap_or(PetStatus::Active);

    let pet_id: Uuid = match input.id {
        // Customers may only touch their own pets; anything else reads as missing.
        Some(id) => sqlx::query_scalar(
            r#"
            UPDATE pet
            SET name = $2, birth_date = $3, breed_id = $4, customer_id = $5, sterile = $6,
                photo = $7, color = $8, gender = $9, weight = $10, status = $11, observations = $12
            WHERE id = $1
              AND ($13::uuid IS NULL OR customer_id = $13)
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(&valid.name)
        .bind(input.birth_date)
        .bind(input.breed_id)
        .bind(customer_id)
        .bind(input.sterile)
        .bind(&valid.photo)
        .bind(&valid.color)
        .bind(input.gender)
        .bind(input.weight)
        .bind(status)
        .bind(&valid.observations)
        .bind(caller.is_customer().then_some(customer_id))
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("pet"))?,
        None => sqlx::query_scalar(
            r#"
            INSERT INTO pet (
              name, birth_date, breed_id, customer_id, sterile,
              photo, color, gender, weight, status, observations
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11)
            RETURNING id
            "#,
        )
        .bind(&valid.name)
        .bind(input.birth_date)
        .bind(input.breed_id)
        .bind(customer_id)
        .bind(input.sterile)
        .bind(&valid.photo)
        .bind(&valid.color)
        .bind(input.gender)
        .bind(input.weight)
        .bind(status)
        .bind(&valid.observations)
        .fetch_one(&state.db)
        .await
        .map_err(db_error)?,
    };

    tracing::info!(pet_id = %pet_id, customer_id = %customer_id, "pet saved");
    state
        .revisions
        .bump(&[Listing::Pets, Listing::Customers, Listing::Appointments, Listing::Dashboard]);
    load_pet(state, caller, pet_id).await
}

pub async fn upsert_pet(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<PetInput>,
) -> Result<Json<ApiOk<PetWithRelations>>, ApiError> {
    let data = write_pet(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}
