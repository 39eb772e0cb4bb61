// src/routes/doctor_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    accounts::{
        compensate, ensure_identity, resolve_external_id, upsert_base_user, user_columns,
        user_from_row, BaseUser, Specialization, User,
    },
    error::{ApiError, db_error},
    formatting::{availability_label, format_time},
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, Role},
    revalidate::Listing,
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/doctors", get(list_doctors).post(upsert_doctor))
        .route("/doctors/{doctor_id}", get(get_doctor))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorWithRelations {
    pub id: Uuid,
    pub phone: String,
    pub cpf: String,
    pub license_number: String,
    pub license_state: String,
    pub specialty: String,
    pub from_week_day: i16,
    pub to_week_day: i16,
    pub from_time: String,
    pub to_time: String,
    /// e.g. "Segunda a Sexta, 08:00 - 18:00"
    pub availability: String,
    pub user: User,
}

/// Doctor as embedded in appointments and prescription templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DoctorBrief {
    pub id: Uuid,
    pub license_number: String,
    pub license_state: String,
    pub user: User,
}

const DOCTOR_LIST: ListQuery = ListQuery {
    columns: concat!(
        "d.id, d.phone, d.cpf, d.license_number, d.license_state, d.specialty, ",
        "d.from_week_day, d.to_week_day, d.from_time, d.to_time, ",
        user_columns!("u", "user")
    ),
    from: "doctor d JOIN app_user u ON u.id = d.user_id",
    root_key: "d.id",
    search_columns: &["u.name", "u.email", "d.cpf", "d.license_number", "d.specialty"],
    order_by: "u.name ASC, d.id ASC",
    fans_out: false,
};

fn map_doctor(r: &PgRow) -> Result<DoctorWithRelations, sqlx::Error> {
    let from_week_day: i16 = r.try_get("from_week_day")?;
    let to_week_day: i16 = r.try_get("to_week_day")?;
    let from_time: NaiveTime = r.try_get("from_time")?;
    let to_time: NaiveTime = r.try_get("to_time")?;

    Ok(DoctorWithRelations {
        id: r.try_get("id")?,
        phone: r.try_get("phone")?,
        cpf: r.try_get("cpf")?,
        license_number: r.try_get("license_number")?,
        license_state: r.try_get("license_state")?,
        specialty: r.try_get("specialty")?,
        from_week_day,
        to_week_day,
        from_time: format_time(from_time),
        to_time: format_time(to_time),
        availability: availability_label(from_week_day, to_week_day, from_time, to_time),
        user: user_from_row(r, "user")?,
    })
}

pub async fn fetch_doctors(
    state: &AppState,
    caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<DoctorWithRelations>, ApiError> {
    caller.ensure_staff()?;
    fetch_page(&state.db, &DOCTOR_LIST, req, None, map_doctor).await
}

pub async fn list_doctors(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_doctors(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Doctors), Json(page)))
}

pub async fn load_doctor(
    state: &AppState,
    caller: &CallerContext,
    doctor_id: Uuid,
) -> Result<DoctorWithRelations, ApiError> {
    caller.ensure_staff()?;
    fetch_one(&state.db, &DOCTOR_LIST, doctor_id, None, map_doctor)
        .await?
        .ok_or_else(|| ApiError::not_found("doctor"))
}

pub async fn get_doctor(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<ApiOk<DoctorWithRelations>>, ApiError> {
    let data = load_doctor(&state, &caller, doctor_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   Upsert
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct DoctorInput {
    pub id: Option<Uuid>,
    pub external_identity_id: Option<String>,
    pub name: String,
    pub email: String,
    pub image: Option<String>,
    pub phone: String,
    pub cpf: String,
    pub license_number: String,
    pub license_state: String,
    pub specialty: String,
    pub from_week_day: i16,
    pub to_week_day: i16,
    pub from_time: String,
    pub to_time: String,
}

#[derive(Debug)]
struct ValidDoctor {
    user: BaseUser,
    phone: String,
    cpf: String,
    license_number: String,
    license_state: String,
    specialty: String,
    from_week_day: i16,
    to_week_day: i16,
    from_time: NaiveTime,
    to_time: NaiveTime,
}

fn validate_doctor(input: &DoctorInput) -> Result<ValidDoctor, ApiError> {
    let mut v = FieldErrors::new();
    let name = v.required("name", &input.name);
    v.max_len("name", &name, 120);
    let email = v.email("email", &input.email);
    let phone = v.phone("phone", &input.phone);
    let cpf = v.cpf("cpf", &input.cpf);
    let license_number = v.required("license_number", &input.license_number);
    let license_state = v.state_code("license_state", &input.license_state);
    let specialty = v.required("specialty", &input.specialty);
    v.week_day("from_week_day", input.from_week_day);
    v.week_day("to_week_day", input.to_week_day);
    let from_time = v.time("from_time", &input.from_time);
    let to_time = v.time("to_time", &input.to_time);
    v.time_window(from_time, to_time);
    v.finish()?;

    let (Some(from_time), Some(to_time)) = (from_time, to_time) else {
        return Err(ApiError::Internal("validated times missing".into()));
    };

    Ok(ValidDoctor {
        user: BaseUser {
            name,
            email,
            image: input.image.clone().filter(|s| !s.trim().is_empty()),
            role: Role::Doctor,
        },
        phone,
        cpf,
        license_number,
        license_state,
        specialty,
        from_week_day: input.from_week_day,
        to_week_day: input.to_week_day,
        from_time,
        to_time,
    })
}

async fn save_doctor(
    state: &AppState,
    id: Option<Uuid>,
    external_id: &str,
    d: &ValidDoctor,
) -> Result<Uuid, ApiError> {
    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let user_id = upsert_base_user(&mut tx, external_id, &d.user).await?;

    let query = match id {
        Some(id) => sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE doctor
            SET user_id = $2, phone = $3, cpf = $4, license_number = $5, license_state = $6,
                specialty = $7, from_week_day = $8, to_week_day = $9, from_time = $10, to_time = $11
            WHERE id = $1
            RETURNING id
            "#,
        )
        .bind(id),
        None => sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO doctor (
              user_id, phone, cpf, license_number, license_state,
              specialty, from_week_day, to_week_day, from_time, to_time
            )
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10)
            ON CONFLICT (cpf) DO UPDATE
            SET user_id = EXCLUDED.user_id,
                phone = EXCLUDED.phone,
                license_number = EXCLUDED.license_number,
                license_state = EXCLUDED.license_state,
                specialty = EXCLUDED.specialty,
                from_week_day = EXCLUDED.from_week_day,
                to_week_day = EXCLUDED.to_week_day,
                from_time = EXCLUDED.from_time,
                to_time = EXCLUDED.to_time
            RETURNING id
            "#,
        ),
    };

    let doctor_id = query
        .bind(user_id)
        .bind(&d.phone)
        .bind(&d.cpf)
        .bind(&d.license_number)
        .bind(&d.license_state)
        .bind(&d.specialty)
        .bind(d.from_week_day)
        .bind(d.to_week_day)
        .bind(d.from_time)
        .bind(d.to_time)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("doctor"))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;
    Ok(doctor_id)
}

pub async fn write_doctor(
    state: &AppState,
    caller: &CallerContext,
    input: DoctorInput,
) -> Result<DoctorWithRelations, ApiError> {
    caller.ensure_staff()?;
    let valid = validate_doctor(&input)?;

    let known = resolve_external_id(
        &state.db,
        Specialization::Doctor,
        input.id,
        &valid.cpf,
        input.external_identity_id.clone(),
    )
    .await?;
    let provisioned = ensure_identity(state.identity.as_ref(), known, &valid.user).await?;

    let doctor_id = match save_doctor(state, input.id, &provisioned.external_id, &valid).await {
        Ok(id) => id,
        Err(e) => {
            compensate(state.identity.as_ref(), &provisioned).await;
            return Err(e);
        }
    };

    tracing::info!(doctor_id = %doctor_id, "doctor saved");
    state
        .revisions
        .bump(&[Listing::Doctors, Listing::Appointments, Listing::Prescriptions, Listing::Dashboard]);
    load_doctor(state, caller, doctor_id).await
}

pub async fn upsert_doctor(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<DoctorInput>,
) -> Result<Json<ApiOk<DoctorWithRelations>>, ApiError> {
    let data = write_doctor(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}
