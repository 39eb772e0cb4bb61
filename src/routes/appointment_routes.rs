// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, Row};
use uuid::Uuid;

use crate::{
    accounts::{user_columns, user_from_row},
    error::{ApiError, db_error},
    formatting::{age_label, format_brl, weekday_name},
    listing::{fetch_one, fetch_page, ListQuery, ListQueryParams, Page, PageRequest, Scope},
    middleware::auth_context::CallerContext,
    models::{ApiOk, AppState, AppointmentStatus},
    revalidate::Listing,
    routes::{doctor_routes::DoctorBrief, pet_routes::Tutor},
    validation::FieldErrors,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", get(list_appointments).post(upsert_appointment))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments/{appointment_id}/status", post(change_status))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentPet {
    pub id: Uuid,
    pub name: String,
    pub age: String,
    pub tutor: Tutor,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppointmentService {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppointmentWithRelations {
    pub id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    /// Weekday of `scheduled_at`, e.g. "Terça".
    pub weekday: String,
    pub status: AppointmentStatus,
    /// Price at booking time; later service price changes do not apply.
    pub total_price_in_cents: i32,
    pub total_price: String,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub pet: AppointmentPet,
    pub service: AppointmentService,
    pub doctor: DoctorBrief,
}

pub(crate) const APPOINTMENT_LIST: ListQuery = ListQuery {
    columns: concat!(
        "a.id, a.scheduled_at, a.status, a.total_price_in_cents, a.notes, a.created_at, ",
        "p.id AS pet_id, p.name AS pet_name, p.birth_date AS pet_birth_date, ",
        "c.id AS tutor_id, c.phone AS tutor_phone, ",
        user_columns!("tu", "tutor_user"),
        ", sv.id AS service_id, sv.name AS service_name, ",
        "d.id AS doctor_id, d.license_number AS doctor_license_number, ",
        "d.license_state AS doctor_license_state, ",
        user_columns!("du", "doctor_user")
    ),
    from: r#"
        appointment a
        JOIN pet p ON p.id = a.pet_id
        JOIN customer c ON c.id = p.customer_id
        JOIN app_user tu ON tu.id = c.user_id
        JOIN service sv ON sv.id = a.service_id
        JOIN doctor d ON d.id = a.doctor_id
        JOIN app_user du ON du.id = d.user_id
    "#,
    root_key: "a.id",
    search_columns: &["a.notes", "sv.name", "p.name", "d.license_number", "du.name"],
    order_by: "a.scheduled_at ASC, a.id ASC",
    fans_out: false,
};

pub(crate) fn map_appointment(r: &PgRow, today: NaiveDate) -> Result<AppointmentWithRelations, sqlx::Error> {
    let scheduled_at: DateTime<Utc> = r.try_get("scheduled_at")?;
    let total_price_in_cents: i32 = r.try_get("total_price_in_cents")?;
    let pet_birth_date: NaiveDate = r.try_get("pet_birth_date")?;
    let weekday = i16::try_from(scheduled_at.weekday().num_days_from_sunday())
        .ok()
        .and_then(weekday_name)
        .unwrap_or("-");

    Ok(AppointmentWithRelations {
        id: r.try_get("id")?,
        scheduled_at,
        weekday: weekday.to_string(),
        status: r.try_get("status")?,
        total_price_in_cents,
        total_price: format_brl(i64::from(total_price_in_cents)),
        notes: r.try_get("notes")?,
        created_at: r.try_get("created_at")?,
        pet: AppointmentPet {
            id: r.try_get("pet_id")?,
            name: r.try_get("pet_name")?,
            age: age_label(pet_birth_date, today),
            tutor: Tutor {
                id: r.try_get("tutor_id")?,
                phone: r.try_get("tutor_phone")?,
                user: user_from_row(r, "tutor_user")?,
            },
        },
        service: AppointmentService {
            id: r.try_get("service_id")?,
            name: r.try_get("service_name")?,
        },
        doctor: DoctorBrief {
            id: r.try_get("doctor_id")?,
            license_number: r.try_get("doctor_license_number")?,
            license_state: r.try_get("doctor_license_state")?,
            user: user_from_row(r, "doctor_user")?,
        },
    })
}

/// Customers see appointments of their own pets only.
pub(crate) async fn appointment_scope(
    state: &AppState,
    caller: &CallerContext,
) -> Result<Option<Scope>, ApiError> {
    if caller.is_customer() {
        let customer_id = caller.customer_id(&state.db).await?;
        Ok(Some(Scope { column: "p.customer_id", value: customer_id }))
    } else {
        Ok(None)
    }
}

pub async fn fetch_appointments(
    state: &AppState,
    caller: &CallerContext,
    req: &PageRequest,
) -> Result<Page<AppointmentWithRelations>, ApiError> {
    let scope = appointment_scope(state, caller).await?;
    let today = Utc::now().date_naive();
    fetch_page(&state.db, &APPOINTMENT_LIST, req, scope, |r| map_appointment(r, today)).await
}

pub async fn list_appointments(
    State(state): State<AppState>,
    caller: CallerContext,
    Query(params): Query<ListQueryParams>,
) -> Result<impl IntoResponse, ApiError> {
    let req = PageRequest::from_params(&params)?;
    let page = fetch_appointments(&state, &caller, &req).await?;
    Ok((state.revisions.header(Listing::Appointments), Json(page)))
}

pub async fn load_appointment(
    state: &AppState,
    caller: &CallerContext,
    appointment_id: Uuid,
) -> Result<AppointmentWithRelations, ApiError> {
    let scope = appointment_scope(state, caller).await?;
    let today = Utc::now().date_naive();
    fetch_one(&state.db, &APPOINTMENT_LIST, appointment_id, scope, |r| map_appointment(r, today))
        .await?
        .ok_or_else(|| ApiError::not_found("appointment"))
}

pub async fn get_appointment(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentWithRelations>>, ApiError> {
    let data = load_appointment(&state, &caller, appointment_id).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /appointments  (create or update)
   ============================================================ */

#[derive(Debug, Clone, Deserialize)]
pub struct AppointmentInput {
    pub id: Option<Uuid>,
    pub pet_id: Uuid,
    pub service_id: Uuid,
    pub doctor_id: Uuid,
    pub scheduled_at: DateTime<Utc>,
    pub notes: Option<String>,
}

fn validate_notes(notes: Option<&str>) -> Result<Option<String>, ApiError> {
    let notes = notes.map(str::trim).filter(|s| !s.is_empty()).map(str::to_string);
    let mut v = FieldErrors::new();
    if let Some(n) = &notes {
        v.max_len("notes", n, 2000);
    }
    v.finish()?;
    Ok(notes)
}

async fn ensure_exists(state: &AppState, sql: &'static str, id: Uuid, what: &str) -> Result<(), ApiError> {
    let found: Option<Uuid> = sqlx::query_scalar(sql)
        .bind(id)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?;
    found.map(|_| ()).ok_or_else(|| ApiError::not_found(what))
}

pub async fn write_appointment(
    state: &AppState,
    caller: &CallerContext,
    input: AppointmentInput,
) -> Result<AppointmentWithRelations, ApiError> {
    let notes = validate_notes(input.notes.as_deref())?;

    // Customers book for their own pets; another tutor's pet reads as missing.
    let owner = if caller.is_customer() {
        Some(caller.customer_id(&state.db).await?)
    } else {
        None
    };
    let pet: Option<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM pet
        WHERE id = $1 AND ($2::uuid IS NULL OR customer_id = $2)
        "#,
    )
    .bind(input.pet_id)
    .bind(owner)
    .fetch_optional(&state.db)
    .await
    .map_err(db_error)?;
    if pet.is_none() {
        return Err(ApiError::not_found("pet"));
    }
    ensure_exists(state, r#"SELECT id FROM doctor WHERE id = $1"#, input.doctor_id, "doctor").await?;

    let appointment_id: Uuid = match input.id {
        // The booked price is never rewritten.
        Some(id) => {
            ensure_exists(state, r#"SELECT id FROM service WHERE id = $1"#, input.service_id, "service").await?;
            sqlx::query_scalar(
                r#"
                UPDATE appointment a
                SET pet_id = $2, service_id = $3, doctor_id = $4, scheduled_at = $5, notes = $6
                FROM pet p
                WHERE a.id = $1
                  AND p.id = a.pet_id
                  AND ($7::uuid IS NULL OR p.customer_id = $7)
                RETURNING a.id
                "#,
            )
            .bind(id)
            .bind(input.pet_id)
            .bind(input.service_id)
            .bind(input.doctor_id)
            .bind(input.scheduled_at)
            .bind(&notes)
            .bind(owner)
            .fetch_optional(&state.db)
            .await
            .map_err(db_error)?
            .ok_or_else(|| ApiError::not_found("appointment"))?
        }
        // Snapshot the service price in the same statement that creates the row.
        None => sqlx::query_scalar(
            r#"
            INSERT INTO appointment (
              pet_id, service_id, doctor_id, scheduled_at, notes, total_price_in_cents
            )
            SELECT $1, sv.id, $3, $4, $5, sv.price_in_cents
            FROM service sv
            WHERE sv.id = $2
            RETURNING id
            "#,
        )
        .bind(input.pet_id)
        .bind(input.service_id)
        .bind(input.doctor_id)
        .bind(input.scheduled_at)
        .bind(&notes)
        .fetch_optional(&state.db)
        .await
        .map_err(db_error)?
        .ok_or_else(|| ApiError::not_found("service"))?,
    };

    tracing::info!(appointment_id = %appointment_id, "appointment saved");
    state.revisions.bump(&[Listing::Appointments, Listing::Dashboard]);
    load_appointment(state, caller, appointment_id).await
}

pub async fn upsert_appointment(
    State(state): State<AppState>,
    caller: CallerContext,
    Json(input): Json<AppointmentInput>,
) -> Result<Json<ApiOk<AppointmentWithRelations>>, ApiError> {
    let data = write_appointment(&state, &caller, input).await?;
    Ok(Json(ApiOk { data }))
}

/* ============================================================
   POST /appointments/{id}/status
   ============================================================ */

#[derive(Debug, Deserialize)]
pub struct StatusChangeRequest {
    pub status: AppointmentStatus,
}

/// Staff may apply any allowed transition; customers may only cancel.
fn ensure_may_set(caller: &CallerContext, next: AppointmentStatus) -> Result<(), ApiError> {
    if caller.is_customer() && next != AppointmentStatus::Cancelled {
        return Err(ApiError::Forbidden(
            "FORBIDDEN",
            "Customers can only cancel appointments".into(),
        ));
    }
    Ok(())
}

pub async fn transition_appointment(
    state: &AppState,
    caller: &CallerContext,
    appointment_id: Uuid,
    next: AppointmentStatus,
) -> Result<AppointmentWithRelations, ApiError> {
    ensure_may_set(caller, next)?;
    let owner = if caller.is_customer() {
        Some(caller.customer_id(&state.db).await?)
    } else {
        None
    };

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    let current: AppointmentStatus = sqlx::query_scalar(
        r#"
        SELECT a.status
        FROM appointment a
        JOIN pet p ON p.id = a.pet_id
        WHERE a.id = $1
          AND ($2::uuid IS NULL OR p.customer_id = $2)
        FOR UPDATE OF a
        "#,
    )
    .bind(appointment_id)
    .bind(owner)
    .fetch_optional(&mut *tx)
    .await
    .map_err(db_error)?
    .ok_or_else(|| ApiError::not_found("appointment"))?;

    if !current.can_transition_to(next) {
        let message = if current.is_terminal() {
            format!("appointment is already {}", current.as_str())
        } else {
            format!("cannot move appointment from {} to {}", current.as_str(), next.as_str())
        };
        return Err(ApiError::Conflict("INVALID_TRANSITION", message));
    }

    sqlx::query(r#"UPDATE appointment SET status = $2 WHERE id = $1"#)
        .bind(appointment_id)
        .bind(next)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

    tx.commit()
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    tracing::info!(
        appointment_id = %appointment_id,
        from = current.as_str(),
        to = next.as_str(),
        "appointment status changed"
    );
    state.revisions.bump(&[Listing::Appointments, Listing::Dashboard]);
    load_appointment(state, caller, appointment_id).await
}

pub async fn change_status(
    State(state): State<AppState>,
    caller: CallerContext,
    Path(appointment_id): Path<Uuid>,
    Json(req): Json<StatusChangeRequest>,
) -> Result<Json<ApiOk<AppointmentWithRelations>>, ApiError> {
    let data = transition_appointment(&state, &caller, appointment_id, req.status).await?;
    Ok(Json(ApiOk { data }))
}
